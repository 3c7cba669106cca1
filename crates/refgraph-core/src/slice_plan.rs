//! Normalization of numpy-style slicing into a canonical plan.
//!
//! A [`SlicePlan`] describes any combination of begin/end/stride vectors
//! and the begin, end, new-axis, shrink-axis and ellipsis masks as:
//!
//! 1. a forward slice over every input axis (`begins`, `ends`, positive
//!    `strides`) whose result has shape `reshape_in_shape`,
//! 2. a reshape of that result to `reshape_out_shape`, which inserts new
//!    axes and drops shrunken ones,
//! 3. a reversal of `reverse_axes` (axes of `reshape_out_shape`) to account
//!    for negative strides.

use crate::error::{CoreError, Result};
use crate::shape::{AxisSet, Shape};
use serde::{Deserialize, Serialize};

/// Mask sets accompanying a slice request. Each set holds positions in the
/// begin/end/stride vectors, not input axes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceMasks {
    /// Positions whose begin is ignored and taken from the start of the axis
    pub lower_bounds: AxisSet,
    /// Positions whose end is ignored and taken to the end of the axis
    pub upper_bounds: AxisSet,
    /// Positions that insert a new axis of extent one
    pub new_axis: AxisSet,
    /// Positions that select a single index and drop the axis
    pub shrink_axis: AxisSet,
    /// Position of the ellipsis, at most one
    pub ellipsis: AxisSet,
}

/// Canonical forward-slice, reshape and reverse description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePlan {
    /// Inclusive start per input axis
    pub begins: Vec<usize>,
    /// Exclusive end per input axis
    pub ends: Vec<usize>,
    /// Positive step per input axis
    pub strides: Vec<usize>,
    /// Shape of the forward slice
    pub reshape_in_shape: Shape,
    /// Final output shape
    pub reshape_out_shape: Shape,
    /// Axes of the output to reverse
    pub reverse_axes: AxisSet,
}

/// Turn a 0/1 mask vector into the set of positions holding 1.
pub fn mask_to_axis_set(mask: &[i64]) -> AxisSet {
    mask.iter()
        .enumerate()
        .filter(|(_, bit)| **bit == 1)
        .map(|(i, _)| i)
        .collect()
}

/// Build a plan for slicing `input_shape`.
///
/// Begin and end indices may be negative (counted from the end of the axis)
/// and are clipped to the axis like numpy does. A shrink-axis index is not
/// clipped: an out-of-range index is an error. When no ellipsis is given an
/// implicit one follows the last position.
pub fn make_slice_plan(
    input_shape: &[usize],
    begins: &[i64],
    ends: &[i64],
    strides: &[i64],
    masks: &SliceMasks,
) -> Result<SlicePlan> {
    let num_slice_indices = begins.len();
    if ends.len() != num_slice_indices {
        return Err(CoreError::SlicePlan(format!(
            "{} begin values but {} end values",
            num_slice_indices,
            ends.len()
        )));
    }
    let unit_strides;
    let strides = if strides.is_empty() {
        unit_strides = vec![1; num_slice_indices];
        &unit_strides[..]
    } else if strides.len() == num_slice_indices {
        strides
    } else {
        return Err(CoreError::SlicePlan(format!(
            "{} begin values but {} stride values",
            num_slice_indices,
            strides.len()
        )));
    };

    let mut num_real_axes = 0;
    let mut num_new_axes = 0;
    let mut ellipsis_found = false;
    for i in 0..num_slice_indices {
        if masks.ellipsis.contains(&i) {
            if ellipsis_found {
                return Err(CoreError::SlicePlan(
                    "at most one ellipsis is allowed".to_string(),
                ));
            }
            ellipsis_found = true;
        } else if masks.new_axis.contains(&i) {
            num_new_axes += 1;
        } else {
            num_real_axes += 1;
        }
    }

    if num_real_axes > input_shape.len() {
        return Err(CoreError::SlicePlan(format!(
            "{} sliced axes for input shape {:?}",
            num_real_axes, input_shape
        )));
    }
    let ellipsis_size = input_shape.len() - num_real_axes;
    let rank = input_shape.len();

    let mut plan = SlicePlan {
        begins: vec![0; rank],
        ends: vec![0; rank],
        strides: vec![1; rank],
        reshape_in_shape: vec![0; rank],
        reshape_out_shape: Vec::with_capacity(num_new_axes + rank),
        reverse_axes: AxisSet::new(),
    };

    let mut i_in = 0;
    let expand_ellipsis = |plan: &mut SlicePlan, i_in: &mut usize| {
        for _ in 0..ellipsis_size {
            let dim = input_shape[*i_in];
            plan.begins[*i_in] = 0;
            plan.ends[*i_in] = dim;
            plan.strides[*i_in] = 1;
            plan.reshape_in_shape[*i_in] = dim;
            plan.reshape_out_shape.push(dim);
            *i_in += 1;
        }
    };

    for i in 0..num_slice_indices {
        if masks.ellipsis.contains(&i) {
            expand_ellipsis(&mut plan, &mut i_in);
        } else if masks.new_axis.contains(&i) {
            plan.reshape_out_shape.push(1);
        } else if masks.shrink_axis.contains(&i) {
            let dim = input_shape[i_in] as i64;
            let mut begin = begins[i];
            if begin < -dim || begin >= dim {
                return Err(CoreError::SlicePlan(format!(
                    "shrink index {} is out of range for axis of extent {}",
                    begin, dim
                )));
            }
            if begin < 0 {
                begin += dim;
            }
            plan.begins[i_in] = begin as usize;
            plan.ends[i_in] = begin as usize + 1;
            plan.strides[i_in] = 1;
            plan.reshape_in_shape[i_in] = 1;
            i_in += 1;
        } else {
            let stride = strides[i];
            if stride == 0 {
                return Err(CoreError::SlicePlan("stride must be non-zero".to_string()));
            }
            let dim = input_shape[i_in] as i64;
            let adjust = |x: i64| if x < 0 { x + dim } else { x };

            let (count, begin, step, reversed) = if stride > 0 {
                let begin = if masks.lower_bounds.contains(&i) {
                    0
                } else {
                    adjust(begins[i]).clamp(0, dim)
                };
                let end = if masks.upper_bounds.contains(&i) {
                    dim
                } else {
                    adjust(ends[i]).clamp(0, dim)
                };
                let count = if end > begin {
                    (end - begin + stride - 1) / stride
                } else {
                    0
                };
                (count, begin, stride, false)
            } else {
                let step = -stride;
                let begin = if masks.lower_bounds.contains(&i) {
                    dim - 1
                } else {
                    adjust(begins[i]).clamp(-1, dim - 1)
                };
                let end = if masks.upper_bounds.contains(&i) {
                    -1
                } else {
                    adjust(ends[i]).clamp(-1, dim - 1)
                };
                let count = if begin > end {
                    (begin - end + step - 1) / step
                } else {
                    0
                };
                // Walk the same elements forwards from the last one visited.
                let first = begin - (count - 1).max(0) * step;
                (count, first, step, true)
            };

            if count > 0 {
                plan.begins[i_in] = begin as usize;
                plan.ends[i_in] = (begin + (count - 1) * step + 1) as usize;
                plan.strides[i_in] = step as usize;
                if reversed {
                    plan.reverse_axes.insert(plan.reshape_out_shape.len());
                }
            } else {
                plan.begins[i_in] = 0;
                plan.ends[i_in] = 0;
                plan.strides[i_in] = 1;
            }
            plan.reshape_in_shape[i_in] = count as usize;
            plan.reshape_out_shape.push(count as usize);
            i_in += 1;
        }
    }

    if !ellipsis_found {
        expand_ellipsis(&mut plan, &mut i_in);
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes(values: &[usize]) -> AxisSet {
        values.iter().copied().collect()
    }

    #[test]
    fn test_identity_plan() -> Result<()> {
        let plan = make_slice_plan(&[2, 3], &[], &[], &[], &SliceMasks::default())?;
        assert_eq!(plan.begins, vec![0, 0]);
        assert_eq!(plan.ends, vec![2, 3]);
        assert_eq!(plan.strides, vec![1, 1]);
        assert_eq!(plan.reshape_out_shape, vec![2, 3]);
        assert!(plan.reverse_axes.is_empty());
        Ok(())
    }

    #[test]
    fn test_negative_indices_are_counted_from_end() -> Result<()> {
        // x[-3:-1]
        let plan = make_slice_plan(&[5], &[-3], &[-1], &[1], &SliceMasks::default())?;
        assert_eq!((plan.begins[0], plan.ends[0]), (2, 4));
        assert_eq!(plan.reshape_out_shape, vec![2]);
        Ok(())
    }

    #[test]
    fn test_out_of_range_bounds_are_clipped() -> Result<()> {
        // x[1:100], x[10:]
        let plan = make_slice_plan(&[5], &[1], &[100], &[1], &SliceMasks::default())?;
        assert_eq!(plan.reshape_out_shape, vec![4]);
        let masks = SliceMasks {
            upper_bounds: axes(&[0]),
            ..SliceMasks::default()
        };
        let plan = make_slice_plan(&[5], &[10], &[0], &[1], &masks)?;
        assert_eq!(plan.reshape_out_shape, vec![0]);
        Ok(())
    }

    #[test]
    fn test_full_reverse() -> Result<()> {
        // x[::-1]
        let masks = SliceMasks {
            lower_bounds: axes(&[0]),
            upper_bounds: axes(&[0]),
            ..SliceMasks::default()
        };
        let plan = make_slice_plan(&[5], &[0], &[0], &[-1], &masks)?;
        assert_eq!((plan.begins[0], plan.ends[0], plan.strides[0]), (0, 5, 1));
        assert_eq!(plan.reverse_axes, axes(&[0]));
        assert_eq!(plan.reshape_out_shape, vec![5]);
        Ok(())
    }

    #[test]
    fn test_negative_stride_with_step() -> Result<()> {
        // x[4:0:-2] visits 4 and 2
        let plan = make_slice_plan(&[6], &[4], &[0], &[-2], &SliceMasks::default())?;
        assert_eq!((plan.begins[0], plan.ends[0], plan.strides[0]), (2, 5, 2));
        assert_eq!(plan.reshape_out_shape, vec![2]);
        assert_eq!(plan.reverse_axes, axes(&[0]));
        Ok(())
    }

    #[test]
    fn test_new_axis_and_shrink() -> Result<()> {
        // x[np.newaxis, 1, :] on shape [3, 4]
        let masks = SliceMasks {
            new_axis: axes(&[0]),
            shrink_axis: axes(&[1]),
            ..SliceMasks::default()
        };
        let plan = make_slice_plan(&[3, 4], &[0, 1, 0], &[0, 2, 4], &[1, 1, 1], &masks)?;
        assert_eq!(plan.reshape_in_shape, vec![1, 4]);
        assert_eq!(plan.reshape_out_shape, vec![1, 4]);
        assert_eq!((plan.begins[0], plan.ends[0]), (1, 2));
        Ok(())
    }

    #[test]
    fn test_negative_shrink_index() -> Result<()> {
        let masks = SliceMasks {
            shrink_axis: axes(&[0]),
            ..SliceMasks::default()
        };
        let plan = make_slice_plan(&[3, 2], &[-1], &[0], &[1], &masks)?;
        assert_eq!(plan.begins, vec![2, 0]);
        assert_eq!(plan.reshape_out_shape, vec![2]);
        assert!(make_slice_plan(&[3, 2], &[3], &[0], &[1], &masks).is_err());
        Ok(())
    }

    #[test]
    fn test_ellipsis_expansion() -> Result<()> {
        // x[..., 1:] on shape [2, 3, 4]
        let masks = SliceMasks {
            ellipsis: axes(&[0]),
            ..SliceMasks::default()
        };
        let plan = make_slice_plan(&[2, 3, 4], &[0, 1], &[0, 4], &[1, 1], &masks)?;
        assert_eq!(plan.reshape_out_shape, vec![2, 3, 3]);
        assert_eq!(plan.begins, vec![0, 0, 1]);
        Ok(())
    }

    #[test]
    fn test_invalid_requests() {
        let two_ellipses = SliceMasks {
            ellipsis: axes(&[0, 1]),
            ..SliceMasks::default()
        };
        assert!(make_slice_plan(&[2, 2], &[0, 0], &[1, 1], &[1, 1], &two_ellipses).is_err());
        assert!(make_slice_plan(&[2], &[0], &[1], &[0], &SliceMasks::default()).is_err());
        assert!(make_slice_plan(&[2], &[0, 0], &[1, 1], &[1, 1], &SliceMasks::default()).is_err());
    }

    #[test]
    fn test_mask_to_axis_set() {
        assert_eq!(mask_to_axis_set(&[1, 0, 1]), axes(&[0, 2]));
    }
}
