//! Shape, stride and axis helpers shared by kernels and shape inference.

use crate::error::{CoreError, Result};
use crate::types::AutoBroadcast;
use std::collections::BTreeSet;

/// Extents of a tensor, outermost first.
pub type Shape = Vec<usize>;
/// Element strides of a tensor.
pub type Strides = Vec<usize>;
/// A position inside a tensor.
pub type Coordinate = Vec<usize>;
/// A permutation or ordered list of axes.
pub type AxisVector = Vec<usize>;
/// Signed per-axis offsets, used for padding.
pub type CoordinateDiff = Vec<i64>;
/// An unordered set of axes.
pub type AxisSet = BTreeSet<usize>;

/// Number of elements in a shape. The empty shape holds one element.
pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major element strides for a shape.
pub fn row_major_strides(shape: &[usize]) -> Strides {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// The identity permutation of `rank` axes.
pub fn default_order(rank: usize) -> AxisVector {
    (0..rank).collect()
}

/// Linear offset of a coordinate under the given strides.
pub fn offset(coord: &[usize], strides: &[usize]) -> usize {
    coord.iter().zip(strides).map(|(c, s)| c * s).sum()
}

/// Decompose a linear row-major index into a coordinate.
pub fn coordinate_of(mut index: usize, shape: &[usize]) -> Coordinate {
    let mut coord = vec![0; shape.len()];
    for axis in (0..shape.len()).rev() {
        let extent = shape[axis];
        if extent > 0 {
            coord[axis] = index % extent;
            index /= extent;
        }
    }
    coord
}

/// Advance a coordinate in row-major order. Returns `false` after the last
/// coordinate has been visited.
pub fn next_coordinate(coord: &mut [usize], shape: &[usize]) -> bool {
    for axis in (0..shape.len()).rev() {
        coord[axis] += 1;
        if coord[axis] < shape[axis] {
            return true;
        }
        coord[axis] = 0;
    }
    false
}

/// Iterator over every coordinate of a shape in row-major order.
#[derive(Debug, Clone)]
pub struct CoordinateIter {
    shape: Shape,
    current: Option<Coordinate>,
}

impl CoordinateIter {
    /// Iterate the coordinates of `shape`.
    pub fn new(shape: &[usize]) -> Self {
        let current = if shape.iter().any(|&d| d == 0) {
            None
        } else {
            Some(vec![0; shape.len()])
        };
        Self {
            shape: shape.to_vec(),
            current,
        }
    }
}

impl Iterator for CoordinateIter {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        let current = self.current.take()?;
        let mut next = current.clone();
        if next_coordinate(&mut next, &self.shape) {
            self.current = Some(next);
        }
        Some(current)
    }
}

/// Shape with the given axes removed.
pub fn reduce(shape: &[usize], axes: &AxisSet) -> Shape {
    shape
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, &d)| d)
        .collect()
}

/// Shape with the given axes kept as extent one.
pub fn reduce_keep_dims(shape: &[usize], axes: &AxisSet) -> Shape {
    shape
        .iter()
        .enumerate()
        .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
        .collect()
}

/// Coordinate with the given axes removed.
pub fn project(coord: &[usize], axes: &AxisSet) -> Coordinate {
    reduce(coord, axes)
}

/// Normalize a possibly negative axis against a rank.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let rank_i = rank as i64;
    let normalized = if axis < 0 { axis + rank_i } else { axis };
    if normalized < 0 || normalized >= rank_i.max(1) {
        return Err(CoreError::Shape(format!(
            "axis {axis} is out of range for rank {rank}"
        )));
    }
    Ok(normalized as usize)
}

/// Check that every axis is below `rank`.
pub fn check_axes(axes: &AxisSet, rank: usize) -> Result<()> {
    match axes.iter().find(|&&a| a >= rank) {
        Some(axis) => Err(CoreError::Shape(format!(
            "axis {axis} is out of range for rank {rank}"
        ))),
        None => Ok(()),
    }
}

/// Output shape of a binary elementwise operation under a broadcast rule.
pub fn broadcast_shape(a: &[usize], b: &[usize], rule: AutoBroadcast) -> Result<Shape> {
    match rule {
        AutoBroadcast::None => {
            if a != b {
                return Err(CoreError::Shape(format!(
                    "arguments must have equal shapes without broadcasting, got {a:?} and {b:?}"
                )));
            }
            Ok(a.to_vec())
        }
        AutoBroadcast::Numpy => {
            let rank = a.len().max(b.len());
            let mut out = vec![0; rank];
            for i in 0..rank {
                let da = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
                let db = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
                out[i] = if da == db || db == 1 {
                    da
                } else if da == 1 {
                    db
                } else {
                    return Err(CoreError::Shape(format!(
                        "shapes {a:?} and {b:?} are not broadcast compatible"
                    )));
                };
            }
            Ok(out)
        }
        AutoBroadcast::Pdpd { axis } => {
            let start = pdpd_start_axis(a, b, axis)?;
            for (i, &db) in b.iter().enumerate() {
                if db != 1 && db != a[start + i] {
                    return Err(CoreError::Shape(format!(
                        "shape {b:?} cannot be broadcast into {a:?} at axis {start}"
                    )));
                }
            }
            Ok(a.to_vec())
        }
    }
}

/// First axis of `a` the second operand aligns to under pdpd broadcasting.
pub fn pdpd_start_axis(a: &[usize], b: &[usize], axis: i64) -> Result<usize> {
    if b.len() > a.len() {
        return Err(CoreError::Shape(format!(
            "pdpd broadcast requires rank({b:?}) <= rank({a:?})"
        )));
    }
    let start = if axis < 0 {
        a.len() - b.len()
    } else {
        axis as usize
    };
    if start + b.len() > a.len() {
        return Err(CoreError::Shape(format!(
            "pdpd axis {axis} does not fit {b:?} into {a:?}"
        )));
    }
    Ok(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_strides() {
        assert_eq!(row_major_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(row_major_strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn test_coordinate_iteration_order() {
        let coords: Vec<_> = CoordinateIter::new(&[2, 2]).collect();
        assert_eq!(coords, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        assert_eq!(CoordinateIter::new(&[]).count(), 1);
        assert_eq!(CoordinateIter::new(&[3, 0]).count(), 0);
    }

    #[test]
    fn test_coordinate_of_round_trips_offset() {
        let shape = [3, 4, 5];
        let strides = row_major_strides(&shape);
        for index in 0..shape_size(&shape) {
            assert_eq!(offset(&coordinate_of(index, &shape), &strides), index);
        }
    }

    #[test]
    fn test_numpy_broadcast() -> Result<()> {
        assert_eq!(broadcast_shape(&[2, 1, 3], &[4, 1], AutoBroadcast::Numpy)?, vec![2, 4, 3]);
        assert_eq!(broadcast_shape(&[2, 2], &[2, 2], AutoBroadcast::Numpy)?, vec![2, 2]);
        assert!(broadcast_shape(&[2, 3], &[3, 2], AutoBroadcast::Numpy).is_err());
        Ok(())
    }

    #[test]
    fn test_pdpd_broadcast() -> Result<()> {
        let rule = AutoBroadcast::Pdpd { axis: 1 };
        assert_eq!(broadcast_shape(&[2, 3, 4], &[3], rule)?, vec![2, 3, 4]);
        assert!(broadcast_shape(&[2, 3, 4], &[4], rule).is_err());
        Ok(())
    }

    #[test]
    fn test_reduce_shapes() {
        let axes: AxisSet = [0, 2].into_iter().collect();
        assert_eq!(reduce(&[2, 3, 4], &axes), vec![3]);
        assert_eq!(reduce_keep_dims(&[2, 3, 4], &axes), vec![1, 3, 1]);
    }

    #[test]
    fn test_normalize_axis() -> Result<()> {
        assert_eq!(normalize_axis(-1, 3)?, 2);
        assert!(normalize_axis(3, 3).is_err());
        Ok(())
    }
}
