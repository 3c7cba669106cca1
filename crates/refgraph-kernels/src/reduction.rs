//! Reductions, index reductions, softmax, cumulative sum and top-k.
//!
//! Reductions write their result in the row-major order of the input shape
//! with the reduced axes removed. Keeping the reduced axes as extent one
//! does not change that order, so callers choose the declared output shape.

use crate::error::{KernelError, Result};
use refgraph_core::shape::{
    check_axes, coordinate_of, offset, reduce, row_major_strides, shape_size, AxisSet,
    CoordinateIter,
};
use refgraph_core::Element;
use std::cmp::Ordering;

fn check_input<T>(arg: &[T], shape: &[usize]) -> Result<()> {
    if arg.len() != shape_size(shape) {
        return Err(KernelError::invalid(format!(
            "{} elements do not match shape {:?}",
            arg.len(),
            shape
        )));
    }
    Ok(())
}

/// Fold `arg` over `axes` into `out`, starting every output from `init`.
pub fn reduce_with<T: Element, U: Element>(
    arg: &[T],
    out: &mut [U],
    in_shape: &[usize],
    axes: &AxisSet,
    init: U,
    f: impl Fn(U, T) -> U,
) -> Result<()> {
    check_input(arg, in_shape)?;
    check_axes(axes, in_shape.len())?;
    let out_shape = reduce(in_shape, axes);
    if out.len() != shape_size(&out_shape) {
        return Err(KernelError::invalid(format!(
            "reduction output holds {} elements, expected shape {:?}",
            out.len(),
            out_shape
        )));
    }

    // Output stride for each input axis, zero on reduced axes.
    let out_strides = row_major_strides(&out_shape);
    let mut step = vec![0usize; in_shape.len()];
    let mut kept = 0;
    for (axis, s) in step.iter_mut().enumerate() {
        if !axes.contains(&axis) {
            *s = out_strides[kept];
            kept += 1;
        }
    }

    out.fill(init);
    for (coord, &x) in CoordinateIter::new(in_shape).zip(arg) {
        let o = offset(&coord, &step);
        out[o] = f(out[o], x);
    }
    Ok(())
}

/// Sum over axes.
pub fn sum<T: Element>(arg: &[T], out: &mut [T], shape: &[usize], axes: &AxisSet) -> Result<()> {
    reduce_with(arg, out, shape, axes, T::zero(), |acc, x| acc.add(x))
}

/// Product over axes.
pub fn product<T: Element>(
    arg: &[T],
    out: &mut [T],
    shape: &[usize],
    axes: &AxisSet,
) -> Result<()> {
    reduce_with(arg, out, shape, axes, T::one(), |acc, x| acc.mul(x))
}

/// Maximum over axes. Reducing an empty extent yields the lowest value.
pub fn max<T: Element>(arg: &[T], out: &mut [T], shape: &[usize], axes: &AxisSet) -> Result<()> {
    reduce_with(arg, out, shape, axes, T::lowest(), |acc, x| {
        if x > acc || x.is_nan() {
            x
        } else {
            acc
        }
    })
}

/// Minimum over axes. Reducing an empty extent yields the highest value.
pub fn min<T: Element>(arg: &[T], out: &mut [T], shape: &[usize], axes: &AxisSet) -> Result<()> {
    reduce_with(arg, out, shape, axes, T::highest(), |acc, x| {
        if x < acc || x.is_nan() {
            x
        } else {
            acc
        }
    })
}

/// Arithmetic mean over axes. Integer means truncate.
pub fn mean<T: Element>(arg: &[T], out: &mut [T], shape: &[usize], axes: &AxisSet) -> Result<()> {
    sum(arg, out, shape, axes)?;
    let count: usize = axes.iter().map(|&a| shape[a]).product();
    if count == 0 {
        return Ok(());
    }
    let divisor = T::from_i64(count as i64);
    for o in out.iter_mut() {
        *o = o.div(divisor).ok_or(KernelError::DivisionByZero)?;
    }
    Ok(())
}

/// Logical and over axes.
pub fn all<T: Element>(arg: &[T], out: &mut [T], shape: &[usize], axes: &AxisSet) -> Result<()> {
    reduce_with(arg, out, shape, axes, T::one(), |acc, x| {
        T::from_bool(acc.is_true() && x.is_true())
    })
}

/// Logical or over axes.
pub fn any<T: Element>(arg: &[T], out: &mut [T], shape: &[usize], axes: &AxisSet) -> Result<()> {
    reduce_with(arg, out, shape, axes, T::zero(), |acc, x| {
        T::from_bool(acc.is_true() || x.is_true())
    })
}

/// Visit every 1-d lane of `shape` along `axis`. The callback receives the
/// flat offsets of the lane's elements in order.
fn for_each_lane(shape: &[usize], axis: usize, mut f: impl FnMut(usize, &[usize])) {
    let strides = row_major_strides(shape);
    let extent = shape[axis];
    let mut outer_shape = shape.to_vec();
    outer_shape[axis] = 1;
    let mut lane = Vec::with_capacity(extent);
    for (lane_index, coord) in CoordinateIter::new(&outer_shape).enumerate() {
        let base = offset(&coord, &strides);
        lane.clear();
        lane.extend((0..extent).map(|i| base + i * strides[axis]));
        f(lane_index, &lane);
    }
}

fn check_axis(shape: &[usize], axis: usize) -> Result<()> {
    if axis >= shape.len() {
        return Err(KernelError::invalid(format!(
            "axis {} is out of range for shape {:?}",
            axis, shape
        )));
    }
    Ok(())
}

fn arg_extreme<T: Element, I: Element>(
    arg: &[T],
    out: &mut [I],
    shape: &[usize],
    axis: usize,
    better: impl Fn(T, T) -> bool,
) -> Result<()> {
    check_input(arg, shape)?;
    check_axis(shape, axis)?;
    if out.len() * shape[axis] != arg.len() {
        return Err(KernelError::invalid("index reduction output has the wrong size"));
    }
    for_each_lane(shape, axis, |lane_index, lane| {
        let mut best = 0;
        for (i, &o) in lane.iter().enumerate().skip(1) {
            if better(arg[o], arg[lane[best]]) {
                best = i;
            }
        }
        out[lane_index] = I::from_i64(best as i64);
    });
    Ok(())
}

/// Index of the first maximum along `axis`.
pub fn argmax<T: Element, I: Element>(
    arg: &[T],
    out: &mut [I],
    shape: &[usize],
    axis: usize,
) -> Result<()> {
    arg_extreme(arg, out, shape, axis, |x, best| x > best)
}

/// Index of the first minimum along `axis`.
pub fn argmin<T: Element, I: Element>(
    arg: &[T],
    out: &mut [I],
    shape: &[usize],
    axis: usize,
) -> Result<()> {
    arg_extreme(arg, out, shape, axis, |x, best| x < best)
}

/// Softmax over `axes`, computed in `f64` and stabilized by the maximum.
pub fn softmax<T: Element>(
    arg: &[T],
    out: &mut [T],
    shape: &[usize],
    axes: &AxisSet,
) -> Result<()> {
    check_input(arg, shape)?;
    if out.len() != arg.len() {
        return Err(KernelError::invalid("softmax output has the wrong size"));
    }
    let reduced = shape_size(&reduce(shape, axes));
    let mut maxima = vec![f64::NEG_INFINITY; reduced];
    let wide: Vec<f64> = arg.iter().map(|x| x.to_f64()).collect();
    max(&wide, &mut maxima, shape, axes)?;

    let out_shape = reduce(shape, axes);
    let out_strides = row_major_strides(&out_shape);
    let reduced_index = |coord: &[usize]| {
        coord
            .iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .map(|(_, &c)| c)
            .zip(&out_strides)
            .map(|(c, s)| c * s)
            .sum::<usize>()
    };

    let mut exps = vec![0.0f64; arg.len()];
    for (i, coord) in CoordinateIter::new(shape).enumerate() {
        exps[i] = (wide[i] - maxima[reduced_index(&coord)]).exp();
    }
    let mut sums = vec![0.0f64; reduced];
    sum(&exps, &mut sums, shape, axes)?;
    for (i, coord) in CoordinateIter::new(shape).enumerate() {
        out[i] = T::from_f64(exps[i] / sums[reduced_index(&coord)]);
    }
    Ok(())
}

/// Running sum along `axis`.
pub fn cumsum<T: Element>(
    arg: &[T],
    out: &mut [T],
    shape: &[usize],
    axis: usize,
    exclusive: bool,
    reverse: bool,
) -> Result<()> {
    check_input(arg, shape)?;
    check_axis(shape, axis)?;
    if out.len() != arg.len() {
        return Err(KernelError::invalid("cumsum output has the wrong size"));
    }
    for_each_lane(shape, axis, |_, lane| {
        let mut acc = T::zero();
        let mut visit = |o: usize| {
            if exclusive {
                out[o] = acc;
                acc = acc.add(arg[o]);
            } else {
                acc = acc.add(arg[o]);
                out[o] = acc;
            }
        };
        if reverse {
            lane.iter().rev().for_each(|&o| visit(o));
        } else {
            lane.iter().for_each(|&o| visit(o));
        }
    });
    Ok(())
}

/// Best-first order for top-k. Unordered values (NaN) rank after every
/// ordered value and tie with each other.
fn rank_order<T: PartialOrd>(a: T, b: T, compute_max: bool) -> Ordering {
    match a.partial_cmp(&b) {
        Some(order) if compute_max => order.reverse(),
        Some(order) => order,
        #[allow(clippy::eq_op)]
        None => (a != a).cmp(&(b != b)),
    }
}

/// Ordering of the `k` results along the top-k axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopKSort {
    /// Leave results in selection order
    None,
    /// Sort by ascending source index
    Indices,
    /// Sort by value, best first
    #[default]
    Values,
}

/// The `k` largest (or smallest) elements along `axis` and their indices.
/// Ties keep the lower index first.
#[allow(clippy::too_many_arguments)]
pub fn topk<T: Element, I: Element>(
    arg: &[T],
    out_indices: &mut [I],
    out_values: &mut [T],
    shape: &[usize],
    axis: usize,
    k: usize,
    compute_max: bool,
    sort: TopKSort,
) -> Result<()> {
    check_input(arg, shape)?;
    check_axis(shape, axis)?;
    if k > shape[axis] {
        return Err(KernelError::invalid(format!(
            "k = {} exceeds axis extent {}",
            k, shape[axis]
        )));
    }
    let mut out_shape = shape.to_vec();
    out_shape[axis] = k;
    let out_len = shape_size(&out_shape);
    if out_indices.len() != out_len || out_values.len() != out_len {
        return Err(KernelError::invalid("top-k outputs have the wrong size"));
    }
    let out_strides = row_major_strides(&out_shape);
    let mut outer_shape = shape.to_vec();
    outer_shape[axis] = 1;

    let mut scratch: Vec<(T, usize)> = Vec::with_capacity(shape[axis]);
    for_each_lane(shape, axis, |lane_index, lane| {
        scratch.clear();
        scratch.extend(lane.iter().enumerate().map(|(i, &o)| (arg[o], i)));
        scratch.sort_by(|a, b| rank_order(a.0, b.0, compute_max).then(a.1.cmp(&b.1)));
        scratch.truncate(k);
        if sort == TopKSort::Indices {
            scratch.sort_by_key(|&(_, i)| i);
        }
        // Place the lane in the output at the same outer coordinate.
        let outer = coordinate_of(lane_index, &outer_shape);
        let base = offset(&outer, &out_strides);
        for (j, &(value, index)) in scratch.iter().enumerate() {
            let o = base + j * out_strides[axis];
            out_values[o] = value;
            out_indices[o] = I::from_i64(index as i64);
        }
    });
    Ok(())
}
