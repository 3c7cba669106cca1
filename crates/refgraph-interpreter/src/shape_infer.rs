//! Output shapes that depend on runtime values.
//!
//! These are pure functions of input shapes and materialized auxiliary
//! values, kept apart from the kernels so they can be tested on their own.

use crate::error::{InterpreterError, Result};
use refgraph_core::shape::{broadcast_shape, check_axes, reduce, reduce_keep_dims, shape_size};
use refgraph_core::{
    make_slice_plan, AutoBroadcast, AxisSet, AxisVector, Shape, SliceMasks, SlicePlan,
};

/// Shape produced by a pattern-driven reshape.
///
/// At most one entry may be `-1`; it absorbs whatever the other extents
/// leave of the input size. With `special_zero`, a `0` copies the input
/// extent at the same position.
pub fn reshape_pattern(in_shape: &[usize], pattern: &[i64], special_zero: bool) -> Result<Shape> {
    let mut inferred = None;
    let mut shape = Vec::with_capacity(pattern.len());
    for (i, &p) in pattern.iter().enumerate() {
        let extent = match p {
            -1 => {
                if inferred.replace(i).is_some() {
                    return Err(InterpreterError::invalid(format!(
                        "reshape pattern {pattern:?} has more than one -1"
                    )));
                }
                1
            }
            0 if special_zero => *in_shape.get(i).ok_or_else(|| {
                InterpreterError::invalid(format!(
                    "reshape pattern {pattern:?} copies axis {i} of rank-{} input",
                    in_shape.len()
                ))
            })?,
            p if p < 0 => {
                return Err(InterpreterError::invalid(format!(
                    "reshape pattern {pattern:?} has negative extent {p}"
                )))
            }
            p => p as usize,
        };
        shape.push(extent);
    }

    let input_size = shape_size(in_shape);
    if let Some(i) = inferred {
        let known = shape_size(&shape);
        shape[i] = if known == 0 {
            if input_size != 0 {
                return Err(InterpreterError::invalid(format!(
                    "cannot infer -1 in {pattern:?} for input {in_shape:?}"
                )));
            }
            0
        } else {
            if input_size % known != 0 {
                return Err(InterpreterError::invalid(format!(
                    "input {in_shape:?} cannot be reshaped to {pattern:?}"
                )));
            }
            input_size / known
        };
    }
    if shape_size(&shape) != input_size {
        return Err(InterpreterError::invalid(format!(
            "reshape of {in_shape:?} to {shape:?} changes the element count"
        )));
    }
    Ok(shape)
}

/// Axis permutation of a transpose. An empty order reverses the axes.
pub fn transpose_order(rank: usize, order: &[i64]) -> Result<AxisVector> {
    if order.is_empty() {
        return Ok((0..rank).rev().collect());
    }
    if order.len() != rank {
        return Err(InterpreterError::invalid(format!(
            "transpose order {order:?} does not match rank {rank}"
        )));
    }
    let mut seen = vec![false; rank];
    let mut axes = Vec::with_capacity(rank);
    for &axis in order {
        let a = usize::try_from(axis)
            .ok()
            .filter(|&a| a < rank && !seen[a])
            .ok_or_else(|| {
                InterpreterError::invalid(format!("transpose order {order:?} is not a permutation"))
            })?;
        seen[a] = true;
        axes.push(a);
    }
    Ok(axes)
}

/// Shape of a transpose by `order`.
pub fn transpose_shape(in_shape: &[usize], order: &[usize]) -> Shape {
    order.iter().map(|&a| in_shape[a]).collect()
}

/// One-dimensional shape of `range(start, stop, step)`.
pub fn range_shape(start: f64, stop: f64, step: f64) -> Result<Shape> {
    Ok(vec![refgraph_kernels::movement::range_len(start, stop, step)?])
}

/// Shape after reducing `axes`, optionally keeping them as extent one.
pub fn reduction_shape(in_shape: &[usize], axes: &AxisSet, keep_dims: bool) -> Result<Shape> {
    check_axes(axes, in_shape.len())?;
    Ok(if keep_dims {
        reduce_keep_dims(in_shape, axes)
    } else {
        reduce(in_shape, axes)
    })
}

/// Shape of a binary elementwise result.
pub fn binary_shape(a: &[usize], b: &[usize], rule: AutoBroadcast) -> Result<Shape> {
    Ok(broadcast_shape(a, b, rule)?)
}

/// Shape of a concatenation along `axis`.
pub fn concat_shape(shapes: &[&[usize]], axis: usize) -> Result<Shape> {
    let first = shapes
        .first()
        .ok_or_else(|| InterpreterError::invalid("concat needs at least one input"))?;
    if axis >= first.len() {
        return Err(InterpreterError::invalid(format!(
            "concat axis {axis} is out of range for rank {}",
            first.len()
        )));
    }
    let mut out = first.to_vec();
    for shape in &shapes[1..] {
        let compatible = shape.len() == first.len()
            && shape
                .iter()
                .zip(first.iter())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(InterpreterError::invalid(format!(
                "cannot concatenate {first:?} and {shape:?} along axis {axis}"
            )));
        }
        out[axis] += shape[axis];
    }
    Ok(out)
}

/// Normalized plan of a slice with runtime bounds; its output shape is
/// `plan.reshape_out_shape`.
pub fn slice_plan(
    in_shape: &[usize],
    begins: &[i64],
    ends: &[i64],
    strides: &[i64],
    masks: &SliceMasks,
) -> Result<SlicePlan> {
    Ok(make_slice_plan(in_shape, begins, ends, strides, masks)?)
}
