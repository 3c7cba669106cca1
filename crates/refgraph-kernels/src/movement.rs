//! Data movement kernels: reshape, slicing, concatenation, broadcast,
//! padding, one-hot, select, range and conversion.

use crate::error::{KernelError, Result};
use refgraph_core::shape::{
    coordinate_of, offset, row_major_strides, shape_size, AxisSet, AxisVector, CoordinateIter,
};
use refgraph_core::{Element, SlicePlan};
use std::str::FromStr;

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

fn check_output<T>(out: &[T], shape: &[usize]) -> Result<()> {
    if out.len() != shape_size(shape) {
        return Err(KernelError::invalid(format!(
            "output holds {} elements, expected shape {:?}",
            out.len(),
            shape
        )));
    }
    Ok(())
}

/// Copy `arg` visiting its axes in `input_order`. With the identity order
/// this is a plain copy; otherwise it is a transpose.
pub fn reshape<T: Element>(
    arg: &[T],
    out: &mut [T],
    in_shape: &[usize],
    input_order: &[usize],
) -> Result<()> {
    check_input(arg, in_shape)?;
    check_output(out, in_shape)?;
    let mut seen = vec![false; in_shape.len()];
    if input_order.len() != in_shape.len()
        || input_order
            .iter()
            .any(|&a| a >= in_shape.len() || std::mem::replace(&mut seen[a], true))
    {
        return Err(KernelError::invalid(format!(
            "{:?} is not a permutation of rank {}",
            input_order,
            in_shape.len()
        )));
    }
    let strides = row_major_strides(in_shape);
    let permuted_shape: Vec<usize> = input_order.iter().map(|&a| in_shape[a]).collect();
    let permuted_strides: Vec<usize> = input_order.iter().map(|&a| strides[a]).collect();
    for (o, coord) in out.iter_mut().zip(CoordinateIter::new(&permuted_shape)) {
        *o = arg[offset(&coord, &permuted_strides)];
    }
    Ok(())
}

/// Shape after permuting `in_shape` by `order`.
pub fn permuted_shape(in_shape: &[usize], order: &AxisVector) -> Vec<usize> {
    order.iter().map(|&a| in_shape[a]).collect()
}

/// Shape of a forward strided slice.
pub fn slice_shape(lower: &[usize], upper: &[usize], strides: &[usize]) -> Result<Vec<usize>> {
    lower
        .iter()
        .zip(upper)
        .zip(strides)
        .map(|((&l, &u), &s)| {
            if s == 0 {
                return Err(KernelError::invalid("slice stride must be positive"));
            }
            Ok(if u > l { (u - l).div_ceil(s) } else { 0 })
        })
        .collect()
}

fn check_bounds(in_shape: &[usize], lower: &[usize], upper: &[usize], strides: &[usize]) -> Result<()> {
    let rank = in_shape.len();
    if lower.len() != rank || upper.len() != rank || strides.len() != rank {
        return Err(KernelError::invalid("slice bounds do not match the input rank"));
    }
    for axis in 0..rank {
        if upper[axis] > in_shape[axis] || lower[axis] > upper[axis] {
            return Err(KernelError::invalid(format!(
                "slice [{}, {}) is out of range for axis {} of extent {}",
                lower[axis], upper[axis], axis, in_shape[axis]
            )));
        }
    }
    Ok(())
}

/// Forward strided slice with positive strides.
pub fn slice<T: Element>(
    arg: &[T],
    out: &mut [T],
    in_shape: &[usize],
    lower: &[usize],
    upper: &[usize],
    strides: &[usize],
) -> Result<()> {
    check_input(arg, in_shape)?;
    check_bounds(in_shape, lower, upper, strides)?;
    let out_shape = slice_shape(lower, upper, strides)?;
    check_output(out, &out_shape)?;
    let in_strides = row_major_strides(in_shape);
    let base = offset(lower, &in_strides);
    let step: Vec<usize> = in_strides.iter().zip(strides).map(|(a, b)| a * b).collect();
    for (o, coord) in out.iter_mut().zip(CoordinateIter::new(&out_shape)) {
        *o = arg[base + offset(&coord, &step)];
    }
    Ok(())
}

/// Execute a normalized slice plan: forward slice, reshape, then reverse.
pub fn strided_slice<T: Element>(
    arg: &[T],
    out: &mut [T],
    in_shape: &[usize],
    plan: &SlicePlan,
) -> Result<()> {
    let mut sliced = vec![T::zero(); shape_size(&plan.reshape_in_shape)];
    slice(arg, &mut sliced, in_shape, &plan.begins, &plan.ends, &plan.strides)?;
    if shape_size(&plan.reshape_out_shape) != sliced.len() {
        return Err(KernelError::invalid("slice plan reshape changes the element count"));
    }
    reverse(&sliced, out, &plan.reshape_out_shape, &plan.reverse_axes)
}

/// Copy `arg0` and overwrite the strided region with `arg1`.
#[allow(clippy::too_many_arguments)]
pub fn replace_slice<T: Element>(
    arg0: &[T],
    arg1: &[T],
    out: &mut [T],
    arg0_shape: &[usize],
    arg1_shape: &[usize],
    lower: &[usize],
    upper: &[usize],
    strides: &[usize],
) -> Result<()> {
    check_input(arg0, arg0_shape)?;
    check_input(arg1, arg1_shape)?;
    check_output(out, arg0_shape)?;
    check_bounds(arg0_shape, lower, upper, strides)?;
    if slice_shape(lower, upper, strides)? != arg1_shape {
        return Err(KernelError::invalid(format!(
            "replacement of shape {:?} does not fill the slice",
            arg1_shape
        )));
    }
    out.copy_from_slice(arg0);
    let out_strides = row_major_strides(arg0_shape);
    let base = offset(lower, &out_strides);
    let step: Vec<usize> = out_strides.iter().zip(strides).map(|(a, b)| a * b).collect();
    for (&x, coord) in arg1.iter().zip(CoordinateIter::new(arg1_shape)) {
        out[base + offset(&coord, &step)] = x;
    }
    Ok(())
}

/// Reverse the order of elements along each axis in `axes`.
pub fn reverse<T: Element>(
    arg: &[T],
    out: &mut [T],
    shape: &[usize],
    axes: &AxisSet,
) -> Result<()> {
    check_input(arg, shape)?;
    check_output(out, shape)?;
    refgraph_core::shape::check_axes(axes, shape.len())?;
    let strides = row_major_strides(shape);
    let mut src = vec![0usize; shape.len()];
    for (o, coord) in out.iter_mut().zip(CoordinateIter::new(shape)) {
        for (axis, s) in src.iter_mut().enumerate() {
            *s = if axes.contains(&axis) {
                shape[axis] - 1 - coord[axis]
            } else {
                coord[axis]
            };
        }
        *o = arg[offset(&src, &strides)];
    }
    Ok(())
}

/// Reverse the first `lengths[b]` elements along `sequence_axis` for every
/// batch entry `b` along `batch_axis`.
pub fn reverse_sequence<T: Element, I: Element>(
    arg: &[T],
    out: &mut [T],
    shape: &[usize],
    batch_axis: usize,
    sequence_axis: usize,
    lengths: &[I],
) -> Result<()> {
    check_input(arg, shape)?;
    check_output(out, shape)?;
    if batch_axis >= shape.len() || sequence_axis >= shape.len() || batch_axis == sequence_axis {
        return Err(KernelError::invalid(format!(
            "invalid batch axis {} and sequence axis {} for rank {}",
            batch_axis,
            sequence_axis,
            shape.len()
        )));
    }
    if lengths.len() != shape[batch_axis] {
        return Err(KernelError::invalid("one sequence length per batch entry is required"));
    }
    let strides = row_major_strides(shape);
    let mut src = vec![0usize; shape.len()];
    for (o, coord) in out.iter_mut().zip(CoordinateIter::new(shape)) {
        let length = lengths[coord[batch_axis]].to_i64();
        if length < 0 || length as usize > shape[sequence_axis] {
            return Err(KernelError::IndexOutOfRange {
                what: "sequence length",
                index: length,
                bound: shape[sequence_axis],
            });
        }
        let length = length as usize;
        src.copy_from_slice(&coord);
        if coord[sequence_axis] < length {
            src[sequence_axis] = length - 1 - coord[sequence_axis];
        }
        *o = arg[offset(&src, &strides)];
    }
    Ok(())
}

/// Concatenate `args` along `axis`.
pub fn concat<T: Element>(
    args: &[&[T]],
    shapes: &[Vec<usize>],
    out: &mut [T],
    out_shape: &[usize],
    axis: usize,
) -> Result<()> {
    check_output(out, out_shape)?;
    if args.len() != shapes.len() || axis >= out_shape.len() {
        return Err(KernelError::invalid("concat arguments are inconsistent"));
    }
    let out_strides = row_major_strides(out_shape);
    let mut axis_start = 0;
    for (arg, shape) in args.iter().zip(shapes) {
        check_input(arg, shape)?;
        let compatible = shape.len() == out_shape.len()
            && shape
                .iter()
                .zip(out_shape)
                .enumerate()
                .all(|(a, (&d, &o))| a == axis || d == o);
        if !compatible {
            return Err(KernelError::invalid(format!(
                "shape {:?} cannot be concatenated into {:?} along axis {}",
                shape, out_shape, axis
            )));
        }
        let base = axis_start * out_strides[axis];
        for (&x, coord) in arg.iter().zip(CoordinateIter::new(shape)) {
            out[base + offset(&coord, &out_strides)] = x;
        }
        axis_start += shape[axis];
    }
    if axis_start != out_shape[axis] {
        return Err(KernelError::invalid("concat inputs do not fill the output"));
    }
    Ok(())
}

/// Broadcast `arg` to `out_shape` by inserting `broadcast_axes`.
pub fn broadcast<T: Element>(
    arg: &[T],
    out: &mut [T],
    in_shape: &[usize],
    out_shape: &[usize],
    broadcast_axes: &AxisSet,
) -> Result<()> {
    check_input(arg, in_shape)?;
    check_output(out, out_shape)?;
    let kept: Vec<usize> = (0..out_shape.len())
        .filter(|a| !broadcast_axes.contains(a))
        .collect();
    if kept.len() != in_shape.len()
        || kept.iter().zip(in_shape).any(|(&a, &d)| out_shape[a] != d)
    {
        return Err(KernelError::invalid(format!(
            "cannot broadcast {:?} to {:?} along {:?}",
            in_shape, out_shape, broadcast_axes
        )));
    }
    let in_strides = row_major_strides(in_shape);
    let mut step = vec![0usize; out_shape.len()];
    for (&a, &s) in kept.iter().zip(&in_strides) {
        step[a] = s;
    }
    for (o, coord) in out.iter_mut().zip(CoordinateIter::new(out_shape)) {
        *o = arg[offset(&coord, &step)];
    }
    Ok(())
}

/// How padded positions are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadMode {
    /// The pad value
    #[default]
    Constant,
    /// The nearest edge element
    Edge,
    /// Mirror without repeating the edge
    Reflect,
    /// Mirror repeating the edge
    Symmetric,
}

impl FromStr for PadMode {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "constant" => Ok(PadMode::Constant),
            "edge" => Ok(PadMode::Edge),
            "reflect" => Ok(PadMode::Reflect),
            "symmetric" => Ok(PadMode::Symmetric),
            other => Err(KernelError::invalid(format!("unknown pad mode '{other}'"))),
        }
    }
}

/// Output shape of a pad. Negative padding crops.
pub fn pad_shape(in_shape: &[usize], below: &[i64], above: &[i64]) -> Result<Vec<usize>> {
    if below.len() != in_shape.len() || above.len() != in_shape.len() {
        return Err(KernelError::invalid("padding does not match the input rank"));
    }
    in_shape
        .iter()
        .zip(below.iter().zip(above))
        .map(|(&d, (&b, &a))| {
            let extent = d as i64 + b + a;
            usize::try_from(extent)
                .map_err(|_| KernelError::invalid(format!("padding leaves extent {extent}")))
        })
        .collect()
}

fn mirror(mut i: i64, extent: i64, repeat_edge: bool) -> i64 {
    if extent == 1 {
        return 0;
    }
    let period = if repeat_edge { 2 * extent } else { 2 * extent - 2 };
    i = i.rem_euclid(period);
    if i < extent {
        i
    } else if repeat_edge {
        period - 1 - i
    } else {
        period - i
    }
}

/// Pad `arg` by `below`/`above` elements per axis.
pub fn pad<T: Element>(
    arg: &[T],
    pad_value: T,
    out: &mut [T],
    in_shape: &[usize],
    below: &[i64],
    above: &[i64],
    mode: PadMode,
) -> Result<()> {
    check_input(arg, in_shape)?;
    let out_shape = pad_shape(in_shape, below, above)?;
    check_output(out, &out_shape)?;
    if mode != PadMode::Constant && in_shape.iter().any(|&d| d == 0) && !out.is_empty() {
        return Err(KernelError::invalid("cannot mirror or extend an empty axis"));
    }
    let in_strides = row_major_strides(in_shape);
    let mut src = vec![0usize; in_shape.len()];
    for (o, coord) in out.iter_mut().zip(CoordinateIter::new(&out_shape)) {
        let mut inside = true;
        for axis in 0..in_shape.len() {
            let extent = in_shape[axis] as i64;
            let i = coord[axis] as i64 - below[axis];
            let mapped = if (0..extent).contains(&i) {
                i
            } else {
                match mode {
                    PadMode::Constant => {
                        inside = false;
                        break;
                    }
                    PadMode::Edge => i.clamp(0, extent - 1),
                    PadMode::Reflect => mirror(i, extent, false),
                    PadMode::Symmetric => mirror(i, extent, true),
                }
            };
            src[axis] = mapped as usize;
        }
        *o = if inside {
            arg[offset(&src, &in_strides)]
        } else {
            pad_value
        };
    }
    Ok(())
}

/// One-hot encode integral values of `arg` along `axis` of `out_shape`.
pub fn one_hot<T: Element>(
    arg: &[T],
    out: &mut [T],
    in_shape: &[usize],
    out_shape: &[usize],
    axis: usize,
) -> Result<()> {
    check_input(arg, in_shape)?;
    check_output(out, out_shape)?;
    if axis >= out_shape.len()
        || out_shape.len() != in_shape.len() + 1
        || refgraph_core::shape::reduce(out_shape, &[axis].into_iter().collect()) != in_shape
    {
        return Err(KernelError::invalid(format!(
            "one-hot of {:?} along axis {} cannot produce {:?}",
            in_shape, axis, out_shape
        )));
    }
    let depth = out_shape[axis];
    let out_strides = row_major_strides(out_shape);
    out.fill(T::zero());
    for (i, &x) in arg.iter().enumerate() {
        let value = x.to_f64();
        if value.fract() != 0.0 || value < 0.0 || value >= depth as f64 {
            return Err(KernelError::IndexOutOfRange {
                what: "one-hot",
                index: value as i64,
                bound: depth,
            });
        }
        let mut coord = coordinate_of(i, in_shape);
        coord.insert(axis, value as usize);
        out[offset(&coord, &out_strides)] = T::one();
    }
    Ok(())
}

/// `out[i] = if cond[i] { a[i] } else { b[i] }`.
pub fn select<T: Element>(cond: &[u8], a: &[T], b: &[T], out: &mut [T]) -> Result<()> {
    if cond.len() != out.len() || a.len() != out.len() || b.len() != out.len() {
        return Err(KernelError::invalid("select arguments must have equal sizes"));
    }
    for (((o, &c), &x), &y) in out.iter_mut().zip(cond).zip(a).zip(b) {
        *o = if c != 0 { x } else { y };
    }
    Ok(())
}

/// Number of elements produced by a range.
pub fn range_len(start: f64, stop: f64, step: f64) -> Result<usize> {
    if step == 0.0 || !step.is_finite() || !start.is_finite() || !stop.is_finite() {
        return Err(KernelError::invalid(format!(
            "range({start}, {stop}, {step}) is not finite"
        )));
    }
    let count = ((stop - start) / step).ceil();
    Ok(if count > 0.0 { count as usize } else { 0 })
}

/// Fill `out` with `start, start + step, ...`.
pub fn range<T: Element>(start: T, step: T, out: &mut [T]) {
    let mut value = start;
    for o in out.iter_mut() {
        *o = value;
        value = value.add(step);
    }
}

/// Elementwise conversion between scalar types with `as` semantics.
pub fn convert<T: Element, U: Element>(arg: &[T], out: &mut [U]) -> Result<()> {
    if arg.len() != out.len() {
        return Err(KernelError::invalid("convert arguments must have equal sizes"));
    }
    let via_integer = !T::IS_REAL && !U::IS_REAL;
    for (o, &x) in out.iter_mut().zip(arg) {
        *o = if via_integer {
            U::from_i64(x.to_i64())
        } else {
            U::from_f64(x.to_f64())
        };
    }
    Ok(())
}

/// Conversion to booleans: nonzero becomes one.
pub fn convert_to_bool<T: Element>(arg: &[T], out: &mut [u8]) -> Result<()> {
    if arg.len() != out.len() {
        return Err(KernelError::invalid("convert arguments must have equal sizes"));
    }
    for (o, &x) in out.iter_mut().zip(arg) {
        *o = u8::from(x.is_true());
    }
    Ok(())
}

/// Write the extents of `shape` as scalars.
pub fn shape_of<I: Element>(shape: &[usize], out: &mut [I]) -> Result<()> {
    check_output(out, &[shape.len()])?;
    for (o, &d) in out.iter_mut().zip(shape) {
        *o = I::from_i64(d as i64);
    }
    Ok(())
}
