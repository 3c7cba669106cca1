use super::{expect_inputs, single_output};
use crate::dispatch::{dispatch_element, dispatch_index};
use crate::error::{InterpreterError, Result};
use crate::materialize::{as_f64_scalar, as_i64_vector};
use crate::registry::{ExecContext, OpHandler};
use crate::shape_infer::{
    concat_shape, range_shape, reshape_pattern, slice_plan, transpose_order, transpose_shape,
};
use refgraph_core::shape::{default_order, normalize_axis};
use refgraph_core::slice_plan::mask_to_axis_set;
use refgraph_core::{DataType, Element, HostTensor, Node, SliceMasks, SlicePlan};
use refgraph_kernels::{movement, PadMode};

// Operators with nothing to compute at interpretation time
pub struct NoOp;

impl OpHandler for NoOp {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        _node: &Node,
        _element_type: DataType,
        _outputs: &mut [HostTensor],
        _inputs: &[&HostTensor],
    ) -> Result<()> {
        Ok(())
    }
}

// Result: copy the producing value into the caller's buffer
pub struct ResultCopy;

impl OpHandler for ResultCopy {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        _element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        single_output(node, outputs)?.copy_from(inputs[0])?;
        Ok(())
    }
}

// Constant: the `value` attribute
pub struct Constant;

impl OpHandler for Constant {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        _element_type: DataType,
        outputs: &mut [HostTensor],
        _inputs: &[&HostTensor],
    ) -> Result<()> {
        let value = node.attr_tensor("value")?;
        single_output(node, outputs)?.copy_from(value)?;
        Ok(())
    }
}

// Broadcast: replicate along `broadcast_axes` to the declared shape
pub struct Broadcast;

impl OpHandler for Broadcast {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let axes = node.attr_axis_set("broadcast_axes")?;
        let out_shape = node.output_shape(0)?;
        let out = single_output(node, outputs)?;
        out.set_shape(out_shape.clone());
        dispatch_element!(element_type, |T| {
            movement::broadcast(
                inputs[0].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                &out_shape,
                &axes,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// Concat: join every input along `axis`
pub struct Concat;

impl Concat {
    fn run<T: Element>(
        inputs: &[&HostTensor],
        shapes: &[Vec<usize>],
        out: &mut HostTensor,
        axis: usize,
    ) -> Result<()> {
        let args = inputs
            .iter()
            .map(|t| t.as_slice::<T>())
            .collect::<refgraph_core::Result<Vec<_>>>()?;
        let out_shape = out.shape().to_vec();
        movement::concat(&args, shapes, out.as_mut_slice::<T>()?, &out_shape, axis)?;
        Ok(())
    }
}

impl OpHandler for Concat {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let axis = normalize_axis(node.attr_i64("axis")?, inputs[0].shape().len())?;
        let shapes: Vec<Vec<usize>> = inputs.iter().map(|t| t.shape().to_vec()).collect();
        let views: Vec<&[usize]> = shapes.iter().map(Vec::as_slice).collect();
        let out = single_output(node, outputs)?;
        out.set_shape(concat_shape(&views, axis)?);
        dispatch_element!(element_type, |T| Self::run::<T>(inputs, &shapes, out, axis),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

fn reorder<T: Element>(arg: &HostTensor, out: &mut HostTensor, order: &[usize]) -> Result<()> {
    movement::reshape(arg.as_slice::<T>()?, out.as_mut_slice::<T>()?, arg.shape(), order)?;
    Ok(())
}

// Reshape v0: optional axis permutation, then the declared shape
pub struct Reshape;

impl OpHandler for Reshape {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let rank = inputs[0].shape().len();
        let order = match node.attr_usizes_or("input_order", Vec::new())? {
            order if order.is_empty() => default_order(rank),
            order => order,
        };
        let out = single_output(node, outputs)?;
        out.set_shape(node.output_shape(0)?);
        dispatch_element!(element_type, |T| reorder::<T>(inputs[0], out, &order),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// Reshape v1: output shape from the pattern in input 1
pub struct DynReshape;

impl OpHandler for DynReshape {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let pattern = as_i64_vector(node, inputs[1])?;
        let special_zero = node.attr_bool_or("special_zero", false)?;
        let shape = reshape_pattern(inputs[0].shape(), &pattern, special_zero)?;
        let order = default_order(inputs[0].shape().len());
        let out = single_output(node, outputs)?;
        out.set_shape(shape);
        dispatch_element!(element_type, |T| reorder::<T>(inputs[0], out, &order),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// Transpose: axis order from input 1, empty reverses
pub struct Transpose;

impl OpHandler for Transpose {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let in_shape = inputs[0].shape();
        let order = transpose_order(in_shape.len(), &as_i64_vector(node, inputs[1])?)?;
        let out = single_output(node, outputs)?;
        out.set_shape(transpose_shape(in_shape, &order));
        dispatch_element!(element_type, |T| reorder::<T>(inputs[0], out, &order),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// Reverse: flip `reversed_axes`
pub struct Reverse;

impl OpHandler for Reverse {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let axes = node.attr_axis_set("reversed_axes")?;
        let out = single_output(node, outputs)?;
        out.set_shape(inputs[0].shape().to_vec());
        dispatch_element!(element_type, |T| {
            movement::reverse(
                inputs[0].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                &axes,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// ReverseSequence: reverse the leading `lengths[b]` steps of each batch
pub struct ReverseSequence;

impl OpHandler for ReverseSequence {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let rank = inputs[0].shape().len();
        let batch_axis = normalize_axis(node.attr_i64("batch_axis")?, rank)?;
        let sequence_axis = normalize_axis(node.attr_i64("sequence_axis")?, rank)?;
        // Only 32-bit lengths are instantiated
        let lengths = match inputs[1].element_type() {
            DataType::I32 => inputs[1].as_slice::<i32>()?,
            other => return Err(InterpreterError::index_type(node, other)),
        };
        let out = single_output(node, outputs)?;
        out.set_shape(inputs[0].shape().to_vec());
        dispatch_element!(element_type, |T| {
            movement::reverse_sequence(
                inputs[0].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                batch_axis,
                sequence_axis,
                lengths,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// Slice v0: static bounds and strides
pub struct Slice;

impl OpHandler for Slice {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let lower = node.attr_usizes("lower_bounds")?;
        let upper = node.attr_usizes("upper_bounds")?;
        let strides = node.attr_usizes_or("strides", vec![1; lower.len()])?;
        let out = single_output(node, outputs)?;
        out.set_shape(movement::slice_shape(&lower, &upper, &strides)?);
        dispatch_element!(element_type, |T| {
            movement::slice(
                inputs[0].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                &lower,
                &upper,
                &strides,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

/// Begin, end and stride vectors from inputs 1..=3; strides default to one.
fn slice_bounds(node: &Node, inputs: &[&HostTensor]) -> Result<(Vec<i64>, Vec<i64>, Vec<i64>)> {
    expect_inputs(node, inputs, 3)?;
    let begins = as_i64_vector(node, inputs[1])?;
    let ends = as_i64_vector(node, inputs[2])?;
    let strides = match inputs.get(3) {
        Some(strides) => as_i64_vector(node, strides)?,
        None => vec![1; begins.len()],
    };
    Ok((begins, ends, strides))
}

fn run_planned_slice(
    node: &Node,
    element_type: DataType,
    arg: &HostTensor,
    out: &mut HostTensor,
    plan: &SlicePlan,
) -> Result<()> {
    out.set_shape(plan.reshape_out_shape.clone());
    dispatch_element!(element_type, |T| {
        movement::strided_slice(arg.as_slice::<T>()?, out.as_mut_slice::<T>()?, arg.shape(), plan)?;
        Ok(())
    }, other => Err(InterpreterError::element_type(node, other)))
}

// DynSlice: bounds from inputs, masks as axis-set attributes
pub struct DynSlice;

impl OpHandler for DynSlice {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        let (begins, ends, strides) = slice_bounds(node, inputs)?;
        let masks = SliceMasks {
            lower_bounds: node.attr_axis_set("lower_bounds_mask")?,
            upper_bounds: node.attr_axis_set("upper_bounds_mask")?,
            new_axis: node.attr_axis_set("new_axis")?,
            shrink_axis: node.attr_axis_set("shrink_axis")?,
            ellipsis: node.attr_axis_set("ellipsis_mask")?,
        };
        let plan = slice_plan(inputs[0].shape(), &begins, &ends, &strides, &masks)?;
        let out = single_output(node, outputs)?;
        run_planned_slice(node, element_type, inputs[0], out, &plan)
    }
}

// StridedSlice: bounds from inputs, masks as 0/1 vectors
pub struct StridedSlice;

impl OpHandler for StridedSlice {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        let (begins, ends, strides) = slice_bounds(node, inputs)?;
        let mask = |name: &str| -> Result<_> { Ok(mask_to_axis_set(&node.attr_ints_or_empty(name)?)) };
        let masks = SliceMasks {
            lower_bounds: mask("begin_mask")?,
            upper_bounds: mask("end_mask")?,
            new_axis: mask("new_axis_mask")?,
            shrink_axis: mask("shrink_axis_mask")?,
            ellipsis: mask("ellipsis_mask")?,
        };
        let plan = slice_plan(inputs[0].shape(), &begins, &ends, &strides, &masks)?;
        let out = single_output(node, outputs)?;
        run_planned_slice(node, element_type, inputs[0], out, &plan)
    }
}

// ReplaceSlice: input 0 with a strided region overwritten by input 1
pub struct ReplaceSlice;

impl OpHandler for ReplaceSlice {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let lower = node.attr_usizes("lower_bounds")?;
        let upper = node.attr_usizes("upper_bounds")?;
        let strides = node.attr_usizes_or("strides", vec![1; lower.len()])?;
        let out = single_output(node, outputs)?;
        out.set_shape(inputs[0].shape().to_vec());
        dispatch_element!(element_type, |T| {
            movement::replace_slice(
                inputs[0].as_slice::<T>()?,
                inputs[1].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                inputs[1].shape(),
                &lower,
                &upper,
                &strides,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// Pad: pad value from input 1, negative padding crops
pub struct Pad;

impl OpHandler for Pad {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let below = node.attr_ints("padding_below")?;
        let above = node.attr_ints("padding_above")?;
        let mode: PadMode = node.attr_str_or("pad_mode", "constant")?.parse()?;
        let out = single_output(node, outputs)?;
        out.set_shape(movement::pad_shape(inputs[0].shape(), below, above)?);
        dispatch_element!(element_type, |T| {
            let pad_value = inputs[1].as_slice::<T>()?.first().copied().ok_or_else(|| {
                InterpreterError::invalid(format!("{} has an empty pad value", node.name))
            })?;
            movement::pad(
                inputs[0].as_slice::<T>()?,
                pad_value,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                below,
                above,
                mode,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// OneHot: values of input 0 select positions along `one_hot_axis`
pub struct OneHot;

impl OpHandler for OneHot {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let axis = node.attr_usize("one_hot_axis")?;
        let out_shape = node.output_shape(0)?;
        let out = single_output(node, outputs)?;
        out.set_shape(out_shape.clone());
        dispatch_element!(element_type, |T| {
            movement::one_hot(
                inputs[0].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                &out_shape,
                axis,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// ShapeOf: the input's extents as a 1-D integer tensor
pub struct ShapeOf;

impl OpHandler for ShapeOf {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let shape = inputs[0].shape();
        let out = single_output(node, outputs)?;
        out.set_shape(vec![shape.len()]);
        dispatch_index!(element_type, |I| {
            movement::shape_of(shape, out.as_mut_slice::<I>()?)?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// Range: start, stop and step read from inputs 0..=2
pub struct Range;

impl OpHandler for Range {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 3)?;
        let start = as_f64_scalar(node, inputs[0])?;
        let stop = as_f64_scalar(node, inputs[1])?;
        let step = as_f64_scalar(node, inputs[2])?;
        let out = single_output(node, outputs)?;
        out.set_shape(range_shape(start, stop, step)?);
        dispatch_element!(element_type, |T| {
            movement::range(T::from_f64(start), T::from_f64(step), out.as_mut_slice::<T>()?);
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{dynamic, run_node};
    use refgraph_core::NodeSpec;

    fn iota(shape: Vec<usize>) -> Result<HostTensor> {
        let n: usize = shape.iter().product();
        Ok(HostTensor::from_vec(shape, (0..n as i32).collect())?)
    }

    #[test]
    fn test_reshape_v1_infers_extent() -> Result<()> {
        let pattern = HostTensor::from_vec(vec![1], vec![-1i64])?;
        let out = run_node(
            NodeSpec::new("Reshape", 1).output(DataType::I32, dynamic(1)),
            &[iota(vec![2, 3])?, pattern],
        )?;
        assert_eq!(out[0].shape(), &[6]);
        assert_eq!(out[0].to_vec::<i32>()?, vec![0, 1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_reshape_v0_with_input_order() -> Result<()> {
        let spec = NodeSpec::new("Reshape", 0)
            .output(DataType::I32, [3, 2])
            .attr("input_order", vec![1usize, 0]);
        let out = run_node(spec, &[iota(vec![2, 3])?])?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![0, 3, 1, 4, 2, 5]);
        Ok(())
    }

    #[test]
    fn test_transpose_default_order() -> Result<()> {
        let order = HostTensor::from_vec(vec![0], Vec::<i64>::new())?;
        let out = run_node(
            NodeSpec::new("Transpose", 1).output(DataType::I32, dynamic(2)),
            &[iota(vec![2, 3])?, order],
        )?;
        assert_eq!(out[0].shape(), &[3, 2]);
        assert_eq!(out[0].to_vec::<i32>()?, vec![0, 3, 1, 4, 2, 5]);
        Ok(())
    }

    #[test]
    fn test_strided_slice_with_shrink() -> Result<()> {
        let begin = HostTensor::from_vec(vec![2], vec![1i64, 0])?;
        let end = HostTensor::from_vec(vec![2], vec![2i64, 0])?;
        let stride = HostTensor::from_vec(vec![2], vec![1i64, 1])?;
        let spec = NodeSpec::new("StridedSlice", 1)
            .output(DataType::I32, dynamic(1))
            .attr("end_mask", vec![0i64, 1])
            .attr("shrink_axis_mask", vec![1i64, 0]);
        let out = run_node(spec, &[iota(vec![2, 3])?, begin, end, stride])?;
        assert_eq!(out[0].shape(), &[3]);
        assert_eq!(out[0].to_vec::<i32>()?, vec![3, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_dyn_slice_negative_stride() -> Result<()> {
        let begin = HostTensor::from_vec(vec![1], vec![-1i32])?;
        let end = HostTensor::from_vec(vec![1], vec![0i32])?;
        let stride = HostTensor::from_vec(vec![1], vec![-2i32])?;
        let spec = NodeSpec::new("DynSlice", 0).output(DataType::I32, dynamic(1));
        let out = run_node(spec, &[iota(vec![6])?, begin, end, stride])?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![5, 3, 1]);
        Ok(())
    }

    #[test]
    fn test_concat_and_pad() -> Result<()> {
        let spec = NodeSpec::new("Concat", 0)
            .output(DataType::I32, [2, 5])
            .attr("axis", 1i64);
        let out = run_node(spec, &[iota(vec![2, 3])?, iota(vec![2, 2])?])?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![0, 1, 2, 0, 1, 3, 4, 5, 2, 3]);

        let spec = NodeSpec::new("Pad", 0)
            .output(DataType::I32, [5])
            .attr("padding_below", vec![1i64])
            .attr("padding_above", vec![2i64]);
        let out = run_node(spec, &[iota(vec![2])?, HostTensor::scalar(9i32)])?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![9, 0, 1, 9, 9]);
        Ok(())
    }

    #[test]
    fn test_range_and_shape_of() -> Result<()> {
        let out = run_node(
            NodeSpec::new("Range", 0).output(DataType::F32, dynamic(1)),
            &[HostTensor::scalar(1.0f32), HostTensor::scalar(2.0f32), HostTensor::scalar(0.25f32)],
        )?;
        assert_eq!(out[0].to_vec::<f32>()?, vec![1.0, 1.25, 1.5, 1.75]);

        let out = run_node(NodeSpec::new("ShapeOf", 3).output(DataType::I32, [3]), &[iota(vec![4, 1, 2])?])?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![4, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_reverse_sequence_rejects_i64_lengths() -> Result<()> {
        let lengths = HostTensor::from_vec(vec![2], vec![2i64, 3])?;
        let spec = NodeSpec::new("ReverseSequence", 0)
            .output(DataType::I32, [2, 3])
            .attr("batch_axis", 0i64)
            .attr("sequence_axis", 1i64);
        assert!(matches!(
            run_node(spec, &[iota(vec![2, 3])?, lengths]),
            Err(InterpreterError::InvalidIndexType { element_type: DataType::I64, .. })
        ));
        Ok(())
    }
}
