use super::{expect_inputs, single_output};
use crate::dispatch::{dispatch_element, dispatch_index, dispatch_types};
use crate::error::{InterpreterError, Result};
use crate::registry::{ExecContext, OpHandler};
use refgraph_core::shape::normalize_axis;
use refgraph_core::{DataType, Element, HostTensor, Node};
use refgraph_kernels::indexing;

fn run_gather<T: Element, I: Element>(
    params: &HostTensor,
    indices: &HostTensor,
    out: &mut HostTensor,
    axis: usize,
) -> Result<()> {
    out.set_shape(indexing::gather_shape(params.shape(), indices.shape(), axis));
    indexing::gather(
        params.as_slice::<T>()?,
        indices.as_slice::<I>()?,
        out.as_mut_slice::<T>()?,
        params.shape(),
        indices.shape(),
        axis,
    )?;
    Ok(())
}

// Gather: slices of input 0 along `axis` at the positions in input 1
pub struct Gather;

impl OpHandler for Gather {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let axis = normalize_axis(node.attr_i64_or("axis", 0)?, inputs[0].shape().len())?;
        let index_type = inputs[1].element_type();
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type, |T| {
            dispatch_index!(index_type, |I| run_gather::<T, I>(inputs[0], inputs[1], out, axis),
                other => Err(InterpreterError::index_type(node, other)))
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

fn run_gather_nd<T: Element, I: Element>(
    params: &HostTensor,
    indices: &HostTensor,
    out: &mut HostTensor,
) -> Result<()> {
    out.set_shape(indexing::gather_nd_shape(params.shape(), indices.shape())?);
    indexing::gather_nd(
        params.as_slice::<T>()?,
        indices.as_slice::<I>()?,
        out.as_mut_slice::<T>()?,
        params.shape(),
        indices.shape(),
    )?;
    Ok(())
}

// GatherND: slices addressed by the innermost index tuples
pub struct GatherNd;

impl OpHandler for GatherNd {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let index_type = inputs[1].element_type();
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type, |T| {
            dispatch_index!(index_type, |I| run_gather_nd::<T, I>(inputs[0], inputs[1], out),
                other => Err(InterpreterError::index_type(node, other)))
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

fn run_scatter_add<T: Element, I: Element>(
    nd: bool,
    base: &HostTensor,
    indices: &HostTensor,
    updates: &HostTensor,
    out: &mut HostTensor,
) -> Result<()> {
    out.set_shape(base.shape().to_vec());
    let kernel = if nd {
        indexing::scatter_nd_add::<T, I>
    } else {
        indexing::scatter_add::<T, I>
    };
    kernel(
        base.as_slice::<T>()?,
        indices.as_slice::<I>()?,
        updates.as_slice::<T>()?,
        out.as_mut_slice::<T>()?,
        base.shape(),
        indices.shape(),
        updates.shape(),
    )?;
    Ok(())
}

// ScatterAdd / ScatterNDAdd: copy of input 0 with input 2 accumulated at input 1
pub struct ScatterAdd {
    /// Index tuples address leading axes rather than the first axis only
    pub nd: bool,
}

impl OpHandler for ScatterAdd {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 3)?;
        let index_type = inputs[1].element_type();
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type, |T| {
            dispatch_index!(index_type,
                |I| run_scatter_add::<T, I>(self.nd, inputs[0], inputs[1], inputs[2], out),
                other => Err(InterpreterError::index_type(node, other)))
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

fn run_embedding<T: Element, I: Element>(
    indices: &HostTensor,
    weights: &HostTensor,
    out: &mut HostTensor,
) -> Result<()> {
    let width = weights.shape().get(1).copied().ok_or_else(|| {
        InterpreterError::invalid(format!(
            "embedding weights must be a matrix, got {:?}",
            weights.shape()
        ))
    })?;
    let mut shape = indices.shape().to_vec();
    shape.push(width);
    out.set_shape(shape);
    indexing::embedding(
        indices.as_slice::<I>()?,
        weights.as_slice::<T>()?,
        out.as_mut_slice::<T>()?,
        weights.shape(),
    )?;
    Ok(())
}

// EmbeddingLookup: rows of input 1 selected by input 0
pub struct EmbeddingLookup;

impl OpHandler for EmbeddingLookup {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let index_type = inputs[0].element_type();
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type, |T| {
            // Float indices are accepted and truncated
            dispatch_types!(index_type, [F32 => f32, F64 => f64, I32 => i32, I64 => i64],
                |I| run_embedding::<T, I>(inputs[0], inputs[1], out),
                other => Err(InterpreterError::index_type(node, other)))
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}
