use super::{expect_inputs, missing_outputs, single_output};
use crate::dispatch::{dispatch_element, dispatch_index};
use crate::error::{InterpreterError, Result};
use crate::materialize::{as_axis_set, as_i64_scalar};
use crate::registry::{ExecContext, OpHandler};
use crate::shape_infer::reduction_shape;
use refgraph_core::shape::normalize_axis;
use refgraph_core::{AxisSet, DataType, Element, HostTensor, Node};
use refgraph_kernels::{reduction, TopKSort};

/// Accumulation applied by a [`Reduce`] handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Product,
    Max,
    Min,
    Mean,
    All,
    Any,
}

impl ReduceKind {
    fn apply<T: Element>(
        self,
        arg: &[T],
        out: &mut [T],
        shape: &[usize],
        axes: &AxisSet,
    ) -> refgraph_kernels::Result<()> {
        match self {
            ReduceKind::Sum => reduction::sum(arg, out, shape, axes),
            ReduceKind::Product => reduction::product(arg, out, shape, axes),
            ReduceKind::Max => reduction::max(arg, out, shape, axes),
            ReduceKind::Min => reduction::min(arg, out, shape, axes),
            ReduceKind::Mean => reduction::mean(arg, out, shape, axes),
            ReduceKind::All => reduction::all(arg, out, shape, axes),
            ReduceKind::Any => reduction::any(arg, out, shape, axes),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum AxesSource {
    /// `reduction_axes` attribute
    Attribute,
    /// Input 1, optionally honoring a `keep_dims` attribute
    Input { keep_dims: bool },
}

// Reductions over an axis set from an attribute or from input 1
pub struct Reduce {
    kind: ReduceKind,
    axes: AxesSource,
}

impl Reduce {
    /// Reduction over the static `reduction_axes` attribute.
    pub fn with_static_axes(kind: ReduceKind) -> Self {
        Self {
            kind,
            axes: AxesSource::Attribute,
        }
    }

    /// Reduction over axes held in input 1.
    pub fn with_axes_input(kind: ReduceKind, keep_dims: bool) -> Self {
        Self {
            kind,
            axes: AxesSource::Input { keep_dims },
        }
    }

    fn run<T: Element>(
        &self,
        arg: &HostTensor,
        out: &mut HostTensor,
        axes: &AxisSet,
        keep_dims: bool,
    ) -> Result<()> {
        out.set_shape(reduction_shape(arg.shape(), axes, keep_dims)?);
        self.kind
            .apply(arg.as_slice::<T>()?, out.as_mut_slice::<T>()?, arg.shape(), axes)?;
        Ok(())
    }
}

impl OpHandler for Reduce {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        let (axes, keep_dims) = match self.axes {
            AxesSource::Attribute => {
                expect_inputs(node, inputs, 1)?;
                (node.attr_axis_set("reduction_axes")?, false)
            }
            AxesSource::Input { keep_dims } => {
                expect_inputs(node, inputs, 2)?;
                let rank = inputs[0].shape().len();
                let keep = keep_dims && node.attr_bool_or("keep_dims", false)?;
                (as_axis_set(node, inputs[1], rank)?, keep)
            }
        };
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type, |T| self.run::<T>(inputs[0], out, &axes, keep_dims),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

fn arg_reduce<T: Element, I: Element>(
    max: bool,
    arg: &HostTensor,
    out: &mut HostTensor,
    axis: usize,
) -> Result<()> {
    let axes: AxisSet = [axis].into_iter().collect();
    out.set_shape(reduction_shape(arg.shape(), &axes, false)?);
    let (arg_values, indices) = (arg.as_slice::<T>()?, out.as_mut_slice::<I>()?);
    if max {
        reduction::argmax(arg_values, indices, arg.shape(), axis)?;
    } else {
        reduction::argmin(arg_values, indices, arg.shape(), axis)?;
    }
    Ok(())
}

// ArgMax / ArgMin: index of the extreme along `axis`
pub struct ArgReduce {
    /// Select the maximum rather than the minimum
    pub max: bool,
}

impl OpHandler for ArgReduce {
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
        let index_type = node.output_type(0)?;
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type, |T| {
            dispatch_index!(index_type, |I| arg_reduce::<T, I>(self.max, inputs[0], out, axis),
                other => Err(InterpreterError::index_type(node, other)))
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// Softmax over the `axes` attribute
pub struct Softmax;

impl OpHandler for Softmax {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let axes = node.attr_axis_set("axes")?;
        let out = single_output(node, outputs)?;
        out.set_shape(inputs[0].shape().to_vec());
        dispatch_element!(element_type, |T| {
            reduction::softmax(
                inputs[0].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                &axes,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// CumSum: running sum along the axis held in input 1
pub struct CumSum;

impl OpHandler for CumSum {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let axis = match inputs[1].element_type() {
            DataType::I32 | DataType::I64 => as_i64_scalar(node, inputs[1])?,
            other => return Err(InterpreterError::index_type(node, other)),
        };
        let axis = normalize_axis(axis, inputs[0].shape().len())?;
        let exclusive = node.attr_bool_or("exclusive", false)?;
        let reverse = node.attr_bool_or("reverse", false)?;
        let out = single_output(node, outputs)?;
        out.set_shape(inputs[0].shape().to_vec());
        dispatch_element!(element_type, |T| {
            reduction::cumsum(
                inputs[0].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                inputs[0].shape(),
                axis,
                exclusive,
                reverse,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

fn topk_sort(node: &Node) -> Result<TopKSort> {
    match node.attr_str_or("sort", "values")? {
        "none" => Ok(TopKSort::None),
        "indices" => Ok(TopKSort::Indices),
        "values" => Ok(TopKSort::Values),
        other => Err(InterpreterError::invalid(format!(
            "{} has unknown sort mode '{}'",
            node.name, other
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_topk<T: Element, I: Element>(
    arg: &HostTensor,
    indices: &mut HostTensor,
    values: &mut HostTensor,
    axis: usize,
    k: usize,
    compute_max: bool,
    sort: TopKSort,
) -> Result<()> {
    let mut shape = arg.shape().to_vec();
    shape[axis] = k;
    indices.set_shape(shape.clone());
    values.set_shape(shape);
    reduction::topk(
        arg.as_slice::<T>()?,
        indices.as_mut_slice::<I>()?,
        values.as_mut_slice::<T>()?,
        arg.shape(),
        axis,
        k,
        compute_max,
        sort,
    )?;
    Ok(())
}

// TopK: output 0 holds indices, output 1 the values
pub struct TopK;

impl OpHandler for TopK {
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
        let axis = normalize_axis(node.attr_i64("top_k_axis")?, rank)?;
        let k = match node.attr("k") {
            Some(_) => node.attr_i64("k")?,
            None => {
                expect_inputs(node, inputs, 2)?;
                as_i64_scalar(node, inputs[1])?
            }
        };
        let k = match usize::try_from(k) {
            Ok(0) => inputs[0].shape()[axis],
            Ok(k) => k,
            Err(_) => {
                return Err(InterpreterError::invalid(format!(
                    "{} has negative k {}",
                    node.name, k
                )))
            }
        };
        let compute_max = node.attr_bool_or("compute_max", true)?;
        let sort = topk_sort(node)?;
        let index_type = node.output_type(0)?;
        let got = outputs.len();
        let [indices, values, ..] = outputs else {
            return Err(missing_outputs(node, 2, got));
        };
        dispatch_element!(element_type, |T| {
            dispatch_index!(index_type,
                |I| run_topk::<T, I>(inputs[0], indices, values, axis, k, compute_max, sort),
                other => Err(InterpreterError::index_type(node, other)))
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}
