//! Linear algebra, convolution, pooling and normalization handlers.

use super::{expect_inputs, missing_outputs, single_output};
use crate::dispatch::{dispatch_element, dispatch_real};
use crate::error::{InterpreterError, Result};
use crate::materialize::as_axis_set;
use crate::registry::{ExecContext, OpHandler};
use refgraph_core::{AxisSet, DataType, Element, HostTensor, Node};
use refgraph_kernels::{convolution, linalg, normalization, pooling, ConvParams, PoolParams};

/// Window geometry from a convolution node's attributes. Missing
/// attributes default to unit strides and no padding.
pub(crate) fn conv_params(node: &Node, data_shape: &[usize]) -> Result<ConvParams> {
    let rank = data_shape.len().saturating_sub(2);
    let unit = ConvParams::unit(rank);
    let ints_or = |name: &str, default: Vec<i64>| -> Result<Vec<i64>> {
        let values = node.attr_ints_or_empty(name)?;
        Ok(if values.is_empty() { default } else { values })
    };
    Ok(ConvParams {
        strides: node.attr_usizes_or("window_movement_strides", unit.strides)?,
        dilations: node.attr_usizes_or("window_dilation_strides", unit.dilations)?,
        padding_below: ints_or("padding_below", unit.padding_below)?,
        padding_above: ints_or("padding_above", unit.padding_above)?,
        data_dilation: node.attr_usizes_or("data_dilation_strides", unit.data_dilation)?,
    })
}

fn pool_params(node: &Node, data_shape: &[usize]) -> Result<PoolParams> {
    let rank = data_shape.len().saturating_sub(2);
    Ok(PoolParams {
        window_shape: node.attr_usizes("window_shape")?,
        strides: node.attr_usizes_or("window_movement_strides", vec![1; rank])?,
        padding_below: node.attr_usizes_or("padding_below", vec![0; rank])?,
        padding_above: node.attr_usizes_or("padding_above", vec![0; rank])?,
    })
}

// Dot: contract the last `reduction_axes_count` axes of input 0 with the
// leading axes of input 1
pub struct Dot;

impl OpHandler for Dot {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let (a, b) = (inputs[0], inputs[1]);
        let count = node.attr_usize("reduction_axes_count")?;
        let out = single_output(node, outputs)?;
        out.set_shape(linalg::dot_shape(a.shape(), b.shape(), count)?);
        dispatch_element!(element_type, |T| {
            linalg::dot(
                a.as_slice::<T>()?,
                b.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                a.shape(),
                b.shape(),
                count,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

pub struct MatMul;

impl OpHandler for MatMul {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let (a, b) = (inputs[0], inputs[1]);
        let transpose_a = node.attr_bool_or("transpose_a", false)?;
        let transpose_b = node.attr_bool_or("transpose_b", false)?;
        let out = single_output(node, outputs)?;
        out.set_shape(linalg::matmul_shape(a.shape(), b.shape(), transpose_a, transpose_b)?);
        dispatch_element!(element_type, |T| {
            linalg::matmul(
                a.as_slice::<T>()?,
                b.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                a.shape(),
                b.shape(),
                transpose_a,
                transpose_b,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

pub struct BatchMatMul;

impl OpHandler for BatchMatMul {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let (a, b) = (inputs[0], inputs[1]);
        let out = single_output(node, outputs)?;
        out.set_shape(linalg::matmul_shape(a.shape(), b.shape(), false, false)?);
        dispatch_element!(element_type, |T| {
            linalg::batch_matmul(
                a.as_slice::<T>()?,
                b.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                a.shape(),
                b.shape(),
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

pub struct Convolution;

impl OpHandler for Convolution {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let (data, filters) = (inputs[0], inputs[1]);
        let params = conv_params(node, data.shape())?;
        let out_shape = convolution::conv_output_shape(data.shape(), filters.shape(), &params)?;
        let out = single_output(node, outputs)?;
        out.set_shape(out_shape.clone());
        dispatch_element!(element_type, |T| {
            convolution::convolution(
                data.as_slice::<T>()?,
                filters.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                data.shape(),
                filters.shape(),
                &out_shape,
                &params,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// ConvolutionBackpropData: (filters, delta) -> gradient w.r.t. the data batch
pub struct ConvolutionBackpropData;

impl OpHandler for ConvolutionBackpropData {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let (filters, delta) = (inputs[0], inputs[1]);
        let data_shape = node.attr_usizes("data_batch_shape")?;
        let params = conv_params(node, &data_shape)?;
        let out = single_output(node, outputs)?;
        out.set_shape(data_shape.clone());
        dispatch_element!(element_type, |T| {
            convolution::convolution_backprop_data(
                filters.as_slice::<T>()?,
                delta.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                filters.shape(),
                delta.shape(),
                &data_shape,
                &params,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// ConvolutionBackpropFilters: (data, delta) -> gradient w.r.t. the filters
pub struct ConvolutionBackpropFilters;

impl OpHandler for ConvolutionBackpropFilters {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let (data, delta) = (inputs[0], inputs[1]);
        let filters_shape = node.attr_usizes("filters_shape")?;
        let params = conv_params(node, data.shape())?;
        let out = single_output(node, outputs)?;
        out.set_shape(filters_shape.clone());
        dispatch_element!(element_type, |T| {
            convolution::convolution_backprop_filters(
                data.as_slice::<T>()?,
                delta.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                data.shape(),
                delta.shape(),
                &filters_shape,
                &params,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

pub struct AvgPool;

impl OpHandler for AvgPool {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let arg = inputs[0];
        let params = pool_params(node, arg.shape())?;
        let include_padding = node.attr_bool_or("include_padding", false)?;
        let out_shape = pooling::pool_output_shape(arg.shape(), &params)?;
        let out = single_output(node, outputs)?;
        out.set_shape(out_shape.clone());
        dispatch_element!(element_type, |T| {
            pooling::avg_pool(
                arg.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                arg.shape(),
                &out_shape,
                &params,
                include_padding,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// AvgPoolBackprop: the delta is the last input and the forward shape is
// the declared output shape
pub struct AvgPoolBackprop;

impl OpHandler for AvgPoolBackprop {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        let delta = match inputs {
            [.., delta] => *delta,
            [] => return Err(InterpreterError::invalid("AvgPoolBackprop expects a delta input")),
        };
        let forward_shape = node.output_shape(0)?;
        let params = pool_params(node, &forward_shape)?;
        let include_padding = node.attr_bool_or("include_padding", false)?;
        let out = single_output(node, outputs)?;
        out.set_shape(forward_shape.clone());
        dispatch_element!(element_type, |T| {
            pooling::avg_pool_backprop(
                delta.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                delta.shape(),
                &forward_shape,
                &params,
                include_padding,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

pub struct MaxPool;

impl OpHandler for MaxPool {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let arg = inputs[0];
        let params = pool_params(node, arg.shape())?;
        let out_shape = pooling::pool_output_shape(arg.shape(), &params)?;
        let out = single_output(node, outputs)?;
        out.set_shape(out_shape.clone());
        dispatch_element!(element_type, |T| {
            pooling::max_pool(
                arg.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                arg.shape(),
                &out_shape,
                &params,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// MaxPoolBackprop: (forward input, delta); the delta is routed to the
// position of each window's maximum
pub struct MaxPoolBackprop;

impl OpHandler for MaxPoolBackprop {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let (forward, delta) = (inputs[0], inputs[1]);
        let params = pool_params(node, forward.shape())?;
        let out = single_output(node, outputs)?;
        out.set_shape(forward.shape().to_vec());
        dispatch_element!(element_type, |T| {
            pooling::max_pool_backprop(
                forward.as_slice::<T>()?,
                delta.as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                forward.shape(),
                delta.shape(),
                &params,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

fn channel_shape(node: &Node, shape: &[usize]) -> Result<Vec<usize>> {
    match shape.get(1) {
        Some(&c) => Ok(vec![c]),
        None => Err(InterpreterError::invalid(format!(
            "{} needs an input of rank >= 2, got {:?}",
            node.name, shape
        ))),
    }
}

// BatchNormTraining: (gamma, beta, input) -> (normalized, mean, variance)
pub struct BatchNormTraining;

impl BatchNormTraining {
    fn run<T: Element>(
        eps: f64,
        inputs: &[&HostTensor],
        outputs: &mut [HostTensor],
    ) -> Result<()> {
        let [out, mean, variance, ..] = outputs else {
            return Err(InterpreterError::invalid("BatchNormTraining expects 3 outputs"));
        };
        let shape = inputs[2].shape();
        normalization::batch_norm_training(
            eps,
            inputs[0].as_slice::<T>()?,
            inputs[1].as_slice::<T>()?,
            inputs[2].as_slice::<T>()?,
            out.as_mut_slice::<T>()?,
            mean.as_mut_slice::<T>()?,
            variance.as_mut_slice::<T>()?,
            shape,
        )?;
        Ok(())
    }
}

impl OpHandler for BatchNormTraining {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 3)?;
        if outputs.len() < 3 {
            return Err(missing_outputs(node, 3, outputs.len()));
        }
        let eps = node.attr_f64("epsilon")?;
        let shape = inputs[2].shape();
        let channels = channel_shape(node, shape)?;
        outputs[0].set_shape(shape.to_vec());
        outputs[1].set_shape(channels.clone());
        outputs[2].set_shape(channels);
        dispatch_real!(element_type, |T| Self::run::<T>(eps, inputs, outputs),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// BatchNormInference: (gamma, beta, input, mean, variance)
pub struct BatchNormInference;

impl OpHandler for BatchNormInference {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 5)?;
        let eps = node.attr_f64("epsilon")?;
        let shape = inputs[2].shape();
        let out = single_output(node, outputs)?;
        out.set_shape(shape.to_vec());
        dispatch_real!(element_type, |T| {
            normalization::batch_norm_inference(
                eps,
                inputs[0].as_slice::<T>()?,
                inputs[1].as_slice::<T>()?,
                inputs[2].as_slice::<T>()?,
                inputs[3].as_slice::<T>()?,
                inputs[4].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
                shape,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

// BatchNormTrainingBackprop: (gamma, beta, input, mean, variance, delta)
// -> (d_input, d_gamma, d_beta)
pub struct BatchNormTrainingBackprop;

impl BatchNormTrainingBackprop {
    fn run<T: Element>(
        eps: f64,
        inputs: &[&HostTensor],
        outputs: &mut [HostTensor],
    ) -> Result<()> {
        let [d_input, d_gamma, d_beta, ..] = outputs else {
            return Err(InterpreterError::invalid("BatchNormTrainingBackprop expects 3 outputs"));
        };
        normalization::batch_norm_backprop(
            eps,
            inputs[0].as_slice::<T>()?,
            inputs[1].as_slice::<T>()?,
            inputs[2].as_slice::<T>()?,
            inputs[3].as_slice::<T>()?,
            inputs[4].as_slice::<T>()?,
            inputs[5].as_slice::<T>()?,
            d_input.as_mut_slice::<T>()?,
            d_gamma.as_mut_slice::<T>()?,
            d_beta.as_mut_slice::<T>()?,
            inputs[2].shape(),
        )?;
        Ok(())
    }
}

impl OpHandler for BatchNormTrainingBackprop {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 6)?;
        if outputs.len() < 3 {
            return Err(missing_outputs(node, 3, outputs.len()));
        }
        let eps = node.attr_f64("epsilon")?;
        let shape = inputs[2].shape();
        let channels = channel_shape(node, shape)?;
        outputs[0].set_shape(shape.to_vec());
        outputs[1].set_shape(channels.clone());
        outputs[2].set_shape(channels);
        dispatch_real!(element_type, |T| Self::run::<T>(eps, inputs, outputs),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// LRN: axes come from input 1 when present, else the `axes` attribute
pub struct Lrn;

impl OpHandler for Lrn {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let arg = inputs[0];
        let axes = match inputs.get(1) {
            Some(axes) => as_axis_set(node, axes, arg.shape().len())?,
            None if node.attr("axes").is_some() => node.attr_axis_set("axes")?,
            None => AxisSet::from([1]),
        };
        let alpha = node.attr_f64("alpha")?;
        let beta = node.attr_f64("beta")?;
        let bias = node.attr_f64("bias")?;
        let size = node.attr_usize("nsize")?;
        let out = single_output(node, outputs)?;
        out.set_shape(arg.shape().to_vec());
        dispatch_real!(element_type, |T| {
            normalization::lrn(
                arg.as_slice::<T>()?,
                &axes,
                out.as_mut_slice::<T>()?,
                arg.shape(),
                alpha,
                beta,
                bias,
                size,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}
