//! Quantize, dequantize and the integer dot and convolution handlers.

use super::nn::conv_params;
use super::{expect_inputs, single_output};
use crate::dispatch::{dispatch_quantized, dispatch_real, dispatch_types};
use crate::error::{InterpreterError, Result};
use crate::materialize::{as_f64_scalar, as_i64_scalar};
use crate::registry::{ExecContext, OpHandler};
use refgraph_core::{DataType, Element, HostTensor, Node};
use refgraph_kernels::{convolution, linalg, quantization, QuantParams, RoundMode};

fn run_quantize<R: Element, Q: Element>(
    inputs: &[&HostTensor],
    out: &mut HostTensor,
    node: &Node,
    round_mode: RoundMode,
) -> Result<()> {
    let (input, scale, zero_point) = (inputs[0], inputs[1], inputs[2]);
    let axes = node.attr_axis_set("axes")?;
    out.set_shape(input.shape().to_vec());
    quantization::quantize(
        input.as_slice::<R>()?,
        scale.as_slice::<R>()?,
        zero_point.as_slice::<Q>()?,
        out.as_mut_slice::<Q>()?,
        input.shape(),
        &axes,
        round_mode,
    )?;
    Ok(())
}

// Quantize: (input, scale, zero_point), real input and integer output
pub struct Quantize;

impl OpHandler for Quantize {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 3)?;
        let round_mode: RoundMode = match node.attr("round_mode") {
            Some(_) => node.attr_str("round_mode")?.parse()?,
            None => RoundMode::default(),
        };
        let out = single_output(node, outputs)?;
        let quantized = out.element_type();
        dispatch_real!(element_type, |R| {
            dispatch_types!(quantized, [U8 => u8, I8 => i8, I32 => i32],
                |Q| run_quantize::<R, Q>(inputs, out, node, round_mode),
                other => Err(InterpreterError::element_type(node, other)))
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

fn run_dequantize<Q: Element, R: Element>(
    inputs: &[&HostTensor],
    out: &mut HostTensor,
    node: &Node,
) -> Result<()> {
    let (input, scale, zero_point) = (inputs[0], inputs[1], inputs[2]);
    let axes = node.attr_axis_set("axes")?;
    out.set_shape(input.shape().to_vec());
    quantization::dequantize(
        input.as_slice::<Q>()?,
        scale.as_slice::<R>()?,
        zero_point.as_slice::<Q>()?,
        out.as_mut_slice::<R>()?,
        input.shape(),
        &axes,
    )?;
    Ok(())
}

// Dequantize: (input, scale, zero_point), integer input and real output
pub struct Dequantize;

impl OpHandler for Dequantize {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 3)?;
        let out = single_output(node, outputs)?;
        let real = out.element_type();
        dispatch_types!(element_type, [U8 => u8, I8 => i8, I32 => i32], |Q| {
            dispatch_real!(real, |R| run_dequantize::<Q, R>(inputs, out, node),
                other => Err(InterpreterError::element_type(node, other)))
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

/// Scales and zero points carried in inputs 2..8 of the quantized dot and
/// convolution operators.
fn quant_params(node: &Node, inputs: &[&HostTensor]) -> Result<QuantParams> {
    expect_inputs(node, inputs, 8)?;
    Ok(QuantParams {
        input_scale: as_f64_scalar(node, inputs[2])?,
        input_zero_point: as_i64_scalar(node, inputs[3])?,
        filter_scale: as_f64_scalar(node, inputs[4])?,
        filter_zero_point: as_i64_scalar(node, inputs[5])?,
        output_scale: as_f64_scalar(node, inputs[6])?,
        output_zero_point: as_i64_scalar(node, inputs[7])?,
    })
}

fn quantized_types(inputs: &[&HostTensor], out: &HostTensor) -> (DataType, DataType, DataType) {
    (inputs[0].element_type(), inputs[1].element_type(), out.element_type())
}

fn unsupported_triple(
    node: &Node,
    (input, filter, output): (DataType, DataType, DataType),
) -> InterpreterError {
    // Report the first type that is outside every supported combination
    let element_type = match (input, filter) {
        (DataType::U8, DataType::U8 | DataType::I8) => output,
        (DataType::U8, _) => filter,
        _ => input,
    };
    InterpreterError::element_type(node, element_type)
}

// QuantizedConvolution: integer convolution with requantized output
pub struct QuantizedConvolution;

impl OpHandler for QuantizedConvolution {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        _element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        let quant = quant_params(node, inputs)?;
        let (data, filters) = (inputs[0], inputs[1]);
        let params = conv_params(node, data.shape())?;
        let out_shape = convolution::conv_output_shape(data.shape(), filters.shape(), &params)?;
        let out = single_output(node, outputs)?;
        out.set_shape(out_shape.clone());
        let types = quantized_types(inputs, out);
        dispatch_quantized!(types, |I, F, O| {
            convolution::quantized_convolution(
                data.as_slice::<I>()?,
                filters.as_slice::<F>()?,
                out.as_mut_slice::<O>()?,
                data.shape(),
                filters.shape(),
                &out_shape,
                &params,
                &quant,
            )?;
            Ok(())
        }, other => Err(unsupported_triple(node, other)))
    }
}

// QuantizedDot and the fused bias/relu variants lowered onto it. The
// reduction count defaults to one axis and the output shape is declared.
pub struct QuantizedDot;

impl OpHandler for QuantizedDot {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        _element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        let quant = quant_params(node, inputs)?;
        let (a, b) = (inputs[0], inputs[1]);
        let count = match node.attr("reduction_axes_count") {
            Some(_) => node.attr_usize("reduction_axes_count")?,
            None => 1,
        };
        let out_shape = node.output_shape(0)?;
        let out = single_output(node, outputs)?;
        out.set_shape(out_shape);
        let types = quantized_types(inputs, out);
        dispatch_quantized!(types, |I, F, O| {
            linalg::quantized_dot(
                a.as_slice::<I>()?,
                b.as_slice::<F>()?,
                out.as_mut_slice::<O>()?,
                a.shape(),
                b.shape(),
                count,
                &quant,
            )?;
            Ok(())
        }, other => Err(unsupported_triple(node, other)))
    }
}
