// Operator handlers, grouped by kernel family.
//
// Each handler resolves its output shapes, sets them on the output buffers
// and then runs the element-type specialized kernel.

pub mod collective;
pub mod elementwise;
pub mod indexing;
pub mod movement;
pub mod nn;
pub mod quantized;
pub mod random;
pub mod reduction;
pub mod unsupported;

use crate::error::{InterpreterError, Result};
use refgraph_core::{AutoBroadcast, HostTensor, Node};

/// Fail unless at least `count` inputs were supplied.
pub(crate) fn expect_inputs(node: &Node, inputs: &[&HostTensor], count: usize) -> Result<()> {
    if inputs.len() < count {
        return Err(InterpreterError::invalid(format!(
            "{} expects {} inputs, got {}",
            node.op_type,
            count,
            inputs.len()
        )));
    }
    Ok(())
}

/// The single output buffer of `node`.
pub(crate) fn single_output<'a>(
    node: &Node,
    outputs: &'a mut [HostTensor],
) -> Result<&'a mut HostTensor> {
    match outputs {
        [out, ..] => Ok(out),
        [] => Err(InterpreterError::invalid(format!(
            "{} expects 1 output, got 0",
            node.op_type
        ))),
    }
}

/// Error for a handler that received fewer outputs than it writes.
pub(crate) fn missing_outputs(node: &Node, count: usize, got: usize) -> InterpreterError {
    InterpreterError::invalid(format!(
        "{} expects {} outputs, got {}",
        node.op_type, count, got
    ))
}

/// Broadcast rule from the `auto_broadcast` and `pdpd_axis` attributes.
pub(crate) fn auto_broadcast(node: &Node) -> Result<AutoBroadcast> {
    match node.attr_str_or("auto_broadcast", "numpy")? {
        "none" => Ok(AutoBroadcast::None),
        "numpy" => Ok(AutoBroadcast::Numpy),
        "pdpd" => Ok(AutoBroadcast::Pdpd {
            axis: node.attr_i64_or("pdpd_axis", -1)?,
        }),
        other => Err(InterpreterError::invalid(format!(
            "{} has unknown auto_broadcast '{}'",
            node.name, other
        ))),
    }
}
