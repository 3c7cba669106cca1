//! Distributed handlers. All traffic goes through the executable's
//! [`Communicator`](refgraph_kernels::Communicator).

use super::{expect_inputs, single_output};
use crate::dispatch::is_dispatchable;
use crate::error::{InterpreterError, Result};
use crate::registry::{ExecContext, OpHandler};
use refgraph_core::{DataType, HostTensor, Node};
use refgraph_kernels::ReductionType;
use tracing::trace;

fn check_type(node: &Node, element_type: DataType) -> Result<()> {
    if is_dispatchable(element_type) {
        Ok(())
    } else {
        Err(InterpreterError::element_type(node, element_type))
    }
}

// AllReduce: element-wise reduction of input 0 across every rank
pub struct AllReduce;

impl OpHandler for AllReduce {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        check_type(node, element_type)?;
        let op: ReductionType = node.attr_str_or("reduce_type", "sum")?.parse()?;
        let input = inputs[0];
        let count = input.element_count();
        let out = single_output(node, outputs)?;
        out.set_shape(input.shape().to_vec());
        ctx.communicator.all_reduce(input.data(), out.data_mut(), count, op)?;
        trace!(node = %node.name, count, ?op, "all-reduce");
        Ok(())
    }
}

// BroadcastDistributed: every rank ends with the root's input
pub struct BroadcastDistributed;

impl OpHandler for BroadcastDistributed {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        check_type(node, element_type)?;
        let root = match node.attr("root_id") {
            Some(_) => node.attr_usize("root_id")?,
            None => 0,
        };
        let input = inputs[0];
        let count = input.element_count();
        let out = single_output(node, outputs)?;
        // The root sends its own copy; other ranks overwrite theirs
        out.copy_from(input)?;
        ctx.communicator.broadcast(out.data_mut(), count, root)?;
        Ok(())
    }
}

// Send: ship input 0 to `dest_id` and pass it through
pub struct SendTo;

impl OpHandler for SendTo {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        check_type(node, element_type)?;
        let dest = node.attr_usize("dest_id")?;
        let input = inputs[0];
        ctx.communicator.send(input.data(), input.element_count(), dest)?;
        if let Some(out) = outputs.first_mut() {
            out.copy_from(input)?;
        }
        Ok(())
    }
}

// Recv: fill the output from `src_id`. The shape is the declared output
// shape, or the shape of input 0 when that is not static.
pub struct RecvFrom;

impl OpHandler for RecvFrom {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        check_type(node, element_type)?;
        let src = node.attr_usize("src_id")?;
        let shape = match (node.output_shape(0), inputs.first()) {
            (Ok(shape), _) => shape,
            (Err(_), Some(input)) => input.shape().to_vec(),
            (Err(e), None) => return Err(e.into()),
        };
        let out = single_output(node, outputs)?;
        out.set_shape(shape);
        let count = out.element_count();
        ctx.communicator.recv(out.data_mut(), count, src)?;
        Ok(())
    }
}
