//! Stateful random-number handlers.
//!
//! Generators live in the executable's [`StateStore`](crate::state::StateStore)
//! under the node id, so each call continues the stream of the previous one.

use super::{expect_inputs, single_output};
use crate::dispatch::{dispatch_element, dispatch_real};
use crate::error::{InterpreterError, Result};
use crate::materialize::{as_bool_scalar, as_f64_scalar, as_i64_scalar, as_shape};
use crate::registry::{ExecContext, OpHandler};
use crate::state::NodeState;
use refgraph_core::{DataType, HostTensor, Node};
use refgraph_kernels::{random, BernoulliRngState, UniformRngState};

fn state_mismatch(node: &Node) -> InterpreterError {
    InterpreterError::invalid(format!("{} holds state of the wrong kind", node.name))
}

fn seed_attr(node: &Node) -> Result<Option<u64>> {
    match node.attr("seed") {
        Some(_) => Ok(Some(node.attr_i64("seed")? as u64)),
        None => Ok(None),
    }
}

/// GenerateMask: a Bernoulli mask shaped like input 0.
///
/// Input 0 is the training flag, read from its first element. Input 2
/// (`use_seed`, falling back to the attribute) decides the seed of the
/// node's persistent generator the first time it runs. When the flag is set
/// and inputs 3 and 4 are present they give a per-call seed and probability,
/// and the persistent generator is left untouched.
pub struct GenerateMask;

impl OpHandler for GenerateMask {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let training = as_bool_scalar(node, inputs[0])?;
        let use_seed = match inputs.get(2) {
            Some(flag) => as_bool_scalar(node, flag)?,
            None => node.attr_bool_or("use_seed", false)?,
        };
        let state = ctx.states.get_or_create(node.id, || {
            let seed = if use_seed { seed_attr(node)?.unwrap_or(0) } else { 0 };
            let probability = node.attr_f64("probability")?;
            Ok(NodeState::Bernoulli(BernoulliRngState::new(seed, probability)?))
        })?;
        let state = state.as_bernoulli_mut().ok_or_else(|| state_mismatch(node))?;

        let out = single_output(node, outputs)?;
        out.set_shape(inputs[0].shape().to_vec());

        if let (true, Some(seed), Some(probability)) = (use_seed, inputs.get(3), inputs.get(4)) {
            let seed = as_i64_scalar(node, seed)? as u64;
            let probability = as_f64_scalar(node, probability)?;
            return dispatch_element!(element_type, |T| {
                random::generate_mask_no_state(out.as_mut_slice::<T>()?, training, seed, probability)?;
                Ok(())
            }, other => Err(InterpreterError::element_type(node, other)));
        }

        dispatch_element!(element_type, |T| {
            random::generate_mask(out.as_mut_slice::<T>()?, state, training);
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

/// RandomUniform: inputs are (min, max, shape, use_fixed_seed).
///
/// With `use_fixed_seed` set every call reseeds from the `fixed_seed`
/// attribute and produces the same values. Otherwise the persistent
/// generator, seeded from the optional `seed` attribute, advances.
pub struct RandomUniform;

impl OpHandler for RandomUniform {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 4)?;
        let min = as_f64_scalar(node, inputs[0])?;
        let max = as_f64_scalar(node, inputs[1])?;
        let shape = match node.output_shape(0) {
            Ok(shape) => shape,
            Err(_) => as_shape(node, inputs[2])?,
        };
        let use_fixed_seed = as_bool_scalar(node, inputs[3])?;
        let out = single_output(node, outputs)?;
        out.set_shape(shape);

        if use_fixed_seed {
            let seed = node.attr_i64("fixed_seed")? as u64;
            return dispatch_real!(element_type, |T| {
                random::random_uniform_with_fixed_seed(out.as_mut_slice::<T>()?, min, max, seed)?;
                Ok(())
            }, other => Err(InterpreterError::element_type(node, other)));
        }

        let state = ctx
            .states
            .get_or_create(node.id, || Ok(NodeState::Uniform(UniformRngState::new(seed_attr(node)?))))?;
        let state = state.as_uniform_mut().ok_or_else(|| state_mismatch(node))?;
        dispatch_real!(element_type, |T| {
            random::random_uniform(out.as_mut_slice::<T>()?, min, max, state)?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}
