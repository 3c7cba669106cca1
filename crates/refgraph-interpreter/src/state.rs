//! Per-node runtime state.
//!
//! Random-number operators keep their generator between calls so repeated
//! executions continue one stream. States are created lazily from the
//! node's static configuration and live as long as the owning executable;
//! they are never serialized.

use crate::error::Result;
use refgraph_core::NodeId;
use refgraph_kernels::{BernoulliRngState, UniformRngState};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Mutable state attached to one node.
#[derive(Debug, Clone)]
pub enum NodeState {
    /// Mask generator
    Bernoulli(BernoulliRngState),
    /// Uniform generator
    Uniform(UniformRngState),
}

impl NodeState {
    /// The mask generator, if this is one.
    pub fn as_bernoulli_mut(&mut self) -> Option<&mut BernoulliRngState> {
        match self {
            NodeState::Bernoulli(state) => Some(state),
            _ => None,
        }
    }

    /// The uniform generator, if this is one.
    pub fn as_uniform_mut(&mut self) -> Option<&mut UniformRngState> {
        match self {
            NodeState::Uniform(state) => Some(state),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            NodeState::Bernoulli(_) => "bernoulli",
            NodeState::Uniform(_) => "uniform",
        }
    }
}

/// States keyed by node id.
#[derive(Debug, Default)]
pub struct StateStore {
    states: HashMap<NodeId, Box<NodeState>>,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The state of `node`, built by `factory` on first use.
    pub fn get_or_create<F>(&mut self, node: NodeId, factory: F) -> Result<&mut NodeState>
    where
        F: FnOnce() -> Result<NodeState>,
    {
        match self.states.entry(node) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_mut()),
            Entry::Vacant(entry) => {
                let state = factory()?;
                debug!(node, kind = state.kind(), "created node state");
                Ok(entry.insert(Box::new(state)).as_mut())
            }
        }
    }

    /// Existing state of `node`.
    pub fn get(&self, node: NodeId) -> Option<&NodeState> {
        self.states.get(&node).map(|s| s.as_ref())
    }

    /// Whether `node` has state.
    pub fn contains(&self, node: NodeId) -> bool {
        self.states.contains_key(&node)
    }

    /// Number of nodes with state.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no node has state yet.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop every state; the next call starts again from the declared seeds.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
