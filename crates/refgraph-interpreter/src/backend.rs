//! Entry point that turns functions into executables.

use crate::config::ExecutableConfig;
use crate::error::Result;
use crate::executable::Executable;
use crate::registry::OperatorRegistry;
use crate::type_id::get_typeid;
use refgraph_core::{DataType, Function, HostTensor, Node};
use refgraph_kernels::{Communicator, LocalCommunicator};
use std::sync::Arc;
use tracing::debug;

/// The reference interpreter backend.
///
/// Holds one operator registry shared by every executable it compiles, the
/// communicator handed to distributed operators and the default
/// configuration for new executables.
#[derive(Clone)]
pub struct InterpreterBackend {
    registry: Arc<OperatorRegistry>,
    communicator: Arc<dyn Communicator>,
    config: ExecutableConfig,
}

impl InterpreterBackend {
    /// Backend with the built-in handlers and a single-rank communicator.
    pub fn new() -> Self {
        Self::with_config(ExecutableConfig::default())
    }

    /// Backend whose executables start from `config`.
    pub fn with_config(config: ExecutableConfig) -> Self {
        Self {
            registry: Arc::new(OperatorRegistry::new()),
            communicator: Arc::new(LocalCommunicator),
            config,
        }
    }

    /// Route distributed operators through `communicator`.
    pub fn with_communicator(mut self, communicator: Arc<dyn Communicator>) -> Self {
        self.communicator = communicator;
        self
    }

    /// Reject the named operators in every subsequent compile.
    pub fn set_unsupported_ops<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = std::mem::take(&mut self.config).with_unsupported_ops(names);
    }

    /// Configuration applied to new executables.
    pub fn config(&self) -> &ExecutableConfig {
        &self.config
    }

    /// Compile `function` into an executable.
    pub fn compile(&self, function: Function) -> Result<Executable> {
        debug!(function = function.name(), "compiling");
        Executable::new(
            function,
            Arc::clone(&self.registry),
            Arc::clone(&self.communicator),
            self.config.clone(),
        )
    }

    /// Whether `node` would run: it has a kernel and is not denied.
    pub fn is_supported(&self, node: &Node) -> bool {
        !self.config.denies(&node.op_type) && self.registry.is_supported(get_typeid(node))
    }

    /// Zero-filled host tensor.
    pub fn create_tensor(&self, element_type: DataType, shape: Vec<usize>) -> Result<HostTensor> {
        Ok(HostTensor::new(element_type, shape)?)
    }
}

impl Default for InterpreterBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterpreterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterBackend")
            .field("rank", &self.communicator.rank())
            .field("size", &self.communicator.size())
            .field("config", &self.config)
            .finish()
    }
}
