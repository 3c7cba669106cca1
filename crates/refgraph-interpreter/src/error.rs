use refgraph_core::{CoreError, DataType, Node};
use refgraph_kernels::KernelError;
use thiserror::Error;

/// Result type for interpreter operations.
pub type Result<T> = std::result::Result<T, InterpreterError>;

/// Errors raised while compiling or executing a function.
#[derive(Error, Debug)]
pub enum InterpreterError {
    /// The node's versioned operator has no handler.
    #[error("Unsupported op 'v{version}::{name}'")]
    UnsupportedOperator {
        /// Operator name
        name: String,
        /// Operator set version
        version: u32,
    },

    /// The operator has no instantiation for the element type.
    #[error("Unsupported element type {element_type} for op {op}")]
    UnsupportedElementType {
        /// Versioned operator name
        op: String,
        /// Offending element type
        element_type: DataType,
    },

    /// An index input holds a type other than i32 or i64.
    #[error("Invalid index element type {element_type} for op {op}")]
    InvalidIndexType {
        /// Versioned operator name
        op: String,
        /// Offending element type
        element_type: DataType,
    },

    /// An axis or shape input could not be read as integers.
    #[error("Malformed auxiliary input of type {element_type} for op {op}")]
    MalformedAuxiliaryInput {
        /// Versioned operator name
        op: String,
        /// Offending element type
        element_type: DataType,
    },

    /// The NaN check found an invalid value in a node output.
    #[error("NaN detected in output {output} of node '{node}'")]
    NanDetected {
        /// Node name
        node: String,
        /// Output index
        output: usize,
    },

    /// Arguments to a call or a handler were inconsistent.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Error from the core data model.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from a numeric kernel.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// I/O failure while saving or loading.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InterpreterError {
    /// Unsupported-operator error naming `node`'s operator.
    pub fn unsupported(node: &Node) -> Self {
        InterpreterError::UnsupportedOperator {
            name: node.op_type.clone(),
            version: node.version,
        }
    }

    pub(crate) fn element_type(node: &Node, element_type: DataType) -> Self {
        InterpreterError::UnsupportedElementType {
            op: node.versioned_type(),
            element_type,
        }
    }

    pub(crate) fn index_type(node: &Node, element_type: DataType) -> Self {
        InterpreterError::InvalidIndexType {
            op: node.versioned_type(),
            element_type,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        InterpreterError::InvalidArguments(msg.into())
    }
}
