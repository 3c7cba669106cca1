//! Error types for the core data model.

use crate::types::DataType;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by tensors, shapes and graph construction.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A shape did not satisfy the constraint of the operation.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Typed access requested a scalar type that does not match the storage.
    #[error("Element type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        /// Type requested by the caller
        expected: DataType,
        /// Type actually stored
        actual: DataType,
    },

    /// The element type has no host storage representation.
    #[error("Cannot allocate storage for element type {0}")]
    UnallocatableType(DataType),

    /// An attribute was absent from the node.
    #[error("Node '{node}' is missing attribute '{name}'")]
    MissingAttribute {
        /// Node name
        node: String,
        /// Attribute name
        name: String,
    },

    /// An attribute was present but held the wrong kind of value.
    #[error("Attribute '{name}' on node '{node}' is not {expected}")]
    AttributeType {
        /// Node name
        node: String,
        /// Attribute name
        name: String,
        /// Human-readable expected kind
        expected: &'static str,
    },

    /// The graph failed structural validation.
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// A static shape was required but the declaration is dynamic.
    #[error("Dynamic shape {0} where a static shape is required")]
    DynamicShape(String),

    /// Slice arguments could not be normalized.
    #[error("Slice plan error: {0}")]
    SlicePlan(String),
}
