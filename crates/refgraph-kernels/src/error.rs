//! Error types for numeric kernels.

use refgraph_core::CoreError;
use thiserror::Error;

/// Result type for kernel calls.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors raised while executing a kernel.
#[derive(Error, Debug)]
pub enum KernelError {
    /// An index read from a tensor fell outside the indexed axis.
    #[error("{what} index {index} is out of range for extent {bound}")]
    IndexOutOfRange {
        /// What was being indexed
        what: &'static str,
        /// Offending index
        index: i64,
        /// Extent of the indexed axis
        bound: usize,
    },

    /// Integer division or remainder by zero.
    #[error("Integer division by zero")]
    DivisionByZero,

    /// Arguments were inconsistent with each other.
    #[error("Invalid kernel argument: {0}")]
    InvalidArgument(String),

    /// The distributed transport failed.
    #[error("Communication error: {0}")]
    Communication(String),

    /// Shape or storage error from the core model.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl KernelError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        KernelError::InvalidArgument(msg.into())
    }
}
