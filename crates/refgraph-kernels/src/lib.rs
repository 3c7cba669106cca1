//! Refgraph reference kernels
//!
//! Plain, element-generic implementations of every numeric operation the
//! interpreter can run. Kernels work on flat slices plus explicit shapes,
//! never on graph nodes, so each one can be tested on its own.
//!
//! ## Modules
//!
//! - **unary / binary**: element-wise math with numpy and pdpd broadcasting
//! - **reduction**: sums, extrema, arg-reductions, softmax, cumsum, top-k
//! - **movement**: reshape, slice, concat, pad, broadcast and friends
//! - **indexing**: gather, scatter and embedding
//! - **linalg / convolution / pooling / normalization**: the NN kernels
//! - **quantization**: quantize, dequantize and requantization
//! - **random**: Bernoulli masks and uniform fills with persistent state
//! - **collective**: the [`Communicator`] seam for distributed ops
//!
//! ## Example
//!
//! ```rust
//! use refgraph_kernels::reduction;
//! use refgraph_core::AxisSet;
//!
//! let axes: AxisSet = [1].into_iter().collect();
//! let mut out = [0.0f32; 2];
//! reduction::sum(&[1.0, 2.0, 3.0, 4.0], &mut out, &[2, 2], &axes)?;
//! assert_eq!(out, [3.0, 7.0]);
//! # Ok::<(), refgraph_kernels::KernelError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod binary;
pub mod collective;
pub mod convolution;
/// Kernel error types
pub mod error;
pub mod indexing;
pub mod linalg;
pub mod movement;
pub mod normalization;
pub mod pooling;
pub mod quantization;
pub mod random;
pub mod reduction;
pub mod unary;

pub use binary::{ArithmeticOp, ComparisonOp};
pub use collective::{
    Communicator, InProcessCommunicator, InProcessGroup, LocalCommunicator, ReductionType,
};
pub use convolution::ConvParams;
pub use error::{KernelError, Result};
pub use movement::PadMode;
pub use pooling::PoolParams;
pub use quantization::{QuantParams, RoundMode};
pub use random::{BernoulliRngState, UniformRngState};
pub use reduction::TopKSort;
