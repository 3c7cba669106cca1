//! Refgraph core data model
//!
//! This crate holds everything the reference interpreter and its kernels
//! share: element types, partially known shapes, host tensors, compiled
//! functions, strided-slice planning and logging setup.
//!
//! ## Architecture
//!
//! - **Types**: [`DataType`], [`PartialShape`] and broadcast rules
//! - **Element**: the [`Element`] trait every kernel is generic over
//! - **Tensor**: [`HostTensor`], a typed buffer whose shape may be set late
//! - **Graph**: [`Function`], [`Node`] and [`FunctionBuilder`]
//! - **Slice plan**: normalization of numpy-style strided slices
//!
//! ## Example
//!
//! ```rust
//! use refgraph_core::{DataType, FunctionBuilder, NodeSpec};
//!
//! let mut builder = FunctionBuilder::new("add");
//! let a = builder.parameter("a", DataType::F32, [2, 3])?;
//! let b = builder.parameter("b", DataType::F32, [2, 3])?;
//! let sum = builder.add(
//!     NodeSpec::new("Add", 1)
//!         .input(a)
//!         .input(b)
//!         .output(DataType::F32, [2, 3]),
//! )?;
//! builder.result(sum)?;
//! let function = builder.build()?;
//! assert_eq!(function.parameters().len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

/// Error types for core operations
pub mod error;
pub mod element;
pub mod graph;
pub mod logging;
pub mod shape;
pub mod slice_plan;
pub mod tensor;
pub mod types;

// Re-export commonly used types
pub use element::Element;
pub use error::{CoreError, Result};
pub use graph::{
    AttributeValue, Function, FunctionBuilder, Node, NodeId, NodeInput, NodeOutput, NodeSpec,
    ValueRef,
};
pub use logging::{init_logging, LogLevel, LoggingConfig};
pub use shape::{AxisSet, AxisVector, Coordinate, CoordinateDiff, CoordinateIter, Shape, Strides};
pub use slice_plan::{make_slice_plan, SliceMasks, SlicePlan};
pub use tensor::{HostTensor, TensorData};
pub use types::{AutoBroadcast, DataType, Dimension, PartialShape};
