//! Refgraph reference interpreter
//!
//! Runs a compiled [`Function`](refgraph_core::Function) node by node on
//! host tensors, dispatching every operator to a reference kernel from
//! `refgraph-kernels`.
//!
//! ## Architecture
//!
//! - **Type table**: [`OpTypeId`] resolves a node's versioned operator
//! - **Dispatch**: element-type macros instantiate kernels per scalar type
//! - **Registry**: one [`OpHandler`] per operator, unsupported ones included
//! - **State**: [`StateStore`] keeps RNG generators between calls
//! - **Executable**: [`Executable`] runs the frozen node order with optional
//!   timing and NaN checks
//! - **Backend**: [`InterpreterBackend`] compiles functions and creates tensors
//!
//! ## Example
//!
//! ```rust
//! use refgraph_core::{DataType, FunctionBuilder, HostTensor, NodeSpec};
//! use refgraph_interpreter::InterpreterBackend;
//!
//! let mut builder = FunctionBuilder::new("add");
//! let a = builder.parameter("a", DataType::F32, [2])?;
//! let b = builder.parameter("b", DataType::F32, [2])?;
//! let sum = builder.add(
//!     NodeSpec::new("Add", 1).input(a).input(b).output(DataType::F32, [2]),
//! )?;
//! builder.result(sum)?;
//!
//! let backend = InterpreterBackend::new();
//! let mut exe = backend.compile(builder.build()?)?;
//! let mut out = [exe.create_output_tensor(0)?];
//! exe.call(
//!     &mut out,
//!     &[
//!         HostTensor::from_vec(vec![2], vec![1.0f32, 2.0])?,
//!         HostTensor::from_vec(vec![2], vec![3.0f32, 4.0])?,
//!     ],
//! )?;
//! assert_eq!(out[0].to_vec::<f32>()?, vec![4.0, 6.0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod dispatch;
/// Interpreter error types
pub mod error;
pub mod executable;
pub mod materialize;
mod ops;
pub mod perf;
pub mod registry;
pub mod shape_infer;
pub mod state;
pub mod type_id;

pub use backend::InterpreterBackend;
pub use config::ExecutableConfig;
pub use error::{InterpreterError, Result};
pub use executable::Executable;
pub use perf::{OperationStats, PerformanceCounter, PerformanceReport};
pub use registry::{ExecContext, OpHandler, OperatorRegistry};
pub use state::{NodeState, StateStore};
pub use type_id::{get_typeid, OpTypeId};
