//! A compiled function ready to run.
//!
//! An [`Executable`] owns the frozen node order, the resolved operator
//! identity and working element type of every node, the per-node state of
//! its stateful operators and its performance counters. Callers own the
//! input and output buffers; nothing is retained between calls except the
//! node states and counters.

use crate::config::ExecutableConfig;
use crate::dispatch::working_type;
use crate::error::{InterpreterError, Result};
use crate::perf::{NodeTimer, PerformanceCounter, PerformanceReport};
use crate::registry::{ExecContext, OperatorRegistry};
use crate::state::StateStore;
use crate::type_id::{get_typeid, OpTypeId};
use refgraph_core::{DataType, Function, HostTensor, Node, NodeId, ValueRef};
use refgraph_kernels::{Communicator, LocalCommunicator};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// One node of the execution order with everything resolved at compile time.
#[derive(Debug, Clone)]
struct Step {
    node: NodeId,
    type_id: OpTypeId,
    element_type: DataType,
    /// Values whose last consumer is this node
    release: Vec<ValueRef>,
}

/// A function compiled for the reference interpreter.
pub struct Executable {
    function: Arc<Function>,
    steps: Vec<Step>,
    registry: Arc<OperatorRegistry>,
    communicator: Arc<dyn Communicator>,
    config: ExecutableConfig,
    states: StateStore,
    timers: Vec<NodeTimer>,
    result_slots: HashMap<NodeId, usize>,
}

impl Executable {
    /// Compile `function` against `registry`.
    ///
    /// Fails if the function is malformed or contains an operator on the
    /// configuration's deny list. Operators without a kernel compile and
    /// fail when they are reached during a call.
    pub fn new(
        function: Function,
        registry: Arc<OperatorRegistry>,
        communicator: Arc<dyn Communicator>,
        config: ExecutableConfig,
    ) -> Result<Self> {
        function.validate()?;
        let order = function.topological_order()?;

        let mut last_use: HashMap<ValueRef, usize> = HashMap::new();
        for (position, &id) in order.iter().enumerate() {
            for input in &function.nodes()[id].inputs {
                last_use.insert(input.source, position);
            }
        }

        let mut steps = Vec::with_capacity(order.len());
        for &id in &order {
            let node = &function.nodes()[id];
            if config.denies(&node.op_type) {
                return Err(InterpreterError::unsupported(node));
            }
            let type_id = get_typeid(node);
            steps.push(Step {
                node: id,
                type_id,
                element_type: working_type(type_id, node)?,
                release: Vec::new(),
            });
        }
        for (value, position) in last_use {
            steps[position].release.push(value);
        }

        let result_slots = function
            .results()
            .iter()
            .enumerate()
            .map(|(slot, &id)| (id, slot))
            .collect();

        info!(
            function = function.name(),
            nodes = steps.len(),
            parameters = function.parameters().len(),
            results = function.results().len(),
            "compiled executable"
        );

        Ok(Self {
            timers: vec![NodeTimer::default(); function.nodes().len()],
            function: Arc::new(function),
            steps,
            registry,
            communicator,
            config,
            states: StateStore::new(),
            result_slots,
        })
    }

    /// Compile with the built-in registry and a single-rank communicator.
    pub fn compile(function: Function, config: ExecutableConfig) -> Result<Self> {
        Self::new(
            function,
            Arc::new(OperatorRegistry::new()),
            Arc::new(LocalCommunicator),
            config,
        )
    }

    /// The compiled function.
    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Active configuration.
    pub fn config(&self) -> &ExecutableConfig {
        &self.config
    }

    /// Per-node state created so far.
    pub fn states(&self) -> &StateStore {
        &self.states
    }

    fn parameter(&self, index: usize) -> Result<&Node> {
        self.function
            .parameters()
            .get(index)
            .map(|&id| &self.function.nodes()[id])
            .ok_or_else(|| {
                InterpreterError::invalid(format!(
                    "parameter index {} out of range ({} parameters)",
                    index,
                    self.function.parameters().len()
                ))
            })
    }

    fn result(&self, index: usize) -> Result<&Node> {
        self.function
            .results()
            .get(index)
            .map(|&id| &self.function.nodes()[id])
            .ok_or_else(|| {
                InterpreterError::invalid(format!(
                    "result index {} out of range ({} results)",
                    index,
                    self.function.results().len()
                ))
            })
    }

    fn validate_call(&self, outputs: &[HostTensor], inputs: &[HostTensor]) -> Result<()> {
        let parameters = self.function.parameters();
        if inputs.len() != parameters.len() {
            return Err(InterpreterError::invalid(format!(
                "expected {} inputs, got {}",
                parameters.len(),
                inputs.len()
            )));
        }
        let results = self.function.results();
        if outputs.len() != results.len() {
            return Err(InterpreterError::invalid(format!(
                "expected {} outputs, got {}",
                results.len(),
                outputs.len()
            )));
        }
        for (index, input) in inputs.iter().enumerate() {
            let declared = &self.parameter(index)?.outputs[0];
            if input.element_type() != declared.element_type {
                return Err(InterpreterError::invalid(format!(
                    "input {} has element type {}, expected {}",
                    index,
                    input.element_type(),
                    declared.element_type
                )));
            }
            if !declared.shape.accepts(input.shape()) {
                return Err(InterpreterError::invalid(format!(
                    "input {} has shape {:?}, expected {}",
                    index,
                    input.shape(),
                    declared.shape
                )));
            }
        }
        for (index, output) in outputs.iter().enumerate() {
            let declared = &self.result(index)?.outputs[0];
            if output.element_type() != declared.element_type {
                return Err(InterpreterError::invalid(format!(
                    "output {} has element type {}, expected {}",
                    index,
                    output.element_type(),
                    declared.element_type
                )));
            }
        }
        Ok(())
    }

    /// Run the whole function once.
    ///
    /// Inputs must match the parameter declarations in count, element type
    /// and shape. Outputs must match the result declarations in count and
    /// element type; their shapes are set from the computed results.
    pub fn call(&mut self, outputs: &mut [HostTensor], inputs: &[HostTensor]) -> Result<()> {
        self.validate_call(outputs, inputs)?;
        let started = Instant::now();

        let mut values: HashMap<ValueRef, Cow<'_, HostTensor>> = self
            .function
            .parameters()
            .iter()
            .zip(inputs)
            .map(|(&id, input)| (ValueRef::from(id), Cow::Borrowed(input)))
            .collect();

        for step in &self.steps {
            let node = &self.function.nodes()[step.node];
            if step.type_id == OpTypeId::ParameterV0 {
                continue;
            }

            let mut produced = Vec::new();
            {
                let args = node
                    .inputs
                    .iter()
                    .map(|input| {
                        values.get(&input.source).map(|v| &**v).ok_or_else(|| {
                            InterpreterError::invalid(format!(
                                "{} reads {}:{} before it is produced",
                                node.name, input.source.node, input.source.output
                            ))
                        })
                    })
                    .collect::<Result<Vec<&HostTensor>>>()?;

                let out: &mut [HostTensor] = match self.result_slots.get(&step.node) {
                    Some(&slot) => std::slice::from_mut(&mut outputs[slot]),
                    None => {
                        produced = node
                            .outputs
                            .iter()
                            .map(|o| HostTensor::for_declaration(o.element_type, &o.shape))
                            .collect::<refgraph_core::Result<Vec<_>>>()?;
                        produced.as_mut_slice()
                    }
                };

                trace!(node = %node.name, op = %step.type_id, element_type = %step.element_type, "executing");
                let handler = self.registry.get(step.type_id)?;
                let mut ctx = ExecContext {
                    states: &mut self.states,
                    communicator: self.communicator.as_ref(),
                };
                if self.config.performance_counters {
                    let start = Instant::now();
                    handler.execute(&mut ctx, node, step.element_type, out, &args)?;
                    self.timers[step.node].record(start.elapsed());
                } else {
                    handler.execute(&mut ctx, node, step.element_type, out, &args)?;
                }

                if self.config.nan_check {
                    if let Some(output) = out.iter().position(HostTensor::has_nan) {
                        return Err(InterpreterError::NanDetected {
                            node: node.name.clone(),
                            output,
                        });
                    }
                }
            }

            for (index, tensor) in produced.into_iter().enumerate() {
                values.insert(ValueRef::new(step.node, index), Cow::Owned(tensor));
            }
            for value in &step.release {
                values.remove(value);
            }
        }

        debug!(
            function = self.function.name(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "call complete"
        );
        Ok(())
    }

    /// Buffer matching parameter `index`. Dynamic dimensions start at zero.
    pub fn create_input_tensor(&self, index: usize) -> Result<HostTensor> {
        let declared = &self.parameter(index)?.outputs[0];
        Ok(HostTensor::for_declaration(declared.element_type, &declared.shape)?)
    }

    /// Buffer matching result `index`. Dynamic dimensions start at zero.
    pub fn create_output_tensor(&self, index: usize) -> Result<HostTensor> {
        let declared = &self.result(index)?.outputs[0];
        Ok(HostTensor::for_declaration(declared.element_type, &declared.shape)?)
    }

    /// `pipeline_depth` independent buffers for parameter `index`.
    pub fn create_input_tensors(
        &self,
        index: usize,
        pipeline_depth: usize,
    ) -> Result<Vec<HostTensor>> {
        (0..pipeline_depth)
            .map(|_| self.create_input_tensor(index))
            .collect()
    }

    /// `pipeline_depth` independent buffers for result `index`.
    pub fn create_output_tensors(
        &self,
        index: usize,
        pipeline_depth: usize,
    ) -> Result<Vec<HostTensor>> {
        (0..pipeline_depth)
            .map(|_| self.create_output_tensor(index))
            .collect()
    }

    /// Counters of every node that ran while counters were enabled.
    pub fn get_performance_data(&self) -> Vec<PerformanceCounter> {
        self.performance_report().counters
    }

    /// Counters aggregated by operator type.
    pub fn performance_report(&self) -> PerformanceReport {
        let versioned: Vec<String> = self
            .function
            .nodes()
            .iter()
            .map(Node::versioned_type)
            .collect();
        PerformanceReport::from_timers(
            self.function
                .nodes()
                .iter()
                .zip(&versioned)
                .zip(&self.timers)
                .map(|((node, op), timer)| (node.name.as_str(), op.as_str(), timer)),
        )
    }

    /// Enable or disable the NaN check.
    pub fn set_nan_check(&mut self, enable: bool) {
        self.config.nan_check = enable;
    }

    /// Enable or disable performance counters. Accumulated counters are kept.
    pub fn set_performance_counters(&mut self, enable: bool) {
        self.config.performance_counters = enable;
    }

    /// Clear the accumulated performance counters.
    pub fn reset_performance_counters(&mut self) {
        self.timers.fill(NodeTimer::default());
    }

    /// Write the compiled function as JSON. Node states are not saved.
    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self.function.as_ref())?;
        Ok(())
    }

    /// Rebuild an executable from [`Executable::save`] output.
    pub fn load<R: Read>(reader: R, config: ExecutableConfig) -> Result<Self> {
        let function: Function = serde_json::from_reader(reader)?;
        Self::compile(function, config)
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executable")
            .field("function", &self.function.name())
            .field("steps", &self.steps.len())
            .field("config", &self.config)
            .field("states", &self.states.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refgraph_core::{FunctionBuilder, NodeSpec, PartialShape};

    fn add_function() -> Result<Function> {
        let mut b = FunctionBuilder::new("add");
        let x = b.parameter("x", DataType::F32, [2, 2])?;
        let y = b.parameter("y", DataType::F32, [2, 2])?;
        let sum = b.add(NodeSpec::new("Add", 1).input(x).input(y).output(DataType::F32, [2, 2]))?;
        b.result(sum)?;
        Ok(b.build()?)
    }

    #[test]
    fn test_add_scenario() -> Result<()> {
        let mut exe = Executable::compile(add_function()?, ExecutableConfig::default())?;
        let x = HostTensor::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0])?;
        let y = HostTensor::from_vec(vec![2, 2], vec![10.0f32, 20.0, 30.0, 40.0])?;
        let mut out = [exe.create_output_tensor(0)?];
        exe.call(&mut out, &[x, y])?;
        assert_eq!(out[0].shape(), &[2, 2]);
        assert_eq!(out[0].to_vec::<f32>()?, vec![11.0, 22.0, 33.0, 44.0]);
        Ok(())
    }

    #[test]
    fn test_call_validates_arguments() -> Result<()> {
        let mut exe = Executable::compile(add_function()?, ExecutableConfig::default())?;
        let x = HostTensor::from_vec(vec![2, 2], vec![1.0f32; 4])?;
        let mut out = [exe.create_output_tensor(0)?];

        let missing = exe.call(&mut out, &[x.clone()]);
        assert!(matches!(missing, Err(InterpreterError::InvalidArguments(_))));

        let wrong_type = HostTensor::from_vec(vec![2, 2], vec![1i32; 4])?;
        let typed = exe.call(&mut out, &[x.clone(), wrong_type]);
        assert!(matches!(typed, Err(InterpreterError::InvalidArguments(_))));

        let wrong_shape = HostTensor::from_vec(vec![4], vec![1.0f32; 4])?;
        let shaped = exe.call(&mut out, &[x, wrong_shape]);
        assert!(matches!(shaped, Err(InterpreterError::InvalidArguments(_))));
        Ok(())
    }

    #[test]
    fn test_deny_list_fails_at_compile() -> Result<()> {
        let config = ExecutableConfig::new().with_unsupported_ops(["Add"]);
        let err = Executable::compile(add_function()?, config).err();
        assert!(matches!(
            err,
            Some(InterpreterError::UnsupportedOperator { ref name, version: 1 }) if name == "Add"
        ));
        Ok(())
    }

    #[test]
    fn test_intermediates_are_released() -> Result<()> {
        let exe = Executable::compile(add_function()?, ExecutableConfig::default())?;
        let released: usize = exe.steps.iter().map(|s| s.release.len()).sum();
        // x, y and the sum each have exactly one last consumer
        assert_eq!(released, 3);
        Ok(())
    }

    #[test]
    fn test_dynamic_parameter_buffers() -> Result<()> {
        let mut b = FunctionBuilder::new("dyn");
        let x = b.parameter("x", DataType::I64, PartialShape::dynamic(2))?;
        b.result(x)?;
        let exe = Executable::compile(b.build()?, ExecutableConfig::default())?;
        let buffers = exe.create_input_tensors(0, 3)?;
        assert_eq!(buffers.len(), 3);
        assert!(buffers.iter().all(|t| t.element_type() == DataType::I64));
        assert!(exe.create_input_tensor(1).is_err());
        Ok(())
    }
}
