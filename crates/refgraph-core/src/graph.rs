//! Compiled graph representation.
//!
//! A [`Function`] is a frozen list of [`Node`]s with ordered parameter and
//! result declarations. Every node carries its versioned operator identity,
//! static attributes, and the element type and (possibly dynamic) shape of
//! each input and output. Nodes are identified by their index in the list,
//! which stays stable for the lifetime of the function.

use crate::error::{CoreError, Result};
use crate::shape::{AxisSet, Shape};
use crate::tensor::HostTensor;
use crate::types::{DataType, PartialShape};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// Stable index of a node inside its function.
pub type NodeId = usize;

/// Reference to one output of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRef {
    /// Producing node
    pub node: NodeId,
    /// Output index on the producing node
    pub output: usize,
}

impl ValueRef {
    /// Reference output `output` of `node`.
    pub fn new(node: NodeId, output: usize) -> Self {
        Self { node, output }
    }
}

impl From<NodeId> for ValueRef {
    fn from(node: NodeId) -> Self {
        Self { node, output: 0 }
    }
}

/// Static attribute value attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Boolean flag
    Bool(bool),
    /// String
    String(String),
    /// Integer list
    IntArray(Vec<i64>),
    /// Float list
    FloatArray(Vec<f64>),
    /// Embedded constant tensor
    Tensor(HostTensor),
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(v: Vec<i64>) -> Self {
        AttributeValue::IntArray(v)
    }
}

impl From<Vec<usize>> for AttributeValue {
    fn from(v: Vec<usize>) -> Self {
        AttributeValue::IntArray(v.into_iter().map(|x| x as i64).collect())
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(v: Vec<f64>) -> Self {
        AttributeValue::FloatArray(v)
    }
}

impl From<HostTensor> for AttributeValue {
    fn from(v: HostTensor) -> Self {
        AttributeValue::Tensor(v)
    }
}

/// One input edge of a node together with its declared type and shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    /// Value feeding this input
    pub source: ValueRef,
    /// Declared element type
    pub element_type: DataType,
    /// Declared shape
    pub shape: PartialShape,
}

/// One output of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Declared element type
    pub element_type: DataType,
    /// Declared shape
    pub shape: PartialShape,
}

/// An operator instance in a compiled function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable index within the function
    pub id: NodeId,
    /// Unique, human-readable name
    pub name: String,
    /// Operator name, e.g. `Add`
    pub op_type: String,
    /// Operator set version
    pub version: u32,
    /// Input edges
    pub inputs: Vec<NodeInput>,
    /// Outputs
    pub outputs: Vec<NodeOutput>,
    /// Static attributes
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Node {
    /// Versioned operator name, e.g. `v1::Add`.
    pub fn versioned_type(&self) -> String {
        format!("v{}::{}", self.version, self.op_type)
    }

    /// Attribute by name.
    pub fn attr(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    fn missing(&self, name: &str) -> CoreError {
        CoreError::MissingAttribute {
            node: self.name.clone(),
            name: name.to_string(),
        }
    }

    fn wrong_kind(&self, name: &str, expected: &'static str) -> CoreError {
        CoreError::AttributeType {
            node: self.name.clone(),
            name: name.to_string(),
            expected,
        }
    }

    /// Integer attribute. Booleans read as 0 or 1.
    pub fn attr_i64(&self, name: &str) -> Result<i64> {
        match self.attr(name) {
            Some(AttributeValue::Int(v)) => Ok(*v),
            Some(AttributeValue::Bool(v)) => Ok(i64::from(*v)),
            Some(_) => Err(self.wrong_kind(name, "an integer")),
            None => Err(self.missing(name)),
        }
    }

    /// Integer attribute with a default.
    pub fn attr_i64_or(&self, name: &str, default: i64) -> Result<i64> {
        match self.attr(name) {
            None => Ok(default),
            Some(_) => self.attr_i64(name),
        }
    }

    /// Non-negative integer attribute.
    pub fn attr_usize(&self, name: &str) -> Result<usize> {
        usize::try_from(self.attr_i64(name)?).map_err(|_| self.wrong_kind(name, "non-negative"))
    }

    /// Float attribute. Integers are widened.
    pub fn attr_f64(&self, name: &str) -> Result<f64> {
        match self.attr(name) {
            Some(AttributeValue::Float(v)) => Ok(*v),
            Some(AttributeValue::Int(v)) => Ok(*v as f64),
            Some(_) => Err(self.wrong_kind(name, "a float")),
            None => Err(self.missing(name)),
        }
    }

    /// Float attribute with a default.
    pub fn attr_f64_or(&self, name: &str, default: f64) -> Result<f64> {
        match self.attr(name) {
            None => Ok(default),
            Some(_) => self.attr_f64(name),
        }
    }

    /// Boolean attribute. Integers read as nonzero.
    pub fn attr_bool(&self, name: &str) -> Result<bool> {
        match self.attr(name) {
            Some(AttributeValue::Bool(v)) => Ok(*v),
            Some(AttributeValue::Int(v)) => Ok(*v != 0),
            Some(_) => Err(self.wrong_kind(name, "a boolean")),
            None => Err(self.missing(name)),
        }
    }

    /// Boolean attribute with a default.
    pub fn attr_bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.attr(name) {
            None => Ok(default),
            Some(_) => self.attr_bool(name),
        }
    }

    /// String attribute.
    pub fn attr_str(&self, name: &str) -> Result<&str> {
        match self.attr(name) {
            Some(AttributeValue::String(v)) => Ok(v),
            Some(_) => Err(self.wrong_kind(name, "a string")),
            None => Err(self.missing(name)),
        }
    }

    /// String attribute with a default.
    pub fn attr_str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str> {
        match self.attr(name) {
            None => Ok(default),
            Some(_) => self.attr_str(name),
        }
    }

    /// Integer list attribute.
    pub fn attr_ints(&self, name: &str) -> Result<&[i64]> {
        match self.attr(name) {
            Some(AttributeValue::IntArray(v)) => Ok(v),
            Some(_) => Err(self.wrong_kind(name, "an integer list")),
            None => Err(self.missing(name)),
        }
    }

    /// Integer list attribute with an empty default.
    pub fn attr_ints_or_empty(&self, name: &str) -> Result<Vec<i64>> {
        match self.attr(name) {
            None => Ok(Vec::new()),
            Some(_) => Ok(self.attr_ints(name)?.to_vec()),
        }
    }

    /// Non-negative integer list attribute.
    pub fn attr_usizes(&self, name: &str) -> Result<Vec<usize>> {
        self.attr_ints(name)?
            .iter()
            .map(|&v| usize::try_from(v).map_err(|_| self.wrong_kind(name, "non-negative")))
            .collect()
    }

    /// Non-negative integer list attribute with a default.
    pub fn attr_usizes_or(&self, name: &str, default: Vec<usize>) -> Result<Vec<usize>> {
        match self.attr(name) {
            None => Ok(default),
            Some(_) => self.attr_usizes(name),
        }
    }

    /// Axis set attribute, absent means empty.
    pub fn attr_axis_set(&self, name: &str) -> Result<AxisSet> {
        match self.attr(name) {
            None => Ok(AxisSet::new()),
            Some(_) => Ok(self.attr_usizes(name)?.into_iter().collect()),
        }
    }

    /// Embedded tensor attribute.
    pub fn attr_tensor(&self, name: &str) -> Result<&HostTensor> {
        match self.attr(name) {
            Some(AttributeValue::Tensor(v)) => Ok(v),
            Some(_) => Err(self.wrong_kind(name, "a tensor")),
            None => Err(self.missing(name)),
        }
    }

    /// Declared element type of input `index`.
    pub fn input_type(&self, index: usize) -> Result<DataType> {
        self.inputs
            .get(index)
            .map(|i| i.element_type)
            .ok_or_else(|| self.bad_port("input", index))
    }

    /// Declared element type of output `index`.
    pub fn output_type(&self, index: usize) -> Result<DataType> {
        self.outputs
            .get(index)
            .map(|o| o.element_type)
            .ok_or_else(|| self.bad_port("output", index))
    }

    /// Declared static shape of input `index`.
    pub fn input_shape(&self, index: usize) -> Result<Shape> {
        let input = self
            .inputs
            .get(index)
            .ok_or_else(|| self.bad_port("input", index))?;
        input
            .shape
            .to_shape()
            .ok_or_else(|| CoreError::DynamicShape(format!("{} on {}", input.shape, self.name)))
    }

    /// Declared static shape of output `index`.
    pub fn output_shape(&self, index: usize) -> Result<Shape> {
        let output = self
            .outputs
            .get(index)
            .ok_or_else(|| self.bad_port("output", index))?;
        output
            .shape
            .to_shape()
            .ok_or_else(|| CoreError::DynamicShape(format!("{} on {}", output.shape, self.name)))
    }

    fn bad_port(&self, kind: &str, index: usize) -> CoreError {
        CoreError::InvalidGraph(format!("node '{}' has no {} {}", self.name, kind, index))
    }
}

/// A compiled, validated computation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    name: String,
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
}

impl Function {
    /// Assemble and validate a function.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<Node>,
        parameters: Vec<NodeId>,
        results: Vec<NodeId>,
    ) -> Result<Self> {
        let function = Self {
            name: name.into(),
            nodes,
            parameters,
            results,
        };
        function.validate()?;
        Ok(function)
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All nodes, indexed by [`NodeId`].
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Parameter node ids in call order.
    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    /// Result node ids in call order.
    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    /// Check ids, edges, parameter and result declarations, and acyclicity.
    pub fn validate(&self) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id != index {
                return Err(CoreError::InvalidGraph(format!(
                    "node '{}' has id {} at position {}",
                    node.name, node.id, index
                )));
            }
            for input in &node.inputs {
                let producer = self.nodes.get(input.source.node).ok_or_else(|| {
                    CoreError::InvalidGraph(format!(
                        "node '{}' reads missing node {}",
                        node.name, input.source.node
                    ))
                })?;
                if input.source.output >= producer.outputs.len() {
                    return Err(CoreError::InvalidGraph(format!(
                        "node '{}' reads output {} of '{}', which has {} outputs",
                        node.name,
                        input.source.output,
                        producer.name,
                        producer.outputs.len()
                    )));
                }
            }
        }

        for &id in &self.parameters {
            match self.nodes.get(id) {
                Some(node) if node.op_type == "Parameter" => {}
                _ => {
                    return Err(CoreError::InvalidGraph(format!(
                        "parameter {id} is not a Parameter node"
                    )))
                }
            }
        }
        for &id in &self.results {
            match self.nodes.get(id) {
                Some(node) if node.op_type == "Result" && node.inputs.len() == 1 => {}
                _ => {
                    return Err(CoreError::InvalidGraph(format!(
                        "result {id} is not a single-input Result node"
                    )))
                }
            }
        }

        self.topological_order()?;
        debug!(
            function = %self.name,
            nodes = self.nodes.len(),
            "validated function"
        );
        Ok(())
    }

    /// Node ids in an order where every producer precedes its consumers.
    /// Ties are broken by node id, so a function built in dependency order
    /// keeps its construction order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut consumers: Vec<Vec<NodeId>> = vec![Vec::new(); self.nodes.len()];
        for node in &self.nodes {
            for input in &node.inputs {
                in_degree[node.id] += 1;
                consumers[input.source.node].push(node.id);
            }
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &consumer in &consumers[id] {
                in_degree[consumer] -= 1;
                if in_degree[consumer] == 0 {
                    queue.push_back(consumer);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(CoreError::InvalidGraph(
                "graph contains cycles - cannot perform topological sort".to_string(),
            ));
        }
        Ok(order)
    }

    /// Count of nodes per versioned operator type.
    pub fn op_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for node in &self.nodes {
            *counts.entry(node.versioned_type()).or_insert(0) += 1;
        }
        counts
    }
}

/// Description of a node to append through [`FunctionBuilder::add`].
#[derive(Debug, Clone)]
pub struct NodeSpec {
    op_type: String,
    version: u32,
    name: Option<String>,
    inputs: Vec<ValueRef>,
    outputs: Vec<NodeOutput>,
    attributes: BTreeMap<String, AttributeValue>,
}

impl NodeSpec {
    /// Start describing an operator of the given type and version.
    pub fn new(op_type: impl Into<String>, version: u32) -> Self {
        Self {
            op_type: op_type.into(),
            version,
            name: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Set the node name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append an input edge.
    pub fn input(mut self, value: impl Into<ValueRef>) -> Self {
        self.inputs.push(value.into());
        self
    }

    /// Append a declared output.
    pub fn output(mut self, element_type: DataType, shape: impl Into<PartialShape>) -> Self {
        self.outputs.push(NodeOutput {
            element_type,
            shape: shape.into(),
        });
        self
    }

    /// Set an attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Incremental construction of a [`Function`].
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    name: String,
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
}

impl FunctionBuilder {
    /// Start an empty function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append a node; input types and shapes are taken from the producers.
    pub fn add(&mut self, spec: NodeSpec) -> Result<NodeId> {
        let id = self.nodes.len();
        let mut inputs = Vec::with_capacity(spec.inputs.len());
        for source in spec.inputs {
            let output = self
                .nodes
                .get(source.node)
                .and_then(|n| n.outputs.get(source.output))
                .ok_or_else(|| {
                    CoreError::InvalidGraph(format!(
                        "{} input refers to unknown value {}:{}",
                        spec.op_type, source.node, source.output
                    ))
                })?;
            inputs.push(NodeInput {
                source,
                element_type: output.element_type,
                shape: output.shape.clone(),
            });
        }
        let name = spec
            .name
            .unwrap_or_else(|| format!("{}_{}", spec.op_type, id));
        self.nodes.push(Node {
            id,
            name,
            op_type: spec.op_type,
            version: spec.version,
            inputs,
            outputs: spec.outputs,
            attributes: spec.attributes,
        });
        Ok(id)
    }

    /// Declare a function parameter.
    pub fn parameter(
        &mut self,
        name: impl Into<String>,
        element_type: DataType,
        shape: impl Into<PartialShape>,
    ) -> Result<ValueRef> {
        let id = self.add(
            NodeSpec::new("Parameter", 0)
                .named(name)
                .output(element_type, shape),
        )?;
        self.parameters.push(id);
        Ok(ValueRef::from(id))
    }

    /// Embed a constant tensor.
    pub fn constant(&mut self, value: HostTensor) -> Result<ValueRef> {
        let spec = NodeSpec::new("Constant", 0)
            .output(value.element_type(), value.shape().to_vec())
            .attr("value", value);
        Ok(ValueRef::from(self.add(spec)?))
    }

    /// Declare a function result fed by `value`.
    pub fn result(&mut self, value: impl Into<ValueRef>) -> Result<NodeId> {
        let value = value.into();
        let output = self
            .nodes
            .get(value.node)
            .and_then(|n| n.outputs.get(value.output))
            .cloned()
            .ok_or_else(|| {
                CoreError::InvalidGraph(format!(
                    "result refers to unknown value {}:{}",
                    value.node, value.output
                ))
            })?;
        let id = self.add(
            NodeSpec::new("Result", 0)
                .input(value)
                .output(output.element_type, output.shape),
        )?;
        self.results.push(id);
        Ok(id)
    }

    /// Finish and validate the function.
    pub fn build(self) -> Result<Function> {
        Function::new(self.name, self.nodes, self.parameters, self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_graph() -> Result<Function> {
        let mut b = FunctionBuilder::new("add");
        let x = b.parameter("x", DataType::F32, [2, 2])?;
        let y = b.parameter("y", DataType::F32, [2, 2])?;
        let sum = b.add(
            NodeSpec::new("Add", 1)
                .input(x)
                .input(y)
                .output(DataType::F32, [2, 2]),
        )?;
        b.result(sum)?;
        b.build()
    }

    #[test]
    fn test_builder_wires_input_descriptors() -> Result<()> {
        let f = add_graph()?;
        assert_eq!(f.nodes().len(), 4);
        assert_eq!(f.parameters(), &[0, 1]);
        assert_eq!(f.results(), &[3]);
        let add = &f.nodes()[2];
        assert_eq!(add.inputs[1].source, ValueRef::new(1, 0));
        assert_eq!(add.input_type(0)?, DataType::F32);
        assert_eq!(add.input_shape(1)?, vec![2, 2]);
        assert_eq!(add.versioned_type(), "v1::Add");
        Ok(())
    }

    #[test]
    fn test_topological_order_keeps_construction_order() -> Result<()> {
        let f = add_graph()?;
        assert_eq!(f.topological_order()?, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_cycle_detection() {
        let mut nodes = add_graph().map(|f| f.nodes().to_vec()).unwrap_or_default();
        // Feed the Add back into the first parameter slot.
        nodes[0].inputs.push(NodeInput {
            source: ValueRef::new(2, 0),
            element_type: DataType::F32,
            shape: [2, 2].into(),
        });
        let result = Function::new("cyclic", nodes, vec![0, 1], vec![3]);
        assert!(matches!(result, Err(CoreError::InvalidGraph(_))));
    }

    #[test]
    fn test_result_must_be_result_node() -> Result<()> {
        let f = add_graph()?;
        let result = Function::new("bad", f.nodes().to_vec(), vec![0, 1], vec![2]);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_attribute_accessors() -> Result<()> {
        let mut b = FunctionBuilder::new("attrs");
        let x = b.parameter("x", DataType::F32, [4])?;
        let id = b.add(
            NodeSpec::new("Clamp", 0)
                .input(x)
                .output(DataType::F32, [4])
                .attr("min", 0.5_f64)
                .attr("axes", vec![0_i64, 2])
                .attr("flag", true),
        )?;
        let f = {
            b.result(id)?;
            b.build()?
        };
        let node = &f.nodes()[id];
        assert_eq!(node.attr_f64("min")?, 0.5);
        assert_eq!(node.attr_f64_or("max", 6.0)?, 6.0);
        assert_eq!(node.attr_axis_set("axes")?.len(), 2);
        assert!(node.attr_bool("flag")?);
        assert!(matches!(
            node.attr_str("min"),
            Err(CoreError::AttributeType { .. })
        ));
        assert!(matches!(
            node.attr_i64("missing"),
            Err(CoreError::MissingAttribute { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_function_serde_round_trip() -> Result<()> {
        let f = add_graph()?;
        let json = serde_json::to_string(&f).map_err(|e| CoreError::InvalidGraph(e.to_string()))?;
        let back: Function =
            serde_json::from_str(&json).map_err(|e| CoreError::InvalidGraph(e.to_string()))?;
        assert_eq!(f, back);
        Ok(())
    }
}
