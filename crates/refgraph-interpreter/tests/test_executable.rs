//! End-to-end tests for compiled executables
//! Tests: call, argument checks, dynamic shapes, NaN check, counters, save/load

use anyhow::Result;
use refgraph_core::{
    init_logging, DataType, Function, FunctionBuilder, HostTensor, LoggingConfig, NodeSpec, PartialShape,
};
use refgraph_interpreter::{Executable, ExecutableConfig, InterpreterBackend, InterpreterError};

const EPSILON: f32 = 1e-5;

fn init_tracing() {
    init_logging(LoggingConfig::operator_trace().with_test_writer(true));
}

fn approx_eq_vec(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < EPSILON)
}

fn add_function() -> Result<Function> {
    let mut b = FunctionBuilder::new("add");
    let x = b.parameter("x", DataType::F32, [2, 2])?;
    let y = b.parameter("y", DataType::F32, [2, 2])?;
    let sum = b.add(NodeSpec::new("Add", 1).input(x).input(y).output(DataType::F32, [2, 2]))?;
    b.result(sum)?;
    Ok(b.build()?)
}

// relu(x * w + b) over a [2, 3] input
fn dense_function() -> Result<Function> {
    let mut b = FunctionBuilder::new("dense");
    let x = b.parameter("x", DataType::F32, [2, 3])?;
    let w = b.constant(HostTensor::from_vec(vec![3, 2], vec![1.0f32, 0.0, 0.0, 1.0, 1.0, -1.0])?)?;
    let bias = b.constant(HostTensor::from_vec(vec![2], vec![0.5f32, 0.0])?)?;
    let mm = b.add(
        NodeSpec::new("MatMul", 0)
            .input(x)
            .input(w)
            .output(DataType::F32, [2, 2]),
    )?;
    let biased = b.add(
        NodeSpec::new("Add", 1)
            .input(mm)
            .input(bias)
            .output(DataType::F32, [2, 2]),
    )?;
    let y = b.add(NodeSpec::new("Relu", 0).input(biased).output(DataType::F32, [2, 2]))?;
    b.result(y)?;
    Ok(b.build()?)
}

// ============ Call Tests ============

#[test]
fn test_add_two_parameters() -> Result<()> {
    init_tracing();
    let backend = InterpreterBackend::new();
    let mut exe = backend.compile(add_function()?)?;
    let x = HostTensor::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0])?;
    let y = HostTensor::from_vec(vec![2, 2], vec![0.5f32, 0.5, 0.5, 0.5])?;
    let mut out = [exe.create_output_tensor(0)?];

    exe.call(&mut out, &[x, y])?;

    assert_eq!(out[0].shape(), &[2, 2]);
    assert!(approx_eq_vec(&out[0].to_vec::<f32>()?, &[1.5, 2.5, 3.5, 4.5]));
    Ok(())
}

#[test]
fn test_repeated_calls_reuse_buffers() -> Result<()> {
    let mut exe = Executable::compile(dense_function()?, ExecutableConfig::default())?;
    let mut out = exe.create_output_tensors(0, 1)?;

    let x = HostTensor::from_vec(vec![2, 3], vec![1.0f32, 2.0, 3.0, -1.0, -2.0, -3.0])?;
    exe.call(&mut out, &[x])?;
    // [1+3+0.5, 2-3] and [-1-3+0.5, -2+3]
    assert!(approx_eq_vec(&out[0].to_vec::<f32>()?, &[4.5, 0.0, 0.0, 1.0]));

    let x = HostTensor::from_vec(vec![2, 3], vec![0.0f32; 6])?;
    exe.call(&mut out, &[x])?;
    assert!(approx_eq_vec(&out[0].to_vec::<f32>()?, &[0.5, 0.0, 0.5, 0.0]));
    Ok(())
}

#[test]
fn test_dynamic_reshape_resizes_output() -> Result<()> {
    let mut b = FunctionBuilder::new("flatten");
    let x = b.parameter("x", DataType::I32, PartialShape::dynamic(2))?;
    let pattern = b.constant(HostTensor::from_vec(vec![1], vec![-1i64])?)?;
    let flat = b.add(
        NodeSpec::new("Reshape", 1)
            .input(x)
            .input(pattern)
            .output(DataType::I32, PartialShape::dynamic(1)),
    )?;
    b.result(flat)?;
    let mut exe = Executable::compile(b.build()?, ExecutableConfig::default())?;

    let mut out = [exe.create_output_tensor(0)?];
    assert_eq!(out[0].element_count(), 0);

    exe.call(&mut out, &[HostTensor::from_vec(vec![2, 3], (1..=6).collect::<Vec<i32>>())?])?;
    assert_eq!(out[0].shape(), &[6]);
    assert_eq!(out[0].to_vec::<i32>()?, vec![1, 2, 3, 4, 5, 6]);

    exe.call(&mut out, &[HostTensor::from_vec(vec![1, 2], vec![7i32, 8])?])?;
    assert_eq!(out[0].shape(), &[2]);
    assert_eq!(out[0].to_vec::<i32>()?, vec![7, 8]);
    Ok(())
}

#[test]
fn test_parameter_passed_straight_to_result() -> Result<()> {
    let mut b = FunctionBuilder::new("identity");
    let x = b.parameter("x", DataType::U8, [3])?;
    b.result(x)?;
    let mut exe = Executable::compile(b.build()?, ExecutableConfig::default())?;
    let mut out = [exe.create_output_tensor(0)?];
    exe.call(&mut out, &[HostTensor::from_vec(vec![3], vec![9u8, 8, 7])?])?;
    assert_eq!(out[0].to_vec::<u8>()?, vec![9, 8, 7]);
    Ok(())
}

// ============ Error Tests ============

#[test]
fn test_wrong_argument_count() -> Result<()> {
    let mut exe = Executable::compile(add_function()?, ExecutableConfig::default())?;
    let x = HostTensor::from_vec(vec![2, 2], vec![1.0f32; 4])?;
    let mut no_outputs: [HostTensor; 0] = [];
    let result = exe.call(&mut no_outputs, &[x.clone(), x]);
    assert!(matches!(result, Err(InterpreterError::InvalidArguments(_))));
    Ok(())
}

#[test]
fn test_op_without_kernel_fails_at_call() -> Result<()> {
    let mut b = FunctionBuilder::new("tile");
    let x = b.parameter("x", DataType::F32, [2])?;
    let repeats = b.constant(HostTensor::from_vec(vec![1], vec![2i64])?)?;
    let tiled = b.add(
        NodeSpec::new("Tile", 0)
            .input(x)
            .input(repeats)
            .output(DataType::F32, [4]),
    )?;
    b.result(tiled)?;
    let function = b.build()?;

    let backend = InterpreterBackend::new();
    let tile = function.nodes().iter().find(|n| n.op_type == "Tile").expect("tile node");
    assert!(!backend.is_supported(tile));

    // Compiles, then fails when the node is reached
    let mut exe = backend.compile(function)?;
    let mut out = [exe.create_output_tensor(0)?];
    let err = exe
        .call(&mut out, &[HostTensor::from_vec(vec![2], vec![1.0f32, 2.0])?])
        .unwrap_err();
    assert_eq!(err.to_string(), "Unsupported op 'v0::Tile'");
    Ok(())
}

#[test]
fn test_fused_convolution_fails_after_earlier_nodes_ran() -> Result<()> {
    let mut b = FunctionBuilder::new("fused");
    let data = b.parameter("data", DataType::F32, [1, 1, 3, 3])?;
    let filters = b.parameter("filters", DataType::F32, [1, 1, 2, 2])?;
    let bias = b.parameter("bias", DataType::F32, [1])?;
    let relu = b.add(
        NodeSpec::new("Relu", 0)
            .named("relu")
            .input(data)
            .output(DataType::F32, [1, 1, 3, 3]),
    )?;
    let conv = b.add(
        NodeSpec::new("ConvolutionBias", 0)
            .input(relu)
            .input(filters)
            .input(bias)
            .output(DataType::F32, [1, 1, 2, 2]),
    )?;
    b.result(conv)?;

    let config = ExecutableConfig::new().with_performance_counters(true);
    let mut exe = Executable::compile(b.build()?, config)?;
    let mut out = [exe.create_output_tensor(0)?];
    let result = exe.call(
        &mut out,
        &[
            HostTensor::from_vec(vec![1, 1, 3, 3], vec![1.0f32; 9])?,
            HostTensor::from_vec(vec![1, 1, 2, 2], vec![1.0f32; 4])?,
            HostTensor::from_vec(vec![1], vec![0.0f32])?,
        ],
    );

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "Unsupported op 'v0::ConvolutionBias'");
    let counters = exe.get_performance_data();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].node, "relu");
    Ok(())
}

#[test]
fn test_unknown_op_reports_version() -> Result<()> {
    let mut b = FunctionBuilder::new("mystery");
    let x = b.parameter("x", DataType::F32, [1])?;
    let y = b.add(NodeSpec::new("Frobnicate", 4).input(x).output(DataType::F32, [1]))?;
    b.result(y)?;
    let mut exe = Executable::compile(b.build()?, ExecutableConfig::default())?;
    let mut out = [exe.create_output_tensor(0)?];
    let result = exe.call(&mut out, &[HostTensor::from_vec(vec![1], vec![0.0f32])?]);
    assert!(matches!(
        result,
        Err(InterpreterError::UnsupportedOperator { ref name, version: 4 }) if name == "Frobnicate"
    ));
    Ok(())
}

#[test]
fn test_nan_check_names_node() -> Result<()> {
    init_tracing();
    let mut b = FunctionBuilder::new("log");
    let x = b.parameter("x", DataType::F32, [2])?;
    let y = b.add(
        NodeSpec::new("Log", 0)
            .named("log_of_x")
            .input(x)
            .output(DataType::F32, [2]),
    )?;
    b.result(y)?;
    let mut exe = Executable::compile(b.build()?, ExecutableConfig::default())?;
    let mut out = [exe.create_output_tensor(0)?];
    let x = HostTensor::from_vec(vec![2], vec![1.0f32, -1.0])?;

    // Off by default
    exe.call(&mut out, &[x.clone()])?;
    assert!(out[0].has_nan());

    exe.set_nan_check(true);
    let result = exe.call(&mut out, &[x]);
    assert!(matches!(
        result,
        Err(InterpreterError::NanDetected { ref node, output: 0 }) if node == "log_of_x"
    ));
    Ok(())
}

// ============ Performance Counter Tests ============

#[test]
fn test_counters_accumulate_per_node() -> Result<()> {
    let config = ExecutableConfig::new().with_performance_counters(true);
    let mut exe = Executable::compile(dense_function()?, config)?;
    let mut out = [exe.create_output_tensor(0)?];
    let x = HostTensor::from_vec(vec![2, 3], vec![1.0f32; 6])?;
    for _ in 0..3 {
        exe.call(&mut out, &[x.clone()])?;
    }

    let counters = exe.get_performance_data();
    let matmul = counters
        .iter()
        .find(|c| c.op_type == "v0::MatMul")
        .expect("matmul counter");
    assert_eq!(matmul.call_count, 3);
    assert!(counters.iter().all(|c| c.call_count == 3));

    let report = exe.performance_report();
    assert!(report.by_op_type.contains_key("v1::Add"));
    let json = report.to_json();
    assert_eq!(json["node_count"], serde_json::json!(counters.len()));

    exe.reset_performance_counters();
    assert!(exe.get_performance_data().is_empty());
    Ok(())
}

#[test]
fn test_counters_off_by_default() -> Result<()> {
    let mut exe = Executable::compile(add_function()?, ExecutableConfig::default())?;
    let mut out = [exe.create_output_tensor(0)?];
    let x = HostTensor::from_vec(vec![2, 2], vec![1.0f32; 4])?;
    exe.call(&mut out, &[x.clone(), x])?;
    assert!(exe.get_performance_data().is_empty());
    Ok(())
}

// ============ Persistence Tests ============

#[test]
fn test_save_and_load_round_trip() -> Result<()> {
    let exe = Executable::compile(dense_function()?, ExecutableConfig::default())?;
    let mut saved = Vec::new();
    exe.save(&mut saved)?;

    let mut loaded = Executable::load(saved.as_slice(), ExecutableConfig::default())?;
    assert_eq!(loaded.function().name(), "dense");
    assert_eq!(loaded.function().nodes().len(), exe.function().nodes().len());

    let mut out = [loaded.create_output_tensor(0)?];
    let x = HostTensor::from_vec(vec![2, 3], vec![1.0f32, 2.0, 3.0, -1.0, -2.0, -3.0])?;
    loaded.call(&mut out, &[x])?;
    assert!(approx_eq_vec(&out[0].to_vec::<f32>()?, &[4.5, 0.0, 0.0, 1.0]));
    Ok(())
}

// Truncates every stored tensor payload holding more than one value.
fn truncate_payloads(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::Array(values)) = map.get_mut("values") {
                values.truncate(1);
            }
            map.values_mut().for_each(truncate_payloads);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(truncate_payloads),
        _ => {}
    }
}

#[test]
fn test_load_rejects_constant_shorter_than_shape() -> Result<()> {
    let exe = Executable::compile(dense_function()?, ExecutableConfig::default())?;
    let mut saved = Vec::new();
    exe.save(&mut saved)?;

    let mut json: serde_json::Value = serde_json::from_slice(&saved)?;
    truncate_payloads(&mut json);
    let tampered = serde_json::to_vec(&json)?;

    let result = Executable::load(tampered.as_slice(), ExecutableConfig::default());
    assert!(matches!(result, Err(InterpreterError::Serialization(_))));
    Ok(())
}

#[test]
fn test_load_rejects_garbage() {
    let result = Executable::load(&b"{not json"[..], ExecutableConfig::default());
    assert!(matches!(result, Err(InterpreterError::Serialization(_))));
}
