//! Operator coverage through full executables
//! Tests: broadcasting, reductions, shape ops, convolution, pooling, TopK, registry

use anyhow::Result;
use proptest::prelude::*;
use refgraph_core::{DataType, Function, FunctionBuilder, HostTensor, NodeSpec, ValueRef};
use refgraph_interpreter::{Executable, ExecutableConfig, OpTypeId, OperatorRegistry};

fn run(function: Function, inputs: &[HostTensor]) -> Result<Vec<HostTensor>> {
    let mut exe = Executable::compile(function, ExecutableConfig::new().with_nan_check(true))?;
    let mut outputs = (0..exe.function().results().len())
        .map(|i| exe.create_output_tensor(i))
        .collect::<refgraph_interpreter::Result<Vec<_>>>()?;
    exe.call(&mut outputs, inputs)?;
    Ok(outputs)
}

fn iota(shape: Vec<usize>) -> Result<HostTensor> {
    let count = shape.iter().product::<usize>();
    Ok(HostTensor::from_vec(shape, (1..=count).map(|v| v as f32).collect())?)
}

// ============ Element-wise Tests ============

#[test]
fn test_numpy_broadcast_add() -> Result<()> {
    let mut b = FunctionBuilder::new("bias");
    let x = b.parameter("x", DataType::F32, [2, 3])?;
    let bias = b.parameter("bias", DataType::F32, [3])?;
    let y = b.add(NodeSpec::new("Add", 1).input(x).input(bias).output(DataType::F32, [2, 3]))?;
    b.result(y)?;

    let out = run(
        b.build()?,
        &[iota(vec![2, 3])?, HostTensor::from_vec(vec![3], vec![10.0f32, 20.0, 30.0])?],
    )?;
    assert_eq!(out[0].to_vec::<f32>()?, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    Ok(())
}

#[test]
fn test_comparison_produces_booleans() -> Result<()> {
    let mut b = FunctionBuilder::new("greater");
    let x = b.parameter("x", DataType::I32, [4])?;
    let y = b.parameter("y", DataType::I32, [4])?;
    let gt = b.add(NodeSpec::new("Greater", 1).input(x).input(y).output(DataType::Boolean, [4]))?;
    b.result(gt)?;

    let out = run(
        b.build()?,
        &[
            HostTensor::from_vec(vec![4], vec![1i32, 5, 3, 0])?,
            HostTensor::from_vec(vec![4], vec![2i32, 4, 3, -1])?,
        ],
    )?;
    assert_eq!(out[0], HostTensor::from_bools(vec![4], &[false, true, false, true])?);
    Ok(())
}

#[test]
fn test_convert_float_to_int() -> Result<()> {
    let mut b = FunctionBuilder::new("convert");
    let x = b.parameter("x", DataType::F32, [3])?;
    let y = b.add(NodeSpec::new("Convert", 0).input(x).output(DataType::I32, [3]))?;
    b.result(y)?;

    let out = run(b.build()?, &[HostTensor::from_vec(vec![3], vec![2.0f32, -3.0, 0.0])?])?;
    assert_eq!(out[0].to_vec::<i32>()?, vec![2, -3, 0]);
    Ok(())
}

proptest! {
    #[test]
    fn prop_subtract_then_add_restores_input(
        values in prop::collection::vec(-1000i32..1000, 1..32),
        offset in -1000i32..1000,
    ) {
        let len = values.len();
        let mut b = FunctionBuilder::new("round_trip");
        let x = b.parameter("x", DataType::I32, [len]).unwrap();
        let k = b.parameter("k", DataType::I32, Vec::<usize>::new()).unwrap();
        let diff = b.add(NodeSpec::new("Subtract", 1).input(x).input(k).output(DataType::I32, [len])).unwrap();
        let back = b.add(NodeSpec::new("Add", 1).input(diff).input(k).output(DataType::I32, [len])).unwrap();
        b.result(back).unwrap();

        let out = run(
            b.build().unwrap(),
            &[HostTensor::from_vec(vec![len], values.clone()).unwrap(), HostTensor::scalar(offset)],
        ).unwrap();
        prop_assert_eq!(out[0].to_vec::<i32>().unwrap(), values);
    }
}

// ============ Reduction Tests ============

#[test]
fn test_sum_over_axes_input() -> Result<()> {
    let mut b = FunctionBuilder::new("sum");
    let x = b.parameter("x", DataType::F32, [2, 3])?;
    let axes = b.constant(HostTensor::from_vec(vec![1], vec![1i64])?)?;
    let y = b.add(NodeSpec::new("Sum", 0).input(x).input(axes).output(DataType::F32, [2]))?;
    b.result(y)?;

    let out = run(b.build()?, &[iota(vec![2, 3])?])?;
    assert_eq!(out[0].to_vec::<f32>()?, vec![6.0, 15.0]);
    Ok(())
}

#[test]
fn test_reduce_mean_keep_dims() -> Result<()> {
    let mut b = FunctionBuilder::new("mean");
    let x = b.parameter("x", DataType::F32, [2, 2])?;
    let axes = b.constant(HostTensor::from_vec(vec![1], vec![0i64])?)?;
    let y = b.add(
        NodeSpec::new("ReduceMean", 1)
            .input(x)
            .input(axes)
            .output(DataType::F32, [1, 2])
            .attr("keep_dims", true),
    )?;
    b.result(y)?;

    let out = run(b.build()?, &[iota(vec![2, 2])?])?;
    assert_eq!(out[0].shape(), &[1, 2]);
    assert_eq!(out[0].to_vec::<f32>()?, vec![2.0, 3.0]);
    Ok(())
}

#[test]
fn test_topk_two_outputs() -> Result<()> {
    let mut b = FunctionBuilder::new("topk");
    let x = b.parameter("x", DataType::F32, [1, 4])?;
    let topk = b.add(
        NodeSpec::new("TopK", 0)
            .input(x)
            .output(DataType::I64, [1, 2])
            .output(DataType::F32, [1, 2])
            .attr("top_k_axis", 1i64)
            .attr("k", 2i64),
    )?;
    b.result(ValueRef::new(topk, 0))?;
    b.result(ValueRef::new(topk, 1))?;

    let out = run(b.build()?, &[HostTensor::from_vec(vec![1, 4], vec![3.0f32, 1.0, 4.0, 2.0])?])?;
    assert_eq!(out[0].to_vec::<i64>()?, vec![2, 0]);
    assert_eq!(out[1].to_vec::<f32>()?, vec![4.0, 3.0]);
    Ok(())
}

#[test]
fn test_topk_over_nan_input() -> Result<()> {
    let values: Vec<f32> = (0..2000)
        .map(|i| if i % 3 == 0 { f32::NAN } else { i as f32 })
        .collect();
    let mut b = FunctionBuilder::new("topk_nan");
    let x = b.parameter("x", DataType::F32, [2000])?;
    let topk = b.add(
        NodeSpec::new("TopK", 0)
            .input(x)
            .output(DataType::I64, [5])
            .output(DataType::F32, [5])
            .attr("top_k_axis", 0i64)
            .attr("k", 5i64),
    )?;
    b.result(ValueRef::new(topk, 0))?;
    b.result(ValueRef::new(topk, 1))?;

    let mut exe = Executable::compile(b.build()?, ExecutableConfig::default())?;
    let mut outputs = [exe.create_output_tensor(0)?, exe.create_output_tensor(1)?];
    exe.call(&mut outputs, &[HostTensor::from_vec(vec![2000], values)?])?;
    assert_eq!(outputs[0].to_vec::<i64>()?, vec![1999, 1997, 1996, 1994, 1993]);
    assert_eq!(outputs[1].to_vec::<f32>()?, vec![1999.0, 1997.0, 1996.0, 1994.0, 1993.0]);
    Ok(())
}

// ============ Shape Tests ============

#[test]
fn test_concat_then_shape_of() -> Result<()> {
    let mut b = FunctionBuilder::new("concat");
    let x = b.parameter("x", DataType::F32, [1, 3])?;
    let y = b.parameter("y", DataType::F32, [2, 3])?;
    let joined = b.add(
        NodeSpec::new("Concat", 0)
            .input(x)
            .input(y)
            .output(DataType::F32, [3, 3])
            .attr("axis", 0i64),
    )?;
    let shape = b.add(NodeSpec::new("ShapeOf", 3).input(joined).output(DataType::I64, [2]))?;
    b.result(joined)?;
    b.result(shape)?;

    let out = run(b.build()?, &[iota(vec![1, 3])?, iota(vec![2, 3])?])?;
    assert_eq!(
        out[0].to_vec::<f32>()?,
        vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
    );
    assert_eq!(out[1].to_vec::<i64>()?, vec![3, 3]);
    Ok(())
}

#[test]
fn test_slice_with_strides() -> Result<()> {
    let mut b = FunctionBuilder::new("slice");
    let x = b.parameter("x", DataType::F32, [6])?;
    let y = b.add(
        NodeSpec::new("Slice", 0)
            .input(x)
            .output(DataType::F32, [3])
            .attr("lower_bounds", vec![0i64])
            .attr("upper_bounds", vec![6i64])
            .attr("strides", vec![2i64]),
    )?;
    b.result(y)?;

    let out = run(b.build()?, &[iota(vec![6])?])?;
    assert_eq!(out[0].to_vec::<f32>()?, vec![1.0, 3.0, 5.0]);
    Ok(())
}

// ============ Neural Network Tests ============

#[test]
fn test_convolution_then_pool() -> Result<()> {
    let mut b = FunctionBuilder::new("conv_pool");
    let data = b.parameter("data", DataType::F32, [1, 1, 3, 3])?;
    let filters = b.constant(HostTensor::from_vec(vec![1, 1, 2, 2], vec![1.0f32; 4])?)?;
    let conv = b.add(
        NodeSpec::new("Convolution", 0)
            .input(data)
            .input(filters)
            .output(DataType::F32, [1, 1, 2, 2]),
    )?;
    let pooled = b.add(
        NodeSpec::new("MaxPool", 0)
            .input(conv)
            .output(DataType::F32, [1, 1, 1, 1])
            .attr("window_shape", vec![2i64, 2]),
    )?;
    b.result(conv)?;
    b.result(pooled)?;

    let out = run(b.build()?, &[iota(vec![1, 1, 3, 3])?])?;
    assert_eq!(out[0].to_vec::<f32>()?, vec![12.0, 16.0, 24.0, 28.0]);
    assert_eq!(out[1].to_vec::<f32>()?, vec![28.0]);
    Ok(())
}

#[test]
fn test_strided_convolution_shape() -> Result<()> {
    let mut b = FunctionBuilder::new("conv");
    let data = b.parameter("data", DataType::F64, [1, 1, 4, 4])?;
    let filters = b.parameter("filters", DataType::F64, [2, 1, 2, 2])?;
    let conv = b.add(
        NodeSpec::new("Convolution", 0)
            .input(data)
            .input(filters)
            .output(DataType::F64, [1, 2, 2, 2])
            .attr("window_movement_strides", vec![2i64, 2]),
    )?;
    b.result(conv)?;

    let filters = HostTensor::from_vec(vec![2, 1, 2, 2], vec![1.0f64, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0])?;
    let data = HostTensor::from_vec(vec![1, 1, 4, 4], (0..16).map(f64::from).collect())?;
    let out = run(b.build()?, &[data, filters])?;
    assert_eq!(out[0].shape(), &[1, 2, 2, 2]);
    // first filter picks the top-left of each window, second the bottom-right
    assert_eq!(
        out[0].to_vec::<f64>()?,
        vec![0.0, 2.0, 8.0, 10.0, 5.0, 7.0, 13.0, 15.0]
    );
    Ok(())
}

// ============ Registry Tests ============

#[test]
fn test_every_operator_type_is_registered() {
    let registry = OperatorRegistry::new();
    assert!(registry.missing().is_empty());

    let supported = registry.supported_operators();
    assert!(supported.contains(&OpTypeId::AddV1));
    assert!(supported.contains(&OpTypeId::RandomUniformV0));
    assert!(!supported.contains(&OpTypeId::TileV0));
    assert!(!supported.contains(&OpTypeId::Unknown));
}
