//! Benchmarks for executable calls.
//!
//! Run with: cargo bench --package refgraph-interpreter

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use refgraph_core::{init_logging, DataType, Function, FunctionBuilder, HostTensor, LogLevel, LoggingConfig, NodeSpec};
use refgraph_interpreter::{Executable, ExecutableConfig};

fn mlp_function(size: usize) -> Function {
    let mut b = FunctionBuilder::new("mlp");
    let x = b.parameter("x", DataType::F32, [1, size]).unwrap();
    let w = b
        .constant(HostTensor::from_vec(vec![size, size], vec![0.01f32; size * size]).unwrap())
        .unwrap();
    let mm = b
        .add(
            NodeSpec::new("MatMul", 0)
                .input(x)
                .input(w)
                .output(DataType::F32, [1, size]),
        )
        .unwrap();
    let y = b
        .add(NodeSpec::new("Relu", 0).input(mm).output(DataType::F32, [1, size]))
        .unwrap();
    b.result(y).unwrap();
    b.build().unwrap()
}

fn elementwise_function(size: usize) -> Function {
    let mut b = FunctionBuilder::new("elementwise");
    let x = b.parameter("x", DataType::F32, [size]).unwrap();
    let y = b.parameter("y", DataType::F32, [size]).unwrap();
    let sum = b
        .add(NodeSpec::new("Add", 1).input(x).input(y).output(DataType::F32, [size]))
        .unwrap();
    let product = b
        .add(NodeSpec::new("Multiply", 1).input(sum).input(y).output(DataType::F32, [size]))
        .unwrap();
    let out = b
        .add(NodeSpec::new("Tanh", 0).input(product).output(DataType::F32, [size]))
        .unwrap();
    b.result(out).unwrap();
    b.build().unwrap()
}

fn bench_elementwise_chain(c: &mut Criterion) {
    init_logging(LoggingConfig::new().with_level(LogLevel::Warn));
    let mut group = c.benchmark_group("elementwise_chain");

    for size in [100, 1000, 10000].iter() {
        let mut exe = Executable::compile(elementwise_function(*size), ExecutableConfig::default()).unwrap();
        let inputs = [
            HostTensor::from_vec(vec![*size], vec![1.0f32; *size]).unwrap(),
            HostTensor::from_vec(vec![*size], vec![0.5f32; *size]).unwrap(),
        ];
        let mut outputs = [exe.create_output_tensor(0).unwrap()];

        group.bench_with_input(BenchmarkId::new("call", size), size, |bencher, _| {
            bencher.iter(|| black_box(exe.call(&mut outputs, &inputs).unwrap()));
        });
    }

    group.finish();
}

fn bench_mlp(c: &mut Criterion) {
    let mut group = c.benchmark_group("mlp");

    for size in [16, 64, 128].iter() {
        let inputs = [HostTensor::from_vec(vec![1, *size], vec![1.0f32; *size]).unwrap()];

        let mut plain = Executable::compile(mlp_function(*size), ExecutableConfig::default()).unwrap();
        let mut outputs = [plain.create_output_tensor(0).unwrap()];
        group.bench_with_input(BenchmarkId::new("call", size), size, |bencher, _| {
            bencher.iter(|| black_box(plain.call(&mut outputs, &inputs).unwrap()));
        });

        let mut checked = Executable::compile(mlp_function(*size), ExecutableConfig::development()).unwrap();
        let mut outputs = [checked.create_output_tensor(0).unwrap()];
        group.bench_with_input(BenchmarkId::new("call_with_checks", size), size, |bencher, _| {
            bencher.iter(|| black_box(checked.call(&mut outputs, &inputs).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_elementwise_chain, bench_mlp);

criterion_main!(benches);
