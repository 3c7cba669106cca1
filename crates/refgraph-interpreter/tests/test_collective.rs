//! Distributed operators across ranks running on threads

use anyhow::Result;
use refgraph_core::{DataType, Function, FunctionBuilder, HostTensor, NodeSpec};
use refgraph_interpreter::InterpreterBackend;
use refgraph_kernels::{InProcessCommunicator, InProcessGroup};
use std::sync::Arc;
use std::thread;

fn all_reduce_function(reduce_type: &str) -> Result<Function> {
    let mut b = FunctionBuilder::new("all_reduce");
    let x = b.parameter("x", DataType::F32, [3])?;
    let reduced = b.add(
        NodeSpec::new("AllReduce", 0)
            .input(x)
            .output(DataType::F32, [3])
            .attr("reduce_type", reduce_type),
    )?;
    b.result(reduced)?;
    Ok(b.build()?)
}

fn run_rank(
    comm: InProcessCommunicator,
    function: Function,
    input: HostTensor,
) -> Result<HostTensor> {
    let backend = InterpreterBackend::new().with_communicator(Arc::new(comm));
    let mut exe = backend.compile(function)?;
    let mut out = [exe.create_output_tensor(0)?];
    exe.call(&mut out, &[input])?;
    let [out] = out;
    Ok(out)
}

fn run_group(
    size: usize,
    function: impl Fn() -> Result<Function>,
    input: impl Fn(usize) -> Result<HostTensor>,
) -> Result<Vec<HostTensor>> {
    let handles = InProcessGroup::new(size)
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            let function = function()?;
            let input = input(rank)?;
            Ok(thread::spawn(move || run_rank(comm, function, input)))
        })
        .collect::<Result<Vec<_>>>()?;
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

#[test]
fn test_all_reduce_sum_across_three_ranks() -> Result<()> {
    let outputs = run_group(
        3,
        || all_reduce_function("sum"),
        |rank| {
            let r = rank as f32;
            Ok(HostTensor::from_vec(vec![3], vec![r, r * 10.0, 1.0])?)
        },
    )?;
    for out in outputs {
        assert_eq!(out.to_vec::<f32>()?, vec![3.0, 30.0, 3.0]);
    }
    Ok(())
}

#[test]
fn test_all_reduce_max() -> Result<()> {
    let outputs = run_group(
        2,
        || all_reduce_function("max"),
        |rank| Ok(HostTensor::from_vec(vec![3], vec![rank as f32, -(rank as f32), 7.0])?),
    )?;
    for out in outputs {
        assert_eq!(out.to_vec::<f32>()?, vec![1.0, 0.0, 7.0]);
    }
    Ok(())
}

#[test]
fn test_broadcast_from_root() -> Result<()> {
    let function = || -> Result<Function> {
        let mut b = FunctionBuilder::new("broadcast");
        let x = b.parameter("x", DataType::I32, [2])?;
        let y = b.add(
            NodeSpec::new("BroadcastDistributed", 0)
                .input(x)
                .output(DataType::I32, [2])
                .attr("root_id", 1i64),
        )?;
        b.result(y)?;
        Ok(b.build()?)
    };
    let outputs = run_group(3, function, |rank| {
        let r = rank as i32;
        Ok(HostTensor::from_vec(vec![2], vec![r, r + 100])?)
    })?;
    for out in outputs {
        assert_eq!(out.to_vec::<i32>()?, vec![1, 101]);
    }
    Ok(())
}

#[test]
fn test_send_then_recv() -> Result<()> {
    let mut comms = InProcessGroup::new(2).into_iter();
    let (sender, receiver) = (comms.next().expect("rank 0"), comms.next().expect("rank 1"));

    let send = thread::spawn(move || -> Result<HostTensor> {
        let mut b = FunctionBuilder::new("send");
        let x = b.parameter("x", DataType::F64, [2])?;
        let y = b.add(
            NodeSpec::new("Send", 0)
                .input(x)
                .output(DataType::F64, [2])
                .attr("dest_id", 1i64),
        )?;
        b.result(y)?;
        run_rank(sender, b.build()?, HostTensor::from_vec(vec![2], vec![2.5f64, -1.0])?)
    });

    let recv = thread::spawn(move || -> Result<HostTensor> {
        let mut b = FunctionBuilder::new("recv");
        let x = b.parameter("x", DataType::F64, [2])?;
        let y = b.add(
            NodeSpec::new("Recv", 0)
                .input(x)
                .output(DataType::F64, [2])
                .attr("src_id", 0i64),
        )?;
        b.result(y)?;
        run_rank(receiver, b.build()?, HostTensor::from_vec(vec![2], vec![0.0f64; 2])?)
    });

    let sent = send.join().expect("sender panicked")?;
    let received = recv.join().expect("receiver panicked")?;
    assert_eq!(sent.to_vec::<f64>()?, vec![2.5, -1.0]);
    assert_eq!(received.to_vec::<f64>()?, vec![2.5, -1.0]);
    Ok(())
}

#[test]
fn test_broadcast_shorter_than_receiver_fails_without_panic() -> Result<()> {
    let function = |len: usize| -> Result<Function> {
        let mut b = FunctionBuilder::new("broadcast");
        let x = b.parameter("x", DataType::F32, [len])?;
        let y = b.add(
            NodeSpec::new("BroadcastDistributed", 0)
                .input(x)
                .output(DataType::F32, [len])
                .attr("root_id", 0i64),
        )?;
        b.result(y)?;
        Ok(b.build()?)
    };
    let mut comms = InProcessGroup::new(2).into_iter();
    let (root, peer) = (comms.next().expect("rank 0"), comms.next().expect("rank 1"));

    let root_function = function(1)?;
    let peer_function = function(3)?;
    let root = thread::spawn(move || {
        run_rank(root, root_function, HostTensor::from_vec(vec![1], vec![4.0f32]).expect("input"))
    });
    let peer = thread::spawn(move || {
        run_rank(peer, peer_function, HostTensor::from_vec(vec![3], vec![0.0f32; 3]).expect("input"))
    });

    assert_eq!(root.join().expect("root panicked")?.to_vec::<f32>()?, vec![4.0]);
    assert!(peer.join().expect("peer panicked").is_err());
    Ok(())
}
