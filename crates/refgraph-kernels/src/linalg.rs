//! Tensor dot products and matrix multiplication.
//!
//! Large products split their output rows across the rayon pool; small
//! ones stay on the calling thread.

use crate::error::{KernelError, Result};
use crate::quantization::QuantParams;
use rayon::prelude::*;
use refgraph_core::shape::shape_size;
use refgraph_core::Element;

/// Below this many output rows the row loop runs sequentially.
const PAR_ROW_THRESHOLD: usize = 64;

/// Shape of a tensor dot contracting the last `reduction_axes_count` axes
/// of `a` with the first ones of `b`.
pub fn dot_shape(a_shape: &[usize], b_shape: &[usize], reduction_axes_count: usize) -> Result<Vec<usize>> {
    let rac = reduction_axes_count;
    if rac > a_shape.len() || rac > b_shape.len() {
        return Err(KernelError::invalid(format!(
            "cannot contract {} axes of {:?} and {:?}",
            rac, a_shape, b_shape
        )));
    }
    let a_split = a_shape.len() - rac;
    if a_shape[a_split..] != b_shape[..rac] {
        return Err(KernelError::invalid(format!(
            "contracted axes of {:?} and {:?} differ",
            a_shape, b_shape
        )));
    }
    let mut shape = a_shape[..a_split].to_vec();
    shape.extend_from_slice(&b_shape[rac..]);
    Ok(shape)
}

/// Row-major `[m, k] x [k, n]` product with a caller-supplied accumulator.
fn gemm<A, B, O, Acc>(
    a: &[A],
    b: &[B],
    out: &mut [O],
    m: usize,
    k: usize,
    n: usize,
    cell: Acc,
) where
    A: Copy + Sync,
    B: Copy + Sync,
    O: Send,
    Acc: Fn(&[A], &[B], usize) -> O + Sync,
{
    if n == 0 {
        return;
    }
    let row = |(i, out_row): (usize, &mut [O])| {
        let a_row = &a[i * k..(i + 1) * k];
        for (j, o) in out_row.iter_mut().enumerate() {
            *o = cell(a_row, b, j);
        }
    };
    if m >= PAR_ROW_THRESHOLD {
        out.par_chunks_mut(n).enumerate().for_each(row);
    } else {
        out.chunks_mut(n).enumerate().for_each(row);
    }
}

/// Tensor dot product.
pub fn dot<T: Element>(
    a: &[T],
    b: &[T],
    out: &mut [T],
    a_shape: &[usize],
    b_shape: &[usize],
    reduction_axes_count: usize,
) -> Result<()> {
    let out_shape = dot_shape(a_shape, b_shape, reduction_axes_count)?;
    if a.len() != shape_size(a_shape) || b.len() != shape_size(b_shape) {
        return Err(KernelError::invalid("dot operand does not match its shape"));
    }
    if out.len() != shape_size(&out_shape) {
        return Err(KernelError::invalid("dot output has the wrong size"));
    }
    let a_split = a_shape.len() - reduction_axes_count;
    let m: usize = a_shape[..a_split].iter().product();
    let k: usize = a_shape[a_split..].iter().product();
    let n: usize = b_shape[reduction_axes_count..].iter().product();
    gemm(a, b, out, m, k, n, |a_row, b, j| {
        a_row
            .iter()
            .enumerate()
            .fold(T::zero(), |acc, (p, &x)| acc.add(x.mul(b[p * n + j])))
    });
    Ok(())
}

/// Quantized tensor dot: integer accumulation of zero-point adjusted
/// operands, then requantization to `O`.
#[allow(clippy::too_many_arguments)]
pub fn quantized_dot<I: Element, F: Element, O: Element>(
    a: &[I],
    b: &[F],
    out: &mut [O],
    a_shape: &[usize],
    b_shape: &[usize],
    reduction_axes_count: usize,
    params: &QuantParams,
) -> Result<()> {
    let out_shape = dot_shape(a_shape, b_shape, reduction_axes_count)?;
    if a.len() != shape_size(a_shape) || b.len() != shape_size(b_shape) {
        return Err(KernelError::invalid("dot operand does not match its shape"));
    }
    if out.len() != shape_size(&out_shape) {
        return Err(KernelError::invalid("dot output has the wrong size"));
    }
    let a_split = a_shape.len() - reduction_axes_count;
    let m: usize = a_shape[..a_split].iter().product();
    let k: usize = a_shape[a_split..].iter().product();
    let n: usize = b_shape[reduction_axes_count..].iter().product();
    gemm(a, b, out, m, k, n, |a_row, b, j| {
        let acc = a_row.iter().enumerate().fold(0i64, |acc, (p, &x)| {
            acc + (x.to_i64() - params.input_zero_point)
                * (b[p * n + j].to_i64() - params.filter_zero_point)
        });
        params.requantize(acc)
    });
    Ok(())
}

/// Output shape of a numpy-style matmul with optional transposes of the
/// two innermost axes. Rank-1 operands are promoted and the promoted axis
/// is dropped from the result.
pub fn matmul_shape(
    a_shape: &[usize],
    b_shape: &[usize],
    transpose_a: bool,
    transpose_b: bool,
) -> Result<Vec<usize>> {
    let plan = MatMulPlan::new(a_shape, b_shape, transpose_a, transpose_b)?;
    Ok(plan.out_shape)
}

struct MatMulPlan {
    a_mat: (usize, usize),
    b_mat: (usize, usize),
    m: usize,
    k: usize,
    n: usize,
    batch_shape: Vec<usize>,
    a_batch: Vec<usize>,
    b_batch: Vec<usize>,
    out_shape: Vec<usize>,
}

impl MatMulPlan {
    fn new(a_shape: &[usize], b_shape: &[usize], ta: bool, tb: bool) -> Result<Self> {
        if a_shape.is_empty() || b_shape.is_empty() {
            return Err(KernelError::invalid("matmul operands must have rank >= 1"));
        }
        let a_vec = a_shape.len() == 1;
        let b_vec = b_shape.len() == 1;
        let a_full: Vec<usize> = if a_vec { vec![1, a_shape[0]] } else { a_shape.to_vec() };
        let b_full: Vec<usize> = if b_vec { vec![b_shape[0], 1] } else { b_shape.to_vec() };
        let a_mat = (a_full[a_full.len() - 2], a_full[a_full.len() - 1]);
        let b_mat = (b_full[b_full.len() - 2], b_full[b_full.len() - 1]);
        let (m, ka) = if ta && !a_vec { (a_mat.1, a_mat.0) } else { a_mat };
        let (kb, n) = if tb && !b_vec { (b_mat.1, b_mat.0) } else { b_mat };
        if ka != kb {
            return Err(KernelError::invalid(format!(
                "matmul inner extents differ: {:?} and {:?}",
                a_shape, b_shape
            )));
        }
        let a_batch = a_full[..a_full.len() - 2].to_vec();
        let b_batch = b_full[..b_full.len() - 2].to_vec();
        let batch_shape = refgraph_core::shape::broadcast_shape(
            &a_batch,
            &b_batch,
            refgraph_core::AutoBroadcast::Numpy,
        )?;
        let mut out_shape = batch_shape.clone();
        if !a_vec {
            out_shape.push(m);
        }
        if !b_vec {
            out_shape.push(n);
        }
        Ok(Self {
            a_mat,
            b_mat,
            m,
            k: ka,
            n,
            batch_shape,
            a_batch,
            b_batch,
            out_shape,
        })
    }
}

// Flat batch index into an operand whose batch shape broadcasts to `full`.
fn batch_offset(index: usize, full: &[usize], own: &[usize]) -> usize {
    let coord = refgraph_core::shape::coordinate_of(index, full);
    let skip = full.len() - own.len();
    let strides = refgraph_core::shape::row_major_strides(own);
    own.iter()
        .enumerate()
        .map(|(i, &d)| if d == 1 { 0 } else { coord[skip + i] * strides[i] })
        .sum()
}

/// Batched matrix multiplication with numpy broadcasting of batch axes.
pub fn matmul<T: Element>(
    a: &[T],
    b: &[T],
    out: &mut [T],
    a_shape: &[usize],
    b_shape: &[usize],
    transpose_a: bool,
    transpose_b: bool,
) -> Result<()> {
    let plan = MatMulPlan::new(a_shape, b_shape, transpose_a, transpose_b)?;
    if a.len() != shape_size(a_shape) || b.len() != shape_size(b_shape) {
        return Err(KernelError::invalid("matmul operand does not match its shape"));
    }
    if out.len() != shape_size(&plan.out_shape) {
        return Err(KernelError::invalid("matmul output has the wrong size"));
    }
    let (m, k, n) = (plan.m, plan.k, plan.n);
    let a_size = plan.a_mat.0 * plan.a_mat.1;
    let b_size = plan.b_mat.0 * plan.b_mat.1;
    let ta = transpose_a && a_shape.len() > 1;
    let tb = transpose_b && b_shape.len() > 1;
    let mut a_tmp = vec![T::zero(); m * k];
    let mut b_tmp = vec![T::zero(); k * n];
    for batch in 0..shape_size(&plan.batch_shape) {
        let a_mat = &a[batch_offset(batch, &plan.batch_shape, &plan.a_batch) * a_size..][..a_size];
        let b_mat = &b[batch_offset(batch, &plan.batch_shape, &plan.b_batch) * b_size..][..b_size];
        // Normalize both operands to row-major [m, k] and [k, n].
        for i in 0..m {
            for p in 0..k {
                a_tmp[i * k + p] = if ta { a_mat[p * m + i] } else { a_mat[i * k + p] };
            }
        }
        for p in 0..k {
            for j in 0..n {
                b_tmp[p * n + j] = if tb { b_mat[j * k + p] } else { b_mat[p * n + j] };
            }
        }
        let out_mat = &mut out[batch * m * n..(batch + 1) * m * n];
        dot(&a_tmp, &b_tmp, out_mat, &[m, k], &[k, n], 1)?;
    }
    Ok(())
}

/// `[b, m, k] x [b, k, n] -> [b, m, n]`.
pub fn batch_matmul<T: Element>(
    a: &[T],
    b: &[T],
    out: &mut [T],
    a_shape: &[usize],
    b_shape: &[usize],
) -> Result<()> {
    if a_shape.len() != 3 || b_shape.len() != 3 || a_shape[0] != b_shape[0] {
        return Err(KernelError::invalid(format!(
            "batch matmul needs matching rank-3 operands, got {:?} and {:?}",
            a_shape, b_shape
        )));
    }
    matmul(a, b, out, a_shape, b_shape, false, false)
}
