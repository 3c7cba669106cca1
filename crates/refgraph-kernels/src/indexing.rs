//! Gather, scatter and embedding kernels. Index tensors may hold any
//! [`Element`]; values are read as integers and negative indices count from
//! the end of the indexed axis.

use crate::error::{KernelError, Result};
use refgraph_core::shape::{row_major_strides, shape_size};
use refgraph_core::Element;

fn resolve(what: &'static str, raw: i64, bound: usize) -> Result<usize> {
    let index = if raw < 0 { raw + bound as i64 } else { raw };
    if index < 0 || index >= bound as i64 {
        return Err(KernelError::IndexOutOfRange {
            what,
            index: raw,
            bound,
        });
    }
    Ok(index as usize)
}

fn check_len<T>(what: &str, data: &[T], shape: &[usize]) -> Result<()> {
    if data.len() != shape_size(shape) {
        return Err(KernelError::invalid(format!(
            "{} holds {} elements but its shape is {:?}",
            what,
            data.len(),
            shape
        )));
    }
    Ok(())
}

/// Shape of a gather along `axis`.
pub fn gather_shape(params_shape: &[usize], indices_shape: &[usize], axis: usize) -> Vec<usize> {
    let mut shape = params_shape[..axis].to_vec();
    shape.extend_from_slice(indices_shape);
    shape.extend_from_slice(&params_shape[axis + 1..]);
    shape
}

/// Take slices of `params` along `axis` at the positions in `indices`.
pub fn gather<T: Element, I: Element>(
    params: &[T],
    indices: &[I],
    out: &mut [T],
    params_shape: &[usize],
    indices_shape: &[usize],
    axis: usize,
) -> Result<()> {
    check_len("params", params, params_shape)?;
    check_len("indices", indices, indices_shape)?;
    if axis >= params_shape.len() {
        return Err(KernelError::invalid(format!(
            "gather axis {} is out of range for {:?}",
            axis, params_shape
        )));
    }
    check_len("output", out, &gather_shape(params_shape, indices_shape, axis))?;

    let outer: usize = params_shape[..axis].iter().product();
    let extent = params_shape[axis];
    let inner: usize = params_shape[axis + 1..].iter().product();
    let mut o = 0;
    for outer_index in 0..outer {
        for &raw in indices {
            let i = resolve("gather", raw.to_i64(), extent)?;
            let start = (outer_index * extent + i) * inner;
            out[o..o + inner].copy_from_slice(&params[start..start + inner]);
            o += inner;
        }
    }
    Ok(())
}

/// Shape of a gather-nd.
pub fn gather_nd_shape(params_shape: &[usize], indices_shape: &[usize]) -> Result<Vec<usize>> {
    let depth = *indices_shape
        .last()
        .ok_or_else(|| KernelError::invalid("gather-nd indices must have rank >= 1"))?;
    if depth > params_shape.len() {
        return Err(KernelError::invalid(format!(
            "index depth {} exceeds params rank {}",
            depth,
            params_shape.len()
        )));
    }
    let mut shape = indices_shape[..indices_shape.len() - 1].to_vec();
    shape.extend_from_slice(&params_shape[depth..]);
    Ok(shape)
}

// Flat offsets of the slices addressed by each index tuple.
fn tuple_offsets<I: Element>(
    what: &'static str,
    indices: &[I],
    depth: usize,
    shape: &[usize],
) -> Result<Vec<usize>> {
    let strides = row_major_strides(shape);
    if depth == 0 {
        return Ok(vec![0; indices.len().max(1)]);
    }
    indices
        .chunks(depth)
        .map(|tuple| {
            tuple.iter().enumerate().try_fold(0usize, |acc, (axis, raw)| {
                Ok(acc + resolve(what, raw.to_i64(), shape[axis])? * strides[axis])
            })
        })
        .collect()
}

/// Gather slices addressed by the innermost index tuples.
pub fn gather_nd<T: Element, I: Element>(
    params: &[T],
    indices: &[I],
    out: &mut [T],
    params_shape: &[usize],
    indices_shape: &[usize],
) -> Result<()> {
    check_len("params", params, params_shape)?;
    check_len("indices", indices, indices_shape)?;
    let out_shape = gather_nd_shape(params_shape, indices_shape)?;
    check_len("output", out, &out_shape)?;
    let depth = indices_shape[indices_shape.len() - 1];
    let slice: usize = params_shape[depth..].iter().product();
    let starts = tuple_offsets("gather-nd", indices, depth, params_shape)?;
    for (chunk, start) in out.chunks_mut(slice.max(1)).zip(starts) {
        chunk.copy_from_slice(&params[start..start + chunk.len()]);
    }
    Ok(())
}

/// Copy `inputs` and add `updates` at the first-axis positions in
/// `indices`. `updates` has shape `indices_shape ++ inputs_shape[1..]`.
#[allow(clippy::too_many_arguments)]
pub fn scatter_add<T: Element, I: Element>(
    inputs: &[T],
    indices: &[I],
    updates: &[T],
    out: &mut [T],
    inputs_shape: &[usize],
    indices_shape: &[usize],
    updates_shape: &[usize],
) -> Result<()> {
    check_len("inputs", inputs, inputs_shape)?;
    check_len("indices", indices, indices_shape)?;
    check_len("updates", updates, updates_shape)?;
    check_len("output", out, inputs_shape)?;
    if inputs_shape.is_empty() {
        return Err(KernelError::invalid("scatter-add inputs must have rank >= 1"));
    }
    let mut expected = indices_shape.to_vec();
    expected.extend_from_slice(&inputs_shape[1..]);
    if expected != updates_shape {
        return Err(KernelError::invalid(format!(
            "updates shape {:?} should be {:?}",
            updates_shape, expected
        )));
    }
    let slice: usize = inputs_shape[1..].iter().product();
    out.copy_from_slice(inputs);
    for (k, &raw) in indices.iter().enumerate() {
        let row = resolve("scatter-add", raw.to_i64(), inputs_shape[0])?;
        let dst = &mut out[row * slice..(row + 1) * slice];
        let src = &updates[k * slice..(k + 1) * slice];
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = d.add(s);
        }
    }
    Ok(())
}

/// Copy `inputs` and add `updates` at the slices addressed by the innermost
/// index tuples.
#[allow(clippy::too_many_arguments)]
pub fn scatter_nd_add<T: Element, I: Element>(
    inputs: &[T],
    indices: &[I],
    updates: &[T],
    out: &mut [T],
    inputs_shape: &[usize],
    indices_shape: &[usize],
    updates_shape: &[usize],
) -> Result<()> {
    check_len("inputs", inputs, inputs_shape)?;
    check_len("indices", indices, indices_shape)?;
    check_len("updates", updates, updates_shape)?;
    check_len("output", out, inputs_shape)?;
    let expected = gather_nd_shape(inputs_shape, indices_shape)?;
    if expected != updates_shape {
        return Err(KernelError::invalid(format!(
            "updates shape {:?} should be {:?}",
            updates_shape, expected
        )));
    }
    let depth = indices_shape[indices_shape.len() - 1];
    let slice: usize = inputs_shape[depth..].iter().product();
    let starts = tuple_offsets("scatter-nd-add", indices, depth, inputs_shape)?;
    out.copy_from_slice(inputs);
    for (src, start) in updates.chunks(slice.max(1)).zip(starts) {
        for (d, &s) in out[start..start + src.len()].iter_mut().zip(src) {
            *d = d.add(s);
        }
    }
    Ok(())
}

/// Look up rows of `weights` for each index. Float indices are truncated.
pub fn embedding<T: Element, I: Element>(
    indices: &[I],
    weights: &[T],
    out: &mut [T],
    weights_shape: &[usize],
) -> Result<()> {
    check_len("weights", weights, weights_shape)?;
    if weights_shape.len() != 2 {
        return Err(KernelError::invalid("embedding weights must be a matrix"));
    }
    let (rows, width) = (weights_shape[0], weights_shape[1]);
    if out.len() != indices.len() * width {
        return Err(KernelError::invalid("embedding output has the wrong size"));
    }
    for (chunk, &raw) in out.chunks_mut(width.max(1)).zip(indices) {
        let row = resolve("embedding", raw.to_i64(), rows)?;
        chunk.copy_from_slice(&weights[row * width..(row + 1) * width]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_axis_zero_and_one() -> Result<()> {
        let params = [1, 2, 3, 4, 5, 6];
        let mut out = [0; 4];
        gather(&params, &[2i64, 0], &mut out, &[3, 2], &[2], 0)?;
        assert_eq!(out, [5, 6, 1, 2]);
        let mut out = [0; 3];
        gather(&params, &[-1i32], &mut out, &[3, 2], &[1], 1)?;
        assert_eq!(out, [2, 4, 6]);
        assert!(gather(&params, &[3i32], &mut [0; 2], &[3, 2], &[1], 0).is_err());
        Ok(())
    }

    #[test]
    fn test_gather_nd_pairs_and_rows() -> Result<()> {
        let params = [1, 2, 3, 4];
        let mut out = [0; 2];
        gather_nd(&params, &[0i32, 1, 1, 0], &mut out, &[2, 2], &[2, 2])?;
        assert_eq!(out, [2, 3]);
        let mut out = [0; 2];
        gather_nd(&params, &[1i64], &mut out, &[2, 2], &[1])?;
        assert_eq!(out, [3, 4]);
        Ok(())
    }

    #[test]
    fn test_scatter_add_accumulates_duplicates() -> Result<()> {
        let mut out = [0.0f32; 4];
        scatter_add(
            &[1.0, 1.0, 1.0, 1.0],
            &[1i32, 1],
            &[10.0, 20.0, 30.0, 40.0],
            &mut out,
            &[2, 2],
            &[2],
            &[2, 2],
        )?;
        assert_eq!(out, [1.0, 1.0, 41.0, 61.0]);
        Ok(())
    }

    #[test]
    fn test_scatter_nd_add() -> Result<()> {
        let mut out = [0; 4];
        scatter_nd_add(&[0, 0, 0, 0], &[1i64, 0], &[5], &mut out, &[2, 2], &[1, 2], &[1])?;
        assert_eq!(out, [0, 0, 5, 0]);
        Ok(())
    }

    #[test]
    fn test_embedding_with_float_indices() -> Result<()> {
        let weights = [0.0f32, 0.1, 1.0, 1.1, 2.0, 2.1];
        let mut out = [0.0f32; 4];
        embedding(&[2.0f32, 0.0], &weights, &mut out, &[3, 2])?;
        assert_eq!(out, [2.0, 2.1, 0.0, 0.1]);
        Ok(())
    }
}
