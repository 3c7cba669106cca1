//! Average and max pooling over `[batch, channel, spatial...]` tensors.

use crate::convolution::{window_output_spatial, window_taps, ConvParams};
use crate::error::{KernelError, Result};
use refgraph_core::shape::shape_size;
use refgraph_core::Element;

/// Window geometry of a pooling op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolParams {
    /// Window extent per spatial axis
    pub window_shape: Vec<usize>,
    /// Window step per spatial axis
    pub strides: Vec<usize>,
    /// Padding before the data
    pub padding_below: Vec<usize>,
    /// Padding after the data
    pub padding_above: Vec<usize>,
}

impl PoolParams {
    fn as_conv(&self) -> ConvParams {
        let rank = self.window_shape.len();
        ConvParams {
            strides: self.strides.clone(),
            dilations: vec![1; rank],
            padding_below: self.padding_below.iter().map(|&p| p as i64).collect(),
            padding_above: self.padding_above.iter().map(|&p| p as i64).collect(),
            data_dilation: vec![1; rank],
        }
    }
}

/// Output shape of a pooling op.
pub fn pool_output_shape(in_shape: &[usize], params: &PoolParams) -> Result<Vec<usize>> {
    if in_shape.len() != params.window_shape.len() + 2 {
        return Err(KernelError::invalid(format!(
            "pooling window {:?} does not match input {:?}",
            params.window_shape, in_shape
        )));
    }
    let mut shape = in_shape[..2].to_vec();
    shape.extend(window_output_spatial(&in_shape[2..], &params.window_shape, &params.as_conv())?);
    Ok(shape)
}

struct Windows {
    planes: usize,
    in_block: usize,
    out_block: usize,
    taps: Vec<Vec<(usize, usize)>>,
}

impl Windows {
    fn new(in_shape: &[usize], out_shape: &[usize], params: &PoolParams) -> Result<Self> {
        let expected = pool_output_shape(in_shape, params)?;
        if expected != out_shape {
            return Err(KernelError::invalid(format!(
                "pooling output shape {:?} should be {:?}",
                out_shape, expected
            )));
        }
        Ok(Self {
            planes: in_shape[0] * in_shape[1],
            in_block: shape_size(&in_shape[2..]),
            out_block: shape_size(&out_shape[2..]),
            taps: window_taps(&in_shape[2..], &params.window_shape, &out_shape[2..], &params.as_conv()),
        })
    }

    fn divisor(&self, q: usize, window_size: usize, include_padding: bool) -> usize {
        if include_padding {
            window_size
        } else {
            self.taps[q].len()
        }
    }
}

fn check_len<T>(what: &str, data: &[T], shape: &[usize]) -> Result<()> {
    if data.len() != shape_size(shape) {
        return Err(KernelError::invalid(format!("pooling {what} does not match its shape")));
    }
    Ok(())
}

/// Average pooling. Windows that only cover padding produce zero.
pub fn avg_pool<T: Element>(
    arg: &[T],
    out: &mut [T],
    in_shape: &[usize],
    out_shape: &[usize],
    params: &PoolParams,
    include_padding: bool,
) -> Result<()> {
    check_len("input", arg, in_shape)?;
    check_len("output", out, out_shape)?;
    let windows = Windows::new(in_shape, out_shape, params)?;
    let window_size = shape_size(&params.window_shape);
    for p in 0..windows.planes {
        let in_base = p * windows.in_block;
        for (q, taps) in windows.taps.iter().enumerate() {
            let sum: f64 = taps.iter().map(|&(_, d)| arg[in_base + d].to_f64()).sum();
            let n = windows.divisor(q, window_size, include_padding);
            out[p * windows.out_block + q] = if n == 0 { T::zero() } else { T::from_f64(sum / n as f64) };
        }
    }
    Ok(())
}

/// Max pooling. Windows that only cover padding produce the lowest value.
pub fn max_pool<T: Element>(
    arg: &[T],
    out: &mut [T],
    in_shape: &[usize],
    out_shape: &[usize],
    params: &PoolParams,
) -> Result<()> {
    check_len("input", arg, in_shape)?;
    check_len("output", out, out_shape)?;
    let windows = Windows::new(in_shape, out_shape, params)?;
    for p in 0..windows.planes {
        let in_base = p * windows.in_block;
        for (q, taps) in windows.taps.iter().enumerate() {
            out[p * windows.out_block + q] = taps.iter().fold(T::lowest(), |m, &(_, d)| {
                let v = arg[in_base + d];
                if v > m {
                    v
                } else {
                    m
                }
            });
        }
    }
    Ok(())
}

/// Gradient of [`avg_pool`]: each delta is spread evenly over its window.
pub fn avg_pool_backprop<T: Element>(
    delta: &[T],
    out: &mut [T],
    delta_shape: &[usize],
    forward_shape: &[usize],
    params: &PoolParams,
    include_padding: bool,
) -> Result<()> {
    check_len("delta", delta, delta_shape)?;
    check_len("output", out, forward_shape)?;
    let windows = Windows::new(forward_shape, delta_shape, params)?;
    let window_size = shape_size(&params.window_shape);
    out.fill(T::zero());
    for p in 0..windows.planes {
        let out_base = p * windows.in_block;
        for (q, taps) in windows.taps.iter().enumerate() {
            let n = windows.divisor(q, window_size, include_padding);
            if n == 0 {
                continue;
            }
            let share = delta[p * windows.out_block + q].to_f64() / n as f64;
            for &(_, d) in taps {
                let slot = &mut out[out_base + d];
                *slot = T::from_f64(slot.to_f64() + share);
            }
        }
    }
    Ok(())
}

/// Gradient of [`max_pool`]: each delta goes to the first maximum of its
/// window in the forward input.
pub fn max_pool_backprop<T: Element>(
    forward_arg: &[T],
    delta: &[T],
    out: &mut [T],
    forward_shape: &[usize],
    delta_shape: &[usize],
    params: &PoolParams,
) -> Result<()> {
    check_len("input", forward_arg, forward_shape)?;
    check_len("delta", delta, delta_shape)?;
    check_len("output", out, forward_shape)?;
    let windows = Windows::new(forward_shape, delta_shape, params)?;
    out.fill(T::zero());
    for p in 0..windows.planes {
        let base = p * windows.in_block;
        for (q, taps) in windows.taps.iter().enumerate() {
            let mut best: Option<usize> = None;
            for &(_, d) in taps {
                match best {
                    Some(b) if forward_arg[base + d] <= forward_arg[base + b] => {}
                    _ => best = Some(d),
                }
            }
            if let Some(b) = best {
                let slot = &mut out[base + b];
                *slot = slot.add(delta[p * windows.out_block + q]);
            }
        }
    }
    Ok(())
}
