//! Batch normalization (channel axis 1) and local response normalization.

use crate::error::{KernelError, Result};
use refgraph_core::shape::{row_major_strides, shape_size, AxisSet, CoordinateIter};
use refgraph_core::Element;

struct Channels {
    batch: usize,
    count: usize,
    block: usize,
}

impl Channels {
    fn new(shape: &[usize]) -> Result<Self> {
        if shape.len() < 2 {
            return Err(KernelError::invalid(format!(
                "batch norm input must be [N, C, ...], got {:?}",
                shape
            )));
        }
        Ok(Self {
            batch: shape[0],
            count: shape[1],
            block: shape_size(&shape[2..]),
        })
    }

    fn per_channel(&self) -> usize {
        self.batch * self.block
    }

    /// Flat offsets of every element in channel `c`.
    fn offsets(&self, c: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.batch).flat_map(move |n| {
            let base = (n * self.count + c) * self.block;
            base..base + self.block
        })
    }

    fn check<T>(&self, what: &str, values: &[T]) -> Result<()> {
        if values.len() != self.count {
            return Err(KernelError::invalid(format!(
                "batch norm {} needs {} channel values, got {}",
                what,
                self.count,
                values.len()
            )));
        }
        Ok(())
    }
}

fn mean_and_variance<T: Element>(input: &[T], channels: &Channels, c: usize) -> (f64, f64) {
    let n = channels.per_channel().max(1) as f64;
    let mean = channels.offsets(c).map(|i| input[i].to_f64()).sum::<f64>() / n;
    let variance = channels
        .offsets(c)
        .map(|i| {
            let d = input[i].to_f64() - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, variance)
}

/// Normalize with batch statistics. Writes the normalized tensor and the
/// per-channel mean and biased variance.
#[allow(clippy::too_many_arguments)]
pub fn batch_norm_training<T: Element>(
    eps: f64,
    gamma: &[T],
    beta: &[T],
    input: &[T],
    out: &mut [T],
    mean_out: &mut [T],
    variance_out: &mut [T],
    shape: &[usize],
) -> Result<()> {
    let channels = Channels::new(shape)?;
    channels.check("gamma", gamma)?;
    channels.check("beta", beta)?;
    channels.check("mean", mean_out)?;
    channels.check("variance", variance_out)?;
    if input.len() != shape_size(shape) || out.len() != input.len() {
        return Err(KernelError::invalid("batch norm input does not match its shape"));
    }
    for c in 0..channels.count {
        let (mean, variance) = mean_and_variance(input, &channels, c);
        let scale = gamma[c].to_f64() / (variance + eps).sqrt();
        for i in channels.offsets(c) {
            out[i] = T::from_f64((input[i].to_f64() - mean) * scale + beta[c].to_f64());
        }
        mean_out[c] = T::from_f64(mean);
        variance_out[c] = T::from_f64(variance);
    }
    Ok(())
}

/// Normalize with supplied statistics.
#[allow(clippy::too_many_arguments)]
pub fn batch_norm_inference<T: Element>(
    eps: f64,
    gamma: &[T],
    beta: &[T],
    input: &[T],
    mean: &[T],
    variance: &[T],
    out: &mut [T],
    shape: &[usize],
) -> Result<()> {
    let channels = Channels::new(shape)?;
    for (what, values) in [("gamma", gamma), ("beta", beta), ("mean", mean), ("variance", variance)] {
        channels.check(what, values)?;
    }
    if input.len() != shape_size(shape) || out.len() != input.len() {
        return Err(KernelError::invalid("batch norm input does not match its shape"));
    }
    for c in 0..channels.count {
        let m = mean[c].to_f64();
        let scale = gamma[c].to_f64() / (variance[c].to_f64() + eps).sqrt();
        for i in channels.offsets(c) {
            out[i] = T::from_f64((input[i].to_f64() - m) * scale + beta[c].to_f64());
        }
    }
    Ok(())
}

/// Gradients of [`batch_norm_training`] with respect to input, gamma and beta.
#[allow(clippy::too_many_arguments)]
pub fn batch_norm_backprop<T: Element>(
    eps: f64,
    gamma: &[T],
    beta: &[T],
    input: &[T],
    mean: &[T],
    variance: &[T],
    delta: &[T],
    d_input: &mut [T],
    d_gamma: &mut [T],
    d_beta: &mut [T],
    shape: &[usize],
) -> Result<()> {
    let channels = Channels::new(shape)?;
    for (what, values) in [("gamma", gamma), ("beta", beta), ("mean", mean), ("variance", variance)] {
        channels.check(what, values)?;
    }
    channels.check("gamma gradient", d_gamma)?;
    channels.check("beta gradient", d_beta)?;
    let size = shape_size(shape);
    if input.len() != size || delta.len() != size || d_input.len() != size {
        return Err(KernelError::invalid("batch norm backprop operands do not match the input shape"));
    }
    let n = channels.per_channel().max(1) as f64;
    for c in 0..channels.count {
        let m = mean[c].to_f64();
        let inv_std = 1.0 / (variance[c].to_f64() + eps).sqrt();
        let mut sum_delta = 0.0;
        let mut sum_delta_xhat = 0.0;
        for i in channels.offsets(c) {
            let xhat = (input[i].to_f64() - m) * inv_std;
            let d = delta[i].to_f64();
            sum_delta += d;
            sum_delta_xhat += d * xhat;
        }
        let g = gamma[c].to_f64();
        for i in channels.offsets(c) {
            let xhat = (input[i].to_f64() - m) * inv_std;
            let d = delta[i].to_f64();
            d_input[i] = T::from_f64(g * inv_std * (d - sum_delta / n - xhat * sum_delta_xhat / n));
        }
        d_gamma[c] = T::from_f64(sum_delta_xhat);
        d_beta[c] = T::from_f64(sum_delta);
    }
    Ok(())
}

/// Local response normalization over a window of `size` centred on each
/// element along every axis in `axes`:
/// `x / (bias + alpha / size^|axes| * sum(x_w^2))^beta`.
#[allow(clippy::too_many_arguments)]
pub fn lrn<T: Element>(
    arg: &[T],
    axes: &AxisSet,
    out: &mut [T],
    shape: &[usize],
    alpha: f64,
    beta: f64,
    bias: f64,
    size: usize,
) -> Result<()> {
    refgraph_core::shape::check_axes(axes, shape.len())?;
    if arg.len() != shape_size(shape) || out.len() != arg.len() {
        return Err(KernelError::invalid("lrn input and output sizes differ"));
    }
    if size == 0 {
        return Err(KernelError::invalid("lrn window size must be positive"));
    }
    let strides = row_major_strides(shape);
    let half = (size - 1) / 2;
    let alpha_over_size = alpha / (size as f64).powi(axes.len() as i32);
    for (o, coord) in CoordinateIter::new(shape).enumerate() {
        let mut window = Vec::with_capacity(shape.len());
        let mut begin = Vec::with_capacity(shape.len());
        for (axis, &c) in coord.iter().enumerate() {
            if axes.contains(&axis) {
                let start = c.saturating_sub(half);
                let end = (c + size - half).min(shape[axis]);
                begin.push(start);
                window.push(end - start);
            } else {
                begin.push(c);
                window.push(1);
            }
        }
        let square_sum: f64 = CoordinateIter::new(&window)
            .map(|w| {
                let idx: usize = w
                    .iter()
                    .zip(&begin)
                    .zip(&strides)
                    .map(|((w, b), s)| (w + b) * s)
                    .sum();
                let v = arg[idx].to_f64();
                v * v
            })
            .sum();
        let x = arg[o].to_f64();
        out[o] = T::from_f64(x / (bias + alpha_over_size * square_sum).powf(beta));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-5;

    fn approx_eq_vec(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < EPSILON)
    }

    #[test]
    fn test_training_statistics() -> Result<()> {
        // N = 2, C = 1, one element per sample
        let mut out = [0.0f64; 2];
        let mut mean = [0.0f64];
        let mut var = [0.0f64];
        batch_norm_training(0.0, &[1.0], &[0.0], &[1.0, 3.0], &mut out, &mut mean, &mut var, &[2, 1])?;
        assert_eq!(mean, [2.0]);
        assert_eq!(var, [1.0]);
        assert!(approx_eq_vec(&out, &[-1.0, 1.0]));
        Ok(())
    }

    #[test]
    fn test_inference_per_channel() -> Result<()> {
        let mut out = [0.0f32; 4];
        batch_norm_inference(
            0.0,
            &[2.0, 1.0],
            &[1.0, 0.0],
            &[1.0, 2.0, 3.0, 4.0],
            &[1.0, 3.0],
            &[4.0, 1.0],
            &mut out,
            &[1, 2, 2],
        )?;
        assert_eq!(out, [1.0, 2.0, 0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_backprop_sums() -> Result<()> {
        let mut d_input = [0.0f64; 2];
        let mut d_gamma = [0.0f64];
        let mut d_beta = [0.0f64];
        batch_norm_backprop(
            0.0,
            &[1.0],
            &[0.0],
            &[1.0, 3.0],
            &[2.0],
            &[1.0],
            &[1.0, 1.0],
            &mut d_input,
            &mut d_gamma,
            &mut d_beta,
            &[2, 1],
        )?;
        assert_eq!(d_beta, [2.0]);
        assert!(approx_eq_vec(&d_gamma, &[0.0]));
        assert!(approx_eq_vec(&d_input, &[0.0, 0.0]));
        Ok(())
    }

    #[test]
    fn test_lrn_across_channels() -> Result<()> {
        let axes: AxisSet = [1].into_iter().collect();
        let mut out = [0.0f64; 3];
        lrn(&[1.0, 2.0, 3.0], &axes, &mut out, &[1, 3], 3.0, 1.0, 1.0, 3)?;
        // window sums: 1+4, 1+4+9, 4+9; alpha / size = 1
        assert!(approx_eq_vec(&out, &[1.0 / 6.0, 2.0 / 15.0, 3.0 / 14.0]));
        Ok(())
    }

    #[test]
    fn test_channel_count_mismatch() {
        let mut out = [0.0f32; 2];
        assert!(batch_norm_inference(0.0, &[1.0], &[0.0], &[1.0, 2.0], &[0.0], &[1.0], &mut out, &[1, 2])
            .is_err());
    }
}
