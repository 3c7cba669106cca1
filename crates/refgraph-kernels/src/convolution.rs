//! N-dimensional convolution over `[batch, channel, spatial...]` tensors,
//! with filter and data dilation, padding, both backprop directions and a
//! quantized forward pass.

use crate::error::{KernelError, Result};
use crate::quantization::QuantParams;
use rayon::prelude::*;
use refgraph_core::shape::{row_major_strides, shape_size, CoordinateIter};
use refgraph_core::Element;

const PAR_CHUNK_THRESHOLD: usize = 16;

/// Window geometry of a convolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvParams {
    /// Step between output positions, per spatial axis
    pub strides: Vec<usize>,
    /// Spacing between filter taps, per spatial axis
    pub dilations: Vec<usize>,
    /// Padding before the data, per spatial axis
    pub padding_below: Vec<i64>,
    /// Padding after the data, per spatial axis
    pub padding_above: Vec<i64>,
    /// Spacing between data elements, per spatial axis
    pub data_dilation: Vec<usize>,
}

impl ConvParams {
    /// Unit strides and dilations with no padding.
    pub fn unit(spatial_rank: usize) -> Self {
        Self {
            strides: vec![1; spatial_rank],
            dilations: vec![1; spatial_rank],
            padding_below: vec![0; spatial_rank],
            padding_above: vec![0; spatial_rank],
            data_dilation: vec![1; spatial_rank],
        }
    }

    fn check(&self, spatial_rank: usize) -> Result<()> {
        let lens = [
            self.strides.len(),
            self.dilations.len(),
            self.padding_below.len(),
            self.padding_above.len(),
            self.data_dilation.len(),
        ];
        if lens.iter().any(|&l| l != spatial_rank) {
            return Err(KernelError::invalid(format!(
                "window parameters do not match spatial rank {spatial_rank}"
            )));
        }
        if self.strides.iter().chain(&self.dilations).chain(&self.data_dilation).any(|&v| v == 0) {
            return Err(KernelError::invalid("strides and dilations must be positive"));
        }
        Ok(())
    }
}

/// Spatial output extents of a sliding window.
pub(crate) fn window_output_spatial(
    data_spatial: &[usize],
    window_spatial: &[usize],
    params: &ConvParams,
) -> Result<Vec<usize>> {
    params.check(data_spatial.len())?;
    (0..data_spatial.len())
        .map(|i| {
            let d = data_spatial[i] as i64;
            let dilated_data = if d == 0 { 0 } else { (d - 1) * params.data_dilation[i] as i64 + 1 };
            let padded = dilated_data + params.padding_below[i] + params.padding_above[i];
            let w = window_spatial[i] as i64;
            let dilated_window = if w == 0 { 0 } else { (w - 1) * params.dilations[i] as i64 + 1 };
            if dilated_window == 0 || padded < dilated_window {
                return Err(KernelError::invalid(format!(
                    "window {} does not fit padded extent {} on spatial axis {}",
                    dilated_window, padded, i
                )));
            }
            Ok(((padded - dilated_window) / params.strides[i] as i64 + 1) as usize)
        })
        .collect()
}

/// For every output position, the `(window offset, data offset)` pairs that
/// land on real data. Offsets are flat within the spatial block.
pub(crate) fn window_taps(
    data_spatial: &[usize],
    window_spatial: &[usize],
    out_spatial: &[usize],
    params: &ConvParams,
) -> Vec<Vec<(usize, usize)>> {
    let data_strides = row_major_strides(data_spatial);
    let window_coords: Vec<Vec<usize>> = CoordinateIter::new(window_spatial).collect();
    CoordinateIter::new(out_spatial)
        .map(|q| {
            window_coords
                .iter()
                .enumerate()
                .filter_map(|(w_off, w)| {
                    let mut d_off = 0;
                    for axis in 0..q.len() {
                        let pos = (q[axis] * params.strides[axis]) as i64
                            + (w[axis] * params.dilations[axis]) as i64
                            - params.padding_below[axis];
                        let dd = params.data_dilation[axis] as i64;
                        if pos < 0 || pos % dd != 0 {
                            return None;
                        }
                        let idx = (pos / dd) as usize;
                        if idx >= data_spatial[axis] {
                            return None;
                        }
                        d_off += idx * data_strides[axis];
                    }
                    Some((w_off, d_off))
                })
                .collect()
        })
        .collect()
}

/// Output shape of a forward convolution.
pub fn conv_output_shape(
    data_shape: &[usize],
    filters_shape: &[usize],
    params: &ConvParams,
) -> Result<Vec<usize>> {
    if data_shape.len() < 2 || data_shape.len() != filters_shape.len() {
        return Err(KernelError::invalid(format!(
            "convolution needs [N, C, ...] data and [O, C, ...] filters, got {:?} and {:?}",
            data_shape, filters_shape
        )));
    }
    if data_shape[1] != filters_shape[1] {
        return Err(KernelError::invalid(format!(
            "data has {} channels but filters expect {}",
            data_shape[1], filters_shape[1]
        )));
    }
    let mut shape = vec![data_shape[0], filters_shape[0]];
    shape.extend(window_output_spatial(&data_shape[2..], &filters_shape[2..], params)?);
    Ok(shape)
}

struct Layout {
    batch: usize,
    in_channels: usize,
    out_channels: usize,
    data_block: usize,
    filter_block: usize,
    out_block: usize,
    taps: Vec<Vec<(usize, usize)>>,
}

impl Layout {
    fn new(
        data_shape: &[usize],
        filters_shape: &[usize],
        out_shape: &[usize],
        params: &ConvParams,
    ) -> Result<Self> {
        let expected = conv_output_shape(data_shape, filters_shape, params)?;
        if expected != out_shape {
            return Err(KernelError::invalid(format!(
                "convolution output shape {:?} should be {:?}",
                out_shape, expected
            )));
        }
        Ok(Self {
            batch: data_shape[0],
            in_channels: data_shape[1],
            out_channels: filters_shape[0],
            data_block: shape_size(&data_shape[2..]),
            filter_block: shape_size(&filters_shape[2..]),
            out_block: shape_size(&out_shape[2..]),
            taps: window_taps(&data_shape[2..], &filters_shape[2..], &out_shape[2..], params),
        })
    }

    fn forward<D, F, O, A>(
        &self,
        data: &[D],
        filters: &[F],
        out: &mut [O],
        zero: A,
        mac: impl Fn(A, D, F) -> A + Sync,
        finish: impl Fn(A) -> O + Sync,
    ) where
        D: Copy + Sync,
        F: Copy + Sync,
        O: Send,
        A: Copy + Sync,
    {
        if self.out_block == 0 {
            return;
        }
        let plane = |(no, out_plane): (usize, &mut [O])| {
            let (n, o) = (no / self.out_channels, no % self.out_channels);
            for (q, out_value) in out_plane.iter_mut().enumerate() {
                let mut acc = zero;
                for c in 0..self.in_channels {
                    let data_base = (n * self.in_channels + c) * self.data_block;
                    let filter_base = (o * self.in_channels + c) * self.filter_block;
                    for &(f_off, d_off) in &self.taps[q] {
                        acc = mac(acc, data[data_base + d_off], filters[filter_base + f_off]);
                    }
                }
                *out_value = finish(acc);
            }
        };
        if self.batch * self.out_channels >= PAR_CHUNK_THRESHOLD {
            out.par_chunks_mut(self.out_block).enumerate().for_each(plane);
        } else {
            out.chunks_mut(self.out_block).enumerate().for_each(plane);
        }
    }
}

fn check_sizes<A, B, C>(
    a: &[A],
    a_shape: &[usize],
    b: &[B],
    b_shape: &[usize],
    out: &[C],
    out_shape: &[usize],
) -> Result<()> {
    if a.len() != shape_size(a_shape) || b.len() != shape_size(b_shape) {
        return Err(KernelError::invalid("convolution operand does not match its shape"));
    }
    if out.len() != shape_size(out_shape) {
        return Err(KernelError::invalid("convolution output has the wrong size"));
    }
    Ok(())
}

/// Forward convolution.
pub fn convolution<T: Element>(
    data: &[T],
    filters: &[T],
    out: &mut [T],
    data_shape: &[usize],
    filters_shape: &[usize],
    out_shape: &[usize],
    params: &ConvParams,
) -> Result<()> {
    check_sizes(data, data_shape, filters, filters_shape, out, out_shape)?;
    let layout = Layout::new(data_shape, filters_shape, out_shape, params)?;
    layout.forward(data, filters, out, T::zero(), |acc, d, f| acc.add(d.mul(f)), |acc| acc);
    Ok(())
}

/// Quantized forward convolution with integer accumulation.
#[allow(clippy::too_many_arguments)]
pub fn quantized_convolution<I: Element, F: Element, O: Element>(
    data: &[I],
    filters: &[F],
    out: &mut [O],
    data_shape: &[usize],
    filters_shape: &[usize],
    out_shape: &[usize],
    params: &ConvParams,
    quant: &QuantParams,
) -> Result<()> {
    check_sizes(data, data_shape, filters, filters_shape, out, out_shape)?;
    let layout = Layout::new(data_shape, filters_shape, out_shape, params)?;
    layout.forward(
        data,
        filters,
        out,
        0i64,
        |acc, d, f| {
            acc + (d.to_i64() - quant.input_zero_point) * (f.to_i64() - quant.filter_zero_point)
        },
        |acc| quant.requantize(acc),
    );
    Ok(())
}

/// Gradient of a convolution with respect to its data. `data_shape` is the
/// shape of the forward data batch and of the output.
#[allow(clippy::too_many_arguments)]
pub fn convolution_backprop_data<T: Element>(
    filters: &[T],
    delta: &[T],
    out: &mut [T],
    filters_shape: &[usize],
    delta_shape: &[usize],
    data_shape: &[usize],
    params: &ConvParams,
) -> Result<()> {
    check_sizes(filters, filters_shape, delta, delta_shape, out, data_shape)?;
    let layout = Layout::new(data_shape, filters_shape, delta_shape, params)?;
    out.fill(T::zero());
    for n in 0..layout.batch {
        for o in 0..layout.out_channels {
            let delta_base = (n * layout.out_channels + o) * layout.out_block;
            for (q, taps) in layout.taps.iter().enumerate() {
                let d = delta[delta_base + q];
                for c in 0..layout.in_channels {
                    let out_base = (n * layout.in_channels + c) * layout.data_block;
                    let filter_base = (o * layout.in_channels + c) * layout.filter_block;
                    for &(f_off, d_off) in taps {
                        let slot = &mut out[out_base + d_off];
                        *slot = slot.add(d.mul(filters[filter_base + f_off]));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Gradient of a convolution with respect to its filters.
#[allow(clippy::too_many_arguments)]
pub fn convolution_backprop_filters<T: Element>(
    data: &[T],
    delta: &[T],
    out: &mut [T],
    data_shape: &[usize],
    delta_shape: &[usize],
    filters_shape: &[usize],
    params: &ConvParams,
) -> Result<()> {
    check_sizes(data, data_shape, delta, delta_shape, out, filters_shape)?;
    let layout = Layout::new(data_shape, filters_shape, delta_shape, params)?;
    out.fill(T::zero());
    for n in 0..layout.batch {
        for o in 0..layout.out_channels {
            let delta_base = (n * layout.out_channels + o) * layout.out_block;
            for (q, taps) in layout.taps.iter().enumerate() {
                let d = delta[delta_base + q];
                for c in 0..layout.in_channels {
                    let data_base = (n * layout.in_channels + c) * layout.data_block;
                    let out_base = (o * layout.in_channels + c) * layout.filter_block;
                    for &(f_off, d_off) in taps {
                        let slot = &mut out[out_base + f_off];
                        *slot = slot.add(d.mul(data[data_base + d_off]));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_shape_with_padding_and_stride() -> Result<()> {
        let params = ConvParams {
            strides: vec![2, 2],
            padding_below: vec![1, 1],
            padding_above: vec![1, 1],
            ..ConvParams::unit(2)
        };
        assert_eq!(conv_output_shape(&[1, 3, 5, 5], &[4, 3, 3, 3], &params)?, vec![1, 4, 3, 3]);
        assert!(conv_output_shape(&[1, 2, 5, 5], &[4, 3, 3, 3], &params).is_err());
        Ok(())
    }

    #[test]
    fn test_1d_convolution() -> Result<()> {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let filters = [1.0f32, 0.0, -1.0];
        let mut out = [0.0f32; 2];
        convolution(&data, &filters, &mut out, &[1, 1, 4], &[1, 1, 3], &[1, 1, 2], &ConvParams::unit(1))?;
        assert_eq!(out, [-2.0, -2.0]);
        Ok(())
    }

    #[test]
    fn test_padding_and_filter_dilation() -> Result<()> {
        let params = ConvParams {
            dilations: vec![2],
            padding_below: vec![1],
            padding_above: vec![1],
            ..ConvParams::unit(1)
        };
        // padded data: [0, 1, 2, 3, 0]; taps at 0 and 2
        let mut out = [0; 3];
        convolution(&[1, 2, 3], &[1, 1], &mut out, &[1, 1, 3], &[1, 1, 2], &[1, 1, 3], &params)?;
        assert_eq!(out, [2, 4, 2]);
        Ok(())
    }

    #[test]
    fn test_data_dilation() -> Result<()> {
        let params = ConvParams {
            data_dilation: vec![2],
            ..ConvParams::unit(1)
        };
        // dilated data: [1, 0, 2, 0, 3]
        let mut out = [0; 4];
        convolution(&[1, 2, 3], &[1, 10], &mut out, &[1, 1, 3], &[1, 1, 2], &[1, 1, 4], &params)?;
        assert_eq!(out, [1, 20, 2, 30]);
        Ok(())
    }

    #[test]
    fn test_backprop_data_is_transpose_of_forward() -> Result<()> {
        let filters = [1.0f64, 2.0];
        let delta = [1.0f64, 1.0, 1.0];
        let mut out = [0.0f64; 4];
        convolution_backprop_data(
            &filters,
            &delta,
            &mut out,
            &[1, 1, 2],
            &[1, 1, 3],
            &[1, 1, 4],
            &ConvParams::unit(1),
        )?;
        assert_eq!(out, [1.0, 3.0, 3.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_backprop_filters() -> Result<()> {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let delta = [1.0f32, 1.0, 1.0];
        let mut out = [0.0f32; 2];
        convolution_backprop_filters(
            &data,
            &delta,
            &mut out,
            &[1, 1, 4],
            &[1, 1, 3],
            &[1, 1, 2],
            &ConvParams::unit(1),
        )?;
        assert_eq!(out, [6.0, 9.0]);
        Ok(())
    }

    #[test]
    fn test_quantized_convolution() -> Result<()> {
        let quant = QuantParams {
            input_scale: 1.0,
            input_zero_point: 2,
            filter_scale: 1.0,
            filter_zero_point: 0,
            output_scale: 1.0,
            output_zero_point: 0,
        };
        let mut out = [0i8; 2];
        quantized_convolution(
            &[3u8, 4, 5],
            &[1i8, -1],
            &mut out,
            &[1, 1, 3],
            &[1, 1, 2],
            &[1, 1, 2],
            &ConvParams::unit(1),
            &quant,
        )?;
        assert_eq!(out, [-1, -1]);
        Ok(())
    }

    #[test]
    fn test_multi_channel_parallel_path() -> Result<()> {
        // 4 batches x 4 output channels crosses the parallel threshold.
        let data = vec![1i32; 4 * 2 * 3];
        let filters = vec![1i32; 4 * 2 * 2];
        let mut out = vec![0i32; 4 * 4 * 2];
        convolution(&data, &filters, &mut out, &[4, 2, 3], &[4, 2, 2], &[4, 4, 2], &ConvParams::unit(1))?;
        assert!(out.iter().all(|&v| v == 4));
        Ok(())
    }
}
