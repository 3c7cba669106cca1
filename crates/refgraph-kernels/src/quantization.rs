//! Quantize, dequantize and the shared requantization step used by the
//! quantized dot and convolution kernels.

use crate::error::{KernelError, Result};
use crate::unary::round_half_even;
use refgraph_core::shape::{row_major_strides, shape_size, AxisSet, CoordinateIter};
use refgraph_core::Element;
use std::str::FromStr;

/// Rounding applied when a real value is quantized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundMode {
    /// Nearest; ties away from zero
    NearestTowardInfinity,
    /// Nearest; ties toward zero
    NearestTowardZero,
    /// Nearest; ties toward positive infinity
    NearestUpward,
    /// Nearest; ties toward negative infinity
    NearestDownward,
    /// Nearest; ties to even
    #[default]
    NearestTowardEven,
    /// Away from zero
    TowardInfinity,
    /// Truncate
    TowardZero,
    /// Ceiling
    Up,
    /// Floor
    Down,
}

impl RoundMode {
    /// Round one value.
    pub fn round(self, x: f64) -> f64 {
        let floor = x.floor();
        let is_tie = x - floor == 0.5;
        match self {
            RoundMode::NearestTowardInfinity => x.round(),
            RoundMode::NearestTowardZero => {
                if is_tie {
                    x.trunc()
                } else {
                    x.round()
                }
            }
            RoundMode::NearestUpward => {
                if is_tie {
                    floor + 1.0
                } else {
                    x.round()
                }
            }
            RoundMode::NearestDownward => {
                if is_tie {
                    floor
                } else {
                    x.round()
                }
            }
            RoundMode::NearestTowardEven => round_half_even(x),
            RoundMode::TowardInfinity => {
                if x < 0.0 {
                    x.floor()
                } else {
                    x.ceil()
                }
            }
            RoundMode::TowardZero => x.trunc(),
            RoundMode::Up => x.ceil(),
            RoundMode::Down => x.floor(),
        }
    }
}

impl FromStr for RoundMode {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        let mode = match s.to_ascii_lowercase().trim_start_matches("round_") {
            "nearest_toward_infinity" => RoundMode::NearestTowardInfinity,
            "nearest_toward_zero" => RoundMode::NearestTowardZero,
            "nearest_upward" => RoundMode::NearestUpward,
            "nearest_downward" => RoundMode::NearestDownward,
            "nearest_toward_even" => RoundMode::NearestTowardEven,
            "toward_infinity" => RoundMode::TowardInfinity,
            "toward_zero" => RoundMode::TowardZero,
            "up" => RoundMode::Up,
            "down" => RoundMode::Down,
            other => return Err(KernelError::invalid(format!("unknown round mode '{other}'"))),
        };
        Ok(mode)
    }
}

/// Saturating conversion of an already rounded value.
pub fn saturate<Q: Element>(x: f64) -> Q {
    if x.is_nan() {
        Q::zero()
    } else if x <= Q::lowest().to_f64() {
        Q::lowest()
    } else if x >= Q::highest().to_f64() {
        Q::highest()
    } else {
        Q::from_f64(x)
    }
}

/// Offsets into a per-axis parameter tensor (scale or zero point) whose
/// shape keeps only `axes` of the input shape.
fn parameter_offsets(in_shape: &[usize], axes: &AxisSet) -> Result<(Vec<usize>, usize)> {
    refgraph_core::shape::check_axes(axes, in_shape.len())?;
    let param_shape: Vec<usize> = axes.iter().map(|&a| in_shape[a]).collect();
    let param_strides = row_major_strides(&param_shape);
    let offsets = CoordinateIter::new(in_shape)
        .map(|coord| {
            axes.iter()
                .zip(&param_strides)
                .map(|(&a, s)| coord[a] * s)
                .sum()
        })
        .collect();
    Ok((offsets, shape_size(&param_shape)))
}

/// `q = round(x / scale) + zero_point`, saturated to `Q`.
#[allow(clippy::too_many_arguments)]
pub fn quantize<R: Element, Q: Element>(
    input: &[R],
    scale: &[R],
    zero_point: &[Q],
    out: &mut [Q],
    in_shape: &[usize],
    axes: &AxisSet,
    round_mode: RoundMode,
) -> Result<()> {
    if input.len() != shape_size(in_shape) || out.len() != input.len() {
        return Err(KernelError::invalid("quantize input and output sizes differ"));
    }
    let (offsets, params) = parameter_offsets(in_shape, axes)?;
    if scale.len() != params || zero_point.len() != params {
        return Err(KernelError::invalid(format!(
            "quantize expects {} scale and zero point values",
            params
        )));
    }
    for ((o, &x), p) in out.iter_mut().zip(input).zip(offsets) {
        let q = round_mode.round(x.to_f64() / scale[p].to_f64()) + zero_point[p].to_f64();
        *o = saturate(q);
    }
    Ok(())
}

/// `x = (q - zero_point) * scale`.
pub fn dequantize<Q: Element, R: Element>(
    input: &[Q],
    scale: &[R],
    zero_point: &[Q],
    out: &mut [R],
    in_shape: &[usize],
    axes: &AxisSet,
) -> Result<()> {
    if input.len() != shape_size(in_shape) || out.len() != input.len() {
        return Err(KernelError::invalid("dequantize input and output sizes differ"));
    }
    let (offsets, params) = parameter_offsets(in_shape, axes)?;
    if scale.len() != params || zero_point.len() != params {
        return Err(KernelError::invalid(format!(
            "dequantize expects {} scale and zero point values",
            params
        )));
    }
    for ((o, &q), p) in out.iter_mut().zip(input).zip(offsets) {
        *o = R::from_f64((q.to_i64() - zero_point[p].to_i64()) as f64 * scale[p].to_f64());
    }
    Ok(())
}

/// Scale and zero-point arguments of a quantized dot or convolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    /// Scale of the input operand
    pub input_scale: f64,
    /// Zero point of the input operand
    pub input_zero_point: i64,
    /// Scale of the filter operand
    pub filter_scale: f64,
    /// Zero point of the filter operand
    pub filter_zero_point: i64,
    /// Scale of the result
    pub output_scale: f64,
    /// Zero point of the result
    pub output_zero_point: i64,
}

impl QuantParams {
    /// Map an integer accumulator to the output type, rounding half to even.
    pub fn requantize<O: Element>(&self, acc: i64) -> O {
        let real = acc as f64 * self.input_scale * self.filter_scale / self.output_scale;
        saturate(round_half_even(real) + self.output_zero_point as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_modes_on_ties() {
        let cases = [
            (RoundMode::NearestTowardInfinity, 2.5, -2.5, 3.0, -3.0),
            (RoundMode::NearestTowardZero, 2.5, -2.5, 2.0, -2.0),
            (RoundMode::NearestUpward, 2.5, -2.5, 3.0, -2.0),
            (RoundMode::NearestDownward, 2.5, -2.5, 2.0, -3.0),
            (RoundMode::NearestTowardEven, 2.5, -2.5, 2.0, -2.0),
            (RoundMode::TowardInfinity, 2.1, -2.1, 3.0, -3.0),
            (RoundMode::TowardZero, 2.9, -2.9, 2.0, -2.0),
            (RoundMode::Up, 2.1, -2.9, 3.0, -2.0),
            (RoundMode::Down, 2.9, -2.1, 2.0, -3.0),
        ];
        for (mode, a, b, ra, rb) in cases {
            assert_eq!(mode.round(a), ra, "{mode:?} on {a}");
            assert_eq!(mode.round(b), rb, "{mode:?} on {b}");
        }
    }

    #[test]
    fn test_round_mode_names() -> Result<()> {
        assert_eq!(
            "ROUND_NEAREST_TOWARD_EVEN".parse::<RoundMode>()?,
            RoundMode::NearestTowardEven
        );
        assert_eq!("down".parse::<RoundMode>()?, RoundMode::Down);
        assert!("sideways".parse::<RoundMode>().is_err());
        Ok(())
    }

    #[test]
    fn test_quantize_saturates() -> Result<()> {
        let mut out = [0u8; 4];
        quantize(
            &[0.0f32, 1.0, 100.0, -5.0],
            &[0.5],
            &[10u8],
            &mut out,
            &[4],
            &AxisSet::new(),
            RoundMode::NearestTowardEven,
        )?;
        assert_eq!(out, [10, 12, 210, 0]);
        Ok(())
    }

    #[test]
    fn test_per_channel_dequantize() -> Result<()> {
        let mut out = [0.0f64; 4];
        let axes: AxisSet = [0].into_iter().collect();
        dequantize(&[2i8, 4, 2, 4], &[0.5, 2.0], &[0i8, 1], &mut out, &[2, 2], &axes)?;
        assert_eq!(out, [1.0, 2.0, 2.0, 6.0]);
        Ok(())
    }

    #[test]
    fn test_requantize() {
        let params = QuantParams {
            input_scale: 0.5,
            input_zero_point: 0,
            filter_scale: 0.5,
            filter_zero_point: 0,
            output_scale: 1.0,
            output_zero_point: 3,
        };
        assert_eq!(params.requantize::<i8>(10), 5);
        assert_eq!(params.requantize::<u8>(-100), 0);
        assert_eq!(params.requantize::<i32>(1_000), 253);
    }
}
