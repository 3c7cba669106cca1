//! Elementwise unary kernels. Output shape always equals the input shape.

use crate::error::{KernelError, Result};
use refgraph_core::Element;

fn check_len(arg: usize, out: usize) -> Result<()> {
    if arg != out {
        return Err(KernelError::invalid(format!(
            "unary kernel got {arg} input elements for {out} output elements"
        )));
    }
    Ok(())
}

/// Apply `f` to every element.
pub fn map<T: Element>(arg: &[T], out: &mut [T], f: impl Fn(T) -> T) -> Result<()> {
    check_len(arg.len(), out.len())?;
    for (o, &x) in out.iter_mut().zip(arg) {
        *o = f(x);
    }
    Ok(())
}

/// Apply a real-valued function through `f64`. Integer results are
/// truncated the way a C cast would.
pub fn real<T: Element>(arg: &[T], out: &mut [T], f: fn(f64) -> f64) -> Result<()> {
    map(arg, out, |x| T::from_f64(f(x.to_f64())))
}

/// Absolute value.
pub fn abs<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    map(arg, out, |x| if x < T::zero() { T::zero().sub(x) } else { x })
}

/// Negation; integers wrap.
pub fn negative<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    map(arg, out, |x| T::zero().sub(x))
}

/// Sign as -1, 0 or 1. NaN and zero pass through.
pub fn sign<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    map(arg, out, |x| {
        if x > T::zero() {
            T::one()
        } else if x < T::zero() {
            T::zero().sub(T::one())
        } else {
            x
        }
    })
}

/// Ceiling; identity on integers.
pub fn ceiling<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    if T::IS_REAL {
        real(arg, out, f64::ceil)
    } else {
        map(arg, out, |x| x)
    }
}

/// Floor; identity on integers.
pub fn floor<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    if T::IS_REAL {
        real(arg, out, f64::floor)
    } else {
        map(arg, out, |x| x)
    }
}

/// Round half to even; identity on integers.
pub fn round<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    if T::IS_REAL {
        real(arg, out, round_half_even)
    } else {
        map(arg, out, |x| x)
    }
}

/// Banker's rounding.
pub fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

/// `max(x, 0)`.
pub fn relu<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    map(arg, out, |x| if x > T::zero() { x } else { T::zero() })
}

/// Logistic function `1 / (1 + e^-x)`.
pub fn sigmoid<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    real(arg, out, |x| 1.0 / (1.0 + (-x).exp()))
}

/// Clamp to `[min, max]`. Bounds are converted to `T` first, so an integer
/// tensor clamps to the truncated bounds.
pub fn clamp<T: Element>(arg: &[T], out: &mut [T], min: f64, max: f64) -> Result<()> {
    let (lo, hi) = clamp_bounds::<T>(min, max);
    map(arg, out, |x| {
        if x < lo {
            lo
        } else if x > hi {
            hi
        } else {
            x
        }
    })
}

fn clamp_bounds<T: Element>(min: f64, max: f64) -> (T, T) {
    if T::IS_REAL {
        return (T::from_f64(min), T::from_f64(max));
    }
    // Integer bounds round inwards and saturate to the type range.
    let lo = if min <= T::lowest().to_f64() {
        T::lowest()
    } else {
        T::from_f64(min.ceil())
    };
    let hi = if max >= T::highest().to_f64() {
        T::highest()
    } else {
        T::from_f64(max.floor())
    };
    (lo, hi)
}

/// Logical not over boolean bytes.
pub fn logical_not<T: Element>(arg: &[T], out: &mut [T]) -> Result<()> {
    map(arg, out, |x| T::from_bool(!x.is_true()))
}

/// Gradient of relu: `delta` where the forward input was positive.
pub fn relu_backprop<T: Element>(arg: &[T], delta: &[T], out: &mut [T]) -> Result<()> {
    check_len(arg.len(), out.len())?;
    check_len(delta.len(), out.len())?;
    for ((o, &x), &d) in out.iter_mut().zip(arg).zip(delta) {
        *o = if x > T::zero() { d } else { T::zero() };
    }
    Ok(())
}

/// Gradient of sigmoid: `delta * s * (1 - s)` with `s = sigmoid(x)`.
pub fn sigmoid_backprop<T: Element>(arg: &[T], delta: &[T], out: &mut [T]) -> Result<()> {
    check_len(arg.len(), out.len())?;
    check_len(delta.len(), out.len())?;
    for ((o, &x), &d) in out.iter_mut().zip(arg).zip(delta) {
        let s = 1.0 / (1.0 + (-x.to_f64()).exp());
        *o = T::from_f64(d.to_f64() * s * (1.0 - s));
    }
    Ok(())
}

/// Error function, accurate to about 1e-12.
pub fn erf(x: f64) -> f64 {
    if x.is_nan() {
        return x;
    }
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    if x < 2.5 {
        // Maclaurin series converges quickly near zero.
        let x2 = x * x;
        let mut term = x;
        let mut sum = x;
        let mut n = 0.0;
        while term.abs() > 1e-17 * sum.abs() {
            n += 1.0;
            term *= -x2 / n;
            sum += term / (2.0 * n + 1.0);
        }
        sign * sum * std::f64::consts::FRAC_2_SQRT_PI
    } else {
        sign * (1.0 - erfc_continued_fraction(x))
    }
}

// Lentz evaluation of the erfc continued fraction for x >= 2.5.
fn erfc_continued_fraction(x: f64) -> f64 {
    let tiny = 1e-300;
    let mut f = x;
    let mut c = x;
    let mut d = 0.0;
    for k in 1..200 {
        let a = k as f64 / 2.0;
        d = x + a * d;
        d = if d.abs() < tiny { tiny } else { d };
        c = x + a / c;
        c = if c.abs() < tiny { tiny } else { c };
        d = 1.0 / d;
        let delta = c * d;
        f *= delta;
        if (delta - 1.0).abs() < 1e-16 {
            break;
        }
    }
    (-x * x).exp() / f / std::f64::consts::PI.sqrt()
}
