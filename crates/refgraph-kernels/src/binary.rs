//! Elementwise binary kernels with automatic broadcasting.

use crate::error::{KernelError, Result};
use refgraph_core::shape::{broadcast_shape, pdpd_start_axis, row_major_strides, shape_size};
use refgraph_core::{AutoBroadcast, Element};

/// Source offsets into `a` and `b` for every element of the broadcast
/// output, in row-major output order.
fn broadcast_offsets(
    a_shape: &[usize],
    b_shape: &[usize],
    rule: AutoBroadcast,
) -> Result<(Vec<usize>, Vec<(usize, usize)>)> {
    let out_shape = broadcast_shape(a_shape, b_shape, rule)?;
    let rank = out_shape.len();

    // Per output axis, the stride each operand advances by (0 when broadcast).
    let mut a_step = vec![0usize; rank];
    let mut b_step = vec![0usize; rank];
    let a_strides = row_major_strides(a_shape);
    let b_strides = row_major_strides(b_shape);
    match rule {
        AutoBroadcast::None | AutoBroadcast::Numpy => {
            for axis in 0..rank {
                if axis + a_shape.len() >= rank {
                    let i = axis + a_shape.len() - rank;
                    if a_shape[i] != 1 {
                        a_step[axis] = a_strides[i];
                    }
                }
                if axis + b_shape.len() >= rank {
                    let i = axis + b_shape.len() - rank;
                    if b_shape[i] != 1 {
                        b_step[axis] = b_strides[i];
                    }
                }
            }
        }
        AutoBroadcast::Pdpd { axis } => {
            let start = pdpd_start_axis(a_shape, b_shape, axis)?;
            a_step.copy_from_slice(&a_strides);
            for (i, &d) in b_shape.iter().enumerate() {
                if d != 1 {
                    b_step[start + i] = b_strides[i];
                }
            }
        }
    }

    let count = shape_size(&out_shape);
    let mut offsets = Vec::with_capacity(count);
    let mut coord = vec![0usize; rank];
    let (mut ia, mut ib) = (0usize, 0usize);
    for _ in 0..count {
        offsets.push((ia, ib));
        // Odometer increment, keeping both source offsets in sync.
        for axis in (0..rank).rev() {
            coord[axis] += 1;
            ia += a_step[axis];
            ib += b_step[axis];
            if coord[axis] < out_shape[axis] {
                break;
            }
            ia -= a_step[axis] * coord[axis];
            ib -= b_step[axis] * coord[axis];
            coord[axis] = 0;
        }
    }
    Ok((out_shape, offsets))
}

/// Apply a fallible binary function under a broadcast rule.
pub fn try_autobroadcast<T: Element, U: Element>(
    a: &[T],
    b: &[T],
    out: &mut [U],
    a_shape: &[usize],
    b_shape: &[usize],
    rule: AutoBroadcast,
    f: impl Fn(T, T) -> Result<U>,
) -> Result<()> {
    if a.len() != shape_size(a_shape) || b.len() != shape_size(b_shape) {
        return Err(KernelError::invalid("binary operand does not match its shape"));
    }
    let (out_shape, offsets) = broadcast_offsets(a_shape, b_shape, rule)?;
    if out.len() != shape_size(&out_shape) {
        return Err(KernelError::invalid(format!(
            "output holds {} elements but broadcast shape is {:?}",
            out.len(),
            out_shape
        )));
    }
    for (o, (ia, ib)) in out.iter_mut().zip(offsets) {
        *o = f(a[ia], b[ib])?;
    }
    Ok(())
}

/// Apply a binary function under a broadcast rule.
pub fn autobroadcast<T: Element, U: Element>(
    a: &[T],
    b: &[T],
    out: &mut [U],
    a_shape: &[usize],
    b_shape: &[usize],
    rule: AutoBroadcast,
    f: impl Fn(T, T) -> U,
) -> Result<()> {
    try_autobroadcast(a, b, out, a_shape, b_shape, rule, |x, y| Ok(f(x, y)))
}

/// Arithmetic and logical binary operators sharing the input element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    /// a + b
    Add,
    /// a - b
    Subtract,
    /// a * b
    Multiply,
    /// a / b; integers use floor division when `pythondiv` is set
    Divide {
        /// Round integer quotients towards negative infinity
        pythondiv: bool,
    },
    /// max(a, b)
    Maximum,
    /// min(a, b)
    Minimum,
    /// a ^ b
    Power,
    /// atan2(a, b)
    Atan2,
    /// a && b
    LogicalAnd,
    /// a || b
    LogicalOr,
    /// a != b as booleans
    LogicalXor,
}

impl ArithmeticOp {
    /// Apply to one pair of scalars.
    pub fn apply<T: Element>(self, a: T, b: T) -> Result<T> {
        Ok(match self {
            ArithmeticOp::Add => a.add(b),
            ArithmeticOp::Subtract => a.sub(b),
            ArithmeticOp::Multiply => a.mul(b),
            ArithmeticOp::Divide { pythondiv } => divide(a, b, pythondiv)?,
            ArithmeticOp::Maximum => {
                if a >= b || b.is_nan() {
                    a
                } else {
                    b
                }
            }
            ArithmeticOp::Minimum => {
                if a <= b || b.is_nan() {
                    a
                } else {
                    b
                }
            }
            ArithmeticOp::Power => T::from_f64(a.to_f64().powf(b.to_f64())),
            ArithmeticOp::Atan2 => T::from_f64(a.to_f64().atan2(b.to_f64())),
            ArithmeticOp::LogicalAnd => T::from_bool(a.is_true() && b.is_true()),
            ArithmeticOp::LogicalOr => T::from_bool(a.is_true() || b.is_true()),
            ArithmeticOp::LogicalXor => T::from_bool(a.is_true() != b.is_true()),
        })
    }
}

fn divide<T: Element>(a: T, b: T, pythondiv: bool) -> Result<T> {
    let quotient = a.div(b).ok_or(KernelError::DivisionByZero)?;
    if T::IS_REAL || !pythondiv {
        return Ok(quotient);
    }
    let remainder = a.rem(b).ok_or(KernelError::DivisionByZero)?;
    if remainder != T::zero() && ((remainder < T::zero()) != (b < T::zero())) {
        Ok(quotient.sub(T::one()))
    } else {
        Ok(quotient)
    }
}

/// Elementwise arithmetic under a broadcast rule.
pub fn arithmetic<T: Element>(
    op: ArithmeticOp,
    a: &[T],
    b: &[T],
    out: &mut [T],
    a_shape: &[usize],
    b_shape: &[usize],
    rule: AutoBroadcast,
) -> Result<()> {
    try_autobroadcast(a, b, out, a_shape, b_shape, rule, |x, y| op.apply(x, y))
}

/// Comparison operators producing booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// a == b
    Equal,
    /// a != b
    NotEqual,
    /// a > b
    Greater,
    /// a >= b
    GreaterEqual,
    /// a < b
    Less,
    /// a <= b
    LessEqual,
}

impl ComparisonOp {
    /// Apply to one pair of scalars.
    pub fn apply<T: Element>(self, a: T, b: T) -> bool {
        match self {
            ComparisonOp::Equal => a == b,
            ComparisonOp::NotEqual => a != b,
            ComparisonOp::Greater => a > b,
            ComparisonOp::GreaterEqual => a >= b,
            ComparisonOp::Less => a < b,
            ComparisonOp::LessEqual => a <= b,
        }
    }
}

/// Elementwise comparison writing one byte per result.
pub fn compare<T: Element>(
    op: ComparisonOp,
    a: &[T],
    b: &[T],
    out: &mut [u8],
    a_shape: &[usize],
    b_shape: &[usize],
    rule: AutoBroadcast,
) -> Result<()> {
    autobroadcast(a, b, out, a_shape, b_shape, rule, |x, y| u8::from(op.apply(x, y)))
}
