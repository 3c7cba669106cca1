//! Bridge between Rust scalar types and [`DataType`].
//!
//! Every kernel is generic over [`Element`]. Integer arithmetic wraps on
//! overflow and integer division reports a zero divisor instead of
//! panicking, so a kernel never aborts the process on bad data.

use crate::tensor::TensorData;
use crate::types::DataType;
use num_traits::{AsPrimitive, Bounded, WrappingAdd, WrappingMul, WrappingSub};
use std::fmt::Debug;

/// A scalar type with host storage and a kernel instantiation.
pub trait Element: Copy + Default + PartialOrd + Debug + Send + Sync + 'static {
    /// Storage type this scalar maps to.
    const DATA_TYPE: DataType;
    /// Whether the scalar is a floating point type.
    const IS_REAL: bool;

    /// Additive identity.
    fn zero() -> Self;
    /// Multiplicative identity.
    fn one() -> Self;
    /// Smallest representable value (negative infinity for floats).
    fn lowest() -> Self;
    /// Largest representable value (positive infinity for floats).
    fn highest() -> Self;

    /// Convert from `f64` with `as` semantics.
    fn from_f64(value: f64) -> Self;
    /// Convert to `f64` with `as` semantics.
    fn to_f64(self) -> f64;
    /// Convert from `i64` with `as` semantics.
    fn from_i64(value: i64) -> Self;
    /// Convert to `i64` with `as` semantics.
    fn to_i64(self) -> i64;

    /// Addition, wrapping for integers.
    fn add(self, rhs: Self) -> Self;
    /// Subtraction, wrapping for integers.
    fn sub(self, rhs: Self) -> Self;
    /// Multiplication, wrapping for integers.
    fn mul(self, rhs: Self) -> Self;
    /// Division; `None` when an integer divisor is zero.
    fn div(self, rhs: Self) -> Option<Self>;
    /// Remainder; `None` when an integer divisor is zero.
    fn rem(self, rhs: Self) -> Option<Self>;

    /// Whether the value is a NaN.
    fn is_nan(self) -> bool {
        false
    }

    /// Boolean interpretation, nonzero is true.
    fn is_true(self) -> bool {
        self != Self::zero()
    }

    /// `1` for true, `0` for false.
    fn from_bool(value: bool) -> Self {
        if value {
            Self::one()
        } else {
            Self::zero()
        }
    }

    /// Typed view of storage holding this scalar.
    fn slice(data: &TensorData) -> Option<&[Self]>;
    /// Mutable typed view of storage holding this scalar.
    fn vec_mut(data: &mut TensorData) -> Option<&mut Vec<Self>>;
    /// Wrap owned values into storage.
    fn into_data(values: Vec<Self>) -> TensorData;
}

macro_rules! storage_access {
    ($t:ty, $variant:ident $(| $alt:ident)*) => {
        fn slice(data: &TensorData) -> Option<&[Self]> {
            match data {
                TensorData::$variant(v) $(| TensorData::$alt(v))* => Some(v.as_slice()),
                _ => None,
            }
        }

        fn vec_mut(data: &mut TensorData) -> Option<&mut Vec<Self>> {
            match data {
                TensorData::$variant(v) $(| TensorData::$alt(v))* => Some(v),
                _ => None,
            }
        }

        fn into_data(values: Vec<Self>) -> TensorData {
            TensorData::$variant(values)
        }
    };
}

macro_rules! impl_integer_element {
    ($t:ty, $dtype:ident, $variant:ident $(| $alt:ident)*) => {
        impl Element for $t {
            const DATA_TYPE: DataType = DataType::$dtype;
            const IS_REAL: bool = false;

            fn zero() -> Self {
                0
            }

            fn one() -> Self {
                1
            }

            fn lowest() -> Self {
                <$t as Bounded>::min_value()
            }

            fn highest() -> Self {
                <$t as Bounded>::max_value()
            }

            fn from_f64(value: f64) -> Self {
                value.as_()
            }

            fn to_f64(self) -> f64 {
                self.as_()
            }

            fn from_i64(value: i64) -> Self {
                value.as_()
            }

            fn to_i64(self) -> i64 {
                self.as_()
            }

            fn add(self, rhs: Self) -> Self {
                WrappingAdd::wrapping_add(&self, &rhs)
            }

            fn sub(self, rhs: Self) -> Self {
                WrappingSub::wrapping_sub(&self, &rhs)
            }

            fn mul(self, rhs: Self) -> Self {
                WrappingMul::wrapping_mul(&self, &rhs)
            }

            fn div(self, rhs: Self) -> Option<Self> {
                if rhs == 0 {
                    None
                } else {
                    Some(self.wrapping_div(rhs))
                }
            }

            fn rem(self, rhs: Self) -> Option<Self> {
                if rhs == 0 {
                    None
                } else {
                    Some(self.wrapping_rem(rhs))
                }
            }

            storage_access!($t, $variant $(| $alt)*);
        }
    };
}

macro_rules! impl_real_element {
    ($t:ty, $dtype:ident, $variant:ident) => {
        impl Element for $t {
            const DATA_TYPE: DataType = DataType::$dtype;
            const IS_REAL: bool = true;

            fn zero() -> Self {
                0.0
            }

            fn one() -> Self {
                1.0
            }

            fn lowest() -> Self {
                <$t>::NEG_INFINITY
            }

            fn highest() -> Self {
                <$t>::INFINITY
            }

            fn from_f64(value: f64) -> Self {
                value.as_()
            }

            fn to_f64(self) -> f64 {
                self.as_()
            }

            fn from_i64(value: i64) -> Self {
                value.as_()
            }

            fn to_i64(self) -> i64 {
                self.as_()
            }

            fn add(self, rhs: Self) -> Self {
                self + rhs
            }

            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }

            fn mul(self, rhs: Self) -> Self {
                self * rhs
            }

            fn div(self, rhs: Self) -> Option<Self> {
                Some(self / rhs)
            }

            fn rem(self, rhs: Self) -> Option<Self> {
                Some(self % rhs)
            }

            fn is_nan(self) -> bool {
                <$t>::is_nan(self)
            }

            storage_access!($t, $variant);
        }
    };
}

impl_integer_element!(i8, I8, I8);
impl_integer_element!(i16, I16, I16);
impl_integer_element!(i32, I32, I32);
impl_integer_element!(i64, I64, I64);
impl_integer_element!(u8, U8, U8 | Boolean);
impl_integer_element!(u16, U16, U16);
impl_integer_element!(u32, U32, U32);
impl_integer_element!(u64, U64, U64);
impl_real_element!(f32, F32, F32);
impl_real_element!(f64, F64, F64);
