//! Scalar element types and shape declarations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar element type of a tensor.
///
/// The first eleven variants have host storage and a kernel instantiation.
/// `F16` and `BF16` can be stored but no kernel is instantiated for them;
/// `U1`, `Dynamic` and `Undefined` exist only so graphs that declare them can
/// be rejected with a precise error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Boolean, stored as one byte per value
    Boolean,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Signed 64-bit integer
    I64,
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// IEEE half precision
    F16,
    /// Brain floating point
    BF16,
    /// Single precision float
    F32,
    /// Double precision float
    F64,
    /// Packed single bit
    U1,
    /// Type resolved at run time
    Dynamic,
    /// No type assigned
    Undefined,
}

impl DataType {
    /// Size of a single element in bytes, zero for types without storage.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Boolean | DataType::I8 | DataType::U8 => 1,
            DataType::I16 | DataType::U16 | DataType::F16 | DataType::BF16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
            DataType::U1 | DataType::Dynamic | DataType::Undefined => 0,
        }
    }

    /// Whether the type is a floating point type.
    pub fn is_real(self) -> bool {
        matches!(
            self,
            DataType::F16 | DataType::BF16 | DataType::F32 | DataType::F64
        )
    }

    /// Whether the type is a signed or unsigned integer type.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            DataType::I8
                | DataType::I16
                | DataType::I32
                | DataType::I64
                | DataType::U8
                | DataType::U16
                | DataType::U32
                | DataType::U64
        )
    }

    /// Whether values of this type can be held in a host buffer.
    pub fn is_allocatable(self) -> bool {
        self.size_in_bytes() > 0
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U16 => "u16",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::U1 => "u1",
            DataType::Dynamic => "dynamic",
            DataType::Undefined => "undefined",
        };
        f.write_str(name)
    }
}

/// One extent of a partially known shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Known extent
    Static(usize),
    /// Extent known only at run time
    Dynamic,
}

impl Dimension {
    /// Whether a concrete extent satisfies this dimension.
    pub fn accepts(self, extent: usize) -> bool {
        match self {
            Dimension::Static(n) => n == extent,
            Dimension::Dynamic => true,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(n) => write!(f, "{n}"),
            Dimension::Dynamic => f.write_str("?"),
        }
    }
}

/// Shape declaration whose rank is known but whose extents may not be.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PartialShape(pub Vec<Dimension>);

impl PartialShape {
    /// A shape of the given rank with every extent dynamic.
    pub fn dynamic(rank: usize) -> Self {
        Self(vec![Dimension::Dynamic; rank])
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Whether every extent is known.
    pub fn is_static(&self) -> bool {
        self.0.iter().all(|d| matches!(d, Dimension::Static(_)))
    }

    /// The concrete shape, if every extent is known.
    pub fn to_shape(&self) -> Option<Vec<usize>> {
        self.0
            .iter()
            .map(|d| match d {
                Dimension::Static(n) => Some(*n),
                Dimension::Dynamic => None,
            })
            .collect()
    }

    /// Whether a concrete shape is compatible with this declaration.
    pub fn accepts(&self, shape: &[usize]) -> bool {
        self.0.len() == shape.len() && self.0.iter().zip(shape).all(|(d, &n)| d.accepts(n))
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("}")
    }
}

impl From<Vec<usize>> for PartialShape {
    fn from(shape: Vec<usize>) -> Self {
        Self(shape.into_iter().map(Dimension::Static).collect())
    }
}

impl From<&[usize]> for PartialShape {
    fn from(shape: &[usize]) -> Self {
        Self(shape.iter().copied().map(Dimension::Static).collect())
    }
}

impl<const N: usize> From<[usize; N]> for PartialShape {
    fn from(shape: [usize; N]) -> Self {
        Self(shape.into_iter().map(Dimension::Static).collect())
    }
}

impl From<Vec<Dimension>> for PartialShape {
    fn from(dims: Vec<Dimension>) -> Self {
        Self(dims)
    }
}

/// Broadcast rule for binary elementwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoBroadcast {
    /// Shapes must match exactly
    None,
    /// Right-aligned numpy broadcasting
    #[default]
    Numpy,
    /// The second operand is aligned to the first starting at `axis`
    Pdpd {
        /// Start axis in the first operand, `-1` aligns to the right
        axis: i64,
    },
}
