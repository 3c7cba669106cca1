//! Host tensor buffers.
//!
//! A [`HostTensor`] owns a typed storage vector and a logical shape. The
//! shape can be changed after allocation by [`HostTensor::set_shape`], which
//! is how operators with data-dependent output shapes publish their result.

use crate::element::Element;
use crate::error::{CoreError, Result};
use crate::shape::shape_size;
use crate::types::{DataType, PartialShape};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Typed storage of a tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum TensorData {
    /// Booleans, one byte each
    Boolean(Vec<u8>),
    /// i8 values
    I8(Vec<i8>),
    /// i16 values
    I16(Vec<i16>),
    /// i32 values
    I32(Vec<i32>),
    /// i64 values
    I64(Vec<i64>),
    /// u8 values
    U8(Vec<u8>),
    /// u16 values
    U16(Vec<u16>),
    /// u32 values
    U32(Vec<u32>),
    /// u64 values
    U64(Vec<u64>),
    /// Half precision values
    F16(Vec<f16>),
    /// Brain float values
    BF16(Vec<bf16>),
    /// f32 values
    F32(Vec<f32>),
    /// f64 values
    F64(Vec<f64>),
}

macro_rules! for_each_storage {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            TensorData::Boolean($v) => $body,
            TensorData::I8($v) => $body,
            TensorData::I16($v) => $body,
            TensorData::I32($v) => $body,
            TensorData::I64($v) => $body,
            TensorData::U8($v) => $body,
            TensorData::U16($v) => $body,
            TensorData::U32($v) => $body,
            TensorData::U64($v) => $body,
            TensorData::F16($v) => $body,
            TensorData::BF16($v) => $body,
            TensorData::F32($v) => $body,
            TensorData::F64($v) => $body,
        }
    };
}

macro_rules! copy_variants {
    ($dst:expr, $src:expr, $len:expr; $($variant:ident),*) => {
        match ($dst, $src) {
            $((TensorData::$variant(dst), TensorData::$variant(src)) => {
                if dst.len() < $len || src.len() < $len {
                    return Err(CoreError::Shape(format!(
                        "cannot copy {} elements from {} into {}",
                        $len,
                        src.len(),
                        dst.len()
                    )));
                }
                dst[..$len].copy_from_slice(&src[..$len]);
                Ok(())
            })*
            (dst, src) => Err(CoreError::TypeMismatch {
                expected: dst.element_type(),
                actual: src.element_type(),
            }),
        }
    };
}

impl TensorData {
    /// Zero-filled storage for `len` elements of `element_type`.
    pub fn zeros(element_type: DataType, len: usize) -> Result<Self> {
        Ok(match element_type {
            DataType::Boolean => TensorData::Boolean(vec![0; len]),
            DataType::I8 => TensorData::I8(vec![0; len]),
            DataType::I16 => TensorData::I16(vec![0; len]),
            DataType::I32 => TensorData::I32(vec![0; len]),
            DataType::I64 => TensorData::I64(vec![0; len]),
            DataType::U8 => TensorData::U8(vec![0; len]),
            DataType::U16 => TensorData::U16(vec![0; len]),
            DataType::U32 => TensorData::U32(vec![0; len]),
            DataType::U64 => TensorData::U64(vec![0; len]),
            DataType::F16 => TensorData::F16(vec![f16::ZERO; len]),
            DataType::BF16 => TensorData::BF16(vec![bf16::ZERO; len]),
            DataType::F32 => TensorData::F32(vec![0.0; len]),
            DataType::F64 => TensorData::F64(vec![0.0; len]),
            other => return Err(CoreError::UnallocatableType(other)),
        })
    }

    /// Element type of the storage.
    pub fn element_type(&self) -> DataType {
        match self {
            TensorData::Boolean(_) => DataType::Boolean,
            TensorData::I8(_) => DataType::I8,
            TensorData::I16(_) => DataType::I16,
            TensorData::I32(_) => DataType::I32,
            TensorData::I64(_) => DataType::I64,
            TensorData::U8(_) => DataType::U8,
            TensorData::U16(_) => DataType::U16,
            TensorData::U32(_) => DataType::U32,
            TensorData::U64(_) => DataType::U64,
            TensorData::F16(_) => DataType::F16,
            TensorData::BF16(_) => DataType::BF16,
            TensorData::F32(_) => DataType::F32,
            TensorData::F64(_) => DataType::F64,
        }
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        for_each_storage!(self, v => v.len())
    }

    /// Whether the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow with zeros or shrink to exactly `len` elements.
    pub fn resize(&mut self, len: usize) {
        for_each_storage!(self, v => v.resize(len, Default::default()))
    }

    /// Copy the first `len` elements of `src` into the front of `self`.
    /// Fails when either side holds fewer than `len` elements.
    pub fn copy_prefix_from(&mut self, src: &TensorData, len: usize) -> Result<()> {
        copy_variants!(self, src, len; Boolean, I8, I16, I32, I64, U8, U16, U32, U64, F16, BF16, F32, F64)
    }
}

/// A typed, shaped buffer in host memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHostTensor")]
pub struct HostTensor {
    element_type: DataType,
    shape: Vec<usize>,
    data: TensorData,
}

/// Wire form of a [`HostTensor`], checked before it becomes one.
#[derive(Deserialize)]
struct RawHostTensor {
    element_type: DataType,
    shape: Vec<usize>,
    data: TensorData,
}

impl TryFrom<RawHostTensor> for HostTensor {
    type Error = CoreError;

    fn try_from(raw: RawHostTensor) -> Result<Self> {
        if raw.data.element_type() != raw.element_type {
            return Err(CoreError::TypeMismatch {
                expected: raw.element_type,
                actual: raw.data.element_type(),
            });
        }
        let count = shape_size(&raw.shape);
        if raw.data.len() < count {
            return Err(CoreError::Shape(format!(
                "{} stored values do not fill shape {:?}",
                raw.data.len(),
                raw.shape
            )));
        }
        Ok(Self {
            element_type: raw.element_type,
            shape: raw.shape,
            data: raw.data,
        })
    }
}

impl HostTensor {
    /// Allocate a zero-filled tensor.
    pub fn new(element_type: DataType, shape: Vec<usize>) -> Result<Self> {
        let data = TensorData::zeros(element_type, shape_size(&shape))?;
        Ok(Self {
            element_type,
            shape,
            data,
        })
    }

    /// Allocate a tensor for a declared shape. Dynamic extents start at zero
    /// elements and grow when an operator sets the concrete shape.
    pub fn for_declaration(element_type: DataType, shape: &PartialShape) -> Result<Self> {
        match shape.to_shape() {
            Some(shape) => Self::new(element_type, shape),
            None => Ok(Self {
                element_type,
                shape: vec![0; shape.rank()],
                data: TensorData::zeros(element_type, 0)?,
            }),
        }
    }

    /// Build a tensor from owned values.
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self> {
        if shape_size(&shape) != values.len() {
            return Err(CoreError::Shape(format!(
                "{} values do not fill shape {:?}",
                values.len(),
                shape
            )));
        }
        Ok(Self {
            element_type: T::DATA_TYPE,
            shape,
            data: T::into_data(values),
        })
    }

    /// Build a boolean tensor.
    pub fn from_bools(shape: Vec<usize>, values: &[bool]) -> Result<Self> {
        let mut tensor = Self::from_vec(shape, values.iter().map(|&b| u8::from(b)).collect())?;
        tensor.element_type = DataType::Boolean;
        tensor.data = match tensor.data {
            TensorData::U8(v) => TensorData::Boolean(v),
            other => other,
        };
        Ok(tensor)
    }

    /// A 0-dimensional tensor holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            element_type: T::DATA_TYPE,
            shape: Vec::new(),
            data: T::into_data(vec![value]),
        }
    }

    /// Element type.
    pub fn element_type(&self) -> DataType {
        self.element_type
    }

    /// Current logical shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements in the logical shape.
    pub fn element_count(&self) -> usize {
        shape_size(&self.shape)
    }

    /// Size of the logical contents in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.element_count() * self.element_type.size_in_bytes()
    }

    /// Underlying storage.
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Mutable underlying storage.
    pub fn data_mut(&mut self) -> &mut TensorData {
        &mut self.data
    }

    /// Change the logical shape. Storage only grows when the new shape holds
    /// more elements than are currently allocated.
    pub fn set_shape(&mut self, shape: Vec<usize>) {
        let count = shape_size(&shape);
        if count > self.data.len() {
            self.data.resize(count);
        }
        self.shape = shape;
    }

    /// Typed read access to the logical contents.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        let count = self.element_count();
        let values = T::slice(&self.data).ok_or(CoreError::TypeMismatch {
            expected: T::DATA_TYPE,
            actual: self.element_type,
        })?;
        values.get(..count).ok_or_else(|| short_storage(values.len(), &self.shape))
    }

    /// Typed write access to the logical contents.
    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        let count = self.element_count();
        let actual = self.element_type;
        let values = T::vec_mut(&mut self.data).ok_or(CoreError::TypeMismatch {
            expected: T::DATA_TYPE,
            actual,
        })?;
        let len = values.len();
        match values.get_mut(..count) {
            Some(values) => Ok(values),
            None => Err(short_storage(len, &self.shape)),
        }
    }

    /// Copy of the logical contents.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        Ok(self.as_slice::<T>()?.to_vec())
    }

    /// Copy another tensor's shape and contents into this one.
    pub fn copy_from(&mut self, src: &HostTensor) -> Result<()> {
        if self.element_type != src.element_type {
            return Err(CoreError::TypeMismatch {
                expected: self.element_type,
                actual: src.element_type,
            });
        }
        self.set_shape(src.shape.clone());
        self.data.copy_prefix_from(&src.data, src.element_count())
    }

    /// Whether any floating point element is a NaN.
    pub fn has_nan(&self) -> bool {
        let count = self.element_count();
        match &self.data {
            TensorData::F32(v) => v.iter().take(count).any(|x| x.is_nan()),
            TensorData::F64(v) => v.iter().take(count).any(|x| x.is_nan()),
            TensorData::F16(v) => v.iter().take(count).any(|x| x.is_nan()),
            TensorData::BF16(v) => v.iter().take(count).any(|x| x.is_nan()),
            _ => false,
        }
    }
}

fn short_storage(len: usize, shape: &[usize]) -> CoreError {
    CoreError::Shape(format!("{len} stored values do not fill shape {shape:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_shape_grows_storage() -> Result<()> {
        let mut t = HostTensor::for_declaration(DataType::F32, &PartialShape::dynamic(1))?;
        assert_eq!(t.element_count(), 0);
        t.set_shape(vec![2, 3]);
        assert_eq!(t.as_slice::<f32>()?.len(), 6);
        t.set_shape(vec![4]);
        assert_eq!(t.as_slice::<f32>()?.len(), 4);
        Ok(())
    }

    #[test]
    fn test_typed_access_rejects_wrong_type() -> Result<()> {
        let t = HostTensor::from_vec(vec![2], vec![1i32, 2])?;
        assert!(matches!(
            t.as_slice::<f32>(),
            Err(CoreError::TypeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_boolean_tensor() -> Result<()> {
        let t = HostTensor::from_bools(vec![3], &[true, false, true])?;
        assert_eq!(t.element_type(), DataType::Boolean);
        assert_eq!(t.as_slice::<u8>()?, &[1, 0, 1]);
        Ok(())
    }

    #[test]
    fn test_f16_allocates_but_u1_does_not() {
        assert!(HostTensor::new(DataType::F16, vec![2]).is_ok());
        assert!(matches!(
            HostTensor::new(DataType::U1, vec![2]),
            Err(CoreError::UnallocatableType(DataType::U1))
        ));
    }

    #[test]
    fn test_nan_detection() -> Result<()> {
        let t = HostTensor::from_vec(vec![2], vec![1.0f64, f64::NAN])?;
        assert!(t.has_nan());
        let t = HostTensor::from_vec(vec![2], vec![1.0f32, 2.0])?;
        assert!(!t.has_nan());
        Ok(())
    }

    #[test]
    fn test_deserialize_rejects_short_storage() -> Result<()> {
        let t = HostTensor::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0])?;
        let mut json = serde_json::to_value(&t).expect("serialize");
        json["data"]["values"] = serde_json::json!([1.0]);
        let err = serde_json::from_value::<HostTensor>(json).expect_err("short storage accepted");
        assert!(err.to_string().contains("do not fill shape"));
        Ok(())
    }

    #[test]
    fn test_deserialize_rejects_mismatched_storage() -> Result<()> {
        let t = HostTensor::from_vec(vec![2], vec![1i32, 2])?;
        let json = serde_json::to_value(&t).expect("serialize");
        let back: HostTensor = serde_json::from_value(json.clone()).expect("round trip");
        assert_eq!(back, t);

        let mut json = json;
        json["data"]["type"] = serde_json::json!("f64");
        assert!(serde_json::from_value::<HostTensor>(json).is_err());
        Ok(())
    }

    #[test]
    fn test_copy_prefix_checks_lengths() {
        let mut dst = TensorData::F32(vec![0.0; 3]);
        assert!(matches!(
            dst.copy_prefix_from(&TensorData::F32(vec![1.0]), 3),
            Err(CoreError::Shape(_))
        ));
        assert!(dst.copy_prefix_from(&TensorData::F32(vec![1.0, 2.0]), 2).is_ok());
        assert_eq!(dst, TensorData::F32(vec![1.0, 2.0, 0.0]));
    }
}
