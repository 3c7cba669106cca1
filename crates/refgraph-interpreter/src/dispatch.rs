//! Element-type dispatch.
//!
//! The macros here turn a runtime [`DataType`] into a concrete scalar type
//! alias and instantiate a generic body once per supported type. A handler
//! nests them when an operator also depends on an output or index type.
//!
//! ```ignore
//! dispatch_element!(element_type, |T| run::<T>(node, outputs, inputs),
//!     other => Err(InterpreterError::element_type(node, other)))
//! ```

use crate::type_id::OpTypeId;
use refgraph_core::{DataType, Node, Result};

/// Match `$et` against the listed variants, binding `$t` to the scalar type
/// of the matching arm. Anything else evaluates `$fallback` with `$other`
/// bound to the unmatched type.
macro_rules! dispatch_types {
    ($et:expr, [$($variant:ident => $ty:ty),+ $(,)?], |$t:ident| $body:expr, $other:pat => $fallback:expr) => {
        match $et {
            $(::refgraph_core::DataType::$variant => {
                type $t = $ty;
                $body
            })+
            $other => $fallback,
        }
    };
}

/// Every type with a kernel instantiation. Booleans run as bytes.
macro_rules! dispatch_element {
    ($et:expr, |$t:ident| $body:expr, $other:pat => $fallback:expr) => {
        $crate::dispatch::dispatch_types!(
            $et,
            [
                Boolean => u8,
                I8 => i8,
                I16 => i16,
                I32 => i32,
                I64 => i64,
                U8 => u8,
                U16 => u16,
                U32 => u32,
                U64 => u64,
                F32 => f32,
                F64 => f64,
            ],
            |$t| $body,
            $other => $fallback
        )
    };
}

/// Integer types accepted for shape, axis and scalar parameters.
macro_rules! dispatch_integer {
    ($et:expr, |$t:ident| $body:expr, $other:pat => $fallback:expr) => {
        $crate::dispatch::dispatch_types!(
            $et,
            [
                I8 => i8,
                I16 => i16,
                I32 => i32,
                I64 => i64,
                U8 => u8,
                U16 => u16,
                U32 => u32,
                U64 => u64,
            ],
            |$t| $body,
            $other => $fallback
        )
    };
}

/// Index tensors: i32 and i64 only.
macro_rules! dispatch_index {
    ($et:expr, |$t:ident| $body:expr, $other:pat => $fallback:expr) => {
        $crate::dispatch::dispatch_types!($et, [I32 => i32, I64 => i64], |$t| $body, $other => $fallback)
    };
}

/// Floating point types.
macro_rules! dispatch_real {
    ($et:expr, |$t:ident| $body:expr, $other:pat => $fallback:expr) => {
        $crate::dispatch::dispatch_types!($et, [F32 => f32, F64 => f64], |$t| $body, $other => $fallback)
    };
}

/// `(input, filter, output)` combinations of the quantized dot and
/// convolution kernels.
macro_rules! dispatch_quantized {
    ($types:expr, |$i:ident, $f:ident, $o:ident| $body:expr, $other:pat => $fallback:expr) => {
        match $types {
            (::refgraph_core::DataType::U8, ::refgraph_core::DataType::I8, ::refgraph_core::DataType::I8) => {
                type $i = u8;
                type $f = i8;
                type $o = i8;
                $body
            }
            (::refgraph_core::DataType::U8, ::refgraph_core::DataType::U8, ::refgraph_core::DataType::U8) => {
                type $i = u8;
                type $f = u8;
                type $o = u8;
                $body
            }
            (::refgraph_core::DataType::U8, ::refgraph_core::DataType::I8, ::refgraph_core::DataType::I32) => {
                type $i = u8;
                type $f = i8;
                type $o = i32;
                $body
            }
            (::refgraph_core::DataType::U8, ::refgraph_core::DataType::U8, ::refgraph_core::DataType::I32) => {
                type $i = u8;
                type $f = u8;
                type $o = i32;
                $body
            }
            $other => $fallback,
        }
    };
}

pub(crate) use {
    dispatch_element, dispatch_index, dispatch_integer, dispatch_quantized, dispatch_real,
    dispatch_types,
};

/// Element type a node's handler is instantiated for.
///
/// Conversions, quantization, arg-reductions and top-k run on their first
/// input; comparisons on their second input (their output is boolean);
/// everything else on output 0.
pub fn working_type(id: OpTypeId, node: &Node) -> Result<DataType> {
    use OpTypeId::*;
    match id {
        ConvertV0 | QuantizeV0 | DequantizeV0 | ArgMinV0 | ArgMaxV0 | TopKV0 => node.input_type(0),
        EqualV1 | NotEqualV1 | GreaterV1 | GreaterEqualV1 | LessV1 | LessEqualV1 => {
            node.input_type(1)
        }
        _ if node.outputs.is_empty() => node.input_type(0),
        _ => node.output_type(0),
    }
}

/// Whether the interpreter instantiates kernels for `element_type`.
pub fn is_dispatchable(element_type: DataType) -> bool {
    element_type.is_allocatable() && !matches!(element_type, DataType::F16 | DataType::BF16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use refgraph_core::{Element, FunctionBuilder, NodeSpec};

    fn size_of(et: DataType) -> Option<usize> {
        dispatch_element!(et, |T| Some(std::mem::size_of::<T>()), _ => None)
    }

    #[test]
    fn test_dispatch_binds_scalar_type() {
        assert_eq!(size_of(DataType::Boolean), Some(1));
        assert_eq!(size_of(DataType::I16), Some(2));
        assert_eq!(size_of(DataType::F64), Some(8));
        assert_eq!(size_of(DataType::F16), None);
        assert_eq!(size_of(DataType::Dynamic), None);
    }

    #[test]
    fn test_index_and_real_dispatch() {
        let index = |et: DataType| dispatch_index!(et, |I| Ok(I::DATA_TYPE), other => Err(other));
        assert_eq!(index(DataType::I32), Ok(DataType::I32));
        assert_eq!(index(DataType::U32), Err(DataType::U32));

        let real = |et: DataType| dispatch_real!(et, |R| Ok(R::IS_REAL), other => Err(other));
        assert_eq!(real(DataType::F32), Ok(true));
        assert_eq!(real(DataType::I8), Err(DataType::I8));
    }

    #[test]
    fn test_quantized_triples() {
        let triple = |t: (DataType, DataType, DataType)| {
            dispatch_quantized!(t, |I, F, O| Ok((I::DATA_TYPE, F::DATA_TYPE, O::DATA_TYPE)), other => Err(other))
        };
        let ok = (DataType::U8, DataType::I8, DataType::I32);
        assert_eq!(triple(ok), Ok(ok));
        let bad = (DataType::I8, DataType::I8, DataType::I8);
        assert_eq!(triple(bad), Err(bad));
    }

    #[test]
    fn test_dispatchable_types() {
        assert!(is_dispatchable(DataType::Boolean));
        assert!(is_dispatchable(DataType::U64));
        assert!(!is_dispatchable(DataType::BF16));
        assert!(!is_dispatchable(DataType::U1));
    }

    #[test]
    fn test_working_type_rules() -> Result<()> {
        let mut b = FunctionBuilder::new("f");
        let x = b.parameter("x", DataType::I32, [2])?;
        let y = b.parameter("y", DataType::I32, [2])?;
        let cmp = b.add(
            NodeSpec::new("Less", 1)
                .input(x)
                .input(y)
                .output(DataType::Boolean, [2]),
        )?;
        let conv = b.add(
            NodeSpec::new("Convert", 0)
                .input(x)
                .output(DataType::F32, [2]),
        )?;
        b.result(cmp)?;
        b.result(conv)?;
        let f = b.build()?;
        assert_eq!(working_type(OpTypeId::LessV1, &f.nodes()[cmp])?, DataType::I32);
        assert_eq!(working_type(OpTypeId::ConvertV0, &f.nodes()[conv])?, DataType::I32);
        assert_eq!(working_type(OpTypeId::ResultV0, &f.nodes()[4])?, DataType::Boolean);
        Ok(())
    }
}
