//! Reading auxiliary tensors (shapes, axes, bounds, scalars) into plain
//! Rust values before they reach shape inference or a kernel.

use crate::dispatch::{dispatch_element, dispatch_integer};
use crate::error::{InterpreterError, Result};
use refgraph_core::shape::normalize_axis;
use refgraph_core::{AxisSet, Element, HostTensor, Node, Shape};

fn malformed(node: &Node, tensor: &HostTensor) -> InterpreterError {
    InterpreterError::MalformedAuxiliaryInput {
        op: node.versioned_type(),
        element_type: tensor.element_type(),
    }
}

/// Integer contents of `tensor`, which may hold any signed or unsigned
/// integer type.
pub fn as_i64_vector(node: &Node, tensor: &HostTensor) -> Result<Vec<i64>> {
    dispatch_integer!(tensor.element_type(), |I| {
        Ok(tensor.as_slice::<I>()?.iter().map(|v| v.to_i64()).collect())
    }, _ => Err(malformed(node, tensor)))
}

/// Non-negative integer contents of `tensor`.
pub fn as_usize_vector(node: &Node, tensor: &HostTensor) -> Result<Vec<usize>> {
    as_i64_vector(node, tensor)?
        .into_iter()
        .map(|v| {
            usize::try_from(v).map_err(|_| {
                InterpreterError::invalid(format!(
                    "{} expects non-negative values, got {}",
                    node.name, v
                ))
            })
        })
        .collect()
}

/// Shape held in `tensor`.
pub fn as_shape(node: &Node, tensor: &HostTensor) -> Result<Shape> {
    as_usize_vector(node, tensor)
}

/// Axis set held in `tensor`. Negative axes count from the end of `rank`.
pub fn as_axis_set(node: &Node, tensor: &HostTensor, rank: usize) -> Result<AxisSet> {
    as_i64_vector(node, tensor)?
        .into_iter()
        .map(|axis| normalize_axis(axis, rank).map_err(InterpreterError::from))
        .collect()
}

/// First element of `tensor` widened to `f64`. Any dispatchable type is
/// accepted.
pub fn as_f64_scalar(node: &Node, tensor: &HostTensor) -> Result<f64> {
    dispatch_element!(tensor.element_type(), |T| {
        tensor
            .as_slice::<T>()?
            .first()
            .map(|v| v.to_f64())
            .ok_or_else(|| InterpreterError::invalid(format!("{} read an empty scalar input", node.name)))
    }, _ => Err(malformed(node, tensor)))
}

/// First element of an integer `tensor`.
pub fn as_i64_scalar(node: &Node, tensor: &HostTensor) -> Result<i64> {
    as_i64_vector(node, tensor)?
        .first()
        .copied()
        .ok_or_else(|| InterpreterError::invalid(format!("{} read an empty scalar input", node.name)))
}

/// First element of `tensor` as a flag, nonzero is true.
pub fn as_bool_scalar(node: &Node, tensor: &HostTensor) -> Result<bool> {
    Ok(as_f64_scalar(node, tensor)? != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use refgraph_core::{DataType, FunctionBuilder, NodeSpec};

    fn node() -> Node {
        let mut b = FunctionBuilder::new("f");
        let x = b.parameter("x", DataType::F32, [6]).unwrap();
        let p = b.parameter("p", DataType::I64, [1]).unwrap();
        let r = b
            .add(
                NodeSpec::new("Reshape", 1)
                    .input(x)
                    .input(p)
                    .output(DataType::F32, [6]),
            )
            .unwrap();
        b.result(r).unwrap();
        b.build().unwrap().nodes()[r].clone()
    }

    #[test]
    fn test_integer_types_are_widened() -> Result<()> {
        let n = node();
        let t = HostTensor::from_vec(vec![3], vec![2u8, 0, 7])?;
        assert_eq!(as_i64_vector(&n, &t)?, vec![2, 0, 7]);
        let t = HostTensor::from_vec(vec![2], vec![-1i16, 4])?;
        assert_eq!(as_i64_vector(&n, &t)?, vec![-1, 4]);
        Ok(())
    }

    #[test]
    fn test_float_shape_is_malformed() -> Result<()> {
        let n = node();
        let t = HostTensor::from_vec(vec![1], vec![6.0f32])?;
        assert!(matches!(
            as_shape(&n, &t),
            Err(InterpreterError::MalformedAuxiliaryInput {
                element_type: DataType::F32,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_negative_shape_rejected() -> Result<()> {
        let n = node();
        let t = HostTensor::from_vec(vec![1], vec![-2i64])?;
        assert!(matches!(
            as_usize_vector(&n, &t),
            Err(InterpreterError::InvalidArguments(_))
        ));
        Ok(())
    }

    #[test]
    fn test_axis_set_normalizes_negative_axes() -> Result<()> {
        let n = node();
        let t = HostTensor::from_vec(vec![2], vec![-1i32, 0])?;
        let axes = as_axis_set(&n, &t, 3)?;
        assert_eq!(axes.into_iter().collect::<Vec<_>>(), vec![0, 2]);
        let t = HostTensor::from_vec(vec![1], vec![3i32])?;
        assert!(as_axis_set(&n, &t, 3).is_err());
        Ok(())
    }

    #[test]
    fn test_scalars() -> Result<()> {
        let n = node();
        assert_eq!(as_f64_scalar(&n, &HostTensor::scalar(2.5f64))?, 2.5);
        assert_eq!(as_i64_scalar(&n, &HostTensor::scalar(-4i8))?, -4);
        assert!(as_bool_scalar(&n, &HostTensor::from_bools(vec![1], &[true])?)?);
        let empty = HostTensor::new(DataType::F32, vec![0])?;
        assert!(as_f64_scalar(&n, &empty).is_err());
        Ok(())
    }
}
