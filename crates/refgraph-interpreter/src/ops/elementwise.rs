use super::{auto_broadcast, expect_inputs, single_output};
use crate::dispatch::dispatch_element;
use crate::error::{InterpreterError, Result};
use crate::registry::{ExecContext, OpHandler};
use crate::shape_infer::binary_shape;
use crate::type_id::OpTypeId;
use refgraph_core::{AutoBroadcast, DataType, Element, HostTensor, Node};
use refgraph_kernels::{binary, movement, unary, ArithmeticOp, ComparisonOp};

/// Single-input elementwise operators whose output has the input's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Abs,
    Acos,
    Acosh,
    Asin,
    Asinh,
    Atan,
    Atanh,
    Ceiling,
    Cos,
    Cosh,
    Erf,
    Exp,
    Floor,
    Log,
    LogicalNot,
    Negative,
    Relu,
    Round,
    Sigmoid,
    Sign,
    Sin,
    Sinh,
    Sqrt,
    Tan,
    Tanh,
}

impl UnaryKind {
    /// Operator types handled by [`Unary`].
    pub const TABLE: &'static [(OpTypeId, UnaryKind)] = &[
        (OpTypeId::AbsV0, UnaryKind::Abs),
        (OpTypeId::AcosV0, UnaryKind::Acos),
        (OpTypeId::AcoshV3, UnaryKind::Acosh),
        (OpTypeId::AsinV0, UnaryKind::Asin),
        (OpTypeId::AsinhV3, UnaryKind::Asinh),
        (OpTypeId::AtanV0, UnaryKind::Atan),
        (OpTypeId::AtanhV3, UnaryKind::Atanh),
        (OpTypeId::CeilingV0, UnaryKind::Ceiling),
        (OpTypeId::CosV0, UnaryKind::Cos),
        (OpTypeId::CoshV0, UnaryKind::Cosh),
        (OpTypeId::ErfV0, UnaryKind::Erf),
        (OpTypeId::ExpV0, UnaryKind::Exp),
        (OpTypeId::FloorV0, UnaryKind::Floor),
        (OpTypeId::LogV0, UnaryKind::Log),
        (OpTypeId::LogicalNotV1, UnaryKind::LogicalNot),
        (OpTypeId::NegativeV0, UnaryKind::Negative),
        (OpTypeId::ReluV0, UnaryKind::Relu),
        (OpTypeId::RoundV0, UnaryKind::Round),
        (OpTypeId::SigmoidV0, UnaryKind::Sigmoid),
        (OpTypeId::SignV0, UnaryKind::Sign),
        (OpTypeId::SinV0, UnaryKind::Sin),
        (OpTypeId::SinhV0, UnaryKind::Sinh),
        (OpTypeId::SqrtV0, UnaryKind::Sqrt),
        (OpTypeId::TanV0, UnaryKind::Tan),
        (OpTypeId::TanhV0, UnaryKind::Tanh),
    ];

    fn apply<T: Element>(self, arg: &[T], out: &mut [T]) -> refgraph_kernels::Result<()> {
        match self {
            UnaryKind::Abs => unary::abs(arg, out),
            UnaryKind::Acos => unary::real(arg, out, f64::acos),
            UnaryKind::Acosh => unary::real(arg, out, f64::acosh),
            UnaryKind::Asin => unary::real(arg, out, f64::asin),
            UnaryKind::Asinh => unary::real(arg, out, f64::asinh),
            UnaryKind::Atan => unary::real(arg, out, f64::atan),
            UnaryKind::Atanh => unary::real(arg, out, f64::atanh),
            UnaryKind::Ceiling => unary::ceiling(arg, out),
            UnaryKind::Cos => unary::real(arg, out, f64::cos),
            UnaryKind::Cosh => unary::real(arg, out, f64::cosh),
            UnaryKind::Erf => unary::real(arg, out, unary::erf),
            UnaryKind::Exp => unary::real(arg, out, f64::exp),
            UnaryKind::Floor => unary::floor(arg, out),
            UnaryKind::Log => unary::real(arg, out, f64::ln),
            UnaryKind::LogicalNot => unary::logical_not(arg, out),
            UnaryKind::Negative => unary::negative(arg, out),
            UnaryKind::Relu => unary::relu(arg, out),
            UnaryKind::Round => unary::round(arg, out),
            UnaryKind::Sigmoid => unary::sigmoid(arg, out),
            UnaryKind::Sign => unary::sign(arg, out),
            UnaryKind::Sin => unary::real(arg, out, f64::sin),
            UnaryKind::Sinh => unary::real(arg, out, f64::sinh),
            UnaryKind::Sqrt => unary::real(arg, out, f64::sqrt),
            UnaryKind::Tan => unary::real(arg, out, f64::tan),
            UnaryKind::Tanh => unary::real(arg, out, f64::tanh),
        }
    }
}

// Unary: elementwise math, output shaped like the input
pub struct Unary(pub UnaryKind);

impl Unary {
    fn run<T: Element>(&self, arg: &HostTensor, out: &mut HostTensor) -> Result<()> {
        out.set_shape(arg.shape().to_vec());
        self.0.apply(arg.as_slice::<T>()?, out.as_mut_slice::<T>()?)?;
        Ok(())
    }
}

impl OpHandler for Unary {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type, |T| self.run::<T>(inputs[0], out),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// Clamp: saturate into [min, max]
pub struct Clamp;

impl OpHandler for Clamp {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let min = node.attr_f64("min")?;
        let max = node.attr_f64("max")?;
        let out = single_output(node, outputs)?;
        out.set_shape(inputs[0].shape().to_vec());
        dispatch_element!(element_type, |T| {
            unary::clamp(inputs[0].as_slice::<T>()?, out.as_mut_slice::<T>()?, min, max)?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

fn backprop<T: Element>(
    arg: &HostTensor,
    delta: &HostTensor,
    out: &mut HostTensor,
    kernel: fn(&[T], &[T], &mut [T]) -> refgraph_kernels::Result<()>,
) -> Result<()> {
    out.set_shape(arg.shape().to_vec());
    kernel(arg.as_slice::<T>()?, delta.as_slice::<T>()?, out.as_mut_slice::<T>()?)?;
    Ok(())
}

// ReluBackprop: delta where the forward input was positive
pub struct ReluBackprop;

impl OpHandler for ReluBackprop {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type,
            |T| backprop::<T>(inputs[0], inputs[1], out, unary::relu_backprop::<T>),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// SigmoidBackprop: delta scaled by the sigmoid derivative
pub struct SigmoidBackprop;

impl OpHandler for SigmoidBackprop {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type,
            |T| backprop::<T>(inputs[0], inputs[1], out, unary::sigmoid_backprop::<T>),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

fn run_arithmetic<T: Element>(
    op: ArithmeticOp,
    rule: AutoBroadcast,
    a: &HostTensor,
    b: &HostTensor,
    out: &mut HostTensor,
) -> Result<()> {
    out.set_shape(binary_shape(a.shape(), b.shape(), rule)?);
    binary::arithmetic(
        op,
        a.as_slice::<T>()?,
        b.as_slice::<T>()?,
        out.as_mut_slice::<T>()?,
        a.shape(),
        b.shape(),
        rule,
    )?;
    Ok(())
}

// Binary arithmetic and logical ops under the node's broadcast rule
pub struct Arithmetic(pub ArithmeticOp);

impl OpHandler for Arithmetic {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        // Atan2 has no broadcast rule of its own
        let rule = match self.0 {
            ArithmeticOp::Atan2 => AutoBroadcast::None,
            _ => auto_broadcast(node)?,
        };
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type,
            |T| run_arithmetic::<T>(self.0, rule, inputs[0], inputs[1], out),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// Divide: integer quotients floor unless `pythondiv` is false
pub struct Divide;

impl OpHandler for Divide {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let op = ArithmeticOp::Divide {
            pythondiv: node.attr_bool_or("pythondiv", true)?,
        };
        let rule = auto_broadcast(node)?;
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type,
            |T| run_arithmetic::<T>(op, rule, inputs[0], inputs[1], out),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

fn run_comparison<T: Element>(
    op: ComparisonOp,
    rule: AutoBroadcast,
    a: &HostTensor,
    b: &HostTensor,
    out: &mut HostTensor,
) -> Result<()> {
    out.set_shape(binary_shape(a.shape(), b.shape(), rule)?);
    binary::compare(
        op,
        a.as_slice::<T>()?,
        b.as_slice::<T>()?,
        out.as_mut_slice::<u8>()?,
        a.shape(),
        b.shape(),
        rule,
    )?;
    Ok(())
}

// Comparisons: typed on the inputs, boolean bytes out
pub struct Comparison(pub ComparisonOp);

impl OpHandler for Comparison {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 2)?;
        let rule = auto_broadcast(node)?;
        let out = single_output(node, outputs)?;
        dispatch_element!(element_type,
            |T| run_comparison::<T>(self.0, rule, inputs[0], inputs[1], out),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

// Select: pick from the second or third input by a boolean condition
pub struct Select;

impl OpHandler for Select {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 3)?;
        let out = single_output(node, outputs)?;
        out.set_shape(inputs[1].shape().to_vec());
        let cond = inputs[0].as_slice::<u8>()?;
        dispatch_element!(element_type, |T| {
            movement::select(
                cond,
                inputs[1].as_slice::<T>()?,
                inputs[2].as_slice::<T>()?,
                out.as_mut_slice::<T>()?,
            )?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other)))
    }
}

fn convert_into<T: Element>(node: &Node, arg: &[T], out: &mut HostTensor) -> Result<()> {
    match out.element_type() {
        DataType::Boolean => Ok(movement::convert_to_bool(arg, out.as_mut_slice::<u8>()?)?),
        target => dispatch_element!(target, |U| {
            movement::convert::<T, U>(arg, out.as_mut_slice::<U>()?)?;
            Ok(())
        }, other => Err(InterpreterError::element_type(node, other))),
    }
}

// Convert: typed on the input, nested dispatch on the target type
pub struct Convert;

impl OpHandler for Convert {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()> {
        expect_inputs(node, inputs, 1)?;
        let out = single_output(node, outputs)?;
        out.set_shape(inputs[0].shape().to_vec());
        dispatch_element!(element_type,
            |T| convert_into::<T>(node, inputs[0].as_slice::<T>()?, out),
            other => Err(InterpreterError::element_type(node, other)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::run_node;
    use refgraph_core::NodeSpec;

    #[test]
    fn test_unary_table_is_unique() {
        let mut ids: Vec<_> = UnaryKind::TABLE.iter().map(|(id, _)| *id).collect();
        ids.sort_by_key(|id| id.versioned_name());
        ids.dedup();
        assert_eq!(ids.len(), UnaryKind::TABLE.len());
    }

    #[test]
    fn test_sqrt_and_abs() -> Result<()> {
        let x = HostTensor::from_vec(vec![3], vec![4.0f64, 9.0, 0.25])?;
        let out = run_node(NodeSpec::new("Sqrt", 0).output(DataType::F64, [3]), &[x])?;
        assert_eq!(out[0].to_vec::<f64>()?, vec![2.0, 3.0, 0.5]);

        let x = HostTensor::from_vec(vec![2], vec![-3i16, 5])?;
        let out = run_node(NodeSpec::new("Abs", 0).output(DataType::I16, [2]), &[x])?;
        assert_eq!(out[0].to_vec::<i16>()?, vec![3, 5]);
        Ok(())
    }

    #[test]
    fn test_pdpd_broadcast_add() -> Result<()> {
        let a = HostTensor::from_vec(vec![2, 3], vec![1i32, 2, 3, 4, 5, 6])?;
        let b = HostTensor::from_vec(vec![2], vec![10i32, 20])?;
        let spec = NodeSpec::new("Add", 1)
            .output(DataType::I32, [2, 3])
            .attr("auto_broadcast", "pdpd")
            .attr("pdpd_axis", 0i64);
        let out = run_node(spec, &[a, b])?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![11, 12, 13, 24, 25, 26]);
        Ok(())
    }

    #[test]
    fn test_divide_floors_integers() -> Result<()> {
        let a = HostTensor::from_vec(vec![2], vec![-7i32, 7])?;
        let b = HostTensor::from_vec(vec![2], vec![2i32, 2])?;
        let out = run_node(
            NodeSpec::new("Divide", 1).output(DataType::I32, [2]),
            &[a.clone(), b.clone()],
        )?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![-4, 3]);

        let spec = NodeSpec::new("Divide", 1)
            .output(DataType::I32, [2])
            .attr("pythondiv", false);
        let out = run_node(spec, &[a, b])?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![-3, 3]);
        Ok(())
    }

    #[test]
    fn test_comparison_writes_bytes() -> Result<()> {
        let a = HostTensor::from_vec(vec![3], vec![1.0f32, 5.0, 3.0])?;
        let b = HostTensor::from_vec(vec![3], vec![2.0f32, 2.0, 3.0])?;
        let out = run_node(NodeSpec::new("GreaterEqual", 1).output(DataType::Boolean, [3]), &[a, b])?;
        assert_eq!(out[0].element_type(), DataType::Boolean);
        assert_eq!(out[0].to_vec::<u8>()?, vec![0, 1, 1]);
        Ok(())
    }

    #[test]
    fn test_convert_to_bool_and_int() -> Result<()> {
        let x = HostTensor::from_vec(vec![3], vec![0.0f32, -2.7, 3.9])?;
        let out = run_node(NodeSpec::new("Convert", 0).output(DataType::Boolean, [3]), &[x.clone()])?;
        assert_eq!(out[0].to_vec::<u8>()?, vec![0, 1, 1]);
        let out = run_node(NodeSpec::new("Convert", 0).output(DataType::I32, [3]), &[x])?;
        assert_eq!(out[0].to_vec::<i32>()?, vec![0, -2, 3]);
        Ok(())
    }

    #[test]
    fn test_convert_to_half_is_rejected() -> Result<()> {
        let x = HostTensor::from_vec(vec![1], vec![1.0f32])?;
        let err = run_node(NodeSpec::new("Convert", 0).output(DataType::F16, [1]), &[x]);
        assert!(matches!(
            err,
            Err(InterpreterError::UnsupportedElementType {
                element_type: DataType::F16,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_select() -> Result<()> {
        let c = HostTensor::from_bools(vec![3], &[true, false, true])?;
        let a = HostTensor::from_vec(vec![3], vec![1u32, 2, 3])?;
        let b = HostTensor::from_vec(vec![3], vec![7u32, 8, 9])?;
        let out = run_node(NodeSpec::new("Select", 0).output(DataType::U32, [3]), &[c, a, b])?;
        assert_eq!(out[0].to_vec::<u32>()?, vec![1, 8, 3]);
        Ok(())
    }
}
