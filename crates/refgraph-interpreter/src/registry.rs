//! Operator registry.
//!
//! Every [`OpTypeId`] maps to exactly one handler. Operators the interpreter
//! does not implement are registered explicitly with the unsupported
//! handler, so an unmatched entry is a registry bug rather than a silent
//! fall-through.

use crate::error::{InterpreterError, Result};
use crate::ops;
use crate::state::StateStore;
use crate::type_id::OpTypeId;
use refgraph_core::{DataType, HostTensor, Node};
use refgraph_kernels::Communicator;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-call resources a handler may use besides its buffers.
pub struct ExecContext<'a> {
    /// Per-node state of the running executable
    pub states: &'a mut StateStore,
    /// Transport for collective operators
    pub communicator: &'a dyn Communicator,
}

/// Execution of one operator type.
pub trait OpHandler: Send + Sync {
    /// Run `node` on `inputs`, writing every output.
    ///
    /// `element_type` is the node's working type; handlers that depend on a
    /// second type read it from the node's declared ports.
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        node: &Node,
        element_type: DataType,
        outputs: &mut [HostTensor],
        inputs: &[&HostTensor],
    ) -> Result<()>;

    /// Whether the handler implements the operator
    fn is_supported(&self) -> bool {
        true
    }
}

/// Registry of handlers keyed by operator type
pub struct OperatorRegistry {
    handlers: HashMap<OpTypeId, Arc<dyn OpHandler>>,
}

impl OperatorRegistry {
    /// Create a registry with every built-in handler
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::with_capacity(OpTypeId::ALL.len() + 1),
        };

        registry.register_elementwise();
        registry.register_reduction();
        registry.register_movement();
        registry.register_indexing();
        registry.register_nn();
        registry.register_quantized();
        registry.register_random();
        registry.register_collective();
        registry.register_unsupported();
        debug_assert!(
            registry.missing().is_empty(),
            "operator types without a handler: {:?}",
            registry.missing()
        );

        registry
    }

    /// Register a handler for `id`
    pub fn register(&mut self, id: OpTypeId, handler: Arc<dyn OpHandler>) {
        let previous = self.handlers.insert(id, handler);
        debug_assert!(previous.is_none(), "{id} registered twice");
    }

    fn register_all(&mut self, ids: &[OpTypeId], handler: Arc<dyn OpHandler>) {
        for &id in ids {
            self.register(id, handler.clone());
        }
    }

    /// Handler for `id`
    pub fn get(&self, id: OpTypeId) -> Result<&dyn OpHandler> {
        self.handlers
            .get(&id)
            .map(|h| h.as_ref())
            .ok_or_else(|| InterpreterError::UnsupportedOperator {
                name: id.name().to_string(),
                version: id.version(),
            })
    }

    /// Whether `id` has an implementing handler
    pub fn is_supported(&self, id: OpTypeId) -> bool {
        self.handlers.get(&id).is_some_and(|h| h.is_supported())
    }

    /// Operator types with an implementing handler
    pub fn supported_operators(&self) -> Vec<OpTypeId> {
        let mut ids: Vec<_> = self
            .handlers
            .iter()
            .filter(|(_, h)| h.is_supported())
            .map(|(&id, _)| id)
            .collect();
        ids.sort_by_key(|id| id.versioned_name());
        ids
    }

    /// Entries of the type table without any handler.
    pub fn missing(&self) -> Vec<OpTypeId> {
        OpTypeId::ALL
            .iter()
            .copied()
            .chain(std::iter::once(OpTypeId::Unknown))
            .filter(|id| !self.handlers.contains_key(id))
            .collect()
    }

    fn register_elementwise(&mut self) {
        use ops::elementwise::*;
        use refgraph_kernels::{ArithmeticOp, ComparisonOp};
        use OpTypeId::*;

        for (id, kind) in UnaryKind::TABLE {
            self.register(*id, Arc::new(Unary(*kind)));
        }
        self.register(ClampV0, Arc::new(Clamp));
        self.register(ReluBackpropV0, Arc::new(ReluBackprop));
        self.register(SigmoidBackpropV0, Arc::new(SigmoidBackprop));

        self.register(AddV1, Arc::new(Arithmetic(ArithmeticOp::Add)));
        self.register(SubtractV1, Arc::new(Arithmetic(ArithmeticOp::Subtract)));
        self.register(MultiplyV1, Arc::new(Arithmetic(ArithmeticOp::Multiply)));
        self.register(DivideV1, Arc::new(Divide));
        self.register(MaximumV1, Arc::new(Arithmetic(ArithmeticOp::Maximum)));
        self.register(MinimumV1, Arc::new(Arithmetic(ArithmeticOp::Minimum)));
        self.register(PowerV1, Arc::new(Arithmetic(ArithmeticOp::Power)));
        self.register(Atan2V0, Arc::new(Arithmetic(ArithmeticOp::Atan2)));
        self.register(LogicalAndV1, Arc::new(Arithmetic(ArithmeticOp::LogicalAnd)));
        self.register(LogicalOrV1, Arc::new(Arithmetic(ArithmeticOp::LogicalOr)));
        self.register(LogicalXorV1, Arc::new(Arithmetic(ArithmeticOp::LogicalXor)));

        self.register(EqualV1, Arc::new(Comparison(ComparisonOp::Equal)));
        self.register(NotEqualV1, Arc::new(Comparison(ComparisonOp::NotEqual)));
        self.register(GreaterV1, Arc::new(Comparison(ComparisonOp::Greater)));
        self.register(GreaterEqualV1, Arc::new(Comparison(ComparisonOp::GreaterEqual)));
        self.register(LessV1, Arc::new(Comparison(ComparisonOp::Less)));
        self.register(LessEqualV1, Arc::new(Comparison(ComparisonOp::LessEqual)));

        self.register(SelectV0, Arc::new(Select));
        self.register(ConvertV0, Arc::new(Convert));
    }

    fn register_reduction(&mut self) {
        use ops::reduction::*;
        use OpTypeId::*;

        let static_axes = |kind| Arc::new(Reduce::with_static_axes(kind));
        self.register(AllV0, static_axes(ReduceKind::All));
        self.register(AnyV0, static_axes(ReduceKind::Any));
        self.register(MaxV0, static_axes(ReduceKind::Max));
        self.register(MinV0, static_axes(ReduceKind::Min));
        self.register(ProductV0, static_axes(ReduceKind::Product));

        self.register(SumV0, Arc::new(Reduce::with_axes_input(ReduceKind::Sum, false)));

        let keep_dims = |kind| Arc::new(Reduce::with_axes_input(kind, true));
        self.register(ReduceLogicalAndV1, keep_dims(ReduceKind::All));
        self.register(ReduceLogicalOrV1, keep_dims(ReduceKind::Any));
        self.register(ReduceMaxV1, keep_dims(ReduceKind::Max));
        self.register(ReduceMeanV1, keep_dims(ReduceKind::Mean));
        self.register(ReduceMinV1, keep_dims(ReduceKind::Min));
        self.register(ReduceProdV1, keep_dims(ReduceKind::Product));
        self.register(ReduceSumV1, keep_dims(ReduceKind::Sum));

        self.register(ArgMaxV0, Arc::new(ArgReduce { max: true }));
        self.register(ArgMinV0, Arc::new(ArgReduce { max: false }));
        self.register(SoftmaxV0, Arc::new(Softmax));
        self.register(CumSumV0, Arc::new(CumSum));
        self.register(TopKV0, Arc::new(TopK));
    }

    fn register_movement(&mut self) {
        use ops::movement::*;
        use OpTypeId::*;

        self.register(BroadcastV0, Arc::new(Broadcast));
        self.register(BroadcastLikeV0, Arc::new(NoOp));
        self.register(ParameterV0, Arc::new(NoOp));
        self.register(ResultV0, Arc::new(ResultCopy));
        self.register(ConcatV0, Arc::new(Concat));
        self.register(ConstantV0, Arc::new(Constant));
        self.register(ReshapeV0, Arc::new(Reshape));
        self.register(ReshapeV1, Arc::new(DynReshape));
        self.register(TransposeV1, Arc::new(Transpose));
        self.register(ReverseV0, Arc::new(Reverse));
        self.register(ReverseSequenceV0, Arc::new(ReverseSequence));
        self.register(SliceV0, Arc::new(Slice));
        self.register(DynSliceV0, Arc::new(DynSlice));
        self.register(StridedSliceV1, Arc::new(StridedSlice));
        self.register(ReplaceSliceV0, Arc::new(ReplaceSlice));
        self.register(PadV0, Arc::new(Pad));
        self.register(OneHotV0, Arc::new(OneHot));
        self.register_all(&[ShapeOfV0, ShapeOfV3], Arc::new(ShapeOf));
        self.register(RangeV0, Arc::new(Range));
    }

    fn register_indexing(&mut self) {
        use ops::indexing::*;
        use OpTypeId::*;

        self.register(GatherV0, Arc::new(Gather));
        self.register(GatherNdV0, Arc::new(GatherNd));
        self.register(ScatterAddV0, Arc::new(ScatterAdd { nd: false }));
        self.register(ScatterNdAddV0, Arc::new(ScatterAdd { nd: true }));
        self.register(EmbeddingLookupV0, Arc::new(EmbeddingLookup));
    }

    fn register_nn(&mut self) {
        use ops::nn::*;
        use OpTypeId::*;

        self.register(DotV0, Arc::new(Dot));
        self.register(MatMulV0, Arc::new(MatMul));
        self.register(BatchMatMulV0, Arc::new(BatchMatMul));
        self.register(ConvolutionV0, Arc::new(Convolution));
        self.register(ConvolutionBackpropDataV0, Arc::new(ConvolutionBackpropData));
        self.register(ConvolutionBackpropFiltersV0, Arc::new(ConvolutionBackpropFilters));
        self.register(AvgPoolV0, Arc::new(AvgPool));
        self.register(AvgPoolBackpropV0, Arc::new(AvgPoolBackprop));
        self.register(MaxPoolV0, Arc::new(MaxPool));
        self.register(MaxPoolBackpropV0, Arc::new(MaxPoolBackprop));
        self.register(BatchNormTrainingV0, Arc::new(BatchNormTraining));
        self.register(BatchNormInferenceV0, Arc::new(BatchNormInference));
        self.register(BatchNormTrainingBackpropV0, Arc::new(BatchNormTrainingBackprop));
        self.register(LrnV0, Arc::new(Lrn));
    }

    fn register_quantized(&mut self) {
        use ops::quantized::*;
        use OpTypeId::*;

        self.register(QuantizeV0, Arc::new(Quantize));
        self.register(DequantizeV0, Arc::new(Dequantize));
        self.register(QuantizedConvolutionV0, Arc::new(QuantizedConvolution));
        self.register_all(
            &[
                QuantizedConvolutionBiasV0,
                QuantizedConvolutionBiasAddV0,
                QuantizedConvolutionBiasSignedAddV0,
                QuantizedConvolutionReluV0,
                QuantizedDotBiasV0,
                QuantizedDotV0,
            ],
            Arc::new(QuantizedDot),
        );
    }

    fn register_random(&mut self) {
        use ops::random::*;
        use OpTypeId::*;

        self.register(GenerateMaskV0, Arc::new(GenerateMask));
        self.register(RandomUniformV0, Arc::new(RandomUniform));
    }

    fn register_collective(&mut self) {
        use ops::collective::*;
        use OpTypeId::*;

        self.register(AllReduceV0, Arc::new(AllReduce));
        self.register(BroadcastDistributedV0, Arc::new(BroadcastDistributed));
        self.register(SendV0, Arc::new(SendTo));
        self.register(RecvV0, Arc::new(RecvFrom));
    }

    fn register_unsupported(&mut self) {
        self.register_all(ops::unsupported::UNSUPPORTED, Arc::new(ops::unsupported::Unsupported));
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
