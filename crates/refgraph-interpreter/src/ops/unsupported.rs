//! Operators known to the type table but without a reference kernel.

use crate::error::{InterpreterError, Result};
use crate::registry::{ExecContext, OpHandler};
use crate::type_id::OpTypeId::{self, *};
use refgraph_core::{DataType, HostTensor, Node};

/// Operators registered with [`Unsupported`]. Fused and framework-level
/// operators are expected to be decomposed before they reach the
/// interpreter; the newer opset variants have no reference kernel.
pub const UNSUPPORTED: &[OpTypeId] = &[
    AvgPoolV1, BatchMatMulTransposeV0, BatchToSpaceV1, BinaryConvolutionV1, BroadcastV1,
    BroadcastV3, BucketizeV3, ConvertLikeV1, ConvolutionBackpropDataV1, ConvolutionBiasAddV0,
    ConvolutionBiasBackpropFiltersBiasV0, ConvolutionBiasV0, ConvolutionV1, CropAndResizeV0, CrossEntropyBackpropV0,
    CrossEntropyV0, CtcGreedyDecoderV0, DeformableConvolutionV1, DeformablePsroiPoolingV1, DepthToSpaceV0,
    DetectionOutputV0, DynBroadcastV0, DynPadV0, DynReplaceSliceV0, EluV0,
    EmbeddingBagOffsetsSumV3, EmbeddingBagPackedSumV3, EmbeddingSegmentsSumV3, ExtractImagePatchesV3, FakeQuantizeV0,
    FloorModV1, FunctionCallV0, GatherTreeV1, GatherV1, GeluBackpropFactorV0,
    GeluV0, GemmV0, GrnV0, GroupConvolutionBackpropDataV0, GroupConvolutionBackpropDataV1,
    GroupConvolutionBackpropFiltersV0, GroupConvolutionV0, GroupConvolutionV1, GruCellV3, HardSigmoidV0,
    InterpolateV0, InterpolateV3, LayerNormBackpropV0, LayerNormV0, LstmCellV0,
    LstmSequenceV0, MaxPoolV1, ModV1, MvnV0, NonMaxSuppressionV1,
    NonMaxSuppressionV3, NonZeroV3, NormalizeL2V0, OneHotV1, PReluV0,
    PadV1, PartialSliceBackpropV0, PartialSliceV0, PassthroughV0, PriorBoxClusteredV0,
    PriorBoxV0, ProposalV0, PsroiPoolingV0, RegionYoloV0, ReorgYoloV0,
    ReverseV1, RnnCellV0, RoiAlignV3, RoiPoolingV0, ScalarConstantLikeV0,
    ScaleShiftV0, ScatterElementsUpdateV3, ScatterNdV0, ScatterUpdateV3, SelectV1,
    SeluV0, ShuffleChannelsV0, SoftmaxCrossEntropyBackpropV0, SoftmaxCrossEntropyV0, SoftmaxV1,
    SpaceToBatchV1, SpaceToDepthV0, SplitV0, SplitV1, SquaredDifferenceV0,
    SqueezeV0, StackV0, StopGradientV0, TensorIteratorV0, TileV0,
    TopKV1, TopKV3, UnsqueezeV0, VariadicSplitV1,
    Unknown,
];

// Fails every call with an unsupported-operator error
pub struct Unsupported;

impl OpHandler for Unsupported {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        node: &Node,
        _element_type: DataType,
        _outputs: &mut [HostTensor],
        _inputs: &[&HostTensor],
    ) -> Result<()> {
        Err(InterpreterError::unsupported(node))
    }

    fn is_supported(&self) -> bool {
        false
    }
}
