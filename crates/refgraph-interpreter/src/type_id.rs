//! Versioned operator identities.
//!
//! Every operator the interpreter knows about, supported or not, has one
//! [`OpTypeId`]. Nodes are resolved through [`get_typeid`]; anything absent
//! from the table maps to [`OpTypeId::Unknown`] and is reported as an
//! unsupported operator when it reaches dispatch.

use refgraph_core::Node;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

macro_rules! op_table {
    ($($variant:ident => ($name:literal, $version:literal)),* $(,)?) => {
        /// Dense identity of a versioned operator.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum OpTypeId {
            $(
                #[doc = concat!("`v", stringify!($version), "::", $name, "`")]
                $variant,
            )*
            /// Operator absent from the table
            Unknown,
        }

        impl OpTypeId {
            /// Every known operator, excluding [`OpTypeId::Unknown`].
            pub const ALL: &'static [OpTypeId] = &[$(OpTypeId::$variant),*];

            /// Operator name without the version.
            pub fn name(self) -> &'static str {
                match self {
                    $(OpTypeId::$variant => $name,)*
                    OpTypeId::Unknown => "UnknownOp",
                }
            }

            /// Operator set version.
            pub fn version(self) -> u32 {
                match self {
                    $(OpTypeId::$variant => $version,)*
                    OpTypeId::Unknown => 0,
                }
            }
        }
    };
}

op_table! {
    AbsV0 => ("Abs", 0),
    AcosV0 => ("Acos", 0),
    AcoshV3 => ("Acosh", 3),
    AddV1 => ("Add", 1),
    AllV0 => ("All", 0),
    AllReduceV0 => ("AllReduce", 0),
    AnyV0 => ("Any", 0),
    ArgMinV0 => ("ArgMin", 0),
    ArgMaxV0 => ("ArgMax", 0),
    AsinV0 => ("Asin", 0),
    AsinhV3 => ("Asinh", 3),
    AtanV0 => ("Atan", 0),
    AtanhV3 => ("Atanh", 3),
    Atan2V0 => ("Atan2", 0),
    AvgPoolV0 => ("AvgPool", 0),
    BatchMatMulV0 => ("BatchMatMul", 0),
    BatchNormTrainingV0 => ("BatchNormTraining", 0),
    BatchNormInferenceV0 => ("BatchNormInference", 0),
    BatchNormTrainingBackpropV0 => ("BatchNormTrainingBackprop", 0),
    AvgPoolBackpropV0 => ("AvgPoolBackprop", 0),
    BroadcastV0 => ("Broadcast", 0),
    BroadcastDistributedV0 => ("BroadcastDistributed", 0),
    BroadcastLikeV0 => ("BroadcastLike", 0),
    CeilingV0 => ("Ceiling", 0),
    ClampV0 => ("Clamp", 0),
    ConcatV0 => ("Concat", 0),
    ConstantV0 => ("Constant", 0),
    ConvertV0 => ("Convert", 0),
    ConvolutionV0 => ("Convolution", 0),
    ConvolutionBackpropFiltersV0 => ("ConvolutionBackpropFilters", 0),
    ConvolutionBackpropDataV0 => ("ConvolutionBackpropData", 0),
    CosV0 => ("Cos", 0),
    CoshV0 => ("Cosh", 0),
    CumSumV0 => ("CumSum", 0),
    CropAndResizeV0 => ("CropAndResize", 0),
    DequantizeV0 => ("Dequantize", 0),
    DivideV1 => ("Divide", 1),
    DotV0 => ("Dot", 0),
    DynSliceV0 => ("DynSlice", 0),
    EmbeddingLookupV0 => ("EmbeddingLookup", 0),
    EqualV1 => ("Equal", 1),
    ErfV0 => ("Erf", 0),
    ExpV0 => ("Exp", 0),
    FunctionCallV0 => ("FunctionCall", 0),
    FloorV0 => ("Floor", 0),
    GatherV0 => ("Gather", 0),
    GatherNdV0 => ("GatherND", 0),
    GenerateMaskV0 => ("GenerateMask", 0),
    GreaterV1 => ("Greater", 1),
    GreaterEqualV1 => ("GreaterEqual", 1),
    LessV1 => ("Less", 1),
    LessEqualV1 => ("LessEqual", 1),
    LogV0 => ("Log", 0),
    LogicalAndV1 => ("LogicalAnd", 1),
    LogicalNotV1 => ("LogicalNot", 1),
    LogicalOrV1 => ("LogicalOr", 1),
    LogicalXorV1 => ("LogicalXor", 1),
    LrnV0 => ("LRN", 0),
    MatMulV0 => ("MatMul", 0),
    MaxV0 => ("Max", 0),
    MaximumV1 => ("Maximum", 1),
    MaxPoolV0 => ("MaxPool", 0),
    MaxPoolBackpropV0 => ("MaxPoolBackprop", 0),
    MinV0 => ("Min", 0),
    MinimumV1 => ("Minimum", 1),
    MultiplyV1 => ("Multiply", 1),
    NegativeV0 => ("Negative", 0),
    NotEqualV1 => ("NotEqual", 1),
    OneHotV0 => ("OneHot", 0),
    ParameterV0 => ("Parameter", 0),
    PassthroughV0 => ("Passthrough", 0),
    PadV0 => ("Pad", 0),
    PowerV1 => ("Power", 1),
    ProductV0 => ("Product", 0),
    QuantizeV0 => ("Quantize", 0),
    QuantizedConvolutionV0 => ("QuantizedConvolution", 0),
    QuantizedConvolutionBiasV0 => ("QuantizedConvolutionBias", 0),
    QuantizedConvolutionBiasAddV0 => ("QuantizedConvolutionBiasAdd", 0),
    QuantizedConvolutionBiasSignedAddV0 => ("QuantizedConvolutionBiasSignedAdd", 0),
    QuantizedConvolutionReluV0 => ("QuantizedConvolutionRelu", 0),
    QuantizedDotBiasV0 => ("QuantizedDotBias", 0),
    QuantizedDotV0 => ("QuantizedDot", 0),
    RandomUniformV0 => ("RandomUniform", 0),
    RecvV0 => ("Recv", 0),
    RangeV0 => ("Range", 0),
    ReduceLogicalAndV1 => ("ReduceLogicalAnd", 1),
    ReduceLogicalOrV1 => ("ReduceLogicalOr", 1),
    ReduceMaxV1 => ("ReduceMax", 1),
    ReduceMeanV1 => ("ReduceMean", 1),
    ReduceMinV1 => ("ReduceMin", 1),
    ReduceProdV1 => ("ReduceProd", 1),
    ReduceSumV1 => ("ReduceSum", 1),
    ReluV0 => ("Relu", 0),
    ReluBackpropV0 => ("ReluBackprop", 0),
    ReplaceSliceV0 => ("ReplaceSlice", 0),
    ReshapeV0 => ("Reshape", 0),
    ReshapeV1 => ("Reshape", 1),
    ResultV0 => ("Result", 0),
    ReverseV0 => ("Reverse", 0),
    ReverseSequenceV0 => ("ReverseSequence", 0),
    RoundV0 => ("Round", 0),
    ScatterAddV0 => ("ScatterAdd", 0),
    ScatterNdAddV0 => ("ScatterNDAdd", 0),
    SelectV0 => ("Select", 0),
    SendV0 => ("Send", 0),
    ShapeOfV0 => ("ShapeOf", 0),
    ShapeOfV3 => ("ShapeOf", 3),
    SigmoidV0 => ("Sigmoid", 0),
    SigmoidBackpropV0 => ("SigmoidBackprop", 0),
    SignV0 => ("Sign", 0),
    SinV0 => ("Sin", 0),
    SinhV0 => ("Sinh", 0),
    SliceV0 => ("Slice", 0),
    SoftmaxV0 => ("Softmax", 0),
    SqrtV0 => ("Sqrt", 0),
    StopGradientV0 => ("StopGradient", 0),
    StridedSliceV1 => ("StridedSlice", 1),
    SubtractV1 => ("Subtract", 1),
    SumV0 => ("Sum", 0),
    TanV0 => ("Tan", 0),
    TanhV0 => ("Tanh", 0),
    TopKV0 => ("TopK", 0),
    TransposeV1 => ("Transpose", 1),
    AvgPoolV1 => ("AvgPool", 1),
    BatchMatMulTransposeV0 => ("BatchMatMulTranspose", 0),
    BatchToSpaceV1 => ("BatchToSpace", 1),
    BinaryConvolutionV1 => ("BinaryConvolution", 1),
    BroadcastV1 => ("Broadcast", 1),
    BroadcastV3 => ("Broadcast", 3),
    BucketizeV3 => ("Bucketize", 3),
    ConvertLikeV1 => ("ConvertLike", 1),
    ConvolutionV1 => ("Convolution", 1),
    ConvolutionBackpropDataV1 => ("ConvolutionBackpropData", 1),
    ConvolutionBiasV0 => ("ConvolutionBias", 0),
    ConvolutionBiasAddV0 => ("ConvolutionBiasAdd", 0),
    ConvolutionBiasBackpropFiltersBiasV0 => ("ConvolutionBiasBackpropFiltersBias", 0),
    CrossEntropyV0 => ("CrossEntropy", 0),
    CrossEntropyBackpropV0 => ("CrossEntropyBackprop", 0),
    CtcGreedyDecoderV0 => ("CTCGreedyDecoder", 0),
    DeformableConvolutionV1 => ("DeformableConvolution", 1),
    DeformablePsroiPoolingV1 => ("DeformablePSROIPooling", 1),
    DepthToSpaceV0 => ("DepthToSpace", 0),
    DetectionOutputV0 => ("DetectionOutput", 0),
    DynBroadcastV0 => ("DynBroadcast", 0),
    DynPadV0 => ("DynPad", 0),
    DynReplaceSliceV0 => ("DynReplaceSlice", 0),
    EluV0 => ("Elu", 0),
    EmbeddingBagOffsetsSumV3 => ("EmbeddingBagOffsetsSum", 3),
    EmbeddingBagPackedSumV3 => ("EmbeddingBagPackedSum", 3),
    EmbeddingSegmentsSumV3 => ("EmbeddingSegmentsSum", 3),
    ExtractImagePatchesV3 => ("ExtractImagePatches", 3),
    FakeQuantizeV0 => ("FakeQuantize", 0),
    FloorModV1 => ("FloorMod", 1),
    GatherV1 => ("Gather", 1),
    GatherTreeV1 => ("GatherTree", 1),
    GeluV0 => ("Gelu", 0),
    GeluBackpropFactorV0 => ("GeluBackpropFactor", 0),
    GemmV0 => ("Gemm", 0),
    GrnV0 => ("GRN", 0),
    GroupConvolutionV0 => ("GroupConvolution", 0),
    GroupConvolutionV1 => ("GroupConvolution", 1),
    GroupConvolutionBackpropDataV0 => ("GroupConvolutionBackpropData", 0),
    GroupConvolutionBackpropDataV1 => ("GroupConvolutionBackpropData", 1),
    GroupConvolutionBackpropFiltersV0 => ("GroupConvolutionBackpropFilters", 0),
    GruCellV3 => ("GRUCell", 3),
    HardSigmoidV0 => ("HardSigmoid", 0),
    InterpolateV0 => ("Interpolate", 0),
    InterpolateV3 => ("Interpolate", 3),
    LayerNormV0 => ("LayerNorm", 0),
    LayerNormBackpropV0 => ("LayerNormBackprop", 0),
    LstmCellV0 => ("LSTMCell", 0),
    LstmSequenceV0 => ("LSTMSequence", 0),
    MaxPoolV1 => ("MaxPool", 1),
    ModV1 => ("Mod", 1),
    MvnV0 => ("MVN", 0),
    NonMaxSuppressionV1 => ("NonMaxSuppression", 1),
    NonMaxSuppressionV3 => ("NonMaxSuppression", 3),
    NonZeroV3 => ("NonZero", 3),
    NormalizeL2V0 => ("NormalizeL2", 0),
    OneHotV1 => ("OneHot", 1),
    PadV1 => ("Pad", 1),
    PartialSliceV0 => ("PartialSlice", 0),
    PartialSliceBackpropV0 => ("PartialSliceBackprop", 0),
    PReluV0 => ("PRelu", 0),
    PriorBoxV0 => ("PriorBox", 0),
    PriorBoxClusteredV0 => ("PriorBoxClustered", 0),
    ProposalV0 => ("Proposal", 0),
    PsroiPoolingV0 => ("PSROIPooling", 0),
    RegionYoloV0 => ("RegionYolo", 0),
    ReorgYoloV0 => ("ReorgYolo", 0),
    ReverseV1 => ("Reverse", 1),
    RnnCellV0 => ("RNNCell", 0),
    RoiAlignV3 => ("ROIAlign", 3),
    RoiPoolingV0 => ("ROIPooling", 0),
    ScalarConstantLikeV0 => ("ScalarConstantLike", 0),
    ScaleShiftV0 => ("ScaleShift", 0),
    ScatterElementsUpdateV3 => ("ScatterElementsUpdate", 3),
    ScatterNdV0 => ("ScatterND", 0),
    ScatterUpdateV3 => ("ScatterUpdate", 3),
    SelectV1 => ("Select", 1),
    SeluV0 => ("Selu", 0),
    ShuffleChannelsV0 => ("ShuffleChannels", 0),
    SoftmaxV1 => ("Softmax", 1),
    SoftmaxCrossEntropyV0 => ("SoftmaxCrossEntropy", 0),
    SoftmaxCrossEntropyBackpropV0 => ("SoftmaxCrossEntropyBackprop", 0),
    SpaceToBatchV1 => ("SpaceToBatch", 1),
    SpaceToDepthV0 => ("SpaceToDepth", 0),
    SplitV0 => ("Split", 0),
    SplitV1 => ("Split", 1),
    SquaredDifferenceV0 => ("SquaredDifference", 0),
    SqueezeV0 => ("Squeeze", 0),
    StackV0 => ("Stack", 0),
    TensorIteratorV0 => ("TensorIterator", 0),
    TileV0 => ("Tile", 0),
    TopKV1 => ("TopK", 1),
    TopKV3 => ("TopK", 3),
    UnsqueezeV0 => ("Unsqueeze", 0),
    VariadicSplitV1 => ("VariadicSplit", 1),
}

impl OpTypeId {
    /// Versioned name, e.g. `v1::Add`.
    pub fn versioned_name(self) -> String {
        format!("v{}::{}", self.version(), self.name())
    }
}

impl fmt::Display for OpTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}::{}", self.version(), self.name())
    }
}

fn table() -> &'static HashMap<String, OpTypeId> {
    static TABLE: OnceLock<HashMap<String, OpTypeId>> = OnceLock::new();
    TABLE.get_or_init(|| {
        OpTypeId::ALL
            .iter()
            .map(|&id| (id.versioned_name(), id))
            .collect()
    })
}

/// Look up a versioned name such as `v1::Add`.
pub fn lookup(versioned_name: &str) -> OpTypeId {
    table()
        .get(versioned_name)
        .copied()
        .unwrap_or(OpTypeId::Unknown)
}

/// Identity of a node's operator, [`OpTypeId::Unknown`] when not in the table.
pub fn get_typeid(node: &Node) -> OpTypeId {
    lookup(&node.versioned_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use refgraph_core::{DataType, FunctionBuilder, NodeSpec};
    use std::collections::HashSet;

    #[test]
    fn test_table_is_dense_and_unique() {
        assert_eq!(OpTypeId::ALL.len(), 218);
        let names: HashSet<String> = OpTypeId::ALL.iter().map(|id| id.to_string()).collect();
        assert_eq!(names.len(), OpTypeId::ALL.len());
        assert!(!OpTypeId::ALL.contains(&OpTypeId::Unknown));
    }

    #[test]
    fn test_lookup_by_version() {
        assert_eq!(lookup("v1::Add"), OpTypeId::AddV1);
        assert_eq!(lookup("v0::ShapeOf"), OpTypeId::ShapeOfV0);
        assert_eq!(lookup("v3::ShapeOf"), OpTypeId::ShapeOfV3);
        assert_eq!(lookup("v0::Add"), OpTypeId::Unknown);
        assert_eq!(lookup("v1::NoSuchOp"), OpTypeId::Unknown);
    }

    #[test]
    fn test_display() {
        assert_eq!(OpTypeId::GatherNdV0.to_string(), "v0::GatherND");
        assert_eq!(OpTypeId::TopKV3.name(), "TopK");
        assert_eq!(OpTypeId::TopKV3.version(), 3);
        assert_eq!(OpTypeId::Unknown.to_string(), "v0::UnknownOp");
    }

    #[test]
    fn test_get_typeid_from_node() -> refgraph_core::Result<()> {
        let mut b = FunctionBuilder::new("f");
        let x = b.parameter("x", DataType::F32, [2])?;
        let y = b.add(
            NodeSpec::new("Relu", 0)
                .input(x)
                .output(DataType::F32, [2]),
        )?;
        b.result(y)?;
        let f = b.build()?;
        assert_eq!(get_typeid(&f.nodes()[0]), OpTypeId::ParameterV0);
        assert_eq!(get_typeid(&f.nodes()[1]), OpTypeId::ReluV0);
        assert_eq!(get_typeid(&f.nodes()[2]), OpTypeId::ResultV0);
        Ok(())
    }
}
