// This module is the pass catalogue of the back end. Each submodule holds one
// self-contained graph rewrite implementing the Pass trait: precision normalization driven
// by a FloatSupport policy, solver expansion, convolution legalization into custom calls
// with activation fusion and padding legalization, call inlining, tuple simplification,
// the algebraic simplifier, reshape and convert movers, constant folding, CSE, DCE, the
// layout passes used after layout assignment (reshape decomposition and layout
// normalization), attention fusion, dot dimension merging and the triangular-solve
// rewriter. The custom-call targets produced by these rewrites live in `targets`; small
// graph-editing helpers shared by several passes live at the bottom of this file.

//! Graph rewriting passes.

pub mod algebraic_simplifier;
pub mod attention_fusion;
pub mod call_inliner;
pub mod constant_folding;
pub mod conv_activation_fusion;
pub mod conv_legalizer;
pub mod conv_padding_legalization;
pub mod convert_mover;
pub mod cse;
pub mod dce;
pub mod dot_dimension_merger;
pub mod layout_normalization;
pub mod precision_normalization;
pub mod reshape_decomposer;
pub mod reshape_mover;
pub mod solver_expander;
pub mod triangular_solve_rewriter;
pub mod tuple_simplifier;

pub use algebraic_simplifier::{AlgebraicSimplifier, AlgebraicSimplifierOptions};
pub use attention_fusion::AttentionFusion;
pub use call_inliner::CallInliner;
pub use constant_folding::ConstantFolding;
pub use conv_activation_fusion::ConvActivationFusion;
pub use conv_legalizer::ConvLegalizer;
pub use conv_padding_legalization::ConvPaddingLegalization;
pub use convert_mover::ConvertMover;
pub use cse::Cse;
pub use dce::Dce;
pub use dot_dimension_merger::DotDimensionMerger;
pub use layout_normalization::LayoutNormalization;
pub use precision_normalization::{ConvLowPrecisionSupport, FloatSupport, PrecisionNormalization};
pub use reshape_decomposer::ReshapeDecomposer;
pub use reshape_mover::{ReshapeMover, ReshapeMoverOptions};
pub use solver_expander::SolverExpander;
pub use triangular_solve_rewriter::TriangularSolveRewriter;
pub use tuple_simplifier::TupleSimplifier;

use crate::graph::{Computation, NodeId, OpKind, Shape};

/// Custom-call targets understood by the device runtime.
pub mod targets {
    pub const CONV_FORWARD: &str = "__spirc$convForward";
    pub const CONV_BIAS_ACTIVATION_FORWARD: &str = "__spirc$convBiasActivationForward";
    pub const FMHA_SOFTMAX: &str = "__spirc$fmha$softmax";
    pub const FMHA_SCALE_SOFTMAX: &str = "__spirc$fmha$scaleSoftmax";
    pub const TRIANGULAR_SOLVE: &str = "__spirc$triangularSolve";
    pub const POTRF: &str = "__spirc$potrf";

    pub fn is_convolution(target: &str) -> bool {
        target == CONV_FORWARD || target == CONV_BIAS_ACTIVATION_FORWARD
    }
}

/// Splat value of a constant node.
pub(crate) fn constant_splat(computation: &Computation, id: NodeId) -> Option<f64> {
    computation.node(id)?.kind.literal()?.splat_value()
}

pub(crate) fn is_constant_splat_of(computation: &Computation, id: NodeId, value: f64) -> bool {
    constant_splat(computation, id) == Some(value)
}

/// `shape` with default layouts when `reference` is already laid out.
pub(crate) fn laid_out_like(shape: Shape, reference: &Shape) -> Shape {
    if reference.has_layout() {
        shape.with_default_layout()
    } else {
        shape
    }
}

/// Add `get-tuple-element(tuple, index)`; the shape is taken from the tuple.
pub(crate) fn add_tuple_element(computation: &mut Computation, tuple: NodeId, index: usize, name: &str) -> NodeId {
    let shape = computation[tuple].shape.tuple_elements()[index].clone();
    computation.add(name, OpKind::GetTupleElement { index }, vec![tuple], shape)
}

/// Remove the given nodes, and whatever they leave unused among them, once nothing uses them.
pub(crate) fn remove_if_dead(computation: &mut Computation, candidates: &[NodeId]) {
    loop {
        let mut removed = false;
        for id in candidates {
            let dead = computation
                .node(*id)
                .is_some_and(|node| !node.kind.is_parameter())
                && !computation.has_uses(*id);
            if dead {
                computation.remove(*id);
                removed = true;
            }
        }
        if !removed {
            return;
        }
    }
}
