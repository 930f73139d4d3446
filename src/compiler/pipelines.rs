//! Builders for the named pipelines of the canonicalization and post-layout stages.
//!
//! Every builder returns a fresh [`Pipeline`]; passes that do not apply to the
//! target capability are left out while the pipeline is built.

use crate::config::{CompileConfig, TargetCapability};
use crate::graph::Verifier;
use crate::pass::{FixedPoint, Pipeline};
use crate::passes::{
    AlgebraicSimplifier, AlgebraicSimplifierOptions, AttentionFusion, CallInliner, ConstantFolding,
    ConvActivationFusion, ConvLegalizer, ConvLowPrecisionSupport, ConvPaddingLegalization, ConvertMover, Cse, Dce,
    DotDimensionMerger, LayoutNormalization, PrecisionNormalization, ReshapeDecomposer, ReshapeMover,
    ReshapeMoverOptions, SolverExpander, TriangularSolveRewriter, TupleSimplifier,
};

pub const CONV_CANONICALIZATION: &str = "conv_canonicalization";
pub const RESHAPE_MOVER_AFTER_CONV_CANONICALIZATION: &str = "reshape_mover_after_conv_canonicalization";
pub const SIMPLIFY_AFTER_CONV_CANONICALIZATION: &str = "simplify_after_conv_canonicalization";
pub const POST_LAYOUT_PART_1: &str = "spir post-layout_assignment part 1";
pub const ATTENTION_FUSION: &str = "multi-headed attention fusion";
pub const POST_LAYOUT_PART_2: &str = "spir post-layout_assignment part 2";

/// Graphs before layout assignment: no layouts required, one element type per operation.
const PRE_LAYOUT_CHECK: Verifier = Verifier::new(false, false);
const POST_LAYOUT_CHECK: Verifier = Verifier::new(true, true);

fn canonicalization_simplifier_options() -> AlgebraicSimplifierOptions {
    AlgebraicSimplifierOptions::default()
        .conv_operand_swap(false)
        .unconditional_reduce_of_concat_replacement(false)
}

fn post_layout_simplifier_options(config: &CompileConfig) -> AlgebraicSimplifierOptions {
    AlgebraicSimplifierOptions::default()
        .layout_sensitive(true)
        .conv_operand_swap(false)
        .unconditional_reduce_of_concat_replacement(false)
        // Slow min/max propagates NaN.
        .minmax_propagate_nan(!config.debug.fast_min_max)
}

/// Reshape mover to its own fixed point, followed by the simplifier that
/// cancels the rearrangements it brings together.
pub fn reshape_mover_pipeline(capability: TargetCapability) -> Pipeline {
    let mut pipeline = Pipeline::for_target(RESHAPE_MOVER_AFTER_CONV_CANONICALIZATION, capability);
    pipeline
        .add_invariant_checker_debug(PRE_LAYOUT_CHECK)
        .add_pass(FixedPoint::new(ReshapeMover::new(ReshapeMoverOptions {
            reshape_of_1d_constant_is_cheap: true,
        })))
        .add_pass(AlgebraicSimplifier::new(canonicalization_simplifier_options()));
    pipeline
}

/// Convert mover and simplifier. Run to a fixed point so the convert and
/// reshape movers settle.
pub fn simplify_after_canonicalization_pipeline(capability: TargetCapability) -> Pipeline {
    let mut pipeline = Pipeline::for_target(SIMPLIFY_AFTER_CONV_CANONICALIZATION, capability);
    pipeline
        .add_invariant_checker_debug(PRE_LAYOUT_CHECK)
        .add_pass(ConvertMover::new())
        .add_pass(AlgebraicSimplifier::new(canonicalization_simplifier_options()));
    pipeline
}

/// Legalizes convolutions and solvers into runtime custom calls.
pub fn conv_canonicalization_pipeline(capability: TargetCapability) -> Pipeline {
    let mut pipeline = Pipeline::for_target(CONV_CANONICALIZATION, capability);
    pipeline
        .add_invariant_checker_debug(PRE_LAYOUT_CHECK)
        .add_pass(PrecisionNormalization::new(ConvLowPrecisionSupport::for_capability(&capability)))
        // Solver expansion emits calls; it must run before anything inlines them.
        .add_pass(SolverExpander::new())
        .add_pass(ConvLegalizer::new())
        .add_pass(ConvActivationFusion::new())
        .add_pass(ConvPaddingLegalization::new())
        .add_pass(CallInliner::new())
        .add_pass(TupleSimplifier::new())
        .add_pass(FixedPoint::new(AlgebraicSimplifier::new(canonicalization_simplifier_options())))
        .add_pass(FixedPoint::new(reshape_mover_pipeline(capability)))
        .add_pass(FixedPoint::new(simplify_after_canonicalization_pipeline(capability)))
        .add_pass(ConstantFolding::new());
    pipeline
}

/// Cleans up after layout assignment and fuses attention blocks.
pub fn attention_fusion_pipeline(config: &CompileConfig) -> Pipeline {
    let options = post_layout_simplifier_options(config);
    let mut pipeline = Pipeline::for_target(ATTENTION_FUSION, *config.capability());
    pipeline.add_invariant_checker_debug(POST_LAYOUT_CHECK);
    if config.debug.normalize_layouts {
        pipeline
            .add_pass(ReshapeDecomposer::new())
            .add_pass(LayoutNormalization::new());
    }
    // Layout assignment can leave duplicate or no-op copies behind.
    pipeline
        .add_pass(Cse::new(true))
        .add_pass(FixedPoint::new(AlgebraicSimplifier::new(options)))
        .add_pass(Cse::new(true))
        .add_pass(Dce::new())
        .add_pass(AttentionFusion::new())
        .add_pass(AlgebraicSimplifier::new(options))
        .add_pass(Dce::new())
        .add_pass(Cse::new(true));
    pipeline
}

/// Runs before the base compiler's post-layout optimizations.
pub fn post_layout_part1_pipeline(config: &CompileConfig) -> Pipeline {
    let mut pipeline = Pipeline::for_target(POST_LAYOUT_PART_1, *config.capability());
    pipeline.add_invariant_checker_debug(POST_LAYOUT_CHECK);
    if config.features.attention_fusion {
        pipeline.add_pass(attention_fusion_pipeline(config));
    } else {
        log::debug!("Attention fusion disabled; skipping '{}'", ATTENTION_FUSION);
    }
    pipeline
        .add_pass(DotDimensionMerger::new())
        // Padding a constant dot operand leaves pad(constant) behind.
        .add_pass(ConstantFolding::new());
    pipeline
}

/// Runs after the base compiler's post-layout optimizations.
pub fn post_layout_part2_pipeline(config: &CompileConfig) -> Pipeline {
    let mut pipeline = Pipeline::for_target(POST_LAYOUT_PART_2, *config.capability());
    pipeline
        .add_invariant_checker_debug(POST_LAYOUT_CHECK)
        .add_pass(TriangularSolveRewriter::new(config.target.device.pointer_size));
    pipeline
}
