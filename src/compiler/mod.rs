// This module is the compiler façade of the spirc back end. SpirCompiler owns the two
// external collaborators (the base GPU compiler and the portable lowering routine) and
// exposes the stage entry points: convolution canonicalization before layout assignment,
// the two-part post-layout stage wrapped around the base compiler's own post-layout
// optimizations, and binary emission with the lowered-module file override (emitter).
// Pipelines are built fresh for every call by the builder functions in `pipelines`, so the
// compiler itself only holds immutable collaborators and can be shared between threads.
// `compile` drives one graph through every stage and returns the emitted artifact.

//! Compiler façade and stage entry points.

pub mod backend;
pub mod emitter;
pub mod lowered;
pub mod pipelines;

pub use backend::{BaseCompiler, DefaultBaseCompiler, PortableLowering, TextualSpirLowering};
pub use emitter::{find_override, maybe_load_lowered_from_file};
pub use lowered::{LoweredModule, LoweredModuleError, SPIR_DATA_LAYOUT, SPIR_TARGET_TRIPLE};

use crate::config::{CompileConfig, DnnVersion, TargetCapability};
use crate::core::{CompilationSession, CompileResult, EmitError, SessionStats};
use crate::graph::{Computation, Graph, NodeId, OpKind};

/// Result of a full compilation.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    /// Always empty for this target.
    pub metadata: String,
    pub binary: Vec<u8>,
    /// The graph after every stage, as handed to emission.
    pub graph: Graph,
    pub stats: SessionStats,
}

/// The spirc back end.
pub struct SpirCompiler {
    base: Box<dyn BaseCompiler + Send + Sync>,
    lowering: Box<dyn PortableLowering + Send + Sync>,
}

impl Default for SpirCompiler {
    fn default() -> Self {
        Self::new(Box::new(DefaultBaseCompiler), Box::new(TextualSpirLowering))
    }
}

impl SpirCompiler {
    pub fn new(
        base: Box<dyn BaseCompiler + Send + Sync>,
        lowering: Box<dyn PortableLowering + Send + Sync>,
    ) -> Self {
        Self { base, lowering }
    }

    pub fn target_triple(&self) -> &'static str {
        SPIR_TARGET_TRIPLE
    }

    pub fn data_layout(&self) -> &'static str {
        SPIR_DATA_LAYOUT
    }

    pub fn base(&self) -> &dyn BaseCompiler {
        self.base.as_ref()
    }

    pub(crate) fn lowering(&self) -> &dyn PortableLowering {
        self.lowering.as_ref()
    }

    /// Legalize convolutions and solvers into custom calls and simplify the result.
    pub fn optimize_convolution_canonicalization(
        &self,
        graph: &mut Graph,
        capability: &TargetCapability,
        dnn_version: DnnVersion,
        session: &CompilationSession,
    ) -> CompileResult<()> {
        log::debug!(
            "Canonicalizing convolutions of '{}' for capability {} (dnn {})",
            graph.name(),
            capability,
            dnn_version
        );
        pipelines::conv_canonicalization_pipeline(*capability).run(graph, session)?;
        Ok(())
    }

    /// Target-specific passes around the base compiler's post-layout optimizations.
    pub fn optimize_post_layout_assignment(
        &self,
        graph: &mut Graph,
        config: &CompileConfig,
        session: &CompilationSession,
    ) -> CompileResult<()> {
        pipelines::post_layout_part1_pipeline(config).run(graph, session)?;
        self.base
            .optimize_post_layout(graph, &config.options, &config.target, session)?;
        pipelines::post_layout_part2_pipeline(config).run(graph, session)?;
        Ok(())
    }

    /// Whether `user` may write its result into the buffer of `operand`.
    /// `None` leaves the decision to the default analysis.
    pub fn can_share_buffer(&self, computation: &Computation, user: NodeId, operand: NodeId) -> Option<bool> {
        let user_node = computation.node(user)?;
        let operand_node = computation.node(operand)?;
        if !user_node.operands.contains(&operand) {
            return None;
        }
        match &user_node.kind {
            OpKind::CustomCall { .. } => Some(false),
            kind if kind.is_elementwise() && operand_node.shape.equal_with_layout(&user_node.shape) => Some(true),
            _ => None,
        }
    }

    /// Run every stage on `graph` and emit its binary.
    pub fn compile(&self, mut graph: Graph, config: &CompileConfig) -> Result<CompiledArtifact, EmitError> {
        let session = CompilationSession::from_debug_options(&config.debug);
        log::info!("Compiling '{}' for {}", graph.name(), config.capability());

        self.optimize_convolution_canonicalization(&mut graph, config.capability(), config.dnn_version, &session)?;
        self.base.assign_layouts(&mut graph, &session)?;
        self.optimize_post_layout_assignment(&mut graph, config, &session)?;

        let module = LoweredModule::new(graph.clone());
        let (metadata, binary) = self.compile_target_binary(config, &module, Some(&graph), &session)?;
        let stats = session.stats();
        log::debug!("Compilation of '{}' finished: {}", graph.name(), stats);
        Ok(CompiledArtifact {
            metadata,
            binary,
            graph,
            stats,
        })
    }
}
