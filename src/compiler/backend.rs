// This module defines the two external collaborators of the spirc compiler as traits.
// BaseCompiler stands for the generic GPU compiler this back end plugs into: it assigns
// layouts between the canonicalization and post-layout stages and runs its own
// post-layout optimizations in the middle of the post-layout stage. PortableLowering is
// the routine that turns a lowered module into the portable binary text consumed by the
// device runtime. Each trait ships with a reference implementation: DefaultBaseCompiler
// assigns major-to-minor layouts and optimizes nothing, and TextualSpirLowering writes a
// readable textual module and rejects operations that should have been legalized away.

//! External collaborators of the compiler.

use std::fmt::Write;
use std::path::Path;

use crate::config::{CompileOptions, DebugOptions, TargetCapability, TargetConfig};
use crate::core::{CompilationSession, CompileError, CompileResult};
use crate::graph::{format_node, Computation, Graph, OpKind};

use super::lowered::LoweredModule;

/// The generic GPU compiler the back end plugs into.
pub trait BaseCompiler {
    /// Give every array shape a layout. Returns whether anything changed.
    fn assign_layouts(&self, graph: &mut Graph, session: &CompilationSession) -> CompileResult<bool>;

    /// Target-independent post-layout optimizations, run between the two halves
    /// of the post-layout stage.
    fn optimize_post_layout(
        &self,
        graph: &mut Graph,
        options: &CompileOptions,
        target: &TargetConfig,
        session: &CompilationSession,
    ) -> CompileResult<()>;
}

/// Assigns default layouts and performs no further optimization.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBaseCompiler;

impl BaseCompiler for DefaultBaseCompiler {
    fn assign_layouts(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            let ids: Vec<_> = computation.node_ids().collect();
            for id in ids {
                let Some(node) = computation.node_mut(id) else {
                    continue;
                };
                if !node.shape.has_layout() {
                    node.shape = node.shape.clone().with_default_layout();
                    changed = true;
                }
            }
        }
        log::debug!("Layout assignment for '{}' (changed: {})", graph.name(), changed);
        Ok(changed)
    }

    fn optimize_post_layout(
        &self,
        graph: &mut Graph,
        _options: &CompileOptions,
        target: &TargetConfig,
        _session: &CompilationSession,
    ) -> CompileResult<()> {
        log::trace!("No base post-layout optimizations for '{}' on {}", graph.name(), target.device.name);
        Ok(())
    }
}

/// Turns a lowered module into the portable binary text.
pub trait PortableLowering {
    fn lower(
        &self,
        module: &LoweredModule,
        capability: &TargetCapability,
        debug: &DebugOptions,
        toolchain_dir: Option<&Path>,
    ) -> CompileResult<String>;
}

/// Writes each computation as a function of its node lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextualSpirLowering;

/// Operations the runtime cannot execute directly.
fn needs_legalization(kind: &OpKind) -> bool {
    matches!(
        kind,
        OpKind::Convolution { .. } | OpKind::Cholesky { .. } | OpKind::TriangularSolve { .. } | OpKind::Call { .. }
    )
}

fn lower_computation(out: &mut String, computation: &Computation, kernel: bool) -> CompileResult<()> {
    let root = computation
        .root_node()
        .ok_or_else(|| CompileError::Toolchain {
            diagnostic: format!("computation '{}' has no root", computation.name()),
        })?;
    let qualifier = if kernel { "spir_kernel " } else { "" };
    let _ = writeln!(out, "define {qualifier}@{} {{", computation.name());
    for id in computation.post_order() {
        let node = &computation[id];
        if needs_legalization(&node.kind) {
            return Err(CompileError::Toolchain {
                diagnostic: format!(
                    "'{}' in '{}' has no portable lowering ({})",
                    node.name,
                    computation.name(),
                    node.kind.name()
                ),
            });
        }
        let _ = writeln!(out, "  {}", format_node(computation, node));
    }
    let _ = writeln!(out, "  ret %{}", root.name);
    out.push_str("}\n");
    Ok(())
}

impl PortableLowering for TextualSpirLowering {
    fn lower(
        &self,
        module: &LoweredModule,
        capability: &TargetCapability,
        debug: &DebugOptions,
        toolchain_dir: Option<&Path>,
    ) -> CompileResult<String> {
        if let Some(dir) = toolchain_dir {
            if !dir.is_dir() {
                return Err(CompileError::Toolchain {
                    diagnostic: format!("toolchain directory '{}' does not exist", dir.display()),
                });
            }
        }

        let mut out = String::new();
        let _ = writeln!(out, "; portable module for '{}'", module.graph.name());
        let _ = writeln!(out, "; capability {capability}");
        if debug.fast_min_max {
            out.push_str("; fast-min-max\n");
        }
        let _ = writeln!(out, "target triple = \"{}\"", module.target_triple);
        let _ = writeln!(out, "target datalayout = \"{}\"", module.data_layout);
        for sub in module.graph.subcomputations() {
            out.push('\n');
            lower_computation(&mut out, sub, false)?;
        }
        out.push('\n');
        lower_computation(&mut out, module.graph.entry(), true)?;
        log::debug!("Lowered '{}' to {} bytes of portable text", module.graph.name(), out.len());
        Ok(out)
    }
}
