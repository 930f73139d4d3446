// This module defines the pass engine of the back end. A Pass is a self-contained graph
// rewrite with a name, an applicability predicate over the target capability, and an
// idempotence declaration; it runs on an exclusively borrowed graph and reports whether
// it changed anything. Pipeline sequences passes (and nested pipelines) under a name,
// filtering out passes whose predicate rejects the target at build time and running the
// structural verifier at its boundaries when invariant checks are enabled. FixedPoint
// wraps any pass or pipeline and re-runs it until nothing changes or its iteration cap
// is reached.

//! Pass trait, pipelines and fixed-point runner.

pub mod fixed_point;
pub mod pipeline;

pub use fixed_point::{run_to_fixed_point, FixedPoint, DEFAULT_MAX_ITERATIONS};
pub use pipeline::Pipeline;

use crate::config::TargetCapability;
use crate::core::{CompilationSession, CompileResult};
use crate::graph::Graph;

/// A graph-to-graph transformation.
///
/// `run` must leave the graph structurally well formed or return an error.
/// Passes hold only configuration captured at construction time.
pub trait Pass {
    fn name(&self) -> &str;

    /// Whether the pass is meaningful for the target. Rejected passes are left
    /// out of a pipeline when it is built.
    fn applies_to(&self, _capability: &TargetCapability) -> bool {
        true
    }

    /// A second application directly after a first one never changes the graph.
    fn is_idempotent(&self) -> bool {
        false
    }

    /// Pipelines and fixed-point wrappers. Their members are counted and dumped
    /// individually, so the wrapper itself is not.
    fn is_composite(&self) -> bool {
        false
    }

    /// Apply the pass, returning whether the graph changed.
    fn run(&self, graph: &mut Graph, session: &CompilationSession) -> CompileResult<bool>;
}

/// Build-time description of a pipeline member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub name: String,
    pub idempotent: bool,
}

impl PassRecord {
    pub fn of(pass: &dyn Pass) -> Self {
        Self {
            name: pass.name().to_string(),
            idempotent: pass.is_idempotent(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use super::*;
    use crate::core::CompileError;

    /// Reports a change for the first `changes` runs, then converges.
    pub struct CountingPass {
        pub name: &'static str,
        pub changes: usize,
        pub runs: Cell<usize>,
    }

    impl CountingPass {
        pub fn new(name: &'static str, changes: usize) -> Self {
            Self {
                name,
                changes,
                runs: Cell::new(0),
            }
        }
    }

    impl Pass for CountingPass {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&self, _graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
            let run = self.runs.get();
            self.runs.set(run + 1);
            Ok(run < self.changes)
        }
    }

    pub struct FailingPass;

    impl Pass for FailingPass {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&self, _graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
            Err(CompileError::pass_failed("failing", "unsupported construct"))
        }
    }

    pub fn tiny_graph() -> Graph {
        Graph::parse("graph t entry { %p = f32[2] parameter(0)\n ROOT %n = f32[2] negate(%p) }")
            .expect("test graph parses")
    }
}
