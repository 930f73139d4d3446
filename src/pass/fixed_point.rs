//! Fixed-point runner.

use crate::config::TargetCapability;
use crate::core::{CompilationSession, CompileResult};
use crate::graph::Graph;

use super::Pass;

/// Iteration cap used when none is given.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Re-run `unit` until an iteration reports no change or `max_iterations` runs happened.
///
/// Returns whether any iteration changed the graph. Reaching the cap is not an error.
pub fn run_to_fixed_point(
    unit: &dyn Pass,
    graph: &mut Graph,
    max_iterations: usize,
    session: &CompilationSession,
) -> CompileResult<bool> {
    let mut changed = false;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;
        let iteration_changed = unit.run(graph, session)?;
        if !iteration_changed {
            converged = true;
            break;
        }
        if iterations > 1 && unit.is_idempotent() && session.verify_invariants() {
            log::warn!(
                "'{}' declares itself idempotent but changed the graph on iteration {}",
                unit.name(),
                iterations
            );
        }
        changed = true;
    }

    let hit_cap = !converged;
    if hit_cap {
        log::debug!(
            "Fixed point of '{}' stopped at the iteration cap ({})",
            unit.name(),
            max_iterations
        );
    } else {
        log::trace!("Fixed point of '{}' converged after {} iterations", unit.name(), iterations);
    }
    session.record_fixed_point(iterations, hit_cap);
    Ok(changed)
}

/// A pass that runs its inner unit to a fixed point.
pub struct FixedPoint<P> {
    inner: P,
    name: String,
    max_iterations: usize,
}

impl<P: Pass> FixedPoint<P> {
    pub fn new(inner: P) -> Self {
        let name = format!("fixed-point({})", inner.name());
        Self {
            inner,
            name,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Pass> Pass for FixedPoint<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, capability: &TargetCapability) -> bool {
        self.inner.applies_to(capability)
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, session: &CompilationSession) -> CompileResult<bool> {
        // A bare pass is counted per iteration here; pipelines count their own members.
        if self.inner.is_composite() {
            return run_to_fixed_point(&self.inner, graph, self.max_iterations, session);
        }
        let counted = Counted(&self.inner);
        run_to_fixed_point(&counted, graph, self.max_iterations, session)
    }
}

/// Records each run of a wrapped leaf pass in the session statistics.
struct Counted<'a, P>(&'a P);

impl<P: Pass> Pass for Counted<'_, P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn is_idempotent(&self) -> bool {
        self.0.is_idempotent()
    }

    fn run(&self, graph: &mut Graph, session: &CompilationSession) -> CompileResult<bool> {
        let changed = self.0.run(graph, session)?;
        session.record_pass_run(self.0.name(), changed);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::testing::{tiny_graph, CountingPass, FailingPass};
    use crate::pass::Pipeline;

    #[test]
    fn test_stops_when_unchanged() {
        let session = CompilationSession::new();
        let mut graph = tiny_graph();
        let fixed = FixedPoint::new(CountingPass::new("c", 3));

        assert!(fixed.run(&mut graph, &session).unwrap());
        // Three changing runs plus the one that reported no change.
        assert_eq!(fixed.inner().runs.get(), 4);
        let stats = session.stats();
        assert_eq!(stats.fixed_point_iterations, 4);
        assert_eq!(stats.fixed_point_caps_hit, 0);
        assert_eq!(stats.runs_of("c"), 4);
    }

    #[test]
    fn test_never_exceeds_cap() {
        let session = CompilationSession::new();
        let mut graph = tiny_graph();
        let fixed = FixedPoint::new(CountingPass::new("forever", usize::MAX)).with_max_iterations(5);

        assert!(fixed.run(&mut graph, &session).unwrap());
        assert_eq!(fixed.inner().runs.get(), 5);
        assert_eq!(session.stats().fixed_point_caps_hit, 1);
    }

    #[test]
    fn test_default_cap() {
        let fixed = FixedPoint::new(CountingPass::new("c", 0));
        assert_eq!(fixed.max_iterations(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(fixed.name(), "fixed-point(c)");
    }

    #[test]
    fn test_unchanged_unit_reports_unchanged() {
        let session = CompilationSession::new();
        let mut graph = tiny_graph();
        let fixed = FixedPoint::new(CountingPass::new("idle", 0));
        assert!(!fixed.run(&mut graph, &session).unwrap());
        assert_eq!(fixed.inner().runs.get(), 1);
    }

    #[test]
    fn test_wraps_pipelines_and_propagates_errors() {
        let session = CompilationSession::new();
        let mut graph = tiny_graph();

        let mut pipeline = Pipeline::new("sub");
        pipeline.add_pass(FailingPass);
        let fixed = FixedPoint::new(pipeline);
        assert!(fixed.run(&mut graph, &session).is_err());
    }
}
