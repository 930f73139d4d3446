//! Named, ordered pass pipelines.

use crate::config::TargetCapability;
use crate::core::{CheckPhase, CompilationSession, CompileError, CompileResult, DumpPhase};
use crate::graph::{Graph, Verifier};

use super::{Pass, PassRecord};

/// An ordered sequence of passes run under one name.
pub struct Pipeline {
    name: String,
    capability: Option<TargetCapability>,
    passes: Vec<Box<dyn Pass>>,
    checker: Option<Verifier>,
}

impl Pipeline {
    /// A pipeline that accepts every pass.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capability: None,
            passes: Vec::new(),
            checker: None,
        }
    }

    /// A pipeline that drops passes not applicable to `capability`.
    pub fn for_target(name: impl Into<String>, capability: TargetCapability) -> Self {
        Self {
            capability: Some(capability),
            ..Self::new(name)
        }
    }

    pub fn capability(&self) -> Option<&TargetCapability> {
        self.capability.as_ref()
    }

    pub fn add_pass<P: Pass + 'static>(&mut self, pass: P) -> &mut Self {
        if let Some(capability) = &self.capability {
            if !pass.applies_to(capability) {
                log::debug!(
                    "Pipeline '{}': skipping pass '{}' (not applicable to capability {})",
                    self.name,
                    pass.name(),
                    capability
                );
                return self;
            }
        }
        self.passes.push(Box::new(pass));
        self
    }

    /// Verify the graph before and after this pipeline when invariant checks are on.
    pub fn add_invariant_checker_debug(&mut self, verifier: Verifier) -> &mut Self {
        self.checker = Some(verifier);
        self
    }

    pub fn checker(&self) -> Option<&Verifier> {
        self.checker.as_ref()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn records(&self) -> Vec<PassRecord> {
        self.passes.iter().map(|p| PassRecord::of(p.as_ref())).collect()
    }

    fn check(&self, graph: &Graph, session: &CompilationSession, phase: CheckPhase) -> CompileResult<()> {
        let Some(verifier) = &self.checker else {
            return Ok(());
        };
        if !session.verify_invariants() {
            return Ok(());
        }
        verifier.verify(graph).map_err(|err| {
            log::error!("Pipeline '{}': invariant check {} failed: {}", self.name, phase, err);
            CompileError::InvariantViolation {
                pipeline: self.name.clone(),
                phase,
                reason: err.to_string(),
            }
        })
    }

    /// Run every member in order; returns whether any of them changed the graph.
    pub fn run(&self, graph: &mut Graph, session: &CompilationSession) -> CompileResult<bool> {
        session.record_pipeline_run(&self.name);
        log::debug!("Running pipeline '{}' ({} passes)", self.name, self.passes.len());
        self.check(graph, session, CheckPhase::Before)?;

        let mut changed = false;
        for (index, pass) in self.passes.iter().enumerate() {
            let composite = pass.is_composite();
            if index == 0 && !composite {
                session.dump_graph(graph, &self.name, pass.name(), DumpPhase::BeforePass);
            }
            log::trace!("Pipeline '{}': running '{}'", self.name, pass.name());

            let pass_changed = pass.run(graph, session).map_err(|source| CompileError::Pipeline {
                pipeline: self.name.clone(),
                source: Box::new(source),
            })?;

            if !composite {
                session.record_pass_run(pass.name(), pass_changed);
                if pass_changed {
                    session.dump_graph(graph, &self.name, pass.name(), DumpPhase::AfterPass);
                }
            }
            if pass_changed {
                log::trace!("Pipeline '{}': '{}' changed the graph", self.name, pass.name());
            }
            changed |= pass_changed;
        }

        self.check(graph, session, CheckPhase::After)?;
        log::debug!("Pipeline '{}' finished (changed: {})", self.name, changed);
        Ok(changed)
    }
}

impl Pass for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_idempotent(&self) -> bool {
        false
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, session: &CompilationSession) -> CompileResult<bool> {
        Pipeline::run(self, graph, session)
    }
}
