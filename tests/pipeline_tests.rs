//! Tests for the pass engine through the public API.

use std::cell::Cell;

use spirc::config::CapabilityFeatures;
use spirc::graph::OpKind;
use spirc::{
    run_to_fixed_point, CheckPhase, CompilationSession, CompileError, CompileResult, FixedPoint, Graph, Pass,
    Pipeline, TargetCapability, Verifier,
};

fn small_graph() -> Graph {
    Graph::parse(
        "graph small, id=1\n\
         entry {\n\
           %p = f32[4] parameter(0)\n\
           %n = f32[4] negate(%p)\n\
           ROOT %m = f32[4] negate(%n)\n\
         }",
    )
    .unwrap()
}

/// Renames the root once per run until `budget` runs have changed the graph.
struct Renamer {
    budget: usize,
    runs: Cell<usize>,
}

impl Renamer {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            runs: Cell::new(0),
        }
    }
}

impl Pass for Renamer {
    fn name(&self) -> &str {
        "renamer"
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let run = self.runs.get();
        self.runs.set(run + 1);
        if run >= self.budget {
            return Ok(false);
        }
        let entry = graph.entry_mut();
        if let Some(root) = entry.root() {
            if let Some(node) = entry.node_mut(root) {
                node.name = format!("m{run}");
            }
        }
        Ok(true)
    }
}

/// Drops the negate between parameter and root without rewiring its user.
struct Breaker;

impl Pass for Breaker {
    fn name(&self) -> &str {
        "breaker"
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let entry = graph.entry_mut();
        if let Some(id) = entry.find("n") {
            entry.remove(id);
        }
        Ok(true)
    }
}

struct Unsupported;

impl Pass for Unsupported {
    fn name(&self) -> &str {
        "unsupported"
    }

    fn run(&self, _graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        Err(CompileError::pass_failed("unsupported", "cannot handle this graph"))
    }
}

struct AttentionOnly;

impl Pass for AttentionOnly {
    fn name(&self) -> &str {
        "attention-only"
    }

    fn applies_to(&self, capability: &TargetCapability) -> bool {
        capability.supports_fused_attention()
    }

    fn run(&self, _graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        Ok(false)
    }
}

#[test]
fn test_empty_pipeline_leaves_graph_unchanged() {
    let _ = env_logger::builder().is_test(true).try_init();
    let session = CompilationSession::new();
    let mut graph = small_graph();
    let before = graph.clone();

    let pipeline = Pipeline::new("empty");
    assert!(pipeline.is_empty());
    assert!(!pipeline.run(&mut graph, &session).unwrap());
    assert_eq!(graph, before);
}

#[test]
fn test_members_run_in_insertion_order() {
    let session = CompilationSession::new();
    let mut graph = small_graph();
    let mut pipeline = Pipeline::new("ordered");
    pipeline.add_pass(Renamer::new(1)).add_pass(Renamer::new(0));
    assert_eq!(pipeline.pass_names(), vec!["renamer", "renamer"]);

    assert!(pipeline.run(&mut graph, &session).unwrap());
    assert_eq!(graph.entry().root_node().unwrap().name, "m0");
    assert_eq!(session.stats().runs_of("renamer"), 2);
    assert_eq!(session.stats().changes_of("renamer"), 1);
}

#[test]
fn test_passes_are_filtered_by_capability() {
    let old = TargetCapability::new(7, 0);
    let mut pipeline = Pipeline::for_target("filtered", old);
    pipeline.add_pass(AttentionOnly).add_pass(Renamer::new(0));
    assert_eq!(pipeline.pass_names(), vec!["renamer"]);

    let stripped = TargetCapability::new(9, 0).without(CapabilityFeatures::FUSED_ATTENTION);
    let mut pipeline = Pipeline::for_target("stripped", stripped);
    pipeline.add_pass(AttentionOnly);
    assert!(pipeline.is_empty());

    let mut pipeline = Pipeline::for_target("kept", TargetCapability::new(8, 0));
    pipeline.add_pass(AttentionOnly);
    assert_eq!(pipeline.len(), 1);
}

#[test]
fn test_fixed_point_runs_until_unchanged() {
    let session = CompilationSession::new();
    let mut graph = small_graph();
    let fixed = FixedPoint::new(Renamer::new(2));
    assert_eq!(fixed.name(), "fixed-point(renamer)");

    assert!(fixed.run(&mut graph, &session).unwrap());
    assert_eq!(fixed.inner().runs.get(), 3);
    assert_eq!(graph.entry().root_node().unwrap().name, "m1");

    // A second wrapper run converges immediately.
    assert!(!fixed.run(&mut graph, &session).unwrap());
    assert_eq!(fixed.inner().runs.get(), 4);
}

#[test]
fn test_fixed_point_respects_iteration_cap() {
    let session = CompilationSession::new();
    let mut graph = small_graph();
    let pass = Renamer::new(usize::MAX);

    assert!(run_to_fixed_point(&pass, &mut graph, 3, &session).unwrap());
    assert_eq!(pass.runs.get(), 3);
    let stats = session.stats();
    assert_eq!(stats.fixed_point_iterations, 3);
    assert_eq!(stats.fixed_point_caps_hit, 1);
}

#[test]
fn test_nested_pipeline_to_fixed_point() {
    let session = CompilationSession::new();
    let mut graph = small_graph();
    let mut inner = Pipeline::new("inner");
    inner.add_pass(Renamer::new(2));
    let mut outer = Pipeline::new("outer");
    outer.add_pass(FixedPoint::new(inner));

    assert!(outer.run(&mut graph, &session).unwrap());
    let stats = session.stats();
    // outer once, inner three times.
    assert_eq!(stats.pipelines_run, 4);
    assert_eq!(stats.runs_of("renamer"), 3);
}

#[test]
fn test_failure_names_every_enclosing_pipeline() {
    let session = CompilationSession::new();
    let mut graph = small_graph();
    let mut inner = Pipeline::new("inner stage");
    inner.add_pass(Unsupported);
    let mut outer = Pipeline::new("outer stage");
    outer.add_pass(Renamer::new(0)).add_pass(inner);

    let err = outer.run(&mut graph, &session).unwrap_err();
    assert_eq!(err.pipeline_trail(), vec!["outer stage", "inner stage"]);
    assert!(matches!(
        err.root_cause(),
        CompileError::PassFailed {
            pass: "unsupported",
            ..
        }
    ));
    let message = err.to_string();
    assert!(message.contains("outer stage"), "{message}");
}

#[test]
fn test_checker_catches_broken_pass() {
    let session = CompilationSession::new().with_invariant_checks(true);
    let mut graph = small_graph();
    let mut pipeline = Pipeline::new("guarded");
    pipeline.add_invariant_checker_debug(Verifier::new(false, false));
    pipeline.add_pass(Breaker);

    match pipeline.run(&mut graph, &session) {
        Err(CompileError::InvariantViolation { pipeline, phase, .. }) => {
            assert_eq!(pipeline, "guarded");
            assert_eq!(phase, CheckPhase::After);
        }
        other => panic!("expected an invariant violation, got {other:?}"),
    }
}

#[test]
fn test_layout_sensitive_checker_rejects_unlaid_graph() {
    let session = CompilationSession::new().with_invariant_checks(true);
    let mut graph = small_graph();
    let mut pipeline = Pipeline::new("post-layout");
    pipeline.add_invariant_checker_debug(Verifier::new(true, true));

    let err = pipeline.run(&mut graph, &session).unwrap_err();
    assert!(matches!(
        err,
        CompileError::InvariantViolation {
            phase: CheckPhase::Before,
            ..
        }
    ));
}

#[test]
fn test_mixed_precision_needs_permission() {
    let graph = Graph::parse(
        "graph mixed entry {\n\
           %a = f32[4] parameter(0)\n\
           %b = bf16[4] parameter(1)\n\
           ROOT %s = f32[4] add(%a, %b)\n\
         }",
    )
    .unwrap();
    assert!(Verifier::new(false, false).verify(&graph).is_err());
    assert!(Verifier::new(false, true).verify(&graph).is_ok());
}

#[test]
fn test_changed_passes_are_dumped() {
    let dir = tempfile::tempdir().unwrap();
    let session = CompilationSession::new().with_dump_dir(dir.path());
    let mut graph = small_graph();
    let mut pipeline = Pipeline::new("dumped");
    pipeline.add_pass(Renamer::new(1)).add_pass(Renamer::new(0));
    pipeline.run(&mut graph, &session).unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    // Before the first pass, then after the one that changed the graph.
    assert_eq!(names.len(), 2, "{names:?}");
    assert!(names.iter().all(|name| name.starts_with("module_0001.small.")));
    assert!(names[0].ends_with("renamer.before.txt"));
    assert!(names[1].ends_with("renamer.after.txt"));

    let dumped = std::fs::read_to_string(dir.path().join(&names[1])).unwrap();
    assert!(Graph::parse(&dumped).is_ok());
}

#[test]
fn test_verify_errors_name_the_node() {
    let mut graph = small_graph();
    let entry = graph.entry_mut();
    let n = entry.find("n").unwrap();
    entry.node_mut(n).unwrap().kind = OpKind::Tuple;
    let err = Verifier::default().verify(&graph).unwrap_err();
    assert!(err.to_string().contains("'n'"), "{err}");
}
