// This module provides per-compilation session state for spirc. CompilationSession is
// created once per compile call and threaded by shared reference through every pipeline
// and pass. It owns the pass statistics (RefCell so passes only need &self), the optional
// debug dump directory together with a monotonically increasing dump counter, and the
// decision whether structural invariant checks run at pipeline boundaries. Dumps write the
// printed graph text before and after each pass; a failed dump is logged and otherwise
// ignored so it can never change pipeline results. SessionStats records pipelines run,
// passes run and changed, per-pass counts, and fixed-point iteration totals and caps hit.

//! Compilation session management.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::config::DebugOptions;
use crate::graph::{print_graph, Graph};

/// Which side of a pass a dump was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpPhase {
    BeforePass,
    AfterPass,
    Override,
}

impl DumpPhase {
    fn suffix(self) -> &'static str {
        match self {
            DumpPhase::BeforePass => "before",
            DumpPhase::AfterPass => "after",
            DumpPhase::Override => "override",
        }
    }
}

/// Per-compilation state shared by all pipelines and passes.
pub struct CompilationSession {
    /// Session statistics for debugging and tuning.
    stats: RefCell<SessionStats>,

    /// Directory receiving graph dumps, if dumping is enabled.
    dump_dir: Option<PathBuf>,

    /// Orders dump files of one compilation.
    dump_counter: Cell<usize>,

    /// Run structural checks at pipeline boundaries even in release builds.
    verify_invariants: bool,
}

impl Default for CompilationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilationSession {
    pub fn new() -> Self {
        Self {
            stats: RefCell::new(SessionStats::default()),
            dump_dir: None,
            dump_counter: Cell::new(0),
            verify_invariants: false,
        }
    }

    pub fn from_debug_options(debug: &DebugOptions) -> Self {
        Self {
            dump_dir: debug.dump_to.clone(),
            verify_invariants: debug.verify_invariants,
            ..Self::new()
        }
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    pub fn with_invariant_checks(mut self, enabled: bool) -> Self {
        self.verify_invariants = enabled;
        self
    }

    /// Whether structural checks run at pipeline boundaries.
    pub fn verify_invariants(&self) -> bool {
        cfg!(debug_assertions) || self.verify_invariants
    }

    pub fn dump_dir(&self) -> Option<&Path> {
        self.dump_dir.as_deref()
    }

    pub fn dumps_enabled(&self) -> bool {
        self.dump_dir.is_some()
    }

    pub fn record_pipeline_run(&self, name: &str) {
        self.stats.borrow_mut().pipelines_run += 1;
        log::trace!("Pipeline run recorded: {}", name);
    }

    pub fn record_pass_run(&self, name: &str, changed: bool) {
        let mut stats = self.stats.borrow_mut();
        stats.passes_run += 1;
        let counts = stats.pass_counts.entry(name.to_string()).or_default();
        counts.runs += 1;
        if changed {
            counts.changes += 1;
            stats.passes_changed += 1;
        }
    }

    pub fn record_fixed_point(&self, iterations: usize, hit_cap: bool) {
        let mut stats = self.stats.borrow_mut();
        stats.fixed_point_iterations += iterations;
        if hit_cap {
            stats.fixed_point_caps_hit += 1;
        }
    }

    /// Advise that none of the override candidates belongs to the module.
    pub fn record_override_miss(&self, prefix: &str) {
        self.stats.borrow_mut().override_misses += 1;
        log::info!("For module with prefix '{}', no lowered module file to load was found", prefix);
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }

    /// Write the graph to the dump directory. Failures are logged and ignored.
    pub fn dump_graph(&self, graph: &Graph, pipeline: &str, pass: &str, phase: DumpPhase) {
        let Some(dir) = &self.dump_dir else {
            return;
        };
        let index = self.dump_counter.get();
        self.dump_counter.set(index + 1);
        let file_name = format!(
            "{}.{index:04}.{}.{}.{}.txt",
            graph.file_prefix(),
            sanitize(pipeline),
            sanitize(pass),
            phase.suffix()
        );
        let path = dir.join(file_name);
        let result = fs::create_dir_all(dir).and_then(|()| fs::write(&path, print_graph(graph)));
        match result {
            Ok(()) => log::trace!("Dumped graph to {}", path.display()),
            Err(err) => log::warn!("Failed to dump graph to {}: {}", path.display(), err),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

/// Run and change counts of one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassCounts {
    pub runs: usize,
    pub changes: usize,
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Named pipelines executed, nested ones included.
    pub pipelines_run: usize,

    /// Pass applications, counting every fixed-point iteration.
    pub passes_run: usize,

    /// Pass applications that reported a change.
    pub passes_changed: usize,

    /// Per-pass breakdown.
    pub pass_counts: HashMap<String, PassCounts>,

    pub fixed_point_iterations: usize,

    /// Fixed-point loops stopped by their iteration cap.
    pub fixed_point_caps_hit: usize,

    /// Override lookups that had candidates but none for the module.
    pub override_misses: usize,
}

impl SessionStats {
    pub fn runs_of(&self, pass: &str) -> usize {
        self.pass_counts.get(pass).map_or(0, |c| c.runs)
    }

    pub fn changes_of(&self, pass: &str) -> usize {
        self.pass_counts.get(pass).map_or(0, |c| c.changes)
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Pipelines run: {}", self.pipelines_run)?;
        writeln!(f, "  Passes run: {}", self.passes_run)?;
        writeln!(f, "  Passes that changed the graph: {}", self.passes_changed)?;
        writeln!(f, "  Fixed-point iterations: {}", self.fixed_point_iterations)?;
        writeln!(f, "  Fixed-point caps hit: {}", self.fixed_point_caps_hit)?;
        if self.override_misses > 0 {
            writeln!(f, "  Override lookups without a match: {}", self.override_misses)?;
        }

        if !self.pass_counts.is_empty() {
            writeln!(f, "  Pass breakdown:")?;
            let mut sorted: Vec<_> = self.pass_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.runs.cmp(&a.1.runs).then_with(|| a.0.cmp(b.0)));

            for (name, counts) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {} runs, {} changed", name, counts.runs, counts.changes)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_statistics() {
        let session = CompilationSession::new();

        session.record_pipeline_run("p");
        session.record_pass_run("dce", true);
        session.record_pass_run("dce", false);
        session.record_pass_run("cse", false);
        session.record_fixed_point(3, false);
        session.record_fixed_point(25, true);

        let stats = session.stats();
        assert_eq!(stats.pipelines_run, 1);
        assert_eq!(stats.passes_run, 3);
        assert_eq!(stats.passes_changed, 1);
        assert_eq!(stats.runs_of("dce"), 2);
        assert_eq!(stats.changes_of("dce"), 1);
        assert_eq!(stats.fixed_point_iterations, 28);
        assert_eq!(stats.fixed_point_caps_hit, 1);

        let display = format!("{stats}");
        assert!(display.contains("Passes run: 3"));
        assert!(display.contains("dce: 2 runs, 1 changed"));
    }

    #[test]
    fn test_dump_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let session = CompilationSession::new().with_dump_dir(dir.path());
        let graph = Graph::parse("graph g, id=1 entry { ROOT %p = f32[2] parameter(0) }").unwrap();

        session.dump_graph(&graph, "conv_canonicalization", "dce", DumpPhase::BeforePass);
        session.dump_graph(&graph, "conv_canonicalization", "dce", DumpPhase::AfterPass);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "module_0001.g.0000.conv_canonicalization.dce.before.txt",
                "module_0001.g.0001.conv_canonicalization.dce.after.txt",
            ]
        );
    }

    #[test]
    fn test_dump_failure_is_not_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot serve as a dump directory.
        let session = CompilationSession::new().with_dump_dir(file.path());
        let graph = Graph::parse("graph g entry { ROOT %p = f32[2] parameter(0) }").unwrap();
        session.dump_graph(&graph, "p", "dce", DumpPhase::AfterPass);
    }
}
