//! Dead code elimination.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::Graph;
use crate::pass::Pass;

/// Removes nodes the root does not depend on. Parameters always stay, since
/// they define the computation's signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dce;

impl Dce {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for Dce {
    fn name(&self) -> &str {
        "dce"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut removed = 0usize;
        for computation in graph.computations_mut() {
            let live = computation.reachable();
            let dead: Vec<_> = computation
                .nodes()
                .filter(|(id, node)| !live.contains(id) && !node.kind.is_parameter())
                .map(|(id, _)| id)
                .collect();
            for id in dead {
                computation.remove(id);
                removed += 1;
            }
        }
        if removed > 0 {
            log::debug!("dce: removed {} dead nodes", removed);
        }
        Ok(removed > 0)
    }
}
