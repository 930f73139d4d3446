//! Expands `cholesky` into a call of a generated solver computation.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind, Shape};
use crate::pass::Pass;

use super::{laid_out_like, targets};

/// Replaces each `cholesky` with a `call` to a fresh `solver_potrf.N` computation
/// holding the solver custom call and its scratch workspace.
#[derive(Debug, Default, Clone, Copy)]
pub struct SolverExpander;

impl SolverExpander {
    pub fn new() -> Self {
        Self
    }
}

/// Scratch bytes the factorization needs: one copy of the input matrices.
fn workspace_bytes(shape: &Shape) -> u64 {
    shape.byte_size()
}

fn build_solver(name: &str, input: &Shape, result: &Shape, lower: bool) -> Computation {
    let mut body = Computation::new(name);
    let a = body.add("a", OpKind::Parameter { number: 0 }, vec![], input.clone());

    let workspace = laid_out_like(Shape::workspace(workspace_bytes(input)), input);
    let mut kind = OpKind::custom_call(targets::POTRF);
    if let OpKind::CustomCall { config, .. } = &mut kind {
        config.insert("lower".to_string(), lower.to_string());
    }
    let call = body.add(
        "potrf",
        kind,
        vec![a],
        Shape::tuple(vec![result.clone(), workspace]),
    );
    let root = super::add_tuple_element(&mut body, call, 0, "factor");
    body.set_root(root);
    body
}

impl Pass for SolverExpander {
    fn name(&self) -> &str {
        "solver-expander"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let found: Vec<NodeId> = graph
            .entry()
            .nodes()
            .filter(|(_, node)| matches!(node.kind, OpKind::Cholesky { .. }))
            .map(|(id, _)| id)
            .collect();

        for id in &found {
            let node = graph.entry()[*id].clone();
            let OpKind::Cholesky { lower } = node.kind else {
                continue;
            };
            let input = graph.entry()[node.operands[0]].shape.clone();
            let name = graph.fresh_subcomputation_name("solver_potrf");
            graph.add_subcomputation(build_solver(&name, &input, &node.shape, lower))?;
            log::trace!("solver-expander: '{}' now calls '{}'", node.name, name);

            let entry = graph.entry_mut();
            let call = entry.add(
                format!("{}.call", node.name),
                OpKind::Call { target: name },
                node.operands.clone(),
                node.shape.clone(),
            );
            entry.replace_node(*id, call);
        }
        Ok(!found.is_empty())
    }
}
