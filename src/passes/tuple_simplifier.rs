//! Removes tuple construction immediately taken apart again.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind};
use crate::pass::Pass;

use super::remove_if_dead;

/// Rewrites `gte(tuple(..), i)` to the i-th tuple operand and
/// `tuple(gte(x, 0), .., gte(x, n-1))` to `x`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TupleSimplifier;

impl TupleSimplifier {
    pub fn new() -> Self {
        Self
    }
}

/// `x` when `id` is `tuple(gte(x, 0), .., gte(x, n-1))` covering all of `x`.
fn rebuilt_tuple_source(computation: &Computation, id: NodeId) -> Option<NodeId> {
    let node = &computation[id];
    if node.kind != OpKind::Tuple || node.operands.is_empty() {
        return None;
    }
    let mut source = None;
    for (position, operand) in node.operands.iter().enumerate() {
        let element = &computation[*operand];
        if element.kind != (OpKind::GetTupleElement { index: position }) {
            return None;
        }
        let from = element.operands[0];
        if *source.get_or_insert(from) != from {
            return None;
        }
    }
    let source = source?;
    computation[source].shape.compatible(&node.shape).then_some(source)
}

fn simplify(computation: &mut Computation) -> bool {
    let mut changed = false;
    for id in computation.post_order() {
        let Some(node) = computation.node(id) else {
            continue;
        };

        match node.kind {
            OpKind::GetTupleElement { index } => {
                let tuple = node.operands[0];
                let tuple_node = &computation[tuple];
                if tuple_node.kind != OpKind::Tuple {
                    continue;
                }
                let element = tuple_node.operands[index];
                computation.replace_node(id, element);
                remove_if_dead(computation, &[tuple]);
                changed = true;
            }
            OpKind::Tuple => {
                let Some(source) = rebuilt_tuple_source(computation, id) else {
                    continue;
                };
                let elements = computation[id].operands.clone();
                computation.replace_node(id, source);
                remove_if_dead(computation, &elements);
                changed = true;
            }
            _ => {}
        }
    }
    changed
}

impl Pass for TupleSimplifier {
    fn name(&self) -> &str {
        "tuple-simplifier"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            changed |= simplify(computation);
        }
        Ok(changed)
    }
}
