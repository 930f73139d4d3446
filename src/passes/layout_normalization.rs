//! Computes elementwise operations in the default layout.
//!
//! An elementwise node whose result has a non-default layout is rebuilt on
//! default-layout copies of its operands, and its result is copied back to the
//! assigned layout. Copies themselves are the layout changes and stay as they are.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind};
use crate::pass::Pass;

#[derive(Debug, Default, Clone, Copy)]
pub struct LayoutNormalization;

impl LayoutNormalization {
    pub fn new() -> Self {
        Self
    }
}

fn normalize(computation: &mut Computation, id: NodeId) -> bool {
    let node = computation[id].clone();
    if !node.kind.is_elementwise() || node.kind == OpKind::Copy || node.shape.has_default_layout() {
        return false;
    }
    if node.operands.iter().any(|operand| computation[*operand].shape.is_tuple()) {
        return false;
    }

    let mut operands = Vec::with_capacity(node.operands.len());
    for (index, operand) in node.operands.iter().enumerate() {
        let shape = computation[*operand].shape.clone();
        if shape.has_default_layout() {
            operands.push(*operand);
            continue;
        }
        let copy = computation.add(
            format!("{}.operand{}", node.name, index),
            OpKind::Copy,
            vec![*operand],
            shape.without_layout().with_default_layout(),
        );
        operands.push(copy);
    }

    let normalized = computation.add(
        format!("{}.normalized", node.name),
        node.kind.clone(),
        operands,
        node.shape.without_layout().with_default_layout(),
    );
    let restored = computation.add(format!("{}.relayout", node.name), OpKind::Copy, vec![normalized], node.shape.clone());
    computation.replace_node(id, restored);
    log::trace!("layout-normalization: normalized '{}'", node.name);
    true
}

impl Pass for LayoutNormalization {
    fn name(&self) -> &str {
        "layout-normalization"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                changed |= normalize(computation, id);
            }
        }
        Ok(changed)
    }
}
