//! Splits reshapes over non-default layouts into physical copies and a bitcast reshape.
//!
//! After layout assignment a reshape is only a reinterpretation of memory when
//! both its operand and its result are laid out major-to-minor. Any other
//! reshape becomes `copy -> reshape -> copy`, where the copies convert to and
//! from the default layout and the middle reshape is free.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind};
use crate::pass::Pass;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReshapeDecomposer;

impl ReshapeDecomposer {
    pub fn new() -> Self {
        Self
    }
}

fn decompose(computation: &mut Computation, id: NodeId) -> bool {
    let node = computation[id].clone();
    if node.kind != OpKind::Reshape {
        return false;
    }
    let input = node.operands[0];
    let input_shape = computation[input].shape.clone();
    if input_shape.has_default_layout() && node.shape.has_default_layout() {
        return false;
    }

    let operand = if input_shape.has_default_layout() {
        input
    } else {
        computation.add(
            format!("{}.in", node.name),
            OpKind::Copy,
            vec![input],
            input_shape.without_layout().with_default_layout(),
        )
    };
    let bitcast_shape = node.shape.without_layout().with_default_layout();
    let reshape = computation.add(format!("{}.bitcast", node.name), OpKind::Reshape, vec![operand], bitcast_shape);
    let result = if node.shape.has_default_layout() {
        reshape
    } else {
        computation.add(format!("{}.out", node.name), OpKind::Copy, vec![reshape], node.shape.clone())
    };
    computation.replace_node(id, result);
    log::trace!("reshape-decomposer: decomposed '{}'", node.name);
    true
}

impl Pass for ReshapeDecomposer {
    fn name(&self) -> &str {
        "reshape-decomposer"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                changed |= decompose(computation, id);
            }
        }
        Ok(changed)
    }
}
