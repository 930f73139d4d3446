//! Moves float converts across reshapes and transposes.
//!
//! Widening converts sink towards their consumers and narrowing converts rise
//! towards their producers, so rearrangements run on the narrower type and
//! converts pair up where the algebraic simplifier can cancel them.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind, PrimitiveType};
use crate::pass::Pass;

use super::remove_if_dead;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConvertMover;

impl ConvertMover {
    pub fn new() -> Self {
        Self
    }
}

fn float_pair(from: Option<PrimitiveType>, to: Option<PrimitiveType>) -> Option<(PrimitiveType, PrimitiveType)> {
    let (from, to) = (from?, to?);
    (from.is_float() && to.is_float() && from != to).then_some((from, to))
}

/// `R(convert(x))` with a widening convert becomes `convert(R(x))`.
fn sink_widening(computation: &mut Computation, id: NodeId) -> bool {
    let node = computation[id].clone();
    if !node.kind.is_rearrangement() {
        return false;
    }
    let convert_id = node.operands[0];
    let convert = &computation[convert_id];
    if convert.kind != OpKind::Convert || computation.users(convert_id).len() > 1 {
        return false;
    }
    let source = convert.operands[0];
    let Some((from, to)) = float_pair(computation[source].shape.element_type(), convert.shape.element_type()) else {
        return false;
    };
    if from.bit_width() >= to.bit_width() {
        return false;
    }

    let rearranged = computation.add(
        format!("{}.narrow", node.name),
        node.kind.clone(),
        vec![source],
        node.shape.with_element_type(from),
    );
    let widened = computation.add(format!("{}.widened", node.name), OpKind::Convert, vec![rearranged], node.shape.clone());
    computation.replace_node(id, widened);
    remove_if_dead(computation, &[convert_id]);
    true
}

/// `convert(R(x))` with a narrowing convert becomes `R(convert(x))`.
fn hoist_narrowing(computation: &mut Computation, id: NodeId) -> bool {
    let node = computation[id].clone();
    if node.kind != OpKind::Convert {
        return false;
    }
    let rearrangement_id = node.operands[0];
    let rearrangement = &computation[rearrangement_id];
    if !rearrangement.kind.is_rearrangement() || computation.users(rearrangement_id).len() > 1 {
        return false;
    }
    let source = rearrangement.operands[0];
    let Some((from, to)) = float_pair(rearrangement.shape.element_type(), node.shape.element_type()) else {
        return false;
    };
    if from.bit_width() <= to.bit_width() {
        return false;
    }

    let kind = rearrangement.kind.clone();
    let source_shape = computation[source].shape.with_element_type(to);
    let narrowed = computation.add(format!("{}.early", node.name), OpKind::Convert, vec![source], source_shape);
    let rearranged = computation.add(format!("{}.rearranged", node.name), kind, vec![narrowed], node.shape.clone());
    computation.replace_node(id, rearranged);
    remove_if_dead(computation, &[rearrangement_id]);
    true
}

impl Pass for ConvertMover {
    fn name(&self) -> &str {
        "convert-mover"
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                if !computation.contains(id) {
                    continue;
                }
                if sink_widening(computation, id) || hoist_narrowing(computation, id) {
                    log::trace!("convert-mover: moved a convert in '{}'", computation.name());
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}
