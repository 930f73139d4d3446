//! Merges the leading batch dimensions of dots into one.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, DotDims, Graph, NodeId, OpKind, Shape};
use crate::pass::Pass;

use super::laid_out_like;

/// Rewrites a dot whose batch dimensions are the leading `b >= 2` dimensions of
/// both operands into reshapes around a dot with a single batch dimension.
/// Only default layouts qualify, so the reshapes stay bitcasts.
#[derive(Debug, Default, Clone, Copy)]
pub struct DotDimensionMerger;

impl DotDimensionMerger {
    pub fn new() -> Self {
        Self
    }
}

fn leading_batch(dims: &DotDims) -> Option<usize> {
    let count = dims.lhs_batch.len();
    let leading = |batch: &[i64]| batch.iter().enumerate().all(|(i, d)| *d == i as i64);
    (count >= 2 && dims.rhs_batch.len() == count && leading(&dims.lhs_batch) && leading(&dims.rhs_batch))
        .then_some(count)
}

/// `shape` with its first `count` dimensions collapsed into one.
fn collapse(shape: &Shape, count: usize) -> Shape {
    let dims = shape.dims();
    let mut merged = vec![dims[..count].iter().product::<i64>()];
    merged.extend_from_slice(&dims[count..]);
    laid_out_like(shape.with_dims(merged), shape)
}

fn merge(computation: &mut Computation, id: NodeId) -> bool {
    let node = computation[id].clone();
    let OpKind::Dot { dims } = &node.kind else {
        return false;
    };
    let Some(count) = leading_batch(dims) else {
        return false;
    };
    let (lhs, rhs) = (node.operands[0], node.operands[1]);
    let shapes = [&computation[lhs].shape, &computation[rhs].shape, &node.shape];
    if shapes.iter().any(|shape| !shape.has_default_layout() || shape.rank() < count) {
        return false;
    }
    let (lhs_shape, rhs_shape) = (collapse(shapes[0], count), collapse(shapes[1], count));

    let shift = |values: &[i64]| values.iter().map(|d| d - (count as i64 - 1)).collect::<Vec<_>>();
    let merged_dims = DotDims {
        lhs_batch: vec![0],
        rhs_batch: vec![0],
        lhs_contracting: shift(&dims.lhs_contracting),
        rhs_contracting: shift(&dims.rhs_contracting),
    };

    let lhs_merged = computation.add(format!("{}.lhs", node.name), OpKind::Reshape, vec![lhs], lhs_shape);
    let rhs_merged = computation.add(format!("{}.rhs", node.name), OpKind::Reshape, vec![rhs], rhs_shape);
    let dot = computation.add(
        format!("{}.merged", node.name),
        OpKind::Dot { dims: merged_dims },
        vec![lhs_merged, rhs_merged],
        collapse(&node.shape, count),
    );
    let restored = computation.add(format!("{}.split", node.name), OpKind::Reshape, vec![dot], node.shape.clone());
    computation.replace_node(id, restored);
    log::trace!("dot-dimension-merger: merged {} batch dimensions of '{}'", count, node.name);
    true
}

impl Pass for DotDimensionMerger {
    fn name(&self) -> &str {
        "dot-dimension-merger"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                changed |= merge(computation, id);
            }
        }
        Ok(changed)
    }
}
