//! Lowers triangular solves to runtime custom calls.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind, Shape};
use crate::pass::Pass;

use super::{add_tuple_element, laid_out_like, targets};

/// Replaces `triangular-solve(a, b)` with a custom call returning the solution and
/// a scratch buffer holding two device pointers per batch element.
#[derive(Debug, Clone, Copy)]
pub struct TriangularSolveRewriter {
    pointer_size: u64,
}

impl Default for TriangularSolveRewriter {
    fn default() -> Self {
        Self::new(8)
    }
}

impl TriangularSolveRewriter {
    pub fn new(pointer_size: u64) -> Self {
        Self { pointer_size }
    }

    /// Scratch bytes for solving `b`: pointer arrays for `a` and `b` per batch.
    pub fn workspace_bytes(&self, b: &Shape) -> u64 {
        let dims = b.dims();
        let batch: i64 = dims[..dims.len().saturating_sub(2)].iter().product();
        2 * batch.max(0) as u64 * self.pointer_size
    }

    fn rewrite(&self, computation: &mut Computation, id: NodeId) -> bool {
        let node = computation[id].clone();
        let OpKind::TriangularSolve { left_side, lower } = node.kind else {
            return false;
        };
        let b = &computation[node.operands[1]].shape;
        let workspace = laid_out_like(Shape::workspace(self.workspace_bytes(b)), &node.shape);

        let mut call = OpKind::custom_call(targets::TRIANGULAR_SOLVE);
        if let OpKind::CustomCall { config, .. } = &mut call {
            config.insert("left_side".to_string(), left_side.to_string());
            config.insert("lower".to_string(), lower.to_string());
        }
        let solve = computation.add(
            format!("{}.solve", node.name),
            call,
            node.operands.clone(),
            Shape::tuple(vec![node.shape.clone(), workspace]),
        );
        let result = add_tuple_element(computation, solve, 0, &format!("{}.result", node.name));
        computation.replace_node(id, result);
        log::trace!("triangular-solve-rewriter: rewrote '{}'", node.name);
        true
    }
}

impl Pass for TriangularSolveRewriter {
    fn name(&self) -> &str {
        "triangular-solve-rewriter"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                changed |= self.rewrite(computation, id);
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::testing::{count_op, root_op, run_once};

    #[test]
    fn test_solve_becomes_custom_call_with_pointer_workspace() {
        let (graph, changed) = run_once(
            &TriangularSolveRewriter::new(8),
            "graph g entry {\n\
               %a = f32[3,4,4]{2,1,0} parameter(0)\n\
               %b = f32[3,4,2]{2,1,0} parameter(1)\n\
               ROOT %x = f32[3,4,2]{2,1,0} triangular-solve(%a, %b), left_side=true, lower=false\n\
             }",
        );
        assert!(changed);
        assert_eq!(count_op(&graph, "triangular-solve"), 0);
        assert_eq!(root_op(&graph), "get-tuple-element");

        let entry = graph.entry();
        let call = &entry[entry.root_node().unwrap().operands[0]];
        assert_eq!(call.shape.tuple_elements()[1].dims(), &[48]);
        match &call.kind {
            OpKind::CustomCall { target, config } => {
                assert_eq!(target, targets::TRIANGULAR_SOLVE);
                assert_eq!(config.get("lower").map(String::as_str), Some("false"));
                assert_eq!(config.get("left_side").map(String::as_str), Some("true"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_workspace_scales_with_pointer_size() {
        let b = Shape::array(crate::graph::PrimitiveType::F32, vec![2, 5, 4, 4]);
        assert_eq!(TriangularSolveRewriter::new(4).workspace_bytes(&b), 80);
        let unbatched = Shape::array(crate::graph::PrimitiveType::F32, vec![4, 4]);
        assert_eq!(TriangularSolveRewriter::default().workspace_bytes(&unbatched), 16);
    }
}
