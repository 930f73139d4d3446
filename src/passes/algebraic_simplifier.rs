// This module implements the algebraic simplifier, the workhorse cleanup pass that runs
// inside several fixed-point loops of both pipelines. It removes arithmetic identities
// (x+0, x-0, x*1, x/1), no-op data movement (copies, reshapes, transposes, pads and
// converts that do not change their operand), collapses reshape and transpose chains and
// lossless convert round trips, and folds min/max of constants with configurable NaN
// semantics. Two rewrites are optional and disabled by the canonicalization pipeline:
// swapping convolution operands and distributing a reduce over a concatenate. When
// running after layout assignment, "does not change its operand" includes the layout.

//! Algebraic simplification.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, Literal, NodeId, OpKind, ReduceKind, Shape};
use crate::pass::Pass;

use super::is_constant_splat_of;

/// Configuration of [`AlgebraicSimplifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgebraicSimplifierOptions {
    /// Layouts are assigned and must be preserved.
    pub is_layout_sensitive: bool,
    pub enable_conv_operand_swap: bool,
    pub enable_unconditional_reduce_of_concat_replacement: bool,
    /// Min/max with a NaN operand yields NaN.
    pub minmax_propagate_nan: bool,
}

impl Default for AlgebraicSimplifierOptions {
    fn default() -> Self {
        Self {
            is_layout_sensitive: false,
            enable_conv_operand_swap: true,
            enable_unconditional_reduce_of_concat_replacement: true,
            minmax_propagate_nan: true,
        }
    }
}

impl AlgebraicSimplifierOptions {
    pub fn layout_sensitive(mut self, enabled: bool) -> Self {
        self.is_layout_sensitive = enabled;
        self
    }

    pub fn conv_operand_swap(mut self, enabled: bool) -> Self {
        self.enable_conv_operand_swap = enabled;
        self
    }

    pub fn unconditional_reduce_of_concat_replacement(mut self, enabled: bool) -> Self {
        self.enable_unconditional_reduce_of_concat_replacement = enabled;
        self
    }

    pub fn minmax_propagate_nan(mut self, enabled: bool) -> Self {
        self.minmax_propagate_nan = enabled;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlgebraicSimplifier {
    options: AlgebraicSimplifierOptions,
}

impl AlgebraicSimplifier {
    pub fn new(options: AlgebraicSimplifierOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AlgebraicSimplifierOptions {
        &self.options
    }

    fn same_shape(&self, a: &Shape, b: &Shape) -> bool {
        if self.options.is_layout_sensitive {
            a.equal_with_layout(b)
        } else {
            a.compatible(b)
        }
    }

    /// Replace `id` by `to` when their shapes agree.
    fn forward(&self, computation: &mut Computation, id: NodeId, to: NodeId) -> bool {
        if !self.same_shape(&computation[id].shape, &computation[to].shape) {
            return false;
        }
        computation.replace_node(id, to);
        true
    }

    fn simplify(&self, computation: &mut Computation, id: NodeId) -> bool {
        let node = computation[id].clone();
        let operand = |i: usize| node.operands[i];
        let is = |i: usize, value: f64| is_constant_splat_of(computation, operand(i), value);

        match &node.kind {
            OpKind::Add => {
                if is(1, 0.0) {
                    self.forward(computation, id, operand(0))
                } else if is(0, 0.0) {
                    self.forward(computation, id, operand(1))
                } else {
                    false
                }
            }
            OpKind::Subtract if is(1, 0.0) => self.forward(computation, id, operand(0)),
            OpKind::Multiply => {
                if is(1, 1.0) {
                    self.forward(computation, id, operand(0))
                } else if is(0, 1.0) {
                    self.forward(computation, id, operand(1))
                } else {
                    false
                }
            }
            OpKind::Divide if is(1, 1.0) => self.forward(computation, id, operand(0)),
            OpKind::Copy | OpKind::Reshape => {
                if self.forward(computation, id, operand(0)) {
                    return true;
                }
                self.collapse_reshape_chain(computation, id)
            }
            OpKind::Pad { padding } if padding.iter().all(|p| p.is_zero()) => {
                self.forward(computation, id, operand(0))
            }
            OpKind::Transpose { permutation } => self.simplify_transpose(computation, id, permutation),
            OpKind::Convert => self.simplify_convert(computation, id),
            OpKind::Maximum | OpKind::Minimum => self.simplify_minmax(computation, id),
            OpKind::Convolution { .. } if self.options.enable_conv_operand_swap => {
                self.swap_conv_operands(computation, id)
            }
            OpKind::Reduce { dimensions, kind }
                if self.options.enable_unconditional_reduce_of_concat_replacement =>
            {
                self.split_reduce_of_concat(computation, id, dimensions, *kind)
            }
            _ => false,
        }
    }

    /// `reshape(reshape(x))` reads `x` directly.
    fn collapse_reshape_chain(&self, computation: &mut Computation, id: NodeId) -> bool {
        let node = &computation[id];
        if node.kind != OpKind::Reshape {
            return false;
        }
        let inner = &computation[node.operands[0]];
        if inner.kind != OpKind::Reshape {
            return false;
        }
        let source = inner.operands[0];
        if let Some(node) = computation.node_mut(id) {
            node.operands[0] = source;
        }
        true
    }

    fn simplify_transpose(&self, computation: &mut Computation, id: NodeId, permutation: &[i64]) -> bool {
        let is_identity = |perm: &[i64]| perm.iter().enumerate().all(|(i, p)| *p == i as i64);
        let input = computation[id].operands[0];
        if is_identity(permutation) {
            return self.forward(computation, id, input);
        }

        let OpKind::Transpose { permutation: inner } = &computation[input].kind else {
            return false;
        };
        let composed: Vec<i64> = permutation.iter().map(|p| inner[*p as usize]).collect();
        let source = computation[input].operands[0];
        if is_identity(&composed) && self.forward(computation, id, source) {
            return true;
        }
        if let Some(node) = computation.node_mut(id) {
            node.kind = OpKind::Transpose { permutation: composed };
            node.operands[0] = source;
        }
        true
    }

    fn simplify_convert(&self, computation: &mut Computation, id: NodeId) -> bool {
        let input = computation[id].operands[0];
        if computation[input].shape.element_type() == computation[id].shape.element_type() {
            return self.forward(computation, id, input);
        }

        let middle = &computation[input];
        if middle.kind != OpKind::Convert {
            return false;
        }
        let source = middle.operands[0];
        let (Some(source_type), Some(middle_type)) =
            (computation[source].shape.element_type(), middle.shape.element_type())
        else {
            return false;
        };
        let round_trip = Some(source_type) == computation[id].shape.element_type()
            && source_type.fits_losslessly_in(middle_type);
        round_trip && self.forward(computation, id, source)
    }

    fn simplify_minmax(&self, computation: &mut Computation, id: NodeId) -> bool {
        let node = computation[id].clone();
        let (a, b) = (node.operands[0], node.operands[1]);
        if a == b {
            return self.forward(computation, id, a);
        }
        let (Some(lhs), Some(rhs)) = (computation[a].kind.literal(), computation[b].kind.literal()) else {
            return false;
        };
        let is_max = node.kind == OpKind::Maximum;
        let nan = self.options.minmax_propagate_nan;
        let literal = match (lhs.splat_value(), rhs.splat_value()) {
            (Some(x), Some(y)) => Literal::splat(minmax(x, y, is_max, nan), lhs.len()),
            _ => Literal::new(lhs.iter().zip(rhs.iter()).map(|(x, y)| minmax(x, y, is_max, nan)).collect()),
        };
        let folded = computation.add(
            format!("{}.folded", node.name),
            OpKind::Constant { literal },
            vec![],
            node.shape.clone(),
        );
        computation.replace_node(id, folded);
        true
    }

    /// Put the operand with more elements in the kernel position.
    fn swap_conv_operands(&self, computation: &mut Computation, id: NodeId) -> bool {
        let operands = computation[id].operands.clone();
        let (input, kernel) = (&computation[operands[0]].shape, &computation[operands[1]].shape);
        if kernel.element_count() <= input.element_count() || input.element_type() != kernel.element_type() {
            return false;
        }
        if let Some(node) = computation.node_mut(id) {
            node.operands.swap(0, 1);
        }
        true
    }

    /// `reduce(concatenate(a, b, ..))` over the concatenated dimension becomes the
    /// combination of the per-operand reductions.
    fn split_reduce_of_concat(
        &self,
        computation: &mut Computation,
        id: NodeId,
        dimensions: &[i64],
        kind: ReduceKind,
    ) -> bool {
        let node = computation[id].clone();
        let concat = &computation[node.operands[0]];
        let OpKind::Concatenate { dimension } = concat.kind else {
            return false;
        };
        if !dimensions.contains(&dimension) || concat.operands.len() < 2 {
            return false;
        }
        let parts = concat.operands.clone();
        let combine = match kind {
            ReduceKind::Sum => OpKind::Add,
            ReduceKind::Max => OpKind::Maximum,
            ReduceKind::Min => OpKind::Minimum,
        };

        let mut result: Option<NodeId> = None;
        for part in parts {
            let reduced = computation.add(
                format!("{}.part", node.name),
                node.kind.clone(),
                vec![part],
                node.shape.clone(),
            );
            result = Some(match result {
                None => reduced,
                Some(acc) => computation.add(
                    format!("{}.combine", node.name),
                    combine.clone(),
                    vec![acc, reduced],
                    node.shape.clone(),
                ),
            });
        }
        match result {
            Some(result) => {
                computation.replace_node(id, result);
                true
            }
            None => false,
        }
    }
}

fn minmax(a: f64, b: f64, is_max: bool, propagate_nan: bool) -> f64 {
    if a.is_nan() || b.is_nan() {
        return match (propagate_nan, a.is_nan()) {
            (true, _) => f64::NAN,
            (false, true) => b,
            (false, false) => a,
        };
    }
    if is_max {
        a.max(b)
    } else {
        a.min(b)
    }
}

impl Pass for AlgebraicSimplifier {
    fn name(&self) -> &str {
        "algebraic-simplifier"
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                if computation.contains(id) && self.simplify(computation, id) {
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::testing::{count_op, root_op, run_once};

    fn simplifier() -> AlgebraicSimplifier {
        AlgebraicSimplifier::default()
    }

    #[test]
    fn test_arithmetic_identities() {
        let (graph, changed) = run_once(
            &simplifier(),
            "graph g entry {\n\
               %x = f32[4] parameter(0)\n\
               %zero = f32[4] constant(0)\n\
               %one = f32[4] constant(1)\n\
               %a = f32[4] add(%zero, %x)\n\
               %m = f32[4] multiply(%a, %one)\n\
               ROOT %n = f32[4] negate(%m)\n\
             }",
        );
        assert!(changed);
        let entry = graph.entry();
        assert_eq!(entry.root_node().unwrap().operands, vec![entry.find("x").unwrap()]);
    }

    #[test]
    fn test_transpose_chain_cancels() {
        let (graph, changed) = run_once(
            &simplifier(),
            "graph g entry {\n\
               %x = f32[2,3] parameter(0)\n\
               %t1 = f32[3,2] transpose(%x), dimensions={1,0}\n\
               %t2 = f32[2,3] transpose(%t1), dimensions={1,0}\n\
               ROOT %n = f32[2,3] negate(%t2)\n\
             }",
        );
        assert!(changed);
        let entry = graph.entry();
        assert_eq!(entry.root_node().unwrap().operands, vec![entry.find("x").unwrap()]);
    }

    #[test]
    fn test_reshape_chain_collapses() {
        let (graph, changed) = run_once(
            &simplifier(),
            "graph g entry {\n\
               %x = f32[2,3] parameter(0)\n\
               %r1 = f32[6] reshape(%x)\n\
               ROOT %r2 = f32[3,2] reshape(%r1)\n\
             }",
        );
        assert!(changed);
        let entry = graph.entry();
        assert_eq!(entry.root_node().unwrap().operands, vec![entry.find("x").unwrap()]);
    }

    #[test]
    fn test_lossless_convert_round_trip() {
        let (graph, changed) = run_once(
            &simplifier(),
            "graph g entry {\n\
               %x = bf16[4] parameter(0)\n\
               %up = f32[4] convert(%x)\n\
               ROOT %down = bf16[4] convert(%up)\n\
             }",
        );
        assert!(changed);
        assert_eq!(root_op(&graph), "parameter");

        let (_, changed) = run_once(
            &simplifier(),
            "graph g entry {\n\
               %x = f32[4] parameter(0)\n\
               %down = bf16[4] convert(%x)\n\
               ROOT %up = f32[4] convert(%down)\n\
             }",
        );
        assert!(!changed);
    }

    #[test]
    fn test_minmax_nan_modes() {
        let text = "graph g entry {\n\
               %a = f32[2] constant({nan, 1})\n\
               %b = f32[2] constant({2, 3})\n\
               ROOT %m = f32[2] maximum(%a, %b)\n\
             }";
        let (graph, _) = run_once(&simplifier(), text);
        let values = graph.entry().root_node().unwrap().kind.literal().unwrap().to_vec();
        assert!(values[0].is_nan());
        assert_eq!(values[1], 3.0);

        let fast = AlgebraicSimplifier::new(AlgebraicSimplifierOptions::default().minmax_propagate_nan(false));
        let (graph, _) = run_once(&fast, text);
        let values = graph.entry().root_node().unwrap().kind.literal().unwrap().to_vec();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn test_layout_sensitive_copy_is_kept() {
        let options = AlgebraicSimplifierOptions::default().layout_sensitive(true);
        let (_, changed) = run_once(
            &AlgebraicSimplifier::new(options),
            "graph g entry {\n\
               %x = f32[2,3]{1,0} parameter(0)\n\
               ROOT %c = f32[2,3]{0,1} copy(%x)\n\
             }",
        );
        assert!(!changed);

        let (graph, changed) = run_once(
            &simplifier(),
            "graph g entry {\n\
               %x = f32[2,3]{1,0} parameter(0)\n\
               ROOT %c = f32[2,3]{0,1} copy(%x)\n\
             }",
        );
        assert!(changed);
        assert_eq!(root_op(&graph), "parameter");
    }

    #[test]
    fn test_reduce_of_concat_follows_option() {
        let text = "graph g entry {\n\
               %a = f32[2,3] parameter(0)\n\
               %b = f32[2,5] parameter(1)\n\
               %c = f32[2,8] concatenate(%a, %b), dimension=1\n\
               ROOT %r = f32[2] reduce(%c), dimensions={1}, kind=sum\n\
             }";
        let (graph, changed) = run_once(&simplifier(), text);
        assert!(changed);
        assert_eq!(root_op(&graph), "add");
        assert_eq!(count_op(&graph, "reduce"), 2);

        let disabled = AlgebraicSimplifier::new(
            AlgebraicSimplifierOptions::default().unconditional_reduce_of_concat_replacement(false),
        );
        let (_, changed) = run_once(&disabled, text);
        assert!(!changed);
    }

    #[test]
    fn test_conv_operand_swap_follows_option() {
        let text = "graph g entry {\n\
               %x = f32[1,2,2,1] parameter(0)\n\
               %w = f32[1,4,4,1] parameter(1)\n\
               ROOT %conv = f32[1,4,4,1] convolution(%x, %w)\n\
             }";
        let (graph, changed) = run_once(&simplifier(), text);
        assert!(changed);
        let entry = graph.entry();
        assert_eq!(entry.root_node().unwrap().operands[0], entry.find("w").unwrap());

        let disabled = AlgebraicSimplifier::new(AlgebraicSimplifierOptions::default().conv_operand_swap(false));
        let (_, changed) = run_once(&disabled, text);
        assert!(!changed);
    }
}
