//! Sinks reshapes and transposes below elementwise operations.
//!
//! `op(R(x), R(y))` becomes `R(op(x, y))` when every operand is the same
//! rearrangement `R` of an equally shaped input, or a constant that is cheap to
//! rearrange the other way. Moving rearrangements towards the root lets the
//! algebraic simplifier cancel them against each other. Converts are left alone.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, Literal, NodeId, OpKind, Shape};
use crate::pass::Pass;

use super::remove_if_dead;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReshapeMoverOptions {
    /// A rank-1 constant feeding the moved reshape is cheap to reshape, like a
    /// 1-D broadcast.
    pub reshape_of_1d_constant_is_cheap: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReshapeMover {
    options: ReshapeMoverOptions,
}

enum Operand {
    /// Rearrangement node and its input.
    Rearranged(NodeId, NodeId),
    Constant(NodeId),
}

impl ReshapeMover {
    pub fn new(options: ReshapeMoverOptions) -> Self {
        Self { options }
    }

    fn classify(&self, computation: &Computation, id: NodeId) -> Option<Operand> {
        let node = &computation[id];
        if node.kind.is_rearrangement() {
            let input = node.operands[0];
            return (!computation[input].kind.is_constant()).then_some(Operand::Rearranged(id, input));
        }
        node.kind.is_constant().then_some(Operand::Constant(id))
    }

    /// The constant `id` expressed in the input space of `rearrangement`.
    fn inverse_constant(&self, computation: &Computation, id: NodeId, rearrangement: &OpKind, dims: &[i64]) -> Option<(Literal, Shape)> {
        let node = &computation[id];
        let literal = node.kind.literal()?;
        let shape = node.shape.without_layout().with_dims(dims.to_vec());
        if let Some(value) = literal.splat_value() {
            return Some((Literal::splat(value, literal.len()), shape));
        }
        let cheap_1d = self.options.reshape_of_1d_constant_is_cheap
            && node.shape.rank() == 1
            && *rearrangement == OpKind::Reshape;
        cheap_1d.then(|| (literal.clone(), shape))
    }

    fn try_sink(&self, computation: &mut Computation, id: NodeId) -> bool {
        let node = computation[id].clone();
        if !node.kind.is_elementwise() || node.kind == OpKind::Convert || node.shape.is_tuple() {
            return false;
        }

        let mut classified = Vec::with_capacity(node.operands.len());
        for operand in &node.operands {
            let Some(class) = self.classify(computation, *operand) else {
                return false;
            };
            classified.push(class);
        }

        let mut rearrangement: Option<(OpKind, Vec<i64>)> = None;
        for class in &classified {
            if let Operand::Rearranged(r, input) = class {
                let kind = computation[*r].kind.clone();
                let dims = computation[*input].shape.dims().to_vec();
                match &rearrangement {
                    None => rearrangement = Some((kind, dims)),
                    Some((k, d)) if *k == kind && *d == dims => {}
                    Some(_) => return false,
                }
            }
        }
        let Some((kind, dims)) = rearrangement else {
            return false;
        };

        let mut operands = Vec::with_capacity(classified.len());
        let mut old = Vec::new();
        for class in &classified {
            match class {
                Operand::Rearranged(r, input) => {
                    operands.push(*input);
                    old.push(*r);
                }
                Operand::Constant(c) => {
                    let Some((literal, shape)) = self.inverse_constant(computation, *c, &kind, &dims) else {
                        return false;
                    };
                    let name = format!("{}.moved", computation[*c].name);
                    operands.push(computation.add(name, OpKind::Constant { literal }, vec![], shape));
                    old.push(*c);
                }
            }
        }

        let Some(element_type) = node.shape.element_type() else {
            return false;
        };
        let inner = computation.add(
            format!("{}.inner", node.name),
            node.kind.clone(),
            operands,
            Shape::array(element_type, dims),
        );
        let outer = computation.add(format!("{}.rearranged", node.name), kind, vec![inner], node.shape.clone());
        computation.replace_node(id, outer);
        remove_if_dead(computation, &old);
        log::trace!("reshape-mover: sank rearrangement below '{}'", node.name);
        true
    }
}

impl Pass for ReshapeMover {
    fn name(&self) -> &str {
        "reshape-mover"
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                if computation.contains(id) && self.try_sink(computation, id) {
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}
