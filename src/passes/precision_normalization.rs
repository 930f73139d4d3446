//! Precision normalization.
//!
//! Rewrites operations whose low-precision operands or outputs are not supported
//! by the target so that they compute in the high-precision type, inserting
//! `convert` nodes at the boundaries. Which operations are affected is decided
//! by a [`FloatSupport`] policy.

use crate::config::TargetCapability;
use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, Node, OpKind, PrimitiveType};
use crate::pass::Pass;

/// Policy describing which operations may consume or produce low-precision floats.
pub trait FloatSupport {
    fn high_precision_type(&self) -> PrimitiveType {
        PrimitiveType::F32
    }

    fn is_low_precision(&self, element_type: PrimitiveType) -> bool {
        element_type.is_narrow_float()
    }

    fn supports_low_precision_operand(&self, node: &Node, operand_index: usize) -> bool;

    fn supports_low_precision_output(&self, node: &Node) -> bool;

    /// Whether operands and result may have different float types.
    fn supports_mixed_precisions(&self, node: &Node) -> bool;
}

/// Low precision is a concern of convolutions only. Every other operation keeps
/// whatever precision it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvLowPrecisionSupport {
    narrow_convolution: bool,
}

impl ConvLowPrecisionSupport {
    pub const fn new(narrow_convolution: bool) -> Self {
        Self { narrow_convolution }
    }

    pub fn for_capability(capability: &TargetCapability) -> Self {
        Self::new(capability.supports_narrow_float_convolution())
    }
}

fn is_convolution(node: &Node) -> bool {
    matches!(node.kind, OpKind::Convolution { .. })
}

impl FloatSupport for ConvLowPrecisionSupport {
    fn supports_low_precision_operand(&self, node: &Node, _operand_index: usize) -> bool {
        !is_convolution(node) || self.narrow_convolution
    }

    fn supports_low_precision_output(&self, node: &Node) -> bool {
        !is_convolution(node) || self.narrow_convolution
    }

    fn supports_mixed_precisions(&self, node: &Node) -> bool {
        !is_convolution(node)
    }
}

pub struct PrecisionNormalization {
    support: Box<dyn FloatSupport>,
}

impl PrecisionNormalization {
    pub fn new(support: impl FloatSupport + 'static) -> Self {
        Self {
            support: Box::new(support),
        }
    }

    /// Which operands and whether the output must move to high precision.
    fn plan(&self, computation: &Computation, node: &Node) -> Option<(Vec<bool>, bool)> {
        let output_type = node.shape.element_type()?;
        let operand_types: Vec<PrimitiveType> = node
            .operands
            .iter()
            .map(|id| computation[*id].shape.element_type())
            .collect::<Option<Vec<_>>>()?;

        let support = self.support.as_ref();
        let mut widen_operands: Vec<bool> = operand_types
            .iter()
            .enumerate()
            .map(|(i, ty)| support.is_low_precision(*ty) && !support.supports_low_precision_operand(node, i))
            .collect();
        let mut widen_output =
            support.is_low_precision(output_type) && !support.supports_low_precision_output(node);

        if !support.supports_mixed_precisions(node) {
            let high = support.high_precision_type();
            let effective = |ty: PrimitiveType, widen: bool| if widen { high } else { ty };
            let mut float_types = operand_types
                .iter()
                .zip(&widen_operands)
                .map(|(ty, widen)| effective(*ty, *widen))
                .chain(std::iter::once(effective(output_type, widen_output)))
                .filter(|ty| ty.is_float());
            let first = float_types.next();
            let mixed = float_types.any(|ty| Some(ty) != first);
            if mixed {
                for (widen, ty) in widen_operands.iter_mut().zip(&operand_types) {
                    *widen |= support.is_low_precision(*ty);
                }
                widen_output |= support.is_low_precision(output_type);
            }
        }

        (widen_operands.iter().any(|w| *w) || widen_output).then_some((widen_operands, widen_output))
    }

    fn normalize(&self, computation: &mut Computation) -> bool {
        let high = self.support.high_precision_type();
        let mut changed = false;

        for id in computation.post_order() {
            let node = computation[id].clone();
            let Some((widen_operands, widen_output)) = self.plan(computation, &node) else {
                continue;
            };
            log::trace!("precision-normalization: widening '{}' to {}", node.name, high);

            for (index, operand) in node.operands.iter().enumerate() {
                if !widen_operands[index] {
                    continue;
                }
                let source = &computation[*operand];
                let shape = source.shape.with_element_type(high);
                let name = format!("{}.widened", source.name);
                let convert = computation.add(name, OpKind::Convert, vec![*operand], shape);
                if let Some(target) = computation.node_mut(id) {
                    target.operands[index] = convert;
                }
            }

            if widen_output {
                let wide_shape = node.shape.with_element_type(high);
                if let Some(target) = computation.node_mut(id) {
                    target.shape = wide_shape;
                }
                let narrow = computation.add(
                    format!("{}.narrowed", node.name),
                    OpKind::Convert,
                    vec![id],
                    node.shape.clone(),
                );
                computation.replace_all_uses(id, narrow);
            }
            changed = true;
        }
        changed
    }
}

impl Pass for PrecisionNormalization {
    fn name(&self) -> &str {
        "precision-normalization"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            changed |= self.normalize(computation);
        }
        Ok(changed)
    }
}
