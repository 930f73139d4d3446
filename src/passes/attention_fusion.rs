//! Multi-headed attention fusion.

use crate::config::TargetCapability;
use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind, Shape};
use crate::pass::Pass;

use super::{add_tuple_element, constant_splat, laid_out_like, remove_if_dead, targets};

/// Replaces `dot(softmax(dot(q, k) [* scale]), v)` with one fused attention
/// custom call over `(q, k, v)`. Intermediate nodes must have no other users.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttentionFusion;

impl AttentionFusion {
    pub fn new() -> Self {
        Self
    }
}

struct AttentionMatch {
    output: NodeId,
    query: NodeId,
    key: NodeId,
    value: NodeId,
    scale: Option<f64>,
    interior: Vec<NodeId>,
}

fn single_use(computation: &Computation, id: NodeId, user: NodeId) -> bool {
    computation.users(id) == [user] && computation.root() != Some(id)
}

fn match_attention(computation: &Computation, output: NodeId) -> Option<AttentionMatch> {
    let node = computation.node(output)?;
    let OpKind::Dot { .. } = node.kind else {
        return None;
    };
    let (probabilities, value) = (node.operands[0], node.operands[1]);
    let softmax = &computation[probabilities];
    let OpKind::Softmax { dimension } = softmax.kind else {
        return None;
    };
    if dimension as usize + 1 != softmax.shape.rank() || !single_use(computation, probabilities, output) {
        return None;
    }

    let mut interior = vec![probabilities];
    let mut scores = softmax.operands[0];
    let mut scale = None;
    let scaled = &computation[scores];
    if scaled.kind == OpKind::Multiply {
        if !single_use(computation, scores, probabilities) {
            return None;
        }
        let (lhs, rhs) = (scaled.operands[0], scaled.operands[1]);
        let (factor, product) = match (constant_splat(computation, lhs), constant_splat(computation, rhs)) {
            (_, Some(factor)) => (factor, lhs),
            (Some(factor), None) => (factor, rhs),
            (None, None) => return None,
        };
        interior.push(scores);
        scale = Some(factor);
        scores = product;
    }

    let user = *interior.last()?;
    let product = &computation[scores];
    if !matches!(product.kind, OpKind::Dot { .. }) || !single_use(computation, scores, user) {
        return None;
    }
    interior.push(scores);
    // The scale constant goes away with the multiply when nothing else uses it.
    if scale.is_some() {
        let multiply = &computation[interior[1]];
        interior.extend(multiply.operands.iter().copied().filter(|id| *id != scores));
    }

    Some(AttentionMatch {
        output,
        query: product.operands[0],
        key: product.operands[1],
        value,
        scale,
        interior,
    })
}

fn fuse(computation: &mut Computation, found: AttentionMatch) {
    let output = computation[found.output].clone();
    let mut call = OpKind::custom_call(match found.scale {
        Some(_) => targets::FMHA_SCALE_SOFTMAX,
        None => targets::FMHA_SOFTMAX,
    });
    if let (OpKind::CustomCall { config, .. }, Some(scale)) = (&mut call, found.scale) {
        config.insert("scale".to_string(), scale.to_string());
    }
    let shape = Shape::tuple(vec![
        output.shape.clone(),
        laid_out_like(Shape::workspace(0), &output.shape),
    ]);
    let fused = computation.add(
        format!("{}.fmha", output.name),
        call,
        vec![found.query, found.key, found.value],
        shape,
    );
    let result = add_tuple_element(computation, fused, 0, &format!("{}.result", output.name));
    computation.replace_node(found.output, result);
    remove_if_dead(computation, &found.interior);
    log::debug!("attention-fusion: fused attention ending at '{}'", output.name);
}

impl Pass for AttentionFusion {
    fn name(&self) -> &str {
        "attention-fusion"
    }

    fn applies_to(&self, capability: &TargetCapability) -> bool {
        capability.supports_fused_attention()
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                if let Some(found) = match_attention(computation, id) {
                    fuse(computation, found);
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}
