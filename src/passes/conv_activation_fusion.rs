//! Fuses a bias add and relu activation into legalized convolutions.

use crate::config::TargetCapability;
use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, NodeId, OpKind};
use crate::pass::Pass;

use super::{add_tuple_element, is_constant_splat_of, remove_if_dead, targets};

/// Rewrites `maximum(gte(conv), 0)` and `maximum(add(gte(conv), bias), 0)` into a
/// single fused convolution custom call with `activation=relu`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConvActivationFusion;

impl ConvActivationFusion {
    pub fn new() -> Self {
        Self
    }
}

struct FusionMatch {
    relu: NodeId,
    zero: NodeId,
    add: Option<NodeId>,
    bias: Option<NodeId>,
    result: NodeId,
    conv: NodeId,
}

fn only_user_is(computation: &Computation, id: NodeId, user: NodeId) -> bool {
    computation.users(id) == [user] && computation.root() != Some(id)
}

/// `gte(conv, 0)` of an unfused convolution used only by `user`.
fn conv_result(computation: &Computation, id: NodeId, user: NodeId) -> Option<NodeId> {
    let node = computation.node(id)?;
    if node.kind != (OpKind::GetTupleElement { index: 0 }) || !only_user_is(computation, id, user) {
        return None;
    }
    let conv = node.operands[0];
    let is_plain_conv = computation[conv].kind.custom_call_target() == Some(targets::CONV_FORWARD);
    (is_plain_conv && only_user_is(computation, conv, id)).then_some(conv)
}

fn match_relu(computation: &Computation, relu: NodeId) -> Option<FusionMatch> {
    let node = computation.node(relu)?;
    if node.kind != OpKind::Maximum {
        return None;
    }
    let (zero, input) = match (node.operands[0], node.operands[1]) {
        (a, b) if is_constant_splat_of(computation, b, 0.0) => (b, a),
        (a, b) if is_constant_splat_of(computation, a, 0.0) => (a, b),
        _ => return None,
    };

    if let Some(conv) = conv_result(computation, input, relu) {
        return Some(FusionMatch {
            relu,
            zero,
            add: None,
            bias: None,
            result: input,
            conv,
        });
    }

    let add = computation.node(input)?;
    if add.kind != OpKind::Add || !only_user_is(computation, input, relu) {
        return None;
    }
    let (lhs, rhs) = (add.operands[0], add.operands[1]);
    let (result, bias, conv) = if let Some(conv) = conv_result(computation, lhs, input) {
        (lhs, rhs, conv)
    } else {
        (rhs, lhs, conv_result(computation, rhs, input)?)
    };
    Some(FusionMatch {
        relu,
        zero,
        add: Some(input),
        bias: Some(bias),
        result,
        conv,
    })
}

fn fuse(computation: &mut Computation, found: FusionMatch) {
    let conv = computation[found.conv].clone();
    let OpKind::CustomCall { mut config, .. } = conv.kind else {
        return;
    };
    config.insert("activation".to_string(), "relu".to_string());
    let mut operands = conv.operands.clone();
    if let Some(bias) = found.bias {
        operands.push(bias);
    }

    let fused = computation.add(
        format!("{}.fused", conv.name),
        OpKind::CustomCall {
            target: targets::CONV_BIAS_ACTIVATION_FORWARD.to_string(),
            config,
        },
        operands,
        conv.shape.clone(),
    );
    let result = add_tuple_element(computation, fused, 0, &format!("{}.result", conv.name));
    computation.replace_node(found.relu, result);

    let mut dead = vec![found.result, found.conv, found.zero];
    dead.extend(found.add);
    remove_if_dead(computation, &dead);
}

impl Pass for ConvActivationFusion {
    fn name(&self) -> &str {
        "conv-activation-fusion"
    }

    fn applies_to(&self, capability: &TargetCapability) -> bool {
        capability.supports_fused_convolution()
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                if let Some(found) = match_relu(computation, id) {
                    log::trace!("conv-activation-fusion: fusing '{}'", computation[id].name);
                    fuse(computation, found);
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
    use crate::passes::testing::run_once;

    const CONV: &str = "%x = f32[1,8,8,3] parameter(0)\n\
        %w = f32[3,3,3,4] parameter(1)\n\
        %cc = (f32[1,6,6,4], u8[0]) custom-call(%x, %w), target=\"__spirc$convForward\"\n\
        %r = f32[1,6,6,4] get-tuple-element(%cc), index=0\n\
        %zero = f32[1,6,6,4] constant(0)\n";

    #[test]
    fn test_relu_is_fused() {
        let text = format!("graph g entry {{\n{CONV} ROOT %relu = f32[1,6,6,4] maximum(%r, %zero)\n}}");
        let (graph, changed) = run_once(&ConvActivationFusion::new(), &text);
        assert!(changed);
        assert_eq!(graph.count_custom_calls(targets::CONV_FORWARD), 0);
        assert_eq!(graph.count_custom_calls(targets::CONV_BIAS_ACTIVATION_FORWARD), 1);
        assert_eq!(graph.entry().node_count(), 4);
    }

    #[test]
    fn test_bias_add_is_fused() {
        let text = format!(
            "graph g entry {{\n{CONV}\
               %b = f32[1,6,6,4] parameter(2)\n\
               %add = f32[1,6,6,4] add(%b, %r)\n\
               ROOT %relu = f32[1,6,6,4] maximum(%zero, %add)\n}}"
        );
        let (graph, changed) = run_once(&ConvActivationFusion::new(), &text);
        assert!(changed);
        let entry = graph.entry();
        let fused = &entry[entry.root_node().unwrap().operands[0]];
        assert_eq!(fused.operands.len(), 3);
        match &fused.kind {
            OpKind::CustomCall { config, .. } => {
                assert_eq!(config.get("activation").map(String::as_str), Some("relu"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shared_result_is_not_fused() {
        let text = format!(
            "graph g entry {{\n{CONV}\
               %relu = f32[1,6,6,4] maximum(%r, %zero)\n\
               ROOT %t = (f32[1,6,6,4], f32[1,6,6,4]) tuple(%relu, %r)\n}}"
        );
        let (_, changed) = run_once(&ConvActivationFusion::new(), &text);
        assert!(!changed);
    }

    #[test]
    fn test_requires_fused_convolution_support() {
        let pass = ConvActivationFusion::new();
        assert!(!pass.applies_to(&TargetCapability::new(6, 0)));
        assert!(pass.applies_to(&TargetCapability::new(7, 5)));
    }
}
