//! Makes convolution custom calls use symmetric padding.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::node::{format_padding, parse_padding};
use crate::graph::{Computation, Graph, Literal, NodeId, OpKind, Padding, Shape};
use crate::pass::Pass;

use super::{add_tuple_element, laid_out_like, targets};

/// The runtime only accepts symmetric convolution padding. The asymmetric excess is
/// moved into an explicit `pad` of the input (inputs are `[batch, spatial.., feature]`).
///
/// The replaced call is rebuilt as `tuple(gte(new, 0), gte(new, 1))`; the tuple
/// simplifier removes that scaffolding later.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConvPaddingLegalization;

impl ConvPaddingLegalization {
    pub fn new() -> Self {
        Self
    }
}

/// Symmetric part and input padding for one convolution, if it needs legalizing.
fn split_padding(padding: &[Padding], input_rank: usize) -> Option<(Vec<Padding>, Vec<Padding>)> {
    if padding.len() + 2 != input_rank || padding.iter().all(Padding::is_symmetric) {
        return None;
    }
    if padding.iter().any(|p| p.low < 0 || p.high < 0) {
        return None;
    }
    let symmetric: Vec<Padding> = padding
        .iter()
        .map(|p| {
            let common = p.low.min(p.high);
            Padding::new(common, common)
        })
        .collect();
    let mut explicit = vec![Padding::default()];
    explicit.extend(padding.iter().zip(&symmetric).map(|(p, s)| Padding::new(p.low - s.low, p.high - s.high)));
    explicit.push(Padding::default());
    Some((symmetric, explicit))
}

fn legalize(computation: &mut Computation, id: NodeId) -> bool {
    let node = computation[id].clone();
    let OpKind::CustomCall { target, mut config } = node.kind else {
        return false;
    };
    if !targets::is_convolution(&target) {
        return false;
    }
    let Some(padding) = config.get("padding").and_then(|text| parse_padding(text)) else {
        return false;
    };
    let input_id = node.operands[0];
    let input = computation[input_id].shape.clone();
    let Some((symmetric, explicit)) = split_padding(&padding, input.rank()) else {
        return false;
    };
    let Some(element_type) = input.element_type() else {
        return false;
    };

    let zero = computation.add(
        "pad_value",
        OpKind::Constant {
            literal: Literal::scalar(0.0),
        },
        vec![],
        laid_out_like(Shape::scalar(element_type), &input),
    );
    let padded_dims: Vec<i64> = input
        .dims()
        .iter()
        .zip(&explicit)
        .map(|(d, p)| d + p.low + p.high)
        .collect();
    let padded = computation.add(
        format!("{}.padded", computation[input_id].name),
        OpKind::Pad { padding: explicit },
        vec![input_id, zero],
        laid_out_like(input.with_dims(padded_dims), &input),
    );

    if symmetric.iter().all(Padding::is_zero) {
        config.remove("padding");
    } else {
        config.insert("padding".to_string(), format_padding(&symmetric));
    }
    let mut operands = node.operands.clone();
    operands[0] = padded;
    let call = computation.add(
        format!("{}.legalized", node.name),
        OpKind::CustomCall { target, config },
        operands,
        node.shape.clone(),
    );

    let elements: Vec<NodeId> = (0..node.shape.tuple_elements().len())
        .map(|index| add_tuple_element(computation, call, index, &format!("{}.element", node.name)))
        .collect();
    let tuple = computation.add(format!("{}.tuple", node.name), OpKind::Tuple, elements, node.shape);
    computation.replace_node(id, tuple);
    log::trace!("conv-padding-legalization: padded input of '{}'", node.name);
    true
}

impl Pass for ConvPaddingLegalization {
    fn name(&self) -> &str {
        "conv-padding-legalization"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                changed |= legalize(computation, id);
            }
        }
        Ok(changed)
    }
}
