//! Legalizes `convolution` into the runtime's convolution custom call.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::node::format_padding;
use crate::graph::{Computation, Graph, OpKind, Shape};
use crate::pass::Pass;

use super::{add_tuple_element, laid_out_like, targets};

/// `convolution(x, w)` becomes `get-tuple-element(custom-call(x, w), 0)` where the
/// custom call returns `(result, u8[0])`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConvLegalizer;

impl ConvLegalizer {
    pub fn new() -> Self {
        Self
    }
}

fn legalize(computation: &mut Computation) -> bool {
    let mut changed = false;
    for id in computation.post_order() {
        let node = &computation[id];
        let OpKind::Convolution { padding } = &node.kind else {
            continue;
        };

        let mut kind = OpKind::custom_call(targets::CONV_FORWARD);
        if let OpKind::CustomCall { config, .. } = &mut kind {
            if !padding.is_empty() {
                config.insert("padding".to_string(), format_padding(padding));
            }
        }
        let shape = Shape::tuple(vec![
            node.shape.clone(),
            laid_out_like(Shape::workspace(0), &node.shape),
        ]);
        let name = node.name.clone();
        let operands = node.operands.clone();

        let call = computation.add(format!("{name}.forward"), kind, operands, shape);
        let result = add_tuple_element(computation, call, 0, &format!("{name}.result"));
        computation.replace_node(id, result);
        log::trace!("conv-legalizer: '{}' legalized", name);
        changed = true;
    }
    changed
}

impl Pass for ConvLegalizer {
    fn name(&self) -> &str {
        "conv-legalizer"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            changed |= legalize(computation);
        }
        Ok(changed)
    }
}
