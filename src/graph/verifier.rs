// This module implements the structural well-formedness check run at pipeline boundaries.
// Verifier walks every computation of a graph and checks that the root exists, operands
// refer to live nodes, the operand graph is acyclic, parameter numbers are dense, every
// call targets an existing computation with matching arity, and result shapes agree with
// operand shapes for each operation kind. Two knobs mirror the two places the check is
// used: layout_sensitive requires every array to carry a layout (post layout assignment),
// and allow_mixed_precision relaxes the element-type agreement of elementwise binary ops.

//! Structural graph verifier.

use hashbrown::HashMap;
use thiserror::Error;

use super::computation::{Computation, Graph};
use super::node::{Node, NodeId, OpKind};
use super::shape::Shape;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("computation '{computation}' has no live root")]
    MissingRoot { computation: String },

    #[error("node '{node}' in '{computation}' references missing operand {operand}")]
    DanglingOperand {
        computation: String,
        node: String,
        operand: NodeId,
    },

    #[error("cycle through node '{node}' in '{computation}'")]
    Cycle { computation: String, node: String },

    #[error("node '{node}' in '{computation}': {reason}")]
    Malformed {
        computation: String,
        node: String,
        reason: String,
    },

    #[error("call '{node}' targets unknown computation '{target}'")]
    UnknownCallTarget { node: String, target: String },

    #[error("computation '{computation}': {reason}")]
    Parameters { computation: String, reason: String },

    #[error("node '{node}' in '{computation}' has no layout")]
    MissingLayout { computation: String, node: String },
}

/// Structural verifier configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verifier {
    pub layout_sensitive: bool,
    pub allow_mixed_precision: bool,
}

impl Verifier {
    pub const fn new(layout_sensitive: bool, allow_mixed_precision: bool) -> Self {
        Self {
            layout_sensitive,
            allow_mixed_precision,
        }
    }

    pub fn verify(&self, graph: &Graph) -> Result<(), VerifyError> {
        for computation in graph.computations() {
            self.verify_computation(graph, computation)?;
        }
        Ok(())
    }

    fn verify_computation(&self, graph: &Graph, computation: &Computation) -> Result<(), VerifyError> {
        let name = computation.name().to_string();
        if computation.root_node().is_none() {
            return Err(VerifyError::MissingRoot { computation: name });
        }

        for (_, node) in computation.nodes() {
            for operand in &node.operands {
                if !computation.contains(*operand) {
                    return Err(VerifyError::DanglingOperand {
                        computation: name,
                        node: node.name.clone(),
                        operand: *operand,
                    });
                }
            }
        }

        check_acyclic(computation)?;
        check_parameters(computation)?;

        for (_, node) in computation.nodes() {
            if let Some(arity) = node.kind.arity() {
                if node.operands.len() != arity {
                    return Err(malformed(
                        computation,
                        node,
                        format!("expected {arity} operands, found {}", node.operands.len()),
                    ));
                }
            }
            if self.layout_sensitive && !node.shape.has_layout() {
                return Err(VerifyError::MissingLayout {
                    computation: name,
                    node: node.name.clone(),
                });
            }
            if let OpKind::Call { target } = &node.kind {
                let Some(callee) = graph.subcomputation(target) else {
                    return Err(VerifyError::UnknownCallTarget {
                        node: node.name.clone(),
                        target: target.clone(),
                    });
                };
                if callee.parameters().len() != node.operands.len() {
                    return Err(malformed(computation, node, "call arity does not match callee"));
                }
                if let Some(root) = callee.root_node() {
                    if !root.shape.compatible(&node.shape) {
                        return Err(malformed(computation, node, "call shape does not match callee root"));
                    }
                }
            }
            self.check_shape(computation, node)
                .map_err(|reason| malformed(computation, node, reason))?;
        }
        Ok(())
    }

    fn check_shape(&self, computation: &Computation, node: &Node) -> Result<(), String> {
        let operand = |i: usize| &computation[node.operands[i]].shape;
        let shape = &node.shape;

        match &node.kind {
            OpKind::Parameter { .. } | OpKind::CustomCall { .. } | OpKind::Call { .. } => Ok(()),
            OpKind::Constant { literal } => {
                expect_array(shape)?;
                if literal.len() as i64 != shape.element_count() {
                    return Err(format!(
                        "constant holds {} values for shape {shape}",
                        literal.len()
                    ));
                }
                Ok(())
            }
            OpKind::Negate | OpKind::Copy | OpKind::Softmax { .. } => {
                expect_array(shape)?;
                if !operand(0).compatible(shape) {
                    return Err(format!("operand {} does not match result {shape}", operand(0)));
                }
                if let OpKind::Softmax { dimension } = node.kind {
                    check_dimension(dimension, shape.rank())?;
                }
                Ok(())
            }
            OpKind::Convert => {
                expect_array(shape)?;
                if operand(0).dims() != shape.dims() || operand(0).is_tuple() {
                    return Err(format!("convert changes dimensions {} -> {shape}", operand(0)));
                }
                Ok(())
            }
            kind if kind.is_elementwise_binary() => {
                expect_array(shape)?;
                for i in 0..2 {
                    let op = operand(i);
                    if op.dims() != shape.dims() || op.is_tuple() {
                        return Err(format!("operand {i} {op} does not match result {shape}"));
                    }
                    if !self.allow_mixed_precision && op.element_type() != shape.element_type() {
                        return Err(format!("mixed precision operand {i} {op} for result {shape}"));
                    }
                }
                Ok(())
            }
            OpKind::Reshape => {
                expect_array(shape)?;
                if operand(0).element_count() != shape.element_count() || operand(0).is_tuple() {
                    return Err(format!("reshape {} -> {shape} changes element count", operand(0)));
                }
                Ok(())
            }
            OpKind::Transpose { permutation } => {
                expect_array(shape)?;
                let input = operand(0);
                if !is_permutation(permutation, input.rank()) {
                    return Err(format!("invalid permutation {permutation:?}"));
                }
                let expected: Vec<i64> = permutation.iter().map(|p| input.dims()[*p as usize]).collect();
                if expected != shape.dims() {
                    return Err(format!("transpose of {input} cannot produce {shape}"));
                }
                Ok(())
            }
            OpKind::Pad { padding } => {
                expect_array(shape)?;
                let input = operand(0);
                if padding.len() != input.rank() || operand(1).rank() != 0 {
                    return Err("padding rank mismatch".to_string());
                }
                let expected: Vec<i64> = input
                    .dims()
                    .iter()
                    .zip(padding)
                    .map(|(d, p)| d + p.low + p.high)
                    .collect();
                if expected != shape.dims() {
                    return Err(format!("pad of {input} cannot produce {shape}"));
                }
                Ok(())
            }
            OpKind::Concatenate { dimension } => {
                expect_array(shape)?;
                if node.operands.is_empty() {
                    return Err("concatenate needs operands".to_string());
                }
                check_dimension(*dimension, shape.rank())?;
                let total: i64 = (0..node.operands.len())
                    .map(|i| operand(i).dims().get(*dimension as usize).copied().unwrap_or(0))
                    .sum();
                if shape.dims()[*dimension as usize] != total {
                    return Err("concatenated dimension size mismatch".to_string());
                }
                Ok(())
            }
            OpKind::Reduce { dimensions, .. } => {
                expect_array(shape)?;
                let input = operand(0);
                for d in dimensions {
                    check_dimension(*d, input.rank())?;
                }
                let expected: Vec<i64> = input
                    .dims()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !dimensions.contains(&(*i as i64)))
                    .map(|(_, d)| *d)
                    .collect();
                if expected != shape.dims() {
                    return Err(format!("reduce of {input} cannot produce {shape}"));
                }
                Ok(())
            }
            OpKind::Convolution { padding } => {
                expect_array(shape)?;
                let (input, kernel) = (operand(0), operand(1));
                if input.rank() != kernel.rank() || input.rank() < 3 || shape.rank() != input.rank() {
                    return Err("convolution rank mismatch".to_string());
                }
                if !padding.is_empty() && padding.len() != input.rank() - 2 {
                    return Err("convolution padding must cover the spatial dimensions".to_string());
                }
                Ok(())
            }
            OpKind::Dot { dims } => {
                expect_array(shape)?;
                let (lhs, rhs) = (operand(0), operand(1));
                if dims.lhs_batch.len() != dims.rhs_batch.len()
                    || dims.lhs_contracting.len() != dims.rhs_contracting.len()
                {
                    return Err("dot dimension numbers disagree".to_string());
                }
                for (l, r) in dims
                    .lhs_batch
                    .iter()
                    .zip(&dims.rhs_batch)
                    .chain(dims.lhs_contracting.iter().zip(&dims.rhs_contracting))
                {
                    check_dimension(*l, lhs.rank())?;
                    check_dimension(*r, rhs.rank())?;
                    if lhs.dims()[*l as usize] != rhs.dims()[*r as usize] {
                        return Err(format!("dot dimension {l} of {lhs} does not match {r} of {rhs}"));
                    }
                }
                Ok(())
            }
            OpKind::Tuple => {
                let elements = shape.tuple_elements();
                if !shape.is_tuple() || elements.len() != node.operands.len() {
                    return Err(format!("tuple shape {shape} does not match operand count"));
                }
                for (i, element) in elements.iter().enumerate() {
                    if !element.compatible(operand(i)) {
                        return Err(format!("tuple element {i} {element} does not match operand"));
                    }
                }
                Ok(())
            }
            OpKind::GetTupleElement { index } => {
                let tuple = operand(0);
                let Some(element) = tuple.tuple_elements().get(*index) else {
                    return Err(format!("index {index} out of range for {tuple}"));
                };
                if !element.compatible(shape) {
                    return Err(format!("element {index} of {tuple} is not {shape}"));
                }
                Ok(())
            }
            OpKind::Cholesky { .. } => {
                expect_array(shape)?;
                let dims = operand(0).dims();
                if dims.len() < 2 || dims[dims.len() - 1] != dims[dims.len() - 2] {
                    return Err("cholesky operand must be square".to_string());
                }
                Ok(())
            }
            OpKind::TriangularSolve { .. } => {
                expect_array(shape)?;
                if !operand(1).compatible(shape) {
                    return Err("triangular-solve result must match its right-hand side".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn malformed(computation: &Computation, node: &Node, reason: impl Into<String>) -> VerifyError {
    VerifyError::Malformed {
        computation: computation.name().to_string(),
        node: node.name.clone(),
        reason: reason.into(),
    }
}

fn expect_array(shape: &Shape) -> Result<(), String> {
    if shape.is_tuple() {
        return Err(format!("expected an array result, found {shape}"));
    }
    Ok(())
}

fn check_dimension(dimension: i64, rank: usize) -> Result<(), String> {
    if dimension < 0 || dimension as usize >= rank {
        return Err(format!("dimension {dimension} out of range for rank {rank}"));
    }
    Ok(())
}

fn is_permutation(permutation: &[i64], rank: usize) -> bool {
    let mut seen = vec![false; rank];
    permutation.len() == rank
        && permutation.iter().all(|p| {
            let Ok(index) = usize::try_from(*p) else {
                return false;
            };
            index < rank && !std::mem::replace(&mut seen[index], true)
        })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn check_acyclic(computation: &Computation) -> Result<(), VerifyError> {
    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    for start in computation.node_ids() {
        if marks.contains_key(&start) {
            continue;
        }
        let mut stack = vec![(start, 0usize)];
        marks.insert(start, Mark::Visiting);
        while let Some((id, next)) = stack.pop() {
            let operands = &computation[id].operands;
            if next < operands.len() {
                stack.push((id, next + 1));
                let operand = operands[next];
                match marks.get(&operand) {
                    Some(Mark::Visiting) => {
                        return Err(VerifyError::Cycle {
                            computation: computation.name().to_string(),
                            node: computation[operand].name.clone(),
                        });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(operand, Mark::Visiting);
                        stack.push((operand, 0));
                    }
                }
            } else {
                marks.insert(id, Mark::Done);
            }
        }
    }
    Ok(())
}

fn check_parameters(computation: &Computation) -> Result<(), VerifyError> {
    let mut numbers: Vec<u32> = computation
        .nodes()
        .filter_map(|(_, node)| match node.kind {
            OpKind::Parameter { number } => Some(number),
            _ => None,
        })
        .collect();
    numbers.sort_unstable();
    for (expected, number) in numbers.iter().enumerate() {
        if *number as usize != expected {
            return Err(VerifyError::Parameters {
                computation: computation.name().to_string(),
                reason: format!("parameter numbers must be dense, found {numbers:?}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{parse_graph, PrimitiveType};

    fn verify(text: &str) -> Result<(), VerifyError> {
        Verifier::default().verify(&parse_graph(text).unwrap())
    }

    #[test]
    fn test_well_formed_graph_passes() {
        verify(
            "graph g entry {\n\
               %p = f32[2,3] parameter(0)\n\
               %t = f32[3,2] transpose(%p), dimensions={1,0}\n\
               %r = f32[6] reshape(%t)\n\
               ROOT %n = f32[6] negate(%r)\n\
             }",
        )
        .unwrap();
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = verify(
            "graph g entry {\n\
               %p = f32[2] parameter(0)\n\
               %a = f32[2] add(%p, %b)\n\
               %b = f32[2] negate(%a)\n\
               ROOT %r = f32[2] copy(%b)\n\
             }",
        )
        .unwrap_err();
        assert!(matches!(err, VerifyError::Cycle { .. }));
    }

    #[test]
    fn test_mixed_precision_is_configurable() {
        let text = "graph g entry {\n\
               %a = bf16[2] parameter(0)\n\
               %b = f32[2] parameter(1)\n\
               ROOT %r = f32[2] add(%a, %b)\n\
             }";
        assert!(matches!(verify(text), Err(VerifyError::Malformed { .. })));
        Verifier::new(false, true)
            .verify(&parse_graph(text).unwrap())
            .unwrap();
    }

    #[test]
    fn test_dangling_operand_is_rejected() {
        let mut graph = parse_graph(
            "graph g entry { %p = f32[2] parameter(0)\n ROOT %n = f32[2] negate(%p) }",
        )
        .unwrap();
        let p = graph.entry().find("p").unwrap();
        graph.entry_mut().remove(p);
        let err = Verifier::default().verify(&graph).unwrap_err();
        assert!(matches!(err, VerifyError::DanglingOperand { .. }));
    }

    #[test]
    fn test_layout_sensitive_requires_layouts() {
        let mut graph = Graph::new("g");
        let shape = Shape::array(PrimitiveType::F32, vec![2]);
        let p = graph
            .entry_mut()
            .add("p", OpKind::Parameter { number: 0 }, vec![], shape);
        graph.entry_mut().set_root(p);
        assert!(matches!(
            Verifier::new(true, false).verify(&graph),
            Err(VerifyError::MissingLayout { .. })
        ));
    }

    #[test]
    fn test_unknown_call_target() {
        let err = verify(
            "graph g entry { %p = f32[2] parameter(0)\n ROOT %c = f32[2] call(%p), to_apply=nowhere }",
        )
        .unwrap_err();
        assert!(matches!(err, VerifyError::UnknownCallTarget { .. }));
    }
}
