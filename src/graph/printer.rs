//! Graph text format printer; the output parses back with [`super::parse_graph`].

use std::fmt::Write;

use super::computation::{Computation, Graph};
use super::node::{format_padding, Literal, Node, OpKind};
use super::shape::{join, Shape};

pub fn print_graph(graph: &Graph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "graph {}, id={}", graph.name(), graph.id());
    for sub in graph.subcomputations() {
        out.push('\n');
        print_computation(&mut out, "sub ", sub);
    }
    out.push('\n');
    print_computation(&mut out, "", graph.entry());
    out
}

fn print_computation(out: &mut String, keyword: &str, computation: &Computation) {
    let _ = writeln!(out, "{keyword}{} {{", computation.name());
    for id in computation.post_order() {
        let node = &computation[id];
        let root = if computation.root() == Some(id) { "ROOT " } else { "" };
        let _ = writeln!(out, "  {root}{}", format_node(computation, node));
    }
    out.push_str("}\n");
}

/// One node in text form, without indentation or `ROOT` marker.
pub fn format_node(computation: &Computation, node: &Node) -> String {
    let mut line = format!("%{} = {} {}(", node.name, node.shape, node.kind.name());
    match &node.kind {
        OpKind::Parameter { number } => {
            let _ = write!(line, "{number}");
        }
        OpKind::Constant { literal } => line.push_str(&format_literal(literal, &node.shape)),
        _ => {
            let operands: Vec<String> = node
                .operands
                .iter()
                .map(|id| match computation.node(*id) {
                    Some(operand) => format!("%{}", operand.name),
                    None => format!("%<dangling{id}>"),
                })
                .collect();
            line.push_str(&operands.join(", "));
        }
    }
    line.push(')');
    line.push_str(&format_attributes(&node.kind));
    line
}

fn format_attributes(kind: &OpKind) -> String {
    let mut attrs = String::new();
    match kind {
        OpKind::Transpose { permutation } => {
            let _ = write!(attrs, ", dimensions={{{}}}", join(permutation));
        }
        OpKind::Pad { padding } => {
            let _ = write!(attrs, ", padding={}", format_padding(padding));
        }
        OpKind::Concatenate { dimension } => {
            let _ = write!(attrs, ", dimension={dimension}");
        }
        OpKind::Reduce { dimensions, kind } => {
            let _ = write!(attrs, ", dimensions={{{}}}, kind={}", join(dimensions), kind.name());
        }
        OpKind::Convolution { padding } if !padding.is_empty() => {
            let _ = write!(attrs, ", padding={}", format_padding(padding));
        }
        OpKind::Dot { dims } => {
            for (key, values) in [
                ("lhs_batch_dims", &dims.lhs_batch),
                ("lhs_contracting_dims", &dims.lhs_contracting),
                ("rhs_batch_dims", &dims.rhs_batch),
                ("rhs_contracting_dims", &dims.rhs_contracting),
            ] {
                if !values.is_empty() {
                    let _ = write!(attrs, ", {key}={{{}}}", join(values));
                }
            }
        }
        OpKind::Softmax { dimension } => {
            let _ = write!(attrs, ", dimension={dimension}");
        }
        OpKind::GetTupleElement { index } => {
            let _ = write!(attrs, ", index={index}");
        }
        OpKind::Call { target } => {
            let _ = write!(attrs, ", to_apply={target}");
        }
        OpKind::CustomCall { target, config } => {
            let _ = write!(attrs, ", target=\"{target}\"");
            for (key, value) in config {
                let _ = write!(attrs, ", {key}=\"{value}\"");
            }
        }
        OpKind::Cholesky { lower } => {
            let _ = write!(attrs, ", lower={lower}");
        }
        OpKind::TriangularSolve { left_side, lower } => {
            let _ = write!(attrs, ", left_side={left_side}, lower={lower}");
        }
        _ => {}
    }
    attrs
}

fn format_literal(literal: &Literal, shape: &Shape) -> String {
    if shape.rank() == 0 || (literal.len() > 1 && literal.splat_value().is_some()) {
        if let Some(value) = literal.splat_value() {
            return format_number(value);
        }
    }
    let values: Vec<String> = literal.iter().map(format_number).collect();
    format!("{{{}}}", values.join(", "))
}

fn format_number(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        // Display prints `inf`/`-inf` and never uses exponents.
        value.to_string()
    }
}
