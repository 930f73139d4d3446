// This module groups the computation-graph IR that every pass in the crate rewrites. It
// provides element types and shapes (shape), nodes and the closed set of operation kinds
// (node), the slot-arena computations and graphs with their rewrite helpers (computation),
// the line-oriented text format with a parser and printer used by tests, dumps and lowered
// module overrides (parser, printer), and the structural verifier run at pipeline
// boundaries (verifier).

//! Computation graph IR.

pub mod computation;
pub mod node;
pub mod parser;
pub mod printer;
pub mod shape;
pub mod verifier;

use std::fmt;

pub use computation::{Computation, Graph, GraphError};
pub use node::{DotDims, Literal, Node, NodeId, OpKind, Padding, ReduceKind};
pub use parser::{parse_graph, ParseError};
pub use printer::{format_node, print_graph};
pub use shape::{PrimitiveType, Shape};
pub use verifier::{Verifier, VerifyError};

impl Graph {
    pub fn parse(text: &str) -> Result<Graph, ParseError> {
        parse_graph(text)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_graph(self))
    }
}
