//! Lowered modules: a fully lowered graph plus the target header.

use std::fmt;

use thiserror::Error;

use crate::graph::{parse_graph, print_graph, Graph, ParseError};

pub const SPIR_TARGET_TRIPLE: &str = "spir64-unknown-unknown";
pub const SPIR_DATA_LAYOUT: &str =
    "e-i64:64-v16:16-v24:32-v32:32-v48:64-v96:128-v192:256-v256:256-v512:512-v1024:1024-n8:16:32:64";

const TRIPLE_KEY: &str = "target triple";
const DATA_LAYOUT_KEY: &str = "target datalayout";

#[derive(Error, Debug)]
pub enum LoweredModuleError {
    #[error("missing '{0}' header")]
    MissingHeader(&'static str),

    #[error("malformed header line '{0}'")]
    MalformedHeader(String),

    #[error("graph body: {0}")]
    Graph(#[from] ParseError),
}

/// A module ready for the portable lowering.
#[derive(Debug, Clone)]
pub struct LoweredModule {
    pub target_triple: String,
    pub data_layout: String,
    pub graph: Graph,
}

impl LoweredModule {
    pub fn new(graph: Graph) -> Self {
        Self {
            target_triple: SPIR_TARGET_TRIPLE.to_string(),
            data_layout: SPIR_DATA_LAYOUT.to_string(),
            graph,
        }
    }

    /// Parse the textual form written by `Display`. Header lines come first;
    /// blank and `;` comment lines may precede them.
    pub fn parse(text: &str) -> Result<Self, LoweredModuleError> {
        let mut triple = None;
        let mut data_layout = None;
        let mut body_start = 0;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(';') {
                body_start += line.len();
                continue;
            }
            let Some(key) = [TRIPLE_KEY, DATA_LAYOUT_KEY].into_iter().find(|key| trimmed.starts_with(key)) else {
                break;
            };
            let value = header_value(&trimmed[key.len()..])
                .ok_or_else(|| LoweredModuleError::MalformedHeader(trimmed.to_string()))?;
            if key == TRIPLE_KEY {
                triple = Some(value);
            } else {
                data_layout = Some(value);
            }
            body_start += line.len();
        }

        let target_triple = triple.ok_or(LoweredModuleError::MissingHeader(TRIPLE_KEY))?;
        let data_layout = data_layout.ok_or(LoweredModuleError::MissingHeader(DATA_LAYOUT_KEY))?;
        let body = &text[body_start..];
        Ok(Self {
            target_triple,
            data_layout,
            graph: parse_graph(body)?,
        })
    }
}

/// `= "value"` after a header key.
fn header_value(rest: &str) -> Option<String> {
    let quoted = rest.trim().strip_prefix('=')?.trim();
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
    Some(inner.to_string())
}

impl fmt::Display for LoweredModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{TRIPLE_KEY} = \"{}\"", self.target_triple)?;
        writeln!(f, "{DATA_LAYOUT_KEY} = \"{}\"", self.data_layout)?;
        f.write_str(&print_graph(&self.graph))
    }
}
