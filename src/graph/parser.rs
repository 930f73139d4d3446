//! Graph text format parser.
//!
//! The format is line oriented but whitespace insensitive:
//!
//! ```text
//! ; Comments start with semicolon
//! graph conv_net, id=3
//!
//! sub body.1 {
//!   %p0 = f32[4] parameter(0)
//!   ROOT %n = f32[4] negate(%p0)
//! }
//!
//! entry {
//!   %x = bf16[1,8,8,3]{3,2,1,0} parameter(0)
//!   %zero = f32[] constant(0)
//!   ROOT %c = f32[4] call(%x), to_apply=body.1
//! }
//! ```
//!
//! Operands may refer to nodes defined later in the same body. When no node
//! is marked `ROOT` the last node of the body is the root.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use thiserror::Error;

use super::computation::{Computation, Graph};
use super::node::{parse_padding, DotDims, Literal, Node, NodeId, OpKind, ReduceKind};
use super::shape::{PrimitiveType, Shape};

/// A parse failure with its source position (1-based).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

pub fn parse_graph(text: &str) -> Result<Graph, ParseError> {
    let parser = Parser::new(text);
    parser.parse()
}

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    Word(String),
    Str(String),
    List(Vec<i64>),
}

impl AttrValue {
    fn into_config_string(self) -> String {
        match self {
            AttrValue::Word(word) | AttrValue::Str(word) => word,
            AttrValue::List(values) => format!("{{{}}}", super::shape::join(&values)),
        }
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

/// A node whose operand names are resolved once its body is complete.
struct PendingNode<'a> {
    id: NodeId,
    pos: usize,
    operands: Vec<&'a str>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn parse(mut self) -> Result<Graph, ParseError> {
        if !self.try_keyword("graph") {
            return Err(self.error("expected 'graph' header"));
        }
        let name = self.read_word()?;
        let mut graph = Graph::new(name);
        if self.try_read(',') {
            if !self.try_keyword("id") {
                return Err(self.error("expected 'id' attribute"));
            }
            self.expect('=')?;
            let id = self.read_int()?;
            graph.set_id(u64::try_from(id).map_err(|_| self.error("graph id must be positive"))?);
        }

        let mut saw_entry = false;
        self.skip_whitespace();
        while !self.is_eof() {
            let start = self.pos;
            if self.try_keyword("sub") {
                let name = self.read_word()?;
                let body = self.parse_body(name)?;
                graph.add_subcomputation(body).map_err(|e| self.error_at(start, e.to_string()))?;
            } else if self.try_keyword("entry") {
                if saw_entry {
                    return Err(self.error_at(start, "entry computation defined twice"));
                }
                *graph.entry_mut() = self.parse_body("entry")?;
                saw_entry = true;
            } else {
                return Err(self.error("expected 'sub' or 'entry'"));
            }
            self.skip_whitespace();
        }

        if !saw_entry {
            return Err(self.error("missing entry computation"));
        }
        Ok(graph)
    }

    fn parse_body(&mut self, name: &str) -> Result<Computation, ParseError> {
        self.expect('{')?;
        let mut computation = Computation::new(name);
        let mut ids: HashMap<&'a str, NodeId> = HashMap::new();
        let mut pending = Vec::new();
        let mut last = None;

        while !self.try_read('}') {
            if self.is_eof() {
                return Err(self.error(format!("unterminated computation '{name}'")));
            }
            let start = self.pos;
            let is_root = self.try_keyword("ROOT");
            self.expect('%')?;
            let node_name = self.read_word()?;
            if ids.contains_key(node_name) {
                return Err(self.error_at(start, format!("duplicate node name '%{node_name}'")));
            }
            self.expect('=')?;
            let shape = self.read_shape()?;
            let (kind, operands) = self.parse_operation(&shape)?;

            let id = computation.add_node(Node::new(node_name, kind, Vec::new(), shape));
            ids.insert(node_name, id);
            pending.push(PendingNode {
                id,
                pos: start,
                operands,
            });
            if is_root {
                if computation.root().is_some() {
                    return Err(self.error_at(start, "more than one ROOT"));
                }
                computation.set_root(id);
            }
            last = Some(id);
        }

        for node in pending {
            let mut resolved = Vec::with_capacity(node.operands.len());
            for operand in node.operands {
                let id = ids
                    .get(operand)
                    .copied()
                    .ok_or_else(|| self.error_at(node.pos, format!("unknown operand '%{operand}'")))?;
                resolved.push(id);
            }
            if let Some(target) = computation.node_mut(node.id) {
                target.operands = resolved;
            }
        }

        match (computation.root(), last) {
            (Some(_), _) => {}
            (None, Some(last)) => computation.set_root(last),
            (None, None) => return Err(self.error(format!("computation '{name}' is empty"))),
        }
        Ok(computation)
    }

    fn parse_operation(&mut self, shape: &Shape) -> Result<(OpKind, Vec<&'a str>), ParseError> {
        let start = self.pos;
        let opcode = self.read_word()?;
        self.expect('(')?;

        let mut operands = Vec::new();
        let mut parameter = None;
        let mut literal = None;
        match opcode {
            "parameter" => {
                let number = self.read_int()?;
                parameter = Some(u32::try_from(number).map_err(|_| self.error("bad parameter number"))?);
                self.expect(')')?;
            }
            "constant" => {
                literal = Some(self.read_literal(shape)?);
                self.expect(')')?;
            }
            _ => {
                if !self.try_read(')') {
                    loop {
                        self.expect('%')?;
                        operands.push(self.read_word()?);
                        if self.try_read(')') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
            }
        }

        let mut attrs = Attrs::default();
        while self.try_read(',') {
            let key = self.read_word()?;
            self.expect('=')?;
            let value = self.read_attr_value()?;
            attrs.0.push((key.to_string(), value));
        }

        let kind = build_kind(opcode, parameter, literal, &mut attrs)
            .map_err(|message| self.error_at(start, message))?;
        if let Some((key, _)) = attrs.0.first() {
            return Err(self.error_at(start, format!("unexpected attribute '{key}' on {opcode}")));
        }
        Ok((kind, operands))
    }

    fn read_literal(&mut self, shape: &Shape) -> Result<Literal, ParseError> {
        let count = usize::try_from(shape.element_count()).unwrap_or(0);
        if self.try_read('{') {
            let mut values = Vec::new();
            if !self.try_read('}') {
                loop {
                    values.push(self.read_number()?);
                    if self.try_read('}') {
                        break;
                    }
                    self.expect(',')?;
                }
            }
            if values.len() != count {
                return Err(self.error(format!(
                    "constant has {} values but shape {shape} holds {count}",
                    values.len()
                )));
            }
            Ok(Literal::new(values))
        } else {
            let value = self.read_number()?;
            Ok(Literal::splat(value, count))
        }
    }

    fn read_shape(&mut self) -> Result<Shape, ParseError> {
        if self.try_read('(') {
            let mut elements = Vec::new();
            if !self.try_read(')') {
                loop {
                    elements.push(self.read_shape()?);
                    if self.try_read(')') {
                        break;
                    }
                    self.expect(',')?;
                }
            }
            return Ok(Shape::Tuple(elements));
        }

        let type_name = self.read_word()?;
        let element_type = PrimitiveType::from_name(type_name)
            .ok_or_else(|| self.error(format!("unknown element type '{type_name}'")))?;
        self.expect('[')?;
        let dims_start = self.pos;
        let mut dims = Vec::new();
        if !self.try_read(']') {
            loop {
                dims.push(self.read_int()?);
                if self.try_read(']') {
                    break;
                }
                self.expect(',')?;
            }
        }
        if dims.iter().any(|dim| *dim < 0) {
            return Err(self.error_at(dims_start, "negative dimension in shape"));
        }
        let shape = Shape::array(element_type, dims);
        if shape.checked_element_count().is_none() {
            return Err(self.error_at(dims_start, format!("shape {shape} has too many elements")));
        }
        // A layout brace must follow the dims directly.
        if self.current_char() == Some('{') {
            let layout = self.read_int_list()?;
            return Ok(shape.with_layout(layout));
        }
        Ok(shape)
    }

    fn read_attr_value(&mut self) -> Result<AttrValue, ParseError> {
        self.skip_whitespace();
        match self.current_char() {
            Some('{') => Ok(AttrValue::List(self.read_int_list()?)),
            Some('"') => Ok(AttrValue::Str(self.read_string()?)),
            _ => Ok(AttrValue::Word(self.read_word()?.to_string())),
        }
    }

    fn read_int_list(&mut self) -> Result<Vec<i64>, ParseError> {
        self.expect('{')?;
        let mut values = Vec::new();
        if !self.try_read('}') {
            loop {
                values.push(self.read_int()?);
                if self.try_read('}') {
                    break;
                }
                self.expect(',')?;
            }
        }
        Ok(values)
    }

    fn read_string(&mut self) -> Result<String, ParseError> {
        self.expect('"')?;
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch == '"' {
                let value = self.text[start..self.pos].to_string();
                self.advance();
                return Ok(value);
            }
            if ch == '\n' {
                break;
            }
            self.advance();
        }
        Err(self.error_at(start, "unterminated string"))
    }

    fn read_int(&mut self) -> Result<i64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        if self.current_char() == Some('-') {
            self.advance();
        }
        while self.current_char().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }
        self.text[start..self.pos]
            .parse()
            .map_err(|_| self.error_at(start, "expected integer"))
    }

    fn read_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self
            .current_char()
            .is_some_and(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '+'))
        {
            self.advance();
        }
        let token = &self.text[start..self.pos];
        match token.to_ascii_lowercase().as_str() {
            "nan" | "-nan" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            _ => token
                .parse()
                .map_err(|_| self.error_at(start, format!("expected number but found '{token}'"))),
        }
    }

    fn read_word(&mut self) -> Result<&'a str, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.current_char().is_some_and(is_word_char) {
            self.advance();
        }
        if start == self.pos {
            return Err(match self.current_char() {
                Some(ch) => self.error(format!("expected identifier but found '{ch}'")),
                None => self.error("expected identifier but found end of input"),
            });
        }
        Ok(&self.text[start..self.pos])
    }

    fn try_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let rest = &self.text[self.pos..];
        if !rest.starts_with(keyword) {
            return false;
        }
        let after = rest[keyword.len()..].chars().next();
        if after.is_some_and(is_word_char) {
            return false;
        }
        self.pos += keyword.len();
        true
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                while let Some(ch) = self.current_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), ParseError> {
        if !self.try_read(ch) {
            let found = self
                .current_char()
                .map_or_else(|| "end of input".to_string(), |c| format!("'{c}'"));
            return Err(self.error(format!("expected '{ch}' but found {found}")));
        }
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> ParseError {
        let before = &self.text[..pos.min(self.text.len())];
        let line = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-' | '$')
}

#[derive(Default)]
struct Attrs(Vec<(String, AttrValue)>);

impl Attrs {
    fn take(&mut self, key: &str) -> Option<AttrValue> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    fn take_word(&mut self, key: &str) -> Result<Option<String>, String> {
        match self.take(key) {
            None => Ok(None),
            Some(AttrValue::Word(word)) | Some(AttrValue::Str(word)) => Ok(Some(word)),
            Some(AttrValue::List(_)) => Err(format!("attribute '{key}' must not be a list")),
        }
    }

    fn take_int(&mut self, key: &str) -> Result<Option<i64>, String> {
        self.take_word(key)?
            .map(|word| {
                word.parse()
                    .map_err(|_| format!("attribute '{key}' must be an integer"))
            })
            .transpose()
    }

    fn require_int(&mut self, key: &str) -> Result<i64, String> {
        self.take_int(key)?
            .ok_or_else(|| format!("missing attribute '{key}'"))
    }

    fn take_bool(&mut self, key: &str, default: bool) -> Result<bool, String> {
        match self.take_word(key)?.as_deref() {
            None => Ok(default),
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(other) => Err(format!("attribute '{key}' must be true or false, got '{other}'")),
        }
    }

    fn take_list(&mut self, key: &str) -> Result<Vec<i64>, String> {
        match self.take(key) {
            None => Ok(Vec::new()),
            Some(AttrValue::List(values)) => Ok(values),
            Some(_) => Err(format!("attribute '{key}' must be a list")),
        }
    }
}

fn build_kind(
    opcode: &str,
    parameter: Option<u32>,
    literal: Option<Literal>,
    attrs: &mut Attrs,
) -> Result<OpKind, String> {
    let kind = match opcode {
        "parameter" => OpKind::Parameter {
            number: parameter.unwrap_or_default(),
        },
        "constant" => OpKind::Constant {
            literal: literal.unwrap_or_default(),
        },
        "negate" => OpKind::Negate,
        "convert" => OpKind::Convert,
        "copy" => OpKind::Copy,
        "add" => OpKind::Add,
        "subtract" => OpKind::Subtract,
        "multiply" => OpKind::Multiply,
        "divide" => OpKind::Divide,
        "maximum" => OpKind::Maximum,
        "minimum" => OpKind::Minimum,
        "reshape" => OpKind::Reshape,
        "tuple" => OpKind::Tuple,
        "transpose" => OpKind::Transpose {
            permutation: attrs.take_list("dimensions")?,
        },
        "pad" => {
            let text = attrs.take_word("padding")?.unwrap_or_default();
            OpKind::Pad {
                padding: parse_padding(&text).ok_or_else(|| format!("bad padding '{text}'"))?,
            }
        }
        "concatenate" => OpKind::Concatenate {
            dimension: attrs.require_int("dimension")?,
        },
        "reduce" => {
            let dimensions = attrs.take_list("dimensions")?;
            let kind_name = attrs.take_word("kind")?.unwrap_or_else(|| "sum".to_string());
            let kind = ReduceKind::from_name(&kind_name)
                .ok_or_else(|| format!("unknown reduce kind '{kind_name}'"))?;
            OpKind::Reduce { dimensions, kind }
        }
        "convolution" => {
            let text = attrs.take_word("padding")?.unwrap_or_default();
            OpKind::Convolution {
                padding: parse_padding(&text).ok_or_else(|| format!("bad padding '{text}'"))?,
            }
        }
        "dot" => OpKind::Dot {
            dims: DotDims {
                lhs_batch: attrs.take_list("lhs_batch_dims")?,
                lhs_contracting: attrs.take_list("lhs_contracting_dims")?,
                rhs_batch: attrs.take_list("rhs_batch_dims")?,
                rhs_contracting: attrs.take_list("rhs_contracting_dims")?,
            },
        },
        "softmax" => OpKind::Softmax {
            dimension: attrs.require_int("dimension")?,
        },
        "get-tuple-element" => {
            let index = attrs.require_int("index")?;
            OpKind::GetTupleElement {
                index: usize::try_from(index).map_err(|_| "index must be positive".to_string())?,
            }
        }
        "call" => OpKind::Call {
            target: attrs
                .take_word("to_apply")?
                .ok_or_else(|| "missing attribute 'to_apply'".to_string())?,
        },
        "custom-call" => {
            let target = attrs
                .take_word("target")?
                .ok_or_else(|| "missing attribute 'target'".to_string())?;
            let config: BTreeMap<String, String> = attrs
                .0
                .drain(..)
                .map(|(key, value)| (key, value.into_config_string()))
                .collect();
            OpKind::CustomCall { target, config }
        }
        "cholesky" => OpKind::Cholesky {
            lower: attrs.take_bool("lower", true)?,
        },
        "triangular-solve" => OpKind::TriangularSolve {
            left_side: attrs.take_bool("left_side", true)?,
            lower: attrs.take_bool("lower", true)?,
        },
        other => return Err(format!("unknown opcode '{other}'")),
    };
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_graph() {
        let graph = parse_graph(
            "graph g, id=2\n\
             entry {\n\
               %p = f32[2,2]{1,0} parameter(0)\n\
               %c = f32[2,2] constant(1)\n\
               ROOT %a = f32[2,2] add(%p, %c)\n\
             }\n",
        )
        .unwrap();

        assert_eq!(graph.name(), "g");
        assert_eq!(graph.id(), 2);
        let entry = graph.entry();
        assert_eq!(entry.node_count(), 3);
        let root = entry.root_node().unwrap();
        assert_eq!(root.kind, OpKind::Add);
        let c = entry.find("c").unwrap();
        assert_eq!(entry[c].kind.literal().unwrap().to_vec(), vec![1.0; 4]);
        let p = entry.find("p").unwrap();
        assert_eq!(entry[p].shape.layout(), Some(&[1, 0][..]));
    }

    #[test]
    fn test_forward_references_resolve() {
        let graph = parse_graph(
            "graph g entry { ROOT %n = f32[2] negate(%p) \n %p = f32[2] parameter(0) }",
        )
        .unwrap();
        let entry = graph.entry();
        let p = entry.find("p").unwrap();
        assert_eq!(entry.root_node().unwrap().operands, vec![p]);
    }

    #[test]
    fn test_custom_call_config() {
        let graph = parse_graph(
            "graph g entry {\n\
               %p = f32[2] parameter(0)\n\
               ROOT %cc = (f32[2], u8[0]) custom-call(%p), target=\"__spirc$convForward\", activation=relu\n\
             }",
        )
        .unwrap();
        match &graph.entry().root_node().unwrap().kind {
            OpKind::CustomCall { target, config } => {
                assert_eq!(target, "__spirc$convForward");
                assert_eq!(config.get("activation").map(String::as_str), Some("relu"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_errors_carry_position() {
        let err = parse_graph("graph g\nentry {\n  %a = f32[2] frobnicate(%b)\n}").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("frobnicate"));

        let err = parse_graph("graph g entry { ROOT %a = f32[2] negate(%missing) }").unwrap_err();
        assert!(err.message.contains("unknown operand"));

        assert!(parse_graph("graph g").is_err());
        assert!(parse_graph("entry { }").is_err());
    }

    #[test]
    fn test_nan_and_infinity_literals() {
        let graph = parse_graph("graph g entry { ROOT %c = f32[3] constant({nan, inf, -inf}) }").unwrap();
        let values = graph.entry().root_node().unwrap().kind.literal().unwrap().to_vec();
        assert!(values[0].is_nan());
        assert_eq!(values[1], f64::INFINITY);
        assert_eq!(values[2], f64::NEG_INFINITY);
    }
}
