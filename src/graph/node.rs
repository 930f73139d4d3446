//! Graph nodes and the closed set of operation kinds.

use std::collections::BTreeMap;
use std::fmt;

use super::shape::Shape;

/// Index of a node slot inside its computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Low/high padding of one spatial dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Padding {
    pub low: i64,
    pub high: i64,
}

impl Padding {
    pub const fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    pub const fn is_symmetric(&self) -> bool {
        self.low == self.high
    }

    pub const fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }
}

/// Render padding as `low_high` pairs joined by `x`, e.g. `0_1x1_1`.
pub fn format_padding(padding: &[Padding]) -> String {
    padding
        .iter()
        .map(|p| format!("{}_{}", p.low, p.high))
        .collect::<Vec<_>>()
        .join("x")
}

/// Inverse of [`format_padding`].
pub fn parse_padding(text: &str) -> Option<Vec<Padding>> {
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split('x')
        .map(|pair| {
            let (low, high) = pair.split_once('_')?;
            Some(Padding::new(low.parse().ok()?, high.parse().ok()?))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
}

impl ReduceKind {
    pub const fn name(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Max => "max",
            ReduceKind::Min => "min",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(ReduceKind::Sum),
            "max" => Some(ReduceKind::Max),
            "min" => Some(ReduceKind::Min),
            _ => None,
        }
    }
}

/// Dimension numbers of a dot product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DotDims {
    pub lhs_batch: Vec<i64>,
    pub lhs_contracting: Vec<i64>,
    pub rhs_batch: Vec<i64>,
    pub rhs_contracting: Vec<i64>,
}

/// Row-major values of a constant.
///
/// A constant whose elements all hold the same bits is kept as a single value
/// and a count, so large splats cost nothing to parse or copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    repr: LiteralRepr,
}

#[derive(Debug, Clone, PartialEq)]
enum LiteralRepr {
    Dense(Vec<f64>),
    Splat { value: f64, count: usize },
}

impl Default for Literal {
    fn default() -> Self {
        Self {
            repr: LiteralRepr::Dense(Vec::new()),
        }
    }
}

impl Literal {
    pub fn new(values: Vec<f64>) -> Self {
        match values.first() {
            Some(first) if values.iter().all(|v| v.to_bits() == first.to_bits()) => {
                Self::splat(*first, values.len())
            }
            _ => Self {
                repr: LiteralRepr::Dense(values),
            },
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self::splat(value, 1)
    }

    pub fn splat(value: f64, count: usize) -> Self {
        if count == 0 {
            return Self::default();
        }
        Self {
            repr: LiteralRepr::Splat { value, count },
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            LiteralRepr::Dense(values) => values.len(),
            LiteralRepr::Splat { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let (dense, splat) = match &self.repr {
            LiteralRepr::Dense(values) => (values.as_slice(), None),
            LiteralRepr::Splat { value, count } => (&[][..], Some(std::iter::repeat(*value).take(*count))),
        };
        dense.iter().copied().chain(splat.into_iter().flatten())
    }

    /// Every element, expanded.
    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }

    /// The single value every element holds, if any. NaN splats compare by bits.
    pub fn splat_value(&self) -> Option<f64> {
        match &self.repr {
            LiteralRepr::Splat { value, .. } => Some(*value),
            LiteralRepr::Dense(_) => None,
        }
    }

    pub fn is_splat_of(&self, value: f64) -> bool {
        self.splat_value() == Some(value)
    }
}

/// Operation performed by a node, with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Parameter { number: u32 },
    Constant { literal: Literal },
    Negate,
    Convert,
    Copy,
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
    Reshape,
    Transpose { permutation: Vec<i64> },
    /// Operands: value, padding value.
    Pad { padding: Vec<Padding> },
    Concatenate { dimension: i64 },
    Reduce { dimensions: Vec<i64>, kind: ReduceKind },
    /// Operands: input, kernel. Padding covers the spatial dimensions.
    Convolution { padding: Vec<Padding> },
    Dot { dims: DotDims },
    Softmax { dimension: i64 },
    Tuple,
    GetTupleElement { index: usize },
    Call { target: String },
    CustomCall {
        target: String,
        config: BTreeMap<String, String>,
    },
    Cholesky { lower: bool },
    /// Operands: a, b.
    TriangularSolve { left_side: bool, lower: bool },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Parameter { .. } => "parameter",
            OpKind::Constant { .. } => "constant",
            OpKind::Negate => "negate",
            OpKind::Convert => "convert",
            OpKind::Copy => "copy",
            OpKind::Add => "add",
            OpKind::Subtract => "subtract",
            OpKind::Multiply => "multiply",
            OpKind::Divide => "divide",
            OpKind::Maximum => "maximum",
            OpKind::Minimum => "minimum",
            OpKind::Reshape => "reshape",
            OpKind::Transpose { .. } => "transpose",
            OpKind::Pad { .. } => "pad",
            OpKind::Concatenate { .. } => "concatenate",
            OpKind::Reduce { .. } => "reduce",
            OpKind::Convolution { .. } => "convolution",
            OpKind::Dot { .. } => "dot",
            OpKind::Softmax { .. } => "softmax",
            OpKind::Tuple => "tuple",
            OpKind::GetTupleElement { .. } => "get-tuple-element",
            OpKind::Call { .. } => "call",
            OpKind::CustomCall { .. } => "custom-call",
            OpKind::Cholesky { .. } => "cholesky",
            OpKind::TriangularSolve { .. } => "triangular-solve",
        }
    }

    pub fn custom_call(target: impl Into<String>) -> Self {
        OpKind::CustomCall {
            target: target.into(),
            config: BTreeMap::new(),
        }
    }

    pub fn is_elementwise_unary(&self) -> bool {
        matches!(self, OpKind::Negate | OpKind::Convert | OpKind::Copy)
    }

    pub fn is_elementwise_binary(&self) -> bool {
        matches!(
            self,
            OpKind::Add
                | OpKind::Subtract
                | OpKind::Multiply
                | OpKind::Divide
                | OpKind::Maximum
                | OpKind::Minimum
        )
    }

    pub fn is_elementwise(&self) -> bool {
        self.is_elementwise_unary() || self.is_elementwise_binary()
    }

    /// Reshape and transpose: ops that only rearrange elements.
    pub fn is_rearrangement(&self) -> bool {
        matches!(self, OpKind::Reshape | OpKind::Transpose { .. })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, OpKind::Constant { .. })
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self, OpKind::Parameter { .. })
    }

    pub fn custom_call_target(&self) -> Option<&str> {
        match self {
            OpKind::CustomCall { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn literal(&self) -> Option<&Literal> {
        match self {
            OpKind::Constant { literal } => Some(literal),
            _ => None,
        }
    }

    /// Expected operand count; `None` for variadic ops.
    pub fn arity(&self) -> Option<usize> {
        match self {
            OpKind::Parameter { .. } | OpKind::Constant { .. } => Some(0),
            OpKind::Negate
            | OpKind::Convert
            | OpKind::Copy
            | OpKind::Reshape
            | OpKind::Transpose { .. }
            | OpKind::Reduce { .. }
            | OpKind::Softmax { .. }
            | OpKind::GetTupleElement { .. }
            | OpKind::Cholesky { .. } => Some(1),
            OpKind::Add
            | OpKind::Subtract
            | OpKind::Multiply
            | OpKind::Divide
            | OpKind::Maximum
            | OpKind::Minimum
            | OpKind::Pad { .. }
            | OpKind::Convolution { .. }
            | OpKind::Dot { .. }
            | OpKind::TriangularSolve { .. } => Some(2),
            OpKind::Concatenate { .. }
            | OpKind::Tuple
            | OpKind::Call { .. }
            | OpKind::CustomCall { .. } => None,
        }
    }
}

/// A single operation in a computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub kind: OpKind,
    pub operands: Vec<NodeId>,
    pub shape: Shape,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: OpKind, operands: Vec<NodeId>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            kind,
            operands,
            shape,
        }
    }

    pub fn operand(&self, index: usize) -> Option<NodeId> {
        self.operands.get(index).copied()
    }
}
