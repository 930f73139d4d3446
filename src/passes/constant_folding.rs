//! Evaluates operations whose operands are all constants.

use crate::core::{CompilationSession, CompileResult};
use crate::graph::{Computation, Graph, Literal, NodeId, OpKind, Padding, PrimitiveType, ReduceKind, Shape};
use crate::pass::Pass;

use super::remove_if_dead;

/// Results larger than this stay unevaluated.
const MAX_FOLDED_ELEMENTS: i64 = 1 << 16;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantFolding;

impl ConstantFolding {
    pub fn new() -> Self {
        Self
    }
}

/// Round `value` to what an element of type `ty` can hold.
pub(crate) fn normalize(value: f64, ty: PrimitiveType) -> f64 {
    match ty {
        PrimitiveType::F64 => value,
        PrimitiveType::F32 => value as f32 as f64,
        PrimitiveType::BF16 => round_bf16(value),
        PrimitiveType::F16 => round_f16(value),
        PrimitiveType::S32 => value as i32 as f64,
        PrimitiveType::U8 => value as u8 as f64,
        PrimitiveType::Pred => f64::from(u8::from(value != 0.0)),
    }
}

fn round_bf16(value: f64) -> f64 {
    let single = value as f32;
    if single.is_nan() {
        return f64::NAN;
    }
    let bits = single.to_bits();
    let lsb = (bits >> 16) & 1;
    let rounded = bits.wrapping_add(0x7fff + lsb) & 0xffff_0000;
    f32::from_bits(rounded) as f64
}

fn round_f16(value: f64) -> f64 {
    const MAX: f64 = 65504.0;
    if !value.is_finite() || value == 0.0 {
        return value;
    }
    // Halfway between MAX and the next (unrepresentable) step rounds to infinity.
    if value.abs() >= 65520.0 {
        return f64::INFINITY.copysign(value);
    }
    let exponent = (((value.to_bits() >> 52) & 0x7ff) as i32 - 1023).max(-14);
    let quantum = 2f64.powi(exponent - 10);
    ((value / quantum).round_ties_even() * quantum).clamp(-MAX, MAX)
}

fn strides(dims: &[i64]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1] as usize;
    }
    strides
}

/// Multi-index of the row-major position `linear`.
fn unravel(mut linear: usize, dims: &[i64]) -> Vec<i64> {
    let mut index = vec![0i64; dims.len()];
    for i in (0..dims.len()).rev() {
        let size = dims[i].max(1) as usize;
        index[i] = (linear % size) as i64;
        linear /= size;
    }
    index
}

fn binary(kind: &OpKind, ty: PrimitiveType, a: f64, b: f64) -> Option<f64> {
    let integral = !ty.is_float();
    let value = match kind {
        OpKind::Add => a + b,
        OpKind::Subtract => a - b,
        OpKind::Multiply => a * b,
        OpKind::Divide if integral && b == 0.0 => return None,
        OpKind::Divide if integral => (a / b).trunc(),
        OpKind::Divide => a / b,
        OpKind::Maximum if a.is_nan() || b.is_nan() => f64::NAN,
        OpKind::Maximum => a.max(b),
        OpKind::Minimum if a.is_nan() || b.is_nan() => f64::NAN,
        OpKind::Minimum => a.min(b),
        _ => return None,
    };
    Some(value)
}

fn reduce(kind: ReduceKind, values: impl Iterator<Item = f64>) -> f64 {
    match kind {
        ReduceKind::Sum => values.sum(),
        ReduceKind::Max => values.fold(f64::NEG_INFINITY, |acc, v| if acc.is_nan() || v.is_nan() { f64::NAN } else { acc.max(v) }),
        ReduceKind::Min => values.fold(f64::INFINITY, |acc, v| if acc.is_nan() || v.is_nan() { f64::NAN } else { acc.min(v) }),
    }
}

/// Values of `kind` applied to constant `inputs`, before rounding to the result type.
fn evaluate(kind: &OpKind, inputs: &[(&Literal, &Shape)], shape: &Shape) -> Option<Vec<f64>> {
    let ty = shape.element_type()?;
    let first = inputs.first()?;
    let values = first.0.to_vec();

    match kind {
        OpKind::Negate => Some(values.iter().map(|v| -v).collect()),
        OpKind::Convert | OpKind::Copy | OpKind::Reshape => Some(values),
        kind if kind.is_elementwise_binary() => {
            let rhs = inputs.get(1)?.0;
            values.iter().zip(rhs.iter()).map(|(a, b)| binary(kind, ty, *a, b)).collect()
        }
        OpKind::Transpose { permutation } => {
            let input_strides = strides(first.1.dims());
            let count = shape.element_count() as usize;
            Some(
                (0..count)
                    .map(|linear| {
                        let out = unravel(linear, shape.dims());
                        let source: usize = permutation
                            .iter()
                            .zip(&out)
                            .map(|(p, i)| *i as usize * input_strides[*p as usize])
                            .sum();
                        values[source]
                    })
                    .collect(),
            )
        }
        OpKind::Reduce { dimensions, kind } => {
            let input_dims = first.1.dims();
            let mut groups = vec![Vec::new(); shape.element_count() as usize];
            let out_strides = strides(shape.dims());
            for (linear, value) in values.iter().enumerate() {
                let index = unravel(linear, input_dims);
                let target: usize = index
                    .iter()
                    .enumerate()
                    .filter(|(d, _)| !dimensions.contains(&(*d as i64)))
                    .zip(&out_strides)
                    .map(|((_, i), s)| *i as usize * s)
                    .sum();
                groups[target].push(*value);
            }
            Some(groups.into_iter().map(|g| reduce(*kind, g.into_iter())).collect())
        }
        OpKind::Pad { padding } => {
            if padding.iter().any(|p: &Padding| p.low < 0 || p.high < 0) {
                return None;
            }
            let fill = inputs.get(1)?.0.splat_value()?;
            let mut out = vec![fill; shape.element_count() as usize];
            let out_strides = strides(shape.dims());
            for (linear, value) in values.iter().enumerate() {
                let index = unravel(linear, first.1.dims());
                let target: usize = index
                    .iter()
                    .zip(padding)
                    .zip(&out_strides)
                    .map(|((i, p), s)| (*i + p.low) as usize * s)
                    .sum();
                out[target] = *value;
            }
            Some(out)
        }
        OpKind::Concatenate { dimension } => {
            let axis = *dimension as usize;
            let out_strides = strides(shape.dims());
            let mut out = vec![0.0; shape.element_count() as usize];
            let mut offset = 0i64;
            for (literal, input) in inputs {
                for (linear, value) in literal.iter().enumerate() {
                    let mut index = unravel(linear, input.dims());
                    index[axis] += offset;
                    let target: usize = index.iter().zip(&out_strides).map(|(i, s)| *i as usize * s).sum();
                    out[target] = value;
                }
                offset += input.dims()[axis];
            }
            Some(out)
        }
        _ => None,
    }
}

fn fold(computation: &Computation, id: NodeId) -> Option<Literal> {
    let node = computation.node(id)?;
    if node.operands.is_empty() || !node.shape.is_array() || node.shape.element_count() > MAX_FOLDED_ELEMENTS {
        return None;
    }
    let inputs: Vec<(&Literal, &Shape)> = node
        .operands
        .iter()
        .map(|operand| {
            let input = &computation[*operand];
            input
                .kind
                .literal()
                .filter(|literal| literal.len() as i64 <= MAX_FOLDED_ELEMENTS)
                .map(|literal| (literal, &input.shape))
        })
        .collect::<Option<Vec<_>>>()?;
    let ty = node.shape.element_type()?;
    let values = evaluate(&node.kind, &inputs, &node.shape)?;
    Some(Literal::new(values.into_iter().map(|v| normalize(v, ty)).collect()))
}

impl Pass for ConstantFolding {
    fn name(&self) -> &str {
        "constant-folding"
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, _session: &CompilationSession) -> CompileResult<bool> {
        let mut changed = false;
        for computation in graph.computations_mut() {
            for id in computation.post_order() {
                let Some(literal) = fold(computation, id) else {
                    continue;
                };
                let node = computation[id].clone();
                log::trace!("constant-folding: folded '{}'", node.name);
                let folded = computation.add(
                    format!("{}.folded", node.name),
                    OpKind::Constant { literal },
                    vec![],
                    node.shape,
                );
                computation.replace_node(id, folded);
                remove_if_dead(computation, &node.operands);
                changed = true;
            }
        }
        Ok(changed)
    }
}
