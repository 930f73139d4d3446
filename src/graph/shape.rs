//! Element types and shapes of graph values.

use std::fmt;

/// Element type of an array value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    Pred,
    S32,
    U8,
    BF16,
    F16,
    F32,
    F64,
}

impl PrimitiveType {
    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveType::Pred => "pred",
            PrimitiveType::S32 => "s32",
            PrimitiveType::U8 => "u8",
            PrimitiveType::BF16 => "bf16",
            PrimitiveType::F16 => "f16",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pred" => Some(PrimitiveType::Pred),
            "s32" => Some(PrimitiveType::S32),
            "u8" => Some(PrimitiveType::U8),
            "bf16" => Some(PrimitiveType::BF16),
            "f16" => Some(PrimitiveType::F16),
            "f32" => Some(PrimitiveType::F32),
            "f64" => Some(PrimitiveType::F64),
            _ => None,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(
            self,
            PrimitiveType::BF16 | PrimitiveType::F16 | PrimitiveType::F32 | PrimitiveType::F64
        )
    }

    /// `bf16` and `f16`.
    pub const fn is_narrow_float(self) -> bool {
        matches!(self, PrimitiveType::BF16 | PrimitiveType::F16)
    }

    pub const fn bit_width(self) -> u32 {
        match self {
            PrimitiveType::Pred | PrimitiveType::U8 => 8,
            PrimitiveType::BF16 | PrimitiveType::F16 => 16,
            PrimitiveType::S32 | PrimitiveType::F32 => 32,
            PrimitiveType::F64 => 64,
        }
    }

    pub const fn byte_size(self) -> u64 {
        (self.bit_width() / 8) as u64
    }

    /// Whether every value of `self` is exactly representable in `other`.
    pub fn fits_losslessly_in(self, other: PrimitiveType) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (PrimitiveType::BF16 | PrimitiveType::F16, PrimitiveType::F32 | PrimitiveType::F64) => true,
            (PrimitiveType::F32, PrimitiveType::F64) => true,
            (PrimitiveType::Pred | PrimitiveType::U8, PrimitiveType::S32) => true,
            (PrimitiveType::Pred, PrimitiveType::U8) => true,
            (PrimitiveType::S32, PrimitiveType::F64) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of a node result: a dense array or a tuple of shapes.
///
/// Array layouts are stored minor-to-major. A missing layout means the
/// layout has not been assigned yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Array {
        element_type: PrimitiveType,
        dims: Vec<i64>,
        layout: Option<Vec<i64>>,
    },
    Tuple(Vec<Shape>),
}

impl Shape {
    pub fn array(element_type: PrimitiveType, dims: impl Into<Vec<i64>>) -> Self {
        Shape::Array {
            element_type,
            dims: dims.into(),
            layout: None,
        }
    }

    pub fn scalar(element_type: PrimitiveType) -> Self {
        Shape::array(element_type, Vec::new())
    }

    pub fn tuple(elements: impl Into<Vec<Shape>>) -> Self {
        Shape::Tuple(elements.into())
    }

    /// Scratch buffer element used as the second element of custom-call results.
    pub fn workspace(bytes: u64) -> Self {
        Shape::array(PrimitiveType::U8, vec![bytes as i64])
    }

    /// Major-to-minor layout for the given rank.
    pub fn default_layout(rank: usize) -> Vec<i64> {
        (0..rank as i64).rev().collect()
    }

    pub fn with_layout(self, minor_to_major: impl Into<Vec<i64>>) -> Self {
        match self {
            Shape::Array {
                element_type, dims, ..
            } => Shape::Array {
                element_type,
                dims,
                layout: Some(minor_to_major.into()),
            },
            tuple => tuple,
        }
    }

    /// Assign the default layout to every array without one.
    pub fn with_default_layout(self) -> Self {
        match self {
            Shape::Array {
                element_type,
                dims,
                layout,
            } => {
                let layout = layout.unwrap_or_else(|| Shape::default_layout(dims.len()));
                Shape::Array {
                    element_type,
                    dims,
                    layout: Some(layout),
                }
            }
            Shape::Tuple(elements) => {
                Shape::Tuple(elements.into_iter().map(Shape::with_default_layout).collect())
            }
        }
    }

    pub fn without_layout(&self) -> Shape {
        match self {
            Shape::Array {
                element_type, dims, ..
            } => Shape::array(*element_type, dims.clone()),
            Shape::Tuple(elements) => {
                Shape::Tuple(elements.iter().map(Shape::without_layout).collect())
            }
        }
    }

    pub fn with_element_type(&self, element_type: PrimitiveType) -> Shape {
        match self {
            Shape::Array { dims, layout, .. } => Shape::Array {
                element_type,
                dims: dims.clone(),
                layout: layout.clone(),
            },
            Shape::Tuple(elements) => Shape::Tuple(
                elements
                    .iter()
                    .map(|e| e.with_element_type(element_type))
                    .collect(),
            ),
        }
    }

    pub fn with_dims(&self, new_dims: impl Into<Vec<i64>>) -> Shape {
        match self {
            Shape::Array { element_type, .. } => Shape::array(*element_type, new_dims),
            tuple => tuple.clone(),
        }
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Shape::Array { .. })
    }

    pub fn element_type(&self) -> Option<PrimitiveType> {
        match self {
            Shape::Array { element_type, .. } => Some(*element_type),
            Shape::Tuple(_) => None,
        }
    }

    /// Dimensions of an array; empty for tuples.
    pub fn dims(&self) -> &[i64] {
        match self {
            Shape::Array { dims, .. } => dims,
            Shape::Tuple(_) => &[],
        }
    }

    pub fn rank(&self) -> usize {
        self.dims().len()
    }

    pub fn layout(&self) -> Option<&[i64]> {
        match self {
            Shape::Array { layout, .. } => layout.as_deref(),
            Shape::Tuple(_) => None,
        }
    }

    pub fn tuple_elements(&self) -> &[Shape] {
        match self {
            Shape::Tuple(elements) => elements,
            Shape::Array { .. } => &[],
        }
    }

    /// Number of elements, saturating at `i64::MAX`.
    pub fn element_count(&self) -> i64 {
        self.checked_element_count().unwrap_or(i64::MAX)
    }

    /// Number of elements, or `None` when the product of the dims overflows.
    pub fn checked_element_count(&self) -> Option<i64> {
        self.dims().iter().try_fold(1i64, |count, dim| count.checked_mul(*dim))
    }

    pub fn byte_size(&self) -> u64 {
        match self {
            Shape::Array { element_type, .. } => {
                (self.element_count().max(0) as u64).saturating_mul(element_type.byte_size())
            }
            Shape::Tuple(elements) => elements.iter().map(Shape::byte_size).sum(),
        }
    }

    /// True when the layout is unassigned or major-to-minor.
    pub fn has_default_layout(&self) -> bool {
        match self {
            Shape::Array { dims, layout, .. } => layout
                .as_ref()
                .map_or(true, |l| *l == Shape::default_layout(dims.len())),
            Shape::Tuple(elements) => elements.iter().all(Shape::has_default_layout),
        }
    }

    /// Every array in the shape carries a layout.
    pub fn has_layout(&self) -> bool {
        match self {
            Shape::Array { layout, .. } => layout.is_some(),
            Shape::Tuple(elements) => elements.iter().all(Shape::has_layout),
        }
    }

    /// Same element types and dimensions, layouts ignored.
    pub fn compatible(&self, other: &Shape) -> bool {
        match (self, other) {
            (
                Shape::Array {
                    element_type: a,
                    dims: da,
                    ..
                },
                Shape::Array {
                    element_type: b,
                    dims: db,
                    ..
                },
            ) => a == b && da == db,
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible(y))
            }
            _ => false,
        }
    }

    /// Equality used by layout-aware passes: unassigned and default layouts match.
    pub fn equal_with_layout(&self, other: &Shape) -> bool {
        self.compatible(other) && self.normalized_layout() == other.normalized_layout()
    }

    fn normalized_layout(&self) -> Vec<Vec<i64>> {
        match self {
            Shape::Array { dims, layout, .. } => vec![layout
                .clone()
                .unwrap_or_else(|| Shape::default_layout(dims.len()))],
            Shape::Tuple(elements) => elements.iter().flat_map(Shape::normalized_layout).collect(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array {
                element_type,
                dims,
                layout,
            } => {
                write!(f, "{}[{}]", element_type, join(dims))?;
                if let Some(layout) = layout {
                    write!(f, "{{{}}}", join(layout))?;
                }
                Ok(())
            }
            Shape::Tuple(elements) => {
                f.write_str("(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str(")")
            }
        }
    }
}

pub(crate) fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
