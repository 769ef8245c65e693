use std::fmt;

/// Enumerates scalar element types carried by graph outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    Boolean,
    I8,
    U8,
    I32,
    I64,
    F16,
    Bf16,
    F32,
    F64,
}

impl ElementType {
    /// Returns `true` for floating-point representations.
    pub fn is_float(self) -> bool {
        matches!(
            self,
            ElementType::F16 | ElementType::Bf16 | ElementType::F32 | ElementType::F64
        )
    }

    /// Returns `true` for signed or unsigned integers (booleans excluded).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ElementType::I8 | ElementType::U8 | ElementType::I32 | ElementType::I64
        )
    }

    /// Returns `true` for the 8-bit integer types produced by quantization.
    pub fn is_quantized(self) -> bool {
        matches!(self, ElementType::I8 | ElementType::U8)
    }

    pub fn bitwidth(self) -> usize {
        match self {
            ElementType::Boolean => 1,
            ElementType::I8 | ElementType::U8 => 8,
            ElementType::F16 | ElementType::Bf16 => 16,
            ElementType::I32 | ElementType::F32 => 32,
            ElementType::I64 | ElementType::F64 => 64,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ElementType::Boolean => "bool",
            ElementType::I8 => "i8",
            ElementType::U8 => "u8",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::F16 => "f16",
            ElementType::Bf16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single axis extent; `Dynamic` means the length is unknown at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Static(usize),
    Dynamic,
}

impl Dimension {
    pub fn as_static(self) -> Option<usize> {
        match self {
            Dimension::Static(value) => Some(value),
            Dimension::Dynamic => None,
        }
    }

    pub fn is_static(self) -> bool {
        matches!(self, Dimension::Static(_))
    }

    /// Merges two extents that must describe the same axis.
    pub(crate) fn merge(self, other: Dimension) -> Option<Dimension> {
        match (self, other) {
            (Dimension::Static(a), Dimension::Static(b)) => (a == b).then_some(self),
            (Dimension::Static(_), Dimension::Dynamic) => Some(self),
            (Dimension::Dynamic, _) => Some(other),
        }
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Dimension::Static(value)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(value) => write!(f, "{value}"),
            Dimension::Dynamic => f.write_str("?"),
        }
    }
}

/// Shape descriptor that may be partially known: `None` dims means the rank itself is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialShape {
    dims: Option<Vec<Dimension>>,
}

impl PartialShape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self {
            dims: Some(dims.into()),
        }
    }

    pub fn from_static(dims: &[usize]) -> Self {
        Self::new(dims.iter().copied().map(Dimension::Static).collect::<Vec<_>>())
    }

    /// Shape whose rank is not known.
    pub fn dynamic_rank() -> Self {
        Self { dims: None }
    }

    /// Shape with a known rank but unknown extents.
    pub fn dynamic_of_rank(rank: usize) -> Self {
        Self::new(vec![Dimension::Dynamic; rank])
    }

    pub fn scalar() -> Self {
        Self::new(Vec::new())
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    pub fn has_static_rank(&self) -> bool {
        self.dims.is_some()
    }

    pub fn dims(&self) -> Option<&[Dimension]> {
        self.dims.as_deref()
    }

    pub fn into_dims(self) -> Option<Vec<Dimension>> {
        self.dims
    }

    pub fn is_static(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(|dim| dim.is_static()))
    }

    /// Returns static dimensions when every extent is known.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims
            .as_ref()?
            .iter()
            .map(|dim| dim.as_static())
            .collect()
    }

    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in self.static_dims()? {
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }

    /// Normalises a possibly negative axis against the rank.
    pub fn normalize_axis(&self, axis: i64) -> Option<usize> {
        normalize_axis(axis, self.rank()?)
    }
}

pub(crate) fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(dims) = &self.dims else {
            return f.write_str("[...]");
        };
        f.write_str("[")?;
        for (idx, dim) in dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

/// Element type plus best-known shape of one node output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputSpec {
    pub element_type: ElementType,
    pub shape: PartialShape,
}

impl OutputSpec {
    pub fn new(element_type: ElementType, shape: PartialShape) -> Self {
        Self {
            element_type,
            shape,
        }
    }

    pub fn static_shape(element_type: ElementType, dims: &[usize]) -> Self {
        Self::new(element_type, PartialShape::from_static(dims))
    }
}

impl fmt::Display for OutputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.element_type, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_axis_accepts_negative_axes() {
        let shape = PartialShape::from_static(&[2, 3, 4]);
        assert_eq!(shape.normalize_axis(-1), Some(2));
        assert_eq!(shape.normalize_axis(0), Some(0));
        assert_eq!(shape.normalize_axis(3), None);
        assert_eq!(PartialShape::dynamic_rank().normalize_axis(0), None);
    }

    #[test]
    fn display_marks_unknown_extents() {
        let shape = PartialShape::new(vec![Dimension::Static(1), Dimension::Dynamic]);
        assert_eq!(shape.to_string(), "[1,?]");
        assert_eq!(PartialShape::dynamic_rank().to_string(), "[...]");
    }
}
