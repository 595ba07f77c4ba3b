//! Value types carried on data edges.
//!
//! Control tokens are not a [`Type`]: they live in a separate port kind (see
//! [`crate::ir::PortType`]) so the data type system can never confuse them
//! with tensors.

use std::fmt;

// ─── Element types ──────────────────────────────────────────────────────────

/// Tensor element type (a TensorFlow dtype).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    BF16,
    F16,
    F32,
    F64,
    Complex64,
    Complex128,
    String,
    Resource,
    Variant,
}

impl ElementType {
    /// All element types, longest textual name first within each prefix
    /// family so a prefix-matching parser can try them in order.
    pub const ALL: [ElementType; 18] = [
        ElementType::Complex128,
        ElementType::Complex64,
        ElementType::I16,
        ElementType::I32,
        ElementType::I64,
        ElementType::I8,
        ElementType::Bool,
        ElementType::U16,
        ElementType::U32,
        ElementType::U64,
        ElementType::U8,
        ElementType::BF16,
        ElementType::F16,
        ElementType::F32,
        ElementType::F64,
        ElementType::String,
        ElementType::Resource,
        ElementType::Variant,
    ];

    /// Textual name used by the printer and parser.
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Bool => "i1",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "ui8",
            ElementType::U16 => "ui16",
            ElementType::U32 => "ui32",
            ElementType::U64 => "ui64",
            ElementType::BF16 => "bf16",
            ElementType::F16 => "f16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Complex64 => "complex<f32>",
            ElementType::Complex128 => "complex<f64>",
            ElementType::String => "string",
            ElementType::Resource => "resource",
            ElementType::Variant => "variant",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ElementType::I8
                | ElementType::I16
                | ElementType::I32
                | ElementType::I64
                | ElementType::U8
                | ElementType::U16
                | ElementType::U32
                | ElementType::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            ElementType::BF16 | ElementType::F16 | ElementType::F32 | ElementType::F64
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, ElementType::Complex64 | ElementType::Complex128)
    }

    /// The real component type of a complex element type.
    pub fn complex_part(self) -> Option<ElementType> {
        match self {
            ElementType::Complex64 => Some(ElementType::F32),
            ElementType::Complex128 => Some(ElementType::F64),
            _ => None,
        }
    }

    /// The complex type whose components are `self`.
    pub fn complex_of(self) -> Option<ElementType> {
        match self {
            ElementType::F32 => Some(ElementType::Complex64),
            ElementType::F64 => Some(ElementType::Complex128),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Shapes ─────────────────────────────────────────────────────────────────

/// Dimension size marker for a dimension whose extent is unknown.
pub const DYNAMIC: i64 = -1;

/// A tensor shape: unknown rank, or a list of dimensions where [`DYNAMIC`]
/// marks an unknown extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Unranked,
    Ranked(Vec<i64>),
}

impl Shape {
    pub fn scalar() -> Self {
        Shape::Ranked(Vec::new())
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => Some(dims.len()),
        }
    }

    /// Two shapes are compatible when some concrete shape satisfies both.
    pub fn is_compatible_with(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Unranked, _) | (_, Shape::Unranked) => true,
            (Shape::Ranked(a), Shape::Ranked(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(&x, &y)| x == DYNAMIC || y == DYNAMIC || x == y)
            }
        }
    }

    /// Write the dimension list as `2x?x3`, or `*` when unranked.
    pub(crate) fn fmt_dims(&self, f: &mut fmt::Formatter<'_>, trailing_x: bool) -> fmt::Result {
        match self {
            Shape::Unranked => {
                f.write_str("*")?;
                if trailing_x {
                    f.write_str("x")?;
                }
            }
            Shape::Ranked(dims) => {
                for (i, &d) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str("x")?;
                    }
                    if d == DYNAMIC {
                        f.write_str("?")?;
                    } else {
                        write!(f, "{d}")?;
                    }
                }
                if trailing_x && !dims.is_empty() {
                    f.write_str("x")?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("#shape<")?;
        self.fmt_dims(f, false)?;
        f.write_str(">")
    }
}

// ─── Types ──────────────────────────────────────────────────────────────────

/// A tensor type: element type plus shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub element: ElementType,
    pub shape: Shape,
}

/// The type of a data value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// A tensor with known element type.
    Tensor(TensorType),
    /// An opaque value: the single result of a node inside a generic function,
    /// whose arity is not known yet. Unpacked with `get_result`.
    Opaque,
}

impl Type {
    /// A rank-0 tensor of `element`.
    pub fn scalar(element: ElementType) -> Self {
        Type::Tensor(TensorType {
            element,
            shape: Shape::scalar(),
        })
    }

    pub fn ranked(element: ElementType, dims: &[i64]) -> Self {
        Type::Tensor(TensorType {
            element,
            shape: Shape::Ranked(dims.to_vec()),
        })
    }

    pub fn unranked(element: ElementType) -> Self {
        Type::Tensor(TensorType {
            element,
            shape: Shape::Unranked,
        })
    }

    pub fn element(&self) -> Option<ElementType> {
        match self {
            Type::Tensor(t) => Some(t.element),
            Type::Opaque => None,
        }
    }

    pub fn shape(&self) -> Option<&Shape> {
        match self {
            Type::Tensor(t) => Some(&t.shape),
            Type::Opaque => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Type::Opaque)
    }

    pub fn is_complex(&self) -> bool {
        self.element().is_some_and(ElementType::is_complex)
    }

    /// Same shape, different element type.
    pub fn with_element(&self, element: ElementType) -> Type {
        match self {
            Type::Tensor(t) => Type::Tensor(TensorType {
                element,
                shape: t.shape.clone(),
            }),
            Type::Opaque => Type::Opaque,
        }
    }

    /// Rank-0 integer tensor (or opaque, which may turn out to be one).
    pub fn is_scalar_integer_like(&self) -> bool {
        match self {
            Type::Opaque => true,
            Type::Tensor(t) => {
                t.element.is_integer() && matches!(t.shape.rank(), Some(0) | None)
            }
        }
    }

    /// Boolean tensor usable as a loop predicate (rank 0 or unranked).
    pub fn is_predicate_like(&self) -> bool {
        match self {
            Type::Opaque => true,
            Type::Tensor(t) => {
                t.element == ElementType::Bool && matches!(t.shape.rank(), Some(0) | None)
            }
        }
    }

    /// Whether a value of type `self` may flow where `other` is expected.
    ///
    /// Opaque values are compatible with everything; tensors need the same
    /// element type and compatible shapes.
    pub fn is_compatible_with(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Opaque, _) | (_, Type::Opaque) => true,
            (Type::Tensor(a), Type::Tensor(b)) => {
                a.element == b.element && a.shape.is_compatible_with(&b.shape)
            }
        }
    }

    /// Whether this type can carry a value of dtype `element`.
    pub fn accepts_element(&self, element: ElementType) -> bool {
        match self {
            Type::Opaque => true,
            Type::Tensor(t) => t.element == element,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Opaque => f.write_str("!opaque"),
            Type::Tensor(t) => {
                f.write_str("tensor<")?;
                t.shape.fmt_dims(f, true)?;
                write!(f, "{}>", t.element)
            }
        }
    }
}

/// Signature of a function: ordered input and result types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionType {
    pub inputs: Vec<Type>,
    pub results: Vec<Type>,
}

impl FunctionType {
    pub fn new(inputs: Vec<Type>, results: Vec<Type>) -> Self {
        Self { inputs, results }
    }
}
