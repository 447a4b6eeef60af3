//! Type handles, layouts and the resolver seam
//!
//! A [`TypeDesc`] is what a signature blob says about a type. A
//! [`TypeHandle`] names a fully built runtime type whose [`TypeLayout`] is
//! known. The [`TypeResolver`] trait turns the former into the latter,
//! constructing generic instantiations when they do not exist yet.

pub mod loader;
pub mod signature;

pub use loader::{DefinitionKind, TypeDefinition, TypeLoader};
pub use signature::{
    ResolvedSignature, SignatureBuilder, SignatureEntry, SignatureResolver, SignatureShape,
};

use crate::error::FuncEvalResult;
use serde::Serialize;
use std::fmt;

/// Size of object references, pointers and by-ref slots
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// Opaque process-local identifier of a fully described runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TypeHandle(u64);

impl TypeHandle {
    /// Wrap a raw identifier (as sent by the debugger)
    pub const fn from_raw(raw: u64) -> Self {
        TypeHandle(raw)
    }

    /// Raw identifier
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0)
    }
}

/// Built-in element types, numbered with their ECMA-335 codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ElementType {
    Void = 0x01,
    Boolean = 0x02,
    Char = 0x03,
    I1 = 0x04,
    U1 = 0x05,
    I2 = 0x06,
    U2 = 0x07,
    I4 = 0x08,
    U4 = 0x09,
    I8 = 0x0a,
    U8 = 0x0b,
    R4 = 0x0c,
    R8 = 0x0d,
    String = 0x0e,
    IntPtr = 0x18,
    UIntPtr = 0x19,
    Object = 0x1c,
}

impl ElementType {
    /// Every built-in, in code order
    pub const ALL: [ElementType; 17] = [
        ElementType::Void,
        ElementType::Boolean,
        ElementType::Char,
        ElementType::I1,
        ElementType::U1,
        ElementType::I2,
        ElementType::U2,
        ElementType::I4,
        ElementType::U4,
        ElementType::I8,
        ElementType::U8,
        ElementType::R4,
        ElementType::R8,
        ElementType::String,
        ElementType::IntPtr,
        ElementType::UIntPtr,
        ElementType::Object,
    ];

    /// Look up an element type by its wire code
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| *e as u32 == code)
    }

    /// Wire code
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Short name used in diagnostics and the CLI type syntax
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Void => "void",
            ElementType::Boolean => "bool",
            ElementType::Char => "char",
            ElementType::I1 => "i8",
            ElementType::U1 => "u8",
            ElementType::I2 => "i16",
            ElementType::U2 => "u16",
            ElementType::I4 => "i32",
            ElementType::U4 => "u32",
            ElementType::I8 => "i64",
            ElementType::U8 => "u64",
            ElementType::R4 => "f32",
            ElementType::R8 => "f64",
            ElementType::String => "string",
            ElementType::IntPtr => "isize",
            ElementType::UIntPtr => "usize",
            ElementType::Object => "object",
        }
    }

    /// Parse a short name back into an element type
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.name() == name)
    }

    /// Whether values of this type are object references
    pub fn is_reference(self) -> bool {
        matches!(self, ElementType::String | ElementType::Object)
    }

    /// Integral types narrower than a machine word come back widened
    pub fn is_narrow_integral(self) -> bool {
        matches!(
            self,
            ElementType::Boolean
                | ElementType::Char
                | ElementType::I1
                | ElementType::U1
                | ElementType::I2
                | ElementType::U2
                | ElementType::I4
                | ElementType::U4
        )
    }

    /// Layout of a value of this type
    pub fn layout(self) -> TypeLayout {
        let size = match self {
            ElementType::Void => 0,
            ElementType::Boolean | ElementType::I1 | ElementType::U1 => 1,
            ElementType::Char | ElementType::I2 | ElementType::U2 => 2,
            ElementType::I4 | ElementType::U4 | ElementType::R4 => 4,
            ElementType::I8 | ElementType::U8 | ElementType::R8 => 8,
            ElementType::String
            | ElementType::Object
            | ElementType::IntPtr
            | ElementType::UIntPtr => POINTER_SIZE,
        };
        let kind = match self {
            ElementType::Void => LayoutKind::Void,
            e if e.is_reference() => LayoutKind::Reference,
            e => LayoutKind::Primitive(e),
        };
        TypeLayout {
            size,
            align: size.max(1),
            kind,
        }
    }
}

/// Unresolved type as written in a signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDesc {
    /// Built-in element type
    Primitive(ElementType),
    /// Existing type named by the debugger
    Handle(TypeHandle),
    /// Single-dimension array of the element
    Array(Box<TypeDesc>),
    /// Unmanaged pointer to the element
    Pointer(Box<TypeDesc>),
    /// Managed reference to the element (top-level slots only)
    ByRef(Box<TypeDesc>),
    /// Generic definition applied to arguments
    Instantiation {
        definition: Box<TypeDesc>,
        arguments: Vec<TypeDesc>,
    },
    /// Generic parameter of the enclosing type or method
    Variable { index: u32, method: bool },
}

impl TypeDesc {
    /// Replace type-level variables with `arguments`
    ///
    /// Variables outside the argument list are left as they are so the
    /// builder reports them.
    pub fn substitute(&self, arguments: &[TypeDesc]) -> TypeDesc {
        match self {
            TypeDesc::Variable {
                index,
                method: false,
            } => arguments
                .get(*index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeDesc::Array(inner) => TypeDesc::Array(Box::new(inner.substitute(arguments))),
            TypeDesc::Pointer(inner) => TypeDesc::Pointer(Box::new(inner.substitute(arguments))),
            TypeDesc::ByRef(inner) => TypeDesc::ByRef(Box::new(inner.substitute(arguments))),
            TypeDesc::Instantiation {
                definition,
                arguments: inner,
            } => TypeDesc::Instantiation {
                definition: Box::new(definition.substitute(arguments)),
                arguments: inner.iter().map(|a| a.substitute(arguments)).collect(),
            },
            TypeDesc::Primitive(_) | TypeDesc::Handle(_) | TypeDesc::Variable { .. } => {
                self.clone()
            }
        }
    }

    /// Whether a by-ref appears anywhere below the top level
    pub fn has_nested_by_ref(&self) -> bool {
        fn contains(desc: &TypeDesc) -> bool {
            match desc {
                TypeDesc::ByRef(_) => true,
                TypeDesc::Array(inner) | TypeDesc::Pointer(inner) => contains(inner),
                TypeDesc::Instantiation {
                    definition,
                    arguments,
                } => contains(definition) || arguments.iter().any(contains),
                TypeDesc::Primitive(_) | TypeDesc::Handle(_) | TypeDesc::Variable { .. } => false,
            }
        }

        match self {
            TypeDesc::ByRef(inner) => contains(inner),
            other => contains(other),
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Primitive(e) => f.write_str(e.name()),
            TypeDesc::Handle(h) => write!(f, "{}", h),
            TypeDesc::Array(inner) => write!(f, "{}[]", inner),
            TypeDesc::Pointer(inner) => write!(f, "*{}", inner),
            TypeDesc::ByRef(inner) => write!(f, "&{}", inner),
            TypeDesc::Instantiation {
                definition,
                arguments,
            } => {
                write!(f, "{}<", definition)?;
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(">")
            }
            TypeDesc::Variable { index, method } => {
                if *method {
                    write!(f, "!!{}", index)
                } else {
                    write!(f, "!{}", index)
                }
            }
        }
    }
}

/// Memory shape of a built type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeLayout {
    /// Size of a value in bytes
    pub size: usize,
    /// Required alignment in bytes
    pub align: usize,
    /// What the bytes mean
    pub kind: LayoutKind,
}

/// Classification of a layout for boxing and the calling convention
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutKind {
    /// No value
    Void,
    /// Scalar value type
    Primitive(ElementType),
    /// Nullable object reference
    Reference,
    /// Unmanaged pointer (boxed like a native int)
    Pointer,
    /// Value type with fields laid out in declaration order
    Struct(Vec<FieldLayout>),
}

/// One field of a struct layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Byte offset inside the struct
    pub offset: usize,
    /// Field layout
    pub layout: TypeLayout,
}

impl TypeLayout {
    /// Layout of an object reference
    pub fn reference() -> Self {
        TypeLayout {
            size: POINTER_SIZE,
            align: POINTER_SIZE,
            kind: LayoutKind::Reference,
        }
    }

    /// Layout of an unmanaged pointer
    pub fn pointer() -> Self {
        TypeLayout {
            size: POINTER_SIZE,
            align: POINTER_SIZE,
            kind: LayoutKind::Pointer,
        }
    }

    /// Lay out fields in order with natural alignment
    ///
    /// An empty struct still occupies one byte.
    pub fn structure(fields: Vec<TypeLayout>) -> Self {
        let mut offset = 0usize;
        let mut align = 1usize;
        let mut placed = Vec::with_capacity(fields.len());

        for layout in fields {
            offset = align_up(offset, layout.align);
            align = align.max(layout.align);
            let size = layout.size;
            placed.push(FieldLayout { offset, layout });
            offset += size;
        }

        TypeLayout {
            size: align_up(offset, align).max(1),
            align,
            kind: LayoutKind::Struct(placed),
        }
    }

    /// Whether this is the void type
    pub fn is_void(&self) -> bool {
        matches!(self.kind, LayoutKind::Void)
    }
}

/// Round `value` up to a multiple of `align` (a power of two)
pub fn align_up(value: usize, align: usize) -> usize {
    let align = align.max(1);
    (value + align - 1) & !(align - 1)
}

/// Type-system collaborator consulted by the signature resolver
pub trait TypeResolver: Send + Sync {
    /// Resolve to an already materialized type without constructing anything
    fn try_resolve(&self, desc: &TypeDesc) -> Option<TypeHandle>;

    /// Resolve a batch, constructing missing types under the construction lock
    ///
    /// Either every type in the batch is published or none of the newly built
    /// ones are.
    fn resolve_or_construct(&self, batch: &[TypeDesc]) -> FuncEvalResult<Vec<TypeHandle>>;

    /// Layout of a built type; `None` for unknown handles and open generics
    fn layout(&self, handle: TypeHandle) -> Option<TypeLayout>;

    /// Display name for diagnostics
    fn type_name(&self, handle: TypeHandle) -> Option<String>;

    /// Number of types built on demand so far
    fn constructed_count(&self) -> usize {
        0
    }
}
