//! Method signature blobs and their resolution to type handles
//!
//! Blob layout, every value a varint:
//!
//! ```text
//! flags          bit 0 = has receiver
//! param_count
//! return         TypeSig
//! [receiver]     TypeSig
//! params         TypeSig * param_count
//! ```
//!
//! A `TypeSig` header packs `kind | data << 4`: 2 modifier, 3 instantiation,
//! 4 type variable, 5 built-in element type, 6 external type reference.

use super::{ElementType, TypeDesc, TypeHandle, TypeLayout, TypeResolver};
use crate::error::{FuncEvalError, FuncEvalResult};
use crate::wire::{FuncEvalRequest, WireReader, WireWriter};
use serde::Serialize;
use tracing::{debug, trace};

const FLAG_HAS_THIS: u32 = 0x1;
const MAX_SIG_DEPTH: usize = 64;

const MODIFIER_ARRAY: u32 = 1;
const MODIFIER_BY_REF: u32 = 2;
const MODIFIER_POINTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum SigKind {
    Modifier = 2,
    Instantiation = 3,
    Variable = 4,
    BuiltIn = 5,
    External = 6,
}

impl SigKind {
    fn from_header(header: u32) -> Option<(SigKind, u32)> {
        let kind = match header & 0xf {
            2 => SigKind::Modifier,
            3 => SigKind::Instantiation,
            4 => SigKind::Variable,
            5 => SigKind::BuiltIn,
            6 => SigKind::External,
            _ => return None,
        };
        Some((kind, header >> 4))
    }

    fn header(self, data: u32) -> u32 {
        self as u32 | (data << 4)
    }
}

/// Unresolved parameter/return shape of a signature blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureShape {
    /// Return type
    pub return_type: TypeDesc,
    /// Receiver type, passed as the first argument
    pub receiver: Option<TypeDesc>,
    /// Parameter types in call order
    pub parameters: Vec<TypeDesc>,
}

impl SignatureShape {
    /// Parse a blob, mapping external indices through `type_references`
    pub fn parse(blob: &[u8], type_references: &[u64]) -> FuncEvalResult<Self> {
        let mut parser = ShapeParser {
            reader: WireReader::new(blob),
            type_references,
        };

        let flags_offset = parser.reader.offset();
        let flags = parser.reader.read_unsigned()?;
        if flags & !FLAG_HAS_THIS != 0 {
            return Err(FuncEvalError::malformed(
                flags_offset,
                format!("unknown signature flags {:#x}", flags),
            ));
        }

        let count_offset = parser.reader.offset();
        let param_count = parser.reader.read_unsigned()? as usize;
        // Every TypeSig takes at least one byte.
        if param_count > parser.reader.remaining() {
            return Err(FuncEvalError::malformed(
                count_offset,
                format!(
                    "signature declares {} parameters but only {} bytes remain",
                    param_count,
                    parser.reader.remaining()
                ),
            ));
        }

        let return_type = parser.type_sig(0)?;
        let receiver = if flags & FLAG_HAS_THIS != 0 {
            Some(parser.type_sig(0)?)
        } else {
            None
        };
        let mut parameters = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            parameters.push(parser.type_sig(0)?);
        }

        if !parser.reader.is_at_end() {
            return Err(FuncEvalError::malformed(
                parser.reader.offset(),
                format!("{} trailing bytes after signature", parser.reader.remaining()),
            ));
        }

        Ok(Self {
            return_type,
            receiver,
            parameters,
        })
    }

    /// Return, receiver and parameters in frame order
    pub fn slots(&self) -> impl Iterator<Item = &TypeDesc> {
        std::iter::once(&self.return_type)
            .chain(self.receiver.iter())
            .chain(self.parameters.iter())
    }

    /// Number of argument slots (receiver included)
    pub fn argument_count(&self) -> usize {
        self.parameters.len() + usize::from(self.receiver.is_some())
    }
}

struct ShapeParser<'a> {
    reader: WireReader<'a>,
    type_references: &'a [u64],
}

impl ShapeParser<'_> {
    fn type_sig(&mut self, depth: usize) -> FuncEvalResult<TypeDesc> {
        let offset = self.reader.offset();
        if depth > MAX_SIG_DEPTH {
            return Err(FuncEvalError::malformed(
                offset,
                format!("type signature nested deeper than {}", MAX_SIG_DEPTH),
            ));
        }

        let header = self.reader.read_unsigned()?;
        let (kind, data) = SigKind::from_header(header).ok_or_else(|| {
            FuncEvalError::malformed(offset, format!("unknown type signature kind {}", header & 0xf))
        })?;

        match kind {
            SigKind::Modifier => {
                let inner = Box::new(self.type_sig(depth + 1)?);
                match data {
                    MODIFIER_ARRAY => Ok(TypeDesc::Array(inner)),
                    MODIFIER_BY_REF => Ok(TypeDesc::ByRef(inner)),
                    MODIFIER_POINTER => Ok(TypeDesc::Pointer(inner)),
                    other => Err(FuncEvalError::malformed(
                        offset,
                        format!("unknown type modifier {}", other),
                    )),
                }
            }
            SigKind::Instantiation => {
                if data as usize > self.reader.remaining() {
                    return Err(FuncEvalError::malformed(
                        offset,
                        format!("instantiation declares {} arguments", data),
                    ));
                }
                let definition = Box::new(self.type_sig(depth + 1)?);
                let mut arguments = Vec::with_capacity(data as usize);
                for _ in 0..data {
                    arguments.push(self.type_sig(depth + 1)?);
                }
                Ok(TypeDesc::Instantiation {
                    definition,
                    arguments,
                })
            }
            SigKind::Variable => Ok(TypeDesc::Variable {
                index: data >> 1,
                method: data & 1 != 0,
            }),
            SigKind::BuiltIn => ElementType::from_code(data)
                .map(TypeDesc::Primitive)
                .ok_or_else(|| {
                    FuncEvalError::unresolved(format!("unknown element type code {:#x}", data))
                }),
            SigKind::External => self
                .type_references
                .get(data as usize)
                .map(|raw| TypeDesc::Handle(TypeHandle::from_raw(*raw)))
                .ok_or_else(|| {
                    FuncEvalError::unresolved(format!(
                        "type reference index {} out of range ({} references)",
                        data,
                        self.type_references.len()
                    ))
                }),
        }
    }
}

/// Writes signature blobs in the format [`SignatureShape::parse`] reads
///
/// `TypeDesc::Handle` values are written as external references: each
/// distinct handle is appended to the reference list on first use.
#[derive(Debug, Default)]
pub struct SignatureBuilder {
    writer: WireWriter,
    type_references: Vec<u64>,
}

impl SignatureBuilder {
    /// Encode a complete shape, returning the blob and the reference list
    pub fn encode(shape: &SignatureShape) -> (Vec<u8>, Vec<u64>) {
        Self::encode_with_references(shape, Vec::new())
    }

    /// Like [`encode`](Self::encode), appending to existing references
    pub fn encode_with_references(
        shape: &SignatureShape,
        type_references: Vec<u64>,
    ) -> (Vec<u8>, Vec<u64>) {
        let mut builder = SignatureBuilder {
            writer: WireWriter::new(),
            type_references,
        };

        let flags = if shape.receiver.is_some() {
            FLAG_HAS_THIS
        } else {
            0
        };
        builder.writer.write_unsigned(flags);
        builder.writer.write_unsigned(shape.parameters.len() as u32);
        for desc in shape.slots() {
            builder.type_sig(desc);
        }

        (builder.writer.into_bytes(), builder.type_references)
    }

    fn type_sig(&mut self, desc: &TypeDesc) {
        match desc {
            TypeDesc::Primitive(e) => self.writer.write_unsigned(SigKind::BuiltIn.header(e.code())),
            TypeDesc::Handle(h) => {
                let index = match self.type_references.iter().position(|r| *r == h.raw()) {
                    Some(index) => index,
                    None => {
                        self.type_references.push(h.raw());
                        self.type_references.len() - 1
                    }
                };
                self.writer
                    .write_unsigned(SigKind::External.header(index as u32));
            }
            TypeDesc::Array(inner) => self.modifier(MODIFIER_ARRAY, inner),
            TypeDesc::ByRef(inner) => self.modifier(MODIFIER_BY_REF, inner),
            TypeDesc::Pointer(inner) => self.modifier(MODIFIER_POINTER, inner),
            TypeDesc::Instantiation {
                definition,
                arguments,
            } => {
                self.writer
                    .write_unsigned(SigKind::Instantiation.header(arguments.len() as u32));
                self.type_sig(definition);
                for argument in arguments {
                    self.type_sig(argument);
                }
            }
            TypeDesc::Variable { index, method } => {
                let data = (index << 1) | u32::from(*method);
                self.writer.write_unsigned(SigKind::Variable.header(data));
            }
        }
    }

    fn modifier(&mut self, modifier: u32, inner: &TypeDesc) {
        self.writer
            .write_unsigned(SigKind::Modifier.header(modifier));
        self.type_sig(inner);
    }
}

/// One resolved slot: return, receiver or parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    /// Resolved type (the referent for by-ref slots)
    pub handle: TypeHandle,
    /// Layout of `handle`
    pub layout: TypeLayout,
    /// Slot holds an address of the value rather than the value
    pub is_by_ref: bool,
    /// Slot is the receiver
    pub is_this: bool,
}

/// Signature with every type materialized
///
/// Entry 0 is the return type, followed by the receiver (if any) and the
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSignature {
    entries: Vec<SignatureEntry>,
}

impl ResolvedSignature {
    /// Wrap entries, return slot first; `entries` is never empty
    pub(crate) fn new(entries: Vec<SignatureEntry>) -> Self {
        debug_assert!(!entries.is_empty(), "resolved signature without a return slot");
        Self { entries }
    }

    /// All entries, return slot first
    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    /// Return slot
    pub fn return_entry(&self) -> &SignatureEntry {
        &self.entries[0]
    }

    /// Receiver and parameters in call order
    pub fn arguments(&self) -> &[SignatureEntry] {
        &self.entries[1..]
    }

    /// Whether a receiver slot is present
    pub fn has_this(&self) -> bool {
        self.entries.get(1).is_some_and(|e| e.is_this)
    }

    /// Handles in entry order
    pub fn handles(&self) -> Vec<TypeHandle> {
        self.entries.iter().map(|e| e.handle).collect()
    }
}

/// Resolves request signatures through a [`TypeResolver`]
pub struct SignatureResolver<'a> {
    types: &'a dyn TypeResolver,
}

impl<'a> SignatureResolver<'a> {
    pub fn new(types: &'a dyn TypeResolver) -> Self {
        Self { types }
    }

    /// Parse and resolve the signature of a decoded request
    ///
    /// Func-eval always runs with an empty generic context, so any type
    /// variable left after parsing fails resolution.
    pub fn resolve(&self, request: &FuncEvalRequest) -> FuncEvalResult<ResolvedSignature> {
        let shape = SignatureShape::parse(request.signature(), request.type_references())?;

        if shape.argument_count() != request.parameters().len() {
            return Err(FuncEvalError::malformed(
                0,
                format!(
                    "signature has {} argument slots but the request carries {} parameters",
                    shape.argument_count(),
                    request.parameters().len()
                ),
            ));
        }

        self.resolve_shape(&shape)
    }

    /// Resolve an already parsed shape
    pub fn resolve_shape(&self, shape: &SignatureShape) -> FuncEvalResult<ResolvedSignature> {
        validate(shape)?;

        // By-ref is a property of the slot; resolve the referent.
        let mut by_ref = Vec::new();
        let batch: Vec<TypeDesc> = shape
            .slots()
            .map(|desc| match desc {
                TypeDesc::ByRef(inner) => {
                    by_ref.push(true);
                    (**inner).clone()
                }
                other => {
                    by_ref.push(false);
                    other.clone()
                }
            })
            .collect();

        let direct: Option<Vec<TypeHandle>> =
            batch.iter().map(|desc| self.types.try_resolve(desc)).collect();
        let handles = match direct {
            Some(handles) => {
                trace!(slots = handles.len(), "signature resolved directly");
                handles
            }
            None => {
                debug!(slots = batch.len(), "signature needs type construction");
                self.types.resolve_or_construct(&batch)?
            }
        };

        if handles.len() != batch.len() {
            return Err(FuncEvalError::unresolved(format!(
                "resolver returned {} handles for {} types",
                handles.len(),
                batch.len()
            )));
        }

        let has_this = shape.receiver.is_some();
        let mut entries = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let layout = self.types.layout(handle).ok_or_else(|| {
                FuncEvalError::unresolved(format!(
                    "type {} has no layout",
                    self.types
                        .type_name(handle)
                        .unwrap_or_else(|| handle.to_string())
                ))
            })?;
            if index > 0 && layout.is_void() && !by_ref[index] {
                return Err(FuncEvalError::unresolved(format!(
                    "argument {} has type void",
                    index - 1
                )));
            }
            entries.push(SignatureEntry {
                handle,
                layout,
                is_by_ref: by_ref[index],
                is_this: has_this && index == 1,
            });
        }

        Ok(ResolvedSignature::new(entries))
    }
}

fn validate(shape: &SignatureShape) -> FuncEvalResult<()> {
    if matches!(shape.return_type, TypeDesc::ByRef(_)) {
        return Err(FuncEvalError::unresolved("by-ref return types are not supported"));
    }
    for desc in shape.slots() {
        if desc.has_nested_by_ref() {
            return Err(FuncEvalError::unresolved(format!(
                "by-ref nested inside {}",
                desc
            )));
        }
    }
    for desc in shape.receiver.iter().chain(shape.parameters.iter()) {
        let referent = match desc {
            TypeDesc::ByRef(inner) => inner.as_ref(),
            other => other,
        };
        if *referent == TypeDesc::Primitive(ElementType::Void) {
            return Err(FuncEvalError::unresolved("void used as an argument type"));
        }
    }
    Ok(())
}
