//! Raw-address invocation
//!
//! [`CallConverter::invoke`] is the only place the engine jumps to an address
//! it was handed by the debugger. Everything it needs is in the frame and the
//! dynamic signature; nothing here touches the type loader.

use crate::error::FuncEvalError;
use crate::frame::CallFrame;
use crate::types::{ElementType, LayoutKind, ResolvedSignature, TypeLayout};
use libffi::middle::{Cif, Type};
use std::ffi::c_void;
use thiserror::Error;
use tracing::trace;

/// Calling conventions a func-eval target may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// Static managed call; a receiver, if any, is the first argument
    ManagedStatic,
}

/// Slot shapes for one call, detached from the type system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicCallSignature {
    convention: CallingConvention,
    return_layout: TypeLayout,
    arguments: Vec<TypeLayout>,
}

impl DynamicCallSignature {
    /// Derive from a resolved signature; by-ref slots become pointers
    pub fn from_resolved(signature: &ResolvedSignature) -> Self {
        Self {
            convention: CallingConvention::ManagedStatic,
            return_layout: signature.return_entry().layout.clone(),
            arguments: signature
                .arguments()
                .iter()
                .map(|entry| {
                    if entry.is_by_ref {
                        TypeLayout::pointer()
                    } else {
                        entry.layout.clone()
                    }
                })
                .collect(),
        }
    }

    /// Convention the call uses
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// Layout of the return value
    pub fn return_layout(&self) -> &TypeLayout {
        &self.return_layout
    }

    /// Argument layouts in call order
    pub fn arguments(&self) -> &[TypeLayout] {
        &self.arguments
    }
}

/// Reasons a call is refused before control leaves the engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("target address is null")]
    NullTarget,

    #[error("frame has {actual} slots, signature needs {expected}")]
    FrameMismatch { expected: usize, actual: usize },

    #[error("argument {index} cannot be passed: {reason}")]
    UnsupportedSlot { index: usize, reason: String },
}

impl From<CallError> for FuncEvalError {
    fn from(err: CallError) -> Self {
        FuncEvalError::InvocationRejected {
            reason: err.to_string(),
        }
    }
}

/// Calling-convention collaborator
pub trait CallConverter: Send + Sync {
    /// Call `address` with the arguments in `frame`, writing slot 0
    ///
    /// # Safety
    ///
    /// `address` must be the entry point of a function whose real signature
    /// matches `signature`, and every reference or pointer argument in the
    /// frame must be valid for that function. A fault inside the callee is
    /// not recoverable.
    unsafe fn invoke(
        &self,
        address: usize,
        signature: &DynamicCallSignature,
        frame: &mut CallFrame,
    ) -> Result<(), CallError>;
}

/// [`CallConverter`] backed by libffi
#[derive(Debug, Default, Clone, Copy)]
pub struct FfiCallConverter;

impl FfiCallConverter {
    pub fn new() -> Self {
        Self
    }
}

fn layout_to_ffi(layout: &TypeLayout) -> Type {
    match &layout.kind {
        LayoutKind::Void => Type::void(),
        LayoutKind::Primitive(element) => element_to_ffi(*element),
        LayoutKind::Reference | LayoutKind::Pointer => Type::pointer(),
        // libffi rejects empty structures; a one-byte value has the same ABI.
        LayoutKind::Struct(fields) if fields.is_empty() => Type::u8(),
        LayoutKind::Struct(fields) => {
            Type::structure(fields.iter().map(|field| layout_to_ffi(&field.layout)))
        }
    }
}

fn element_to_ffi(element: ElementType) -> Type {
    match element {
        ElementType::Void => Type::void(),
        ElementType::Boolean | ElementType::U1 => Type::u8(),
        ElementType::I1 => Type::i8(),
        ElementType::Char | ElementType::U2 => Type::u16(),
        ElementType::I2 => Type::i16(),
        ElementType::I4 => Type::i32(),
        ElementType::U4 => Type::u32(),
        ElementType::I8 => Type::i64(),
        ElementType::U8 => Type::u64(),
        ElementType::R4 => Type::f32(),
        ElementType::R8 => Type::f64(),
        ElementType::IntPtr => Type::isize(),
        ElementType::UIntPtr => Type::usize(),
        ElementType::String | ElementType::Object => Type::pointer(),
    }
}

/// Move a narrow integral result to the start of the return slot
///
/// libffi widens such results to a full register. On little-endian targets
/// the value already sits at offset 0.
fn normalize_return(layout: &TypeLayout, slot: &mut [u8]) {
    let LayoutKind::Primitive(element) = layout.kind else {
        return;
    };
    if !element.is_narrow_integral() || !cfg!(target_endian = "big") {
        return;
    }
    let width = std::mem::size_of::<usize>().min(slot.len());
    let size = layout.size;
    slot.copy_within(width - size..width, 0);
    slot[size..width].fill(0);
}

impl CallConverter for FfiCallConverter {
    unsafe fn invoke(
        &self,
        address: usize,
        signature: &DynamicCallSignature,
        frame: &mut CallFrame,
    ) -> Result<(), CallError> {
        if address == 0 {
            return Err(CallError::NullTarget);
        }
        let expected = signature.arguments.len() + 1;
        if frame.slot_count() != expected {
            return Err(CallError::FrameMismatch {
                expected,
                actual: frame.slot_count(),
            });
        }
        if let Some(index) = signature.arguments.iter().position(|a| a.is_void()) {
            return Err(CallError::UnsupportedSlot {
                index,
                reason: "void argument".to_string(),
            });
        }

        let cif = Cif::new(
            signature.arguments.iter().map(layout_to_ffi),
            layout_to_ffi(&signature.return_layout),
        );

        let slots = frame.slot_ptrs();
        let mut argument_ptrs: Vec<*mut c_void> =
            slots[1..].iter().map(|ptr| ptr.cast::<c_void>()).collect();
        let return_ptr = if signature.return_layout.is_void() {
            std::ptr::null_mut()
        } else {
            slots[0].cast::<c_void>()
        };

        trace!(
            address = %format!("{:#x}", address),
            arguments = argument_ptrs.len(),
            "invoking func-eval target"
        );

        // SAFETY: the caller guarantees `address` is a function matching
        // `signature`; argument and return pointers point into `frame`, which
        // outlives the call and has a pointer-sized or larger return slot.
        unsafe {
            let target: unsafe extern "C" fn() = std::mem::transmute(address);
            libffi::raw::ffi_call(
                cif.as_raw_ptr(),
                Some(target),
                return_ptr,
                argument_ptrs.as_mut_ptr(),
            );
        }

        normalize_return(&signature.return_layout, frame.slot_mut(0));
        Ok(())
    }
}
