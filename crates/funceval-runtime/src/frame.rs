//! Call frame construction
//!
//! A frame is one contiguous, 8-byte aligned scratch region holding a slot
//! per signature entry. Slot 0 receives the return value; the remaining
//! slots hold the receiver and arguments in call order, copied verbatim from
//! the request blobs.

use crate::error::{FuncEvalError, FuncEvalResult};
use crate::types::{align_up, LayoutKind, ResolvedSignature, SignatureEntry, POINTER_SIZE};

const SLOT_ALIGN: usize = 8;

/// Position of one slot inside the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    /// Byte offset from the frame start
    pub offset: usize,
    /// Number of meaningful bytes
    pub size: usize,
}

/// Scratch region shaped for one call
#[derive(Debug)]
pub struct CallFrame {
    storage: Vec<u64>,
    slots: Vec<FrameSlot>,
}

/// Bytes an argument blob must have for `entry`
///
/// References, pointers and by-ref slots are always a machine pointer; value
/// types carry their full layout size.
pub fn expected_size(entry: &SignatureEntry) -> usize {
    if entry.is_by_ref {
        return POINTER_SIZE;
    }
    match entry.layout.kind {
        LayoutKind::Reference | LayoutKind::Pointer => POINTER_SIZE,
        _ => entry.layout.size,
    }
}

impl CallFrame {
    /// Lay out a frame for `signature` and copy `parameters` into it
    pub fn build(signature: &ResolvedSignature, parameters: &[Vec<u8>]) -> FuncEvalResult<Self> {
        let arguments = signature.arguments();
        if arguments.len() != parameters.len() {
            return Err(FuncEvalError::malformed(
                0,
                format!(
                    "{} argument slots for {} parameters",
                    arguments.len(),
                    parameters.len()
                ),
            ));
        }

        for (index, (entry, blob)) in arguments.iter().zip(parameters).enumerate() {
            let expected = expected_size(entry);
            if blob.len() != expected {
                return Err(FuncEvalError::ArgumentSizeMismatch {
                    index,
                    expected,
                    actual: blob.len(),
                });
            }
        }

        // Narrow integral returns are widened by the callee, so the return
        // slot is never smaller than a register.
        let return_layout = &signature.return_entry().layout;
        let mut slots = Vec::with_capacity(signature.entries().len());
        slots.push(FrameSlot {
            offset: 0,
            size: return_layout.size.max(POINTER_SIZE),
        });
        let mut end = align_up(slots[0].size, SLOT_ALIGN);

        for entry in arguments {
            let align = entry.layout.align.max(SLOT_ALIGN);
            let offset = align_up(end, align);
            let size = expected_size(entry);
            slots.push(FrameSlot { offset, size });
            end = align_up(offset + size, SLOT_ALIGN);
        }

        let mut frame = Self {
            storage: vec![0u64; end / SLOT_ALIGN],
            slots,
        };
        for (index, blob) in parameters.iter().enumerate() {
            frame.slot_mut(index + 1).copy_from_slice(blob);
        }
        Ok(frame)
    }

    /// Total frame size in bytes
    pub fn size(&self) -> usize {
        self.storage.len() * SLOT_ALIGN
    }

    /// Number of slots, return slot included
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot placement
    pub fn layout(&self) -> &[FrameSlot] {
        &self.slots
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: u64 storage is valid for reads as bytes for its full length.
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr().cast::<u8>(), self.size()) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let size = self.size();
        // SAFETY: as above; the exclusive borrow covers the whole storage.
        unsafe { std::slice::from_raw_parts_mut(self.storage.as_mut_ptr().cast::<u8>(), size) }
    }

    /// Bytes of slot `index`
    pub fn slot(&self, index: usize) -> &[u8] {
        let FrameSlot { offset, size } = self.slots[index];
        &self.bytes()[offset..offset + size]
    }

    /// Mutable bytes of slot `index`
    pub fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        let FrameSlot { offset, size } = self.slots[index];
        &mut self.bytes_mut()[offset..offset + size]
    }

    /// Return slot contents
    pub fn return_slot(&self) -> &[u8] {
        self.slot(0)
    }

    /// Raw pointers to every slot, return slot first
    ///
    /// The pointers stay valid while the frame is neither moved nor dropped.
    pub fn slot_ptrs(&mut self) -> Vec<*mut u8> {
        let base = self.storage.as_mut_ptr().cast::<u8>();
        self.slots
            .iter()
            // SAFETY: every slot offset lies inside the storage allocation.
            .map(|slot| unsafe { base.add(slot.offset) })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementType, TypeHandle, TypeLayout};
    use pretty_assertions::assert_eq;

    fn entry(layout: TypeLayout) -> SignatureEntry {
        SignatureEntry {
            handle: TypeHandle::from_raw(1),
            layout,
            is_by_ref: false,
            is_this: false,
        }
    }

    fn signature(ret: TypeLayout, args: Vec<TypeLayout>) -> ResolvedSignature {
        ResolvedSignature::new(
            std::iter::once(ret)
                .chain(args)
                .map(entry)
                .collect(),
        )
    }

    #[test]
    fn test_slots_are_eight_aligned() {
        let sig = signature(
            ElementType::I4.layout(),
            vec![
                ElementType::U1.layout(),
                ElementType::R8.layout(),
                TypeLayout::structure(vec![ElementType::I4.layout(); 3]),
            ],
        );
        let params = vec![vec![7], 1.5f64.to_le_bytes().to_vec(), vec![0xaa; 12]];
        let frame = CallFrame::build(&sig, &params).unwrap();

        let offsets: Vec<usize> = frame.layout().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16, 24]);
        assert_eq!(frame.size(), 40);
        assert_eq!(frame.slot(1), &[7u8]);
        assert_eq!(frame.slot(2), &1.5f64.to_le_bytes());
        assert_eq!(frame.slot(3), &[0xaau8; 12]);
    }

    #[test]
    fn test_return_slot_zeroed_and_widened() {
        let sig = signature(ElementType::U1.layout(), vec![]);
        let frame = CallFrame::build(&sig, &[]).unwrap();
        assert_eq!(frame.return_slot(), &[0u8; POINTER_SIZE][..]);
    }

    #[test]
    fn test_size_mismatch_reports_index() {
        let sig = signature(
            ElementType::Void.layout(),
            vec![ElementType::I4.layout(), ElementType::I8.layout()],
        );
        let err = CallFrame::build(&sig, &[vec![0; 4], vec![0; 4]]).unwrap_err();
        assert_eq!(
            err,
            FuncEvalError::ArgumentSizeMismatch {
                index: 1,
                expected: 8,
                actual: 4
            }
        );
    }

    #[test]
    fn test_by_ref_slot_is_pointer_sized() {
        let mut by_ref = entry(TypeLayout::structure(vec![ElementType::I8.layout(); 4]));
        by_ref.is_by_ref = true;
        let sig = ResolvedSignature::new(vec![entry(ElementType::Void.layout()), by_ref]);

        assert!(CallFrame::build(&sig, &[vec![0; 32]]).is_err());
        assert!(CallFrame::build(&sig, &[vec![0; POINTER_SIZE]]).is_ok());
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let sig = signature(ElementType::Void.layout(), vec![ElementType::I4.layout()]);
        assert!(matches!(
            CallFrame::build(&sig, &[]),
            Err(FuncEvalError::MalformedRequest { .. })
        ));
    }
}
