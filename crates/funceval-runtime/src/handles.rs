//! Boxed results and the debugger-owned handle table
//!
//! Once a value is registered only the debugger decides when it goes away.
//! Nothing in the engine removes entries; [`HandleRegistry::release`] exists
//! for the external release command.

use crate::error::{FuncEvalError, FuncEvalResult};
use crate::types::{LayoutKind, TypeHandle, TypeLayout, POINTER_SIZE};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Identifier of a pinned value; zero is never issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HandleId(u32);

impl HandleId {
    /// Wrap a raw identifier received from the debugger
    pub const fn from_raw(raw: u32) -> Self {
        HandleId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Heap representation of a value, carrying its own type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedValue {
    ty: TypeHandle,
    payload: ValuePayload,
}

/// What a boxed value holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuePayload {
    /// Copy of a value type's bytes
    Bytes(Vec<u8>),
    /// Non-null object reference
    Reference(u64),
    /// String contents as UTF-16 code units
    Text(Vec<u16>),
}

impl ManagedValue {
    pub fn new(ty: TypeHandle, payload: ValuePayload) -> Self {
        Self { ty, payload }
    }

    /// String value from text
    pub fn string(ty: TypeHandle, text: &str) -> Self {
        Self::new(ty, ValuePayload::Text(text.encode_utf16().collect()))
    }

    /// Box a return slot according to the return layout
    ///
    /// Void and null references produce no value. Value types always box,
    /// whatever their bytes.
    pub fn from_return_slot(ty: TypeHandle, layout: &TypeLayout, slot: &[u8]) -> Option<Self> {
        match layout.kind {
            LayoutKind::Void => None,
            LayoutKind::Reference => {
                let mut raw = [0u8; POINTER_SIZE];
                raw.copy_from_slice(&slot[..POINTER_SIZE]);
                match usize::from_ne_bytes(raw) {
                    0 => None,
                    address => Some(Self::new(ty, ValuePayload::Reference(address as u64))),
                }
            }
            LayoutKind::Primitive(_) | LayoutKind::Pointer | LayoutKind::Struct(_) => Some(
                Self::new(ty, ValuePayload::Bytes(slot[..layout.size].to_vec())),
            ),
        }
    }

    /// Type of the value
    pub fn ty(&self) -> TypeHandle {
        self.ty
    }

    pub fn payload(&self) -> &ValuePayload {
        &self.payload
    }

    /// Decoded text for string values
    pub fn as_text(&self) -> Option<String> {
        match &self.payload {
            ValuePayload::Text(units) => String::from_utf16(units).ok(),
            _ => None,
        }
    }

    /// Raw bytes for boxed value types
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            ValuePayload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Address the debugger reads the value from
    ///
    /// Value bytes and string units live in their own heap allocation, which
    /// stays put for as long as the value is registered.
    pub fn storage_address(&self) -> u64 {
        match &self.payload {
            ValuePayload::Bytes(bytes) => bytes.as_ptr() as u64,
            ValuePayload::Reference(address) => *address,
            ValuePayload::Text(units) => units.as_ptr() as u64,
        }
    }
}

/// Handle-registry collaborator
pub trait HandleRegistry: Send + Sync {
    /// Pin `value`, returning its identifier and storage address
    fn register(&self, value: ManagedValue) -> FuncEvalResult<(HandleId, u64)>;

    /// Copy of a registered value
    fn get(&self, id: HandleId) -> Option<ManagedValue>;

    /// Unpin a value; only ever called on the debugger's request
    fn release(&self, id: HandleId) -> Option<ManagedValue>;

    /// Number of pinned values
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide [`HandleRegistry`]
///
/// Identifiers are allocated atomically and increase monotonically, so a
/// released identifier is never handed out again.
#[derive(Debug)]
pub struct HandleTable {
    entries: DashMap<u32, Box<ManagedValue>>,
    next_id: AtomicU32,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first: u32) -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU32::new(first.max(1)),
        }
    }

    fn allocate(&self) -> FuncEvalResult<u32> {
        self.next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| id.checked_add(1))
            .map_err(|_| FuncEvalError::HandleTableExhausted)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry for HandleTable {
    fn register(&self, value: ManagedValue) -> FuncEvalResult<(HandleId, u64)> {
        let id = self.allocate()?;
        let value = Box::new(value);
        let address = value.storage_address();
        self.entries.insert(id, value);
        debug!(handle = id, address = %format!("{:#x}", address), "pinned value");
        Ok((HandleId(id), address))
    }

    fn get(&self, id: HandleId) -> Option<ManagedValue> {
        self.entries.get(&id.0).map(|entry| (**entry).clone())
    }

    fn release(&self, id: HandleId) -> Option<ManagedValue> {
        let released = self.entries.remove(&id.0).map(|(_, value)| *value);
        if released.is_some() {
            debug!(handle = id.0, "released value");
        }
        released
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
