//! funceval runtime - debugger-driven function evaluation
//!
//! This library lets a debugger run a method inside a suspended process:
//! - Decoding the debugger's varint request buffer
//! - Resolving the method signature, building missing types under one lock
//! - Laying out a call frame and invoking the target address
//! - Boxing the result and pinning it behind a debugger-owned handle

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod engine;
pub mod error;
pub mod frame;
pub mod handles;
pub mod host;
pub mod invoke;
pub mod journal;
pub mod types;
pub mod wire;

pub use engine::{
    func_eval_helper, initialize, installed, EvalPhase, FuncEvalEngine, FuncEvalMode,
};
pub use error::{FuncEvalError, FuncEvalResult};
pub use frame::{CallFrame, FrameSlot};
pub use handles::{HandleId, HandleRegistry, HandleTable, ManagedValue, ValuePayload};
pub use host::DebuggerHost;
pub use invoke::{
    CallConverter, CallError, CallingConvention, DynamicCallSignature, FfiCallConverter,
};
pub use journal::{EvalEvent, EvalJournal, JournalEntry, MemoryJournal, NullJournal};
pub use types::{
    ElementType, ResolvedSignature, SignatureBuilder, SignatureEntry, SignatureResolver,
    SignatureShape, TypeDefinition, TypeDesc, TypeHandle, TypeLayout, TypeLoader, TypeResolver,
};
pub use wire::{CompletionRecord, DebuggerCommand, FuncEvalRequest, RequestEncoder};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
