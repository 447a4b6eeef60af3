//! Debugger wire formats
//!
//! Pure byte-level parsing: nothing here knows about types. The request
//! buffer is untrusted input, so every declared count is bounds-checked
//! before anything is allocated for it.

pub mod command;
pub mod request;
pub mod varint;

pub use command::{
    CompletionRecord, DebuggerCommand, COMMAND_SIZE, FUNC_EVAL_COMPLETE, FUNC_EVAL_FAILED,
    WRITE_PARAMETER_BUFFER,
};
pub use request::{FuncEvalRequest, RequestEncoder};
pub use varint::{WireReader, WireWriter};
