//! Runtime hooks the engine relies on
//!
//! The suspended process exposes these to the engine; the debugger sits on
//! the other side of `send_custom_event` and `complete_func_eval`.

use crate::wire::COMMAND_SIZE;

/// Surrounding runtime, as seen by the func-eval engine
pub trait DebuggerHost: Send + Sync {
    /// Size of the buffer the debugger expects to fill
    fn parameter_buffer_size(&self) -> usize;

    /// Deliver a 16-byte record to the debugger
    ///
    /// For a write-parameter-buffer record the debugger fills the named
    /// buffer before this returns.
    fn send_custom_event(&self, record: &[u8; COMMAND_SIZE]);

    /// Raw evaluation mode selector for the current evaluation
    fn func_eval_mode(&self) -> u32;

    /// Code address the debugger resolved for the current evaluation
    fn func_eval_target_address(&self) -> usize;

    /// Record the entry point the debugger-notification path should call
    fn register_func_eval_helper(&self, helper: usize);

    /// Hand the completion record to the debugger and give up control
    ///
    /// Execution resumes wherever the debugger redirects it, never at the
    /// caller.
    fn complete_func_eval(&self, record: &[u8; COMMAND_SIZE]) -> !;
}
