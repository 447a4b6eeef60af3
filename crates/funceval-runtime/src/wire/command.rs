//! Fixed-shape 16-byte records exchanged with the debugger
//!
//! All fields are little endian:
//!
//! ```text
//! offset 0   i32  command code
//! offset 4   u32  reserved | handle identifier | diagnostic code
//! offset 8   i64  buffer address | storage address | zero
//! ```

use crate::error::{FuncEvalError, FuncEvalResult};
use serde::Serialize;

/// Size in bytes of every command record
pub const COMMAND_SIZE: usize = 16;

/// Command code: evaluation produced a result (or null)
pub const FUNC_EVAL_COMPLETE: i32 = 0;
/// Command code: debugger should fill the parameter buffer
pub const WRITE_PARAMETER_BUFFER: i32 = 1;
/// Command code: evaluation failed, second field carries a diagnostic code
pub const FUNC_EVAL_FAILED: i32 = 2;

/// Record the engine sends back when an evaluation ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CompletionRecord {
    /// Result registered under `handle`, or `(0, 0)` for a null/void result
    Completed { handle: u32, address: u64 },
    /// Evaluation was abandoned; see [`FuncEvalError::diagnostic_code`]
    Failed { code: u32 },
}

impl CompletionRecord {
    /// Completion for a null or void result
    pub const NULL: CompletionRecord = CompletionRecord::Completed {
        handle: 0,
        address: 0,
    };

    /// Failure record for an error
    pub fn failed(error: &FuncEvalError) -> Self {
        CompletionRecord::Failed {
            code: error.diagnostic_code(),
        }
    }

    /// Handle identifier, zero for null results and failures
    pub fn handle(&self) -> u32 {
        match self {
            CompletionRecord::Completed { handle, .. } => *handle,
            CompletionRecord::Failed { .. } => 0,
        }
    }

    /// Encode as the 16-byte wire record
    pub fn to_bytes(&self) -> [u8; COMMAND_SIZE] {
        match *self {
            CompletionRecord::Completed { handle, address } => {
                encode_record(FUNC_EVAL_COMPLETE, handle, address)
            }
            CompletionRecord::Failed { code } => encode_record(FUNC_EVAL_FAILED, code, 0),
        }
    }
}

/// Any record that crosses the debugger boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DebuggerCommand {
    /// Ask the debugger to write request bytes at `buffer_address`
    WriteParameterBuffer { buffer_address: u64 },
    /// Evaluation finished
    Completion(CompletionRecord),
}

impl DebuggerCommand {
    /// Encode as the 16-byte wire record
    pub fn to_bytes(&self) -> [u8; COMMAND_SIZE] {
        match self {
            DebuggerCommand::WriteParameterBuffer { buffer_address } => {
                encode_record(WRITE_PARAMETER_BUFFER, 0, *buffer_address)
            }
            DebuggerCommand::Completion(record) => record.to_bytes(),
        }
    }

    /// Decode a 16-byte wire record
    pub fn from_bytes(bytes: &[u8]) -> FuncEvalResult<Self> {
        let record: &[u8; COMMAND_SIZE] = bytes.try_into().map_err(|_| {
            FuncEvalError::malformed(
                bytes.len().min(COMMAND_SIZE),
                format!("command record is {} bytes, expected {}", bytes.len(), COMMAND_SIZE),
            )
        })?;

        let mut code = [0u8; 4];
        code.copy_from_slice(&record[0..4]);
        let mut field = [0u8; 4];
        field.copy_from_slice(&record[4..8]);
        let mut address = [0u8; 8];
        address.copy_from_slice(&record[8..16]);

        let field = u32::from_le_bytes(field);
        let address = i64::from_le_bytes(address) as u64;

        match i32::from_le_bytes(code) {
            FUNC_EVAL_COMPLETE => Ok(DebuggerCommand::Completion(CompletionRecord::Completed {
                handle: field,
                address,
            })),
            WRITE_PARAMETER_BUFFER => Ok(DebuggerCommand::WriteParameterBuffer {
                buffer_address: address,
            }),
            FUNC_EVAL_FAILED => Ok(DebuggerCommand::Completion(CompletionRecord::Failed {
                code: field,
            })),
            other => Err(FuncEvalError::malformed(
                0,
                format!("unknown command code {}", other),
            )),
        }
    }
}

fn encode_record(code: i32, field: u32, address: u64) -> [u8; COMMAND_SIZE] {
    let mut out = [0u8; COMMAND_SIZE];
    out[0..4].copy_from_slice(&code.to_le_bytes());
    out[4..8].copy_from_slice(&field.to_le_bytes());
    out[8..16].copy_from_slice(&(address as i64).to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_parameter_layout() {
        let bytes = DebuggerCommand::WriteParameterBuffer {
            buffer_address: 0x1000,
        }
        .to_bytes();

        assert_eq!(&bytes[0..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &0x1000i64.to_le_bytes());
    }

    #[test]
    fn test_completion_layout() {
        let bytes = CompletionRecord::Completed {
            handle: 5,
            address: 0xdead_beef,
        }
        .to_bytes();

        assert_eq!(&bytes[0..4], &0i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &5u32.to_le_bytes());
        assert_eq!(&bytes[8..16], &0xdead_beefi64.to_le_bytes());
    }

    #[test]
    fn test_null_completion_is_all_zero() {
        assert_eq!(CompletionRecord::NULL.to_bytes(), [0u8; COMMAND_SIZE]);
    }

    #[test]
    fn test_failure_distinct_from_null() {
        let failed = CompletionRecord::failed(&FuncEvalError::UnsupportedMode(3));
        let bytes = failed.to_bytes();
        assert_eq!(&bytes[0..4], &2i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
        assert_ne!(bytes, CompletionRecord::NULL.to_bytes());
    }

    #[test]
    fn test_decode_round_trip() {
        let record = CompletionRecord::Failed { code: 3 };
        let decoded = DebuggerCommand::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(decoded, DebuggerCommand::Completion(record));
    }

    #[test]
    fn test_decode_rejects_short_record() {
        assert!(DebuggerCommand::from_bytes(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_code() {
        let mut bytes = [0u8; COMMAND_SIZE];
        bytes[0] = 9;
        assert!(DebuggerCommand::from_bytes(&bytes).is_err());
    }
}
