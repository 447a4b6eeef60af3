//! Command command - explain a 16-byte command record

use crate::hex;
use anyhow::{bail, Result};
use funceval_runtime::wire::COMMAND_SIZE;
use funceval_runtime::{CompletionRecord, DebuggerCommand, FuncEvalError};

/// Human-readable description of a command record
pub fn describe(command: &DebuggerCommand) -> String {
    match command {
        DebuggerCommand::WriteParameterBuffer { buffer_address } => {
            format!("write parameter buffer at {:#x}", buffer_address)
        }
        DebuggerCommand::Completion(CompletionRecord::Completed { handle: 0, .. }) => {
            "func-eval complete: null result".to_string()
        }
        DebuggerCommand::Completion(CompletionRecord::Completed { handle, address }) => {
            format!("func-eval complete: handle {} at {:#x}", handle, address)
        }
        DebuggerCommand::Completion(CompletionRecord::Failed { code }) => {
            format!("func-eval failed: {} ({})", code, error_name(*code))
        }
    }
}

fn error_name(code: u32) -> &'static str {
    FuncEvalError::name_for_code(code).unwrap_or("unknown")
}

/// Decode and print the record given as hex
pub fn run(record: &str, json: bool) -> Result<()> {
    let bytes = hex::decode(record)?;
    if bytes.len() != COMMAND_SIZE {
        bail!(
            "command records are {} bytes, got {}",
            COMMAND_SIZE,
            bytes.len()
        );
    }
    let command = DebuggerCommand::from_bytes(&bytes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&command)?);
    } else {
        println!("{}", describe(&command));
    }
    Ok(())
}
