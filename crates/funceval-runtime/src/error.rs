//! Func-eval error types
//!
//! Every error an evaluation can hit maps to a diagnostic code that travels
//! back to the debugger in a failure completion record. None of them take the
//! process down.

use thiserror::Error;

/// Errors produced while servicing a func-eval request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FuncEvalError {
    /// Structural violation in the parameter buffer or signature blob
    #[error("Malformed request at offset {offset}: {reason}")]
    MalformedRequest { offset: usize, reason: String },

    /// A referenced type could not be resolved or constructed
    #[error("Signature resolution failed: {reason}")]
    SignatureResolutionFailed { reason: String },

    /// Argument blob length disagrees with the resolved slot size
    #[error("Argument {index} is {actual} bytes, expected {expected}")]
    ArgumentSizeMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// Evaluation mode selector outside the known set
    #[error("Unsupported func-eval mode {0}")]
    UnsupportedMode(u32),

    /// The call was refused before control reached the target
    #[error("Invocation rejected: {reason}")]
    InvocationRejected { reason: String },

    /// Every handle identifier has been handed out
    #[error("Handle table exhausted")]
    HandleTableExhausted,

    /// `initialize` was called more than once
    #[error("Func-eval engine already initialized")]
    AlreadyInitialized,
}

impl FuncEvalError {
    /// Diagnostic code carried by a failure completion record
    pub fn diagnostic_code(&self) -> u32 {
        match self {
            FuncEvalError::MalformedRequest { .. } => 1,
            FuncEvalError::SignatureResolutionFailed { .. } => 2,
            FuncEvalError::ArgumentSizeMismatch { .. } => 3,
            FuncEvalError::UnsupportedMode(_) => 4,
            FuncEvalError::InvocationRejected { .. } => 5,
            FuncEvalError::HandleTableExhausted => 6,
            FuncEvalError::AlreadyInitialized => 7,
        }
    }

    /// Short name for a diagnostic code, as shown to users
    pub fn name_for_code(code: u32) -> Option<&'static str> {
        Some(match code {
            1 => "malformed request",
            2 => "signature resolution failed",
            3 => "argument size mismatch",
            4 => "unsupported mode",
            5 => "invocation rejected",
            6 => "handle table exhausted",
            7 => "already initialized",
            _ => return None,
        })
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        FuncEvalError::MalformedRequest {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn unresolved(reason: impl Into<String>) -> Self {
        FuncEvalError::SignatureResolutionFailed {
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the engine
pub type FuncEvalResult<T> = Result<T, FuncEvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_codes_are_distinct() {
        let errors = [
            FuncEvalError::malformed(0, "x"),
            FuncEvalError::unresolved("x"),
            FuncEvalError::ArgumentSizeMismatch {
                index: 0,
                expected: 4,
                actual: 2,
            },
            FuncEvalError::UnsupportedMode(9),
            FuncEvalError::InvocationRejected {
                reason: "x".to_string(),
            },
            FuncEvalError::HandleTableExhausted,
            FuncEvalError::AlreadyInitialized,
        ];

        let mut codes: Vec<u32> = errors.iter().map(|e| e.diagnostic_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
        for error in &errors {
            assert!(FuncEvalError::name_for_code(error.diagnostic_code()).is_some());
        }
        assert_eq!(FuncEvalError::name_for_code(0), None);
    }

    #[test]
    fn test_display_messages() {
        let err = FuncEvalError::ArgumentSizeMismatch {
            index: 1,
            expected: 8,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Argument 1 is 4 bytes, expected 8");
        assert_eq!(
            FuncEvalError::UnsupportedMode(7).to_string(),
            "Unsupported func-eval mode 7"
        );
    }
}
