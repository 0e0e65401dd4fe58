//! Error types for script parsing, (de)serialization and execution

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptEngineError {
    #[error("Script parse error: {0}")]
    Parse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unexpected encoding: {0}")]
    UnexpectedEncoding(String),

    #[error("{opcode} requires {required} stack item(s)")]
    MissingOperands { opcode: String, required: usize },

    #[error("Attempted to execute disabled opcode {0}")]
    DisabledOpcode(String),

    #[error("Exceeded maximum of {0} non-push operations")]
    MaxOpCountExceeded(usize),

    #[error("Combined stack size {size} exceeds maximum of {max}")]
    MaxStackSizeExceeded { size: usize, max: usize },

    #[error("End of script reached inside an unterminated conditional")]
    UnterminatedConditional,

    #[error("Verification failed: {0}")]
    VerifyFailed(String),

    #[error("Unsupported opcode {0}")]
    UnsupportedOpcode(String),

    #[error("Input index {index} out of range for transaction with {count} input(s)")]
    InputIndexOutOfRange { index: usize, count: usize },

    #[error("No output at index {index} for SIGHASH_SINGLE (transaction has {count} output(s))")]
    OutputIndexOutOfRange { index: usize, count: usize },

    #[error("Invalid stack operation: {0}")]
    InvalidStackOperation(String),

    #[error("Push of {size} bytes exceeds maximum element size of {max}")]
    PushSize { size: usize, max: usize },

    #[error("{0} requires a spending transaction")]
    MissingTransaction(String),

    #[error("OP_RETURN encountered")]
    OpReturn,

    #[error("Lock time check failed: {0}")]
    LockTime(String),

    #[error("Signature error: {0}")]
    Signature(String),
}

impl ScriptEngineError {
    /// True for the signature-hash range failures, which must never be
    /// mistaken for a digest.
    pub fn is_sighash_range(&self) -> bool {
        matches!(
            self,
            ScriptEngineError::InputIndexOutOfRange { .. }
                | ScriptEngineError::OutputIndexOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScriptEngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_operands_message_names_opcode() {
        let err = ScriptEngineError::MissingOperands {
            opcode: "OP_ADD".to_string(),
            required: 2,
        };
        assert_eq!(err.to_string(), "OP_ADD requires 2 stack item(s)");
    }

    #[test]
    fn test_is_sighash_range() {
        assert!(ScriptEngineError::InputIndexOutOfRange { index: 3, count: 1 }.is_sighash_range());
        assert!(ScriptEngineError::OutputIndexOutOfRange { index: 1, count: 1 }.is_sighash_range());
        assert!(!ScriptEngineError::OpReturn.is_sighash_range());
    }
}
