//! Network-specific opcode handlers
//!
//! An override replaces the built-in behaviour of one opcode value. It gets
//! the live stacks plus the spending context and performs its own operand
//! validation. Handlers are plain `fn` pointers registered by name so that a
//! profile configuration can refer to them.

use crate::constants::*;
use crate::error::{Result, ScriptEngineError};
use crate::opcodes::OpcodeOverride;
use crate::scriptnum::decode_num;
use crate::transaction::Transaction;
use crate::types::{ByteString, ExecutionContext};

use num_traits::{Signed, ToPrimitive};

/// Override handler: mutates the stacks in place and returns the step's log line
pub type OpcodeHandler = fn(&mut OverrideContext<'_>) -> Result<String>;

/// Everything an override may inspect or change while executing one opcode
pub struct OverrideContext<'a> {
    pub opcode: u8,
    /// Mnemonic under the active profile
    pub name: &'a str,
    pub stack: &'a mut Vec<ByteString>,
    pub altstack: &'a mut Vec<ByteString>,
    pub tx: Option<&'a Transaction>,
    pub input_index: usize,
    pub flags: u32,
    pub context: Option<&'a ExecutionContext>,
}

impl OverrideContext<'_> {
    /// Fail with `MissingOperands` unless at least `required` items are on the stack
    pub fn require(&self, required: usize) -> Result<()> {
        if self.stack.len() < required {
            return Err(ScriptEngineError::MissingOperands {
                opcode: self.name.to_string(),
                required,
            });
        }
        Ok(())
    }

    pub fn transaction(&self) -> Result<&Transaction> {
        self.tx
            .ok_or_else(|| ScriptEngineError::MissingTransaction(self.name.to_string()))
    }

    /// Top stack item as a non-negative number of at most 5 bytes
    fn top_lock_value(&self) -> Result<i64> {
        self.require(1)?;
        let top = &self.stack[self.stack.len() - 1];
        if top.len() > 5 {
            return Err(ScriptEngineError::InvalidStackOperation(format!(
                "{} operand is {} bytes, at most 5 allowed",
                self.name,
                top.len()
            )));
        }
        let value = decode_num(top);
        if value.is_negative() {
            return Err(ScriptEngineError::LockTime(format!("negative operand to {}", self.name)));
        }
        value
            .to_i64()
            .ok_or_else(|| ScriptEngineError::LockTime(format!("operand to {} out of range", self.name)))
    }
}

/// Names accepted in profile configurations
pub const HANDLER_NAMES: &[&str] = &["check_lock_time_verify", "check_sequence_verify", "nop"];

/// Resolve a registered handler by name
pub fn handler_by_name(name: &str) -> Option<OpcodeOverride> {
    let (handler_name, handler): (&'static str, OpcodeHandler) = match name {
        "check_lock_time_verify" => ("check_lock_time_verify", check_lock_time_verify),
        "check_sequence_verify" => ("check_sequence_verify", check_sequence_verify),
        "nop" => ("nop", nop),
        _ => return None,
    };
    Some(OpcodeOverride {
        handler_name,
        handler,
    })
}

/// Does nothing; turns an opcode into a NOP on networks that never activated it
pub fn nop(ctx: &mut OverrideContext<'_>) -> Result<String> {
    Ok(format!("{}: no operation", ctx.name))
}

/// CheckLockTimeVerify (BIP 65): ℤ × 𝒯𝒳 × ℕ → {continue, fail}
///
/// With n the top stack item (left in place):
/// 1. n ≥ 0 and fits in 5 bytes
/// 2. n and tx.lock_time are both heights or both timestamps
/// 3. n ≤ tx.lock_time
/// 4. the input's sequence is not final
/// 5. if an execution context is supplied, tx.lock_time has been reached
///    at its block height (or time)
///
/// Without `VERIFY_CHECKLOCKTIMEVERIFY` the opcode is a NOP.
pub fn check_lock_time_verify(ctx: &mut OverrideContext<'_>) -> Result<String> {
    if ctx.flags & VERIFY_CHECKLOCKTIMEVERIFY == 0 {
        return Ok(format!("{}: not enforced, treated as NOP", ctx.name));
    }

    // 1. Operand
    let lock_time = ctx.top_lock_value()?;
    let tx = ctx.transaction()?;
    let tx_lock_time = tx.lock_time() as i64;
    let threshold = LOCKTIME_THRESHOLD as i64;

    // 2. Same kind of lock
    if (lock_time < threshold) != (tx_lock_time < threshold) {
        return Err(ScriptEngineError::LockTime(format!(
            "lock time {} and transaction lock time {} are of different types",
            lock_time, tx_lock_time
        )));
    }

    // 3. Not in the future relative to the transaction
    if lock_time > tx_lock_time {
        return Err(ScriptEngineError::LockTime(format!(
            "lock time {} exceeds transaction lock time {}",
            lock_time, tx_lock_time
        )));
    }

    // 4. A final sequence disables nLockTime
    if tx.input_sequence(ctx.input_index)? == SEQUENCE_FINAL {
        return Err(ScriptEngineError::LockTime(format!(
            "input {} has a final sequence",
            ctx.input_index
        )));
    }

    // 5. Chain state
    if let Some(chain) = ctx.context {
        let (reached, unit) = if tx_lock_time < threshold {
            (chain.block_height as i64, "block height")
        } else {
            (chain.block_time as i64, "block time")
        };
        if tx_lock_time > reached {
            return Err(ScriptEngineError::LockTime(format!(
                "transaction lock time {} not reached at {} {}",
                tx_lock_time, unit, reached
            )));
        }
    }

    Ok(format!("{}: lock time {} satisfied", ctx.name, lock_time))
}

/// CheckSequenceVerify (BIP 112): ℤ × 𝒯𝒳 → {continue, fail}
///
/// With n the top stack item (left in place):
/// 1. n ≥ 0 and fits in 5 bytes
/// 2. if n has the disable flag set, continue as a NOP
/// 3. tx.version ≥ 2 and the input's sequence does not have the disable flag
/// 4. n and the input's sequence are of the same type (blocks or time)
/// 5. masked n ≤ masked sequence
pub fn check_sequence_verify(ctx: &mut OverrideContext<'_>) -> Result<String> {
    if ctx.flags & VERIFY_CHECKSEQUENCEVERIFY == 0 {
        return Ok(format!("{}: not enforced, treated as NOP", ctx.name));
    }

    // 1. Operand
    let sequence = ctx.top_lock_value()?;

    // 2. Disabled relative lock
    if sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 != 0 {
        return Ok(format!("{}: relative lock disabled", ctx.name));
    }

    // 3. Transaction must opt in
    let tx = ctx.transaction()?;
    if tx.version() < 2 {
        return Err(ScriptEngineError::LockTime(format!(
            "transaction version {} does not support relative lock time",
            tx.version()
        )));
    }
    let tx_sequence = tx.input_sequence(ctx.input_index)?;
    if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
        return Err(ScriptEngineError::LockTime(format!(
            "input {} has relative lock time disabled",
            ctx.input_index
        )));
    }

    // 4. Same type
    let sequence = sequence as u32;
    let mask = SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
    let (required, actual) = (sequence & mask, tx_sequence & mask);
    if (required & SEQUENCE_LOCKTIME_TYPE_FLAG) != (actual & SEQUENCE_LOCKTIME_TYPE_FLAG) {
        return Err(ScriptEngineError::LockTime(
            "relative lock time types differ".to_string(),
        ));
    }

    // 5. Value
    if required > actual {
        return Err(ScriptEngineError::LockTime(format!(
            "relative lock time {} exceeds input sequence {}",
            required & SEQUENCE_LOCKTIME_MASK,
            actual & SEQUENCE_LOCKTIME_MASK
        )));
    }

    Ok(format!("{}: sequence {} satisfied", ctx.name, sequence))
}
