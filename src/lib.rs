//! # Script-Engine
//!
//! Script execution engine and schema-driven binary codec for Bitcoin-family
//! networks.
//!
//! ## Architecture
//!
//! - Field schemas describe every entity's wire layout (outpoints, inputs,
//!   outputs, transactions, headers, blocks)
//! - Records hold field values and (de)serialize themselves from their schema
//! - A resumable interpreter executes scripts one instruction at a time
//! - Verification chains scriptSig → scriptPubKey → P2SH redeem script
//! - A network profile swaps schemas and opcode table as one unit
//!
//! ## Design Principles
//!
//! 1. **Explicit Profiles**: no global active network; every call takes a profile
//! 2. **Observable Execution**: every step yields a full stack snapshot
//! 3. **No Panics on Input**: malformed bytes and scripts are errors, never crashes
//! 4. **Exact Version Pinning**: crypto dependencies pinned to exact versions
//!
//! ## Usage
//!
//! ```rust
//! use script_engine::ScriptEngine;
//!
//! let engine = ScriptEngine::bitcoin();
//! let script = engine.parse_script("2 3 OP_ADD 5 OP_EQUAL").unwrap();
//! let execution = engine.evaluate(&script);
//! assert!(execution.script_passed);
//! assert_eq!(execution.steps.len(), 5);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod opcodes;
pub mod overrides;
pub mod schema;
pub mod codec;
pub mod transaction;
pub mod block;
pub mod script;
pub mod scriptnum;
pub mod sighash;
pub mod interpreter;
pub mod execution;
pub mod network;

use std::sync::Arc;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{Result, ScriptEngineError};
pub use block::{Block, BlockHeader};
pub use codec::{FieldValue, Record};
pub use execution::{ScriptExecution, SpendContext};
pub use interpreter::{ExecutionPhase, ExecutionStep, Interpreter, StepOutcome};
pub use network::{NetworkProfile, ProfileConfig};
pub use opcodes::OpcodeTable;
pub use schema::{EntityKind, FieldDescriptor, FieldEncoding, Schema, SchemaSet};
pub use script::Script;
pub use sighash::SighashType;
pub use transaction::Transaction;

/// Engine bound to one network profile
///
/// # Examples
///
/// ```
/// use script_engine::{ScriptEngine, SpendContext, SEQUENCE_FINAL};
///
/// let engine = ScriptEngine::bitcoin();
///
/// // Spend an output locked by "OP_ADD 5 OP_EQUAL"
/// let mut tx = engine.new_transaction();
/// let script_sig = engine.parse_script("2 3").unwrap();
/// tx.add_input([7u8; 32], 0, script_sig, SEQUENCE_FINAL).unwrap();
///
/// let script_pubkey = engine.parse_script("OP_ADD 5 OP_EQUAL").unwrap();
/// let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
/// assert!(execution.is_valid());
/// ```
#[derive(Debug, Clone)]
pub struct ScriptEngine {
    profile: Arc<NetworkProfile>,
}

impl ScriptEngine {
    /// Create an engine for a profile
    ///
    /// # Examples
    ///
    /// ```
    /// use script_engine::{NetworkProfile, ScriptEngine};
    ///
    /// let engine = ScriptEngine::new(NetworkProfile::clams());
    /// assert_eq!(engine.profile().name(), "clams");
    /// ```
    pub fn new(profile: NetworkProfile) -> Self {
        Self {
            profile: Arc::new(profile),
        }
    }

    /// Share an already built profile
    pub fn with_profile(profile: Arc<NetworkProfile>) -> Self {
        Self { profile }
    }

    pub fn bitcoin() -> Self {
        Self::new(NetworkProfile::bitcoin())
    }

    pub fn clams() -> Self {
        Self::new(NetworkProfile::clams())
    }

    pub fn profile(&self) -> &Arc<NetworkProfile> {
        &self.profile
    }

    /// Parse script text using the profile's opcode names
    ///
    /// # Examples
    ///
    /// ```
    /// use script_engine::ScriptEngine;
    ///
    /// let engine = ScriptEngine::bitcoin();
    /// let script = engine.parse_script("OP_DUP OP_HASH160").unwrap();
    /// assert_eq!(script.as_bytes(), &[0x76, 0xa9]);
    /// assert_eq!(engine.format_script(&script).unwrap(), "OP_DUP OP_HASH160");
    /// ```
    pub fn parse_script(&self, text: &str) -> Result<Script> {
        self.profile.parse_script(text)
    }

    pub fn format_script(&self, script: &Script) -> Result<String> {
        self.profile.format_script(script)
    }

    pub fn new_transaction(&self) -> Transaction {
        self.profile.new_transaction()
    }

    /// Decode a transaction with the profile's schemas
    ///
    /// # Examples
    ///
    /// ```
    /// use script_engine::ScriptEngine;
    ///
    /// let engine = ScriptEngine::bitcoin();
    /// let tx = engine.new_transaction();
    /// let bytes = tx.serialize();
    /// assert_eq!(engine.deserialize_transaction(&bytes).unwrap(), tx);
    /// ```
    pub fn deserialize_transaction(&self, bytes: &[u8]) -> Result<Transaction> {
        self.profile.deserialize_transaction(bytes)
    }

    pub fn deserialize_header(&self, bytes: &[u8]) -> Result<BlockHeader> {
        self.profile.deserialize_header(bytes)
    }

    pub fn deserialize_block(&self, bytes: &[u8]) -> Result<Block> {
        self.profile.deserialize_block(bytes)
    }

    /// Single-stepping interpreter over `script`
    ///
    /// # Examples
    ///
    /// ```
    /// use script_engine::{ScriptEngine, StepOutcome};
    ///
    /// let engine = ScriptEngine::bitcoin();
    /// let script = engine.parse_script("1 OP_DUP").unwrap();
    /// let mut interpreter = engine.interpreter(&script);
    /// assert!(matches!(interpreter.step(), StepOutcome::Step(_)));
    /// assert_eq!(interpreter.stack().len(), 1);
    /// assert!(matches!(interpreter.step(), StepOutcome::Step(_)));
    /// assert_eq!(interpreter.stack().len(), 2);
    /// assert_eq!(interpreter.step(), StepOutcome::Finished);
    /// ```
    pub fn interpreter(&self, script: &Script) -> Interpreter<'_> {
        Interpreter::new(&self.profile, script)
    }

    /// Evaluate a script on its own. The result is never verified.
    pub fn evaluate(&self, script: &Script) -> ScriptExecution {
        ScriptExecution::evaluate(&self.profile, script, None)
    }

    /// Evaluate a script against a spending transaction without the
    /// scriptSig and P2SH phases
    pub fn evaluate_with(&self, script: &Script, spend: SpendContext<'_>) -> ScriptExecution {
        ScriptExecution::evaluate(&self.profile, script, Some(spend))
    }

    /// Verify a spending input against the scriptPubKey it spends
    pub fn verify(&self, script_pubkey: &Script, spend: SpendContext<'_>) -> ScriptExecution {
        ScriptExecution::verify(&self.profile, script_pubkey, spend)
    }

    /// Signature hash of `tx` for one input
    pub fn signature_hash(
        &self,
        script_code: &Script,
        tx: &Transaction,
        input_index: usize,
        sighash_type: SighashType,
    ) -> Result<Hash> {
        sighash::signature_hash(script_code, tx, input_index, sighash_type)
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::bitcoin()
    }
}
