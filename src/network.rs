//! Network profiles: the schemas and opcode table of one network, swapped as a unit
//!
//! A profile is an explicit value. Callers hold it (usually in an `Arc`) and
//! pass it to every codec and interpreter call; records built under a profile
//! keep its schemas even after the caller moves on to another one.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockHeader};
use crate::error::{Result, ScriptEngineError};
use crate::opcodes::{OpcodeTable, OP_CHECKLOCKTIMEVERIFY, OP_CHECKSEQUENCEVERIFY};
use crate::overrides::handler_by_name;
use crate::schema::*;
use crate::script::Script;
use crate::transaction::Transaction;

#[derive(Debug, Clone)]
pub struct NetworkProfile {
    name: String,
    schemas: Arc<SchemaSet>,
    opcodes: OpcodeTable,
}

impl NetworkProfile {
    pub fn new(name: &str, schemas: SchemaSet, opcodes: OpcodeTable) -> Self {
        log::debug!("built network profile {}", name);
        Self {
            name: name.to_string(),
            schemas: Arc::new(schemas),
            opcodes,
        }
    }

    /// Canonical Bitcoin layouts with the BIP 65/112 time-lock opcodes
    pub fn bitcoin() -> Self {
        Self::new("bitcoin", SchemaSet::bitcoin(), timelock_opcodes())
    }

    /// Clams: transactions carry a timestamp after the version and, from
    /// version 2, a trailing free-text "clam speech"; blocks end with a
    /// block signature
    pub fn clams() -> Self {
        let schemas = SchemaSet::bitcoin()
            .with_schema(Schema::builtin(EntityKind::Transaction, clams_transaction_fields()))
            .with_schema(Schema::builtin(EntityKind::Block, clams_block_fields()));
        Self::new("clams", schemas, timelock_opcodes())
    }

    /// Build and validate a profile from its configuration
    pub fn from_config(config: &ProfileConfig) -> Result<Self> {
        let schema = |kind: EntityKind, fields: &Option<Vec<FieldDescriptor>>, default: fn() -> Vec<FieldDescriptor>| {
            Schema::new(kind, fields.clone().unwrap_or_else(default))
        };
        let schemas = SchemaSet::new(
            schema(EntityKind::OutPoint, &config.outpoint, default_outpoint_fields)?,
            schema(EntityKind::TxIn, &config.txin, default_txin_fields)?,
            schema(EntityKind::TxOut, &config.txout, default_txout_fields)?,
            schema(EntityKind::Transaction, &config.transaction, default_transaction_fields)?,
            schema(EntityKind::BlockHeader, &config.header, default_header_fields)?,
            schema(EntityKind::Block, &config.block, default_block_fields)?,
        )?;

        let mut opcodes = timelock_opcodes();
        let resolve = |table: &OpcodeTable, name: &str| {
            table
                .value(name)
                .ok_or_else(|| ScriptEngineError::Schema(format!("unknown opcode {} in profile {}", name, config.name)))
        };

        for (old, new) in &config.renames {
            let value = resolve(&opcodes, old)?;
            opcodes.rename(value, new);
        }
        if let Some(disabled) = &config.disabled {
            let values = disabled
                .iter()
                .map(|name| resolve(&opcodes, name))
                .collect::<Result<Vec<_>>>()?;
            opcodes.set_disabled(values);
        }
        for (opcode, handler) in &config.overrides {
            let value = resolve(&opcodes, opcode)?;
            let handler = handler_by_name(handler).ok_or_else(|| {
                ScriptEngineError::Schema(format!("unknown override handler {} for {}", handler, opcode))
            })?;
            opcodes.register_override(value, handler);
        }

        Ok(Self::new(&config.name, schemas, opcodes))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ProfileConfig = serde_json::from_str(json)
            .map_err(|e| ScriptEngineError::Schema(format!("invalid profile configuration: {}", e)))?;
        Self::from_config(&config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schemas(&self) -> &Arc<SchemaSet> {
        &self.schemas
    }

    pub fn opcodes(&self) -> &OpcodeTable {
        &self.opcodes
    }

    pub fn new_transaction(&self) -> Transaction {
        Transaction::new(&self.schemas)
    }

    pub fn deserialize_transaction(&self, bytes: &[u8]) -> Result<Transaction> {
        Transaction::deserialize(&self.schemas, bytes)
    }

    pub fn deserialize_header(&self, bytes: &[u8]) -> Result<BlockHeader> {
        BlockHeader::deserialize(&self.schemas, bytes)
    }

    pub fn deserialize_block(&self, bytes: &[u8]) -> Result<Block> {
        Block::deserialize(&self.schemas, bytes)
    }

    pub fn parse_script(&self, text: &str) -> Result<Script> {
        Script::from_text(text, &self.opcodes)
    }

    pub fn format_script(&self, script: &Script) -> Result<String> {
        script.to_text(&self.opcodes)
    }
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self::bitcoin()
    }
}

/// Serialized form of a profile. Entity field lists left out fall back to
/// the Bitcoin layouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub name: String,
    pub outpoint: Option<Vec<FieldDescriptor>>,
    pub txin: Option<Vec<FieldDescriptor>>,
    pub txout: Option<Vec<FieldDescriptor>>,
    pub transaction: Option<Vec<FieldDescriptor>>,
    pub header: Option<Vec<FieldDescriptor>>,
    pub block: Option<Vec<FieldDescriptor>>,
    /// Opcode name → new mnemonic
    pub renames: BTreeMap<String, String>,
    /// Replaces the standard disabled set when given
    pub disabled: Option<Vec<String>>,
    /// Opcode name → registered handler name
    pub overrides: BTreeMap<String, String>,
}

fn timelock_opcodes() -> OpcodeTable {
    let mut table = OpcodeTable::standard();
    for (opcode, handler) in [
        (OP_CHECKLOCKTIMEVERIFY, "check_lock_time_verify"),
        (OP_CHECKSEQUENCEVERIFY, "check_sequence_verify"),
    ] {
        if let Some(handler) = handler_by_name(handler) {
            table.register_override(opcode, handler);
        }
    }
    table
}

pub fn clams_transaction_fields() -> Vec<FieldDescriptor> {
    let mut fields = default_transaction_fields();
    fields.insert(1, FieldDescriptor::int("time", 4, false).with_tag(FieldTag::Timestamp));
    fields.push(
        FieldDescriptor::new("clam_speech", FieldEncoding::VarBytes)
            .present_when_greater(VERSION, 1)
            .with_tag(FieldTag::Commentary),
    );
    fields
}

pub fn clams_block_fields() -> Vec<FieldDescriptor> {
    let mut fields = default_block_fields();
    fields.push(FieldDescriptor::new("block_sig", FieldEncoding::VarBytes).with_tag(FieldTag::Signature));
    fields
}
