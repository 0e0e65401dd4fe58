//! Transactions as schema-driven records
//!
//! A [`Transaction`] is a thin view over a [`Record`] of kind
//! `Transaction`. Network-specific fields travel with the record untouched;
//! the accessors here only rely on the standard input/output field names.

use std::sync::Arc;

use crate::codec::{double_sha256, FieldValue, Reader, Record};
use crate::error::{Result, ScriptEngineError};
use crate::schema::*;
use crate::script::Script;
use crate::types::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    record: Record,
}

impl Transaction {
    /// An empty transaction with every field at its schema default
    pub fn new(schemas: &Arc<SchemaSet>) -> Self {
        Self {
            record: Record::new(schemas, EntityKind::Transaction),
        }
    }

    pub fn from_record(record: Record) -> Result<Self> {
        if record.kind() != EntityKind::Transaction {
            return Err(ScriptEngineError::Schema(format!(
                "expected a Transaction record, got {:?}",
                record.kind()
            )));
        }
        Ok(Self { record })
    }

    pub fn deserialize(schemas: &Arc<SchemaSet>, bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            record: Record::deserialize(schemas, EntityKind::Transaction, bytes)?,
        })
    }

    /// Decode one transaction from a stream, e.g. inside a block
    pub fn read(schemas: &Arc<SchemaSet>, reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            record: Record::read(schemas, EntityKind::Transaction, reader)?,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.record.serialize()
    }

    /// TxID: 𝒯𝒳 → ℍ = SHA256(SHA256(serialize(tx))), in internal byte order
    pub fn txid(&self) -> Hash {
        double_sha256(&self.serialize())
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    pub fn schemas(&self) -> &Arc<SchemaSet> {
        self.record.schemas()
    }

    fn vector_name(&self, kind: EntityKind) -> Result<String> {
        self.record
            .schema()
            .vector_field(kind)
            .map(str::to_string)
            .ok_or_else(|| ScriptEngineError::Schema(format!("transaction has no {:?} vector", kind)))
    }

    pub fn inputs(&self) -> &[Record] {
        self.vector_name(EntityKind::TxIn)
            .ok()
            .and_then(|name| self.record.records(&name))
            .unwrap_or_default()
    }

    pub fn outputs(&self) -> &[Record] {
        self.vector_name(EntityKind::TxOut)
            .ok()
            .and_then(|name| self.record.records(&name))
            .unwrap_or_default()
    }

    pub fn inputs_mut(&mut self) -> Result<&mut Vec<Record>> {
        let name = self.vector_name(EntityKind::TxIn)?;
        self.record
            .records_mut(&name)
            .ok_or_else(|| ScriptEngineError::Schema(format!("field {} is not present", name)))
    }

    pub fn outputs_mut(&mut self) -> Result<&mut Vec<Record>> {
        let name = self.vector_name(EntityKind::TxOut)?;
        self.record
            .records_mut(&name)
            .ok_or_else(|| ScriptEngineError::Schema(format!("field {} is not present", name)))
    }

    /// A default input built with this transaction's schemas
    pub fn new_input(&self) -> Record {
        Record::new(self.schemas(), EntityKind::TxIn)
    }

    pub fn new_output(&self) -> Record {
        Record::new(self.schemas(), EntityKind::TxOut)
    }

    /// Append an input spending `prev_hash:prev_index`; returns its index
    pub fn add_input(
        &mut self,
        prev_hash: Hash,
        prev_index: u32,
        script_sig: Script,
        sequence: u32,
    ) -> Result<usize> {
        let mut input = self.new_input();
        if let Some(prev_out) = input.record_mut(PREV_OUT) {
            prev_out.set(HASH, FieldValue::Hash(prev_hash))?;
            prev_out.set(INDEX, FieldValue::UInt(prev_index as u64))?;
        }
        input.set(SCRIPT_SIG, FieldValue::Script(script_sig))?;
        input.set(SEQUENCE, FieldValue::UInt(sequence as u64))?;

        let inputs = self.inputs_mut()?;
        inputs.push(input);
        Ok(inputs.len() - 1)
    }

    /// Append an output; returns its index
    pub fn add_output(&mut self, value: i64, script_pubkey: Script) -> Result<usize> {
        let mut output = self.new_output();
        output.set(VALUE, FieldValue::Int(value))?;
        output.set(SCRIPT_PUBKEY, FieldValue::Script(script_pubkey))?;

        let outputs = self.outputs_mut()?;
        outputs.push(output);
        Ok(outputs.len() - 1)
    }

    pub fn input(&self, index: usize) -> Result<&Record> {
        let inputs = self.inputs();
        inputs.get(index).ok_or(ScriptEngineError::InputIndexOutOfRange {
            index,
            count: inputs.len(),
        })
    }

    pub fn input_mut(&mut self, index: usize) -> Result<&mut Record> {
        let inputs = self.inputs_mut()?;
        let count = inputs.len();
        inputs
            .get_mut(index)
            .ok_or(ScriptEngineError::InputIndexOutOfRange { index, count })
    }

    pub fn output(&self, index: usize) -> Result<&Record> {
        let outputs = self.outputs();
        outputs.get(index).ok_or(ScriptEngineError::OutputIndexOutOfRange {
            index,
            count: outputs.len(),
        })
    }

    pub fn version(&self) -> i64 {
        self.record.int(VERSION).unwrap_or_default() as i64
    }

    pub fn set_version(&mut self, version: i64) -> Result<()> {
        self.record.set_int(VERSION, version as i128)
    }

    pub fn lock_time(&self) -> u32 {
        self.record.int(LOCK_TIME).unwrap_or_default() as u32
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> Result<()> {
        self.record.set_int(LOCK_TIME, lock_time as i128)
    }

    pub fn input_script(&self, index: usize) -> Result<&Script> {
        self.input(index)?
            .script(SCRIPT_SIG)
            .ok_or_else(|| missing_field(SCRIPT_SIG))
    }

    pub fn set_input_script(&mut self, index: usize, script: Script) -> Result<()> {
        self.input_mut(index)?.set(SCRIPT_SIG, FieldValue::Script(script))
    }

    pub fn input_sequence(&self, index: usize) -> Result<u32> {
        let value = self
            .input(index)?
            .int(SEQUENCE)
            .ok_or_else(|| missing_field(SEQUENCE))?;
        u32::try_from(value)
            .map_err(|_| ScriptEngineError::UnexpectedEncoding(format!("sequence {} exceeds 32 bits", value)))
    }

    /// The outpoint an input spends, as (hash, index)
    pub fn input_prevout(&self, index: usize) -> Result<(Hash, u32)> {
        let prev_out = self
            .input(index)?
            .record(PREV_OUT)
            .ok_or_else(|| missing_field(PREV_OUT))?;
        let hash = <Hash>::try_from(prev_out.bytes(HASH).ok_or_else(|| missing_field(HASH))?)
            .map_err(|_| not_a_hash(HASH))?;
        let prev_index = prev_out.int(INDEX).ok_or_else(|| missing_field(INDEX))?;
        let prev_index = u32::try_from(prev_index).map_err(|_| {
            ScriptEngineError::UnexpectedEncoding(format!("outpoint index {} exceeds 32 bits", prev_index))
        })?;
        Ok((hash, prev_index))
    }

    pub fn output_value(&self, index: usize) -> Result<i64> {
        let value = self
            .output(index)?
            .int(VALUE)
            .ok_or_else(|| missing_field(VALUE))?;
        Ok(value as i64)
    }

    pub fn output_script(&self, index: usize) -> Result<&Script> {
        self.output(index)?
            .script(SCRIPT_PUBKEY)
            .ok_or_else(|| missing_field(SCRIPT_PUBKEY))
    }

    /// IsCoinbase: one input spending the null outpoint (zero hash, index 2³² - 1)
    pub fn is_coinbase(&self) -> bool {
        self.inputs().len() == 1
            && matches!(self.input_prevout(0), Ok((hash, index)) if hash == [0u8; 32] && index == u32::MAX)
    }
}

fn not_a_hash(name: &str) -> ScriptEngineError {
    ScriptEngineError::UnexpectedEncoding(format!("field {} does not hold a 32-byte hash", name))
}

fn missing_field(name: &str) -> ScriptEngineError {
    ScriptEngineError::Schema(format!("required field {} is missing", name))
}
