//! Schema-driven binary codec
//!
//! Deserialize: 𝒮 × 𝔹* → Record
//! Serialize:   Record → 𝔹*
//!
//! with Serialize(Deserialize(s, b)) = b for every byte string b that
//! Deserialize accepts. Every record stamps the schema set it was built with,
//! so swapping the active network never changes how an existing record encodes.

use std::sync::Arc;

use bitcoin_hashes::{sha256d, Hash as BitcoinHash};

use crate::error::{Result, ScriptEngineError};
use crate::schema::*;
use crate::script::Script;
use crate::types::Hash;

/// SHA256(SHA256(x))
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// Cursor over a byte buffer
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn rewind(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(ScriptEngineError::TruncatedInput {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Little-endian unsigned integer of `width` bytes
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        let bytes = self.read_bytes(width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Variable-length integer: 1, 3, 5 or 9 bytes. Non-minimal encodings are rejected.
    pub fn read_compact_size(&mut self) -> Result<u64> {
        let start = self.pos;
        let result = self.read_compact_size_inner();
        if result.is_err() {
            self.rewind(start);
        }
        result
    }

    fn read_compact_size_inner(&mut self) -> Result<u64> {
        let (value, min) = match self.read_u8()? {
            0xfd => (self.read_uint(2)?, 0xfd),
            0xfe => (self.read_uint(4)?, 0x1_0000),
            0xff => (self.read_uint(8)?, 0x1_0000_0000),
            n => return Ok(n as u64),
        };
        if value < min {
            return Err(ScriptEngineError::UnexpectedEncoding(format!(
                "non-canonical compact size {} at offset {}",
                value, self.pos
            )));
        }
        Ok(value)
    }

    /// Compact-size length followed by that many bytes
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let len = self.read_compact_size()?;
        let result = usize::try_from(len)
            .map_err(|_| ScriptEngineError::TruncatedInput {
                offset: self.pos,
                needed: usize::MAX,
                available: self.remaining(),
            })
            .and_then(|len| self.read_bytes(len));
        if result.is_err() {
            self.rewind(start);
        }
        result
    }
}

pub fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// The value of one schema field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Bytes(Vec<u8>),
    Hash(Hash),
    Script(Script),
    Record(Box<Record>),
    Records(Vec<Record>),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i128> {
        match self {
            FieldValue::Int(v) => Some(*v as i128),
            FieldValue::UInt(v) => Some(*v as i128),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(&b[..]),
            FieldValue::Hash(h) => Some(&h[..]),
            _ => None,
        }
    }

    pub fn as_script(&self) -> Option<&Script> {
        match self {
            FieldValue::Script(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            FieldValue::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            FieldValue::Records(r) => Some(r),
            _ => None,
        }
    }
}

/// One entity laid out by its schema. Absent conditional fields hold `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schemas: Arc<SchemaSet>,
    kind: EntityKind,
    values: Vec<Option<FieldValue>>,
}

impl Record {
    /// A fully-formed record with every present field set to its default
    pub fn new(schemas: &Arc<SchemaSet>, kind: EntityKind) -> Self {
        let mut record = Self {
            schemas: Arc::clone(schemas),
            kind,
            values: vec![None; schemas.get(kind).fields().len()],
        };
        record.refresh_presence();
        record
    }

    /// Decode one record. On failure the reader is left where it started.
    pub fn read(schemas: &Arc<SchemaSet>, kind: EntityKind, reader: &mut Reader<'_>) -> Result<Self> {
        let start = reader.position();
        let result = Self::read_inner(schemas, kind, reader);
        if result.is_err() {
            reader.rewind(start);
        }
        result
    }

    /// Decode a record that must span the whole buffer
    pub fn deserialize(schemas: &Arc<SchemaSet>, kind: EntityKind, bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let record = Self::read(schemas, kind, &mut reader)?;
        if !reader.is_empty() {
            return Err(ScriptEngineError::UnexpectedEncoding(format!(
                "{} trailing byte(s) after {:?}",
                reader.remaining(),
                kind
            )));
        }
        Ok(record)
    }

    fn read_inner(schemas: &Arc<SchemaSet>, kind: EntityKind, reader: &mut Reader<'_>) -> Result<Self> {
        let schema = schemas.get(kind);
        let mut values: Vec<Option<FieldValue>> = Vec::with_capacity(schema.fields().len());

        for field in schema.fields() {
            if !presence_holds(schema, &values, field) {
                values.push(None);
                continue;
            }
            let value = read_field(schemas, &field.encoding, reader)?;
            values.push(Some(value));
        }

        Ok(Self {
            schemas: Arc::clone(schemas),
            kind,
            values,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        for (field, value) in self.schema().fields().iter().zip(&self.values) {
            if let Some(value) = value {
                write_field(out, &field.encoding, value);
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn schema(&self) -> &Schema {
        self.schemas.get(self.kind)
    }

    /// The schema set this record was built with
    pub fn schemas(&self) -> &Arc<SchemaSet> {
        &self.schemas
    }

    /// Present fields in schema order
    pub fn fields(&self) -> impl Iterator<Item = (&FieldDescriptor, &FieldValue)> {
        self.schema()
            .fields()
            .iter()
            .zip(&self.values)
            .filter_map(|(f, v)| v.as_ref().map(|v| (f, v)))
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        let position = self.schema().position(name)?;
        self.values[position].as_ref()
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn int(&self, name: &str) -> Option<i128> {
        self.get(name)?.as_int()
    }

    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name)?.as_bytes()
    }

    pub fn script(&self, name: &str) -> Option<&Script> {
        self.get(name)?.as_script()
    }

    pub fn record(&self, name: &str) -> Option<&Record> {
        self.get(name)?.as_record()
    }

    pub fn records(&self, name: &str) -> Option<&[Record]> {
        self.get(name)?.as_records()
    }

    pub fn record_mut(&mut self, name: &str) -> Option<&mut Record> {
        let position = self.schema().position(name)?;
        match self.values[position].as_mut()? {
            FieldValue::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Mutable access to a vector field. Records pushed here must be of the field's kind.
    pub fn records_mut(&mut self, name: &str) -> Option<&mut Vec<Record>> {
        let position = self.schema().position(name)?;
        match self.values[position].as_mut()? {
            FieldValue::Records(r) => Some(r),
            _ => None,
        }
    }

    /// Set a present field, checking the value against the field's encoding.
    ///
    /// Integer values are coerced to the field's signedness. Conditional
    /// fields appear or disappear according to the new value.
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let position = self.schema().position(name).ok_or_else(|| {
            ScriptEngineError::Schema(format!("{:?} has no field {}", self.kind, name))
        })?;
        if self.values[position].is_none() {
            return Err(ScriptEngineError::UnexpectedEncoding(format!(
                "field {} is not present in this {:?}",
                name, self.kind
            )));
        }
        let field = &self.schema().fields()[position];
        let value = coerce(field, value)?;
        self.values[position] = Some(value);
        self.refresh_presence();
        Ok(())
    }

    pub fn set_int(&mut self, name: &str, value: i128) -> Result<()> {
        let value = match i64::try_from(value) {
            Ok(v) => FieldValue::Int(v),
            Err(_) => FieldValue::UInt(u64::try_from(value).map_err(|_| {
                ScriptEngineError::UnexpectedEncoding(format!("{} out of range for {}", value, name))
            })?),
        };
        self.set(name, value)
    }

    /// Fill newly-present fields with defaults and clear fields whose condition no longer holds
    fn refresh_presence(&mut self) {
        let schemas = Arc::clone(&self.schemas);
        let schema = schemas.get(self.kind);
        for (position, field) in schema.fields().iter().enumerate() {
            if presence_holds(schema, &self.values[..position], field) {
                if self.values[position].is_none() {
                    self.values[position] = Some(default_value(&schemas, field));
                }
            } else {
                self.values[position] = None;
            }
        }
    }
}

fn presence_holds(schema: &Schema, earlier: &[Option<FieldValue>], field: &FieldDescriptor) -> bool {
    match &field.presence {
        Presence::Always => true,
        Presence::GreaterThan { field: source, value } => schema
            .position(source)
            .and_then(|p| earlier.get(p))
            .and_then(|v| v.as_ref())
            .and_then(FieldValue::as_int)
            .map(|v| v > *value as i128)
            .unwrap_or(false),
    }
}

fn default_value(schemas: &Arc<SchemaSet>, field: &FieldDescriptor) -> FieldValue {
    let default_int = match &field.default {
        Some(FieldDefault::Int(v)) => *v,
        _ => 0,
    };
    let default_bytes = match &field.default {
        Some(FieldDefault::Bytes(b)) => Some(b.clone()),
        _ => None,
    };

    match &field.encoding {
        // Schema validation has already range-checked the default
        FieldEncoding::Int { signed: true, .. } => FieldValue::Int(i64::try_from(default_int).unwrap_or_default()),
        FieldEncoding::Int { signed: false, .. } => FieldValue::UInt(u64::try_from(default_int).unwrap_or_default()),
        FieldEncoding::FixedBytes { width } => {
            FieldValue::Bytes(default_bytes.unwrap_or_else(|| vec![0; *width]))
        }
        FieldEncoding::VarBytes => FieldValue::Bytes(default_bytes.unwrap_or_default()),
        FieldEncoding::Script => FieldValue::Script(Script::from_raw(default_bytes.unwrap_or_default())),
        FieldEncoding::Hash => FieldValue::Hash(
            default_bytes
                .and_then(|b| <Hash>::try_from(b.as_slice()).ok())
                .unwrap_or_default(),
        ),
        FieldEncoding::Nested { kind } => FieldValue::Record(Box::new(Record::new(schemas, *kind))),
        FieldEncoding::Vector { .. } => FieldValue::Records(Vec::new()),
    }
}

fn coerce(field: &FieldDescriptor, value: FieldValue) -> Result<FieldValue> {
    let mismatch = |value: &FieldValue| {
        ScriptEngineError::UnexpectedEncoding(format!(
            "value {:?} does not match encoding {:?} of field {}",
            value, field.encoding, field.name
        ))
    };

    match (&field.encoding, value) {
        (FieldEncoding::Int { width, signed }, value @ (FieldValue::Int(_) | FieldValue::UInt(_))) => {
            let n = value.as_int().ok_or_else(|| mismatch(&value))?;
            if !int_fits(n, *width, *signed) {
                return Err(mismatch(&value));
            }
            Ok(if *signed {
                FieldValue::Int(n as i64)
            } else {
                FieldValue::UInt(n as u64)
            })
        }
        (FieldEncoding::FixedBytes { width }, FieldValue::Bytes(b)) if b.len() == *width => {
            Ok(FieldValue::Bytes(b))
        }
        (FieldEncoding::VarBytes, FieldValue::Bytes(b)) => Ok(FieldValue::Bytes(b)),
        (FieldEncoding::Script, FieldValue::Script(s)) => Ok(FieldValue::Script(s)),
        (FieldEncoding::Hash, FieldValue::Hash(h)) => Ok(FieldValue::Hash(h)),
        (FieldEncoding::Hash, FieldValue::Bytes(b)) if b.len() == 32 => {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&b);
            Ok(FieldValue::Hash(hash))
        }
        (FieldEncoding::Nested { kind }, FieldValue::Record(r)) if r.kind == *kind => {
            Ok(FieldValue::Record(r))
        }
        (FieldEncoding::Vector { kind }, FieldValue::Records(rs))
            if rs.iter().all(|r| r.kind == *kind) =>
        {
            Ok(FieldValue::Records(rs))
        }
        (_, value) => Err(mismatch(&value)),
    }
}

fn read_field(schemas: &Arc<SchemaSet>, encoding: &FieldEncoding, reader: &mut Reader<'_>) -> Result<FieldValue> {
    match encoding {
        FieldEncoding::Int { width, signed } => {
            let width = *width as usize;
            let raw = reader.read_uint(width)?;
            if *signed {
                let shift = 64 - 8 * width as u32;
                // Sign-extend from the top byte of the field
                Ok(FieldValue::Int(((raw << shift) as i64) >> shift))
            } else {
                Ok(FieldValue::UInt(raw))
            }
        }
        FieldEncoding::FixedBytes { width } => Ok(FieldValue::Bytes(reader.read_bytes(*width)?.to_vec())),
        FieldEncoding::VarBytes => Ok(FieldValue::Bytes(reader.read_var_bytes()?.to_vec())),
        FieldEncoding::Script => Ok(FieldValue::Script(Script::from_raw(reader.read_var_bytes()?.to_vec()))),
        FieldEncoding::Hash => {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(reader.read_bytes(32)?);
            Ok(FieldValue::Hash(hash))
        }
        FieldEncoding::Nested { kind } => Ok(FieldValue::Record(Box::new(Record::read_inner(
            schemas, *kind, reader,
        )?))),
        FieldEncoding::Vector { kind } => {
            let count = reader.read_compact_size()?;
            // Each record takes at least one byte, which bounds a hostile count
            if count > reader.remaining() as u64 {
                return Err(ScriptEngineError::TruncatedInput {
                    offset: reader.position(),
                    needed: usize::try_from(count).unwrap_or(usize::MAX),
                    available: reader.remaining(),
                });
            }
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                records.push(Record::read_inner(schemas, *kind, reader)?);
            }
            Ok(FieldValue::Records(records))
        }
    }
}

fn write_field(out: &mut Vec<u8>, encoding: &FieldEncoding, value: &FieldValue) {
    match (encoding, value) {
        (FieldEncoding::Int { width, .. }, FieldValue::Int(v)) => {
            out.extend_from_slice(&v.to_le_bytes()[..*width as usize]);
        }
        (FieldEncoding::Int { width, .. }, FieldValue::UInt(v)) => {
            out.extend_from_slice(&v.to_le_bytes()[..*width as usize]);
        }
        (FieldEncoding::FixedBytes { .. }, FieldValue::Bytes(b)) => out.extend_from_slice(b),
        (FieldEncoding::VarBytes, FieldValue::Bytes(b)) => write_var_bytes(out, b),
        (FieldEncoding::Script, FieldValue::Script(s)) => write_var_bytes(out, s.as_bytes()),
        (FieldEncoding::Hash, FieldValue::Hash(h)) => out.extend_from_slice(h),
        (FieldEncoding::Nested { .. }, FieldValue::Record(r)) => r.write(out),
        (FieldEncoding::Vector { .. }, FieldValue::Records(rs)) => {
            write_compact_size(out, rs.len() as u64);
            for r in rs {
                r.write(out);
            }
        }
        // `set` and the decoder only ever store values matching their encoding
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitcoin() -> Arc<SchemaSet> {
        Arc::new(SchemaSet::bitcoin())
    }

    #[test]
    fn test_compact_size_widths() {
        for (value, len) in [(0u64, 1), (0xfc, 1), (0xfd, 3), (0xffff, 3), (0x1_0000, 5), (0x1_0000_0000, 9)] {
            let mut out = Vec::new();
            write_compact_size(&mut out, value);
            assert_eq!(out.len(), len);
            let mut reader = Reader::new(&out);
            assert_eq!(reader.read_compact_size().unwrap(), value);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_non_canonical_compact_size_rejected() {
        let bytes = [0xfd, 0x10, 0x00];
        let mut reader = Reader::new(&bytes);
        let err = reader.read_compact_size().unwrap_err();
        assert!(matches!(err, ScriptEngineError::UnexpectedEncoding(_)));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_truncated_read_leaves_position() {
        let bytes = [0x05, 0x01, 0x02];
        let mut reader = Reader::new(&bytes);
        let err = reader.read_var_bytes().unwrap_err();
        assert!(matches!(err, ScriptEngineError::TruncatedInput { .. }));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_new_record_has_defaults() {
        let record = Record::new(&bitcoin(), EntityKind::TxIn);
        assert_eq!(record.int(SEQUENCE), Some(0xffff_ffff));
        assert_eq!(record.script(SCRIPT_SIG), Some(&Script::new()));
        let prev = record.record(PREV_OUT).unwrap();
        assert_eq!(prev.bytes(HASH), Some(&[0u8; 32][..]));
        assert_eq!(prev.int(INDEX), Some(0xffff_ffff));
    }

    #[test]
    fn test_wide_unsigned_default() {
        let fields = vec![
            FieldDescriptor::new(HASH, FieldEncoding::Hash),
            FieldDescriptor::int(INDEX, 8, false).with_default(FieldDefault::Int(u64::MAX as i128)),
        ];
        let set = SchemaSet::bitcoin().with_schema(Schema::new(EntityKind::OutPoint, fields).unwrap());
        let record = Record::new(&Arc::new(set), EntityKind::OutPoint);
        assert_eq!(record.int(INDEX), Some(u64::MAX as i128));
        assert_eq!(&record.serialize()[32..], &[0xff; 8]);
    }

    #[test]
    fn test_signed_int_sign_extension() {
        let schemas = bitcoin();
        let mut bytes = vec![0xff; 8];
        bytes.push(0x00);
        let output = Record::deserialize(&schemas, EntityKind::TxOut, &bytes).unwrap();
        assert_eq!(output.int(VALUE), Some(-1));
        assert_eq!(output.serialize(), bytes);
    }

    #[test]
    fn test_set_validates_encoding() {
        let mut output = Record::new(&bitcoin(), EntityKind::TxOut);
        assert!(output.set(VALUE, FieldValue::Bytes(vec![1])).is_err());
        assert!(output.set("missing", FieldValue::Int(1)).is_err());
        output.set(VALUE, FieldValue::UInt(5000)).unwrap();
        assert_eq!(output.get(VALUE), Some(&FieldValue::Int(5000)));

        let mut input = Record::new(&bitcoin(), EntityKind::TxIn);
        assert!(input.set_int(SEQUENCE, 0x1_0000_0000).is_err());
        assert!(input.set_int(SEQUENCE, -1).is_err());
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let schemas = bitcoin();
        let mut bytes = [0u8; 36].to_vec();
        bytes.push(0xaa);
        let err = Record::deserialize(&schemas, EntityKind::OutPoint, &bytes).unwrap_err();
        assert!(matches!(err, ScriptEngineError::UnexpectedEncoding(_)));
    }

    #[test]
    fn test_hostile_vector_count() {
        let schemas = bitcoin();
        let bytes = [0x01, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let mut reader = Reader::new(&bytes);
        let err = Record::read(&schemas, EntityKind::Transaction, &mut reader).unwrap_err();
        assert!(matches!(err, ScriptEngineError::TruncatedInput { .. }));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_conditional_field_follows_condition() {
        let mut fields = default_transaction_fields();
        fields.push(
            FieldDescriptor::new("comment", FieldEncoding::VarBytes)
                .present_when_greater(VERSION, 1)
                .with_default(FieldDefault::Bytes(b"hi".to_vec())),
        );
        let set = SchemaSet::bitcoin().with_schema(Schema::new(EntityKind::Transaction, fields).unwrap());
        let schemas = Arc::new(set);

        let mut tx = Record::new(&schemas, EntityKind::Transaction);
        assert!(!tx.is_present("comment"));
        assert!(tx.set("comment", FieldValue::Bytes(vec![])).is_err());

        tx.set_int(VERSION, 2).unwrap();
        assert_eq!(tx.bytes("comment"), Some(&b"hi"[..]));
        let bytes = tx.serialize();
        assert_eq!(&bytes[bytes.len() - 3..], &[0x02, b'h', b'i']);
        assert_eq!(Record::deserialize(&schemas, EntityKind::Transaction, &bytes).unwrap(), tx);

        tx.set_int(VERSION, 1).unwrap();
        assert!(!tx.is_present("comment"));
    }
}
