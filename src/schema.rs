//! Field schemas: ordered descriptors that define the wire layout of each entity kind
//!
//! Schema: 𝒮 = (name × encoding × presence × default × tags)*
//!
//! Order is significant: it is the wire order, and presence conditions may only
//! refer to fields that come earlier in the same schema.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScriptEngineError};

pub const VERSION: &str = "version";
pub const INPUTS: &str = "inputs";
pub const OUTPUTS: &str = "outputs";
pub const LOCK_TIME: &str = "lock_time";
pub const PREV_OUT: &str = "prev_out";
pub const SCRIPT_SIG: &str = "script_sig";
pub const SEQUENCE: &str = "sequence";
pub const HASH: &str = "hash";
pub const INDEX: &str = "index";
pub const VALUE: &str = "value";
pub const SCRIPT_PUBKEY: &str = "script_pubkey";
pub const PREV_BLOCK: &str = "prev_block";
pub const MERKLE_ROOT: &str = "merkle_root";
pub const TIMESTAMP: &str = "timestamp";
pub const BITS: &str = "bits";
pub const NONCE: &str = "nonce";
pub const HEADER: &str = "header";
pub const TRANSACTIONS: &str = "transactions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    OutPoint,
    TxIn,
    TxOut,
    Transaction,
    BlockHeader,
    Block,
}

impl EntityKind {
    /// Nesting depth; a record may only contain records of a lower rank
    fn rank(self) -> u8 {
        match self {
            EntityKind::OutPoint => 0,
            EntityKind::TxIn | EntityKind::TxOut => 1,
            EntityKind::Transaction | EntityKind::BlockHeader => 2,
            EntityKind::Block => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldEncoding {
    /// Little-endian integer of `width` bytes (1..=8)
    Int { width: u8, signed: bool },
    /// Raw bytes of a fixed length
    FixedBytes { width: usize },
    /// Compact-size length followed by that many bytes
    VarBytes,
    /// Length-prefixed script
    Script,
    /// 32-byte hash
    Hash,
    /// A single record of another kind, inline
    Nested { kind: EntityKind },
    /// Compact-size count followed by that many records
    Vector { kind: EntityKind },
}

/// Semantic role of a field for presentation layers; the codec ignores tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTag {
    Amount,
    Timestamp,
    BlockHash,
    TxHash,
    LockTime,
    Sequence,
    Signature,
    Commentary,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum Presence {
    #[default]
    Always,
    /// Present only when an earlier integer field exceeds `value`
    GreaterThan { field: String, value: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDefault {
    /// Wide enough for every signed and unsigned 8-byte value
    Int(i128),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub encoding: FieldEncoding,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default)]
    pub default: Option<FieldDefault>,
    #[serde(default)]
    pub tags: Vec<FieldTag>,
}

impl FieldDescriptor {
    pub fn new(name: &str, encoding: FieldEncoding) -> Self {
        Self {
            name: name.to_string(),
            encoding,
            presence: Presence::Always,
            default: None,
            tags: Vec::new(),
        }
    }

    pub fn int(name: &str, width: u8, signed: bool) -> Self {
        Self::new(name, FieldEncoding::Int { width, signed })
    }

    pub fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_tag(mut self, tag: FieldTag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn present_when_greater(mut self, field: &str, value: i64) -> Self {
        self.presence = Presence::GreaterThan {
            field: field.to_string(),
            value,
        };
        self
    }

    /// The byte width of this field on the wire, when it is fixed
    pub fn fixed_width(&self) -> Option<usize> {
        match &self.encoding {
            FieldEncoding::Int { width, .. } => Some(*width as usize),
            FieldEncoding::FixedBytes { width } => Some(*width),
            FieldEncoding::Hash => Some(32),
            _ => None,
        }
    }
}

/// Ordered field layout of one entity kind. Only built through [`Schema::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    kind: EntityKind,
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    /// Validate and build a schema.
    ///
    /// 1. Field names are unique
    /// 2. Integer widths are 1..=8 and defaults match their encoding
    /// 3. Presence conditions refer to an earlier integer field
    /// 4. Nested and vector fields only contain lower-ranked kinds
    /// 5. Transactions hold exactly one input and one output vector; blocks
    ///    exactly one transaction vector
    pub fn new(kind: EntityKind, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(schema_error(kind, format!("duplicate field {}", field.name)));
            }
        }

        for (position, field) in fields.iter().enumerate() {
            match &field.encoding {
                FieldEncoding::Int { width, .. } if *width == 0 || *width > 8 => {
                    return Err(schema_error(
                        kind,
                        format!("field {} has integer width {}", field.name, width),
                    ));
                }
                FieldEncoding::Nested { kind: inner } | FieldEncoding::Vector { kind: inner }
                    if inner.rank() >= kind.rank() =>
                {
                    return Err(schema_error(
                        kind,
                        format!("field {} cannot contain {:?}", field.name, inner),
                    ));
                }
                _ => {}
            }

            check_default(kind, field)?;

            if let Presence::GreaterThan { field: source, .. } = &field.presence {
                let earlier = fields[..position].iter().find(|f| &f.name == source);
                match earlier {
                    Some(f) if matches!(f.encoding, FieldEncoding::Int { .. }) => {}
                    Some(_) => {
                        return Err(schema_error(
                            kind,
                            format!("presence of {} depends on non-integer {}", field.name, source),
                        ))
                    }
                    None => {
                        return Err(schema_error(
                            kind,
                            format!(
                                "presence of {} depends on {}, which is not an earlier field",
                                field.name, source
                            ),
                        ))
                    }
                }
            }
        }

        let count_vectors = |of: EntityKind| {
            fields
                .iter()
                .filter(|f| f.encoding == FieldEncoding::Vector { kind: of })
                .count()
        };
        match kind {
            EntityKind::Transaction => {
                if count_vectors(EntityKind::TxIn) != 1 || count_vectors(EntityKind::TxOut) != 1 {
                    return Err(schema_error(
                        kind,
                        "exactly one inputs vector and one outputs vector are required".to_string(),
                    ));
                }
            }
            EntityKind::Block => {
                if count_vectors(EntityKind::Transaction) != 1 {
                    return Err(schema_error(
                        kind,
                        "exactly one transactions vector is required".to_string(),
                    ));
                }
            }
            _ => {}
        }

        Ok(Self { kind, fields })
    }

    /// Layouts shipped with the crate; their validity is covered by tests
    pub(crate) fn builtin(kind: EntityKind, fields: Vec<FieldDescriptor>) -> Self {
        Self { kind, fields }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the single vector field holding records of `kind`
    pub fn vector_field(&self, kind: EntityKind) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.encoding == FieldEncoding::Vector { kind })
            .map(|f| f.name.as_str())
    }
}

fn schema_error(kind: EntityKind, message: String) -> ScriptEngineError {
    ScriptEngineError::Schema(format!("{:?}: {}", kind, message))
}

fn check_default(kind: EntityKind, field: &FieldDescriptor) -> Result<()> {
    let Some(default) = &field.default else {
        return Ok(());
    };
    let ok = match (&field.encoding, default) {
        (FieldEncoding::Int { width, signed }, FieldDefault::Int(v)) => {
            int_fits(*v, *width, *signed)
        }
        (FieldEncoding::FixedBytes { width }, FieldDefault::Bytes(b)) => b.len() == *width,
        (FieldEncoding::Hash, FieldDefault::Bytes(b)) => b.len() == 32,
        (FieldEncoding::VarBytes | FieldEncoding::Script, FieldDefault::Bytes(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(schema_error(
            kind,
            format!("default of {} does not match its encoding", field.name),
        ))
    }
}

/// True when `value` is representable in `width` little-endian bytes
pub fn int_fits(value: i128, width: u8, signed: bool) -> bool {
    let bits = 8 * width.min(8) as u32;
    if signed {
        let max = (1i128 << (bits - 1)) - 1;
        let min = -(1i128 << (bits - 1));
        (min..=max).contains(&value)
    } else {
        (0..(1i128 << bits)).contains(&value)
    }
}

/// The schemas of every entity kind for one network.
///
/// Each slot only ever holds a schema of its own kind, which keeps nested
/// records strictly decreasing in rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaSet {
    outpoint: Schema,
    txin: Schema,
    txout: Schema,
    transaction: Schema,
    header: Schema,
    block: Schema,
}

impl SchemaSet {
    /// Check that each schema sits in the slot of its own kind
    pub fn new(
        outpoint: Schema,
        txin: Schema,
        txout: Schema,
        transaction: Schema,
        header: Schema,
        block: Schema,
    ) -> Result<Self> {
        let set = Self {
            outpoint,
            txin,
            txout,
            transaction,
            header,
            block,
        };
        for kind in [
            EntityKind::OutPoint,
            EntityKind::TxIn,
            EntityKind::TxOut,
            EntityKind::Transaction,
            EntityKind::BlockHeader,
            EntityKind::Block,
        ] {
            if set.get(kind).kind() != kind {
                return Err(ScriptEngineError::Schema(format!(
                    "{:?} schema supplied where {:?} was expected",
                    set.get(kind).kind(),
                    kind
                )));
            }
        }
        Ok(set)
    }

    /// Replace the schema of `schema.kind()`, leaving the other slots alone
    pub fn with_schema(mut self, schema: Schema) -> Self {
        let kind = schema.kind();
        *self.slot_mut(kind) = schema;
        self
    }

    fn slot_mut(&mut self, kind: EntityKind) -> &mut Schema {
        match kind {
            EntityKind::OutPoint => &mut self.outpoint,
            EntityKind::TxIn => &mut self.txin,
            EntityKind::TxOut => &mut self.txout,
            EntityKind::Transaction => &mut self.transaction,
            EntityKind::BlockHeader => &mut self.header,
            EntityKind::Block => &mut self.block,
        }
    }

    pub fn outpoint(&self) -> &Schema {
        &self.outpoint
    }

    pub fn txin(&self) -> &Schema {
        &self.txin
    }

    pub fn txout(&self) -> &Schema {
        &self.txout
    }

    pub fn transaction(&self) -> &Schema {
        &self.transaction
    }

    pub fn header(&self) -> &Schema {
        &self.header
    }

    pub fn block(&self) -> &Schema {
        &self.block
    }

    pub fn get(&self, kind: EntityKind) -> &Schema {
        match kind {
            EntityKind::OutPoint => &self.outpoint,
            EntityKind::TxIn => &self.txin,
            EntityKind::TxOut => &self.txout,
            EntityKind::Transaction => &self.transaction,
            EntityKind::BlockHeader => &self.header,
            EntityKind::Block => &self.block,
        }
    }

    /// Canonical Bitcoin layouts
    pub fn bitcoin() -> Self {
        Self {
            outpoint: Schema {
                kind: EntityKind::OutPoint,
                fields: default_outpoint_fields(),
            },
            txin: Schema {
                kind: EntityKind::TxIn,
                fields: default_txin_fields(),
            },
            txout: Schema {
                kind: EntityKind::TxOut,
                fields: default_txout_fields(),
            },
            transaction: Schema {
                kind: EntityKind::Transaction,
                fields: default_transaction_fields(),
            },
            header: Schema {
                kind: EntityKind::BlockHeader,
                fields: default_header_fields(),
            },
            block: Schema {
                kind: EntityKind::Block,
                fields: default_block_fields(),
            },
        }
    }
}

impl Default for SchemaSet {
    fn default() -> Self {
        Self::bitcoin()
    }
}

pub fn default_outpoint_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new(HASH, FieldEncoding::Hash).with_tag(FieldTag::TxHash),
        FieldDescriptor::int(INDEX, 4, false).with_default(FieldDefault::Int(0xffff_ffff)),
    ]
}

pub fn default_txin_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new(
            PREV_OUT,
            FieldEncoding::Nested {
                kind: EntityKind::OutPoint,
            },
        ),
        FieldDescriptor::new(SCRIPT_SIG, FieldEncoding::Script),
        FieldDescriptor::int(SEQUENCE, 4, false)
            .with_default(FieldDefault::Int(0xffff_ffff))
            .with_tag(FieldTag::Sequence),
    ]
}

pub fn default_txout_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::int(VALUE, 8, true).with_tag(FieldTag::Amount),
        FieldDescriptor::new(SCRIPT_PUBKEY, FieldEncoding::Script),
    ]
}

pub fn default_transaction_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::int(VERSION, 4, true).with_default(FieldDefault::Int(1)),
        FieldDescriptor::new(
            INPUTS,
            FieldEncoding::Vector {
                kind: EntityKind::TxIn,
            },
        ),
        FieldDescriptor::new(
            OUTPUTS,
            FieldEncoding::Vector {
                kind: EntityKind::TxOut,
            },
        ),
        FieldDescriptor::int(LOCK_TIME, 4, false).with_tag(FieldTag::LockTime),
    ]
}

pub fn default_header_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::int(VERSION, 4, true).with_default(FieldDefault::Int(1)),
        FieldDescriptor::new(PREV_BLOCK, FieldEncoding::Hash).with_tag(FieldTag::BlockHash),
        FieldDescriptor::new(MERKLE_ROOT, FieldEncoding::Hash).with_tag(FieldTag::TxHash),
        FieldDescriptor::int(TIMESTAMP, 4, false).with_tag(FieldTag::Timestamp),
        FieldDescriptor::int(BITS, 4, false),
        FieldDescriptor::int(NONCE, 4, false),
    ]
}

pub fn default_block_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new(
            HEADER,
            FieldEncoding::Nested {
                kind: EntityKind::BlockHeader,
            },
        ),
        FieldDescriptor::new(
            TRANSACTIONS,
            FieldEncoding::Vector {
                kind: EntityKind::Transaction,
            },
        ),
    ]
}
