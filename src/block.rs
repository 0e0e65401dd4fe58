//! Block headers and blocks as schema-driven records

use std::sync::Arc;

use crate::codec::{double_sha256, FieldValue, Reader, Record};
use crate::error::{Result, ScriptEngineError};
use crate::schema::*;
use crate::transaction::Transaction;
use crate::types::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    record: Record,
}

impl BlockHeader {
    pub fn new(schemas: &Arc<SchemaSet>) -> Self {
        Self {
            record: Record::new(schemas, EntityKind::BlockHeader),
        }
    }

    pub fn deserialize(schemas: &Arc<SchemaSet>, bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            record: Record::deserialize(schemas, EntityKind::BlockHeader, bytes)?,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.record.serialize()
    }

    /// BlockHash: ℋ → ℍ = SHA256(SHA256(serialize(h)))
    pub fn hash(&self) -> Hash {
        double_sha256(&self.serialize())
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// The committed merkle root; fails unless the field holds exactly 32 bytes
    pub fn merkle_root(&self) -> Result<Hash> {
        let root = self
            .record
            .bytes(MERKLE_ROOT)
            .ok_or_else(|| ScriptEngineError::Schema(format!("header has no {} field", MERKLE_ROOT)))?;
        <Hash>::try_from(root).map_err(|_| {
            ScriptEngineError::UnexpectedEncoding(format!(
                "{} is {} bytes, expected 32",
                MERKLE_ROOT,
                root.len()
            ))
        })
    }

    pub fn set_merkle_root(&mut self, root: Hash) -> Result<()> {
        self.record.set(MERKLE_ROOT, FieldValue::Hash(root))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    record: Record,
}

impl Block {
    pub fn new(schemas: &Arc<SchemaSet>) -> Self {
        Self {
            record: Record::new(schemas, EntityKind::Block),
        }
    }

    pub fn deserialize(schemas: &Arc<SchemaSet>, bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            record: Record::deserialize(schemas, EntityKind::Block, bytes)?,
        })
    }

    pub fn read(schemas: &Arc<SchemaSet>, reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            record: Record::read(schemas, EntityKind::Block, reader)?,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.record.serialize()
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn header_name(&self) -> Result<String> {
        self.record
            .schema()
            .fields()
            .iter()
            .find(|f| {
                f.encoding
                    == FieldEncoding::Nested {
                        kind: EntityKind::BlockHeader,
                    }
            })
            .map(|f| f.name.clone())
            .ok_or_else(|| ScriptEngineError::Schema("block has no header field".to_string()))
    }

    fn transactions_name(&self) -> Result<String> {
        self.record
            .schema()
            .vector_field(EntityKind::Transaction)
            .map(str::to_string)
            .ok_or_else(|| ScriptEngineError::Schema("block has no transactions vector".to_string()))
    }

    /// A copy of the block's header
    pub fn header(&self) -> Result<BlockHeader> {
        let name = self.header_name()?;
        let record = self
            .record
            .record(&name)
            .ok_or_else(|| ScriptEngineError::Schema(format!("field {} is not present", name)))?;
        Ok(BlockHeader {
            record: record.clone(),
        })
    }

    pub fn set_header(&mut self, header: BlockHeader) -> Result<()> {
        let name = self.header_name()?;
        self.record
            .set(&name, FieldValue::Record(Box::new(header.record)))
    }

    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        let name = self.transactions_name()?;
        self.record
            .records(&name)
            .unwrap_or_default()
            .iter()
            .cloned()
            .map(Transaction::from_record)
            .collect()
    }

    pub fn add_transaction(&mut self, tx: Transaction) -> Result<()> {
        let name = self.transactions_name()?;
        let transactions = self
            .record
            .records_mut(&name)
            .ok_or_else(|| ScriptEngineError::Schema(format!("field {} is not present", name)))?;
        transactions.push(tx.into_record());
        Ok(())
    }

    /// Header hash
    pub fn hash(&self) -> Result<Hash> {
        Ok(self.header()?.hash())
    }

    /// ComputeMerkleRoot: [𝒯𝒳] → ℍ
    ///
    /// 1. Leaves are the txids in block order
    /// 2. Each level hashes adjacent pairs; an odd last node pairs with itself
    /// 3. The single remaining node is the root
    pub fn merkle_root(&self) -> Result<Hash> {
        let hashes: Vec<Hash> = self.transactions()?.iter().map(Transaction::txid).collect();
        compute_merkle_root(&hashes)
    }

    /// True when the header commits to this block's transactions
    pub fn check_merkle_root(&self) -> Result<bool> {
        Ok(self.header()?.merkle_root()? == self.merkle_root()?)
    }

    /// Recompute the merkle root and store it in the header
    pub fn update_merkle_root(&mut self) -> Result<()> {
        let root = self.merkle_root()?;
        let mut header = self.header()?;
        header.set_merkle_root(root)?;
        self.set_header(header)
    }
}

pub fn compute_merkle_root(hashes: &[Hash]) -> Result<Hash> {
    if hashes.is_empty() {
        return Err(ScriptEngineError::Schema(
            "cannot compute merkle root of an empty transaction list".to_string(),
        ));
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0]);
                buf[32..].copy_from_slice(right);
                double_sha256(&buf)
            })
            .collect();
    }
    Ok(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;

    fn schemas() -> Arc<SchemaSet> {
        Arc::new(SchemaSet::bitcoin())
    }

    fn coinbase(tag: u8) -> Transaction {
        let mut tx = Transaction::new(&schemas());
        let mut script_sig = Script::new();
        script_sig.push_data(&[tag]);
        tx.add_input([0u8; 32], u32::MAX, script_sig, u32::MAX).unwrap();
        tx.add_output(50, Script::new()).unwrap();
        tx
    }

    #[test]
    fn test_header_is_80_bytes() {
        let header = BlockHeader::new(&schemas());
        assert_eq!(header.serialize().len(), 80);
    }

    #[test]
    fn test_single_transaction_root_is_txid() {
        let tx = coinbase(1);
        assert_eq!(compute_merkle_root(&[tx.txid()]).unwrap(), tx.txid());
        assert!(compute_merkle_root(&[]).is_err());
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let (a, b, c) = ([1u8; 32], [2u8; 32], [3u8; 32]);
        let three = compute_merkle_root(&[a, b, c]).unwrap();
        let four = compute_merkle_root(&[a, b, c, c]).unwrap();
        assert_eq!(three, four);
    }

    #[test]
    fn test_block_round_trip_and_merkle_check() {
        let mut block = Block::new(&schemas());
        block.add_transaction(coinbase(1)).unwrap();
        block.add_transaction(coinbase(2)).unwrap();
        assert!(!block.check_merkle_root().unwrap());

        block.update_merkle_root().unwrap();
        assert!(block.check_merkle_root().unwrap());

        let bytes = block.serialize();
        let decoded = Block::deserialize(&schemas(), &bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.transactions().unwrap().len(), 2);
        assert_eq!(decoded.hash().unwrap(), block.header().unwrap().hash());
    }
}
