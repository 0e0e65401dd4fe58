//! Integration tests for the schema-driven codec

use script_engine::*;

const GENESIS_COINBASE: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

const GENESIS_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

fn reversed_hex(hash: Hash) -> String {
    let mut hash = hash;
    hash.reverse();
    hex::encode(hash)
}

#[test]
fn test_genesis_coinbase_round_trip() -> anyhow::Result<()> {
    let profile = NetworkProfile::bitcoin();
    let bytes = hex::decode(GENESIS_COINBASE)?;
    let tx = profile.deserialize_transaction(&bytes)?;

    assert_eq!(tx.version(), 1);
    assert_eq!(tx.inputs().len(), 1);
    assert_eq!(tx.outputs().len(), 1);
    assert!(tx.is_coinbase());
    assert_eq!(tx.output_value(0)?, 5_000_000_000);
    assert_eq!(tx.output_script(0)?.len(), 67);
    assert_eq!(tx.serialize(), bytes);
    assert_eq!(
        reversed_hex(tx.txid()),
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
    );
    Ok(())
}

#[test]
fn test_genesis_block() -> anyhow::Result<()> {
    let profile = NetworkProfile::bitcoin();
    let mut bytes = hex::decode(GENESIS_HEADER)?;
    bytes.push(0x01);
    bytes.extend(hex::decode(GENESIS_COINBASE)?);

    let block = profile.deserialize_block(&bytes)?;
    assert_eq!(block.serialize(), bytes);
    assert_eq!(block.transactions()?.len(), 1);
    assert!(block.check_merkle_root()?);
    assert_eq!(
        reversed_hex(block.hash()?),
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
    );

    let header = profile.deserialize_header(&hex::decode(GENESIS_HEADER)?)?;
    assert_eq!(header, block.header()?);
    Ok(())
}

#[test]
fn test_built_transaction_round_trip() {
    let profile = NetworkProfile::bitcoin();
    let mut tx = profile.new_transaction();
    tx.set_version(2).unwrap();
    tx.set_lock_time(500_000).unwrap();
    let script_sig = profile.parse_script("0x00112233 \"memo\"").unwrap();
    tx.add_input([0xab; 32], 3, script_sig, 0xffff_fffe).unwrap();
    tx.add_input([0xcd; 32], 0, Script::new(), SEQUENCE_FINAL).unwrap();
    let script_pubkey = profile
        .parse_script("OP_DUP OP_HASH160 0x89abcdefabbaabbaabbaabbaabbaabbaabbaabba OP_EQUALVERIFY OP_CHECKSIG")
        .unwrap();
    tx.add_output(12_345, script_pubkey.clone()).unwrap();
    tx.add_output(0, Script::new()).unwrap();

    let bytes = tx.serialize();
    let decoded = profile.deserialize_transaction(&bytes).unwrap();
    assert_eq!(decoded, tx);
    assert_eq!(decoded.serialize(), bytes);
    assert_eq!(decoded.input_prevout(0).unwrap(), ([0xab; 32], 3));
    assert_eq!(decoded.input_sequence(0).unwrap(), 0xffff_fffe);
    assert_eq!(decoded.output_script(0).unwrap(), &script_pubkey);
    assert_eq!(decoded.lock_time(), 500_000);
    assert!(!decoded.is_coinbase());
}

#[test]
fn test_clams_round_trip() {
    let profile = NetworkProfile::clams();

    let mut v1 = profile.new_transaction();
    v1.record_mut().set_int("time", 1_400_000_000).unwrap();
    v1.add_input([1; 32], 0, Script::new(), SEQUENCE_FINAL).unwrap();
    v1.add_output(100, Script::new()).unwrap();
    let bytes = v1.serialize();
    let decoded = profile.deserialize_transaction(&bytes).unwrap();
    assert_eq!(decoded, v1);
    assert_eq!(decoded.record().int("time"), Some(1_400_000_000));
    assert!(!decoded.record().is_present("clam_speech"));

    let mut v2 = v1.clone();
    v2.set_version(2).unwrap();
    v2.record_mut()
        .set("clam_speech", FieldValue::Bytes(b"clams are money".to_vec()))
        .unwrap();
    let bytes = v2.serialize();
    let decoded = profile.deserialize_transaction(&bytes).unwrap();
    assert_eq!(decoded.record().bytes("clam_speech"), Some(&b"clams are money"[..]));
    assert_eq!(decoded.serialize(), bytes);
}

#[test]
fn test_clams_block_signature() {
    let profile = NetworkProfile::clams();
    let schemas = profile.schemas();
    let mut block = Block::new(schemas);
    let mut tx = profile.new_transaction();
    tx.add_input([0; 32], u32::MAX, Script::new(), SEQUENCE_FINAL).unwrap();
    block.add_transaction(tx).unwrap();
    block.update_merkle_root().unwrap();
    block
        .record_mut()
        .set("block_sig", FieldValue::Bytes(vec![0x30, 0x44, 0x02]))
        .unwrap();

    let bytes = block.serialize();
    let decoded = profile.deserialize_block(&bytes).unwrap();
    assert_eq!(decoded, block);
    assert_eq!(decoded.record().bytes("block_sig"), Some(&[0x30, 0x44, 0x02][..]));
    assert!(decoded.check_merkle_root().unwrap());
}

#[test]
fn test_truncated_transaction() {
    let profile = NetworkProfile::bitcoin();
    let bytes = hex::decode(GENESIS_COINBASE).unwrap();
    for cut in [0, 3, 5, 40, 100, bytes.len() - 1] {
        let err = profile.deserialize_transaction(&bytes[..cut]).unwrap_err();
        assert!(
            matches!(err, ScriptEngineError::TruncatedInput { .. }),
            "cut at {}: {:?}",
            cut,
            err
        );
    }
}

#[test]
fn test_non_canonical_compact_size() {
    let profile = NetworkProfile::bitcoin();
    // version, then an input count of 0 written in the 3-byte form
    let bytes = [0x01, 0x00, 0x00, 0x00, 0xfd, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    let err = profile.deserialize_transaction(&bytes).unwrap_err();
    assert!(matches!(err, ScriptEngineError::UnexpectedEncoding(_)));
}

#[test]
fn test_trailing_bytes_rejected() {
    let profile = NetworkProfile::bitcoin();
    let mut bytes = profile.new_transaction().serialize();
    bytes.push(0);
    assert!(matches!(
        profile.deserialize_transaction(&bytes),
        Err(ScriptEngineError::UnexpectedEncoding(_))
    ));
}

#[test]
fn test_profiles_disagree_on_layout() {
    let bitcoin = NetworkProfile::bitcoin();
    let clams = NetworkProfile::clams();
    let bytes = hex::decode(GENESIS_COINBASE).unwrap();
    assert!(bitcoin.deserialize_transaction(&bytes).is_ok());
    assert!(clams.deserialize_transaction(&bytes).is_err());
}

#[test]
fn test_short_outpoint_hash_is_not_a_prevout() {
    let profile = NetworkProfile::from_json(
        r#"{
            "name": "short-hash",
            "outpoint": [
                {"name": "hash", "encoding": {"type": "fixed_bytes", "width": 20}},
                {"name": "index", "encoding": {"type": "int", "width": 4, "signed": false}}
            ]
        }"#,
    )
    .unwrap();

    let mut bytes = vec![0x01, 0x00, 0x00, 0x00, 0x01];
    bytes.extend([0u8; 20]);
    bytes.extend([0xff; 4]);
    bytes.push(0x00);
    bytes.extend([0xff; 4]);
    bytes.extend([0x00; 5]);

    let tx = profile.deserialize_transaction(&bytes).unwrap();
    assert_eq!(tx.serialize(), bytes);
    assert!(!tx.is_coinbase());
    assert!(matches!(
        tx.input_prevout(0),
        Err(ScriptEngineError::UnexpectedEncoding(_))
    ));
}

#[test]
fn test_variable_merkle_root_fails_check() {
    let profile = NetworkProfile::from_json(
        r#"{
            "name": "var-root",
            "header": [
                {"name": "version", "encoding": {"type": "int", "width": 4, "signed": true}},
                {"name": "prev_block", "encoding": {"type": "hash"}},
                {"name": "merkle_root", "encoding": {"type": "var_bytes"}},
                {"name": "timestamp", "encoding": {"type": "int", "width": 4, "signed": false}},
                {"name": "bits", "encoding": {"type": "int", "width": 4, "signed": false}},
                {"name": "nonce", "encoding": {"type": "int", "width": 4, "signed": false}}
            ]
        }"#,
    )
    .unwrap();

    let mut block = Block::new(profile.schemas());
    let mut tx = profile.new_transaction();
    tx.add_input([0; 32], u32::MAX, Script::new(), SEQUENCE_FINAL).unwrap();
    block.add_transaction(tx).unwrap();

    let err = block.check_merkle_root().unwrap_err();
    assert!(matches!(err, ScriptEngineError::UnexpectedEncoding(_)), "{:?}", err);
    let err = block.header().unwrap().merkle_root().unwrap_err();
    assert!(matches!(err, ScriptEngineError::UnexpectedEncoding(_)));
}
