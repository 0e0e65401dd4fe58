//! Integration tests for scriptSig → scriptPubKey → P2SH verification

use script_engine::opcodes::*;
use script_engine::sighash::{public_key, sign_digest, signature_hash};
use script_engine::*;

const ALICE: [u8; 32] = [0x11; 32];
const BOB: [u8; 32] = [0x22; 32];

fn spending_tx(engine: &ScriptEngine, inputs: usize, outputs: usize) -> Transaction {
    let mut tx = engine.new_transaction();
    for i in 0..inputs {
        tx.add_input([i as u8 + 1; 32], i as u32, Script::new(), SEQUENCE_FINAL).unwrap();
    }
    for i in 0..outputs {
        tx.add_output(1_000 * (i as i64 + 1), Script::from_raw(vec![OP_TRUE])).unwrap();
    }
    tx
}

fn pay_to_pubkey(secret: &[u8; 32]) -> Script {
    let mut script = Script::new();
    script.push_data(&public_key(secret).unwrap());
    script.push_opcode(OP_CHECKSIG);
    script
}

fn sign(secret: &[u8; 32], script_code: &Script, tx: &Transaction, input_index: usize) -> Vec<u8> {
    let digest = signature_hash(script_code, tx, input_index, SighashType::ALL).unwrap();
    sign_digest(secret, &digest, SighashType::ALL).unwrap()
}

#[test]
fn test_nested_conditionals() {
    let engine = ScriptEngine::bitcoin();
    let script_pubkey = engine
        .parse_script("OP_IF OP_IF 1 OP_ELSE 0 OP_ENDIF OP_ENDIF")
        .unwrap();

    let mut tx = spending_tx(&engine, 1, 1);
    tx.set_input_script(0, engine.parse_script("1 1").unwrap()).unwrap();
    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(execution.script_passed);
    assert!(execution.script_verified);

    tx.set_input_script(0, engine.parse_script("0 1").unwrap()).unwrap();
    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(!execution.script_passed);
    assert!(!execution.script_verified);
}

#[test]
fn test_pay_to_pubkey() {
    let engine = ScriptEngine::bitcoin();
    let script_pubkey = pay_to_pubkey(&ALICE);
    let mut tx = spending_tx(&engine, 1, 1);

    let mut script_sig = Script::new();
    script_sig.push_data(&sign(&ALICE, &script_pubkey, &tx, 0));
    tx.set_input_script(0, script_sig).unwrap();
    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(execution.is_valid(), "{:?}", execution.error);

    // Bob's signature does not satisfy Alice's key
    let mut script_sig = Script::new();
    script_sig.push_data(&sign(&BOB, &script_pubkey, &tx, 0));
    tx.set_input_script(0, script_sig).unwrap();
    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(!execution.is_valid());
    assert!(matches!(execution.error, Some(ScriptEngineError::VerifyFailed(_))));
}

#[test]
fn test_bare_multisig() {
    let engine = ScriptEngine::bitcoin();
    let mut script_pubkey = Script::new();
    script_pubkey.push_opcode(OP_1 + 1);
    script_pubkey.push_data(&public_key(&ALICE).unwrap());
    script_pubkey.push_data(&public_key(&BOB).unwrap());
    script_pubkey.push_opcode(OP_1 + 1);
    script_pubkey.push_opcode(OP_CHECKMULTISIG);

    let mut tx = spending_tx(&engine, 1, 1);
    let mut script_sig = Script::new();
    script_sig.push_opcode(OP_0);
    script_sig.push_data(&sign(&ALICE, &script_pubkey, &tx, 0));
    script_sig.push_data(&sign(&BOB, &script_pubkey, &tx, 0));
    tx.set_input_script(0, script_sig).unwrap();
    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(execution.is_valid(), "{:?}", execution.error);

    // Signatures out of key order fail
    let mut script_sig = Script::new();
    script_sig.push_opcode(OP_0);
    script_sig.push_data(&sign(&BOB, &script_pubkey, &tx, 0));
    script_sig.push_data(&sign(&ALICE, &script_pubkey, &tx, 0));
    tx.set_input_script(0, script_sig).unwrap();
    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(!execution.script_verified);
}

#[test]
fn test_p2sh_spend() {
    let engine = ScriptEngine::bitcoin();
    let redeem = pay_to_pubkey(&ALICE);
    let script_pubkey = Script::p2sh(&redeem);
    assert!(script_pubkey.is_p2sh());

    let mut tx = spending_tx(&engine, 1, 1);
    let mut script_sig = Script::new();
    script_sig.push_data(&sign(&ALICE, &redeem, &tx, 0));
    script_sig.push_data(redeem.as_bytes());
    tx.set_input_script(0, script_sig).unwrap();

    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(execution.script_passed, "{:?}", execution.error);
    assert!(execution.script_verified);
    assert!(execution
        .steps
        .iter()
        .any(|s| s.phase == ExecutionPhase::RedeemScript && s.opcode == OP_CHECKSIG));
    assert_eq!(execution.final_stack(), Some(&[vec![1u8]][..]));
}

#[test]
fn test_p2sh_wrong_script_hash() {
    let engine = ScriptEngine::bitcoin();
    let redeem = pay_to_pubkey(&ALICE);
    let script_pubkey = Script::p2sh(&pay_to_pubkey(&BOB));

    let mut tx = spending_tx(&engine, 1, 1);
    let mut script_sig = Script::new();
    script_sig.push_data(&sign(&ALICE, &redeem, &tx, 0));
    script_sig.push_data(redeem.as_bytes());
    tx.set_input_script(0, script_sig).unwrap();

    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(!execution.script_verified);
    assert!(!execution.script_passed);
    assert!(execution
        .steps
        .iter()
        .all(|s| s.phase != ExecutionPhase::RedeemScript));
}

#[test]
fn test_p2sh_failing_redeem_script() {
    let engine = ScriptEngine::bitcoin();
    let redeem = pay_to_pubkey(&ALICE);
    let script_pubkey = Script::p2sh(&redeem);

    let mut tx = spending_tx(&engine, 1, 1);
    let mut script_sig = Script::new();
    script_sig.push_data(&sign_digest(&ALICE, &[0x42; 32], SighashType::ALL).unwrap());
    script_sig.push_data(redeem.as_bytes());
    tx.set_input_script(0, script_sig).unwrap();

    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert!(execution.script_verified);
    assert!(!execution.script_passed);
    assert!(!execution.is_valid());
    assert!(matches!(execution.error, Some(ScriptEngineError::VerifyFailed(_))));
}

#[test]
fn test_op_return_output_is_unspendable() {
    let engine = ScriptEngine::bitcoin();
    let mut tx = spending_tx(&engine, 1, 1);
    tx.set_input_script(0, engine.parse_script("1").unwrap()).unwrap();
    let script_pubkey = engine.parse_script("OP_RETURN \"data\"").unwrap();
    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 0));
    assert_eq!(execution.error, Some(ScriptEngineError::OpReturn));
    assert!(!execution.script_verified);
}

#[test]
fn test_signature_hash_variants_are_distinct() {
    let engine = ScriptEngine::bitcoin();
    let tx = spending_tx(&engine, 2, 2);
    let script_code = pay_to_pubkey(&ALICE);

    let mut digests = Vec::new();
    for input_index in 0..2 {
        for sighash in [
            SighashType::ALL,
            SighashType::NONE,
            SighashType::SINGLE,
            SighashType::ALL.with_anyone_can_pay(),
        ] {
            let digest = engine.signature_hash(&script_code, &tx, input_index, sighash).unwrap();
            assert_eq!(digest, engine.signature_hash(&script_code, &tx, input_index, sighash).unwrap());
            digests.push(digest);
        }
    }
    let mut unique = digests.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 8);
}

#[test]
fn test_sighash_single_without_output_is_an_error() {
    let engine = ScriptEngine::bitcoin();
    let mut tx = spending_tx(&engine, 2, 1);
    let script_pubkey = pay_to_pubkey(&ALICE);

    let signature = sign_digest(&ALICE, &[0x01; 32], SighashType::SINGLE).unwrap();
    let mut script_sig = Script::new();
    script_sig.push_data(&signature);
    tx.set_input_script(1, script_sig).unwrap();

    let execution = engine.verify(&script_pubkey, SpendContext::new(&tx, 1));
    let error = execution.error.unwrap();
    assert!(error.is_sighash_range(), "{:?}", error);
    assert!(!execution.script_verified);
}
