//! Legacy signature hashing, digest signing and signature checking

use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};

use crate::codec::{double_sha256, FieldValue};
use crate::error::{Result, ScriptEngineError};
use crate::opcodes::OP_CODESEPARATOR;
use crate::schema::{SCRIPT_PUBKEY, SEQUENCE, VALUE};
use crate::script::Script;
use crate::transaction::Transaction;
use crate::types::Hash;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Sighash flag set: a base mode plus the optional ANYONECANPAY bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SighashType(u32);

impl SighashType {
    pub const ALL: SighashType = SighashType(SIGHASH_ALL);
    pub const NONE: SighashType = SighashType(SIGHASH_NONE);
    pub const SINGLE: SighashType = SighashType(SIGHASH_SINGLE);

    /// Any value is accepted; unknown base modes hash like ALL
    pub fn from_u32(value: u32) -> Self {
        SighashType(value)
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }

    pub fn with_anyone_can_pay(self) -> Self {
        SighashType(self.0 | SIGHASH_ANYONECANPAY)
    }

    pub fn anyone_can_pay(self) -> bool {
        self.0 & SIGHASH_ANYONECANPAY != 0
    }

    /// Base mode with the modifier bits masked off
    pub fn base(self) -> u32 {
        self.0 & 0x1f
    }
}

impl Default for SighashType {
    fn default() -> Self {
        SighashType::ALL
    }
}

/// SignatureHash: 𝒮𝒞 × 𝒯𝒳 × ℕ × ℕ → ℍ
///
/// 1. Copy tx; blank every scriptSig, then put `script_code` (without
///    OP_CODESEPARATOR) into the signed input
/// 2. NONE: drop all outputs, zero the other inputs' sequences
/// 3. SINGLE: keep outputs up to `input_index`, earlier ones replaced by
///    null outputs (value -1, empty script); zero the other inputs' sequences
/// 4. ANYONECANPAY: keep only the signed input
/// 5. Return SHA256(SHA256(serialize(tx') || sighash_type as u32 LE))
///
/// Out-of-range indices are errors, never a placeholder digest.
pub fn signature_hash(
    script_code: &Script,
    tx: &Transaction,
    input_index: usize,
    sighash_type: SighashType,
) -> Result<Hash> {
    let input_count = tx.inputs().len();
    if input_index >= input_count {
        return Err(ScriptEngineError::InputIndexOutOfRange {
            index: input_index,
            count: input_count,
        });
    }
    let output_count = tx.outputs().len();
    if sighash_type.base() == SIGHASH_SINGLE && input_index >= output_count {
        return Err(ScriptEngineError::OutputIndexOutOfRange {
            index: input_index,
            count: output_count,
        });
    }

    // 1. Scripts
    let mut copy = tx.clone();
    let script_code = script_code.remove_opcode(OP_CODESEPARATOR)?;
    for i in 0..input_count {
        copy.set_input_script(i, Script::new())?;
    }
    copy.set_input_script(input_index, script_code)?;

    match sighash_type.base() {
        // 2. No outputs signed
        SIGHASH_NONE => {
            copy.outputs_mut()?.clear();
            zero_other_sequences(&mut copy, input_index)?;
        }
        // 3. Only the matching output signed
        SIGHASH_SINGLE => {
            let outputs = copy.outputs_mut()?;
            outputs.truncate(input_index + 1);
            for output in outputs.iter_mut().take(input_index) {
                output.set(VALUE, FieldValue::Int(-1))?;
                output.set(SCRIPT_PUBKEY, FieldValue::Script(Script::new()))?;
            }
            zero_other_sequences(&mut copy, input_index)?;
        }
        _ => {}
    }

    // 4. Only the signed input
    if sighash_type.anyone_can_pay() {
        let inputs = copy.inputs_mut()?;
        let signed = inputs.swap_remove(input_index);
        inputs.clear();
        inputs.push(signed);
    }

    // 5. Digest
    let mut preimage = copy.serialize();
    preimage.extend_from_slice(&sighash_type.to_u32().to_le_bytes());
    Ok(double_sha256(&preimage))
}

fn zero_other_sequences(tx: &mut Transaction, input_index: usize) -> Result<()> {
    for (i, input) in tx.inputs_mut()?.iter_mut().enumerate() {
        if i != input_index {
            input.set(SEQUENCE, FieldValue::UInt(0))?;
        }
    }
    Ok(())
}

/// Sign a precomputed digest; returns the DER signature followed by the sighash byte
pub fn sign_digest(secret_key: &[u8], digest: &Hash, sighash_type: SighashType) -> Result<Vec<u8>> {
    let secp = Secp256k1::signing_only();
    let secret_key =
        SecretKey::from_slice(secret_key).map_err(|e| ScriptEngineError::Signature(e.to_string()))?;
    let message =
        Message::from_digest_slice(digest).map_err(|e| ScriptEngineError::Signature(e.to_string()))?;

    let signature = secp.sign_ecdsa(&message, &secret_key);
    let mut bytes = signature.serialize_der().to_vec();
    bytes.push(sighash_type.to_u32() as u8);
    Ok(bytes)
}

/// Compressed public key for a secret key
pub fn public_key(secret_key: &[u8]) -> Result<Vec<u8>> {
    let secp = Secp256k1::signing_only();
    let secret_key =
        SecretKey::from_slice(secret_key).map_err(|e| ScriptEngineError::Signature(e.to_string()))?;
    Ok(PublicKey::from_secret_key(&secp, &secret_key).serialize().to_vec())
}

/// Check a script signature (DER plus sighash byte) against a public key.
///
/// Malformed keys or signatures simply fail the check. Sighash range
/// errors are returned to the caller.
pub fn check_signature(
    signature: &[u8],
    pubkey: &[u8],
    script_code: &Script,
    tx: &Transaction,
    input_index: usize,
) -> Result<bool> {
    let Some((&hash_type, der)) = signature.split_last() else {
        return Ok(false);
    };
    let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
        return Ok(false);
    };
    let Ok(mut signature) = Signature::from_der_lax(der) else {
        return Ok(false);
    };
    signature.normalize_s();

    let digest = signature_hash(script_code, tx, input_index, SighashType::from_u32(hash_type as u32))?;
    let message =
        Message::from_digest_slice(&digest).map_err(|e| ScriptEngineError::Signature(e.to_string()))?;

    let secp = Secp256k1::verification_only();
    Ok(secp.verify_ecdsa(&message, &signature, &pubkey).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::*;
    use crate::schema::SchemaSet;
    use std::sync::Arc;

    const SECRET: [u8; 32] = [0x11; 32];

    fn two_by_two() -> Transaction {
        let mut tx = Transaction::new(&Arc::new(SchemaSet::bitcoin()));
        tx.add_input([1u8; 32], 0, Script::new(), 0xffff_ffff).unwrap();
        tx.add_input([2u8; 32], 1, Script::new(), 0xffff_ffff).unwrap();
        tx.add_output(1000, Script::from_raw(vec![OP_TRUE])).unwrap();
        tx.add_output(2000, Script::from_raw(vec![OP_TRUE])).unwrap();
        tx
    }

    fn p2pk() -> Script {
        let mut script = Script::new();
        script.push_data(&public_key(&SECRET).unwrap());
        script.push_opcode(OP_CHECKSIG);
        script
    }

    #[test]
    fn test_deterministic_and_distinct() {
        let tx = two_by_two();
        let script = p2pk();
        let mut digests = Vec::new();
        for base in [SighashType::ALL, SighashType::NONE, SighashType::SINGLE] {
            for sighash in [base, base.with_anyone_can_pay()] {
                let a = signature_hash(&script, &tx, 1, sighash).unwrap();
                let b = signature_hash(&script, &tx, 1, sighash).unwrap();
                assert_eq!(a, b);
                digests.push(a);
            }
        }
        let mut unique = digests.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), digests.len());
    }

    #[test]
    fn test_does_not_mutate_transaction() {
        let tx = two_by_two();
        let before = tx.serialize();
        signature_hash(&p2pk(), &tx, 0, SighashType::NONE.with_anyone_can_pay()).unwrap();
        assert_eq!(tx.serialize(), before);
    }

    #[test]
    fn test_range_errors() {
        let tx = two_by_two();
        let err = signature_hash(&p2pk(), &tx, 2, SighashType::ALL).unwrap_err();
        assert!(matches!(err, ScriptEngineError::InputIndexOutOfRange { index: 2, count: 2 }));

        let mut tx = two_by_two();
        tx.outputs_mut().unwrap().truncate(1);
        let err = signature_hash(&p2pk(), &tx, 1, SighashType::SINGLE).unwrap_err();
        assert!(err.is_sighash_range());
        assert!(signature_hash(&p2pk(), &tx, 1, SighashType::ALL).is_ok());
    }

    #[test]
    fn test_codeseparator_ignored() {
        let tx = two_by_two();
        let mut with_sep = Script::new();
        with_sep.push_opcode(OP_CODESEPARATOR);
        with_sep.push_data(&public_key(&SECRET).unwrap());
        with_sep.push_opcode(OP_CHECKSIG);
        assert_eq!(
            signature_hash(&with_sep, &tx, 0, SighashType::ALL).unwrap(),
            signature_hash(&p2pk(), &tx, 0, SighashType::ALL).unwrap()
        );
    }

    #[test]
    fn test_sign_and_check() {
        let tx = two_by_two();
        let script = p2pk();
        let digest = signature_hash(&script, &tx, 0, SighashType::ALL).unwrap();
        let signature = sign_digest(&SECRET, &digest, SighashType::ALL).unwrap();
        assert_eq!(signature.last(), Some(&0x01));

        let pubkey = public_key(&SECRET).unwrap();
        assert!(check_signature(&signature, &pubkey, &script, &tx, 0).unwrap());
        assert!(!check_signature(&signature, &pubkey, &script, &tx, 1).unwrap());
        assert!(!check_signature(&[], &pubkey, &script, &tx, 0).unwrap());
        assert!(!check_signature(&signature, &[0x02; 3], &script, &tx, 0).unwrap());
    }

    #[test]
    fn test_invalid_secret_key() {
        assert!(matches!(
            sign_digest(&[0u8; 32], &[1u8; 32], SighashType::ALL),
            Err(ScriptEngineError::Signature(_))
        ));
    }
}
