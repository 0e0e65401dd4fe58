//! Script numbers: little-endian sign-magnitude integers of arbitrary precision

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};

/// Decode a stack element as a script number. The empty byte string is zero.
pub fn decode_num(bytes: &[u8]) -> BigInt {
    let Some(&last) = bytes.last() else {
        return BigInt::zero();
    };

    let mut magnitude = bytes.to_vec();
    let top = magnitude.len() - 1;
    magnitude[top] = last & 0x7f;
    let value = BigInt::from_bytes_le(Sign::Plus, &magnitude);

    if last & 0x80 != 0 {
        -value
    } else {
        value
    }
}

/// Encode a number with the minimal script-number encoding
pub fn encode_num(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }

    let (_, mut result) = value.abs().to_bytes_le();
    let negative = value.is_negative();

    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }

    result
}

pub fn encode_i64(value: i64) -> Vec<u8> {
    encode_num(&BigInt::from(value))
}

/// Decode a number that must fit the given range, e.g. a stack index or key count
pub fn decode_bounded(bytes: &[u8]) -> Option<i64> {
    decode_num(bytes).to_i64()
}

/// Stack element truthiness: false for any encoding of zero, including negative zero
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            if i == data.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

pub fn encode_bool(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}
