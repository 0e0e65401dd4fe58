//! Core value types shared across the engine

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Out-of-band chain data for opcodes that inspect chain state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub block_height: u32,
    pub block_time: u32,
}

impl ExecutionContext {
    pub fn new(block_height: u32, block_time: u32) -> Self {
        Self {
            block_height,
            block_time,
        }
    }
}
