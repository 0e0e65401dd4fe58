//! Script representation: parsing from raw bytes and mnemonic text, rendering back to both
//!
//! A script is kept as its raw bytes so that a malformed script read off the
//! wire (e.g. a coinbase scriptSig) still round-trips. Parsing into
//! [`Instruction`]s happens on demand and reports truncated pushes instead of
//! silently cutting them short.

use num_bigint::BigInt;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::{Result, ScriptEngineError};
use crate::opcodes::*;
use crate::scriptnum::encode_num;

/// One parsed element of a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    /// Pushed bytes for `OP_0`, direct pushes and `OP_PUSHDATA1/2/4`
    pub data: Option<Vec<u8>>,
    /// Byte offset of the opcode within the script
    pub offset: usize,
}

impl Instruction {
    pub fn is_push(&self) -> bool {
        self.data.is_some()
    }

    /// Number of script bytes this instruction occupies
    pub fn encoded_len(&self) -> usize {
        match &self.data {
            None => 1,
            Some(data) => 1 + push_prefix_len(self.opcode) + data.len(),
        }
    }
}

/// An ordered sequence of opcodes and data pushes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Script {
    bytes: Vec<u8>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw bytes, failing on a truncated trailing push
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        parse_instructions(bytes)?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Wrap raw bytes without validating them
    pub fn from_raw(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Build a script from mnemonic text.
    ///
    /// Accepted tokens, separated by whitespace:
    /// - opcode names, with the `OP_` prefix optional except for numeric pushes
    /// - `0x`-prefixed hex literals, pushed as data
    /// - decimal integers, pushed as script numbers
    /// - double-quoted strings, pushed as their UTF-8 bytes
    /// - bare hex (even length) when the token is neither a name nor a decimal
    ///
    /// `OP_PUSHDATA1/2/4` followed by a literal forces that push opcode.
    pub fn from_text(text: &str, table: &OpcodeTable) -> Result<Self> {
        let mut script = Script::new();
        let mut pending_push: Option<u8> = None;

        for token in tokenize(text)? {
            let data = match token {
                Token::Str(s) => s.into_bytes(),
                Token::Word(word) => {
                    if let Some(opcode) = table.value(&word) {
                        if pending_push.is_some() {
                            return Err(ScriptEngineError::Parse(format!(
                                "expected push data, found {}",
                                word
                            )));
                        }
                        if matches!(opcode, OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4) {
                            pending_push = Some(opcode);
                        } else {
                            script.push_opcode(opcode);
                        }
                        continue;
                    }
                    parse_literal(&word)?
                }
            };

            match pending_push.take() {
                Some(opcode) => script.push_data_with(opcode, &data)?,
                None => {
                    script.push_data(&data);
                }
            }
        }

        if let Some(opcode) = pending_push {
            return Err(ScriptEngineError::Parse(format!(
                "{} at end of script without push data",
                table.name(opcode)
            )));
        }
        Ok(script)
    }

    /// Render as mnemonic text. Pushes of printable ASCII become string
    /// literals, all other pushes hex literals.
    pub fn to_text(&self, table: &OpcodeTable) -> Result<String> {
        let mut tokens = Vec::new();
        for instruction in self.instructions()? {
            let Some(data) = &instruction.data else {
                tokens.push(table.name(instruction.opcode));
                continue;
            };
            if instruction.opcode == OP_0 {
                tokens.push(table.name(OP_0));
                continue;
            }

            let literal = render_literal(data);
            if canonical_push_opcode(data.len()) == instruction.opcode {
                tokens.push(literal);
            } else {
                tokens.push(format!("{} {}", table.name(instruction.opcode), literal));
            }
        }
        Ok(tokens.join(" "))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn instructions(&self) -> Result<Vec<Instruction>> {
        parse_instructions(&self.bytes)
    }

    pub fn push_opcode(&mut self, opcode: u8) -> &mut Self {
        self.bytes.push(opcode);
        self
    }

    /// Append a push of `data` using the shortest length prefix
    pub fn push_data(&mut self, data: &[u8]) -> &mut Self {
        let opcode = canonical_push_opcode(data.len());
        self.write_push(opcode, data);
        self
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.push_data(&encode_num(&BigInt::from(value)))
    }

    /// Append a push of `data` with an explicit `OP_PUSHDATA1/2/4` opcode
    pub fn push_data_with(&mut self, opcode: u8, data: &[u8]) -> Result<()> {
        let max = match opcode {
            OP_PUSHDATA1 => u8::MAX as usize,
            OP_PUSHDATA2 => u16::MAX as usize,
            OP_PUSHDATA4 => u32::MAX as usize,
            _ => {
                return Err(ScriptEngineError::Parse(format!(
                    "{:#04x} is not a PUSHDATA opcode",
                    opcode
                )))
            }
        };
        if data.len() > max {
            return Err(ScriptEngineError::Parse(format!(
                "{} bytes do not fit a {:#04x} push",
                data.len(),
                opcode
            )));
        }
        self.write_push(opcode, data);
        Ok(())
    }

    fn write_push(&mut self, opcode: u8, data: &[u8]) {
        self.bytes.push(opcode);
        match opcode {
            OP_PUSHDATA1 => self.bytes.push(data.len() as u8),
            OP_PUSHDATA2 => self.bytes.extend_from_slice(&(data.len() as u16).to_le_bytes()),
            OP_PUSHDATA4 => self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes()),
            _ => {}
        }
        self.bytes.extend_from_slice(data);
    }

    /// True when every instruction is a push (opcodes up to `OP_16`)
    pub fn is_push_only(&self) -> bool {
        match self.instructions() {
            Ok(instructions) => instructions.iter().all(|i| i.opcode <= OP_16),
            Err(_) => false,
        }
    }

    /// `OP_HASH160 <20 bytes> OP_EQUAL`
    pub fn is_p2sh(&self) -> bool {
        self.bytes.len() == 23
            && self.bytes[0] == OP_HASH160
            && self.bytes[1] == 0x14
            && self.bytes[22] == OP_EQUAL
    }

    /// Pay-to-script-hash locking script committing to `redeem_script`
    pub fn p2sh(redeem_script: &Script) -> Script {
        let mut script = Script::new();
        script
            .push_opcode(OP_HASH160)
            .push_data(&hash160(redeem_script.as_bytes()))
            .push_opcode(OP_EQUAL);
        script
    }

    /// Copy with every occurrence of `opcode` removed
    pub fn remove_opcode(&self, opcode: u8) -> Result<Script> {
        self.retain(|i| i.opcode != opcode || i.data.is_some())
    }

    /// Copy with every canonical push of `data` removed
    pub fn remove_push(&self, data: &[u8]) -> Result<Script> {
        let opcode = canonical_push_opcode(data.len());
        self.retain(|i| !(i.opcode == opcode && i.data.as_deref() == Some(data)))
    }

    /// Copy starting after the instruction at byte offset `offset`
    pub fn subscript_after(&self, offset: usize) -> Result<Script> {
        let instructions = self.instructions()?;
        let start = instructions
            .iter()
            .find(|i| i.offset == offset)
            .map(|i| i.offset + i.encoded_len())
            .ok_or_else(|| {
                ScriptEngineError::Parse(format!("no instruction at offset {}", offset))
            })?;
        Ok(Script::from_raw(self.bytes[start..].to_vec()))
    }

    fn retain(&self, keep: impl Fn(&Instruction) -> bool) -> Result<Script> {
        let mut bytes = Vec::with_capacity(self.bytes.len());
        for instruction in self.instructions()? {
            if keep(&instruction) {
                let end = instruction.offset + instruction.encoded_len();
                bytes.extend_from_slice(&self.bytes[instruction.offset..end]);
            }
        }
        Ok(Script::from_raw(bytes))
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Script::from_raw(bytes)
    }
}

/// RIPEMD160(SHA256(x))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha256_hash = Sha256::digest(data);
    let ripemd160_hash = Ripemd160::digest(sha256_hash);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd160_hash);
    out
}

/// Push opcode with the shortest length prefix for `len` bytes
pub fn canonical_push_opcode(len: usize) -> u8 {
    match len {
        0 => OP_0,
        1..=75 => len as u8,
        76..=0xff => OP_PUSHDATA1,
        0x100..=0xffff => OP_PUSHDATA2,
        _ => OP_PUSHDATA4,
    }
}

fn push_prefix_len(opcode: u8) -> usize {
    match opcode {
        OP_PUSHDATA1 => 1,
        OP_PUSHDATA2 => 2,
        OP_PUSHDATA4 => 4,
        _ => 0,
    }
}

fn parse_instructions(bytes: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut index = 0usize;

    while index < bytes.len() {
        let offset = index;
        let opcode = bytes[index];
        index += 1;

        let push_len = match opcode {
            OP_0 => Some(0),
            0x01..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => {
                let width = push_prefix_len(opcode);
                let prefix = bytes.get(index..index + width).ok_or_else(|| {
                    ScriptEngineError::Parse(format!(
                        "truncated length prefix of push at offset {}",
                        offset
                    ))
                })?;
                index += width;
                let mut len_bytes = [0u8; 4];
                len_bytes[..width].copy_from_slice(prefix);
                Some(u32::from_le_bytes(len_bytes) as usize)
            }
            _ => None,
        };

        let data = match push_len {
            Some(len) => {
                let data = bytes.get(index..index.saturating_add(len)).ok_or_else(|| {
                    ScriptEngineError::Parse(format!(
                        "push of {} bytes at offset {} runs past end of script ({} bytes available)",
                        len,
                        offset,
                        bytes.len() - index
                    ))
                })?;
                index += len;
                Some(data.to_vec())
            }
            None => None,
        };

        instructions.push(Instruction {
            opcode,
            data,
            offset,
        });
    }

    Ok(instructions)
}

enum Token {
    Word(String),
    Str(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(ch) => s.push(ch),
                    None => {
                        return Err(ScriptEngineError::Parse(format!(
                            "unterminated string literal \"{}",
                            s
                        )))
                    }
                }
            }
            tokens.push(Token::Str(s));
        } else {
            let mut word = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() || ch == '"' {
                    break;
                }
                word.push(ch);
                chars.next();
            }
            tokens.push(Token::Word(word));
        }
    }

    Ok(tokens)
}

fn parse_literal(word: &str) -> Result<Vec<u8>> {
    if let Some(digits) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        return hex::decode(digits)
            .map_err(|e| ScriptEngineError::Parse(format!("invalid hex literal {}: {}", word, e)));
    }

    let unsigned = word.strip_prefix('-').unwrap_or(word);
    if !unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit()) {
        if let Some(value) = BigInt::parse_bytes(word.as_bytes(), 10) {
            return Ok(encode_num(&value));
        }
    }

    if word.len() % 2 == 0 && word.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(word) {
            return Ok(bytes);
        }
    }

    Err(ScriptEngineError::Parse(format!("unrecognized token {}", word)))
}

fn render_literal(data: &[u8]) -> String {
    let printable = !data.is_empty() && data.iter().all(|b| (32..127).contains(b) && *b != b'"');
    if printable {
        // Printable ASCII is valid UTF-8
        format!("\"{}\"", String::from_utf8_lossy(data))
    } else {
        format!("0x{}", hex::encode(data))
    }
}
