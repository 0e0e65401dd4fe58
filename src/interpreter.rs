//! Script interpreter as a resumable state machine
//!
//! The interpreter owns its stacks and a program counter. Each call to
//! [`Interpreter::step`] consumes one instruction and yields an
//! [`ExecutionStep`] snapshot, so a caller can single-step a script, stop at
//! any point, or drain it with [`Interpreter::run`].

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use ripemd::Ripemd160;
use serde::Serialize;
use sha2::{Digest, Sha256};

use bitcoin_hashes::{sha1, Hash as BitcoinHash};

use crate::codec::double_sha256;
use crate::constants::*;
use crate::error::{Result, ScriptEngineError};
use crate::network::NetworkProfile;
use crate::opcodes::*;
use crate::overrides::OverrideContext;
use crate::script::{hash160, Instruction, Script};
use crate::scriptnum::{cast_to_bool, decode_bounded, decode_num, encode_bool, encode_num};
use crate::sighash::check_signature;
use crate::transaction::Transaction;
use crate::types::{ByteString, ExecutionContext};

/// Which script of a verification pass a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Standalone evaluation, no verification
    #[default]
    Script,
    ScriptSig,
    ScriptPubKey,
    RedeemScript,
}

/// Snapshot taken after one instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionStep {
    /// Main stack, bottom first
    pub stack: Vec<ByteString>,
    pub altstack: Vec<ByteString>,
    pub opcode: u8,
    /// Byte offset of the instruction within its script
    pub offset: usize,
    pub log: String,
    pub phase: ExecutionPhase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Step(ExecutionStep),
    /// Every instruction has run and all conditionals are closed
    Finished,
    Failed(ScriptEngineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterState {
    Ready,
    Running,
    Succeeded,
    Failed(ScriptEngineError),
}

pub struct Interpreter<'a> {
    profile: &'a NetworkProfile,
    tx: Option<&'a Transaction>,
    input_index: usize,
    flags: u32,
    context: Option<&'a ExecutionContext>,
    phase: ExecutionPhase,

    script: Script,
    instructions: Result<Vec<Instruction>>,
    pc: usize,
    stack: Vec<ByteString>,
    altstack: Vec<ByteString>,
    vf_exec: Vec<bool>,
    op_count: usize,
    /// Byte offset where the signed script code starts
    code_start: usize,
    state: InterpreterState,
    error_reported: bool,
}

impl<'a> Interpreter<'a> {
    /// Interpreter over `script` with empty stacks, no transaction and standard flags
    pub fn new(profile: &'a NetworkProfile, script: &Script) -> Self {
        Self {
            profile,
            tx: None,
            input_index: 0,
            flags: STANDARD_VERIFY_FLAGS,
            context: None,
            phase: ExecutionPhase::Script,
            script: script.clone(),
            instructions: script.instructions(),
            pc: 0,
            stack: Vec::new(),
            altstack: Vec::new(),
            vf_exec: Vec::new(),
            op_count: 0,
            code_start: 0,
            state: InterpreterState::Ready,
            error_reported: false,
        }
    }

    pub fn with_transaction(mut self, tx: &'a Transaction, input_index: usize) -> Self {
        self.tx = Some(tx);
        self.input_index = input_index;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_context(mut self, context: &'a ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Start from an existing stack, e.g. the one left by a scriptSig
    pub fn with_stack(mut self, stack: Vec<ByteString>) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_phase(mut self, phase: ExecutionPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn stack(&self) -> &[ByteString] {
        &self.stack
    }

    pub fn altstack(&self) -> &[ByteString] {
        &self.altstack
    }

    pub fn into_stack(self) -> Vec<ByteString> {
        self.stack
    }

    pub fn state(&self) -> &InterpreterState {
        &self.state
    }

    /// Execute one instruction.
    ///
    /// Per instruction, in order:
    /// 1. Push size and operation count limits (counted in skipped branches too)
    /// 2. Disabled opcodes and VERIF/VERNOTIF fail even when not executing
    /// 3. Outside IF..ENDIF, nothing runs inside a skipped branch
    /// 4. Profile overrides run before the built-in implementation
    /// 5. Combined stack size is checked after the effect
    ///
    /// Once finished or failed, further calls return the same outcome.
    pub fn step(&mut self) -> StepOutcome {
        match &self.state {
            InterpreterState::Succeeded => return StepOutcome::Finished,
            InterpreterState::Failed(err) => return StepOutcome::Failed(err.clone()),
            InterpreterState::Ready | InterpreterState::Running => {}
        }
        self.state = InterpreterState::Running;

        let next = match &self.instructions {
            Ok(instructions) => Ok(instructions.get(self.pc).cloned()),
            Err(err) => Err(err.clone()),
        };
        let instruction = match next {
            Err(err) => return self.fail(err),
            Ok(Some(instruction)) => instruction,
            Ok(None) => {
                if !self.vf_exec.is_empty() {
                    return self.fail(ScriptEngineError::UnterminatedConditional);
                }
                log::debug!(
                    "{:?} finished after {} instruction(s), stack depth {}",
                    self.phase,
                    self.pc,
                    self.stack.len()
                );
                self.state = InterpreterState::Succeeded;
                return StepOutcome::Finished;
            }
        };
        self.pc += 1;

        let log = match self.execute(&instruction) {
            Ok(log) => log,
            Err(err) => return self.fail(err),
        };

        let size = self.stack.len() + self.altstack.len();
        if size > MAX_STACK_SIZE {
            return self.fail(ScriptEngineError::MaxStackSizeExceeded {
                size,
                max: MAX_STACK_SIZE,
            });
        }

        log::trace!("{:?} @{}: {}", self.phase, instruction.offset, log);
        StepOutcome::Step(ExecutionStep {
            stack: self.stack.clone(),
            altstack: self.altstack.clone(),
            opcode: instruction.opcode,
            offset: instruction.offset,
            log,
            phase: self.phase,
        })
    }

    /// EvalScript: drain the interpreter, keeping every step up to the first error
    pub fn run(&mut self) -> (Vec<ExecutionStep>, Option<ScriptEngineError>) {
        let mut steps = Vec::new();
        loop {
            match self.step() {
                StepOutcome::Step(step) => steps.push(step),
                StepOutcome::Finished => return (steps, None),
                StepOutcome::Failed(err) => return (steps, Some(err)),
            }
        }
    }

    fn fail(&mut self, err: ScriptEngineError) -> StepOutcome {
        log::debug!("{:?} halted at instruction {}: {}", self.phase, self.pc, err);
        self.state = InterpreterState::Failed(err.clone());
        StepOutcome::Failed(err)
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<String> {
        let opcode = instruction.opcode;
        let profile = self.profile;
        let table = profile.opcodes();
        let name = table.name(opcode);
        let executing = self.vf_exec.iter().all(|v| *v);

        // 1. Limits
        if let Some(data) = &instruction.data {
            if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptEngineError::PushSize {
                    size: data.len(),
                    max: MAX_SCRIPT_ELEMENT_SIZE,
                });
            }
            if !executing {
                return Ok(format!("{} bytes (not executed)", data.len()));
            }
            self.stack.push(data.clone());
            return Ok(format!("Pushed {}", render(data)));
        }

        if opcode > OP_16 {
            self.count_ops(1)?;
        }

        // 2. Always-fatal opcodes
        if table.is_disabled(opcode) {
            return Err(ScriptEngineError::DisabledOpcode(name));
        }
        if opcode == OP_VERIF || opcode == OP_VERNOTIF {
            return Err(ScriptEngineError::UnsupportedOpcode(name));
        }

        // 3. Skipped branch
        if !executing && !(OP_IF..=OP_ENDIF).contains(&opcode) {
            return Ok(format!("{} (not executed)", name));
        }

        // 4. Overrides
        if let Some(handler) = table.override_for(opcode) {
            let mut ctx = OverrideContext {
                opcode,
                name: &name,
                stack: &mut self.stack,
                altstack: &mut self.altstack,
                tx: self.tx,
                input_index: self.input_index,
                flags: self.flags,
                context: self.context,
            };
            return (handler.handler)(&mut ctx);
        }

        self.execute_builtin(opcode, &name, executing, instruction.offset)
    }

    fn count_ops(&mut self, n: usize) -> Result<()> {
        self.op_count += n;
        if self.op_count > MAX_SCRIPT_OPS {
            return Err(ScriptEngineError::MaxOpCountExceeded(MAX_SCRIPT_OPS));
        }
        Ok(())
    }

    fn require(&self, name: &str, required: usize) -> Result<()> {
        if self.stack.len() < required {
            return Err(ScriptEngineError::MissingOperands {
                opcode: name.to_string(),
                required,
            });
        }
        Ok(())
    }

    /// Item `depth` places from the top; 1 is the top. Callers check depth first.
    fn peek(&self, depth: usize) -> &ByteString {
        &self.stack[self.stack.len() - depth]
    }

    fn pop(&mut self) -> Result<ByteString> {
        self.stack
            .pop()
            .ok_or_else(|| ScriptEngineError::InvalidStackOperation("pop from empty stack".to_string()))
    }

    fn pop_num(&mut self) -> Result<BigInt> {
        Ok(decode_num(&self.pop()?))
    }

    fn push_bool(&mut self, value: bool) {
        self.stack.push(encode_bool(value));
    }

    fn transaction(&self, name: &str) -> Result<&'a Transaction> {
        self.tx
            .ok_or_else(|| ScriptEngineError::MissingTransaction(name.to_string()))
    }

    fn verify(&mut self, name: &str) -> Result<()> {
        let top = self.pop()?;
        if !cast_to_bool(&top) {
            return Err(ScriptEngineError::VerifyFailed(format!("{} found a false value", name)));
        }
        Ok(())
    }

    /// Script code signed by CHECKSIG: everything after the last executed OP_CODESEPARATOR
    fn script_code(&self) -> Script {
        Script::from_raw(self.script.as_bytes()[self.code_start..].to_vec())
    }

    fn execute_builtin(&mut self, opcode: u8, name: &str, executing: bool, offset: usize) -> Result<String> {
        match opcode {
            //
            // Push value
            OP_1NEGATE | OP_1..=OP_16 => {
                let n = if opcode == OP_1NEGATE {
                    -1
                } else {
                    (opcode - OP_1 + 1) as i64
                };
                self.stack.push(encode_num(&BigInt::from(n)));
                Ok(format!("Pushed {}", n))
            }

            //
            // Control
            OP_NOP | OP_NOP1 | OP_CHECKLOCKTIMEVERIFY | OP_CHECKSEQUENCEVERIFY | OP_NOP4..=OP_NOP10 => {
                Ok(format!("{}: no operation", name))
            }
            OP_IF | OP_NOTIF => {
                let mut value = false;
                if executing {
                    self.require(name, 1)?;
                    value = cast_to_bool(&self.pop()?);
                    if opcode == OP_NOTIF {
                        value = !value;
                    }
                }
                self.vf_exec.push(value);
                Ok(if executing {
                    format!("{}: {} branch", name, if value { "executing" } else { "skipping" })
                } else {
                    format!("{} (inside skipped branch)", name)
                })
            }
            OP_ELSE => {
                let Some(top) = self.vf_exec.last_mut() else {
                    return Err(ScriptEngineError::InvalidStackOperation(format!(
                        "{} without a matching OP_IF",
                        name
                    )));
                };
                *top = !*top;
                Ok(format!("{}: branch toggled", name))
            }
            OP_ENDIF => {
                if self.vf_exec.pop().is_none() {
                    return Err(ScriptEngineError::InvalidStackOperation(format!(
                        "{} without a matching OP_IF",
                        name
                    )));
                }
                Ok(format!("{}: conditional closed", name))
            }
            OP_VERIFY => {
                self.require(name, 1)?;
                self.verify(name)?;
                Ok(format!("{}: passed", name))
            }
            OP_RETURN => Err(ScriptEngineError::OpReturn),

            //
            // Stack ops
            OP_TOALTSTACK => {
                self.require(name, 1)?;
                let item = self.pop()?;
                self.altstack.push(item);
                Ok(format!("{}: moved item to altstack", name))
            }
            OP_FROMALTSTACK => {
                let item = self.altstack.pop().ok_or_else(|| {
                    ScriptEngineError::InvalidStackOperation(format!("{} with an empty altstack", name))
                })?;
                self.stack.push(item);
                Ok(format!("{}: moved item from altstack", name))
            }
            OP_2DROP => {
                self.require(name, 2)?;
                self.stack.truncate(self.stack.len() - 2);
                Ok(format!("{}: dropped 2 items", name))
            }
            OP_2DUP | OP_3DUP => {
                let n = if opcode == OP_2DUP { 2 } else { 3 };
                self.require(name, n)?;
                let start = self.stack.len() - n;
                let copied = self.stack[start..].to_vec();
                self.stack.extend(copied);
                Ok(format!("{}: duplicated {} items", name, n))
            }
            OP_2OVER => {
                self.require(name, 4)?;
                let start = self.stack.len() - 4;
                let copied = self.stack[start..start + 2].to_vec();
                self.stack.extend(copied);
                Ok(format!("{}: copied 3rd and 4th items", name))
            }
            OP_2ROT => {
                self.require(name, 6)?;
                let start = self.stack.len() - 6;
                let moved: Vec<_> = self.stack.drain(start..start + 2).collect();
                self.stack.extend(moved);
                Ok(format!("{}: moved 5th and 6th items to the top", name))
            }
            OP_2SWAP => {
                self.require(name, 4)?;
                let len = self.stack.len();
                self.stack[len - 4..].rotate_left(2);
                Ok(format!("{}: swapped top pairs", name))
            }
            OP_IFDUP => {
                self.require(name, 1)?;
                let top = self.peek(1).clone();
                if cast_to_bool(&top) {
                    self.stack.push(top);
                    Ok(format!("{}: duplicated true value", name))
                } else {
                    Ok(format!("{}: false value not duplicated", name))
                }
            }
            OP_DEPTH => {
                let depth = self.stack.len();
                self.stack.push(encode_num(&BigInt::from(depth)));
                Ok(format!("{}: {}", name, depth))
            }
            OP_DROP => {
                self.require(name, 1)?;
                self.pop()?;
                Ok(format!("{}: dropped top item", name))
            }
            OP_DUP => {
                self.require(name, 1)?;
                let top = self.peek(1).clone();
                self.stack.push(top);
                Ok(format!("{}: duplicated top item", name))
            }
            OP_NIP => {
                self.require(name, 2)?;
                let len = self.stack.len();
                self.stack.remove(len - 2);
                Ok(format!("{}: removed second item", name))
            }
            OP_OVER => {
                self.require(name, 2)?;
                let item = self.peek(2).clone();
                self.stack.push(item);
                Ok(format!("{}: copied second item", name))
            }
            OP_PICK | OP_ROLL => {
                self.require(name, 2)?;
                let n = decode_bounded(self.peek(1))
                    .filter(|n| *n >= 0 && (*n as usize) < self.stack.len() - 1)
                    .ok_or_else(|| {
                        ScriptEngineError::InvalidStackOperation(format!("{} index out of range", name))
                    })? as usize;
                self.pop()?;
                let index = self.stack.len() - 1 - n;
                let item = if opcode == OP_ROLL {
                    self.stack.remove(index)
                } else {
                    self.stack[index].clone()
                };
                self.stack.push(item);
                Ok(format!("{}: item {} to top", name, n))
            }
            OP_ROT => {
                self.require(name, 3)?;
                let len = self.stack.len();
                self.stack[len - 3..].rotate_left(1);
                Ok(format!("{}: rotated top 3 items", name))
            }
            OP_SWAP => {
                self.require(name, 2)?;
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
                Ok(format!("{}: swapped top 2 items", name))
            }
            OP_TUCK => {
                self.require(name, 2)?;
                let top = self.peek(1).clone();
                let len = self.stack.len();
                self.stack.insert(len - 2, top);
                Ok(format!("{}: copied top item below second", name))
            }
            OP_SIZE => {
                self.require(name, 1)?;
                let size = self.peek(1).len();
                self.stack.push(encode_num(&BigInt::from(size)));
                Ok(format!("{}: {} bytes", name, size))
            }

            //
            // Bitwise logic
            OP_EQUAL | OP_EQUALVERIFY => {
                self.require(name, 2)?;
                let b = self.pop()?;
                let a = self.pop()?;
                let equal = a == b;
                self.push_bool(equal);
                if opcode == OP_EQUALVERIFY {
                    self.verify(name)?;
                    return Ok(format!("{}: passed", name));
                }
                Ok(format!("{}: {} {} {}", name, render(&a), if equal { "==" } else { "!=" }, render(&b)))
            }

            //
            // Numeric
            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                self.require(name, 1)?;
                let n = self.pop_num()?;
                let result = match opcode {
                    OP_1ADD => &n + BigInt::from(1),
                    OP_1SUB => &n - BigInt::from(1),
                    OP_NEGATE => -&n,
                    OP_ABS => n.abs(),
                    OP_NOT => BigInt::from(n.is_zero() as u8),
                    _ => BigInt::from(!n.is_zero() as u8),
                };
                self.stack.push(encode_num(&result));
                Ok(format!("{}: {} -> {}", name, n, result))
            }
            OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY | OP_NUMNOTEQUAL
            | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL | OP_GREATERTHANOREQUAL | OP_MIN
            | OP_MAX => {
                self.require(name, 2)?;
                let b = self.pop_num()?;
                let a = self.pop_num()?;
                let flag = |v: bool| BigInt::from(v as u8);
                let result = match opcode {
                    OP_ADD => &a + &b,
                    OP_SUB => &a - &b,
                    OP_BOOLAND => flag(!a.is_zero() && !b.is_zero()),
                    OP_BOOLOR => flag(!a.is_zero() || !b.is_zero()),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => flag(a == b),
                    OP_NUMNOTEQUAL => flag(a != b),
                    OP_LESSTHAN => flag(a < b),
                    OP_GREATERTHAN => flag(a > b),
                    OP_LESSTHANOREQUAL => flag(a <= b),
                    OP_GREATERTHANOREQUAL => flag(a >= b),
                    OP_MIN => a.clone().min(b.clone()),
                    _ => a.clone().max(b.clone()),
                };
                self.stack.push(encode_num(&result));
                if opcode == OP_NUMEQUALVERIFY {
                    self.verify(name)?;
                    return Ok(format!("{}: passed", name));
                }
                Ok(format!("{}: {}, {} -> {}", name, a, b, result))
            }
            OP_WITHIN => {
                self.require(name, 3)?;
                let max = self.pop_num()?;
                let min = self.pop_num()?;
                let x = self.pop_num()?;
                let within = min <= x && x < max;
                self.push_bool(within);
                Ok(format!("{}: {} in [{}, {}) is {}", name, x, min, max, within))
            }

            //
            // Crypto
            OP_RIPEMD160 | OP_SHA1 | OP_SHA256 | OP_HASH160 | OP_HASH256 => {
                self.require(name, 1)?;
                let data = self.pop()?;
                let digest = match opcode {
                    OP_RIPEMD160 => Ripemd160::digest(&data).to_vec(),
                    OP_SHA1 => sha1::Hash::hash(&data).into_inner().to_vec(),
                    OP_SHA256 => Sha256::digest(&data).to_vec(),
                    OP_HASH160 => hash160(&data).to_vec(),
                    _ => double_sha256(&data).to_vec(),
                };
                let log = format!("{}: {}", name, hex::encode(&digest));
                self.stack.push(digest);
                Ok(log)
            }
            OP_CODESEPARATOR => {
                self.code_start = offset + 1;
                Ok(format!("{}: script code now starts at byte {}", name, self.code_start))
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                self.require(name, 2)?;
                let tx = self.transaction(name)?;
                let pubkey = self.pop()?;
                let signature = self.pop()?;

                let script_code = self.script_code().remove_push(&signature)?;
                let valid = check_signature(&signature, &pubkey, &script_code, tx, self.input_index)?;
                self.push_bool(valid);
                if opcode == OP_CHECKSIGVERIFY {
                    self.verify(name)?;
                    return Ok(format!("{}: passed", name));
                }
                Ok(format!("{}: signature {}", name, if valid { "valid" } else { "invalid" }))
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => self.check_multisig(opcode, name),

            // Only reachable on profiles that re-enable them
            OP_CAT | OP_SUBSTR | OP_LEFT | OP_RIGHT => self.splice(opcode, name),
            OP_INVERT | OP_AND | OP_OR | OP_XOR => self.bitwise(opcode, name),
            OP_2MUL | OP_2DIV | OP_MUL | OP_DIV | OP_MOD | OP_LSHIFT | OP_RSHIFT => {
                self.extended_arithmetic(opcode, name)
            }

            _ => Err(ScriptEngineError::UnsupportedOpcode(name.to_string())),
        }
    }

    /// Pop a non-negative length or offset operand
    fn pop_index(&mut self, name: &str) -> Result<usize> {
        let n = decode_bounded(self.peek(1))
            .filter(|n| *n >= 0)
            .ok_or_else(|| ScriptEngineError::InvalidStackOperation(format!("{} operand out of range", name)))?;
        self.pop()?;
        Ok(n as usize)
    }

    fn splice(&mut self, opcode: u8, name: &str) -> Result<String> {
        let out_of_range =
            || ScriptEngineError::InvalidStackOperation(format!("{} range exceeds the operand", name));
        let result = match opcode {
            OP_CAT => {
                self.require(name, 2)?;
                let b = self.pop()?;
                let mut a = self.pop()?;
                if a.len() + b.len() > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptEngineError::PushSize {
                        size: a.len() + b.len(),
                        max: MAX_SCRIPT_ELEMENT_SIZE,
                    });
                }
                a.extend(b);
                a
            }
            OP_SUBSTR => {
                self.require(name, 3)?;
                let size = self.pop_index(name)?;
                let begin = self.pop_index(name)?;
                let data = self.pop()?;
                let end = begin.checked_add(size).filter(|end| *end <= data.len()).ok_or_else(out_of_range)?;
                data[begin..end].to_vec()
            }
            _ => {
                self.require(name, 2)?;
                let size = self.pop_index(name)?;
                let data = self.pop()?;
                if size > data.len() {
                    return Err(out_of_range());
                }
                if opcode == OP_LEFT {
                    data[..size].to_vec()
                } else {
                    data[data.len() - size..].to_vec()
                }
            }
        };
        let log = format!("{}: {}", name, render(&result));
        self.stack.push(result);
        Ok(log)
    }

    fn bitwise(&mut self, opcode: u8, name: &str) -> Result<String> {
        if opcode == OP_INVERT {
            self.require(name, 1)?;
            let data: Vec<u8> = self.pop()?.iter().map(|b| !b).collect();
            let log = format!("{}: {}", name, render(&data));
            self.stack.push(data);
            return Ok(log);
        }

        self.require(name, 2)?;
        let b = self.pop()?;
        let a = self.pop()?;
        if a.len() != b.len() {
            return Err(ScriptEngineError::InvalidStackOperation(format!(
                "{} operands differ in size ({} and {} bytes)",
                name,
                a.len(),
                b.len()
            )));
        }
        let result: Vec<u8> = a
            .iter()
            .zip(&b)
            .map(|(x, y)| match opcode {
                OP_AND => x & y,
                OP_OR => x | y,
                _ => x ^ y,
            })
            .collect();
        let log = format!("{}: {}", name, render(&result));
        self.stack.push(result);
        Ok(log)
    }

    fn extended_arithmetic(&mut self, opcode: u8, name: &str) -> Result<String> {
        if opcode == OP_2MUL || opcode == OP_2DIV {
            self.require(name, 1)?;
            let n = self.pop_num()?;
            let result = if opcode == OP_2MUL {
                &n * BigInt::from(2)
            } else {
                // Arithmetic shift rounds toward negative infinity
                &n >> 1usize
            };
            self.stack.push(encode_num(&result));
            return Ok(format!("{}: {} -> {}", name, n, result));
        }

        self.require(name, 2)?;
        if opcode == OP_LSHIFT || opcode == OP_RSHIFT {
            let shift = self.pop_index(name)?;
            if shift > MAX_SCRIPT_ELEMENT_SIZE * 8 {
                return Err(ScriptEngineError::InvalidStackOperation(format!(
                    "{} by {} bits",
                    name, shift
                )));
            }
            let n = self.pop_num()?;
            let result = if opcode == OP_LSHIFT {
                &n << shift
            } else {
                &n >> shift
            };
            self.stack.push(encode_num(&result));
            return Ok(format!("{}: {} by {} -> {}", name, n, shift, result));
        }

        let b = self.pop_num()?;
        let a = self.pop_num()?;
        if opcode != OP_MUL && b.is_zero() {
            return Err(ScriptEngineError::InvalidStackOperation(format!("{} by zero", name)));
        }
        let result = match opcode {
            OP_MUL => &a * &b,
            OP_DIV => &a / &b,
            _ => &a % &b,
        };
        self.stack.push(encode_num(&result));
        Ok(format!("{}: {}, {} -> {}", name, a, b, result))
    }

    /// CheckMultisig: [dummy sig₁..sigₘ m key₁..keyₙ n] → {true, false}
    ///
    /// Signatures must match keys in order; each key is tried at most once.
    fn check_multisig(&mut self, opcode: u8, name: &str) -> Result<String> {
        let bad_count = |what: &str| {
            ScriptEngineError::InvalidStackOperation(format!("{} has an invalid {} count", name, what))
        };

        // Keys
        let mut i = 1;
        self.require(name, i)?;
        let key_count = decode_bounded(self.peek(i))
            .filter(|n| (0..=MAX_PUBKEYS_PER_MULTISIG as i64).contains(n))
            .ok_or_else(|| bad_count("key"))? as usize;
        self.count_ops(key_count)?;
        let first_key = i + 1;
        i += 1 + key_count;

        // Signatures
        self.require(name, i)?;
        let sig_count = decode_bounded(self.peek(i))
            .filter(|n| *n >= 0 && *n as usize <= key_count)
            .ok_or_else(|| bad_count("signature"))? as usize;
        let first_sig = i + 1;
        i += 1 + sig_count;

        // Dummy element consumed by the historical off-by-one
        self.require(name, i)?;
        let tx = self.transaction(name)?;

        let mut script_code = self.script_code();
        for k in 0..sig_count {
            script_code = script_code.remove_push(self.peek(first_sig + k))?;
        }

        let (mut key, mut sig) = (first_key, first_sig);
        let (mut keys_left, mut sigs_left) = (key_count, sig_count);
        let mut success = true;
        while success && sigs_left > 0 {
            if check_signature(self.peek(sig), self.peek(key), &script_code, tx, self.input_index)? {
                sig += 1;
                sigs_left -= 1;
            }
            key += 1;
            keys_left -= 1;
            if sigs_left > keys_left {
                success = false;
            }
        }

        let dummy_is_empty = self.peek(i).is_empty();
        self.stack.truncate(self.stack.len() - i);
        if self.flags & VERIFY_NULLDUMMY != 0 && !dummy_is_empty {
            return Err(ScriptEngineError::InvalidStackOperation(format!(
                "{} dummy element must be empty",
                name
            )));
        }

        self.push_bool(success);
        if opcode == OP_CHECKMULTISIGVERIFY {
            self.verify(name)?;
            return Ok(format!("{}: passed", name));
        }
        Ok(format!(
            "{}: {} of {} signature(s) {}",
            name,
            sig_count,
            key_count,
            if success { "valid" } else { "invalid" }
        ))
    }
}

impl Iterator for Interpreter<'_> {
    type Item = Result<ExecutionStep>;

    /// Yields each step, then the error once if execution failed
    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            StepOutcome::Step(step) => Some(Ok(step)),
            StepOutcome::Finished => None,
            StepOutcome::Failed(err) => {
                if self.error_reported {
                    None
                } else {
                    self.error_reported = true;
                    Some(Err(err))
                }
            }
        }
    }
}

fn render(data: &[u8]) -> String {
    if data.is_empty() {
        "(empty)".to_string()
    } else {
        format!("0x{}", hex::encode(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitcoin() -> NetworkProfile {
        NetworkProfile::bitcoin()
    }

    fn parse(profile: &NetworkProfile, text: &str) -> Script {
        Script::from_text(text, profile.opcodes()).unwrap()
    }

    fn eval(text: &str) -> (Vec<ExecutionStep>, Option<ScriptEngineError>) {
        let profile = bitcoin();
        let script = parse(&profile, text);
        Interpreter::new(&profile, &script).run()
    }

    fn final_stack(text: &str) -> Vec<ByteString> {
        let (steps, err) = eval(text);
        assert_eq!(err, None, "{}", text);
        steps.last().map(|s| s.stack.clone()).unwrap_or_default()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(final_stack("0x02 0x03 OP_ADD"), vec![vec![0x05]]);
        assert_eq!(final_stack("5 7 OP_SUB"), vec![vec![0x82]]);
        assert_eq!(final_stack("OP_1NEGATE OP_ABS"), vec![vec![0x01]]);
        assert_eq!(final_stack("3 OP_2 OP_5 OP_WITHIN"), vec![vec![0x01]]);
        assert_eq!(final_stack("0 OP_NOT 0 OP_0NOTEQUAL"), vec![vec![0x01], vec![]]);
    }

    #[test]
    fn test_reenabled_opcodes() {
        let mut opcodes = OpcodeTable::standard();
        opcodes.set_disabled(Vec::new());
        let profile = NetworkProfile::new("open", crate::schema::SchemaSet::bitcoin(), opcodes);
        let run = |text: &str| {
            let script = parse(&profile, text);
            let (steps, err) = Interpreter::new(&profile, &script).run();
            assert_eq!(err, None, "{}", text);
            steps.last().map(|s| s.stack.clone()).unwrap_or_default()
        };

        assert_eq!(run("\"ab\" \"cd\" OP_CAT"), vec![b"abcd".to_vec()]);
        assert_eq!(run("\"hello\" 1 3 OP_SUBSTR"), vec![b"ell".to_vec()]);
        assert_eq!(run("\"hello\" 2 OP_LEFT"), vec![b"he".to_vec()]);
        assert_eq!(run("\"hello\" 2 OP_RIGHT"), vec![b"lo".to_vec()]);
        assert_eq!(run("0x0f OP_INVERT 0x0f OP_OR"), vec![vec![0xff]]);
        assert_eq!(run("6 7 OP_MUL 7 2 OP_DIV 7 2 OP_MOD"), vec![vec![42], vec![3], vec![1]]);
        assert_eq!(run("1 3 OP_LSHIFT 3 OP_2MUL"), vec![vec![8], vec![6]]);
        assert_eq!(run("7 OP_2DIV -3 OP_2DIV -1 OP_2DIV"), vec![vec![3], vec![0x82], vec![0x81]]);

        let script = parse(&profile, "1 0 OP_DIV");
        let (_, err) = Interpreter::new(&profile, &script).run();
        assert!(matches!(err, Some(ScriptEngineError::InvalidStackOperation(_))));
        let script = parse(&profile, "\"abc\" 4 OP_LEFT");
        let (_, err) = Interpreter::new(&profile, &script).run();
        assert!(matches!(err, Some(ScriptEngineError::InvalidStackOperation(_))));
    }

    #[test]
    fn test_big_numbers_do_not_overflow() {
        let stack = final_stack("0xffffffffffffffff7f 0xffffffffffffffff7f OP_ADD");
        let n = decode_num(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f]);
        assert_eq!(decode_num(&stack[0]), &n + &n);
    }

    #[test]
    fn test_stack_ops() {
        assert_eq!(final_stack("0x01 OP_DUP"), vec![vec![0x01], vec![0x01]]);
        assert_eq!(final_stack("1 2 3 OP_ROT"), vec![vec![0x02], vec![0x03], vec![0x01]]);
        assert_eq!(final_stack("1 2 OP_SWAP"), vec![vec![0x02], vec![0x01]]);
        assert_eq!(final_stack("1 2 3 2 OP_PICK"), vec![vec![1], vec![2], vec![3], vec![1]]);
        assert_eq!(final_stack("1 2 3 2 OP_ROLL"), vec![vec![2], vec![3], vec![1]]);
        assert_eq!(final_stack("1 2 OP_TUCK"), vec![vec![2], vec![1], vec![2]]);
        assert_eq!(final_stack("1 2 3 4 OP_2SWAP"), vec![vec![3], vec![4], vec![1], vec![2]]);
        assert_eq!(
            final_stack("1 2 3 4 5 6 OP_2ROT"),
            vec![vec![3], vec![4], vec![5], vec![6], vec![1], vec![2]]
        );
        assert_eq!(final_stack("1 OP_TOALTSTACK 2 OP_FROMALTSTACK"), vec![vec![2], vec![1]]);
        assert_eq!(final_stack("\"abc\" OP_SIZE"), vec![b"abc".to_vec(), vec![3]]);
    }

    #[test]
    fn test_missing_operands_names_opcode() {
        let (steps, err) = eval("1 OP_ADD");
        assert_eq!(steps.len(), 1);
        assert_eq!(
            err,
            Some(ScriptEngineError::MissingOperands {
                opcode: "OP_ADD".to_string(),
                required: 2
            })
        );
    }

    #[test]
    fn test_conditionals() {
        assert_eq!(final_stack("1 OP_IF 2 OP_ELSE 3 OP_ENDIF"), vec![vec![2]]);
        assert_eq!(final_stack("0 OP_IF 2 OP_ELSE 3 OP_ENDIF"), vec![vec![3]]);
        assert_eq!(final_stack("0 OP_NOTIF 2 OP_ENDIF"), vec![vec![2]]);
        assert_eq!(final_stack("0 OP_IF 1 OP_IF 2 OP_ENDIF OP_ENDIF 4"), vec![vec![4]]);
    }

    #[test]
    fn test_unterminated_conditional() {
        let (steps, err) = eval("1 OP_IF 2");
        assert_eq!(steps.len(), 3);
        assert_eq!(err, Some(ScriptEngineError::UnterminatedConditional));
    }

    #[test]
    fn test_disabled_opcode_fails_in_skipped_branch() {
        let (_, err) = eval("0 OP_IF OP_CAT OP_ENDIF");
        assert_eq!(err, Some(ScriptEngineError::DisabledOpcode("OP_CAT".to_string())));
        let (_, err) = eval("0 OP_IF OP_VERIF OP_ENDIF");
        assert!(matches!(err, Some(ScriptEngineError::UnsupportedOpcode(_))));
        let (_, err) = eval("0 OP_IF OP_RETURN OP_ENDIF 1");
        assert_eq!(err, None);
    }

    #[test]
    fn test_verify_and_return() {
        let (_, err) = eval("0 OP_VERIFY");
        assert!(matches!(err, Some(ScriptEngineError::VerifyFailed(_))));
        let (_, err) = eval("1 2 OP_EQUALVERIFY");
        assert!(matches!(err, Some(ScriptEngineError::VerifyFailed(_))));
        let (_, err) = eval("1 OP_RETURN");
        assert_eq!(err, Some(ScriptEngineError::OpReturn));
    }

    #[test]
    fn test_op_count_limit() {
        let text = vec!["OP_NOP"; MAX_SCRIPT_OPS + 1].join(" ");
        let (steps, err) = eval(&text);
        assert_eq!(steps.len(), MAX_SCRIPT_OPS);
        assert_eq!(err, Some(ScriptEngineError::MaxOpCountExceeded(MAX_SCRIPT_OPS)));

        // Pushes are free
        let text = vec!["1"; MAX_SCRIPT_OPS + 1].join(" ");
        assert_eq!(eval(&text).1, None);
    }

    #[test]
    fn test_stack_size_limit() {
        let profile = bitcoin();
        let deep = vec![vec![1u8]; MAX_STACK_SIZE - 1];
        let dup = parse(&profile, "OP_DUP OP_DUP");
        let (steps, err) = Interpreter::new(&profile, &dup).with_stack(deep).run();
        assert_eq!(steps.len(), 1);
        assert_eq!(
            err,
            Some(ScriptEngineError::MaxStackSizeExceeded {
                size: MAX_STACK_SIZE + 1,
                max: MAX_STACK_SIZE
            })
        );
    }

    #[test]
    fn test_push_size_limit() {
        let mut script = Script::new();
        script.push_data(&[0u8; MAX_SCRIPT_ELEMENT_SIZE + 1]);
        let profile = bitcoin();
        let (steps, err) = Interpreter::new(&profile, &script).run();
        assert!(steps.is_empty());
        assert!(matches!(err, Some(ScriptEngineError::PushSize { .. })));
    }

    #[test]
    fn test_checksig_requires_transaction() {
        let (_, err) = eval("0x3001 0x02 OP_CHECKSIG");
        assert_eq!(err, Some(ScriptEngineError::MissingTransaction("OP_CHECKSIG".to_string())));
        let (_, err) = eval("0 0 0 OP_CHECKMULTISIG");
        assert!(matches!(err, Some(ScriptEngineError::MissingTransaction(_))));
    }

    #[test]
    fn test_unknown_opcode() {
        let profile = bitcoin();
        let script = Script::from_raw(vec![0xba]);
        let (_, err) = Interpreter::new(&profile, &script).run();
        assert_eq!(err, Some(ScriptEngineError::UnsupportedOpcode("OP_UNKNOWN186".to_string())));
    }

    #[test]
    fn test_hashes() {
        let stack = final_stack("\"abc\" OP_SHA256");
        assert_eq!(
            hex::encode(&stack[0]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let stack = final_stack("\"abc\" OP_SHA1");
        assert_eq!(hex::encode(&stack[0]), "a9993e364706816aba3e25717850c26c9cd0d89d");
        let stack = final_stack("\"abc\" OP_RIPEMD160");
        assert_eq!(hex::encode(&stack[0]), "8eb208f7e05d987a9b044a8e98c6b087f15a0bfc");
    }

    #[test]
    fn test_truncated_script_fails_on_first_step() {
        let profile = bitcoin();
        let script = Script::from_raw(vec![0x05, 0x01]);
        let (steps, err) = Interpreter::new(&profile, &script).run();
        assert!(steps.is_empty());
        assert!(matches!(err, Some(ScriptEngineError::Parse(_))));
    }

    #[test]
    fn test_iterator_reports_error_once() {
        let profile = bitcoin();
        let script = parse(&profile, "1 OP_ADD");
        let items: Vec<_> = Interpreter::new(&profile, &script).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn test_step_after_finish() {
        let profile = bitcoin();
        let script = parse(&profile, "1");
        let mut interpreter = Interpreter::new(&profile, &script);
        assert_eq!(interpreter.state(), &InterpreterState::Ready);
        assert!(matches!(interpreter.step(), StepOutcome::Step(_)));
        assert_eq!(interpreter.step(), StepOutcome::Finished);
        assert_eq!(interpreter.step(), StepOutcome::Finished);
        assert_eq!(interpreter.state(), &InterpreterState::Succeeded);
    }
}
