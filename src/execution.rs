//! Script execution sessions: standalone evaluation and full input verification

use crate::constants::*;
use crate::error::ScriptEngineError;
use crate::interpreter::{ExecutionPhase, ExecutionStep, Interpreter};
use crate::network::NetworkProfile;
use crate::script::Script;
use crate::scriptnum::cast_to_bool;
use crate::transaction::Transaction;
use crate::types::{ByteString, ExecutionContext};

/// Outcome of an evaluation or verification pass.
///
/// Errors never escape: the first one is stored in `error` and the steps
/// taken before it are kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptExecution {
    pub steps: Vec<ExecutionStep>,
    pub error: Option<ScriptEngineError>,
    /// No error, and the last step left a true value on top of the stack
    pub script_passed: bool,
    /// A spending transaction was supplied and the scriptSig and
    /// scriptPubKey phases succeeded. Standalone evaluation never sets it.
    pub script_verified: bool,
}

/// Spending context for a verification pass
#[derive(Debug, Clone, Copy)]
pub struct SpendContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub flags: u32,
    pub context: Option<&'a ExecutionContext>,
}

impl<'a> SpendContext<'a> {
    pub fn new(tx: &'a Transaction, input_index: usize) -> Self {
        Self {
            tx,
            input_index,
            flags: STANDARD_VERIFY_FLAGS,
            context: None,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_context(mut self, context: &'a ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl ScriptExecution {
    /// Step through one script on its own, optionally against a transaction
    pub fn evaluate(profile: &NetworkProfile, script: &Script, spend: Option<SpendContext<'_>>) -> Self {
        let mut interpreter = Interpreter::new(profile, script);
        if let Some(spend) = spend {
            interpreter = configure(interpreter, &spend);
        }
        let (steps, error) = interpreter.run();

        let mut execution = Self {
            steps,
            error,
            ..Self::default()
        };
        execution.finish();
        execution
    }

    /// VerifyScript: 𝒮𝒞 × 𝒮𝒞 × 𝒯𝒳 × ℕ → {passed, failed} × {verified, unverified}
    ///
    /// The scriptSig is taken from the spending input.
    pub fn verify(profile: &NetworkProfile, script_pubkey: &Script, spend: SpendContext<'_>) -> Self {
        match spend.tx.input_script(spend.input_index) {
            Ok(script_sig) => Self::verify_scripts(profile, script_sig, script_pubkey, spend),
            Err(err) => Self {
                error: Some(err),
                ..Self::default()
            },
        }
    }

    /// Verify an explicit scriptSig against a scriptPubKey.
    ///
    /// 1. Run the scriptSig on an empty stack
    /// 2. Run the scriptPubKey on the result; fail on an empty or false top
    /// 3. If the scriptPubKey is P2SH and `VERIFY_P2SH` is set: the scriptSig
    ///    must be push-only; the top of the step 1 stack is popped and run as
    ///    the redeem script on what remains; fail on an empty or false top
    pub fn verify_scripts(
        profile: &NetworkProfile,
        script_sig: &Script,
        script_pubkey: &Script,
        spend: SpendContext<'_>,
    ) -> Self {
        let mut execution = Self::default();
        execution.run_phases(profile, script_sig, script_pubkey, spend);
        execution.finish();
        execution
    }

    fn run_phases(
        &mut self,
        profile: &NetworkProfile,
        script_sig: &Script,
        script_pubkey: &Script,
        spend: SpendContext<'_>,
    ) {
        // 1. scriptSig
        let Some(sig_stack) = self.run_phase(profile, script_sig, Vec::new(), ExecutionPhase::ScriptSig, &spend)
        else {
            return;
        };

        // 2. scriptPubKey
        let Some(stack) = self.run_phase(
            profile,
            script_pubkey,
            sig_stack.clone(),
            ExecutionPhase::ScriptPubKey,
            &spend,
        ) else {
            return;
        };
        if !top_is_true(&stack) {
            self.error = Some(ScriptEngineError::VerifyFailed(
                "scriptPubKey left an empty or false stack".to_string(),
            ));
            return;
        }
        self.script_verified = true;

        // 3. P2SH redemption
        if spend.flags & VERIFY_P2SH == 0 || !script_pubkey.is_p2sh() {
            return;
        }
        if !script_sig.is_push_only() {
            self.error = Some(ScriptEngineError::VerifyFailed(
                "P2SH scriptSig must contain only pushes".to_string(),
            ));
            return;
        }
        let mut redeem_stack = sig_stack;
        let Some(redeem_script) = redeem_stack.pop() else {
            self.error = Some(ScriptEngineError::VerifyFailed(
                "P2SH scriptSig pushed no redeem script".to_string(),
            ));
            return;
        };
        let redeem_script = Script::from_raw(redeem_script);
        let Some(stack) = self.run_phase(
            profile,
            &redeem_script,
            redeem_stack,
            ExecutionPhase::RedeemScript,
            &spend,
        ) else {
            return;
        };
        if !top_is_true(&stack) {
            self.error = Some(ScriptEngineError::VerifyFailed(
                "redeem script left an empty or false stack".to_string(),
            ));
        }
    }

    /// Run one phase, appending its steps. Returns the final stack on success.
    fn run_phase(
        &mut self,
        profile: &NetworkProfile,
        script: &Script,
        stack: Vec<ByteString>,
        phase: ExecutionPhase,
        spend: &SpendContext<'_>,
    ) -> Option<Vec<ByteString>> {
        log::debug!("verifying input {}: {:?}", spend.input_index, phase);
        let mut interpreter = configure(Interpreter::new(profile, script), spend)
            .with_stack(stack)
            .with_phase(phase);
        let (steps, error) = interpreter.run();
        self.steps.extend(steps);
        match error {
            Some(err) => {
                self.error = Some(err);
                None
            }
            None => Some(interpreter.into_stack()),
        }
    }

    fn finish(&mut self) {
        self.script_passed = self.error.is_none()
            && self
                .steps
                .last()
                .map(|step| top_is_true(&step.stack))
                .unwrap_or(false);
    }

    /// Passed and verified
    pub fn is_valid(&self) -> bool {
        self.script_passed && self.script_verified
    }

    /// Stack after the last step
    pub fn final_stack(&self) -> Option<&[ByteString]> {
        self.steps.last().map(|step| step.stack.as_slice())
    }
}

fn configure<'a>(interpreter: Interpreter<'a>, spend: &SpendContext<'a>) -> Interpreter<'a> {
    let interpreter = interpreter
        .with_transaction(spend.tx, spend.input_index)
        .with_flags(spend.flags);
    match spend.context {
        Some(context) => interpreter.with_context(context),
        None => interpreter,
    }
}

fn top_is_true(stack: &[ByteString]) -> bool {
    stack.last().map(|top| cast_to_bool(top)).unwrap_or(false)
}
