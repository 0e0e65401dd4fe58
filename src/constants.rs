//! Script execution limits and verification flags

/// Maximum combined size of stack and altstack during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of non-push operations in a script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Maximum size of a single pushed element
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum number of public keys per multisig
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Lock time threshold: lock times below this are block heights
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Sequence bit disabling relative lock time (BIP 68)
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

/// Sequence bit selecting time-based relative lock time (BIP 68)
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// Mask extracting the relative lock time value (BIP 68)
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000ffff;

/// Evaluate pay-to-script-hash redemption (BIP 16)
pub const VERIFY_P2SH: u32 = 1 << 0;

/// Require the CHECKMULTISIG dummy element to be empty (BIP 147)
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;

/// Enforce OP_CHECKLOCKTIMEVERIFY (BIP 65)
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;

/// Enforce OP_CHECKSEQUENCEVERIFY (BIP 112)
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;

/// Flags used when the caller does not pick any
pub const STANDARD_VERIFY_FLAGS: u32 =
    VERIFY_P2SH | VERIFY_NULLDUMMY | VERIFY_CHECKLOCKTIMEVERIFY | VERIFY_CHECKSEQUENCEVERIFY;
