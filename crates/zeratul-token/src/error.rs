//! error types for the token ledger
//!
//! every error is total: an operation that returns `Err` has applied nothing.

use thiserror::Error;

use crate::policy::OperationId;
use crate::types::{Address, Balance, Delta, Nonce};

pub type Result<T> = std::result::Result<T, Error>;

/// coarse classification, used by callers to decide whether to resubmit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// bad local input, never retried
    Configuration,
    /// missing or invalid admin/owner signature
    Authorization,
    /// the proof's assumptions are stale or wrong, regenerate against current state
    PolicyMismatch,
    /// malformed batch or forbidden endpoint
    InvariantViolation,
    /// balance ledger refused the mutation
    Ledger,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // === configuration ===
    #[error("expected 4 policy records, got {0}")]
    InvalidRecordCount(usize),

    #[error("invalid operation id {0} (expected 1..=4)")]
    InvalidOperationId(u8),

    #[error("invalid policy flag selector {0} (expected 0..=6)")]
    InvalidFlagSelector(u8),

    #[error("invalid policy segment index {0} (expected 0..=3)")]
    InvalidSegmentIndex(usize),

    #[error("packed policy {0:#x} has bits set above bit 27")]
    PackedPolicyOverflow(u32),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("authenticated map: {0}")]
    Smt(#[from] zeratul_smt::SmtError),

    // === authorization ===
    #[error("missing authorization from {}", hex::encode(.0))]
    MissingAuthorization(Address),

    #[error("invalid signature from {}", hex::encode(.0))]
    InvalidSignature(Address),

    #[error("operation requires the admin signature")]
    NotAdmin,

    // === policy mismatch ===
    #[error("{0} requires a sideloaded proof, use the proof variant")]
    SideloadRequiredUseProofVariant(OperationId),

    #[error("key registry replica does not match the on-chain root")]
    RegistryOutOfSync,

    #[error("no verification key registered for {0}")]
    MissingKeyForOperation(OperationId),

    #[error("verification key is not the one registered for {0}")]
    UnregisteredKey(OperationId),

    #[error("proof address does not match the expected recipient")]
    RecipientMismatch,

    #[error("proof token account snapshot has the wrong token id")]
    TokenIdMismatch,

    #[error("proof native account snapshot is not the native asset")]
    WrongNativeAssetId,

    #[error("native balance moved since proof generation: proof {proof}, current {current}")]
    NativeBalanceMismatch { proof: Balance, current: Balance },

    #[error("token balance moved since proof generation: proof {proof}, current {current}")]
    TokenBalanceMismatch { proof: Balance, current: Balance },

    #[error("native nonce moved since proof generation: proof {proof}, current {current}")]
    NativeNonceMismatch { proof: Nonce, current: Nonce },

    #[error("token nonce moved since proof generation: proof {proof}, current {current}")]
    TokenNonceMismatch { proof: Nonce, current: Nonce },

    #[error("sideloaded proof for {0} failed verification")]
    InvalidProof(OperationId),

    // === invariant violations ===
    #[error("flash mint detected: running balance positive after node {node}")]
    FlashMintDetected { node: usize },

    #[error("unbalanced batch: net balance change {total}")]
    UnbalancedBatch { total: Delta },

    #[error("node {node} changes access or receive permissions")]
    PermissionChangeForbidden { node: usize },

    #[error("node {node} moves more than a balance can hold")]
    DeltaOutOfRange { node: usize },

    #[error("circulation account cannot be a transfer endpoint{}", node_suffix(.node))]
    NoTransferFromCirculation { node: Option<usize> },

    // === ledger ===
    #[error("insufficient balance for {}: available {available}, requested {requested}", hex::encode(.owner))]
    InsufficientBalance {
        owner: Address,
        available: Balance,
        requested: u128,
    },

    #[error("balance overflow for {}", hex::encode(.0))]
    BalanceOverflow(Address),

    #[error("nonce overflow for {}", hex::encode(.0))]
    NonceOverflow(Address),

    #[error("token ledger is paused")]
    Paused,
}

fn node_suffix(node: &Option<usize>) -> String {
    node.map(|n| format!(" (node {n})")).unwrap_or_default()
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            InvalidRecordCount(_)
            | InvalidOperationId(_)
            | InvalidFlagSelector(_)
            | InvalidSegmentIndex(_)
            | PackedPolicyOverflow(_)
            | Config(_)
            | Encoding(_)
            | Smt(_) => ErrorKind::Configuration,

            MissingAuthorization(_) | InvalidSignature(_) | NotAdmin => ErrorKind::Authorization,

            SideloadRequiredUseProofVariant(_)
            | RegistryOutOfSync
            | MissingKeyForOperation(_)
            | UnregisteredKey(_)
            | RecipientMismatch
            | TokenIdMismatch
            | WrongNativeAssetId
            | NativeBalanceMismatch { .. }
            | TokenBalanceMismatch { .. }
            | NativeNonceMismatch { .. }
            | TokenNonceMismatch { .. }
            | InvalidProof(_) => ErrorKind::PolicyMismatch,

            FlashMintDetected { .. }
            | UnbalancedBatch { .. }
            | PermissionChangeForbidden { .. }
            | DeltaOutOfRange { .. }
            | NoTransferFromCirculation { .. } => ErrorKind::InvariantViolation,

            InsufficientBalance { .. } | BalanceOverflow(_) | NonceOverflow(_) | Paused => {
                ErrorKind::Ledger
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::InvalidRecordCount(3).kind(), ErrorKind::Configuration);
        assert_eq!(Error::NotAdmin.kind(), ErrorKind::Authorization);
        assert_eq!(
            Error::UnregisteredKey(OperationId::Mint).kind(),
            ErrorKind::PolicyMismatch
        );
        assert_eq!(
            Error::FlashMintDetected { node: 0 }.kind(),
            ErrorKind::InvariantViolation
        );
        assert_eq!(
            Error::DeltaOutOfRange { node: 1 }.kind(),
            ErrorKind::InvariantViolation
        );
        assert_eq!(Error::Paused.kind(), ErrorKind::Ledger);
    }

    #[test]
    fn test_circulation_message() {
        let direct = Error::NoTransferFromCirculation { node: None }.to_string();
        let batch = Error::NoTransferFromCirculation { node: Some(2) }.to_string();
        assert!(!direct.contains("node"));
        assert!(batch.ends_with("(node 2)"));
    }
}
