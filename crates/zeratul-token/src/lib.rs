//! Zeratul Token - policy-gated token ledger core
//!
//! A fungible token whose balance operations can each be gated behind a
//! sideloaded proof, with the per-operation policy packed into one scalar and
//! the accepted verification keys committed to by one merkle root.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            CALLERS                               │
//! │   signed call + (optional) proof, vk, key registry replica       │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    TokenLedger (operation gate)                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  PackedPolicy ──► record for op ──► should_verify?               │
//! │                                       │ yes                      │
//! │                                       ▼                          │
//! │  KeyRegistry root ◄── ProofPolicyVerifier ──► ProofSystem        │
//! │                                       │                          │
//! │  batch::approve (post-order, no positive prefix, zero sum)       │
//! │                                       │                          │
//! │  Authorization (ed25519 over TransactionCommitment)              │
//! │                                       ▼                          │
//! │  StagedChanges ──► Ledger (balances, nonces)                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - circulation account balance == sum of all holder balances
//! - a failed operation applies nothing
//! - with `should_verify` off the proof path performs no reads and no crypto
//! - replacing one policy segment never touches the other three

pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod ledger;
pub mod policy;
pub mod proof;
pub mod registry;
pub mod token;
pub mod types;
pub mod verifier;

pub use auth::{Authorization, OperationCall, TransactionCommitment};
pub use batch::{BalanceDelta, BatchSummary, UpdateForest, UpdateTree};
pub use config::TokenConfig;
pub use error::{Error, ErrorKind, Result};
pub use ledger::{Ledger, MemoryLedger, StagedChanges};
pub use policy::{OperationId, PackedPolicy, PolicyFlag, PolicyRecord};
pub use proof::{DigestProofSystem, ProofSystem, SideloadedProof, VerificationKey};
pub use registry::KeyRegistry;
pub use token::{Sideload, TokenLedger, TokenState};
pub use types::*;
pub use verifier::{ProofPolicyVerifier, Verdict, VerificationContext};

/// domain separator for token ids derived from a ledger address
pub const TOKEN_ID_DOMAIN: &[u8] = b"zeratul.token.id.v1";

/// domain separator for verification key hashes
pub const VK_DOMAIN: &[u8] = b"zeratul.token.vk.v1";

/// domain separator for proof public values
pub const PROOF_DOMAIN: &[u8] = b"zeratul.token.proof.v1";

/// domain separator for signed transaction commitments
pub const COMMITMENT_DOMAIN: &[u8] = b"zeratul.token.commitment.v1";
