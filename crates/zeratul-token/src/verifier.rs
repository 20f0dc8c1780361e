//! conditional sideloaded proof verification
//!
//! decides, for one operation, whether a proof has to be checked and whether
//! it holds. checks run in a fixed order and the first failure is returned:
//!
//! 1. caller's registry replica matches the on-chain root
//! 2. a key is registered for the operation
//! 3. the supplied key is the registered one
//! 4. proof address == expected recipient (if required)
//! 5. proof token account id == expected token id (if required)
//! 6. proof native account id == native asset (always)
//! 7. frozen balances / nonces == current ledger values (each if required)
//! 8. the proof verifies against the key
//!
//! with `should_verify` off none of this runs, not even the registry check.

use tracing::debug;

use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::policy::{OperationId, PolicyRecord};
use crate::proof::{ProofSystem, SideloadedProof, VerificationKey};
use crate::registry::KeyRegistry;
use crate::types::{short_hex, Address, AssetId, Hash};

/// everything one verification looks at besides the ledger
#[derive(Clone, Copy, Debug)]
pub struct VerificationContext<'a> {
    pub operation: OperationId,
    pub record: PolicyRecord,
    /// root stored in canonical state
    pub registry_root: &'a Hash,
    /// caller-supplied replica
    pub registry: &'a KeyRegistry,
    pub proof: &'a SideloadedProof,
    pub key: &'a VerificationKey,
    pub expected_recipient: &'a Address,
    pub expected_token_id: &'a AssetId,
}

/// outcome of a successful verification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// policy disabled, nothing checked
    Skipped,
    /// every enabled check passed and the proof verified
    Verified,
}

pub struct ProofPolicyVerifier<'a> {
    ledger: &'a dyn Ledger,
    proofs: &'a dyn ProofSystem,
}

impl<'a> ProofPolicyVerifier<'a> {
    pub fn new(ledger: &'a dyn Ledger, proofs: &'a dyn ProofSystem) -> Self {
        Self { ledger, proofs }
    }

    pub fn verify(&self, ctx: &VerificationContext<'_>) -> Result<Verdict> {
        let record = &ctx.record;
        if !record.should_verify {
            debug!(operation = %ctx.operation, "proof policy disabled, skipping");
            return Ok(Verdict::Skipped);
        }

        if !ctx.registry.root_matches(ctx.registry_root) {
            return Err(Error::RegistryOutOfSync);
        }
        let registered = ctx
            .registry
            .get(ctx.operation)
            .ok_or(Error::MissingKeyForOperation(ctx.operation))?;
        if ctx.key.hash() != registered {
            return Err(Error::UnregisteredKey(ctx.operation));
        }

        let input = &ctx.proof.public_input;
        let output = &ctx.proof.public_output;

        if record.require_recipient_match && input.address != *ctx.expected_recipient {
            return Err(Error::RecipientMismatch);
        }
        if record.require_token_id_match && output.token_account.token_id != *ctx.expected_token_id {
            return Err(Error::TokenIdMismatch);
        }
        if !output.native_account.token_id.is_native() {
            return Err(Error::WrongNativeAssetId);
        }

        self.check_state(record, ctx)?;

        if !self.proofs.verify(ctx.proof, ctx.key) {
            return Err(Error::InvalidProof(ctx.operation));
        }

        debug!(
            operation = %ctx.operation,
            subject = %short_hex(&input.address),
            "sideloaded proof verified"
        );
        Ok(Verdict::Verified)
    }

    /// compare the state frozen in the proof against the ledger now
    ///
    /// token balance and nonce are read under this ledger's own token id,
    /// never the id the proof claims.
    fn check_state(&self, record: &PolicyRecord, ctx: &VerificationContext<'_>) -> Result<()> {
        let address = &ctx.proof.public_input.address;
        let output = &ctx.proof.public_output;
        let native = AssetId::NATIVE;
        let token = ctx.expected_token_id;

        if record.require_native_balance_match {
            let current = self.ledger.balance(address, &native);
            if current != output.native_balance {
                return Err(Error::NativeBalanceMismatch {
                    proof: output.native_balance,
                    current,
                });
            }
        }
        if record.require_token_balance_match {
            let current = self.ledger.balance(address, token);
            if current != output.token_balance {
                return Err(Error::TokenBalanceMismatch {
                    proof: output.token_balance,
                    current,
                });
            }
        }
        if record.require_native_nonce_match {
            let current = self.ledger.nonce(address, &native);
            if current != output.native_nonce {
                return Err(Error::NativeNonceMismatch {
                    proof: output.native_nonce,
                    current,
                });
            }
        }
        if record.require_token_nonce_match {
            let current = self.ledger.nonce(address, token);
            if current != output.token_nonce {
                return Err(Error::TokenNonceMismatch {
                    proof: output.token_nonce,
                    current,
                });
            }
        }
        Ok(())
    }
}
