//! token ledger operation gate
//!
//! every balance-changing call goes through the same pipeline:
//!
//! ```text
//!   call ──► paused? ──► endpoints ──► proof policy ──► signatures ──► stage ──► commit
//!                                        │
//!                         direct:  should_verify must be off
//!                         proof:   ProofPolicyVerifier (8 checks)
//! ```
//!
//! nothing touches the ledger until every check has passed, and the staged
//! writes are themselves checked in full before the first one is applied.
//! admin calls (registry, policy, pause, admin rotation) skip the proof
//! policy but bind their arguments the same way.

use std::collections::BTreeSet;

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{self, Authorization, OperationCall, ProofAttachment, TransactionCommitment};
use crate::batch::{self, BatchSummary, UpdateForest};
use crate::config::TokenConfig;
use crate::error::{Error, Result};
use crate::ledger::{Ledger, MemoryLedger, StagedChanges};
use crate::policy::{OperationId, PackedPolicy, PolicyFlag, PolicyRecord};
use crate::proof::{DigestProofSystem, ProofSystem, SideloadedProof, VerificationKey};
use crate::registry::{KeyRegistry, VkHash};
use crate::types::{short_hex, Address, AssetId, Balance, Delta, Hash, Nonce, PublicKey};
use crate::verifier::{ProofPolicyVerifier, Verdict, VerificationContext};

/// persisted ledger state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub decimals: u8,
    pub admin: PublicKey,
    pub packed_policy: PackedPolicy,
    /// root of the verification key registry
    pub registry_root: Hash,
    pub paused: bool,
}

impl TokenState {
    pub fn genesis(config: &TokenConfig) -> Self {
        Self {
            decimals: config.decimals,
            admin: config.admin,
            packed_policy: config.packed_policy(),
            registry_root: KeyRegistry::empty_root(),
            paused: config.paused,
        }
    }
}

/// proof material for a `*_with_proof` call
#[derive(Clone, Copy, Debug)]
pub struct Sideload<'a> {
    pub proof: &'a SideloadedProof,
    pub key: &'a VerificationKey,
    /// caller's replica of the key registry
    pub registry: &'a KeyRegistry,
}

impl<'a> Sideload<'a> {
    pub fn attachment(&self) -> ProofAttachment<'a> {
        ProofAttachment {
            proof: self.proof,
            key: self.key,
        }
    }
}

pub struct TokenLedger<L = MemoryLedger, P = DigestProofSystem> {
    /// ledger address, doubles as the circulation account
    address: Address,
    token_id: AssetId,
    symbol: String,
    state: TokenState,
    ledger: L,
    proofs: P,
}

impl<L: Ledger, P: ProofSystem> TokenLedger<L, P> {
    pub fn new(config: &TokenConfig, ledger: L, proofs: P) -> Result<Self> {
        config.validate()?;
        let token = Self::from_state(
            config.address,
            config.symbol.clone(),
            TokenState::genesis(config),
            ledger,
            proofs,
        );
        info!(
            symbol = %token.symbol,
            address = %short_hex(&token.address),
            policy = %token.state.packed_policy,
            "token ledger initialized"
        );
        Ok(token)
    }

    /// restore from persisted state
    pub fn from_state(address: Address, symbol: String, state: TokenState, ledger: L, proofs: P) -> Self {
        Self {
            address,
            token_id: AssetId::for_ledger(&address),
            symbol,
            state,
            ledger,
            proofs,
        }
    }

    // === reads ===

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn token_id(&self) -> AssetId {
        self.token_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.state.decimals
    }

    pub fn admin(&self) -> PublicKey {
        self.state.admin
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn packed_policy(&self) -> PackedPolicy {
        self.state.packed_policy
    }

    pub fn registry_root(&self) -> Hash {
        self.state.registry_root
    }

    pub fn state(&self) -> &TokenState {
        &self.state
    }

    pub fn balance_of(&self, owner: &Address) -> Balance {
        self.ledger.balance(owner, &self.token_id)
    }

    /// total supply, tracked on the circulation account
    pub fn circulating(&self) -> Balance {
        self.ledger.balance(&self.address, &self.token_id)
    }

    /// native nonce, the one signatures are bound to
    pub fn nonce_of(&self, signer: &Address) -> Nonce {
        self.ledger.nonce(signer, &AssetId::NATIVE)
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// commitment `signer` has to sign for `call`
    pub fn commitment(
        &self,
        call: &OperationCall<'_>,
        sideload: Option<&Sideload<'_>>,
        signer: &Address,
    ) -> Result<TransactionCommitment> {
        TransactionCommitment::new(
            &self.address,
            call,
            sideload.map(Sideload::attachment),
            self.nonce_of(signer),
        )
    }

    pub fn sign(
        &self,
        key: &SigningKey,
        call: &OperationCall<'_>,
        sideload: Option<&Sideload<'_>>,
    ) -> Result<Authorization> {
        let commitment = self.commitment(call, sideload, &key.verifying_key().to_bytes())?;
        Ok(Authorization::sign(key, &commitment))
    }

    // === balance operations ===

    pub fn mint(&mut self, recipient: Address, amount: Balance, auths: &[Authorization]) -> Result<()> {
        let result = self.mint_inner(recipient, amount, None, auths);
        self.report(OperationId::Mint, result)
    }

    pub fn mint_with_proof(
        &mut self,
        recipient: Address,
        amount: Balance,
        sideload: Sideload<'_>,
        auths: &[Authorization],
    ) -> Result<()> {
        let result = self.mint_inner(recipient, amount, Some(sideload), auths);
        self.report(OperationId::Mint, result)
    }

    pub fn burn(&mut self, from: Address, amount: Balance, auths: &[Authorization]) -> Result<()> {
        let result = self.burn_inner(from, amount, None, auths);
        self.report(OperationId::Burn, result)
    }

    pub fn burn_with_proof(
        &mut self,
        from: Address,
        amount: Balance,
        sideload: Sideload<'_>,
        auths: &[Authorization],
    ) -> Result<()> {
        let result = self.burn_inner(from, amount, Some(sideload), auths);
        self.report(OperationId::Burn, result)
    }

    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        amount: Balance,
        auths: &[Authorization],
    ) -> Result<()> {
        let result = self.transfer_inner(from, to, amount, None, auths);
        self.report(OperationId::Transfer, result)
    }

    pub fn transfer_with_proof(
        &mut self,
        from: Address,
        to: Address,
        amount: Balance,
        sideload: Sideload<'_>,
        auths: &[Authorization],
    ) -> Result<()> {
        let result = self.transfer_inner(from, to, amount, Some(sideload), auths);
        self.report(OperationId::Transfer, result)
    }

    /// approve and apply this token's part of a batch
    ///
    /// `sender` submits the batch and must sign it, as must every owner whose
    /// node debits this token.
    pub fn approve_batch(
        &mut self,
        sender: Address,
        forest: &UpdateForest,
        auths: &[Authorization],
    ) -> Result<BatchSummary> {
        let result = self.approve_batch_inner(sender, forest, None, auths);
        self.report(OperationId::BatchApprove, result)
    }

    pub fn approve_batch_with_proof(
        &mut self,
        sender: Address,
        forest: &UpdateForest,
        sideload: Sideload<'_>,
        auths: &[Authorization],
    ) -> Result<BatchSummary> {
        let result = self.approve_batch_inner(sender, forest, Some(sideload), auths);
        self.report(OperationId::BatchApprove, result)
    }

    fn mint_inner(
        &mut self,
        recipient: Address,
        amount: Balance,
        sideload: Option<Sideload<'_>>,
        auths: &[Authorization],
    ) -> Result<()> {
        self.ensure_active()?;
        self.ensure_endpoint(&recipient)?;
        self.check_policy(OperationId::Mint, sideload.as_ref(), &recipient)?;

        let call = OperationCall::Mint { recipient, amount };
        let admin = self.state.admin;
        self.authorize_admin(&call, sideload.as_ref(), auths)?;

        let mut staged = StagedChanges::new();
        staged
            .delta(recipient, self.token_id, amount as Delta)?
            .delta(self.address, self.token_id, amount as Delta)?;
        self.commit(staged, [admin])?;

        debug!(recipient = %short_hex(&recipient), amount, supply = self.circulating(), "minted");
        Ok(())
    }

    fn burn_inner(
        &mut self,
        from: Address,
        amount: Balance,
        sideload: Option<Sideload<'_>>,
        auths: &[Authorization],
    ) -> Result<()> {
        self.ensure_active()?;
        self.ensure_endpoint(&from)?;
        self.check_policy(OperationId::Burn, sideload.as_ref(), &from)?;

        let call = OperationCall::Burn { from, amount };
        self.authorize(&call, sideload.as_ref(), [from], auths)?;

        let mut staged = StagedChanges::new();
        staged
            .delta(from, self.token_id, -(amount as Delta))?
            .delta(self.address, self.token_id, -(amount as Delta))?
            .bump_nonce(from, self.token_id);
        self.commit(staged, [from])?;

        debug!(from = %short_hex(&from), amount, supply = self.circulating(), "burned");
        Ok(())
    }

    fn transfer_inner(
        &mut self,
        from: Address,
        to: Address,
        amount: Balance,
        sideload: Option<Sideload<'_>>,
        auths: &[Authorization],
    ) -> Result<()> {
        self.ensure_active()?;
        self.ensure_endpoint(&from)?;
        self.ensure_endpoint(&to)?;
        self.check_policy(OperationId::Transfer, sideload.as_ref(), &to)?;

        let call = OperationCall::Transfer { from, to, amount };
        self.authorize(&call, sideload.as_ref(), [from], auths)?;

        let mut staged = StagedChanges::new();
        staged
            .delta(from, self.token_id, -(amount as Delta))?
            .delta(to, self.token_id, amount as Delta)?
            .bump_nonce(from, self.token_id);
        self.commit(staged, [from])?;

        debug!(from = %short_hex(&from), to = %short_hex(&to), amount, "transferred");
        Ok(())
    }

    fn approve_batch_inner(
        &mut self,
        sender: Address,
        forest: &UpdateForest,
        sideload: Option<Sideload<'_>>,
        auths: &[Authorization],
    ) -> Result<BatchSummary> {
        self.ensure_active()?;
        self.check_policy(OperationId::BatchApprove, sideload.as_ref(), &sender)?;
        let summary = batch::approve(forest, &self.token_id, &self.address)?;

        let mut staged = StagedChanges::new();
        let mut signers = BTreeSet::from([sender]);
        for delta in forest.iter_post_order().filter(|d| d.touches(&self.token_id)) {
            staged.delta(delta.owner, self.token_id, delta.amount)?;
            if delta.amount < 0 {
                signers.insert(delta.owner);
            }
        }
        let debited: Vec<Address> = signers
            .iter()
            .filter(|o| staged.net(o, &self.token_id) < 0)
            .copied()
            .collect();
        for owner in debited {
            staged.bump_nonce(owner, self.token_id);
        }

        let call = OperationCall::ApproveBatch { sender, forest };
        self.authorize(&call, sideload.as_ref(), signers.iter().copied(), auths)?;
        self.commit(staged, signers)?;

        debug!(
            nodes = summary.nodes,
            touched = summary.touched,
            volume = summary.volume,
            "batch applied"
        );
        Ok(summary)
    }

    // === admin operations ===

    /// register `hash` for `operation` and return the updated replica
    ///
    /// `replica` must match the on-chain root. the caller keeps the returned
    /// registry as its new replica.
    pub fn update_registry_entry(
        &mut self,
        operation: u8,
        hash: VkHash,
        replica: &KeyRegistry,
        auths: &[Authorization],
    ) -> Result<KeyRegistry> {
        let result = self.update_registry_inner(operation, hash, replica, auths);
        self.report("update_registry_entry", result)
    }

    fn update_registry_inner(
        &mut self,
        operation: u8,
        hash: VkHash,
        replica: &KeyRegistry,
        auths: &[Authorization],
    ) -> Result<KeyRegistry> {
        let call = OperationCall::UpdateRegistryEntry { operation, hash };
        self.authorize_admin(&call, None, auths)?;
        if !replica.root_matches(&self.state.registry_root) {
            return Err(Error::RegistryOutOfSync);
        }

        let mut next = replica.clone();
        let root = next.set(operation, hash)?;
        self.commit_admin()?;
        self.state.registry_root = root;

        debug!(operation, vk = %short_hex(&hash), root = %short_hex(&root), "registry entry updated");
        Ok(next)
    }

    pub fn update_policy_record(
        &mut self,
        operation: u8,
        record: PolicyRecord,
        auths: &[Authorization],
    ) -> Result<PackedPolicy> {
        let result = self.update_policy_inner(OperationCall::UpdatePolicyRecord { operation, record }, auths);
        self.report("update_policy_record", result)
    }

    /// set a single flag of one operation's record
    pub fn update_policy_flag(
        &mut self,
        operation: u8,
        flag: u8,
        value: bool,
        auths: &[Authorization],
    ) -> Result<PackedPolicy> {
        let call = OperationCall::UpdatePolicyFlag { operation, flag, value };
        let result = self.update_policy_inner(call, auths);
        self.report("update_policy_flag", result)
    }

    fn update_policy_inner(&mut self, call: OperationCall<'_>, auths: &[Authorization]) -> Result<PackedPolicy> {
        self.authorize_admin(&call, None, auths)?;
        let current = self.state.packed_policy;
        let packed = match call {
            OperationCall::UpdatePolicyRecord { operation, record } => {
                current.with_record(OperationId::try_from(operation)?, record)
            }
            OperationCall::UpdatePolicyFlag { operation, flag, value } => {
                let op = OperationId::try_from(operation)?;
                let flag = PolicyFlag::try_from(flag)?;
                current.with_record(op, current.record(op).with_flag(flag, value))
            }
            _ => return Err(Error::Config("not a policy update".into())),
        };
        self.commit_admin()?;
        self.state.packed_policy = packed;

        debug!(from = %current, to = %packed, "policy updated");
        Ok(packed)
    }

    /// stop all balance-changing operations
    pub fn pause(&mut self, auths: &[Authorization]) -> Result<()> {
        let result = self.set_paused(OperationCall::Pause, true, auths);
        self.report("pause", result)
    }

    pub fn resume(&mut self, auths: &[Authorization]) -> Result<()> {
        let result = self.set_paused(OperationCall::Resume, false, auths);
        self.report("resume", result)
    }

    fn set_paused(&mut self, call: OperationCall<'_>, paused: bool, auths: &[Authorization]) -> Result<()> {
        self.authorize_admin(&call, None, auths)?;
        self.commit_admin()?;
        self.state.paused = paused;
        Ok(())
    }

    /// hand the admin role to another key
    pub fn set_admin(&mut self, admin: PublicKey, auths: &[Authorization]) -> Result<()> {
        let result = self.set_admin_inner(admin, auths);
        self.report("set_admin", result)
    }

    fn set_admin_inner(&mut self, admin: PublicKey, auths: &[Authorization]) -> Result<()> {
        let call = OperationCall::SetAdmin { admin };
        self.authorize_admin(&call, None, auths)?;
        VerifyingKey::from_bytes(&admin)
            .map_err(|_| Error::Config("admin is not a valid ed25519 public key".into()))?;
        if admin == self.address {
            return Err(Error::Config("the circulation account can't be the admin".into()));
        }
        self.commit_admin()?;
        let previous = std::mem::replace(&mut self.state.admin, admin);

        debug!(from = %short_hex(&previous), to = %short_hex(&admin), "admin rotated");
        Ok(())
    }

    // === checks ===

    fn ensure_active(&self) -> Result<()> {
        if self.state.paused {
            return Err(Error::Paused);
        }
        Ok(())
    }

    fn ensure_endpoint(&self, account: &Address) -> Result<()> {
        if *account == self.address {
            return Err(Error::NoTransferFromCirculation { node: None });
        }
        Ok(())
    }

    fn check_policy(
        &self,
        operation: OperationId,
        sideload: Option<&Sideload<'_>>,
        expected_recipient: &Address,
    ) -> Result<Verdict> {
        let record = self.state.packed_policy.record(operation);
        let Some(sideload) = sideload else {
            if record.should_verify {
                return Err(Error::SideloadRequiredUseProofVariant(operation));
            }
            return Ok(Verdict::Skipped);
        };

        let ctx = VerificationContext {
            operation,
            record,
            registry_root: &self.state.registry_root,
            registry: sideload.registry,
            proof: sideload.proof,
            key: sideload.key,
            expected_recipient,
            expected_token_id: &self.token_id,
        };
        ProofPolicyVerifier::new(&self.ledger, &self.proofs).verify(&ctx)
    }

    /// every signer signed this exact call at its current nonce
    fn authorize(
        &self,
        call: &OperationCall<'_>,
        sideload: Option<&Sideload<'_>>,
        signers: impl IntoIterator<Item = Address>,
        auths: &[Authorization],
    ) -> Result<()> {
        for signer in signers {
            let commitment = self.commitment(call, sideload, &signer)?;
            auth::find(auths, &signer)?.verify(&commitment)?;
        }
        Ok(())
    }

    fn authorize_admin(
        &self,
        call: &OperationCall<'_>,
        sideload: Option<&Sideload<'_>>,
        auths: &[Authorization],
    ) -> Result<()> {
        self.authorize(call, sideload, [self.state.admin], auths)
            .map_err(|e| match e {
                Error::MissingAuthorization(_) => Error::NotAdmin,
                e => e,
            })
    }

    /// apply staged writes and consume the signers' nonces
    fn commit(&mut self, mut staged: StagedChanges, signers: impl IntoIterator<Item = Address>) -> Result<()> {
        for signer in signers {
            staged.bump_nonce(signer, AssetId::NATIVE);
        }
        staged.commit(&mut self.ledger)
    }

    fn commit_admin(&mut self) -> Result<()> {
        let admin = self.state.admin;
        self.commit(StagedChanges::new(), [admin])
    }

    fn report<T>(&self, operation: impl std::fmt::Display, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => info!(%operation, token = %short_hex(&self.token_id.0), "operation applied"),
            Err(e) => warn!(%operation, kind = ?e.kind(), error = %e, "operation rejected"),
        }
        result
    }
}
