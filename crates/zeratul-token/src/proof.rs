//! sideloaded proofs
//!
//! a sideloaded proof attests to a snapshot of two accounts of one owner,
//! its native-asset account and its account for this token, as they were
//! when the proof was generated. the proof system itself is opaque to the
//! ledger: anything implementing [`ProofSystem`] can be plugged in.

use serde::{Deserialize, Serialize};

use crate::ledger::Ledger;
use crate::registry::VkHash;
use crate::types::{Address, AssetId, Balance, Hash, Nonce};
use crate::{PROOF_DOMAIN, VK_DOMAIN};

/// verification key for a sideloaded circuit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    pub data: Vec<u8>,
}

impl VerificationKey {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// the value stored in the key registry
    pub fn hash(&self) -> VkHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(VK_DOMAIN);
        hasher.update(&self.data);
        *hasher.finalize().as_bytes()
    }
}

/// which account a snapshot describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub owner: Address,
    pub token_id: AssetId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofInput {
    pub token_id: AssetId,
    pub address: Address,
}

/// account state frozen at proof generation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOutput {
    pub native_account: AccountSnapshot,
    pub token_account: AccountSnapshot,
    pub native_balance: Balance,
    pub token_balance: Balance,
    pub native_nonce: Nonce,
    pub token_nonce: Nonce,
}

impl ProofOutput {
    /// read the current state of `address` for the native asset and `token_id`
    pub fn observe(ledger: &dyn Ledger, address: Address, token_id: AssetId) -> Self {
        Self {
            native_account: AccountSnapshot {
                owner: address,
                token_id: AssetId::NATIVE,
            },
            token_account: AccountSnapshot {
                owner: address,
                token_id,
            },
            native_balance: ledger.balance(&address, &AssetId::NATIVE),
            token_balance: ledger.balance(&address, &token_id),
            native_nonce: ledger.nonce(&address, &AssetId::NATIVE),
            token_nonce: ledger.nonce(&address, &token_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideloadedProof {
    pub public_input: ProofInput,
    pub public_output: ProofOutput,
    /// opaque proof bytes
    pub proof: Vec<u8>,
}

impl SideloadedProof {
    /// commitment to the public input and output
    pub fn public_digest(&self) -> Hash {
        let input = &self.public_input;
        let output = &self.public_output;

        let mut hasher = blake3::Hasher::new();
        hasher.update(PROOF_DOMAIN);
        hasher.update(&input.token_id.0);
        hasher.update(&input.address);
        for snapshot in [&output.native_account, &output.token_account] {
            hasher.update(&snapshot.owner);
            hasher.update(&snapshot.token_id.0);
        }
        hasher.update(&output.native_balance.to_le_bytes());
        hasher.update(&output.token_balance.to_le_bytes());
        hasher.update(&output.native_nonce.to_le_bytes());
        hasher.update(&output.token_nonce.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// opaque proof verification capability
///
/// must be pure and terminating; the ledger calls it at most once per
/// operation and only when the policy asks for it.
pub trait ProofSystem {
    fn verify(&self, proof: &SideloadedProof, key: &VerificationKey) -> bool;
}

impl<F> ProofSystem for F
where
    F: Fn(&SideloadedProof, &VerificationKey) -> bool,
{
    fn verify(&self, proof: &SideloadedProof, key: &VerificationKey) -> bool {
        self(proof, key)
    }
}

/// transparent proof system binding the public values to a key hash
///
/// offers no zero-knowledge and no soundness beyond the hash binding.
/// meant for tests and local runs of the CLI.
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestProofSystem;

impl DigestProofSystem {
    fn binding(key: &VerificationKey, digest: &Hash) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(PROOF_DOMAIN);
        hasher.update(&key.hash());
        hasher.update(digest);
        *hasher.finalize().as_bytes()
    }

    pub fn prove(key: &VerificationKey, input: ProofInput, output: ProofOutput) -> SideloadedProof {
        let mut proof = SideloadedProof {
            public_input: input,
            public_output: output,
            proof: Vec::new(),
        };
        proof.proof = Self::binding(key, &proof.public_digest()).to_vec();
        proof
    }

    /// prove the current ledger state of `address`
    pub fn prove_current(
        key: &VerificationKey,
        ledger: &dyn Ledger,
        address: Address,
        token_id: AssetId,
    ) -> SideloadedProof {
        let input = ProofInput { token_id, address };
        Self::prove(key, input, ProofOutput::observe(ledger, address, token_id))
    }
}

impl ProofSystem for DigestProofSystem {
    fn verify(&self, proof: &SideloadedProof, key: &VerificationKey) -> bool {
        proof.proof.as_slice() == Self::binding(key, &proof.public_digest()).as_slice()
    }
}
