//! signatures and full transaction commitments
//!
//! every signature covers a [`TransactionCommitment`]: the ledger address, the
//! complete call with all its arguments, the attached proof if any, and the
//! signer's current native nonce. a signature for one call can therefore not
//! be attached to a different call, a different proof, or replayed once the
//! nonce has moved.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use sha2::{Digest, Sha256};

use crate::batch::UpdateForest;
use crate::error::{Error, Result};
use crate::policy::PolicyRecord;
use crate::proof::{SideloadedProof, VerificationKey};
use crate::registry::VkHash;
use crate::types::{Address, Balance, Hash, Nonce, Signature};
use crate::COMMITMENT_DOMAIN;

/// a caller-level operation, exactly as it is signed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum OperationCall<'a> {
    Mint { recipient: Address, amount: Balance },
    Burn { from: Address, amount: Balance },
    Transfer { from: Address, to: Address, amount: Balance },
    ApproveBatch { sender: Address, forest: &'a UpdateForest },
    UpdateRegistryEntry { operation: u8, hash: VkHash },
    UpdatePolicyRecord { operation: u8, record: PolicyRecord },
    UpdatePolicyFlag { operation: u8, flag: u8, value: bool },
    Pause,
    Resume,
    SetAdmin { admin: Address },
}

/// proof material attached to a call
#[derive(Clone, Copy, Debug)]
pub struct ProofAttachment<'a> {
    pub proof: &'a SideloadedProof,
    pub key: &'a VerificationKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransactionCommitment(pub Hash);

impl TransactionCommitment {
    pub fn new(
        ledger: &Address,
        call: &OperationCall<'_>,
        attachment: Option<ProofAttachment<'_>>,
        signer_nonce: Nonce,
    ) -> Result<Self> {
        let encoded = bincode::serialize(call).map_err(|e| Error::Encoding(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(COMMITMENT_DOMAIN);
        hasher.update(ledger);
        hasher.update((encoded.len() as u64).to_le_bytes());
        hasher.update(&encoded);
        match attachment {
            Some(a) => {
                hasher.update([1u8]);
                hasher.update(a.proof.public_digest());
                hasher.update((a.proof.proof.len() as u64).to_le_bytes());
                hasher.update(&a.proof.proof);
                hasher.update(a.key.hash());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(signer_nonce.to_le_bytes());
        Ok(Self(hasher.finalize().into()))
    }
}

/// an ed25519 signature by `signer` over a transaction commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub signer: Address,
    #[serde(with = "BigArray")]
    pub signature: Signature,
}

impl Authorization {
    pub fn sign(key: &SigningKey, commitment: &TransactionCommitment) -> Self {
        Self {
            signer: key.verifying_key().to_bytes(),
            signature: key.sign(&commitment.0).to_bytes(),
        }
    }

    pub fn verify(&self, commitment: &TransactionCommitment) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.signer)
            .map_err(|_| Error::InvalidSignature(self.signer))?;
        let signature = ed25519_dalek::Signature::from_bytes(&self.signature);
        key.verify(&commitment.0, &signature)
            .map_err(|_| Error::InvalidSignature(self.signer))
    }
}

/// the authorization given by `principal`, if any
pub fn find<'a>(auths: &'a [Authorization], principal: &Address) -> Result<&'a Authorization> {
    auths
        .iter()
        .find(|a| a.signer == *principal)
        .ok_or(Error::MissingAuthorization(*principal))
}
