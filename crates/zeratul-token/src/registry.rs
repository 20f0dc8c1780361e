//! sideloaded verification key registry
//!
//! maps each [`OperationId`] to the hash of the verification key that proofs
//! for that operation must be checked against. the ledger stores only the
//! root; callers hold a full replica and present it with every proof.

use serde::{Deserialize, Serialize};
use zeratul_smt::{MerkleWitness, SparseMerkleMap};

use crate::error::Result;
use crate::policy::OperationId;
use crate::types::Hash;

/// registry tree depth, keys are the operation ids 1..=4
pub const REGISTRY_DEPTH: u8 = 8;

/// hash of a verification key
pub type VkHash = Hash;

/// caller-held replica of the registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRegistry {
    map: SparseMerkleMap,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self {
            map: SparseMerkleMap::with_depth::<REGISTRY_DEPTH>(),
        }
    }

    /// root of a registry with no keys, used at ledger genesis
    pub fn empty_root() -> Hash {
        Self::new().root()
    }

    pub fn root(&self) -> Hash {
        self.map.root()
    }

    /// a replica is only trusted after this returns true
    pub fn root_matches(&self, candidate: &Hash) -> bool {
        self.root() == *candidate
    }

    pub fn get(&self, op: OperationId) -> Option<VkHash> {
        self.map.get(op.registry_key())
    }

    /// insert or overwrite the key hash for raw operation id `id`
    pub fn set(&mut self, id: u8, hash: VkHash) -> Result<Hash> {
        let op = OperationId::try_from(id)?;
        Ok(self.map.set(op.registry_key(), hash)?)
    }

    pub fn set_for(&mut self, op: OperationId, hash: VkHash) -> Result<Hash> {
        Ok(self.map.set(op.registry_key(), hash)?)
    }

    /// merkle path for one entry, lets a light caller skip the full replica
    pub fn witness(&self, op: OperationId) -> Result<MerkleWitness> {
        Ok(self.map.witness(op.registry_key())?)
    }

    /// check a single entry against a root using only its witness
    pub fn verify_entry(
        op: OperationId,
        hash: Option<&VkHash>,
        witness: &MerkleWitness,
        root: &Hash,
    ) -> bool {
        witness.key == op.registry_key() && witness.verify(hash, root)
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
