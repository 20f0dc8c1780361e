//! core types for the token ledger

use serde::{Deserialize, Serialize};

/// 32-byte hash
pub type Hash = [u8; 32];

/// 32-byte ed25519 public key
pub type PublicKey = [u8; 32];

/// account address (the owner's public key)
pub type Address = PublicKey;

/// 64-byte ed25519 signature
pub type Signature = [u8; 64];

/// account balance in base units
pub type Balance = u64;

/// per-account nonce
pub type Nonce = u32;

/// signed balance change (wide enough for any difference of two balances)
pub type Delta = i128;

/// asset identifier (32 bytes, derived from the owning ledger address)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub [u8; 32]);

impl AssetId {
    /// the chain's native settlement asset
    pub const NATIVE: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// token id managed by the ledger deployed at `address`
    pub fn for_ledger(address: &Address) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(crate::TOKEN_ID_DOMAIN);
        hasher.update(address);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn is_native(&self) -> bool {
        *self == Self::NATIVE
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

/// short hex form for logs
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(4)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_id_derivation() {
        let a = AssetId::for_ledger(&[1u8; 32]);
        let b = AssetId::for_ledger(&[2u8; 32]);
        assert_ne!(a, b);
        assert_eq!(a, AssetId::for_ledger(&[1u8; 32]));
        assert!(!a.is_native());
        assert!(AssetId::NATIVE.is_native());
    }
}
