//! token ledger configuration
//!
//! loaded from JSON. keys and addresses are hex strings.
//!
//! ```json
//! {
//!   "symbol": "ZTK",
//!   "decimals": 9,
//!   "admin": "d75a98...",
//!   "address": "3d4017...",
//!   "policies": {
//!     "mint": { "should_verify": true, "require_token_balance_match": true }
//!   }
//! }
//! ```

use std::path::Path;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::{OperationId, PackedPolicy, PolicyRecord};
use crate::types::{Address, PublicKey};

/// default number of decimals
pub const DEFAULT_DECIMALS: u8 = 9;

/// per-operation policy records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub mint: PolicyRecord,
    pub burn: PolicyRecord,
    pub transfer: PolicyRecord,
    pub batch_approve: PolicyRecord,
}

impl PolicyConfig {
    pub fn get(&self, op: OperationId) -> PolicyRecord {
        match op {
            OperationId::Mint => self.mint,
            OperationId::Burn => self.burn,
            OperationId::Transfer => self.transfer,
            OperationId::BatchApprove => self.batch_approve,
        }
    }

    pub fn packed(&self) -> PackedPolicy {
        OperationId::ALL
            .iter()
            .fold(PackedPolicy::default(), |p, op| p.with_record(*op, self.get(*op)))
    }

    pub fn from_packed(packed: PackedPolicy) -> Self {
        Self {
            mint: packed.record(OperationId::Mint),
            burn: packed.record(OperationId::Burn),
            transfer: packed.record(OperationId::Transfer),
            batch_approve: packed.record(OperationId::BatchApprove),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    pub symbol: String,
    pub decimals: u8,
    /// admin public key
    #[serde(with = "hex_bytes")]
    pub admin: PublicKey,
    /// ledger address, also the circulation-tracking account
    #[serde(with = "hex_bytes")]
    pub address: Address,
    pub paused: bool,
    pub policies: PolicyConfig,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            symbol: "ZTK".to_string(),
            decimals: DEFAULT_DECIMALS,
            admin: [0u8; 32],
            address: [0u8; 32],
            paused: false,
            policies: PolicyConfig::default(),
        }
    }
}

impl TokenConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Encoding(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(Error::Config("symbol must not be empty".into()));
        }
        VerifyingKey::from_bytes(&self.admin)
            .map_err(|_| Error::Config("admin is not a valid ed25519 public key".into()))?;
        if self.address == self.admin {
            return Err(Error::Config(
                "ledger address doubles as circulation account, it can't be the admin".into(),
            ));
        }
        Ok(())
    }

    pub fn packed_policy(&self) -> PackedPolicy {
        self.policies.packed()
    }
}

/// `[u8; 32]` as a hex string
mod hex_bytes {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let raw = hex::decode(s.trim_start_matches("0x")).map_err(D::Error::custom)?;
        raw.try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected 32 bytes, got {}", v.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn admin_hex() -> String {
        hex::encode(SigningKey::from_bytes(&[1u8; 32]).verifying_key().to_bytes())
    }

    #[test]
    fn test_minimal_json() {
        let json = format!(
            r#"{{ "admin": "{}", "address": "{}" }}"#,
            admin_hex(),
            hex::encode([0xCC; 32])
        );
        let config = TokenConfig::from_json_str(&json).unwrap();
        assert_eq!(config.decimals, DEFAULT_DECIMALS);
        assert_eq!(config.symbol, "ZTK");
        assert_eq!(config.packed_policy(), PackedPolicy::default());
    }

    #[test]
    fn test_policies_from_json() {
        let json = format!(
            r#"{{
                "admin": "0x{}",
                "address": "{}",
                "decimals": 6,
                "policies": {{
                    "mint": {{ "should_verify": true, "require_token_balance_match": true }},
                    "batch_approve": {{ "should_verify": true }}
                }}
            }}"#,
            admin_hex(),
            hex::encode([0xCC; 32])
        );
        let config = TokenConfig::from_json_str(&json).unwrap();
        let packed = config.packed_policy();
        assert_eq!(packed.bits(), 0b1_0001 | 1 << 21);
        assert_eq!(PolicyConfig::from_packed(packed), config.policies);
    }

    #[test]
    fn test_rejects_bad_configs() {
        let short = r#"{ "admin": "abcd" }"#;
        assert!(matches!(TokenConfig::from_json_str(short), Err(Error::Config(_))));

        let unknown = format!(r#"{{ "admin": "{}", "colour": "red" }}"#, admin_hex());
        assert!(matches!(TokenConfig::from_json_str(&unknown), Err(Error::Config(_))));

        let same = format!(r#"{{ "admin": "{0}", "address": "{0}" }}"#, admin_hex());
        assert!(matches!(TokenConfig::from_json_str(&same), Err(Error::Config(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = TokenConfig {
            admin: SigningKey::from_bytes(&[1u8; 32]).verifying_key().to_bytes(),
            address: [0xCC; 32],
            ..Default::default()
        };
        config.policies.transfer = PolicyRecord::STRICT;
        let json = config.to_json_pretty().unwrap();
        assert_eq!(TokenConfig::from_json_str(&json).unwrap(), config);
    }
}
