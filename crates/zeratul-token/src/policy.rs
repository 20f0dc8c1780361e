//! per-operation proof policies packed into one scalar
//!
//! four records of seven flags each share a single `u32`:
//!
//! ```text
//!  31      28 27       21 20       14 13        7 6         0
//! ┌──────────┬───────────┬───────────┬───────────┬───────────┐
//! │  unused  │  approve  │ transfer  │   burn    │   mint    │
//! └──────────┴───────────┴───────────┴───────────┴───────────┘
//! ```
//!
//! within a segment, bit 0 is `should_verify` and bits 1..=6 follow the
//! field order of [`PolicyRecord`].

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// bits per policy record
pub const SEGMENT_BITS: u32 = 7;
/// mask of one segment
pub const SEGMENT_MASK: u32 = (1 << SEGMENT_BITS) - 1;
/// number of records in a packed policy
pub const SEGMENT_COUNT: usize = 4;
/// total bits in use
pub const PACKED_BITS: u32 = SEGMENT_BITS * SEGMENT_COUNT as u32;

/// balance-changing operation kinds; also the key into policy and registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationId {
    Mint = 1,
    Burn = 2,
    Transfer = 3,
    BatchApprove = 4,
}

impl OperationId {
    pub const ALL: [OperationId; SEGMENT_COUNT] = [
        OperationId::Mint,
        OperationId::Burn,
        OperationId::Transfer,
        OperationId::BatchApprove,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// segment index inside a packed policy
    pub fn segment(self) -> usize {
        self as usize - 1
    }

    /// key inside the verification key registry
    pub fn registry_key(self) -> u64 {
        self as u64
    }
}

impl TryFrom<u8> for OperationId {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Self::Mint),
            2 => Ok(Self::Burn),
            3 => Ok(Self::Transfer),
            4 => Ok(Self::BatchApprove),
            other => Err(Error::InvalidOperationId(other)),
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mint => "mint",
            Self::Burn => "burn",
            Self::Transfer => "transfer",
            Self::BatchApprove => "batch approve",
        };
        f.write_str(name)
    }
}

/// selector for a single flag, numbered by bit position
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PolicyFlag {
    ShouldVerify = 0,
    RequireRecipientMatch = 1,
    RequireTokenIdMatch = 2,
    RequireNativeBalanceMatch = 3,
    RequireTokenBalanceMatch = 4,
    RequireNativeNonceMatch = 5,
    RequireTokenNonceMatch = 6,
}

impl PolicyFlag {
    pub const ALL: [PolicyFlag; SEGMENT_BITS as usize] = [
        PolicyFlag::ShouldVerify,
        PolicyFlag::RequireRecipientMatch,
        PolicyFlag::RequireTokenIdMatch,
        PolicyFlag::RequireNativeBalanceMatch,
        PolicyFlag::RequireTokenBalanceMatch,
        PolicyFlag::RequireNativeNonceMatch,
        PolicyFlag::RequireTokenNonceMatch,
    ];

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl TryFrom<u8> for PolicyFlag {
    type Error = Error;

    fn try_from(selector: u8) -> Result<Self> {
        Self::ALL
            .get(selector as usize)
            .copied()
            .ok_or(Error::InvalidFlagSelector(selector))
    }
}

/// proof requirements for one operation kind
///
/// flags are independent. when `should_verify` is false the remaining
/// flags are never evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRecord {
    pub should_verify: bool,
    pub require_recipient_match: bool,
    pub require_token_id_match: bool,
    pub require_native_balance_match: bool,
    pub require_token_balance_match: bool,
    pub require_native_nonce_match: bool,
    pub require_token_nonce_match: bool,
}

impl PolicyRecord {
    /// no proof required
    pub const DISABLED: Self = Self {
        should_verify: false,
        require_recipient_match: false,
        require_token_id_match: false,
        require_native_balance_match: false,
        require_token_balance_match: false,
        require_native_nonce_match: false,
        require_token_nonce_match: false,
    };

    /// proof required, every state check enabled
    pub const STRICT: Self = Self {
        should_verify: true,
        require_recipient_match: true,
        require_token_id_match: true,
        require_native_balance_match: true,
        require_token_balance_match: true,
        require_native_nonce_match: true,
        require_token_nonce_match: true,
    };

    /// the 7 flag bits, `should_verify` in bit 0
    pub fn to_bits(&self) -> u8 {
        PolicyFlag::ALL
            .iter()
            .filter(|f| self.flag(**f))
            .fold(0u8, |acc, f| acc | f.bit())
    }

    /// decode from the low 7 bits, higher bits ignored
    pub fn from_bits(bits: u8) -> Self {
        PolicyFlag::ALL
            .iter()
            .fold(Self::DISABLED, |rec, f| rec.with_flag(*f, bits & f.bit() != 0))
    }

    pub fn flag(&self, flag: PolicyFlag) -> bool {
        match flag {
            PolicyFlag::ShouldVerify => self.should_verify,
            PolicyFlag::RequireRecipientMatch => self.require_recipient_match,
            PolicyFlag::RequireTokenIdMatch => self.require_token_id_match,
            PolicyFlag::RequireNativeBalanceMatch => self.require_native_balance_match,
            PolicyFlag::RequireTokenBalanceMatch => self.require_token_balance_match,
            PolicyFlag::RequireNativeNonceMatch => self.require_native_nonce_match,
            PolicyFlag::RequireTokenNonceMatch => self.require_token_nonce_match,
        }
    }

    pub fn with_flag(mut self, flag: PolicyFlag, value: bool) -> Self {
        let slot = match flag {
            PolicyFlag::ShouldVerify => &mut self.should_verify,
            PolicyFlag::RequireRecipientMatch => &mut self.require_recipient_match,
            PolicyFlag::RequireTokenIdMatch => &mut self.require_token_id_match,
            PolicyFlag::RequireNativeBalanceMatch => &mut self.require_native_balance_match,
            PolicyFlag::RequireTokenBalanceMatch => &mut self.require_token_balance_match,
            PolicyFlag::RequireNativeNonceMatch => &mut self.require_native_nonce_match,
            PolicyFlag::RequireTokenNonceMatch => &mut self.require_token_nonce_match,
        };
        *slot = value;
        self
    }
}

/// four policy records in one 28-bit scalar
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PackedPolicy(u32);

impl PackedPolicy {
    /// pack exactly four records, in operation order
    pub fn pack(records: &[PolicyRecord]) -> Result<Self> {
        if records.len() != SEGMENT_COUNT {
            return Err(Error::InvalidRecordCount(records.len()));
        }
        let bits = records
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, r)| acc | (r.to_bits() as u32) << (SEGMENT_BITS * i as u32));
        Ok(Self(bits))
    }

    /// accept a raw scalar, rejecting bits outside the four segments
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits >> PACKED_BITS != 0 {
            return Err(Error::PackedPolicyOverflow(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn unpack(&self, index: usize) -> Result<PolicyRecord> {
        if index >= SEGMENT_COUNT {
            return Err(Error::InvalidSegmentIndex(index));
        }
        let bits = (self.0 >> (SEGMENT_BITS * index as u32)) & SEGMENT_MASK;
        Ok(PolicyRecord::from_bits(bits as u8))
    }

    pub fn record(&self, op: OperationId) -> PolicyRecord {
        let bits = (self.0 >> (SEGMENT_BITS * op.segment() as u32)) & SEGMENT_MASK;
        PolicyRecord::from_bits(bits as u8)
    }

    /// copy of `self` with segment `index` rewritten, everything else untouched
    pub fn replace_segment(&self, index: usize, record: PolicyRecord) -> Result<Self> {
        if index >= SEGMENT_COUNT {
            return Err(Error::InvalidSegmentIndex(index));
        }
        let shift = SEGMENT_BITS * index as u32;
        let cleared = self.0 & !(SEGMENT_MASK << shift);
        Ok(Self(cleared | (record.to_bits() as u32) << shift))
    }

    pub fn with_record(&self, op: OperationId, record: PolicyRecord) -> Self {
        let shift = SEGMENT_BITS * op.segment() as u32;
        let cleared = self.0 & !(SEGMENT_MASK << shift);
        Self(cleared | (record.to_bits() as u32) << shift)
    }

    pub fn records(&self) -> [PolicyRecord; SEGMENT_COUNT] {
        OperationId::ALL.map(|op| self.record(op))
    }
}

impl TryFrom<u32> for PackedPolicy {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        Self::from_bits(bits)
    }
}

impl From<PackedPolicy> for u32 {
    fn from(p: PackedPolicy) -> Self {
        p.0
    }
}

impl fmt::Display for PackedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#09x}", self.0)
    }
}
