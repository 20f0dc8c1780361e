//! balance ledger primitive
//!
//! the policy core never owns balances. it reads and writes them through
//! [`Ledger`], and batches every write of one operation into a
//! [`StagedChanges`] that is checked in full before anything is applied.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{Address, AssetId, Balance, Delta, Nonce};

/// balance and nonce storage supplied by the execution environment
pub trait Ledger {
    fn balance(&self, owner: &Address, asset: &AssetId) -> Balance;

    fn nonce(&self, owner: &Address, asset: &AssetId) -> Nonce;

    /// apply a signed change, returns the new balance
    fn apply_delta(&mut self, owner: &Address, asset: &AssetId, delta: Delta) -> Result<Balance>;

    /// increment the account nonce, returns the new nonce
    fn bump_nonce(&mut self, owner: &Address, asset: &AssetId) -> Result<Nonce>;
}

/// `balance + delta`, or the reason it can't be applied
pub fn checked_apply(owner: &Address, balance: Balance, delta: Delta) -> Result<Balance> {
    let next = (balance as i128)
        .checked_add(delta)
        .ok_or(Error::BalanceOverflow(*owner))?;
    if next < 0 {
        return Err(Error::InsufficientBalance {
            owner: *owner,
            available: balance,
            requested: delta.unsigned_abs(),
        });
    }
    Balance::try_from(next).map_err(|_| Error::BalanceOverflow(*owner))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountState {
    pub balance: Balance,
    pub nonce: Nonce,
}

/// in-memory ledger
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    accounts: BTreeMap<(Address, AssetId), AccountState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// seed an account, e.g. native funds at genesis
    pub fn with_account(mut self, owner: Address, asset: AssetId, balance: Balance) -> Self {
        self.accounts.entry((owner, asset)).or_default().balance = balance;
        self
    }

    pub fn account(&self, owner: &Address, asset: &AssetId) -> AccountState {
        self.accounts
            .get(&(*owner, *asset))
            .copied()
            .unwrap_or_default()
    }

    /// sum of all balances of one asset
    pub fn total(&self, asset: &AssetId) -> u128 {
        self.accounts
            .iter()
            .filter(|((_, a), _)| a == asset)
            .map(|(_, s)| s.balance as u128)
            .sum()
    }
}

impl Ledger for MemoryLedger {
    fn balance(&self, owner: &Address, asset: &AssetId) -> Balance {
        self.account(owner, asset).balance
    }

    fn nonce(&self, owner: &Address, asset: &AssetId) -> Nonce {
        self.account(owner, asset).nonce
    }

    fn apply_delta(&mut self, owner: &Address, asset: &AssetId, delta: Delta) -> Result<Balance> {
        let current = self.balance(owner, asset);
        let next = checked_apply(owner, current, delta)?;
        self.accounts.entry((*owner, *asset)).or_default().balance = next;
        Ok(next)
    }

    fn bump_nonce(&mut self, owner: &Address, asset: &AssetId) -> Result<Nonce> {
        let state = self.accounts.entry((*owner, *asset)).or_default();
        state.nonce = state
            .nonce
            .checked_add(1)
            .ok_or(Error::NonceOverflow(*owner))?;
        Ok(state.nonce)
    }
}

/// all ledger writes of one operation
///
/// deltas are netted per account, so the order they were staged in doesn't
/// matter once [`StagedChanges::check`] has passed.
#[derive(Clone, Debug, Default)]
pub struct StagedChanges {
    deltas: BTreeMap<(Address, AssetId), Delta>,
    nonces: BTreeMap<(Address, AssetId), u32>,
}

impl StagedChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta(&mut self, owner: Address, asset: AssetId, delta: Delta) -> Result<&mut Self> {
        let net = self.deltas.entry((owner, asset)).or_default();
        *net = net.checked_add(delta).ok_or(Error::BalanceOverflow(owner))?;
        Ok(self)
    }

    pub fn bump_nonce(&mut self, owner: Address, asset: AssetId) -> &mut Self {
        *self.nonces.entry((owner, asset)).or_default() += 1;
        self
    }

    pub fn net(&self, owner: &Address, asset: &AssetId) -> Delta {
        self.deltas.get(&(*owner, *asset)).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.nonces.is_empty()
    }

    /// every staged write would succeed against `ledger`
    pub fn check(&self, ledger: &dyn Ledger) -> Result<()> {
        for ((owner, asset), delta) in &self.deltas {
            checked_apply(owner, ledger.balance(owner, asset), *delta)?;
        }
        for ((owner, asset), bumps) in &self.nonces {
            ledger
                .nonce(owner, asset)
                .checked_add(*bumps)
                .ok_or(Error::NonceOverflow(*owner))?;
        }
        Ok(())
    }

    /// check, then apply everything
    pub fn commit(self, ledger: &mut dyn Ledger) -> Result<()> {
        self.check(ledger)?;
        for ((owner, asset), delta) in self.deltas {
            if delta != 0 {
                ledger.apply_delta(&owner, &asset, delta)?;
            }
        }
        for ((owner, asset), bumps) in self.nonces {
            for _ in 0..bumps {
                ledger.bump_nonce(&owner, &asset)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = [1u8; 32];
    const BOB: Address = [2u8; 32];

    #[test]
    fn test_apply_delta() {
        let mut ledger = MemoryLedger::new();
        assert_eq!(ledger.apply_delta(&ALICE, &AssetId::NATIVE, 100).unwrap(), 100);
        assert_eq!(ledger.apply_delta(&ALICE, &AssetId::NATIVE, -40).unwrap(), 60);
        assert_eq!(
            ledger.apply_delta(&ALICE, &AssetId::NATIVE, -61),
            Err(Error::InsufficientBalance {
                owner: ALICE,
                available: 60,
                requested: 61
            })
        );
        assert_eq!(ledger.balance(&ALICE, &AssetId::NATIVE), 60);
    }

    #[test]
    fn test_overflow() {
        let mut ledger = MemoryLedger::new().with_account(ALICE, AssetId::NATIVE, u64::MAX);
        assert_eq!(
            ledger.apply_delta(&ALICE, &AssetId::NATIVE, 1),
            Err(Error::BalanceOverflow(ALICE))
        );
    }

    #[test]
    fn test_staged_all_or_nothing() {
        let token = AssetId::for_ledger(&[9u8; 32]);
        let mut ledger = MemoryLedger::new().with_account(ALICE, token, 50);

        let mut staged = StagedChanges::new();
        staged.delta(ALICE, token, -50).unwrap().delta(BOB, token, 50).unwrap();
        staged.delta(BOB, token, -60).unwrap(); // bob can't cover this
        staged.bump_nonce(ALICE, AssetId::NATIVE);

        assert!(staged.commit(&mut ledger).is_err());
        assert_eq!(ledger.balance(&ALICE, &token), 50);
        assert_eq!(ledger.balance(&BOB, &token), 0);
        assert_eq!(ledger.nonce(&ALICE, &AssetId::NATIVE), 0);
    }

    #[test]
    fn test_staged_nets_per_account() {
        let token = AssetId::for_ledger(&[9u8; 32]);
        let mut ledger = MemoryLedger::new().with_account(ALICE, token, 10);

        // credit before debit in staging order still nets out
        let mut staged = StagedChanges::new();
        staged.delta(ALICE, token, 5).unwrap().delta(ALICE, token, -15).unwrap();
        staged.bump_nonce(ALICE, token).bump_nonce(ALICE, token);
        assert_eq!(staged.net(&ALICE, &token), -10);

        staged.commit(&mut ledger).unwrap();
        assert_eq!(ledger.balance(&ALICE, &token), 0);
        assert_eq!(ledger.nonce(&ALICE, &token), 2);
        assert_eq!(ledger.total(&token), 0);
    }

    #[test]
    fn test_staged_net_overflow() {
        let token = AssetId::for_ledger(&[9u8; 32]);
        let mut staged = StagedChanges::new();
        staged.delta(ALICE, token, -i128::MAX).unwrap();
        assert_eq!(
            staged.delta(ALICE, token, -i128::MAX).unwrap_err(),
            Error::BalanceOverflow(ALICE)
        );
        // the failed add leaves the net where it was
        assert_eq!(staged.net(&ALICE, &token), -i128::MAX);
    }
}
