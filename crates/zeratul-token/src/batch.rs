//! batch approval
//!
//! a batch is a forest of proposed balance changes. the approver walks it in
//! post-order (every subtree fully before the node that encloses it, siblings
//! left to right) and keeps a running sum of this token's deltas:
//!
//! ```text
//!          c            traversal: a, b, c, e, d
//!        /   \
//!       a     b         after each node touching this token:
//!          d              running sum <= 0
//!          |            after the last node:
//!          e              running sum == 0
//! ```
//!
//! a batch whose deltas net to zero but go positive somewhere along the way
//! would credit an account before the backing debit exists, so every prefix
//! of the traversal must be non-positive, not just the total.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{short_hex, Address, AssetId, Balance, Delta};

/// authorization an account demands for a given action
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthRequired {
    /// no restriction
    #[default]
    None,
    Either,
    Proof,
    Signature,
    Impossible,
}

/// requested change to an account's permissions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionUpdate {
    pub access: AuthRequired,
    pub receive: AuthRequired,
}

impl PermissionUpdate {
    /// the only update a token account may carry inside a batch
    pub fn is_neutral(&self) -> bool {
        self.access == AuthRequired::None && self.receive == AuthRequired::None
    }
}

/// one proposed balance change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub owner: Address,
    pub token_id: AssetId,
    pub amount: Delta,
    pub permissions: Option<PermissionUpdate>,
}

impl BalanceDelta {
    pub fn new(owner: Address, token_id: AssetId, amount: Delta) -> Self {
        Self {
            owner,
            token_id,
            amount,
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, update: PermissionUpdate) -> Self {
        self.permissions = Some(update);
        self
    }

    pub fn touches(&self, token_id: &AssetId) -> bool {
        self.token_id == *token_id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTree {
    pub delta: BalanceDelta,
    pub children: UpdateForest,
}

impl UpdateTree {
    pub fn leaf(delta: BalanceDelta) -> Self {
        Self {
            delta,
            children: UpdateForest::default(),
        }
    }

    pub fn with_children(delta: BalanceDelta, children: Vec<UpdateTree>) -> Self {
        Self {
            delta,
            children: UpdateForest(children),
        }
    }
}

/// ordered forest of balance changes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateForest(pub Vec<UpdateTree>);

impl UpdateForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// flat forest, one leaf per delta
    pub fn from_deltas(deltas: impl IntoIterator<Item = BalanceDelta>) -> Self {
        Self(deltas.into_iter().map(UpdateTree::leaf).collect())
    }

    pub fn push(&mut self, tree: UpdateTree) {
        self.0.push(tree);
    }

    /// total number of nodes
    pub fn len(&self) -> usize {
        self.iter_post_order().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// children before the parent that encloses them
    pub fn iter_post_order(&self) -> PostOrder<'_> {
        PostOrder {
            stack: self.0.iter().rev().map(|t| (t, false)).collect(),
        }
    }
}

/// non-recursive post-order walk over an [`UpdateForest`]
pub struct PostOrder<'a> {
    stack: Vec<(&'a UpdateTree, bool)>,
}

impl<'a> Iterator for PostOrder<'a> {
    type Item = &'a BalanceDelta;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((tree, expanded)) = self.stack.pop() {
            if expanded {
                return Some(&tree.delta);
            }
            self.stack.push((tree, true));
            self.stack
                .extend(tree.children.0.iter().rev().map(|c| (c, false)));
        }
        None
    }
}

/// what an approved batch touched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// nodes visited
    pub nodes: usize,
    /// nodes of this token
    pub touched: usize,
    /// sum of this token's credits
    pub volume: u128,
}

/// check a batch for this token
///
/// `circulation` is the account tracking total supply; it may not appear as
/// the owner of any node of this token.
pub fn approve(forest: &UpdateForest, token_id: &AssetId, circulation: &Address) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();
    let mut running: Delta = 0;

    for (node, delta) in forest.iter_post_order().enumerate() {
        summary.nodes += 1;
        if !delta.touches(token_id) {
            continue;
        }
        summary.touched += 1;

        if let Some(update) = &delta.permissions {
            if !update.is_neutral() {
                return Err(Error::PermissionChangeForbidden { node });
            }
        }
        if delta.owner == *circulation {
            return Err(Error::NoTransferFromCirculation { node: Some(node) });
        }

        // no account can gain or lose more than a balance holds
        if delta.amount.unsigned_abs() > Balance::MAX as u128 {
            return Err(Error::DeltaOutOfRange { node });
        }

        running = running
            .checked_add(delta.amount)
            .ok_or(Error::BalanceOverflow(delta.owner))?;
        if running > 0 {
            return Err(Error::FlashMintDetected { node });
        }
        if delta.amount > 0 {
            summary.volume = summary
                .volume
                .checked_add(delta.amount as u128)
                .ok_or(Error::BalanceOverflow(delta.owner))?;
        }

        debug!(node, owner = %short_hex(&delta.owner), amount = delta.amount, running, "batch node ok");
    }

    if running != 0 {
        return Err(Error::UnbalancedBatch { total: running });
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: AssetId = AssetId([7u8; 32]);
    const CIRCULATION: Address = [0xCC; 32];
    const ALICE: Address = [1u8; 32];
    const BOB: Address = [2u8; 32];
    const CAROL: Address = [3u8; 32];

    fn d(owner: Address, amount: Delta) -> BalanceDelta {
        BalanceDelta::new(owner, TOKEN, amount)
    }

    #[test]
    fn test_post_order() {
        // c(a, b), d(e)
        let forest = UpdateForest(vec![
            UpdateTree::with_children(
                d(CAROL, 3),
                vec![UpdateTree::leaf(d(ALICE, 1)), UpdateTree::leaf(d(BOB, 2))],
            ),
            UpdateTree::with_children(d(CAROL, 5), vec![UpdateTree::leaf(d(ALICE, 4))]),
        ]);
        let order: Vec<Delta> = forest.iter_post_order().map(|n| n.amount).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
        assert_eq!(forest.len(), 5);
    }

    #[test]
    fn test_debit_then_credit_accepted() {
        let forest = UpdateForest::from_deltas([d(ALICE, -100), d(BOB, 100)]);
        let summary = approve(&forest, &TOKEN, &CIRCULATION).unwrap();
        assert_eq!(summary.touched, 2);
        assert_eq!(summary.volume, 100);
    }

    #[test]
    fn test_credit_then_debit_is_flash_mint() {
        let forest = UpdateForest::from_deltas([d(BOB, 100), d(ALICE, -100)]);
        assert_eq!(
            approve(&forest, &TOKEN, &CIRCULATION),
            Err(Error::FlashMintDetected { node: 0 })
        );
    }

    #[test]
    fn test_child_credit_before_parent_debit() {
        // the parent's debit is visited after its child's credit
        let forest = UpdateForest(vec![UpdateTree::with_children(
            d(ALICE, -50),
            vec![UpdateTree::leaf(d(BOB, 50))],
        )]);
        assert_eq!(
            approve(&forest, &TOKEN, &CIRCULATION),
            Err(Error::FlashMintDetected { node: 0 })
        );

        // debit as an earlier sibling subtree is fine
        let forest = UpdateForest(vec![
            UpdateTree::leaf(d(ALICE, -50)),
            UpdateTree::with_children(d(BOB, 50), vec![]),
        ]);
        assert!(approve(&forest, &TOKEN, &CIRCULATION).is_ok());
    }

    #[test]
    fn test_unbalanced() {
        let forest = UpdateForest::from_deltas([d(ALICE, -100), d(BOB, 60)]);
        assert_eq!(
            approve(&forest, &TOKEN, &CIRCULATION),
            Err(Error::UnbalancedBatch { total: -40 })
        );
    }

    #[test]
    fn test_empty_batch_balanced() {
        let summary = approve(&UpdateForest::new(), &TOKEN, &CIRCULATION).unwrap();
        assert_eq!(summary, BatchSummary::default());
    }

    #[test]
    fn test_foreign_token_ignored() {
        let other = AssetId([8u8; 32]);
        let forest = UpdateForest::from_deltas([
            BalanceDelta::new(CIRCULATION, other, 1_000),
            d(ALICE, -1),
            BalanceDelta::new(BOB, other, 5).with_permissions(PermissionUpdate {
                access: AuthRequired::Impossible,
                receive: AuthRequired::Signature,
            }),
            d(BOB, 1),
        ]);
        let summary = approve(&forest, &TOKEN, &CIRCULATION).unwrap();
        assert_eq!(summary.nodes, 4);
        assert_eq!(summary.touched, 2);
    }

    #[test]
    fn test_permission_pinning() {
        let neutral = d(ALICE, -5).with_permissions(PermissionUpdate::default());
        let forest = UpdateForest::from_deltas([neutral, d(BOB, 5)]);
        assert!(approve(&forest, &TOKEN, &CIRCULATION).is_ok());

        let locked = d(BOB, 5).with_permissions(PermissionUpdate {
            access: AuthRequired::None,
            receive: AuthRequired::Impossible,
        });
        let forest = UpdateForest::from_deltas([d(ALICE, -5), locked]);
        assert_eq!(
            approve(&forest, &TOKEN, &CIRCULATION),
            Err(Error::PermissionChangeForbidden { node: 1 })
        );

        let proof_access = d(ALICE, -5).with_permissions(PermissionUpdate {
            access: AuthRequired::Proof,
            receive: AuthRequired::None,
        });
        let forest = UpdateForest::from_deltas([proof_access, d(BOB, 5)]);
        assert_eq!(
            approve(&forest, &TOKEN, &CIRCULATION),
            Err(Error::PermissionChangeForbidden { node: 0 })
        );
    }

    #[test]
    fn test_circulation_node_rejected() {
        let forest = UpdateForest::from_deltas([d(ALICE, -5), d(CIRCULATION, 5)]);
        assert_eq!(
            approve(&forest, &TOKEN, &CIRCULATION),
            Err(Error::NoTransferFromCirculation { node: Some(1) })
        );
    }

    #[test]
    fn test_oversized_delta_rejected() {
        // nets to zero with no positive prefix, but each node exceeds any balance
        let huge = i128::MAX;
        let forest = UpdateForest::from_deltas([
            d(ALICE, -huge),
            d(BOB, huge),
            d(ALICE, -huge),
            d(BOB, huge),
        ]);
        assert_eq!(
            approve(&forest, &TOKEN, &CIRCULATION),
            Err(Error::DeltaOutOfRange { node: 0 })
        );

        let just_over = Balance::MAX as Delta + 1;
        let forest = UpdateForest::from_deltas([d(ALICE, -1), d(BOB, 1), d(ALICE, -just_over)]);
        assert_eq!(
            approve(&forest, &TOKEN, &CIRCULATION),
            Err(Error::DeltaOutOfRange { node: 2 })
        );
    }

    #[test]
    fn test_large_volume_accepted() {
        let max = Balance::MAX as Delta;
        let forest = UpdateForest::from_deltas(
            (0..3).flat_map(|_| [d(ALICE, -max), d(BOB, max)]),
        );
        let summary = approve(&forest, &TOKEN, &CIRCULATION).unwrap();
        assert_eq!(summary.touched, 6);
        assert_eq!(summary.volume, 3 * Balance::MAX as u128);
    }
}
