//! sparse merkle map
//!
//! authenticated `u64 -> Hash` map with a single root commitment.
//! the whole key space is a complete binary tree of fixed depth; absent keys
//! are empty leaves, so every map state has exactly one root.
//!
//! ```text
//!                    root
//!                /          \
//!            n(1,0)        empty[d-1]
//!           /      \
//!       leaf(k0)  leaf(k1)   ...   (2^depth leaves, almost all empty)
//! ```
//!
//! the map is meant to be held off-chain by callers while only the root lives
//! in canonical state. a replica is trusted only after its root has been
//! compared against the canonical one.

use std::collections::BTreeMap;

use thiserror::Error;

pub type Hash = [u8; 32];

/// depth used when callers don't pick one (full u64 key space)
pub const DEFAULT_DEPTH: u8 = 64;

/// domain separator for leaf hashes
pub const LEAF_DOMAIN: &[u8] = b"zeratul.smt.leaf.v1";
/// domain separator for interior nodes
pub const NODE_DOMAIN: &[u8] = b"zeratul.smt.node.v1";

/// hash of an empty leaf
pub const EMPTY_LEAF: Hash = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmtError {
    #[error("depth {0} not in 1..=64")]
    InvalidDepth(u8),

    #[error("key {key} does not fit in a tree of depth {depth}")]
    KeyOutOfRange { key: u64, depth: u8 },
}

pub type Result<T> = std::result::Result<T, SmtError>;

pub fn hash_leaf(key: u64, value: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(LEAF_DOMAIN);
    hasher.update(&key.to_le_bytes());
    hasher.update(value);
    *hasher.finalize().as_bytes()
}

pub fn hash_node(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(NODE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// roots of empty subtrees, indexed by height (0 = leaf)
pub fn empty_hashes(depth: u8) -> Vec<Hash> {
    let mut out = Vec::with_capacity(depth as usize + 1);
    out.push(EMPTY_LEAF);
    for level in 0..depth as usize {
        let below = out[level];
        out.push(hash_node(&below, &below));
    }
    out
}

struct DepthCheck<const DEPTH: u8>;

impl<const DEPTH: u8> DepthCheck<DEPTH> {
    const VALID: () = assert!(DEPTH >= 1 && DEPTH <= 64, "depth not in 1..=64");
}

/// authenticated sparse map
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SparseMerkleMap {
    depth: u8,
    leaves: BTreeMap<u64, Hash>,
}

impl SparseMerkleMap {
    /// empty map over keys `0..2^depth`
    pub fn new(depth: u8) -> Result<Self> {
        if depth == 0 || depth > 64 {
            return Err(SmtError::InvalidDepth(depth));
        }
        Ok(Self {
            depth,
            leaves: BTreeMap::new(),
        })
    }

    /// empty map with the depth fixed at compile time
    ///
    /// an out-of-range `DEPTH` fails the build instead of returning an error.
    pub fn with_depth<const DEPTH: u8>() -> Self {
        let () = DepthCheck::<DEPTH>::VALID;
        Self {
            depth: DEPTH,
            leaves: BTreeMap::new(),
        }
    }

    /// root of the map with no entries at the given depth
    pub fn empty_root(depth: u8) -> Result<Hash> {
        Ok(Self::new(depth)?.root())
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn get(&self, key: u64) -> Option<Hash> {
        self.leaves.get(&key).copied()
    }

    /// insert or overwrite, returns the new root
    pub fn set(&mut self, key: u64, value: Hash) -> Result<Hash> {
        self.check_key(key)?;
        self.leaves.insert(key, value);
        Ok(self.root())
    }

    /// drop an entry, returns the new root
    pub fn remove(&mut self, key: u64) -> Result<Hash> {
        self.check_key(key)?;
        self.leaves.remove(&key);
        Ok(self.root())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Hash)> {
        self.leaves.iter().map(|(k, v)| (*k, v))
    }

    /// current root commitment
    pub fn root(&self) -> Hash {
        let empties = empty_hashes(self.depth);
        let mut level = self.leaf_level();

        for height in 0..self.depth as usize {
            let mut next = BTreeMap::new();
            for (&index, hash) in &level {
                let parent = index >> 1;
                // odd child whose even sibling was already folded in
                if next.contains_key(&parent) {
                    continue;
                }
                let (left, right) = if index & 1 == 0 {
                    let right = level.get(&(index | 1)).copied().unwrap_or(empties[height]);
                    (*hash, right)
                } else {
                    (empties[height], *hash)
                };
                next.insert(parent, hash_node(&left, &right));
            }
            level = next;
        }

        level.get(&0).copied().unwrap_or(empties[self.depth as usize])
    }

    /// inclusion (or exclusion) witness for `key`
    pub fn witness(&self, key: u64) -> Result<MerkleWitness> {
        self.check_key(key)?;

        let empties = empty_hashes(self.depth);
        let mut level = self.leaf_level();
        let mut siblings = Vec::with_capacity(self.depth as usize);
        let mut index = key;

        for height in 0..self.depth as usize {
            siblings.push(level.get(&(index ^ 1)).copied().unwrap_or(empties[height]));

            let mut next = BTreeMap::new();
            for (&i, hash) in &level {
                let parent = i >> 1;
                if next.contains_key(&parent) {
                    continue;
                }
                let (left, right) = if i & 1 == 0 {
                    (*hash, level.get(&(i | 1)).copied().unwrap_or(empties[height]))
                } else {
                    (empties[height], *hash)
                };
                next.insert(parent, hash_node(&left, &right));
            }
            level = next;
            index >>= 1;
        }

        Ok(MerkleWitness { key, siblings })
    }

    fn leaf_level(&self) -> BTreeMap<u64, Hash> {
        self.leaves
            .iter()
            .map(|(k, v)| (*k, hash_leaf(*k, v)))
            .collect()
    }

    fn check_key(&self, key: u64) -> Result<()> {
        if self.depth < 64 && key >> self.depth != 0 {
            return Err(SmtError::KeyOutOfRange {
                key,
                depth: self.depth,
            });
        }
        Ok(())
    }
}

impl Default for SparseMerkleMap {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            leaves: BTreeMap::new(),
        }
    }
}

/// merkle path for one key
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MerkleWitness {
    pub key: u64,
    /// sibling hashes from leaf to root
    pub siblings: Vec<Hash>,
}

impl MerkleWitness {
    /// root implied by this path with `value` at the leaf (`None` = empty)
    pub fn compute_root(&self, value: Option<&Hash>) -> Hash {
        let mut current = match value {
            Some(v) => hash_leaf(self.key, v),
            None => EMPTY_LEAF,
        };
        let mut pos = self.key;

        for sibling in &self.siblings {
            current = if pos & 1 == 0 {
                hash_node(&current, sibling)
            } else {
                hash_node(sibling, &current)
            };
            pos >>= 1;
        }

        current
    }

    pub fn verify(&self, value: Option<&Hash>, root: &Hash) -> bool {
        self.compute_root(value) == *root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_root_is_stable() {
        let a = SparseMerkleMap::new(16).unwrap();
        let b = SparseMerkleMap::new(16).unwrap();
        assert_eq!(a.root(), b.root());
        assert_eq!(a.root(), empty_hashes(16)[16]);

        // different depth, different root
        assert_ne!(a.root(), SparseMerkleMap::empty_root(17).unwrap());
    }

    #[test]
    fn test_set_then_get() {
        let mut map = SparseMerkleMap::default();
        let before = map.root();

        let root = map.set(3, [7u8; 32]).unwrap();
        assert_eq!(map.get(3), Some([7u8; 32]));
        assert_eq!(map.get(4), None);
        assert_eq!(root, map.root());
        assert_ne!(root, before);
    }

    #[test]
    fn test_overwrite_changes_root() {
        let mut map = SparseMerkleMap::new(8).unwrap();
        let r1 = map.set(1, [1u8; 32]).unwrap();
        let r2 = map.set(1, [2u8; 32]).unwrap();
        assert_ne!(r1, r2);

        // writing the old value back restores the old root
        let r3 = map.set(1, [1u8; 32]).unwrap();
        assert_eq!(r1, r3);
    }

    #[test]
    fn test_remove_restores_empty_root() {
        let mut map = SparseMerkleMap::new(8).unwrap();
        let empty = map.root();
        map.set(5, [9u8; 32]).unwrap();
        assert_eq!(map.remove(5).unwrap(), empty);
        assert!(map.is_empty());
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let mut a = SparseMerkleMap::default();
        let mut b = SparseMerkleMap::default();
        a.set(1, [1u8; 32]).unwrap();
        a.set(4, [4u8; 32]).unwrap();
        b.set(4, [4u8; 32]).unwrap();
        b.set(1, [1u8; 32]).unwrap();
        assert_eq!(a.root(), b.root());
        assert!(a.iter().eq(b.iter()));
        assert_eq!(a.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    fn test_key_out_of_range() {
        let mut map = SparseMerkleMap::new(4).unwrap();
        assert_eq!(
            map.set(16, [0u8; 32]),
            Err(SmtError::KeyOutOfRange { key: 16, depth: 4 })
        );
        assert!(map.set(15, [0u8; 32]).is_ok());
    }

    #[test]
    fn test_const_depth_matches_checked() {
        let fixed = SparseMerkleMap::with_depth::<8>();
        assert_eq!(fixed, SparseMerkleMap::new(8).unwrap());
        assert_eq!(fixed.depth(), 8);
    }

    #[test]
    fn test_invalid_depth() {
        assert_eq!(SparseMerkleMap::new(0), Err(SmtError::InvalidDepth(0)));
        assert_eq!(SparseMerkleMap::new(65), Err(SmtError::InvalidDepth(65)));
    }

    #[test]
    fn test_witness_membership() {
        let mut map = SparseMerkleMap::default();
        map.set(1, [1u8; 32]).unwrap();
        map.set(2, [2u8; 32]).unwrap();
        map.set(u64::MAX, [3u8; 32]).unwrap();
        let root = map.root();

        let w = map.witness(2).unwrap();
        assert_eq!(w.siblings.len(), 64);
        assert!(w.verify(Some(&[2u8; 32]), &root));
        assert!(!w.verify(Some(&[9u8; 32]), &root));
        assert!(!w.verify(None, &root));

        let w = map.witness(u64::MAX).unwrap();
        assert!(w.verify(Some(&[3u8; 32]), &root));
    }

    #[test]
    fn test_witness_non_membership() {
        let mut map = SparseMerkleMap::new(8).unwrap();
        map.set(10, [1u8; 32]).unwrap();
        let root = map.root();

        let w = map.witness(11).unwrap();
        assert!(w.verify(None, &root));
        assert!(!w.verify(Some(&[0u8; 32]), &root));
    }

    #[test]
    fn test_replica_tamper_detected() {
        let mut canonical = SparseMerkleMap::default();
        canonical.set(1, [0xAA; 32]).unwrap();
        let root = canonical.root();

        let mut replica = canonical.clone();
        assert_eq!(replica.root(), root);
        replica.set(1, [0xBB; 32]).unwrap();
        assert_ne!(replica.root(), root);
    }

    proptest! {
        #[test]
        fn prop_witness_matches_root(
            entries in proptest::collection::btree_map(0u64..1024, any::<[u8; 32]>(), 0..16),
            key in 0u64..1024,
        ) {
            let mut map = SparseMerkleMap::new(10).unwrap();
            for (k, v) in &entries {
                map.set(*k, *v).unwrap();
            }
            let root = map.root();
            let w = map.witness(key).unwrap();
            prop_assert!(w.verify(entries.get(&key), &root));
        }
    }
}
