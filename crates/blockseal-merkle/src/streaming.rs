//! Incremental Merkle accumulator with `O(log n)` memory.
//!
//! The accumulator is the classic binary counter: each new leaf hash is
//! pushed onto a pending list, and completed sibling pairs are folded
//! eagerly, so after `n` leaves the list holds exactly `popcount(n)` subtree
//! roots (largest subtree first). The root can be computed at any point by
//! folding the pending entries right-to-left without mutating them.
//!
//! Finalization is one-way: the first [`StreamingTreeHasher::root_hash`]
//! call moves the hasher to its finalized state and later mutations fail
//! fast. `root_hash` itself stays idempotent.
//!
//! The intermediate state persists in a fixed binary layout: an 8-byte LE
//! leaf count, a 4-byte LE pending count, then the 48-byte pending hashes
//! with no other framing.

use crate::hash::{empty_tree_hash, hash_internal_node, hash_leaf};
use anyhow::{bail, Result};
use blockseal_core::{Hash, HASH_SIZE};
use std::io::{Read, Write};

/// Streaming Merkle tree hasher.
#[derive(Clone, Debug)]
pub struct StreamingTreeHasher {
    /// Pending subtree roots, largest subtree first.
    pending: Vec<Hash>,
    /// Number of leaves ingested so far.
    leaf_count: u64,
    /// Set by the first `root_hash` call; no further leaves afterwards.
    finalized: bool,
}

impl Default for StreamingTreeHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingTreeHasher {
    /// An empty accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
            leaf_count: 0,
            finalized: false,
        }
    }

    /// Resume from a persisted `(pending, leaf_count)` state.
    ///
    /// Fails if the pending count does not match `popcount(leaf_count)`.
    pub fn from_state(pending: Vec<Hash>, leaf_count: u64) -> Result<Self> {
        if pending.len() != leaf_count.count_ones() as usize {
            bail!(
                "corrupt hasher state: {} pending hashes for leaf count {} (expected {})",
                pending.len(),
                leaf_count,
                leaf_count.count_ones()
            );
        }
        Ok(Self {
            pending,
            leaf_count,
            finalized: false,
        })
    }

    /// Number of leaves ingested.
    #[inline]
    #[must_use]
    pub const fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// The pending subtree roots (largest subtree first).
    #[inline]
    #[must_use]
    pub fn intermediate_state(&self) -> &[Hash] {
        &self.pending
    }

    /// Hash `raw` as a leaf and ingest it.
    pub fn add_leaf(&mut self, raw: &[u8]) -> Result<()> {
        self.add_node_by_hash(hash_leaf(raw))
    }

    /// Ingest an already-hashed leaf.
    pub fn add_node_by_hash(&mut self, hash: Hash) -> Result<()> {
        if self.finalized {
            bail!("streaming hasher already finalized; no further leaves accepted");
        }
        self.pending.push(hash);
        // Binary-counter fold: every trailing 1-bit of the old count means a
        // completed sibling pair to collapse.
        let mut n = self.leaf_count;
        while n & 1 == 1 {
            // The two pops cannot fail: pending length tracks popcount.
            let Some(right) = self.pending.pop() else {
                bail!("pending list underflow")
            };
            let Some(left) = self.pending.pop() else {
                bail!("pending list underflow")
            };
            self.pending.push(hash_internal_node(&left, &right));
            n >>= 1;
        }
        self.leaf_count += 1;
        Ok(())
    }

    /// The root hash over everything ingested so far.
    ///
    /// Finalizes the hasher; idempotent, but `add_leaf` afterwards fails.
    pub fn root_hash(&mut self) -> Hash {
        self.finalized = true;
        let Some((last, rest)) = self.pending.split_last() else {
            return empty_tree_hash();
        };
        // Fold right-to-left; a lone entry is returned unchanged.
        let mut acc = *last;
        for h in rest.iter().rev() {
            acc = hash_internal_node(h, &acc);
        }
        acc
    }

    /// Write the intermediate state in the fixed binary layout.
    pub fn save<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&self.leaf_count.to_le_bytes())?;
        let count = u32::try_from(self.pending.len())?;
        w.write_all(&count.to_le_bytes())?;
        for h in &self.pending {
            w.write_all(h.as_bytes())?;
        }
        Ok(())
    }

    /// Load an intermediate state written by [`Self::save`].
    ///
    /// Rejects truncated input, trailing bytes, and a pending count that is
    /// inconsistent with the leaf count.
    pub fn load<R: Read>(mut r: R) -> Result<Self> {
        let mut count_buf = [0u8; 8];
        r.read_exact(&mut count_buf)
            .map_err(|e| anyhow::anyhow!("truncated hasher state (leaf count): {e}"))?;
        let leaf_count = u64::from_le_bytes(count_buf);

        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)
            .map_err(|e| anyhow::anyhow!("truncated hasher state (pending count): {e}"))?;
        let pending_len = u32::from_le_bytes(len_buf) as usize;

        let mut pending = Vec::with_capacity(pending_len);
        for i in 0..pending_len {
            let mut h = [0u8; HASH_SIZE];
            r.read_exact(&mut h)
                .map_err(|e| anyhow::anyhow!("truncated hasher state (hash {i}): {e}"))?;
            pending.push(Hash(h));
        }
        let mut trailing = [0u8; 1];
        if r.read(&mut trailing)? != 0 {
            bail!("trailing bytes after hasher state");
        }
        Self::from_state(pending, leaf_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_leaf;

    #[test]
    fn empty_tree_returns_the_constant() {
        let mut h = StreamingTreeHasher::new();
        assert_eq!(h.root_hash(), empty_tree_hash());
    }

    #[test]
    fn single_leaf_is_returned_unchanged() {
        let mut h = StreamingTreeHasher::new();
        h.add_leaf(b"only").unwrap();
        assert_eq!(h.root_hash(), hash_leaf(b"only"));
    }

    #[test]
    fn five_leaf_fold_shape() {
        // Documented example: NodeC = H(NodeA, NodeB); root = H(NodeC, L4).
        let leaves: Vec<Hash> = (0u8..5).map(|i| hash_leaf(&[i])).collect();
        let mut h = StreamingTreeHasher::new();
        for l in &leaves {
            h.add_node_by_hash(*l).unwrap();
        }
        let node_a = hash_internal_node(&leaves[0], &leaves[1]);
        let node_b = hash_internal_node(&leaves[2], &leaves[3]);
        let node_c = hash_internal_node(&node_a, &node_b);
        assert_eq!(h.root_hash(), hash_internal_node(&node_c, &leaves[4]));
    }

    #[test]
    fn no_leaves_after_finalization() {
        let mut h = StreamingTreeHasher::new();
        h.add_leaf(b"a").unwrap();
        let first = h.root_hash();
        // Idempotent re-read is fine...
        assert_eq!(h.root_hash(), first);
        // ...but mutation is not.
        assert!(h.add_leaf(b"b").is_err());
    }

    #[test]
    fn save_load_roundtrip() {
        let mut h = StreamingTreeHasher::new();
        for i in 0u32..11 {
            h.add_leaf(&i.to_le_bytes()).unwrap();
        }
        let mut buf = Vec::new();
        h.save(&mut buf).unwrap();
        let mut restored = StreamingTreeHasher::load(buf.as_slice()).unwrap();
        assert_eq!(restored.leaf_count(), h.leaf_count());
        assert_eq!(restored.root_hash(), h.root_hash());
    }

    #[test]
    fn load_rejects_truncation_and_trailing_garbage() {
        let mut h = StreamingTreeHasher::new();
        h.add_leaf(b"x").unwrap();
        let mut buf = Vec::new();
        h.save(&mut buf).unwrap();

        assert!(StreamingTreeHasher::load(&buf[..buf.len() - 1]).is_err());

        let mut long = buf.clone();
        long.push(0);
        assert!(StreamingTreeHasher::load(long.as_slice()).is_err());
    }

    #[test]
    fn from_state_enforces_popcount() {
        assert!(StreamingTreeHasher::from_state(vec![Hash::NULL], 2).is_err());
        assert!(StreamingTreeHasher::from_state(vec![Hash::NULL], 1).is_ok());
    }
}
