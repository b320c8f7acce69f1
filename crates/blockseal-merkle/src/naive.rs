//! Buffering reference hasher.
//!
//! Holds every leaf hash in memory, pads the count up to the next power of
//! two with a structural empty slot, and folds adjacent pairs level by level.
//! A pair whose right half is entirely padding promotes its left child
//! unchanged, which makes the result identical to the streaming fold (see
//! the five-leaf example in `streaming.rs`).
//!
//! Used exclusively to differential-test [`crate::StreamingTreeHasher`];
//! `root_hash` is deliberately one-shot.

use crate::hash::{empty_tree_hash, hash_internal_node};
use anyhow::{bail, Result};
use blockseal_core::Hash;

/// Reference Merkle hasher that buffers all leaves.
#[derive(Clone, Debug, Default)]
pub struct NaiveTreeHasher {
    leaves: Vec<Hash>,
    root_requested: bool,
}

impl NaiveTreeHasher {
    /// An empty hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            leaves: Vec::new(),
            root_requested: false,
        }
    }

    /// Ingest an already-hashed leaf (no re-prefixing).
    pub fn add_node_by_hash(&mut self, hash: Hash) -> Result<()> {
        if self.root_requested {
            bail!("root already requested; naive hasher accepts no further leaves");
        }
        self.leaves.push(hash);
        Ok(())
    }

    /// Number of leaves buffered.
    #[inline]
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Compute the root. One-shot: a second call fails.
    pub fn root_hash(&mut self) -> Result<Hash> {
        if self.root_requested {
            bail!("root already requested");
        }
        self.root_requested = true;

        if self.leaves.is_empty() {
            return Ok(empty_tree_hash());
        }

        // Pad to the next power of two; `None` marks padding slots.
        let mut level: Vec<Option<Hash>> = self.leaves.iter().copied().map(Some).collect();
        let padded = self.leaves.len().next_power_of_two();
        level.resize(padded, None);

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                next.push(match (pair[0], pair[1]) {
                    (Some(l), Some(r)) => Some(hash_internal_node(&l, &r)),
                    // Right half all padding: promote the left child.
                    (Some(l), None) => Some(l),
                    (None, None) => None,
                    (None, Some(_)) => bail!("padding preceding a real leaf"),
                });
            }
            level = next;
        }
        match level[0] {
            Some(root) => Ok(root),
            None => Ok(empty_tree_hash()),
        }
    }
}
