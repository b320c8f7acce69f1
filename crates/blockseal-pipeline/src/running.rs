//! Rolling output hashes and the trailing block-hash ring.
//!
//! [`RunningHashManager`] folds each transaction-result leaf hash into a
//! rolling hash and keeps the last four values; the `n-3` entry doubles as
//! the node's pseudo-random seed. [`BlockHashManager`] answers
//! "hash of block N" queries from a bounded ring of trailing block hashes
//! without storing full history.

use blockseal_core::Hash;
use blockseal_merkle::combine;
use std::collections::VecDeque;

/// Window of the last four output running hashes.
#[derive(Clone, Debug, Default)]
pub struct RunningHashManager {
    n_minus_3: Option<Hash>,
    n_minus_2: Option<Hash>,
    n_minus_1: Option<Hash>,
    current: Hash,
}

impl RunningHashManager {
    /// Prime the window from the trailing hashes persisted in the
    /// block-stream info record (oldest first, at most four).
    pub fn start_block(&mut self, trailing: &[Hash]) {
        let n = trailing.len();
        self.current = trailing.last().copied().unwrap_or(Hash::NULL);
        self.n_minus_1 = (n >= 2).then(|| trailing[n - 2]);
        self.n_minus_2 = (n >= 3).then(|| trailing[n - 3]);
        self.n_minus_3 = (n >= 4).then(|| trailing[n - 4]);
    }

    /// Fold the leaf hash of the next transaction result into the window.
    pub fn next_result_hash(&mut self, result_leaf_hash: &Hash) {
        self.n_minus_3 = self.n_minus_2.take();
        self.n_minus_2 = self.n_minus_1.take();
        self.n_minus_1 = Some(self.current);
        self.current = combine(&self.current, result_leaf_hash);
    }

    /// The present window entries, oldest first.
    #[must_use]
    pub fn latest_hashes(&self) -> Vec<Hash> {
        let mut out = Vec::with_capacity(4);
        out.extend(self.n_minus_3);
        out.extend(self.n_minus_2);
        out.extend(self.n_minus_1);
        out.push(self.current);
        out
    }

    /// The `n-3` rolling hash: the pseudo-random seed.
    ///
    /// Callers must drain in-flight items first so no two transactions ever
    /// observe the same seed.
    #[inline]
    #[must_use]
    pub const fn n_minus_3(&self) -> Option<Hash> {
        self.n_minus_3
    }
}

/// Bounded ring of trailing block hashes.
#[derive(Clone, Debug)]
pub struct BlockHashManager {
    ring: VecDeque<Hash>,
    max_hashes: usize,
    /// Number of the currently open block; the ring covers blocks
    /// `current - ring.len() .. current`.
    current_block_number: u64,
}

impl BlockHashManager {
    /// A ring bounded to `max_hashes` entries.
    #[must_use]
    pub fn new(max_hashes: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(max_hashes),
            max_hashes,
            current_block_number: 0,
        }
    }

    /// Prime the ring for a newly opened block: the persisted trailing
    /// hashes plus the previous block's hash, evicting the oldest entries
    /// past the bound.
    pub fn start_block(&mut self, trailing: &[Hash], prev_block_hash: Hash, block_number: u64) {
        self.ring.clear();
        self.ring.extend(trailing.iter().copied());
        self.append(prev_block_hash);
        self.current_block_number = block_number;
    }

    /// Append one block hash, evicting the oldest once the bound is reached.
    pub fn append(&mut self, hash: Hash) {
        while self.ring.len() >= self.max_hashes {
            self.ring.pop_front();
        }
        self.ring.push_back(hash);
    }

    /// The ring contents, oldest first.
    #[must_use]
    pub fn trailing_hashes(&self) -> Vec<Hash> {
        self.ring.iter().copied().collect()
    }

    /// Hash of block `block_number`, if it is still inside the window.
    ///
    /// The hash of the currently open block is never known.
    #[must_use]
    pub fn hash_of_block(&self, block_number: u64) -> Option<Hash> {
        if self.current_block_number == 0 || block_number >= self.current_block_number {
            return None;
        }
        let newest = self.current_block_number - 1;
        let back = (newest - block_number) as usize;
        if back >= self.ring.len() {
            return None;
        }
        self.ring.get(self.ring.len() - 1 - back).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockseal_core::HASH_SIZE;

    fn h(b: u8) -> Hash {
        Hash([b; HASH_SIZE])
    }

    #[test]
    fn running_window_shifts_and_folds() {
        let mut rh = RunningHashManager::default();
        rh.start_block(&[]);
        assert_eq!(rh.n_minus_3(), None);

        for i in 1..=2 {
            rh.next_result_hash(&h(i));
            assert_eq!(rh.n_minus_3(), None, "seed too early after {i} results");
        }
        rh.next_result_hash(&h(3));
        // After three shifts the n-3 slot holds the pre-first-result hash.
        assert_eq!(rh.n_minus_3(), Some(Hash::NULL));
        assert_eq!(rh.latest_hashes().len(), 4);

        let before = rh.n_minus_3();
        rh.next_result_hash(&h(4));
        assert_ne!(rh.n_minus_3(), before, "seed advances with every result");
    }

    #[test]
    fn running_window_resumes_from_trailing() {
        let mut rh = RunningHashManager::default();
        rh.start_block(&[h(1), h(2), h(3), h(4)]);
        assert_eq!(rh.n_minus_3(), Some(h(1)));
        assert_eq!(rh.latest_hashes(), vec![h(1), h(2), h(3), h(4)]);

        let mut partial = RunningHashManager::default();
        partial.start_block(&[h(7), h(8)]);
        assert_eq!(partial.n_minus_3(), None);
        assert_eq!(partial.latest_hashes(), vec![h(7), h(8)]);
    }

    #[test]
    fn ring_evicts_oldest_and_stays_bounded() {
        let max = 4;
        let mut ring = BlockHashManager::new(max);
        ring.start_block(&[], h(0), 1);
        for i in 1u8..20 {
            ring.append(h(i));
            let bytes: usize = ring.trailing_hashes().len() * HASH_SIZE;
            assert!(bytes <= max * HASH_SIZE);
        }
        // Oldest entries are gone; the newest survive in order.
        assert_eq!(ring.trailing_hashes(), vec![h(16), h(17), h(18), h(19)]);
    }

    #[test]
    fn hash_of_block_window_queries() {
        let mut ring = BlockHashManager::new(8);
        // Open block 4: trailing holds blocks 1..=2, prev is block 3.
        ring.start_block(&[h(1), h(2)], h(3), 4);
        assert_eq!(ring.hash_of_block(3), Some(h(3)));
        assert_eq!(ring.hash_of_block(2), Some(h(2)));
        assert_eq!(ring.hash_of_block(1), Some(h(1)));
        assert_eq!(ring.hash_of_block(0), None, "outside the window");
        assert_eq!(ring.hash_of_block(4), None, "open block is unknown");
    }
}
