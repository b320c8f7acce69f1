//! Proof artifact types.
//!
//! A block's proof is either **direct** (a signature over the block's own
//! composite hash) or **indirect** (a later block's signature plus the chain
//! of sibling hashes connecting this block's root to the signed root).
//! [`PendingProofRecord`] is the on-disk form flushed for crash recovery; it
//! carries everything needed to rebuild a pending block after a restart.

use crate::types::{Hash, Signature, Timestamp};
use serde::{Deserialize, Serialize};

/// A sibling hash on a Merkle path.
///
/// `is_first` marks siblings that precede the running hash (combine as
/// `combine(sibling, acc)`); otherwise the sibling follows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleSiblingHash {
    /// Whether the sibling is the first (left) operand of the combine.
    pub is_first: bool,
    /// The sibling hash value.
    pub hash: Hash,
}

impl MerkleSiblingHash {
    /// A sibling combined on the left of the running hash.
    #[inline]
    #[must_use]
    pub const fn first(hash: Hash) -> Self {
        Self { is_first: true, hash }
    }

    /// A sibling combined on the right of the running hash.
    #[inline]
    #[must_use]
    pub const fn second(hash: Hash) -> Self {
        Self { is_first: false, hash }
    }
}

/// One Merkle path of a [`StateProof`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    /// Timestamp context carried by the path, if any.
    pub timestamp_leaf: Option<Timestamp>,
    /// Sibling hashes, bottom-up.
    pub siblings: Vec<MerkleSiblingHash>,
    /// Index of the path this one terminates into; `None` for terminal paths.
    pub next_path_index: Option<u32>,
}

/// A state proof extending an older block's root through a later signed one.
///
/// Composed of exactly three paths: the signed block's timestamp context, the
/// sibling chain from the proven block's previous-block hash to the signed
/// root, and the trivial terminal path for the signed root itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProof {
    /// The proof's Merkle paths.
    pub paths: Vec<MerklePath>,
    /// Signature over the signed block's root.
    pub signature: Signature,
    /// Identifier of the signing scheme.
    pub scheme_id: u32,
}

/// A finished block proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProof {
    /// Number of the block being proven.
    pub block_number: u64,
    /// The previous block's root hash (composite-tree context).
    pub previous_block_root: Hash,
    /// The start-of-block state root (composite-tree context).
    pub start_of_block_state_root: Hash,
    /// The block signature. For indirect proofs this is the later signed
    /// block's signature.
    pub signature: Signature,
    /// Identifier of the signing scheme.
    pub scheme_id: u32,
    /// For indirect proofs: the sibling-hash chain from this block's
    /// previous-block hash to the signed block's root, oldest block first.
    /// Empty for direct proofs.
    pub sibling_hashes: Vec<MerkleSiblingHash>,
    /// For indirect proofs: the state proof through the signed block.
    pub state_proof: Option<StateProof>,
}

impl BlockProof {
    /// Whether the proof reuses a later block's signature.
    #[inline]
    #[must_use]
    pub fn is_indirect(&self) -> bool {
        !self.sibling_hashes.is_empty()
    }
}

/// Accumulates a block's proof context until a signature becomes available.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProofBuilder {
    /// Number of the block awaiting proof.
    pub block_number: u64,
    /// The previous block's root hash.
    pub previous_block_root: Hash,
    /// The start-of-block state root.
    pub start_of_block_state_root: Hash,
}

impl BlockProofBuilder {
    /// Start a builder with the context known at block close.
    #[inline]
    #[must_use]
    pub const fn new(
        block_number: u64,
        previous_block_root: Hash,
        start_of_block_state_root: Hash,
    ) -> Self {
        Self {
            block_number,
            previous_block_root,
            start_of_block_state_root,
        }
    }

    /// Finish as a direct proof: the signature covers this block's own hash.
    #[must_use]
    pub fn build_direct(self, signature: Signature, scheme_id: u32) -> BlockProof {
        BlockProof {
            block_number: self.block_number,
            previous_block_root: self.previous_block_root,
            start_of_block_state_root: self.start_of_block_state_root,
            signature,
            scheme_id,
            sibling_hashes: Vec::new(),
            state_proof: None,
        }
    }

    /// Finish as an indirect proof through a later signed block.
    #[must_use]
    pub fn build_indirect(
        self,
        signature: Signature,
        scheme_id: u32,
        sibling_hashes: Vec<MerkleSiblingHash>,
        state_proof: StateProof,
    ) -> BlockProof {
        BlockProof {
            block_number: self.block_number,
            previous_block_root: self.previous_block_root,
            start_of_block_state_root: self.start_of_block_state_root,
            signature,
            scheme_id,
            sibling_hashes,
            state_proof: Some(state_proof),
        }
    }
}

/// On-disk record of a block still awaiting its proof.
///
/// Flushed next to the block's item log before a controlled shutdown;
/// sufficient to reconstruct the pending block on restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingProofRecord {
    /// Block number.
    pub block_number: u64,
    /// The block's composite root hash.
    pub block_hash: Hash,
    /// The previous block's root hash.
    pub previous_block_hash: Hash,
    /// The start-of-block state root.
    pub start_of_block_state_root: Hash,
    /// The block's timestamp.
    pub block_timestamp: Timestamp,
    /// This block's sibling set for a later indirect proof.
    pub sibling_hashes: Vec<MerkleSiblingHash>,
}
