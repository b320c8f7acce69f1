//! State proofs and partial Merkle paths.
//!
//! An indirectly-proven block's state proof extends its root to a later,
//! directly signed block. It is composed of exactly three paths:
//!
//! 1. the signed block's timestamp context, terminating at (3);
//! 2. the sibling chain from the proven block's previous-block hash through
//!    every intervening unsigned block's sibling set plus the signed block's
//!    set, terminating at (3);
//! 3. the trivial terminal path standing for the signed block's root.
//!
//! A leaf's own Merkle path (for example a single ledger-state entry) can be
//! concatenated with [`partial_state_path`] to reach a signed block root,
//! proving state that existed at an earlier, unsigned block.

use anyhow::{ensure, Result};
use blockseal_core::{Hash, MerklePath, MerkleSiblingHash, Signature, StateProof, Timestamp};
use blockseal_merkle::combine;

/// Number of Merkle paths in every state proof.
pub const MERKLE_PATH_COUNT: usize = 3;
/// Index of the chain path inside a state proof.
pub const CHAIN_PATH_INDEX: usize = 1;
/// Index of the terminal path inside a state proof.
pub const TERMINAL_PATH_INDEX: u32 = 2;
/// Number of sibling hashes each unsigned block contributes to a chain.
pub const SIBLINGS_PER_BLOCK: usize = 3;

/// Build the state proof for one unsigned block.
///
/// `chain` must hold the sibling sets of the proven block and of every later
/// pending block up to and including the signed one, oldest block first.
#[must_use]
pub fn generate_state_proof(
    chain: Vec<MerkleSiblingHash>,
    signature: Signature,
    scheme_id: u32,
    signed_block_timestamp: Timestamp,
) -> StateProof {
    let timestamp_path = MerklePath {
        timestamp_leaf: Some(signed_block_timestamp),
        siblings: Vec::new(),
        next_path_index: Some(TERMINAL_PATH_INDEX),
    };
    let chain_path = MerklePath {
        timestamp_leaf: None,
        siblings: chain,
        next_path_index: Some(TERMINAL_PATH_INDEX),
    };
    let terminal_path = MerklePath::default();
    StateProof {
        paths: vec![timestamp_path, chain_path, terminal_path],
        signature,
        scheme_id,
    }
}

/// The partial path from a signed block's start-of-block state hash up to
/// its root.
///
/// Takes the signed block's previous-block hash and its three-sibling set;
/// the previous-block hash becomes the path's left-hand first sibling, and
/// the set's upper two siblings complete the climb. A ledger-state leaf path
/// terminating at the start-of-block state hash composes with this path to
/// reach the signed root.
pub fn partial_state_path(
    previous_block_hash: Hash,
    sibling_hashes: &[MerkleSiblingHash],
) -> Result<MerklePath> {
    ensure!(
        sibling_hashes.len() == SIBLINGS_PER_BLOCK,
        "expected {SIBLINGS_PER_BLOCK} sibling hashes, got {}",
        sibling_hashes.len()
    );
    Ok(MerklePath {
        timestamp_leaf: None,
        siblings: vec![
            MerkleSiblingHash::first(previous_block_hash),
            sibling_hashes[1],
            sibling_hashes[2],
        ],
        next_path_index: Some(TERMINAL_PATH_INDEX),
    })
}

/// Fold a starting hash through a path's siblings.
#[must_use]
pub fn fold_path(start: Hash, path: &MerklePath) -> Hash {
    let mut acc = start;
    for sibling in &path.siblings {
        acc = if sibling.is_first {
            combine(&sibling.hash, &acc)
        } else {
            combine(&acc, &sibling.hash)
        };
    }
    acc
}
