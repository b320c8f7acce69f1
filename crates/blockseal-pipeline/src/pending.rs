//! The pending block queue and proof finisher.
//!
//! Closed blocks wait here, oldest first, until a signature arrives. A
//! signature over the Jth queued block's hash finishes blocks 1..=J in
//! number order: the matching block gets a direct proof, every earlier block
//! an indirect proof reusing the same signature plus the chain of sibling
//! hashes bridging its root to the signed one. The entire finish operation
//! runs under one lock, so concurrent signature callbacks can never
//! interleave partial proof writes or reorder finalization.

use crate::state_proof::generate_state_proof;
use crate::writer::BlockItemWriter;
use anyhow::{bail, Result};
use blockseal_core::{
    BlockItem, BlockProofBuilder, Hash, MerkleSiblingHash, PendingProofRecord, Signature,
    Timestamp,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// One closed block awaiting its proof.
pub struct PendingBlock {
    /// Block number (unique, monotonic).
    pub number: u64,
    /// The block's composite root hash.
    pub block_hash: Hash,
    /// The previous block's root hash.
    pub previous_block_hash: Hash,
    /// The block's timestamp.
    pub block_timestamp: Timestamp,
    /// Accumulated proof context.
    pub proof_builder: BlockProofBuilder,
    /// The block's durable writer, still open until the proof is appended.
    pub writer: Box<dyn BlockItemWriter>,
    /// Item-log path when the block was recovered from disk after a restart.
    pub contents_path: Option<PathBuf>,
    /// This block's sibling set, consumed by later indirect proofs.
    pub sibling_hashes: Vec<MerkleSiblingHash>,
}

impl PendingBlock {
    /// The partial-proof record persisted for crash recovery.
    #[must_use]
    pub fn pending_record(&self) -> PendingProofRecord {
        PendingProofRecord {
            block_number: self.number,
            block_hash: self.block_hash,
            previous_block_hash: self.previous_block_hash,
            start_of_block_state_root: self.proof_builder.start_of_block_state_root,
            block_timestamp: self.block_timestamp,
            sibling_hashes: self.sibling_hashes.clone(),
        }
    }
}

/// FIFO queue of blocks awaiting proof, plus the proof finisher.
///
/// Invariant: block numbers strictly increase from head to tail, and a block
/// leaves the queue only after the block in front of it has left.
#[derive(Default)]
pub struct PendingBlockQueue {
    inner: Mutex<VecDeque<PendingBlock>>,
}

impl PendingBlockQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks still pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no blocks are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// The queued block numbers, oldest first.
    #[must_use]
    pub fn numbers(&self) -> Vec<u64> {
        self.inner.lock().iter().map(|b| b.number).collect()
    }

    /// Append a newly closed block. Numbers must strictly increase.
    pub fn enqueue(&self, block: PendingBlock) -> Result<()> {
        let mut q = self.inner.lock();
        if let Some(tail) = q.back() {
            if block.number <= tail.number {
                bail!(
                    "pending block {} enqueued after block {}",
                    block.number,
                    tail.number
                );
            }
        }
        q.push_back(block);
        Ok(())
    }

    /// Flush every queued block's partial-proof record to its writer.
    ///
    /// Used on the freeze round, when signing resumes only after restart.
    pub fn flush_all_pending(&self) {
        let mut q = self.inner.lock();
        for block in q.iter_mut() {
            let record = block.pending_record();
            if let Err(e) = block.writer.flush_pending_block(&record) {
                error!(block = block.number, error = %e, "failed to flush pending block");
            }
        }
    }

    /// Log every block whose proof will never complete in this process.
    pub fn log_incomplete(&self) {
        for number in self.numbers() {
            error!(block = number, "skipping incomplete block proof");
        }
    }

    /// Finish proofs with a signature over `signed_hash`.
    ///
    /// Scans from the head for the block whose composite hash matches. Every
    /// block from the head up to and including the match is dequeued in
    /// order and finished: the match directly, the rest indirectly with
    /// their accumulated sibling chains. A hash not present in the queue is
    /// a logged no-op (stale or duplicate signature). Returns the number of
    /// blocks finished.
    pub fn finish_proof_with_signature(
        &self,
        signed_hash: &Hash,
        signature: &Signature,
        scheme_id: u32,
    ) -> Result<usize> {
        let mut q = self.inner.lock();

        let Some(signed_idx) = q.iter().position(|b| b.block_hash == *signed_hash) else {
            debug!(hash = %signed_hash, "ignoring signature on already proven block hash");
            return Ok(0);
        };
        let signed_number = q[signed_idx].number;
        let signed_timestamp = q[signed_idx].block_timestamp;

        // Sibling sets of every block being drained, needed to build the
        // indirect chains after the blocks themselves are moved out.
        let sibling_sets: Vec<Vec<MerkleSiblingHash>> = q
            .iter()
            .take(signed_idx + 1)
            .map(|b| b.sibling_hashes.clone())
            .collect();

        // The queue lock is held until every drained block's proof is
        // written, keeping proof writes serialized and in block order even
        // when signatures for several blocks arrive concurrently.
        let drained: Vec<PendingBlock> = q.drain(..=signed_idx).collect();

        let mut finished = 0usize;
        for (i, mut block) in drained.into_iter().enumerate() {
            let proof = if block.number == signed_number {
                info!(block = block.number, "finishing direct block proof");
                block
                    .proof_builder
                    .clone()
                    .build_direct(signature.clone(), scheme_id)
            } else {
                info!(
                    block = block.number,
                    via = signed_number,
                    "finishing indirect block proof"
                );
                let chain: Vec<MerkleSiblingHash> =
                    sibling_sets[i..].iter().flatten().copied().collect();
                let state_proof = generate_state_proof(
                    chain.clone(),
                    signature.clone(),
                    scheme_id,
                    signed_timestamp,
                );
                block.proof_builder.clone().build_indirect(
                    signature.clone(),
                    scheme_id,
                    chain,
                    state_proof,
                )
            };

            // Best-effort from here: a write failure loses this block's
            // proof but must not leave later blocks unfinished.
            let item = BlockItem::BlockProof(proof);
            match item.to_canonical_bytes() {
                Ok(bytes) => {
                    if let Err(e) = block.writer.write_item(&bytes) {
                        error!(block = block.number, error = %e, "failed to write block proof");
                    } else if let Err(e) = block.writer.close_complete_block() {
                        error!(block = block.number, error = %e, "failed to seal block");
                    } else {
                        finished += 1;
                    }
                }
                Err(e) => {
                    warn!(block = block.number, error = %e, "failed to serialize block proof");
                }
            }
        }
        Ok(finished)
    }
}
