//! The block assembly pipeline.
//!
//! One [`BlockStreamPipeline`] owns the whole production path for a node:
//! per-round block opening, item routing into the five subtree hashers,
//! block closing with the composite depth-3 root computation, pending-proof
//! tracking, asynchronous signature submission, and fatal-shutdown
//! handling. Per-block mutable state (the hashers, running-hash window, and
//! the open writer) lives in one value owned exclusively by the pipeline for
//! the lifetime of a block and replaced — never mutated across blocks — at
//! block boundaries.

use crate::completion::Completion;
use crate::pending::{PendingBlock, PendingBlockQueue};
use crate::recovery::{find_first_contiguous_pending, load_contiguous_pending_records};
use crate::running::BlockHashManager;
use crate::signer::BlockHashSigner;
use crate::worker::{AssemblyShared, ItemWorker};
use crate::writer::{BlockItemWriter, FileBlockWriter};
use anyhow::{bail, Context, Result};
use blockseal_core::io::to_cbor;
use blockseal_core::{
    classify_pending_work, BlockClosePolicy, BlockHeader, BlockItem, BlockProofBuilder,
    BlockStreamInfo, Hash, MerkleSiblingHash, PendingWork, PipelineOptions, RoundInfo,
    StateChange, StateChanges, Timestamp, BLOCK_STREAM_INFO_STATE_ID,
};
use blockseal_merkle::{combine, StreamingTreeHasher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/* ------------------------------ state store -------------------------------- */

/// Access to the ledger-state singleton holding the block-stream record.
///
/// The real storage layer is an external collaborator; this trait is the
/// only surface the pipeline needs from it.
pub trait StateStore: Send + Sync {
    /// The most recently committed record, if any.
    fn block_stream_info(&self) -> Option<BlockStreamInfo>;
    /// Commit a new record.
    fn put_block_stream_info(&self, info: &BlockStreamInfo);
}

/// Trivial in-memory [`StateStore`] for tools and tests.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Option<BlockStreamInfo>>,
}

impl InMemoryStateStore {
    /// An empty store (genesis).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn block_stream_info(&self) -> Option<BlockStreamInfo> {
        self.inner.lock().clone()
    }

    fn put_block_stream_info(&self, info: &BlockStreamInfo) {
        *self.inner.lock() = Some(info.clone());
    }
}

/* --------------------------- composite root -------------------------------- */

/// A block's composite root hash plus the sibling hashes a later indirect
/// proof needs to climb from this block's previous-block hash to its root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRootComputation {
    /// The composite block hash.
    pub root: Hash,
    /// Right-hand siblings on the previous-block hash's path, bottom-up.
    pub sibling_hashes: [MerkleSiblingHash; 3],
}

/// Combine the five subtree roots plus block context into the composite
/// block hash via the fixed depth-3 tree.
///
/// Every input is already a hash; the joins use the raw no-prefix
/// [`combine`], never the domain-separated internal-node hashing.
#[must_use]
pub fn combine_block_root(
    previous_block_hash: &Hash,
    start_of_block_state_hash: &Hash,
    consensus_header_root: &Hash,
    input_root: &Hash,
    output_root: &Hash,
    state_changes_root: &Hash,
    trace_data_root: &Hash,
) -> BlockRootComputation {
    let depth2_0 = combine(previous_block_hash, start_of_block_state_hash);
    let depth2_1 = combine(consensus_header_root, input_root);
    let depth2_2 = combine(output_root, state_changes_root);
    let depth2_3 = combine(trace_data_root, &Hash::NULL);

    let depth1_0 = combine(&depth2_0, &depth2_1);
    let depth1_1 = combine(&depth2_2, &depth2_3);

    let root = combine(&depth1_0, &depth1_1);

    BlockRootComputation {
        root,
        sibling_hashes: [
            MerkleSiblingHash::second(*start_of_block_state_hash),
            MerkleSiblingHash::second(depth2_1),
            MerkleSiblingHash::second(depth1_1),
        ],
    }
}

/* ------------------------------- pipeline ---------------------------------- */

/// Supplies a fresh durable writer for each block.
pub type WriterSupplier = Box<dyn FnMut() -> Result<Box<dyn BlockItemWriter>> + Send>;

/// The end-of-round state hash the pipeline should treat as already
/// available when it starts (the hash of the state the node booted from).
pub struct InitialStateHash {
    /// Round number the hash belongs to.
    pub round: u64,
    /// The hash itself, possibly still being computed.
    pub hash: Completion<Hash>,
}

/// The block-stream production pipeline.
pub struct BlockStreamPipeline {
    opts: PipelineOptions,
    signer: Arc<dyn BlockHashSigner>,
    writer_supplier: WriterSupplier,
    store: Arc<dyn StateStore>,
    recovery_dir: Option<PathBuf>,

    worker: ItemWorker,
    shared: Arc<Mutex<AssemblyShared>>,
    pending: Arc<PendingBlockQueue>,
    block_hash_manager: BlockHashManager,

    state_hashes: Mutex<HashMap<u64, Completion<Hash>>>,
    fatal_requested: AtomicBool,
    fatal_done: Completion<()>,

    last_block_hash: Option<Hash>,
    last_round_of_prev_block: u64,
    block_number: u64,
    block_timestamp: Timestamp,
    consensus_time_current_round: Timestamp,
    last_used_time: Timestamp,
    block_open: bool,
    pending_work: PendingWork,
    boundary_changes: Vec<StateChange>,
    checked_for_pending_blocks: bool,
}

impl BlockStreamPipeline {
    /// Build a pipeline.
    ///
    /// `recovery_dir`, when set, points at the block directory to scan for
    /// pending blocks left behind by a controlled shutdown; the scan runs
    /// once, when the first block opens.
    pub fn new(
        opts: PipelineOptions,
        signer: Arc<dyn BlockHashSigner>,
        writer_supplier: WriterSupplier,
        store: Arc<dyn StateStore>,
        initial_state_hash: InitialStateHash,
        recovery_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let shared = Arc::new(Mutex::new(AssemblyShared::new()));
        let worker = ItemWorker::new(opts.hasher_threads, Arc::clone(&shared))?;
        let mut state_hashes = HashMap::new();
        state_hashes.insert(initial_state_hash.round, initial_state_hash.hash);
        let trailing = opts.trailing_block_hashes;
        Ok(Self {
            opts,
            signer,
            writer_supplier,
            store,
            recovery_dir,
            worker,
            shared,
            pending: Arc::new(PendingBlockQueue::new()),
            block_hash_manager: BlockHashManager::new(trailing),
            state_hashes: Mutex::new(state_hashes),
            fatal_requested: AtomicBool::new(false),
            fatal_done: Completion::new(),
            last_block_hash: None,
            last_round_of_prev_block: initial_state_hash.round,
            block_number: 0,
            block_timestamp: Timestamp::EPOCH,
            consensus_time_current_round: Timestamp::EPOCH,
            last_used_time: Timestamp::EPOCH,
            block_open: false,
            pending_work: PendingWork::None,
            boundary_changes: Vec::new(),
            checked_for_pending_blocks: false,
        })
    }

    /// Initialize the last-block hash before the first round.
    ///
    /// With `None`, the hash is reconstructed from the committed
    /// block-stream record (genesis yields the all-zero hash). Must be
    /// called before [`Self::start_round`].
    pub fn init(&mut self, last_block_hash: Option<Hash>) -> Result<()> {
        let effective = match last_block_hash {
            Some(hash) => hash,
            None => match self.store.block_stream_info() {
                Some(info) => effective_last_block_hash(&info)?,
                None => Hash::NULL,
            },
        };
        info!(hash = %effective, "initialized block stream from last block hash");
        self.last_block_hash = Some(effective);
        Ok(())
    }

    /// Begin (or continue) a block with the given round.
    pub fn start_round(&mut self, round: &RoundInfo) -> Result<()> {
        let Some(prev_hash) = self.last_block_hash else {
            bail!("last block hash must be initialized before starting a round");
        };
        if self.fatal_requested.load(Ordering::Acquire) {
            error!(round = round.number, "ignoring round after fatal shutdown request");
            return Ok(());
        }

        // In case this round ends up hashed, park a future for its
        // end-of-round state hash.
        self.state_hashes
            .lock()
            .entry(round.number)
            .or_insert_with(Completion::new);

        if !self.block_open {
            self.open_block(round, prev_hash)?;
        }
        self.consensus_time_current_round = round.consensus_time;
        Ok(())
    }

    fn open_block(&mut self, round: &RoundInfo, prev_hash: Hash) -> Result<()> {
        let info = self.store.block_stream_info().unwrap_or_default();
        self.pending_work = classify_pending_work(&info, self.opts.software_version);
        self.block_number = info.block_number + 1;
        self.block_timestamp = round.block_timestamp();
        self.last_used_time = round.consensus_time;
        self.block_hash_manager
            .start_block(&info.trailing_block_hashes, prev_hash, self.block_number);

        {
            let mut shared = self.shared.lock();
            shared.running.start_block(&info.trailing_output_hashes);
            shared.subtrees.reset();
            let mut writer = (self.writer_supplier)()?;
            writer.open_block(self.block_number)?;
            shared.writer = Some(writer);
        }

        if !self.checked_for_pending_blocks {
            self.checked_for_pending_blocks = true;
            if let Some(dir) = self.recovery_dir.clone() {
                self.recover_pending_blocks(&dir, info.block_number);
            }
        }

        self.block_open = true;
        self.worker.add_item(BlockItem::BlockHeader(BlockHeader {
            number: self.block_number,
            software_version: self.opts.software_version,
            block_timestamp: self.block_timestamp,
        }));
        debug!(block = self.block_number, round = round.number, "opened block");
        Ok(())
    }

    /// Re-enqueue pending blocks persisted before a controlled shutdown.
    fn recover_pending_blocks(&mut self, dir: &std::path::Path, last_closed_block: u64) {
        let Some(first) = find_first_contiguous_pending(dir, last_closed_block) else {
            info!(dir = %dir.display(), "no pending blocks to recover");
            return;
        };
        info!(dir = %dir.display(), first, "recovering pending blocks from disk");
        for recovered in load_contiguous_pending_records(dir, first) {
            let number = recovered.record.block_number;
            let writer = match FileBlockWriter::reopen(dir, number) {
                Ok(w) => w,
                Err(e) => {
                    warn!(block = number, error = %e, "failed to reopen recovered block");
                    continue;
                }
            };
            let rec = recovered.record;
            let block = PendingBlock {
                number,
                block_hash: rec.block_hash,
                previous_block_hash: rec.previous_block_hash,
                block_timestamp: rec.block_timestamp,
                proof_builder: BlockProofBuilder::new(
                    number,
                    rec.previous_block_hash,
                    rec.start_of_block_state_root,
                ),
                writer: Box::new(writer),
                contents_path: Some(recovered.contents_path),
                sibling_hashes: rec.sibling_hashes,
            };
            if let Err(e) = self.pending.enqueue(block) {
                warn!(block = number, error = %e, "failed to re-enqueue recovered block");
            } else {
                info!(block = number, "recovered pending block");
            }
        }
    }

    /// Submit one item to the open block.
    pub fn write_item(&mut self, item: BlockItem) -> Result<()> {
        if !self.block_open {
            bail!("no open block; start a round first");
        }
        if let Some(ts) = item.consensus_timestamp() {
            self.last_used_time = ts;
        }
        self.worker.add_item(item);
        Ok(())
    }

    /// Buffer a state change to be flushed at the block boundary.
    pub fn add_boundary_state_change(&mut self, change: StateChange) {
        self.boundary_changes.push(change);
    }

    /// End the round; closes the block when the close decision says so.
    /// Returns whether the block was closed.
    pub fn end_round(&mut self, round: &RoundInfo) -> Result<bool> {
        let closes = self.should_close_block(round);
        if closes && self.block_open {
            match self.close_block(round) {
                Ok(()) => {}
                // Under a fatal shutdown the close is best-effort; the
                // shutdown future must still complete below.
                Err(e) if self.fatal_requested.load(Ordering::Acquire) => {
                    error!(block = self.block_number, error = %e, "best-effort block close failed");
                }
                Err(e) => return Err(e),
            }
        }
        if self.fatal_requested.load(Ordering::Acquire) {
            self.pending.log_incomplete();
            if let Some(mut writer) = self.shared.lock().writer.take() {
                error!(block = self.block_number, "prematurely closing block");
                if let Err(e) = writer.close_complete_block() {
                    error!(error = %e, "failed to close block during fatal shutdown");
                }
                self.block_open = false;
            }
            self.fatal_done.complete(());
        }
        Ok(closes)
    }

    fn should_close_block(&self, round: &RoundInfo) -> bool {
        if self.fatal_requested.load(Ordering::Acquire) {
            return true;
        }
        if round.number == 1 || round.is_freeze_round {
            return true;
        }
        if !self.signer.is_ready() {
            return false;
        }
        match self.opts.close_policy {
            BlockClosePolicy::RoundsPerBlock(n) => round.number % n.max(1) == 0,
            BlockClosePolicy::BlockPeriod(period) => {
                self.consensus_time_current_round
                    .duration_since(&self.block_timestamp)
                    >= period
            }
        }
    }

    fn close_block(&mut self, round: &RoundInfo) -> Result<()> {
        // Flush buffered boundary state changes and drain in-flight items.
        let boundary = std::mem::take(&mut self.boundary_changes);
        self.worker.add_item(BlockItem::StateChanges(StateChanges {
            consensus_timestamp: self.last_used_time,
            changes: boundary,
        }));
        self.worker.sync();

        // The block's starting state hash is the end-of-round state hash of
        // the most recent non-skipped round before this block.
        let start_state_future = self
            .state_hashes
            .lock()
            .get(&self.last_round_of_prev_block)
            .cloned();
        let Some(future) = start_state_future else {
            bail!(
                "missing end-of-round state hash future for round {}",
                self.last_round_of_prev_block
            );
        };
        let start_state = future.wait();
        // Prune futures for rounds before the one closing this block.
        self.state_hashes.lock().retain(|r, _| *r >= round.number);
        self.last_round_of_prev_block = round.number;

        // Read the four finished subtree roots plus the state-changes
        // hasher's interim progress.
        let (header_root, input_root, output_root, trace_root, interim, interim_count, running) = {
            let mut shared = self.shared.lock();
            (
                shared.subtrees.consensus_header.root_hash(),
                shared.subtrees.input.root_hash(),
                shared.subtrees.output.root_hash(),
                shared.subtrees.trace_data.root_hash(),
                shared.subtrees.state_changes.intermediate_state().to_vec(),
                shared.subtrees.state_changes.leaf_count(),
                shared.running.latest_hashes(),
            )
        };

        let info = BlockStreamInfo {
            block_number: self.block_number,
            block_timestamp: self.block_timestamp,
            trailing_output_hashes: running,
            trailing_block_hashes: self.block_hash_manager.trailing_hashes(),
            input_root,
            consensus_header_root: header_root,
            output_root,
            trace_data_root: trace_root,
            start_of_block_state_hash: start_state,
            state_changes_leaf_count: interim_count,
            state_changes_pending: interim,
            last_handle_time: self.last_used_time,
            post_upgrade_work_done: self.pending_work != PendingWork::PostUpgrade,
            software_version: self.opts.software_version,
        };
        self.store.put_block_stream_info(&info);

        // The record itself is the block's final state-changes item.
        self.worker.add_item(block_stream_info_state_change(&info)?);
        self.worker.sync();

        let (state_changes_root, writer) = {
            let mut shared = self.shared.lock();
            let root = shared.subtrees.state_changes.root_hash();
            let Some(writer) = shared.writer.take() else {
                bail!("no open writer at block close");
            };
            (root, writer)
        };

        let prev_hash = self
            .last_block_hash
            .context("last block hash missing at close")?;
        let computation = combine_block_root(
            &prev_hash,
            &start_state,
            &header_root,
            &input_root,
            &output_root,
            &state_changes_root,
            &trace_root,
        );

        self.pending.enqueue(PendingBlock {
            number: self.block_number,
            block_hash: computation.root,
            previous_block_hash: prev_hash,
            block_timestamp: self.block_timestamp,
            proof_builder: BlockProofBuilder::new(self.block_number, prev_hash, start_state),
            writer,
            contents_path: None,
            sibling_hashes: computation.sibling_hashes.to_vec(),
        })?;

        self.last_block_hash = Some(computation.root);
        self.block_open = false;
        info!(
            block = self.block_number,
            root = %computation.root,
            "closed block"
        );

        if round.is_freeze_round {
            // Signing resumes after restart; leave enough on disk to recover.
            info!("freeze round: flushing pending blocks instead of signing");
            self.pending.flush_all_pending();
        } else {
            self.submit_for_signing(computation.root);
        }
        Ok(())
    }

    fn submit_for_signing(&self, block_hash: Hash) {
        let future = self.signer.sign(&block_hash);
        let scheme_id = self.signer.scheme_id();
        let queue = Arc::clone(&self.pending);
        let number = self.block_number;
        let spawned = thread::Builder::new()
            .name(format!("blockseal-proof-{number}"))
            .spawn(move || {
                let signature = future.wait();
                if signature.is_empty() {
                    debug!(block = number, "signature future completed empty");
                    return;
                }
                match queue.finish_proof_with_signature(&block_hash, &signature, scheme_id) {
                    Ok(finished) => debug!(block = number, finished, "signature applied"),
                    Err(e) => error!(block = number, error = %e, "failed to finish proofs"),
                }
            });
        if let Err(e) = spawned {
            error!(block = number, error = %e, "failed to spawn proof finisher");
        }
    }

    /* ------------------------------ queries -------------------------------- */

    /// Number of the block currently open (or the last one opened).
    #[must_use]
    pub const fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Timestamp of the current block.
    #[must_use]
    pub const fn block_timestamp(&self) -> Timestamp {
        self.block_timestamp
    }

    /// Last consensus time used by any written item.
    #[must_use]
    pub const fn last_used_consensus_time(&self) -> Timestamp {
        self.last_used_time
    }

    /// Hash of block `number`, if still inside the trailing window.
    #[must_use]
    pub fn block_hash_by_number(&self, number: u64) -> Option<Hash> {
        self.block_hash_manager.hash_of_block(number)
    }

    /// The pseudo-random seed: the `n-3` output running hash.
    ///
    /// Drains in-flight items first so no two transactions ever observe the
    /// same seed.
    pub fn prng_seed(&mut self) -> Option<Hash> {
        self.worker.sync();
        self.shared.lock().running.n_minus_3()
    }

    /// The housekeeping classified at the last block open.
    #[must_use]
    pub const fn pending_work(&self) -> PendingWork {
        self.pending_work
    }

    /// Record that the pending genesis/post-upgrade work was handled.
    pub fn confirm_pending_work_finished(&mut self) {
        if self.pending_work == PendingWork::None {
            // Should not happen; an error here would only make things worse.
            error!("pending work confirmed finished but none was pending");
        }
        self.pending_work = PendingWork::None;
    }

    /// The pending-proof queue (exposed for proof-delivery integrations).
    #[must_use]
    pub fn pending_blocks(&self) -> Arc<PendingBlockQueue> {
        Arc::clone(&self.pending)
    }

    /* --------------------------- notifications ----------------------------- */

    /// Deliver the end-of-round state hash for `round`.
    ///
    /// Callers must deliver hashes in round order; a later round's hash must
    /// never arrive before an earlier round's.
    pub fn notify_state_hashed(&self, round: u64, hash: Hash) {
        let map = self.state_hashes.lock();
        match map.get(&round) {
            Some(future) => {
                future.complete(hash);
            }
            None => warn!(round, "state hash notification for unknown round"),
        }
    }

    /// Request fatal shutdown: a one-way latch. No further rounds are
    /// processed; the in-flight block closes best-effort at the next
    /// `end_round`.
    pub fn notify_fatal_event(&self) {
        self.fatal_requested.store(true, Ordering::Release);
    }

    /// Wait (bounded) for the fatal-shutdown drain to finish.
    pub fn await_fatal_shutdown(&self, timeout: Duration) {
        error!(?timeout, "awaiting any in-progress round to be closed");
        let _ = self.fatal_done.wait_timeout(timeout);
        error!("block stream fatal shutdown complete");
    }
}

/* ------------------------------ helpers ------------------------------------ */

/// The final state-changes item of a block: the committed info record.
fn block_stream_info_state_change(info: &BlockStreamInfo) -> Result<BlockItem> {
    Ok(BlockItem::StateChanges(StateChanges {
        consensus_timestamp: info.last_handle_time,
        changes: vec![StateChange {
            state_id: BLOCK_STREAM_INFO_STATE_ID,
            value: to_cbor(info)?,
        }],
    }))
}

/// Reconstruct the last block's composite hash from a committed record.
///
/// The record holds the state-changes hasher's interim state from just
/// before the record item itself was hashed, so the final subtree root is
/// recomputed by resuming the hasher and replaying that one item.
fn effective_last_block_hash(info: &BlockStreamInfo) -> Result<Hash> {
    let mut state_changes = StreamingTreeHasher::from_state(
        info.state_changes_pending.clone(),
        info.state_changes_leaf_count,
    )
    .context("resuming state-changes hasher from block-stream record")?;
    let final_item = block_stream_info_state_change(info)?;
    state_changes.add_leaf(&final_item.to_canonical_bytes()?)?;
    let state_changes_root = state_changes.root_hash();

    let prev_of_recorded = info.trailing_block_hashes.last().copied().unwrap_or(Hash::NULL);
    let computation = combine_block_root(
        &prev_of_recorded,
        &info.start_of_block_state_hash,
        &info.consensus_header_root,
        &info.input_root,
        &info.output_root,
        &state_changes_root,
        &info.trace_data_root,
    );
    Ok(computation.root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockseal_core::HASH_SIZE;

    fn h(b: u8) -> Hash {
        Hash([b; HASH_SIZE])
    }

    #[test]
    fn composite_root_matches_manual_depth3_combination() {
        let (p, s) = (h(1), h(2));
        let (r1, r2, r3, r4, r5) = (h(3), h(4), h(5), h(6), h(7));

        let d20 = combine(&p, &s);
        let d21 = combine(&r1, &r2);
        let d22 = combine(&r3, &r4);
        let d23 = combine(&r5, &Hash::NULL);
        let d10 = combine(&d20, &d21);
        let d11 = combine(&d22, &d23);
        let expected = combine(&d10, &d11);

        let rc = combine_block_root(&p, &s, &r1, &r2, &r3, &r4, &r5);
        assert_eq!(rc.root, expected);
    }

    #[test]
    fn sibling_hashes_fold_back_to_the_root() {
        let rc = combine_block_root(&h(1), &h(2), &h(3), &h(4), &h(5), &h(6), &h(7));
        let mut acc = h(1);
        for sibling in rc.sibling_hashes {
            assert!(!sibling.is_first, "all block siblings are right-hand");
            acc = combine(&acc, &sibling.hash);
        }
        assert_eq!(acc, rc.root);
    }

    #[test]
    fn effective_last_block_hash_is_deterministic() {
        let info = BlockStreamInfo {
            block_number: 9,
            trailing_block_hashes: vec![h(1), h(2)],
            start_of_block_state_hash: h(3),
            consensus_header_root: h(4),
            input_root: h(5),
            output_root: h(6),
            trace_data_root: h(7),
            state_changes_leaf_count: 3,
            state_changes_pending: vec![h(8), h(9)],
            last_handle_time: Timestamp::new(50, 0),
            ..Default::default()
        };
        let a = effective_last_block_hash(&info).unwrap();
        let b = effective_last_block_hash(&info).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Hash::NULL);
    }

    #[test]
    fn corrupt_interim_state_fails_to_resume() {
        let info = BlockStreamInfo {
            state_changes_leaf_count: 3,
            state_changes_pending: vec![h(1)], // popcount(3) == 2
            ..Default::default()
        };
        assert!(effective_last_block_hash(&info).is_err());
    }
}
