//! Two-stage item worker.
//!
//! Every submitted item flows through a **parallel stage** (serialize to
//! canonical bytes and compute the leaf hash, on any pool thread) and then a
//! **strictly sequential stage** (route the hash into the right subtree
//! hasher, update the running-hash window, and append the bytes to the
//! durable item log). The sequential stage restores submission order with a
//! reorder buffer keyed by sequence number, so the durable log order always
//! equals `add_item` order no matter how hashing threads are scheduled.
//!
//! `sync()` blocks until everything submitted so far has cleared the
//! sequential stage; the pipeline calls it before reading subtree roots,
//! before exposing the pseudo-random seed, and before closing a block.

use crate::running::RunningHashManager;
use crate::writer::BlockItemWriter;
use blockseal_core::{BlockItem, Hash, ItemKind};
use blockseal_merkle::{hash_leaf, StreamingTreeHasher};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use tracing::error;

/// The five per-block subtree hashers.
pub(crate) struct SubtreeHashers {
    pub consensus_header: StreamingTreeHasher,
    pub input: StreamingTreeHasher,
    pub output: StreamingTreeHasher,
    pub state_changes: StreamingTreeHasher,
    pub trace_data: StreamingTreeHasher,
}

impl SubtreeHashers {
    pub fn new() -> Self {
        Self {
            consensus_header: StreamingTreeHasher::new(),
            input: StreamingTreeHasher::new(),
            output: StreamingTreeHasher::new(),
            state_changes: StreamingTreeHasher::new(),
            trace_data: StreamingTreeHasher::new(),
        }
    }

    /// Fresh hashers for the next block.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Per-block state mutated only by the sequential stage (and by the
/// pipeline itself at block boundaries, after a `sync`).
pub(crate) struct AssemblyShared {
    pub subtrees: SubtreeHashers,
    pub running: RunningHashManager,
    pub writer: Option<Box<dyn BlockItemWriter>>,
}

impl AssemblyShared {
    pub fn new() -> Self {
        Self {
            subtrees: SubtreeHashers::new(),
            running: RunningHashManager::default(),
            writer: None,
        }
    }
}

struct HashJob {
    seq: u64,
    item: BlockItem,
}

struct HashedItem {
    seq: u64,
    kind: ItemKind,
    /// Canonical bytes and leaf hash; `None` if serialization failed
    /// (already logged by the hashing stage).
    payload: Option<(Vec<u8>, Hash)>,
}

struct Progress {
    routed: Mutex<u64>,
    drained: Condvar,
}

/// Handle to the worker pool and the sequential router.
pub(crate) struct ItemWorker {
    job_tx: Option<mpsc::Sender<HashJob>>,
    submitted: u64,
    progress: Arc<Progress>,
    hash_threads: Vec<JoinHandle<()>>,
    router_thread: Option<JoinHandle<()>>,
}

impl ItemWorker {
    pub fn new(threads: usize, shared: Arc<Mutex<AssemblyShared>>) -> anyhow::Result<Self> {
        let threads = threads.max(1);
        let (job_tx, job_rx) = mpsc::channel::<HashJob>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, done_rx) = mpsc::channel::<HashedItem>();

        let mut hash_threads = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = Arc::clone(&job_rx);
            let tx = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("blockseal-hash-{i}"))
                .spawn(move || hash_loop(&rx, &tx))?;
            hash_threads.push(handle);
        }
        drop(done_tx);

        let progress = Arc::new(Progress {
            routed: Mutex::new(0),
            drained: Condvar::new(),
        });
        let router_progress = Arc::clone(&progress);
        let router_thread = thread::Builder::new()
            .name("blockseal-route".to_owned())
            .spawn(move || route_loop(&done_rx, &shared, &router_progress))?;

        Ok(Self {
            job_tx: Some(job_tx),
            submitted: 0,
            progress,
            hash_threads,
            router_thread: Some(router_thread),
        })
    }

    /// Submit one item. Assigns the next sequence number.
    pub fn add_item(&mut self, item: BlockItem) {
        let Some(tx) = self.job_tx.as_ref() else {
            error!("item worker already shut down; dropping item");
            return;
        };
        let seq = self.submitted;
        if tx.send(HashJob { seq, item }).is_err() {
            error!("item worker stopped; dropping item");
            return;
        }
        self.submitted += 1;
    }

    /// Block until every submitted item has cleared the sequential stage.
    pub fn sync(&self) {
        let mut routed = self.progress.routed.lock();
        while *routed < self.submitted {
            self.progress.drained.wait(&mut routed);
        }
    }
}

impl Drop for ItemWorker {
    fn drop(&mut self) {
        // Closing the job channel drains the pool, which in turn closes the
        // router's input channel.
        self.job_tx.take();
        for handle in self.hash_threads.drain(..) {
            let _ = handle.join();
        }
        if let Some(router) = self.router_thread.take() {
            let _ = router.join();
        }
    }
}

fn hash_loop(rx: &Mutex<mpsc::Receiver<HashJob>>, tx: &mpsc::Sender<HashedItem>) {
    loop {
        let job = {
            let guard = rx.lock();
            guard.recv()
        };
        let Ok(HashJob { seq, item }) = job else {
            break;
        };
        let kind = item.kind();
        let payload = match item.to_canonical_bytes() {
            Ok(bytes) => {
                let leaf = hash_leaf(&bytes);
                Some((bytes, leaf))
            }
            Err(e) => {
                error!(kind = ?kind, error = %e, "failed to serialize block item");
                None
            }
        };
        if tx.send(HashedItem { seq, kind, payload }).is_err() {
            break;
        }
    }
}

fn route_loop(
    rx: &mpsc::Receiver<HashedItem>,
    shared: &Mutex<AssemblyShared>,
    progress: &Progress,
) {
    let mut buffer: BTreeMap<u64, HashedItem> = BTreeMap::new();
    let mut next: u64 = 0;
    while let Ok(done) = rx.recv() {
        buffer.insert(done.seq, done);
        while let Some(item) = buffer.remove(&next) {
            route_one(shared, item);
            next += 1;
            let mut routed = progress.routed.lock();
            *routed = next;
            progress.drained.notify_all();
        }
    }
}

fn route_one(shared: &Mutex<AssemblyShared>, done: HashedItem) {
    let Some((bytes, leaf_hash)) = done.payload else {
        return; // serialization failure, already logged
    };
    let mut s = shared.lock();
    if done.kind == ItemKind::TransactionResult {
        s.running.next_result_hash(&leaf_hash);
    }
    let routed = match done.kind {
        ItemKind::RoundHeader | ItemKind::EventHeader => {
            s.subtrees.consensus_header.add_node_by_hash(leaf_hash)
        }
        ItemKind::EventTransaction => s.subtrees.input.add_node_by_hash(leaf_hash),
        ItemKind::TransactionResult | ItemKind::TransactionOutput | ItemKind::BlockHeader => {
            s.subtrees.output.add_node_by_hash(leaf_hash)
        }
        ItemKind::StateChanges => s.subtrees.state_changes.add_node_by_hash(leaf_hash),
        ItemKind::TraceData => s.subtrees.trace_data.add_node_by_hash(leaf_hash),
        // Proof items are block metadata, hashed into no subtree.
        ItemKind::BlockProof => Ok(()),
    };
    if let Err(e) = routed {
        error!(kind = ?done.kind, error = %e, "failed to route item hash");
    }
    match s.writer.as_mut() {
        Some(w) => {
            if let Err(e) = w.write_item(&bytes) {
                error!(kind = ?done.kind, error = %e, "failed to append item to block log");
            }
        }
        None => error!(kind = ?done.kind, "no open block writer; item not persisted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use blockseal_core::{EventTransaction, PendingProofRecord, TraceData};

    /// Captures written frames in memory.
    struct VecWriter {
        log: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl BlockItemWriter for VecWriter {
        fn open_block(&mut self, _block_number: u64) -> Result<()> {
            Ok(())
        }
        fn write_item(&mut self, serialized: &[u8]) -> Result<()> {
            self.log.lock().push(serialized.to_vec());
            Ok(())
        }
        fn flush_pending_block(&mut self, _record: &PendingProofRecord) -> Result<()> {
            Ok(())
        }
        fn close_complete_block(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn log_order_matches_submission_order_under_parallel_hashing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::new(Mutex::new(AssemblyShared::new()));
        shared.lock().writer = Some(Box::new(VecWriter {
            log: Arc::clone(&log),
        }));

        let mut worker = ItemWorker::new(4, Arc::clone(&shared)).unwrap();
        let items: Vec<BlockItem> = (0u32..300)
            .map(|i| {
                BlockItem::EventTransaction(EventTransaction {
                    payload: i.to_le_bytes().to_vec(),
                })
            })
            .collect();
        for item in &items {
            worker.add_item(item.clone());
        }
        worker.sync();

        let expected: Vec<Vec<u8>> = items
            .iter()
            .map(|i| i.to_canonical_bytes().unwrap())
            .collect();
        assert_eq!(*log.lock(), expected);
    }

    #[test]
    fn routing_matches_a_serial_reference_hasher() {
        let shared = Arc::new(Mutex::new(AssemblyShared::new()));
        shared.lock().writer = Some(Box::new(VecWriter {
            log: Arc::new(Mutex::new(Vec::new())),
        }));
        let mut worker = ItemWorker::new(3, Arc::clone(&shared)).unwrap();

        let mut reference = StreamingTreeHasher::new();
        for i in 0u32..64 {
            let item = BlockItem::TraceData(TraceData {
                payload: i.to_be_bytes().to_vec(),
            });
            reference
                .add_node_by_hash(hash_leaf(&item.to_canonical_bytes().unwrap()))
                .unwrap();
            worker.add_item(item);
        }
        worker.sync();

        let mut s = shared.lock();
        assert_eq!(s.subtrees.trace_data.root_hash(), reference.root_hash());
        assert_eq!(s.subtrees.input.leaf_count(), 0);
    }

    #[test]
    fn sync_on_idle_worker_returns_immediately() {
        let shared = Arc::new(Mutex::new(AssemblyShared::new()));
        let worker = ItemWorker::new(2, shared).unwrap();
        worker.sync();
    }
}
