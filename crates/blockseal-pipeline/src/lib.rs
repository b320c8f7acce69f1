//! blockseal-pipeline — block assembly, proof finishing, and recovery.
//!
//! The pipeline consumes a stream of consensus rounds and typed block items,
//! routes every item into one of five independent subtree hashers while
//! persisting it to a durable item log in strict arrival order, closes blocks
//! per the configured policy, and tracks closed blocks in a FIFO queue until
//! their proofs are finished — directly with a signature over their own
//! composite hash, or indirectly through a later signed block's signature
//! plus a chain of sibling hashes.
//!
//! Item hashing runs on a small worker pool; routing and log writes happen on
//! a single sequential stage so the durable order always matches submission
//! order. Proof finishing is serialized behind one lock so concurrent
//! signature callbacks can never interleave partial writes.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::significant_drop_tightening
)]

/// Block assembly pipeline and composite-root computation.
pub mod assembly;
/// One-shot completion futures (state hashes, signatures, shutdown).
pub mod completion;
/// Pending block queue and the proof finisher.
pub mod pending;
/// Crash recovery of pending blocks from disk.
pub mod recovery;
/// Running output hashes and the trailing block-hash ring.
pub mod running;
/// The asynchronous block-hash signer boundary.
pub mod signer;
/// State proofs and partial Merkle paths.
pub mod state_proof;
/// Two-stage item worker (parallel hashing, sequential routing).
mod worker;
/// Durable block item writer and its file-backed implementation.
pub mod writer;

pub use assembly::{
    combine_block_root, BlockRootComputation, BlockStreamPipeline, InMemoryStateStore,
    InitialStateHash, StateStore, WriterSupplier,
};
pub use completion::Completion;
pub use pending::{PendingBlock, PendingBlockQueue};
pub use recovery::{find_first_contiguous_pending, load_contiguous_pending_records};
pub use running::{BlockHashManager, RunningHashManager};
pub use signer::{BlockHashSigner, SignatureFuture};
pub use state_proof::{fold_path, generate_state_proof, partial_state_path};
pub use writer::{read_block_items, BlockItemWriter, FileBlockWriter};
