//! blockseal-merkle — streaming Merkle hashing for the block stream.
//!
//! - Domain-separated leaf/internal-node hashing over SHA-384 (48-byte
//!   digests), plus the raw `combine` used only for pre-hashed subtree roots.
//! - [`StreamingTreeHasher`]: an incremental accumulator that folds completed
//!   sibling pairs eagerly and keeps only `O(log n)` pending subtree roots,
//!   with a fixed binary save/load layout for restart.
//! - [`NaiveTreeHasher`]: a buffering reference used to differential-test the
//!   streaming hasher.

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
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod hash;
pub mod naive;
pub mod streaming;

pub use hash::{
    combine, empty_tree_hash, hash_leaf, hash_internal_node, hash_internal_node_single_child,
    LEAF_PREFIX, INTERNAL_NODE_PREFIX, SINGLE_CHILD_PREFIX,
};
pub use naive::NaiveTreeHasher;
pub use streaming::StreamingTreeHasher;
