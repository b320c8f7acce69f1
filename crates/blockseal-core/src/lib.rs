//! blockseal-core — canonical types and I/O for the block-stream pipeline.
//!
//! This crate defines the **stable boundary** shared across blockseal crates:
//! - the 48-byte [`Hash`] value and [`Timestamp`],
//! - the typed block-item stream ([`BlockItem`], [`ItemKind`]),
//! - the [`BlockStreamInfo`] ledger record and pending-work classification,
//! - proof artifact types ([`BlockProof`], [`StateProof`], [`PendingProofRecord`]),
//! - pipeline options, and
//! - JSON/CBOR I/O helpers with extension auto-detection.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

/// Block-stream ledger record and pending-work classification.
pub mod info;
/// JSON/CBOR helpers and auto-detecting read/write APIs.
pub mod io;
/// Typed block items and kind-based routing metadata.
pub mod items;
/// Pipeline options (close policy, bounds, version).
pub mod options;
/// Proof artifact types: block proofs, state proofs, pending records.
pub mod proof;
/// Canonical scalar types: `Hash`, `Timestamp`, `RoundInfo`.
pub mod types;

pub use info::*;
pub use items::*;
pub use options::*;
pub use proof::*;
pub use types::*;
