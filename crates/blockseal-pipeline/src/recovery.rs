//! Crash recovery of pending blocks.
//!
//! After a controlled shutdown (freeze), blocks that were closed but never
//! proven remain on disk as an item log plus a `.pnd.json` sidecar. On
//! restart the pipeline re-enqueues the contiguous run of such blocks so
//! proof finishing can resume where it stopped. Recovery is best-effort: a
//! block that fails to load is logged and skipped, never fatal.

use crate::writer::{block_file_path, pending_record_path};
use blockseal_core::io::read_json;
use blockseal_core::PendingProofRecord;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A pending block reconstructed from disk.
#[derive(Clone, Debug)]
pub struct RecoveredPendingBlock {
    /// The persisted proof context.
    pub record: PendingProofRecord,
    /// Path of the block's item log.
    pub contents_path: PathBuf,
}

/// Find the first block of the contiguous pending run that ends at
/// `last_closed_block`, by walking sidecars backwards.
#[must_use]
pub fn find_first_contiguous_pending(dir: &Path, last_closed_block: u64) -> Option<u64> {
    if !pending_record_path(dir, last_closed_block).exists() {
        return None;
    }
    let mut first = last_closed_block;
    while first > 0 && pending_record_path(dir, first - 1).exists() {
        first -= 1;
    }
    Some(first)
}

/// Load the contiguous run of pending blocks starting at `first_block`.
///
/// The scan walks forward while sidecar files exist. A sidecar that cannot
/// be parsed, disagrees about its block number, or has no item log is
/// skipped with a warning; the scan itself continues.
#[must_use]
pub fn load_contiguous_pending_records(dir: &Path, first_block: u64) -> Vec<RecoveredPendingBlock> {
    let mut out = Vec::new();
    let mut number = first_block;
    loop {
        let sidecar = pending_record_path(dir, number);
        if !sidecar.exists() {
            break;
        }
        match read_json::<PendingProofRecord, _>(&sidecar) {
            Ok(record) if record.block_number != number => {
                warn!(
                    block = number,
                    recorded = record.block_number,
                    "pending record disagrees about its block number; skipping"
                );
            }
            Ok(record) => {
                let contents_path = block_file_path(dir, number);
                if contents_path.exists() {
                    info!(block = number, "recovered pending block record");
                    out.push(RecoveredPendingBlock {
                        record,
                        contents_path,
                    });
                } else {
                    warn!(block = number, "pending record has no item log; skipping");
                }
            }
            Err(e) => {
                warn!(block = number, error = %e, "failed to load pending block; skipping");
            }
        }
        number += 1;
    }
    out
}
