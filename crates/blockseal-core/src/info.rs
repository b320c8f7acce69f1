//! The block-stream ledger record and pending-work classification.
//!
//! [`BlockStreamInfo`] is written into ledger state at every block close and
//! read back when the next block opens (or after a restart). It carries the
//! running-hash window, the bounded trailing block-hash window, and the
//! state-changes hasher's interim progress so the stream can resume exactly
//! where it stopped.

use crate::types::{Hash, Timestamp};
use serde::{Deserialize, Serialize};

/// Snapshot of block-stream progress persisted at block close.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStreamInfo {
    /// Number of the block this record was written for.
    pub block_number: u64,
    /// That block's timestamp.
    pub block_timestamp: Timestamp,
    /// Trailing output running hashes, oldest first (at most four).
    pub trailing_output_hashes: Vec<Hash>,
    /// Trailing block hashes, oldest first (bounded ring).
    pub trailing_block_hashes: Vec<Hash>,
    /// Root of the recorded block's input subtree.
    pub input_root: Hash,
    /// Root of the recorded block's consensus-header subtree.
    pub consensus_header_root: Hash,
    /// Root of the recorded block's output subtree.
    pub output_root: Hash,
    /// Root of the recorded block's trace-data subtree.
    pub trace_data_root: Hash,
    /// The recorded block's start-of-block state hash.
    pub start_of_block_state_hash: Hash,
    /// Leaf count of the state-changes hasher *before* the final record item.
    pub state_changes_leaf_count: u64,
    /// Pending subtree roots of the state-changes hasher at that point.
    pub state_changes_pending: Vec<Hash>,
    /// Consensus time of the last handled transaction.
    pub last_handle_time: Timestamp,
    /// Whether post-upgrade housekeeping has completed.
    pub post_upgrade_work_done: bool,
    /// Software version that produced the record.
    pub software_version: u32,
}

/// Classification of the housekeeping the node still owes at block open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingWork {
    /// First block ever; genesis setup is still pending.
    Genesis,
    /// The node restarted on a new software version with upgrade work pending.
    PostUpgrade,
    /// Nothing pending.
    None,
}

/// Classify pending work from the stored record and the running version.
#[must_use]
pub fn classify_pending_work(info: &BlockStreamInfo, software_version: u32) -> PendingWork {
    if info.last_handle_time == Timestamp::EPOCH {
        PendingWork::Genesis
    } else if info.software_version != software_version || !info.post_upgrade_work_done {
        PendingWork::PostUpgrade
    } else {
        PendingWork::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_handle_time_means_genesis() {
        let info = BlockStreamInfo::default();
        assert_eq!(classify_pending_work(&info, 1), PendingWork::Genesis);
    }

    #[test]
    fn version_change_means_post_upgrade() {
        let info = BlockStreamInfo {
            last_handle_time: Timestamp::new(10, 0),
            post_upgrade_work_done: true,
            software_version: 1,
            ..Default::default()
        };
        assert_eq!(classify_pending_work(&info, 2), PendingWork::PostUpgrade);
        assert_eq!(classify_pending_work(&info, 1), PendingWork::None);
    }

    #[test]
    fn unfinished_upgrade_work_stays_pending() {
        let info = BlockStreamInfo {
            last_handle_time: Timestamp::new(10, 0),
            post_upgrade_work_done: false,
            software_version: 2,
            ..Default::default()
        };
        assert_eq!(classify_pending_work(&info, 2), PendingWork::PostUpgrade);
    }
}
