//! Pipeline options.

use std::time::Duration;

/// When the pipeline closes the open block at a round boundary.
///
/// Exactly one policy is active; forced closes (first round, freeze round,
/// fatal shutdown) bypass it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockClosePolicy {
    /// Close every Nth round.
    RoundsPerBlock(u64),
    /// Close once consensus time since the block's first round reaches the
    /// given duration.
    BlockPeriod(Duration),
}

/// Options for the block-stream pipeline.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// The active close policy.
    pub close_policy: BlockClosePolicy,
    /// Maximum number of trailing block hashes kept in the info record.
    pub trailing_block_hashes: usize,
    /// Software version stamped into headers and info records.
    pub software_version: u32,
    /// Number of parallel item-hashing threads.
    pub hasher_threads: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            close_policy: BlockClosePolicy::RoundsPerBlock(1),
            trailing_block_hashes: 256,
            software_version: 1,
            hasher_threads: 4,
        }
    }
}
