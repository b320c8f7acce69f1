//! Typed block items and their canonical binary form.
//!
//! Every item produced during a round is exactly one of the variants below.
//! The pipeline routes items into one of five independent hash subtrees by
//! [`ItemKind`]; the match is closed so adding a kind forces a routing
//! decision at compile time.

use crate::io::to_cbor;
use crate::proof::BlockProof;
use crate::types::Timestamp;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// The state-id under which the block-stream info record is stored.
pub const BLOCK_STREAM_INFO_STATE_ID: u32 = 0x42;

/// Opening item of every block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number.
    pub number: u64,
    /// Software version of the producing node.
    pub software_version: u32,
    /// The block's timestamp (first consensus time of its first round).
    pub block_timestamp: Timestamp,
}

/// Marks the start of a consensus round within a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundHeader {
    /// Round number.
    pub round_number: u64,
}

/// Marks an event boundary within a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Id of the node that created the event.
    pub creator_id: u64,
    /// The event's consensus timestamp.
    pub event_timestamp: Timestamp,
}

/// A serialized transaction as submitted to consensus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTransaction {
    /// Canonical transaction bytes (opaque to this pipeline).
    pub payload: Vec<u8>,
}

/// The execution result of one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    /// Numeric result status (opaque to this pipeline).
    pub status: u32,
    /// Consensus timestamp assigned to the transaction.
    pub consensus_timestamp: Timestamp,
}

/// Auxiliary output emitted by a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    /// Output bytes (opaque to this pipeline).
    pub payload: Vec<u8>,
}

/// One key/value mutation of ledger state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Identifies the state being changed.
    pub state_id: u32,
    /// New serialized value.
    pub value: Vec<u8>,
}

/// A batch of state changes sharing one consensus timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanges {
    /// Consensus timestamp of the batch.
    pub consensus_timestamp: Timestamp,
    /// The mutations, in application order.
    pub changes: Vec<StateChange>,
}

/// Opaque execution trace record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceData {
    /// Trace bytes (opaque to this pipeline).
    pub payload: Vec<u8>,
}

/// One item of the block stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockItem {
    /// Block opening header.
    BlockHeader(BlockHeader),
    /// Round boundary marker.
    RoundHeader(RoundHeader),
    /// Event boundary marker.
    EventHeader(EventHeader),
    /// Serialized input transaction.
    EventTransaction(EventTransaction),
    /// Transaction execution result.
    TransactionResult(TransactionResult),
    /// Transaction auxiliary output.
    TransactionOutput(TransactionOutput),
    /// State mutation batch.
    StateChanges(StateChanges),
    /// Execution trace record.
    TraceData(TraceData),
    /// The block's closing proof. Written to the item log, hashed nowhere.
    BlockProof(BlockProof),
}

/// Discriminant of [`BlockItem`], used for subtree routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// Block opening header.
    BlockHeader,
    /// Round boundary marker.
    RoundHeader,
    /// Event boundary marker.
    EventHeader,
    /// Serialized input transaction.
    EventTransaction,
    /// Transaction execution result.
    TransactionResult,
    /// Transaction auxiliary output.
    TransactionOutput,
    /// State mutation batch.
    StateChanges,
    /// Execution trace record.
    TraceData,
    /// Block proof.
    BlockProof,
}

impl BlockItem {
    /// The item's kind tag.
    #[must_use]
    pub const fn kind(&self) -> ItemKind {
        match self {
            Self::BlockHeader(_) => ItemKind::BlockHeader,
            Self::RoundHeader(_) => ItemKind::RoundHeader,
            Self::EventHeader(_) => ItemKind::EventHeader,
            Self::EventTransaction(_) => ItemKind::EventTransaction,
            Self::TransactionResult(_) => ItemKind::TransactionResult,
            Self::TransactionOutput(_) => ItemKind::TransactionOutput,
            Self::StateChanges(_) => ItemKind::StateChanges,
            Self::TraceData(_) => ItemKind::TraceData,
            Self::BlockProof(_) => ItemKind::BlockProof,
        }
    }

    /// The consensus timestamp carried by the item, if its kind has one.
    ///
    /// Used to advance the pipeline's last-used consensus time.
    #[must_use]
    pub const fn consensus_timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::TransactionResult(r) => Some(r.consensus_timestamp),
            Self::StateChanges(s) => Some(s.consensus_timestamp),
            _ => None,
        }
    }

    /// Canonical binary form: the bytes hashed into a subtree and appended
    /// to the durable item log.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_are_deterministic() {
        let item = BlockItem::EventTransaction(EventTransaction {
            payload: vec![1, 2, 3],
        });
        assert_eq!(
            item.to_canonical_bytes().unwrap(),
            item.to_canonical_bytes().unwrap()
        );
    }

    #[test]
    fn kinds_are_distinct_per_variant() {
        let a = BlockItem::TraceData(TraceData { payload: vec![] });
        let b = BlockItem::TransactionOutput(TransactionOutput { payload: vec![] });
        assert_ne!(a.kind(), b.kind());
    }

    #[test]
    fn timestamps_surface_only_for_results_and_state_changes() {
        let ts = Timestamp::new(5, 6);
        let r = BlockItem::TransactionResult(TransactionResult {
            status: 0,
            consensus_timestamp: ts,
        });
        assert_eq!(r.consensus_timestamp(), Some(ts));
        let h = BlockItem::RoundHeader(RoundHeader { round_number: 1 });
        assert_eq!(h.consensus_timestamp(), None);
    }
}
