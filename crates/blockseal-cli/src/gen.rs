//! Synthetic round/item generator for the `simulate` subcommand.
//!
//! Deterministic for a given seed so simulation runs are reproducible and
//! `verify` can be exercised against stable output.

use blockseal_core::{
    BlockItem, EventHeader, EventTransaction, RoundHeader, StateChange, StateChanges, Timestamp,
    TraceData, TransactionOutput, TransactionResult,
};
use rand::{rngs::StdRng, Rng as _, SeedableRng};

pub struct ItemGenerator {
    rng: StdRng,
    events_per_round: u64,
}

impl ItemGenerator {
    pub fn new(seed: u64, events_per_round: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            events_per_round,
        }
    }

    /// All items for one round: a round header, then per event a header,
    /// transactions with results and occasional outputs, and per round a
    /// state-change batch plus optional trace data.
    pub fn round_items(&mut self, round_number: u64) -> Vec<BlockItem> {
        let consensus = Timestamp::new(1_700_000_000 + round_number as i64, 0);
        let mut items = vec![BlockItem::RoundHeader(RoundHeader { round_number })];

        for event in 0..self.events_per_round {
            items.push(BlockItem::EventHeader(EventHeader {
                creator_id: self.rng.random_range(0..10),
                event_timestamp: consensus,
            }));
            let txs = self.rng.random_range(1..=3);
            for _ in 0..txs {
                let mut payload = vec![0u8; self.rng.random_range(16..64)];
                self.rng.fill(payload.as_mut_slice());
                items.push(BlockItem::EventTransaction(EventTransaction { payload }));
                items.push(BlockItem::TransactionResult(TransactionResult {
                    status: u32::from(self.rng.random_bool(0.9)),
                    consensus_timestamp: consensus,
                }));
                if self.rng.random_bool(0.3) {
                    items.push(BlockItem::TransactionOutput(TransactionOutput {
                        payload: vec![event as u8; 8],
                    }));
                }
            }
        }

        items.push(BlockItem::StateChanges(StateChanges {
            consensus_timestamp: consensus,
            changes: vec![StateChange {
                state_id: 7,
                value: round_number.to_le_bytes().to_vec(),
            }],
        }));
        if self.rng.random_bool(0.5) {
            items.push(BlockItem::TraceData(TraceData {
                payload: vec![round_number as u8; 16],
            }));
        }
        items
    }
}
