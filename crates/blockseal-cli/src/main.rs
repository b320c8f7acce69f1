//! blockseal reference CLI.
//!
//! Drives the block-stream pipeline over a synthetic round/item stream
//! (`simulate`), re-checks a produced block directory (`verify`), and dumps
//! a single block file (`inspect`).

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blockseal_core::{
    BlockClosePolicy, BlockItem, Hash, ItemKind, PipelineOptions, RoundInfo, Signature, Timestamp,
};
use blockseal_merkle::{hash_leaf, StreamingTreeHasher};
use blockseal_pipeline::{
    combine_block_root, fold_path, read_block_items, BlockHashSigner, BlockItemWriter,
    BlockStreamPipeline, Completion, FileBlockWriter, InMemoryStateStore, InitialStateHash,
    SignatureFuture, StateStore,
};

mod gen;

#[derive(Parser, Debug)]
#[command(
    name = "blockseal",
    about = "blockseal block-stream CLI",
    long_about = "blockseal block-stream CLI.\n\nUse this tool to simulate block production over a synthetic item stream, verify a produced block directory, and inspect block files.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the pipeline over a synthetic stream and write block files.
    Simulate {
        /// Number of consensus rounds to run (>0).
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u64).range(1..))]
        rounds: u64,

        /// Events per round.
        #[arg(long, default_value_t = 3)]
        events: u64,

        /// Close a block every N rounds (ignored with --block-period-ms).
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
        rounds_per_block: u64,

        /// Close blocks by consensus time instead of round count.
        #[arg(long)]
        block_period_ms: Option<u64>,

        /// Make the last round a freeze round (pending blocks flushed,
        /// not signed).
        #[arg(long, default_value_t = false)]
        freeze_last: bool,

        /// Deterministic generator seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output directory for block files.
        #[arg(long, default_value = "blocks")]
        out: PathBuf,
    },

    /// Recompute and check every block file in a directory.
    Verify {
        /// Block directory produced by `simulate` (or a node).
        #[arg(long)]
        dir: PathBuf,
    },

    /// Print a summary of one block file.
    Inspect {
        /// Path to a `.blk` file.
        #[arg(long)]
        block: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    match Cli::parse().cmd {
        Cmd::Simulate {
            rounds,
            events,
            rounds_per_block,
            block_period_ms,
            freeze_last,
            seed,
            out,
        } => simulate(
            rounds,
            events,
            rounds_per_block,
            block_period_ms,
            freeze_last,
            seed,
            &out,
        ),
        Cmd::Verify { dir } => verify(&dir),
        Cmd::Inspect { block } => inspect(&block),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/* ------------------------------- simulate ---------------------------------- */

/// Development signer: always ready, completes immediately, and "signs" by
/// re-hashing the block hash as a leaf. Not a real signature scheme.
struct DevSigner;

impl BlockHashSigner for DevSigner {
    fn is_ready(&self) -> bool {
        true
    }
    fn scheme_id(&self) -> u32 {
        1
    }
    fn sign(&self, block_hash: &Hash) -> SignatureFuture {
        let signature = Signature(hash_leaf(block_hash.as_bytes()).as_bytes().to_vec());
        Completion::completed(signature)
    }
}

fn simulate(
    rounds: u64,
    events: u64,
    rounds_per_block: u64,
    block_period_ms: Option<u64>,
    freeze_last: bool,
    seed: u64,
    out: &Path,
) -> Result<()> {
    let close_policy = block_period_ms.map_or(
        BlockClosePolicy::RoundsPerBlock(rounds_per_block),
        |ms| BlockClosePolicy::BlockPeriod(Duration::from_millis(ms)),
    );
    let opts = PipelineOptions {
        close_policy,
        ..Default::default()
    };

    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let block_dir = out.to_owned();
    let mut pipeline = BlockStreamPipeline::new(
        opts,
        Arc::new(DevSigner),
        Box::new(move || {
            let writer: Box<dyn BlockItemWriter> = Box::new(FileBlockWriter::new(&block_dir)?);
            Ok(writer)
        }),
        store,
        InitialStateHash {
            round: 0,
            hash: Completion::completed(hash_leaf(b"genesis-state")),
        },
        None,
    )?;
    pipeline.init(None)?;

    let mut generator = gen::ItemGenerator::new(seed, events);
    let mut closed = 0u64;
    for number in 1..=rounds {
        let round = RoundInfo {
            number,
            consensus_time: Timestamp::new(1_700_000_000 + number as i64, 0),
            first_transaction_time: None,
            is_freeze_round: freeze_last && number == rounds,
        };
        pipeline.start_round(&round)?;
        for item in generator.round_items(number) {
            pipeline.write_item(item)?;
        }
        if pipeline.end_round(&round)? {
            closed += 1;
        }
        // The state layer would deliver this asynchronously on a real node.
        pipeline.notify_state_hashed(number, hash_leaf(&number.to_le_bytes()));
    }

    // Give in-flight signature callbacks a moment to drain the queue.
    let queue = pipeline.pending_blocks();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !queue.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    info!(
        rounds,
        blocks = closed,
        pending = queue.len(),
        dir = %out.display(),
        "simulation finished"
    );
    println!(
        "Produced {closed} blocks over {rounds} rounds in {} ({} still pending proof)",
        out.display(),
        queue.len()
    );
    Ok(())
}

/* -------------------------------- verify ----------------------------------- */

struct BlockCheck {
    number: u64,
    root: Hash,
    proof: blockseal_core::BlockProof,
}

/// Recompute a block's five subtree roots and composite hash from its log.
fn recompute_block(path: &Path) -> Result<BlockCheck> {
    let items = read_block_items(path)?;
    let Some(BlockItem::BlockHeader(header)) = items.first() else {
        bail!("{} does not start with a block header", path.display());
    };
    let number = header.number;

    let mut header_tree = StreamingTreeHasher::new();
    let mut input_tree = StreamingTreeHasher::new();
    let mut output_tree = StreamingTreeHasher::new();
    let mut state_changes_tree = StreamingTreeHasher::new();
    let mut trace_tree = StreamingTreeHasher::new();
    let mut proof = None;

    for item in &items {
        if let BlockItem::BlockProof(p) = item {
            proof = Some(p.clone());
            continue;
        }
        let leaf = hash_leaf(&item.to_canonical_bytes()?);
        match item.kind() {
            ItemKind::RoundHeader | ItemKind::EventHeader => {
                header_tree.add_node_by_hash(leaf)?;
            }
            ItemKind::EventTransaction => input_tree.add_node_by_hash(leaf)?,
            ItemKind::TransactionResult | ItemKind::TransactionOutput | ItemKind::BlockHeader => {
                output_tree.add_node_by_hash(leaf)?;
            }
            ItemKind::StateChanges => state_changes_tree.add_node_by_hash(leaf)?,
            ItemKind::TraceData => trace_tree.add_node_by_hash(leaf)?,
            ItemKind::BlockProof => {}
        }
    }
    let Some(proof) = proof else {
        bail!("{} has no block proof (still pending?)", path.display());
    };
    if proof.block_number != number {
        bail!(
            "{}: proof is for block {}, header says {}",
            path.display(),
            proof.block_number,
            number
        );
    }

    let computation = combine_block_root(
        &proof.previous_block_root,
        &proof.start_of_block_state_root,
        &header_tree.root_hash(),
        &input_tree.root_hash(),
        &output_tree.root_hash(),
        &state_changes_tree.root_hash(),
        &trace_tree.root_hash(),
    );
    Ok(BlockCheck {
        number,
        root: computation.root,
        proof,
    })
}

fn verify(dir: &Path) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == "blk"))
        .collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no block files in {}", dir.display());
    }

    let mut checks = BTreeMap::new();
    for path in &paths {
        let check = recompute_block(path)?;
        checks.insert(check.number, check);
    }

    let roots: BTreeMap<u64, Hash> = checks.iter().map(|(n, c)| (*n, c.root)).collect();
    let mut indirect = 0usize;
    for (number, check) in &checks {
        // Chain linkage to the previous block.
        if let Some(prev_root) = roots.get(&(number - 1)) {
            if check.proof.previous_block_root != *prev_root {
                bail!(
                    "block {number}: previous-block root {} does not match block {} root {}",
                    check.proof.previous_block_root,
                    number - 1,
                    prev_root
                );
            }
        }
        if !check.proof.is_indirect() {
            continue;
        }
        indirect += 1;

        // The first sibling set must climb from the previous-block hash to
        // this block's own root...
        if check.proof.sibling_hashes.len() < 3 {
            bail!("block {number}: indirect proof with a truncated sibling chain");
        }
        let own = blockseal_core::MerklePath {
            timestamp_leaf: None,
            siblings: check.proof.sibling_hashes[..3].to_vec(),
            next_path_index: None,
        };
        if fold_path(check.proof.previous_block_root, &own) != check.root {
            bail!("block {number}: sibling set does not reproduce the block root");
        }
        // ...and the full chain must land on a later block's root.
        let state_proof = check
            .proof
            .state_proof
            .as_ref()
            .with_context(|| format!("block {number}: indirect proof missing state proof"))?;
        let Some(chain_path) = state_proof.paths.get(1) else {
            bail!("block {number}: state proof has no chain path");
        };
        let target = fold_path(check.proof.previous_block_root, chain_path);
        if !roots.iter().any(|(n, r)| n > number && *r == target) {
            bail!("block {number}: indirect chain does not reach a later block root");
        }
    }

    println!(
        "Verified {} blocks in {} ({indirect} proven indirectly)",
        checks.len(),
        dir.display()
    );
    Ok(())
}

/* -------------------------------- inspect ---------------------------------- */

fn inspect(block: &Path) -> Result<()> {
    let items = read_block_items(block)?;
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for item in &items {
        let name = match item.kind() {
            ItemKind::BlockHeader => "block-header",
            ItemKind::RoundHeader => "round-header",
            ItemKind::EventHeader => "event-header",
            ItemKind::EventTransaction => "event-transaction",
            ItemKind::TransactionResult => "transaction-result",
            ItemKind::TransactionOutput => "transaction-output",
            ItemKind::StateChanges => "state-changes",
            ItemKind::TraceData => "trace-data",
            ItemKind::BlockProof => "block-proof",
        };
        *counts.entry(name).or_default() += 1;
    }

    println!("{}: {} items", block.display(), items.len());
    for (name, count) in counts {
        println!("  {name:<20} {count}");
    }
    if let Some(BlockItem::BlockHeader(header)) = items.first() {
        println!("  block number         {}", header.number);
        println!("  block timestamp      {}", header.block_timestamp);
    }
    if let Some(BlockItem::BlockProof(proof)) = items.last() {
        let kind = if proof.is_indirect() { "indirect" } else { "direct" };
        println!("  proof                {kind} (scheme {})", proof.scheme_id);
        println!("  previous block root  {}", proof.previous_block_root);
        println!("  start state root     {}", proof.start_of_block_state_root);
        println!("  signature            {}", hex::encode(&proof.signature.0));
    } else {
        println!("  proof                none (pending)");
    }
    Ok(())
}

/* --------------------------------- tests ----------------------------------- */
