//! Durable block item writer.
//!
//! One writer instance owns one block's on-disk artifacts for the block's
//! whole lifetime: the item log (`<number>.blk`, length-prefixed frames of
//! canonical item bytes) and, while the proof is still pending, a
//! `<number>.pnd.json` sidecar holding the [`PendingProofRecord`] needed to
//! resume the block after a restart.

use anyhow::{bail, Context, Result};
use blockseal_core::io::{from_cbor, write_json};
use blockseal_core::{BlockItem, PendingProofRecord};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable writer for one block's items and recovery record.
pub trait BlockItemWriter: Send {
    /// Begin the block with the given number.
    fn open_block(&mut self, block_number: u64) -> Result<()>;

    /// Append one serialized item to the block's item log. Items must land
    /// in exactly the order this method is called.
    fn write_item(&mut self, serialized: &[u8]) -> Result<()>;

    /// Persist the partial-proof record so the block can be reconstructed
    /// after a restart.
    fn flush_pending_block(&mut self, record: &PendingProofRecord) -> Result<()>;

    /// Seal the block: flush and close the item log.
    fn close_complete_block(&mut self) -> Result<()>;
}

/// Path of the item log for `block_number` under `dir`.
#[must_use]
pub fn block_file_path(dir: &Path, block_number: u64) -> PathBuf {
    dir.join(format!("{block_number:020}.blk"))
}

/// Path of the pending-proof sidecar for `block_number` under `dir`.
#[must_use]
pub fn pending_record_path(dir: &Path, block_number: u64) -> PathBuf {
    dir.join(format!("{block_number:020}.pnd.json"))
}

/// Remove the pending-proof sidecar for a sealed block, if present.
pub fn remove_pending_record(dir: &Path, block_number: u64) {
    let path = pending_record_path(dir, block_number);
    match std::fs::remove_file(&path) {
        Ok(()) => debug!(block = block_number, "removed pending-proof sidecar"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(block = block_number, error = %e, "could not remove sidecar"),
    }
}

/// File-backed [`BlockItemWriter`].
pub struct FileBlockWriter {
    dir: PathBuf,
    file: Option<BufWriter<File>>,
    block_number: Option<u64>,
}

impl FileBlockWriter {
    /// A writer rooted at `dir` (created if missing).
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_owned();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating block directory {}", dir.display()))?;
        Ok(Self {
            dir,
            file: None,
            block_number: None,
        })
    }

    /// Reopen the item log of a recovered pending block for appending.
    pub fn reopen<P: AsRef<Path>>(dir: P, block_number: u64) -> Result<Self> {
        let dir = dir.as_ref().to_owned();
        let path = block_file_path(&dir, block_number);
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("reopening block file {}", path.display()))?;
        Ok(Self {
            dir,
            file: Some(BufWriter::new(file)),
            block_number: Some(block_number),
        })
    }

    /// Path of the currently open block's item log, if any.
    #[must_use]
    pub fn contents_path(&self) -> Option<PathBuf> {
        self.block_number.map(|n| block_file_path(&self.dir, n))
    }
}

impl BlockItemWriter for FileBlockWriter {
    fn open_block(&mut self, block_number: u64) -> Result<()> {
        if self.file.is_some() {
            bail!("writer already has an open block");
        }
        let path = block_file_path(&self.dir, block_number);
        let file =
            File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        self.file = Some(BufWriter::new(file));
        self.block_number = Some(block_number);
        Ok(())
    }

    fn write_item(&mut self, serialized: &[u8]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            bail!("no open block to write to");
        };
        let len = u32::try_from(serialized.len())?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(serialized)?;
        Ok(())
    }

    fn flush_pending_block(&mut self, record: &PendingProofRecord) -> Result<()> {
        let Some(number) = self.block_number else {
            bail!("no open block to flush a pending record for");
        };
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        write_json(pending_record_path(&self.dir, number), record)
    }

    fn close_complete_block(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            bail!("no open block to close");
        };
        file.flush()?;
        file.get_ref().sync_all()?;
        remove_pending_record(
            &self.dir,
            self.block_number.take().unwrap_or_default(),
        );
        Ok(())
    }
}

/// Read back every item of a block file, in log order.
pub fn read_block_items<P: AsRef<Path>>(path: P) -> Result<Vec<BlockItem>> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", path_ref.display()))?;
    let mut rdr = BufReader::new(f);
    let mut items = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match rdr.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("reading item frame length"),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut frame = vec![0u8; len];
        rdr.read_exact(&mut frame)
            .with_context(|| format!("truncated item frame in {}", path_ref.display()))?;
        items.push(from_cbor(&frame).with_context(|| "decoding item frame")?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockseal_core::{EventTransaction, Hash, Timestamp};

    #[test]
    fn write_and_read_back_items_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = FileBlockWriter::new(dir.path()).unwrap();
        w.open_block(7).unwrap();

        let items: Vec<BlockItem> = (0u8..5)
            .map(|i| {
                BlockItem::EventTransaction(EventTransaction {
                    payload: vec![i; 3],
                })
            })
            .collect();
        for item in &items {
            w.write_item(&item.to_canonical_bytes().unwrap()).unwrap();
        }
        w.close_complete_block().unwrap();

        let got = read_block_items(block_file_path(dir.path(), 7)).unwrap();
        assert_eq!(got, items);
    }

    #[test]
    fn pending_record_sidecar_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = FileBlockWriter::new(dir.path()).unwrap();
        w.open_block(3).unwrap();
        let rec = PendingProofRecord {
            block_number: 3,
            block_hash: Hash([1; 48]),
            previous_block_hash: Hash::NULL,
            start_of_block_state_root: Hash([2; 48]),
            block_timestamp: Timestamp::new(1, 0),
            sibling_hashes: Vec::new(),
        };
        w.flush_pending_block(&rec).unwrap();
        assert!(pending_record_path(dir.path(), 3).exists());

        // Sealing the block removes the sidecar.
        w.close_complete_block().unwrap();
        assert!(!pending_record_path(dir.path(), 3).exists());
    }

    #[test]
    fn reopen_appends_to_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let item = BlockItem::EventTransaction(EventTransaction { payload: vec![1] });
        {
            let mut w = FileBlockWriter::new(dir.path()).unwrap();
            w.open_block(1).unwrap();
            w.write_item(&item.to_canonical_bytes().unwrap()).unwrap();
            w.flush_pending_block(&PendingProofRecord {
                block_number: 1,
                block_hash: Hash([9; 48]),
                previous_block_hash: Hash::NULL,
                start_of_block_state_root: Hash::NULL,
                block_timestamp: Timestamp::EPOCH,
                sibling_hashes: Vec::new(),
            })
            .unwrap();
            // Dropped without sealing, as after a crash.
        }
        let mut w = FileBlockWriter::reopen(dir.path(), 1).unwrap();
        w.write_item(&item.to_canonical_bytes().unwrap()).unwrap();
        w.close_complete_block().unwrap();
        let got = read_block_items(block_file_path(dir.path(), 1)).unwrap();
        assert_eq!(got.len(), 2);
    }
}
