//! Serialization helpers: JSON and CBOR with extension auto-detection.
//!
//! Reads reject unknown/missing extensions; writes default to JSON. The
//! in-memory CBOR helpers back the canonical item encoding.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::Path;

/// Serialize any `T: Serialize` to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).with_context(|| "serialize CBOR")?;
    Ok(buf)
}

/// Deserialize any `T: DeserializeOwned` from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut cur = Cursor::new(bytes);
    let v = ciborium::de::from_reader(&mut cur).with_context(|| "deserialize CBOR")?;
    Ok(v)
}

/// Read a value from a JSON file.
pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", display(path_ref)))?;
    let rdr = BufReader::new(f);
    let v = serde_json::from_reader(rdr)
        .with_context(|| format!("deserialize JSON {}", display(path_ref)))?;
    Ok(v)
}

/// Write a value to a JSON file (pretty-printed).
pub fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", display(path_ref)))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, value).with_context(|| "serialize JSON")?;
    w.flush().with_context(|| "flush JSON writer")?;
    Ok(())
}

/// Read a value from a CBOR file.
pub fn read_cbor<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", display(path_ref)))?;
    let mut rdr = BufReader::new(f);
    let v = ciborium::de::from_reader(&mut rdr)
        .with_context(|| format!("deserialize CBOR {}", display(path_ref)))?;
    Ok(v)
}

/// Write a value to a CBOR file.
pub fn write_cbor<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", display(path_ref)))?;
    let mut w = BufWriter::new(f);
    ciborium::ser::into_writer(value, &mut w).with_context(|| "serialize CBOR")?;
    w.flush().with_context(|| "flush CBOR writer")?;
    Ok(())
}

/// Auto-detect read by extension `.json` / `.cbor` (case-insensitive).
pub fn read_auto<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("json") => read_json(path),
        Some("cbor") => read_cbor(path),
        Some(other) => Err(anyhow!(
            "unsupported extension: {other} (supported: .json, .cbor)"
        )),
        None => Err(anyhow!("path has no extension (expected .json or .cbor)")),
    }
}

/// Auto-detect write (defaults to JSON for unknown extensions).
pub fn write_auto<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("cbor") => write_cbor(path, value),
        _ => write_json(path, value),
    }
}

/// Ensure the parent directory for a file exists (no-op if none).
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", display(path)))?;
        }
    }
    Ok(())
}

#[inline]
fn ext_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
}

#[inline]
fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
