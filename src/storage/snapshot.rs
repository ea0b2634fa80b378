//! Full-state snapshot file
//!
//! Layout: `checksum frame(snap(bincode(StoreSnapshot)))`. Written to a temp
//! file, fsynced, then renamed over `activity.snapshot`, so a reader sees
//! either the previous snapshot or the new one.

use crate::catalog::InternTableSnapshot;
use crate::storage::checksum::Checksum;
use crate::storage::journal::SequenceNumber;
use crate::storage::table::TableSnapshot;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const SNAPSHOT_FILE: &str = "activity.snapshot";
const SNAPSHOT_TMP_FILE: &str = "activity.snapshot.tmp";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    /// First journal sequence number not contained in this snapshot
    pub journal_seq: SequenceNumber,
    pub strings: InternTableSnapshot,
    pub urls: InternTableSnapshot,
    pub table: TableSnapshot,
}

impl StoreSnapshot {
    pub fn new(
        journal_seq: SequenceNumber,
        strings: InternTableSnapshot,
        urls: InternTableSnapshot,
        table: TableSnapshot,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            journal_seq,
            strings,
            urls,
            table,
        }
    }
}

/// Atomically replace the snapshot in `dir`. Returns the bytes written.
pub fn write_snapshot(dir: &Path, snapshot: &StoreSnapshot) -> Result<usize> {
    let encoded = bincode::serialize(snapshot)?;
    let compressed = snap::raw::Encoder::new()
        .compress_vec(&encoded)
        .map_err(|e| StorageError::Serialization(format!("snapshot compression: {}", e)))?;
    let frame = Checksum::encode_frame(&compressed);

    let tmp_path = dir.join(SNAPSHOT_TMP_FILE);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&frame)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, dir.join(SNAPSHOT_FILE))?;
    sync_dir(dir);

    Ok(frame.len())
}

/// Load the snapshot in `dir`, if one exists.
pub fn read_snapshot(dir: &Path) -> Result<Option<StoreSnapshot>> {
    let path = dir.join(SNAPSHOT_FILE);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let compressed = Checksum::decode_frame(&bytes)?;
    let encoded = snap::raw::Decoder::new()
        .decompress_vec(&compressed)
        .map_err(|e| StorageError::Corruption(format!("snapshot decompression: {}", e)))?;
    let snapshot: StoreSnapshot = bincode::deserialize(&encoded)?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StorageError::Corruption(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    Ok(Some(snapshot))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
