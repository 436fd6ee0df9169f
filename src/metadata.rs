//! Metadata table and turtle-file bootstrap.
//!
//! The metadata table is conceptually a B-tree of its own; this port stores
//! it as a single serialized map instead of bootstrapping a second instance
//! of the B-tree machinery purely to hold a few dozen small config/checkpoint
//! entries. The turtle file's role (name the metadata table's own root) is
//! unaffected by that simplification: it still needs to point at wherever
//! the metadata blob currently lives.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::addr::AddressCookie;
use crate::error::{Error, Result};
use crate::fs::{FileHandle, Filesystem};
use crate::txn::timestamp::Timestamp;

/// One checkpoint's durable record, as stored in the metadata table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    pub name: String,
    pub order: u64,
    pub wall_time: u64,
    pub root_address: AddressCookieRecord,
    pub snap_min: u64,
    pub snap_max: u64,
    pub snap_count: u64,
    pub oldest_ts: u64,
    pub stable_ts: u64,
    pub write_gen: u64,
    pub file_size: u64,
}

/// Serde-friendly mirror of [`AddressCookie`] (the real type carries an
/// `Option<u64>` which round-trips through JSON fine, but a dedicated
/// record type keeps the metadata schema stable if the cookie type grows
/// fields later).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressCookieRecord {
    pub object_id: u32,
    pub offset: Option<u64>,
    pub size: u64,
    pub checksum: u32,
}

impl From<AddressCookie> for AddressCookieRecord {
    fn from(a: AddressCookie) -> Self {
        Self {
            object_id: a.object_id,
            offset: a.offset,
            size: a.size,
            checksum: a.checksum,
        }
    }
}

impl From<AddressCookieRecord> for AddressCookie {
    fn from(r: AddressCookieRecord) -> Self {
        Self {
            object_id: r.object_id,
            offset: r.offset,
            size: r.size,
            checksum: r.checksum,
        }
    }
}

impl CheckpointRecord {
    pub fn new(name: impl Into<String>, order: u64, root_address: AddressCookie, stable_ts: Timestamp, file_size: u64) -> Self {
        Self {
            name: name.into(),
            order,
            wall_time: 0,
            root_address: root_address.into(),
            snap_min: 0,
            snap_max: 0,
            snap_count: 0,
            oldest_ts: 0,
            stable_ts: stable_ts.0,
            write_gen: 0,
            file_size,
        }
    }
}

/// In-memory metadata table: URI -> config string, plus the checkpoint
/// history per table. Persisted as one JSON blob (`WiredTiger.wt`).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataTable {
    configs: HashMap<String, String>,
    checkpoints: HashMap<String, Vec<CheckpointRecord>>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config(&mut self, uri: &str, config: &str) {
        self.configs.insert(uri.to_string(), config.to_string());
    }

    pub fn get_config(&self, uri: &str) -> Option<&str> {
        self.configs.get(uri).map(|s| s.as_str())
    }

    pub fn remove(&mut self, uri: &str) {
        self.configs.remove(uri);
        self.checkpoints.remove(uri);
    }

    /// Records a new checkpoint for `uri`, appending to its history.
    pub fn record_checkpoint(&mut self, uri: &str, record: CheckpointRecord) {
        self.checkpoints.entry(uri.to_string()).or_default().push(record);
    }

    pub fn latest_checkpoint(&self, uri: &str) -> Option<&CheckpointRecord> {
        self.checkpoints.get(uri).and_then(|v| v.last())
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::InvalidArgument(format!("metadata serialize failed: {e}")))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::CorruptFile(format!("metadata deserialize failed: {e}")))
    }
}

/// The small bootstrap file (`WiredTiger.turtle`) naming where the
/// metadata table's serialized blob currently lives: a single byte offset
/// into the metadata file, since this port keeps metadata as one
/// rewrite-whole-file blob rather than block-addressed pages.
pub struct TurtleFile;

impl TurtleFile {
    /// Writes the turtle file recording that the metadata blob is `len`
    /// bytes long at its start, plus the format identifier.
    pub fn write<FS: Filesystem>(fs: &FS, path: &Path, metadata_len: u64) -> Result<()> {
        let handle = fs.open(path, true)?;
        let contents = format!("wt_core.turtle\nmetadata_len={metadata_len}\n");
        handle.extend(contents.len() as u64)?;
        handle.write_at(0, contents.as_bytes())?;
        handle.fsync()?;
        debug!(path = %path.display(), metadata_len, "wrote turtle file");
        Ok(())
    }

    pub fn read<FS: Filesystem>(fs: &FS, path: &Path) -> Result<u64> {
        let handle = fs.open(path, false)?;
        let size = handle.size()?;
        let mut buf = vec![0u8; size as usize];
        handle.read_at(0, &mut buf)?;
        let text = String::from_utf8_lossy(&buf);
        for line in text.lines() {
            if let Some(value) = line.strip_prefix("metadata_len=") {
                return value
                    .trim()
                    .parse()
                    .map_err(|_| Error::CorruptFile("turtle file has malformed metadata_len".into()));
            }
        }
        Err(Error::CorruptFile("turtle file missing metadata_len".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFilesystem;

    #[test]
    fn metadata_roundtrip_through_json() {
        let mut table = MetadataTable::new();
        table.set_config("table:t", "key_format=S,value_format=S");
        table.record_checkpoint(
            "table:t",
            CheckpointRecord::new("ckpt-1", 1, AddressCookie::NONE, Timestamp(5), 4096),
        );
        let bytes = table.serialize().unwrap();
        let back = MetadataTable::deserialize(&bytes).unwrap();
        assert_eq!(back.get_config("table:t"), Some("key_format=S,value_format=S"));
        assert_eq!(back.latest_checkpoint("table:t").unwrap().order, 1);
    }

    #[test]
    fn turtle_file_roundtrip() {
        let fs = MemFilesystem::default();
        TurtleFile::write(&fs, Path::new("/db/WiredTiger.turtle"), 1234).unwrap();
        let len = TurtleFile::read(&fs, Path::new("/db/WiredTiger.turtle")).unwrap();
        assert_eq!(len, 1234);
    }
}
