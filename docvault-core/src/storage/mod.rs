// storage/mod.rs
// Primary store: checkpoint snapshot file
//
// File layout:
// - 32-byte bincode header (magic, format version, committed version,
//   payload length, CRC32 of the payload)
// - JSON payload with every collection's index definitions, schema and
//   live documents as of `committed_version`
//
// The file is always rewritten whole through a temporary file and a rename,
// so a crash leaves either the old or the new snapshot in place.

pub mod backup;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DocVaultError, Result};
use crate::index::IndexDefinition;

pub const MAGIC: [u8; 8] = *b"DOCVAULT";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 32;

/// Fixed-size header in front of the snapshot payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: [u8; 8],
    pub format_version: u32,
    pub committed_version: u64,
    pub payload_len: u64,
    pub checksum: u32,
}

impl FileHeader {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| DocVaultError::Corruption(format!("cannot encode header: {}", e)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(DocVaultError::Corruption(format!(
                "file too short for header: {} bytes",
                bytes.len()
            )));
        }
        let header: FileHeader = bincode::deserialize(&bytes[..HEADER_SIZE])
            .map_err(|e| DocVaultError::Corruption(format!("invalid header: {}", e)))?;

        if header.magic != MAGIC {
            return Err(DocVaultError::Corruption("invalid magic number".into()));
        }
        if header.format_version > FORMAT_VERSION {
            return Err(DocVaultError::Corruption(format!(
                "unsupported format version {}",
                header.format_version
            )));
        }
        Ok(header)
    }
}

/// One collection inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub name: String,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub schema: Option<Value>,
    pub documents: Vec<Value>,
}

/// Committed state at one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub collections: Vec<CollectionSnapshot>,
}

impl SnapshotData {
    pub fn empty() -> Self {
        SnapshotData {
            version: 0,
            created_at: Utc::now(),
            collections: Vec::new(),
        }
    }

    pub fn document_count(&self) -> usize {
        self.collections.iter().map(|c| c.documents.len()).sum()
    }
}

/// Serialize a snapshot into header + payload bytes
pub fn encode_snapshot(snapshot: &SnapshotData) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(snapshot)?;
    let header = FileHeader {
        magic: MAGIC,
        format_version: FORMAT_VERSION,
        committed_version: snapshot.version,
        payload_len: payload.len() as u64,
        checksum: crc32fast::hash(&payload),
    };

    let mut bytes = header.encode()?;
    debug_assert_eq!(bytes.len(), HEADER_SIZE);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Validate header and checksum, then parse the payload
pub fn decode_snapshot(bytes: &[u8]) -> Result<(FileHeader, SnapshotData)> {
    let header = FileHeader::decode(bytes)?;
    let payload = &bytes[HEADER_SIZE..];

    if payload.len() as u64 != header.payload_len {
        return Err(DocVaultError::Corruption(format!(
            "payload length {} does not match header ({})",
            payload.len(),
            header.payload_len
        )));
    }
    if crc32fast::hash(payload) != header.checksum {
        return Err(DocVaultError::Corruption("payload checksum mismatch".into()));
    }

    let snapshot: SnapshotData = serde_json::from_slice(payload)
        .map_err(|e| DocVaultError::Corruption(format!("invalid snapshot payload: {}", e)))?;
    if snapshot.version != header.committed_version {
        return Err(DocVaultError::Corruption(format!(
            "snapshot version {} does not match header ({})",
            snapshot.version, header.committed_version
        )));
    }
    Ok((header, snapshot))
}

/// Atomically replace `path` with `snapshot`; returns the file size.
pub fn write_snapshot(path: &Path, snapshot: &SnapshotData, permissions: u32) -> Result<u64> {
    let bytes = encode_snapshot(snapshot)?;
    let temp_path = sibling_path(path, ".tmp");

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    apply_permissions(&temp_path, permissions)?;
    fs::rename(&temp_path, path)?;
    sync_parent_dir(path)?;

    Ok(bytes.len() as u64)
}

/// Flush the directory entry of `path` so a completed rename survives a
/// power loss. Must run before anything that depends on the new file, such
/// as truncating the WAL.
#[cfg(unix)]
pub fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

/// Load the snapshot at `path`, or `None` when no file exists yet
pub fn read_snapshot(path: &Path) -> Result<Option<(FileHeader, SnapshotData)>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    decode_snapshot(&bytes).map(Some)
}

/// `<path><suffix>`, e.g. `data.db` -> `data.db.wal`
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn wal_path(path: &Path) -> PathBuf {
    sibling_path(path, ".wal")
}

#[cfg(unix)]
pub fn apply_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

pub fn file_size(path: &Path) -> u64 {
    File::open(path)
        .and_then(|f| f.metadata())
        .map(|m| m.len())
        .unwrap_or(0)
}
