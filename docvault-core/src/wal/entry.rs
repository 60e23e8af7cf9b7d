// wal/entry.rs
// WAL frame types and serialization

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DocumentId;
use crate::error::{DocVaultError, Result};
use crate::index::IndexDefinition;

/// Frame kind in the WAL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A committed batch of document changes
    Commit = 0x01,
    /// A catalog change (collections, indexes, schemas)
    Catalog = 0x02,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameKind::Commit),
            0x02 => Ok(FrameKind::Catalog),
            other => Err(DocVaultError::WALCorruption(format!(
                "unknown frame kind 0x{:02x}",
                other
            ))),
        }
    }
}

/// One document write inside a commit frame; `document: None` is a delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub collection: String,
    pub id: DocumentId,
    pub document: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub changes: Vec<DocumentChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CatalogChange {
    CreateCollection {
        name: String,
    },
    DropCollection {
        name: String,
    },
    RenameCollection {
        from: String,
        to: String,
    },
    CreateIndex {
        collection: String,
        definition: IndexDefinition,
    },
    DropIndex {
        collection: String,
        name: String,
    },
    SetSchema {
        collection: String,
        schema: Value,
    },
    RemoveSchema {
        collection: String,
    },
}

/// Decoded frame payload
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Commit(CommitRecord),
    Catalog(CatalogChange),
}

/// A single frame in the Write-Ahead Log
///
/// Binary format:
/// - version: 8 bytes (u64 LE), the commit version the frame produces
/// - kind: 1 byte
/// - data_len: 4 bytes (u32 LE)
/// - data: variable (JSON payload)
/// - checksum: 4 bytes (CRC32)
#[derive(Debug, Clone)]
pub struct WALFrame {
    pub version: u64,
    pub kind: FrameKind,
    pub data: Vec<u8>,
    pub checksum: u32,
}

/// Header size: 8 (version) + 1 (kind) + 4 (len) = 13 bytes
pub const WAL_HEADER_SIZE: usize = 13;

/// Maximum WAL frame payload: 256MB
pub const MAX_WAL_FRAME_SIZE: usize = 256 * 1024 * 1024;

impl WALFrame {
    /// Create a new frame with computed checksum
    pub fn new(version: u64, kind: FrameKind, data: Vec<u8>) -> Self {
        let mut frame = WALFrame {
            version,
            kind,
            data,
            checksum: 0,
        };
        frame.checksum = frame.compute_checksum();
        frame
    }

    pub fn commit(version: u64, record: &CommitRecord) -> Result<Self> {
        Ok(Self::new(version, FrameKind::Commit, serde_json::to_vec(record)?))
    }

    pub fn catalog(version: u64, change: &CatalogChange) -> Result<Self> {
        Ok(Self::new(version, FrameKind::Catalog, serde_json::to_vec(change)?))
    }

    pub fn payload(&self) -> Result<FramePayload> {
        match self.kind {
            FrameKind::Commit => Ok(FramePayload::Commit(serde_json::from_slice(&self.data)?)),
            FrameKind::Catalog => Ok(FramePayload::Catalog(serde_json::from_slice(&self.data)?)),
        }
    }

    /// Serialize frame to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn encoded_len(&self) -> usize {
        WAL_HEADER_SIZE + self.data.len() + 4
    }

    /// Deserialize frame from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < WAL_HEADER_SIZE + 4 {
            return Err(DocVaultError::WALCorruption("frame too short".to_string()));
        }

        let (version, kind, data_len) = parse_header(&data[..WAL_HEADER_SIZE])?;
        let body = &data[WAL_HEADER_SIZE..];
        if body.len() < data_len + 4 {
            return Err(DocVaultError::WALCorruption("truncated frame".to_string()));
        }

        let mut checksum_bytes = [0u8; 4];
        checksum_bytes.copy_from_slice(&body[data_len..data_len + 4]);

        let frame = WALFrame {
            version,
            kind,
            data: body[..data_len].to_vec(),
            checksum: u32::from_le_bytes(checksum_bytes),
        };
        frame.check()?;
        Ok(frame)
    }

    /// Compute CRC32 checksum
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&[self.kind as u8]);
        hasher.update(&(self.data.len() as u32).to_le_bytes());
        hasher.update(&self.data);
        hasher.finalize()
    }

    pub fn verify(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.verify() {
            Ok(())
        } else {
            Err(DocVaultError::WALCorruption(format!(
                "checksum mismatch in frame for version {}",
                self.version
            )))
        }
    }
}

/// Split a 13-byte header into (version, kind, payload length)
pub(crate) fn parse_header(header: &[u8]) -> Result<(u64, FrameKind, usize)> {
    let mut version_bytes = [0u8; 8];
    version_bytes.copy_from_slice(&header[0..8]);
    let kind = FrameKind::from_u8(header[8])?;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[9..13]);
    let data_len = u32::from_le_bytes(len_bytes) as usize;

    // Prevent OOM from a malformed length
    if data_len > MAX_WAL_FRAME_SIZE {
        return Err(DocVaultError::WALCorruption(format!(
            "frame length {} exceeds limit",
            data_len
        )));
    }

    Ok((u64::from_le_bytes(version_bytes), kind, data_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_kind_conversion() {
        assert_eq!(FrameKind::from_u8(0x01).unwrap(), FrameKind::Commit);
        assert_eq!(FrameKind::from_u8(0x02).unwrap(), FrameKind::Catalog);
        assert!(FrameKind::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_commit_frame_payload() {
        let record = CommitRecord {
            changes: vec![
                DocumentChange {
                    collection: "users".to_string(),
                    id: DocumentId::Int(1),
                    document: Some(json!({"_id": 1, "name": "Alice"})),
                },
                DocumentChange {
                    collection: "users".to_string(),
                    id: DocumentId::from("x"),
                    document: None,
                },
            ],
        };
        let frame = WALFrame::commit(7, &record).unwrap();
        let decoded = WALFrame::deserialize(&frame.serialize()).unwrap();

        assert_eq!(decoded.version, 7);
        assert_eq!(decoded.kind, FrameKind::Commit);
        assert_eq!(decoded.payload().unwrap(), FramePayload::Commit(record));
    }

    #[test]
    fn test_catalog_change_encoding() {
        let change = CatalogChange::RenameCollection {
            from: "a".to_string(),
            to: "b".to_string(),
        };
        let encoded = serde_json::to_value(&change).unwrap();
        assert_eq!(encoded, json!({"op": "rename_collection", "from": "a", "to": "b"}));
    }

    #[test]
    fn test_checksum_validation() {
        let frame = WALFrame::new(1, FrameKind::Catalog, b"{}".to_vec());
        let mut bytes = frame.serialize();
        let len = bytes.len();
        bytes[len - 1] ^= 0xFF;

        assert!(matches!(
            WALFrame::deserialize(&bytes),
            Err(DocVaultError::WALCorruption(_))
        ));
        assert!(WALFrame::deserialize(&bytes[..5]).is_err());
    }
}
