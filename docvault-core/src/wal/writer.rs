// wal/writer.rs
// Write-Ahead Log file manager

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::apply_permissions;

use super::entry::WALFrame;

/// Write-Ahead Log file manager
///
/// Appends frames and manages the WAL file lifecycle. The log only ever
/// holds frames newer than the primary store; checkpoint empties it.
pub struct WriteAheadLog {
    file: File,
    path: PathBuf,
    bytes: u64,
}

impl WriteAheadLog {
    /// Open or create a WAL file
    pub fn open(path: impl AsRef<Path>, permissions: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        if !existed {
            apply_permissions(&path, permissions)?;
        }
        let bytes = file.seek(SeekFrom::End(0))?;

        Ok(WriteAheadLog { file, path, bytes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current log size in bytes
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Append a frame; returns the number of bytes written
    pub fn append(&mut self, frame: &WALFrame) -> Result<usize> {
        let serialized = frame.serialize();
        self.file.write_all(&serialized)?;
        self.bytes += serialized.len() as u64;
        Ok(serialized.len())
    }

    /// Flush WAL to disk (fsync)
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Cut the log back to `len` bytes (drops a torn tail)
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.sync_all()?;
        self.bytes = len;
        Ok(())
    }

    /// Clear WAL file (after a checkpoint)
    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }
}
