// wal/recovery.rs
// Read back the log on open

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::warn;

use crate::error::{DocVaultError, Result};

use super::entry::WALFrame;
use super::reader::WALFrameIterator;

/// Frames recovered from a WAL file
#[derive(Debug, Default)]
pub struct RecoveredLog {
    /// Intact frames newer than the base version, in log order
    pub frames: Vec<WALFrame>,
    /// Intact frames at or below the base version (already checkpointed)
    pub skipped: usize,
    /// Length of the intact prefix of the file
    pub valid_len: u64,
    pub file_len: u64,
}

impl RecoveredLog {
    /// True when the file ends in a partial or corrupt frame
    pub fn torn(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// Read every intact frame of the log at `path`.
///
/// Frames with `version <= base_version` are already reflected in the
/// primary store and are skipped. Reading stops at the first torn or
/// corrupt frame; everything after it is unreachable.
pub fn read_log(path: &Path, base_version: u64) -> Result<RecoveredLog> {
    if !path.exists() {
        return Ok(RecoveredLog::default());
    }

    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut iter = WALFrameIterator::new(BufReader::new(file))?;

    let mut recovered = RecoveredLog {
        file_len,
        ..RecoveredLog::default()
    };
    let mut last_version = base_version;

    while let Some(frame) = iter.next() {
        match frame {
            Ok(frame) if frame.version <= base_version => recovered.skipped += 1,
            Ok(frame) => {
                if frame.version <= last_version {
                    return Err(DocVaultError::WALCorruption(format!(
                        "frame version {} does not follow {}",
                        frame.version, last_version
                    )));
                }
                last_version = frame.version;
                recovered.frames.push(frame);
            }
            Err(DocVaultError::WALCorruption(reason)) => {
                warn!(
                    path = %path.display(),
                    offset = iter.valid_offset(),
                    %reason,
                    "WAL ends in a damaged frame; ignoring the tail"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    recovered.valid_len = iter.valid_offset();
    Ok(recovered)
}
