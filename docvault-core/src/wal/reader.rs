// wal/reader.rs
// Streaming WAL reader with iterator pattern

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::{DocVaultError, Result};

use super::entry::{parse_header, WALFrame, WAL_HEADER_SIZE};

/// Streaming iterator over WAL frames
///
/// Reads one frame at a time and remembers where the last intact frame
/// ended, so recovery can cut a torn tail at exactly that offset.
pub struct WALFrameIterator<R: Read + Seek> {
    reader: R,
    valid_offset: u64,
    done: bool,
}

impl<R: Read + Seek> WALFrameIterator<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader,
            valid_offset: 0,
            done: false,
        })
    }

    /// Byte offset just past the last frame that decoded cleanly
    pub fn valid_offset(&self) -> u64 {
        self.valid_offset
    }

    fn read_next(&mut self) -> Result<Option<WALFrame>> {
        let mut header = [0u8; WAL_HEADER_SIZE];
        let read = read_full(&mut self.reader, &mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < WAL_HEADER_SIZE {
            return Err(DocVaultError::WALCorruption(
                "torn frame header".to_string(),
            ));
        }

        let (version, kind, data_len) = parse_header(&header)?;

        let mut data = vec![0u8; data_len];
        let mut checksum_bytes = [0u8; 4];
        if read_full(&mut self.reader, &mut data)? < data_len
            || read_full(&mut self.reader, &mut checksum_bytes)? < 4
        {
            return Err(DocVaultError::WALCorruption("torn frame body".to_string()));
        }

        let frame = WALFrame {
            version,
            kind,
            data,
            checksum: u32::from_le_bytes(checksum_bytes),
        };
        frame.check()?;

        self.valid_offset += frame.encoded_len() as u64;
        Ok(Some(frame))
    }
}

/// Like `read_exact`, but reports how many bytes arrived before EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(DocVaultError::Io(e)),
        }
    }
    Ok(filled)
}

impl<R: Read + Seek> Iterator for WALFrameIterator<R> {
    type Item = Result<WALFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_next() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
