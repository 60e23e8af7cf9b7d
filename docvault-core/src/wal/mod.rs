// wal/mod.rs
// Write-Ahead Log module
//
// This module provides:
// - `WALFrame` and `FrameKind`: frame types and serialization
// - `CommitRecord`, `CatalogChange`: the JSON payloads frames carry
// - `WALFrameIterator`: streaming reader for WAL files
// - `WriteAheadLog`: WAL file manager (append, flush, truncate)
// - `read_log`: recovery of intact frames on open

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{
    CatalogChange, CommitRecord, DocumentChange, FrameKind, FramePayload, WALFrame,
    MAX_WAL_FRAME_SIZE, WAL_HEADER_SIZE,
};
pub use reader::WALFrameIterator;
pub use recovery::{read_log, RecoveredLog};
pub use writer::WriteAheadLog;
