#![no_main]

use docvault_core::wal::{read_log, WALFrame};
use libfuzzer_sys::fuzz_target;
use std::io::Write;
use tempfile::TempDir;

// Fuzz target: WAL recovery over arbitrary bytes
// Damaged logs must yield a valid prefix, never panic

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let _ = WALFrame::deserialize(data);

    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("fuzz.db.wal");
    {
        let mut file = std::fs::File::create(&wal_path).unwrap();
        file.write_all(data).unwrap();
        file.sync_all().unwrap();
    }

    if let Ok(log) = read_log(&wal_path, 0) {
        assert!(log.valid_len <= log.file_len);
        for frame in &log.frames {
            let _ = frame.payload();
        }
    }
});
