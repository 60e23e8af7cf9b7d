#![no_main]

use docvault_core::{verify_backup, Database, DatabaseOptions};
use libfuzzer_sys::fuzz_target;
use std::io::Write;
use tempfile::TempDir;

// Fuzz target: primary file loading over arbitrary bytes
// Verification and read-only open must report damage as errors

fuzz_target!(|data: &[u8]| {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("fuzz.db");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(data).unwrap();
        file.sync_all().unwrap();
    }

    let _ = verify_backup(&path);
    let _ = Database::open_with_options(&path, DatabaseOptions::new().with_read_only(true));
});
