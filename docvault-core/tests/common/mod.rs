// common/mod.rs
// Shared fixtures and file-damage helpers for integration tests

#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use docvault_core::{init_logging, Database, DatabaseOptions, LogLevel};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Fresh database in its own temp directory; keep the dir alive
pub fn open_db() -> (TempDir, Database) {
    open_db_with(DatabaseOptions::new())
}

pub fn open_db_with(options: DatabaseOptions) -> (TempDir, Database) {
    // recovered tails and callback failures show up with --nocapture
    init_logging(LogLevel::Warn);
    let dir = TempDir::new().unwrap();
    let db = Database::open_with_options(db_path(&dir), options).unwrap();
    (dir, db)
}

pub fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("test.db")
}

pub fn wal_path(dir: &TempDir) -> PathBuf {
    dir.path().join("test.db.wal")
}

pub fn users() -> Vec<Value> {
    vec![
        json!({"_id": 1, "name": "Alice", "age": 30, "city": "Oslo", "tags": ["admin", "dev"]}),
        json!({"_id": 2, "name": "Bob", "age": 17, "city": "Bergen", "tags": ["dev"]}),
        json!({"_id": 3, "name": "Carol", "age": 42, "city": "Oslo", "tags": []}),
        json!({"_id": 4, "name": "Dave", "age": 25, "city": "Tromso"}),
        json!({"_id": 5, "name": "Eve", "age": 35, "city": "Bergen", "tags": ["ops"]}),
    ]
}

/// Database with the `users` fixture committed
pub fn seeded_db() -> (TempDir, Database) {
    let (dir, db) = open_db();
    db.collection("users").unwrap().insert_many(users()).unwrap();
    (dir, db)
}

pub fn names(docs: &[Value]) -> Vec<String> {
    docs.iter()
        .map(|d| d["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Flip one bit of the byte at `offset`
pub fn corrupt_bit(path: &Path, offset: u64, bit: u8) -> std::io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)?;
    byte[0] ^= 1 << bit;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)?;
    file.sync_all()
}

pub fn truncate_file(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}

pub fn append_garbage(path: &Path, garbage: &[u8]) -> std::io::Result<u64> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    let offset = file.seek(SeekFrom::End(0))?;
    file.write_all(garbage)?;
    file.sync_all()?;
    Ok(offset)
}

pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
