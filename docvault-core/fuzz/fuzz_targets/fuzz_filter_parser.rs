#![no_main]

use docvault_core::{Database, Filter};
use libfuzzer_sys::fuzz_target;
use serde_json::json;
use tempfile::TempDir;

// Fuzz target: filter language parser
// Arbitrary text must parse to a filter or a query error, never panic

fuzz_target!(|data: &[u8]| {
    let Ok(src) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(filter) = Filter::parse(src) else {
        return;
    };
    let _ = filter.matches(&json!({"_id": 1, "name": "item", "tags": ["a", "b"], "n": 3}));

    // Planner and executor see the same filter through an indexed collection
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path().join("fuzz.db")).unwrap();
    let items = db.create_collection("items").unwrap();
    items.create_index("n", false).unwrap();
    for i in 0..5 {
        items
            .insert(json!({"_id": i, "n": i * 10, "name": format!("item_{}", i)}))
            .unwrap();
    }
    let _ = items.find(src);
    let _ = items.query().filter(src).explain();
    let _ = items.update(src, &json!({"fuzzed": true}));
    let _ = items.delete_one(src);
});
