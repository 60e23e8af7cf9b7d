// property_tests.rs
// Property-based checks against simple in-memory models

mod common;

use std::collections::BTreeMap;

use common::{db_path, open_db};
use docvault_core::{Database, DocumentId, SortOrder};
use proptest::prelude::*;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
enum Op {
    Put(i64, i64),
    Delete(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..20i64, -50..50i64).prop_map(|(id, v)| Op::Put(id, v)),
        1 => (0..20i64).prop_map(Op::Delete),
    ]
}

fn cmp_op() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just(">"), Just(">="), Just("<"), Just("<="), Just("is")]
}

fn values(docs: &[Value]) -> Vec<(i64, i64)> {
    docs.iter()
        .map(|d| (d["_id"].as_i64().unwrap(), d["v"].as_i64().unwrap()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Committed state matches a map model, before and after reopen
    #[test]
    fn prop_committed_state_matches_model(ops in prop::collection::vec(op(), 1..40)) {
        let (dir, db) = open_db();
        let coll = db.collection("p").unwrap();
        let mut model: BTreeMap<i64, i64> = BTreeMap::new();

        for op in &ops {
            match *op {
                Op::Put(id, v) => {
                    coll.upsert_by_id(&DocumentId::Int(id), json!({"v": v})).unwrap();
                    model.insert(id, v);
                }
                Op::Delete(id) => {
                    let deleted = coll.delete_by_id(&DocumentId::Int(id)).is_ok();
                    prop_assert_eq!(deleted, model.remove(&id).is_some());
                }
            }
        }

        let expected: Vec<(i64, i64)> = model.into_iter().collect();
        prop_assert_eq!(values(&coll.find_all().unwrap()), expected.clone());

        db.close().unwrap();
        drop(coll);
        drop(db);
        let db = Database::open(db_path(&dir)).unwrap();
        let coll = db.collection("p").unwrap();
        prop_assert_eq!(values(&coll.find_all().unwrap()), expected);
    }

    /// An index never changes query results, only how they are found
    #[test]
    fn prop_index_matches_scan(
        docs in prop::collection::btree_map(0..60i64, -20..20i64, 0..40),
        op in cmp_op(),
        bound in -25..25i64,
        second in proptest::option::of((cmp_op(), -25..25i64)),
    ) {
        let (_dir, db) = open_db();
        let coll = db.collection("p").unwrap();
        if !docs.is_empty() {
            coll.insert_many(docs.iter().map(|(id, v)| json!({"_id": id, "v": v})).collect())
                .unwrap();
        }

        let mut filter = format!("v {} {}", op, bound);
        if let Some((op2, bound2)) = second {
            filter = format!("{} and v {} {}", filter, op2, bound2);
        }

        let scan = coll.query().filter(&filter).sort_by("_id", SortOrder::Ascending).all().unwrap();
        coll.create_index("v", false).unwrap();
        let indexed = coll.query().filter(&filter).sort_by("_id", SortOrder::Ascending).all().unwrap();
        prop_assert_eq!(values(&scan), values(&indexed));

        let expected = docs.values().filter(|v| {
            let check = |op: &str, b: i64| match op {
                ">" => **v > b,
                ">=" => **v >= b,
                "<" => **v < b,
                "<=" => **v <= b,
                _ => **v == b,
            };
            check(op, bound) && second.map_or(true, |(op2, b2)| check(op2, b2))
        }).count();
        prop_assert_eq!(indexed.len(), expected);
    }
}
