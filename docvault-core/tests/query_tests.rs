// query_tests.rs
// Filter language, query builder, indexes and full-text search through the
// public API

mod common;

use common::{names, open_db, seeded_db};
use docvault_core::{
    DocVaultError, DocumentId, ErrorKind, FindOptions, IndexDefinition, IndexKind, QueryPlan,
    SortOrder,
};
use serde::Deserialize;
use serde_json::json;

// =============================================================================
// FILTERS
// =============================================================================

#[test]
fn test_filter_language_end_to_end() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();

    let cases: &[(&str, &[&str])] = &[
        ("age >= 30", &["Alice", "Carol", "Eve"]),
        ("age < 18", &["Bob"]),
        ("city is Oslo and age > 35", &["Carol"]),
        ("city is Tromso or name is \"Bob\"", &["Bob", "Dave"]),
        ("not (city is Oslo)", &["Bob", "Dave", "Eve"]),
        ("tags has dev", &["Alice", "Bob"]),
        ("tags has any [ops, admin]", &["Alice", "Eve"]),
        ("tags has all [admin, dev]", &["Alice"]),
        ("tags not exists", &["Dave"]),
        ("name contains \"ar\"", &["Carol"]),
        ("city is not Bergen", &["Alice", "Carol", "Dave"]),
    ];
    for (filter, expected) in cases {
        let found = users
            .query()
            .filter(filter)
            .sort_by("name", SortOrder::Ascending)
            .all()
            .unwrap();
        assert_eq!(names(&found), *expected, "filter: {}", filter);
    }
}

#[test]
fn test_invalid_filter_is_validation_error() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    for bad in ["", "age >", "age >= 1 and", "(age > 1", "tags has any ops"] {
        let err = users.find(bad).unwrap_err();
        assert!(matches!(err, DocVaultError::InvalidQuery(_)), "{}", bad);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

#[test]
fn test_type_mismatch_never_matches() {
    let (_dir, db) = open_db();
    let items = db.collection("items").unwrap();
    items
        .insert_many(vec![
            json!({"_id": 1, "v": 5}),
            json!({"_id": 2, "v": "5"}),
            json!({"_id": 3, "v": null}),
        ])
        .unwrap();
    assert_eq!(items.find("v > 1").unwrap().len(), 1);
    assert_eq!(items.find("v is 5").unwrap().len(), 1);
    assert_eq!(items.find("v is \"5\"").unwrap().len(), 1);
    assert_eq!(items.find("v is null").unwrap().len(), 1);
}

// =============================================================================
// QUERY BUILDER
// =============================================================================

#[test]
fn test_sort_skip_limit_project() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    let page = users
        .query()
        .sort_by("age", SortOrder::Descending)
        .skip(1)
        .limit(2)
        .project(&["name"])
        .all()
        .unwrap();
    assert_eq!(page, vec![json!({"_id": 5, "name": "Eve"}), json!({"_id": 1, "name": "Alice"})]);

    let excluded = users
        .query()
        .filter("name is Dave")
        .exclude(&["tags", "city", "_id"])
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(excluded, json!({"name": "Dave", "age": 25}));
}

#[test]
fn test_find_with_options_matches_builder() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    let options = FindOptions::new()
        .with_sort("name", SortOrder::Descending)
        .with_limit(2);
    let found = users.find_with_options("age > 20", options).unwrap();
    assert_eq!(names(&found), vec!["Eve", "Dave"]);
}

#[test]
fn test_count_distinct_and_first() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    assert_eq!(users.query().filter("city is Oslo").count().unwrap(), 2);
    assert_eq!(users.count_distinct("city").unwrap(), 3);

    let cities = users.query().filter("age > 20").distinct("city").unwrap();
    assert_eq!(cities.len(), 3);
    assert!(cities.contains(&json!("Tromso")));
    assert!(users.query().filter("age > 100").first().unwrap().is_none());
}

#[test]
fn test_typed_results() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        name: String,
        age: u32,
    }

    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    let young: Vec<User> = users.find_typed("age < 26").unwrap();
    assert_eq!(young.len(), 2);

    let alice: User = users.find_by_id_typed(&DocumentId::Int(1)).unwrap().unwrap();
    assert_eq!(
        alice,
        User {
            name: "Alice".into(),
            age: 30
        }
    );
}

// =============================================================================
// INDEXES
// =============================================================================

#[test]
fn test_index_used_and_results_unchanged() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    let scan = users.find("age > 20 and age <= 35").unwrap();

    let name = users.create_index("age", false).unwrap();
    assert_eq!(name, "users_age");

    let plan = users.query().filter("age > 20 and age <= 35").explain().unwrap();
    assert!(matches!(plan, QueryPlan::IndexRange { ref index, .. } if index == "users_age"));
    assert_eq!(users.find("age > 20 and age <= 35").unwrap(), scan);

    let plan = users.query().filter("age is 30").explain().unwrap();
    assert!(matches!(plan, QueryPlan::IndexEquality { .. }));
    assert_eq!(
        users.query().filter("age is 30 or age is 17").explain().unwrap(),
        QueryPlan::FullScan
    );
}

#[test]
fn test_index_tracks_updates_and_deletes() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    users.create_index("city", false).unwrap();

    users
        .update_by_id(&DocumentId::Int(1), &json!({"city": "Bergen"}))
        .unwrap();
    users.delete_by_id(&DocumentId::Int(5)).unwrap();

    assert_eq!(names(&users.find("city is Oslo").unwrap()), vec!["Carol"]);
    let bergen = users
        .query()
        .filter("city is Bergen")
        .sort_by("name", SortOrder::Ascending)
        .all()
        .unwrap();
    assert_eq!(names(&bergen), vec!["Alice", "Bob"]);
}

#[test]
fn test_index_sees_pending_writes() {
    let (_dir, db) = seeded_db();
    db.collection("users").unwrap().create_index("city", false).unwrap();

    let mut tx = db.begin().unwrap();
    tx.insert("users", json!({"name": "Nils", "city": "Oslo"})).unwrap();
    tx.update_by_id("users", &DocumentId::Int(1), &json!({"city": "Bodo"}))
        .unwrap();
    let oslo = tx
        .query("users")
        .filter("city is Oslo")
        .sort_by("name", SortOrder::Ascending)
        .all()
        .unwrap();
    assert_eq!(names(&oslo), vec!["Carol", "Nils"]);
}

#[test]
fn test_unique_index() {
    let (_dir, db) = open_db();
    let accounts = db.collection("accounts").unwrap();
    accounts.create_index("email", true).unwrap();
    accounts.insert(json!({"email": "a@x.io"})).unwrap();

    let err = accounts.insert(json!({"email": "a@x.io"})).unwrap_err();
    assert!(matches!(err, DocVaultError::UniqueViolation { ref index, .. } if index == "accounts_email"));
    assert_eq!(err.kind(), ErrorKind::Constraint);

    // documents without the key never collide
    accounts.insert(json!({"name": "no email"})).unwrap();
    accounts.insert(json!({"name": "null email", "email": null})).unwrap();
    accounts.insert(json!({"name": "also null", "email": null})).unwrap();
    assert_eq!(accounts.count().unwrap(), 4);

    // freeing a key makes it available in the same transaction
    let mut tx = db.begin().unwrap();
    tx.delete("accounts", "email is \"a@x.io\"").unwrap();
    tx.insert("accounts", json!({"email": "a@x.io", "v": 2})).unwrap();
    tx.commit().unwrap();
}

#[test]
fn test_unique_index_rejected_on_duplicates() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    let err = users.create_index("city", true).unwrap_err();
    assert!(matches!(err, DocVaultError::UniqueViolation { .. }));
    assert!(users.list_indexes().unwrap().is_empty());
}

#[test]
fn test_compound_index_and_listing() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    let name = users.create_compound_index(&["city", "age"], false).unwrap();
    assert_eq!(name, "users_city_age");

    let plan = users
        .query()
        .filter("city is Oslo and age is 42")
        .explain()
        .unwrap();
    assert!(matches!(plan, QueryPlan::IndexEquality { ref fields, .. } if fields.len() == 2));
    assert_eq!(names(&users.find("city is Oslo and age is 42").unwrap()), vec!["Carol"]);

    let indexes = users.list_indexes().unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].fields, vec!["city", "age"]);
    assert_eq!(indexes[0].kind, IndexKind::Compound);

    assert!(matches!(
        users.create_compound_index(&["city", "age"], false),
        Err(DocVaultError::IndexExists(_))
    ));
    users.drop_index(&name).unwrap();
    assert!(matches!(users.drop_index(&name), Err(DocVaultError::IndexNotFound(_))));
}

#[test]
fn test_create_index_with_definition() {
    let (_dir, db) = seeded_db();
    db.create_index("users", IndexDefinition::single("by_name", "name", true))
        .unwrap();
    let plan = db
        .collection("users")
        .unwrap()
        .query()
        .filter("name is Eve")
        .explain()
        .unwrap();
    assert_eq!(plan.index_name(), Some("by_name"));
}

// =============================================================================
// FULL-TEXT SEARCH
// =============================================================================

fn articles() -> (tempfile::TempDir, docvault_core::Database) {
    let (dir, db) = open_db();
    let articles = db.collection("articles").unwrap();
    articles
        .insert_many(vec![
            json!({"_id": 1, "title": "Rust ownership", "body": "Borrowing and ownership in Rust"}),
            json!({"_id": 2, "title": "Python tips", "body": "Generators and decorators"}),
            json!({"_id": 3, "title": "Systems programming", "body": "Rust and C compared"}),
        ])
        .unwrap();
    articles.create_text_index(&["title", "body"]).unwrap();
    (dir, db)
}

#[test]
fn test_text_search_ranks_by_relevance() {
    let (_dir, db) = articles();
    let articles = db.collection("articles").unwrap();

    let hits = articles.search("rust").unwrap();
    let ids: Vec<_> = hits.iter().map(|h| h.doc_id.clone()).collect();
    assert_eq!(ids, vec![DocumentId::Int(1), DocumentId::Int(3)]);
    assert!(hits[0].score > hits[1].score);

    let all = articles.search("rust ownership").unwrap();
    assert_eq!(all.len(), 1);
    let any = articles.search_any("rust generators").unwrap();
    assert_eq!(any.len(), 3);
    assert!(articles.search("").unwrap().is_empty());
}

#[test]
fn test_text_search_follows_writes() {
    let (_dir, db) = articles();
    let articles = db.collection("articles").unwrap();
    articles.delete_by_id(&DocumentId::Int(1)).unwrap();
    articles
        .update_by_id(&DocumentId::Int(2), &json!({"body": "Rust bindings for Python"}))
        .unwrap();

    let ids: Vec<_> = articles
        .search("rust")
        .unwrap()
        .into_iter()
        .map(|h| h.doc_id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&DocumentId::Int(2)));
    assert!(!ids.contains(&DocumentId::Int(1)));
}

#[test]
fn test_text_search_inside_transaction() {
    let (_dir, db) = articles();
    let mut tx = db.begin().unwrap();
    tx.insert("articles", json!({"_id": 4, "title": "Rust async", "body": "Futures"}))
        .unwrap();
    tx.delete_by_id("articles", &DocumentId::Int(3)).unwrap();

    let ids: Vec<_> = tx
        .search("articles", "rust")
        .unwrap()
        .into_iter()
        .map(|h| h.doc_id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&DocumentId::Int(4)));
    assert!(!ids.contains(&DocumentId::Int(3)));

    // other snapshots are unaffected
    let committed = db.collection("articles").unwrap().search("rust").unwrap();
    assert_eq!(committed.len(), 2);
    assert!(committed.iter().all(|h| h.score > 0.0));
}

#[test]
fn test_search_without_text_index() {
    let (_dir, db) = seeded_db();
    let err = db.collection("users").unwrap().search("alice").unwrap_err();
    assert!(matches!(err, DocVaultError::IndexNotFound(_)));
}

#[test]
fn test_second_text_index_rejected() {
    let (_dir, db) = articles();
    let articles = db.collection("articles").unwrap();
    let err = articles.create_text_index(&["title"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(articles.list_indexes().unwrap().len(), 1);

    articles.drop_index("articles_title_body_text").unwrap();
    articles.create_text_index(&["body"]).unwrap();
    assert_eq!(articles.search("decorators").unwrap().len(), 1);
}
