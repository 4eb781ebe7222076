//! Query scenarios against a database
//!
//! Every test goes through `Database` → `Collection` → guard, the way an
//! embedding application would.

use serde_json::{json, Value};
use shoal_engine::{
    CollectionOptions, Database, DocumentId, EdgeDirection, Error, IndexDefinition, IndexKind,
    IndexOperator, QueryResult, ShoalConfig, Window, CONFIG_FILE_NAME,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Helper Functions
// ============================================================================

fn open(dir: &Path) -> Arc<Database> {
    let config = ShoalConfig {
        maintenance_interval_ms: 0,
        ..Default::default()
    };
    config.write_to_file(&dir.join(CONFIG_FILE_NAME)).unwrap();
    Database::open(dir).unwrap()
}

fn ids(result: &QueryResult) -> Vec<DocumentId> {
    let mut ids: Vec<DocumentId> = result.documents.iter().map(|d| d.did).collect();
    ids.sort();
    ids
}

fn field(result: &QueryResult, name: &str) -> Vec<Value> {
    result.documents.iter().map(|d| d.body[name].clone()).collect()
}

// ============================================================================
// Skiplist
// ============================================================================

#[test]
fn test_skiplist_operator_scenario() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let c = db.create_collection("points", CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    let (def, created) = guard.ensure_index(IndexDefinition::skiplist(["x"], false)).unwrap();
    assert!(created);

    let d1 = guard.insert(json!({"x": 5})).unwrap().did;
    let d2 = guard.insert(json!({"x": 9})).unwrap().did;
    let d3 = guard.insert(json!({"x": 5})).unwrap().did;

    let eq = guard
        .by_operator(def.id, &IndexOperator::eq([5i64]), Window::all())
        .unwrap();
    assert_eq!(ids(&eq), vec![d1, d3]);

    let ge = guard
        .by_operator(def.id, &IndexOperator::ge([6i64]), Window::all())
        .unwrap();
    assert_eq!(ids(&ge), vec![d2]);

    let range = IndexOperator::ge([5i64]).and(IndexOperator::lt([9i64]));
    let both = guard.by_operator(def.id, &range, Window::all()).unwrap();
    assert_eq!(ids(&both), vec![d1, d3]);

    let not = guard
        .by_operator(def.id, &!IndexOperator::eq([5i64]), Window::all())
        .unwrap();
    assert_eq!(ids(&not), vec![d2]);
}

#[test]
fn test_skip_limit_over_sorted_matches() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let c = db.create_collection("ranked", CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    let (def, _) = guard.ensure_index(IndexDefinition::skiplist(["rank"], false)).unwrap();
    for rank in [7, 3, 9, 1, 5, 8, 2] {
        guard.insert(json!({ "rank": rank })).unwrap();
    }

    let gt = IndexOperator::gt([1i64]);
    let page = guard.by_operator(def.id, &gt, Window::new(1, Some(3))).unwrap();
    assert_eq!(page.total, 6);
    assert_eq!(page.count, 3);
    assert_eq!(field(&page, "rank"), vec![json!(3), json!(5), json!(7)]);

    let tail = guard.by_operator(def.id, &gt, Window::new(-2, None)).unwrap();
    assert_eq!(field(&tail, "rank"), vec![json!(8), json!(9)]);

    let cursor = guard
        .cursor_by_operator(def.id, &gt, Window::new(0, Some(2)))
        .unwrap();
    assert_eq!(cursor.total(), 6);
    assert_eq!(cursor.remaining(), 2);
}

// ============================================================================
// Primary
// ============================================================================

#[test]
fn test_primary_index_answers_operators() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let c = db.create_collection("keyed", CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    let a = guard.insert(json!({"n": 1})).unwrap();
    let b = guard.insert(json!({"n": 2})).unwrap();

    let primary = guard.indexes()[0].clone();
    assert_eq!(primary.kind, IndexKind::Primary);

    let hit = guard
        .by_operator(primary.id, &IndexOperator::eq([a.did]), Window::all())
        .unwrap();
    assert_eq!(ids(&hit), vec![a.did]);

    let handle = b.handle.to_string();
    let either = IndexOperator::eq([a.did]).or(IndexOperator::eq([handle.as_str()]));
    let both = guard.by_operator(primary.id, &either, Window::all()).unwrap();
    assert_eq!(ids(&both), vec![a.did, b.did]);

    guard.remove(a.did).unwrap();
    let gone = guard
        .by_operator(primary.id, &IndexOperator::eq([a.did]), Window::all())
        .unwrap();
    assert_eq!(gone.total, 0);
    let rest = guard
        .cursor_by_operator(primary.id, &IndexOperator::ne([a.did]), Window::all())
        .unwrap();
    assert_eq!(rest.total(), 1);

    assert!(matches!(
        guard.by_operator(primary.id, &IndexOperator::lt([5i64]), Window::all()),
        Err(Error::Unsupported { .. })
    ));
    assert!(matches!(
        guard.by_example_hash(primary.id, &json!({"n": 2}), Window::all()),
        Err(Error::BadParameter(_))
    ));
}

// ============================================================================
// Hash
// ============================================================================

#[test]
fn test_unique_hash_index_creation_and_writes() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let c = db.create_collection("accounts", CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    guard.insert(json!({"user": "ann", "region": "eu"})).unwrap();
    guard.insert(json!({"user": "bob", "region": "eu"})).unwrap();

    // Existing duplicates prevent the unique index; nothing is left behind.
    let err = guard
        .ensure_index(IndexDefinition::hash(["region"], true))
        .unwrap_err();
    assert!(matches!(err, Error::UniqueConstraintViolated { .. }));
    assert_eq!(guard.indexes().len(), 1);

    let (def, _) = guard.ensure_index(IndexDefinition::hash(["user"], true)).unwrap();
    assert!(matches!(
        guard.insert(json!({"user": "ann"})),
        Err(Error::UniqueConstraintViolated { .. })
    ));
    // Documents without the attribute are not constrained.
    guard.insert(json!({"region": "us"})).unwrap();
    guard.insert(json!({"region": "us"})).unwrap();
    assert_eq!(guard.count(), 4);

    let bob = guard
        .by_example_hash(def.id, &json!({"user": "bob", "ignored": 1}), Window::all())
        .unwrap();
    assert_eq!(field(&bob, "user"), vec![json!("bob")]);
}

#[test]
fn test_example_scan_and_hash_agree() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let c = db.create_collection("mixed", CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    for i in 0..30 {
        guard
            .insert(json!({"a": i % 3, "b": {"c": i % 2}}))
            .unwrap();
    }
    let (def, _) = guard.ensure_index(IndexDefinition::hash(["a", "b.c"], false)).unwrap();

    let example = json!({"a": 1, "b.c": 0});
    let scanned = guard.by_example(&example, Window::all()).unwrap();
    let indexed = guard.by_example_hash(def.id, &example, Window::all()).unwrap();
    assert_eq!(scanned.total, 5);
    assert_eq!(ids(&scanned), ids(&indexed));
}

#[test]
fn test_dotted_keys_are_not_paths() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let c = db.create_collection("dotted", CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    let nested = guard.insert(json!({"a": {"b": 1}})).unwrap().did;
    guard.insert(json!({"a.b": 1})).unwrap();
    let (def, _) = guard.ensure_index(IndexDefinition::hash(["a.b"], false)).unwrap();

    for example in [json!({"a.b": 1}), json!({"a": {"b": 1}})] {
        let indexed = guard.by_example_hash(def.id, &example, Window::all()).unwrap();
        assert_eq!(ids(&indexed), vec![nested]);
    }
    let scanned = guard.by_example(&json!({"a.b": 1}), Window::all()).unwrap();
    assert_eq!(ids(&scanned), vec![nested]);
}

// ============================================================================
// Bitmask
// ============================================================================

#[test]
fn test_bitmask_examples_and_conditions() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let c = db.create_collection("shirts", CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    let (def, _) = guard
        .ensure_index(IndexDefinition::bitmask(
            [
                ("color", vec![json!("red"), json!("green"), json!("blue")]),
                ("size", vec![json!(1), json!(2), json!(3)]),
            ],
            false,
        ))
        .unwrap();

    guard.insert(json!({"color": "red", "size": 1})).unwrap();
    guard.insert(json!({"color": "green", "size": 2})).unwrap();
    guard.insert(json!({"color": "blue", "size": 1})).unwrap();
    guard.insert(json!({"color": "red", "size": 3})).unwrap();

    let red = guard
        .by_example_bitmask(def.id, &json!({"color": "red"}), Window::all())
        .unwrap();
    assert_eq!(red.total, 2);

    let red_or_blue = guard
        .by_example_bitmask(def.id, &json!({"color": ["red", "blue"], "size": 1}), Window::all())
        .unwrap();
    assert_eq!(red_or_blue.total, 2);

    let not_size_one = guard
        .by_condition_bitmask(def.id, &json!({"not": {"==": {"size": 1}}}), Window::all())
        .unwrap();
    assert_eq!(not_size_one.total, 2);

    // Values outside the declared domain are rejected without a write.
    assert!(guard.insert(json!({"color": "black", "size": 1})).is_err());
    assert_eq!(guard.count(), 4);
}

// ============================================================================
// Geo and edges
// ============================================================================

#[test]
fn test_geo_queries_through_database() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let c = db.create_collection("places", CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    let (def, _) = guard
        .ensure_index(IndexDefinition::geo_location("loc", false))
        .unwrap();
    guard.insert(json!({"name": "cologne", "loc": [50.94, 6.96]})).unwrap();
    guard.insert(json!({"name": "bonn", "loc": [50.73, 7.10]})).unwrap();
    guard.insert(json!({"name": "paris", "loc": [48.86, 2.35]})).unwrap();

    let near = guard.near(def.id, 50.94, 6.96, 2).unwrap();
    let names: Vec<&str> = near
        .documents
        .iter()
        .filter_map(|l| l.document.body["name"].as_str())
        .collect();
    assert_eq!(names, vec!["cologne", "bonn"]);
    assert!(near.documents[1].distance > 20_000.0);
    assert!(near.documents[1].distance < 30_000.0);

    let within = guard.within(def.id, 50.94, 6.96, 100_000.0).unwrap();
    assert_eq!(within.count, 2);

    // Geo indexes do not answer comparison operators.
    assert!(guard
        .by_operator(def.id, &IndexOperator::eq([1i64]), Window::all())
        .is_err());
}

#[test]
fn test_edge_collection_round_trip() {
    let dir = TempDir::new().unwrap();
    let (knows_cid, bob) = {
        let db = open(dir.path());
        let people = db.create_collection("people", CollectionOptions::default()).unwrap();
        let knows = db.create_collection("knows", CollectionOptions::edge()).unwrap();

        let (alice, bob, carol) = {
            let guard = people.use_collection().unwrap();
            (
                guard.insert(json!({"name": "alice"})).unwrap().handle,
                guard.insert(json!({"name": "bob"})).unwrap().handle,
                guard.insert(json!({"name": "carol"})).unwrap().handle,
            )
        };
        let guard = knows.use_collection().unwrap();
        guard
            .insert(json!({"_from": alice.to_string(), "_to": bob.to_string()}))
            .unwrap();
        guard
            .insert(json!({"_from": bob.to_string(), "_to": carol.to_string()}))
            .unwrap();
        assert_eq!(guard.out_edges(&json!(bob.to_string())).unwrap().count, 1);
        guard.release();
        db.close().unwrap();
        (knows.cid(), bob)
    };

    let db = open(dir.path());
    let knows = db.collection_by_id(knows_cid).unwrap();
    let guard = knows.use_collection().unwrap();
    let bob = json!(bob.to_string());
    assert_eq!(guard.in_edges(&bob).unwrap().count, 1);
    assert_eq!(guard.edges(&bob, EdgeDirection::Any).unwrap().count, 2);
}
