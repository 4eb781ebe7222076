//! Index lookup benchmarks
//!
//! ## Groups
//!
//! - `hash_lookup`: equality through a hash index vs. a full example scan
//! - `skiplist_range`: range operators with and without a window
//! - `insert`: write path cost as secondary indexes are added
//!
//! All data is generated from a fixed seed so baselines stay comparable.
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench index_lookup
//! cargo bench --bench index_lookup -- "skiplist_range"
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use shoaldb::{
    CollectionOptions, Database, IndexDefinition, IndexOperator, ShoalConfig, Window,
    CONFIG_FILE_NAME,
};
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// Constants and Configuration
// =============================================================================

/// Fixed seed for generated documents.
const BENCH_SEED: u64 = 0x5EED_CAFE;

const NUM_DOCS: usize = 10_000;

// =============================================================================
// Setup
// =============================================================================

fn open_db(dir: &TempDir) -> Arc<Database> {
    let config = ShoalConfig {
        maintenance_interval_ms: 0,
        ..Default::default()
    };
    config
        .write_to_file(&dir.path().join(CONFIG_FILE_NAME))
        .unwrap();
    Database::open(dir.path()).unwrap()
}

fn populate(db: &Database, name: &str) {
    let c = db.create_collection(name, CollectionOptions::default()).unwrap();
    let guard = c.use_collection().unwrap();
    let mut rng = StdRng::seed_from_u64(BENCH_SEED);
    for i in 0..NUM_DOCS {
        guard
            .insert(json!({
                "user": format!("user_{:06}", i),
                "age": rng.gen_range(0..100),
                "score": rng.gen::<f64>(),
            }))
            .unwrap();
    }
}

// =============================================================================
// Hash
// =============================================================================

fn hash_lookup_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_lookup");
    group.throughput(Throughput::Elements(1));

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    populate(&db, "users");
    let users = db.collection("users").unwrap();
    let guard = users.use_collection().unwrap();
    let (def, _) = guard
        .ensure_index(IndexDefinition::hash(["user"], true))
        .unwrap();
    let example = json!({"user": format!("user_{:06}", NUM_DOCS / 2)});
    let miss = json!({"user": "nobody"});

    group.bench_function("hit", |b| {
        b.iter(|| black_box(guard.by_example_hash(def.id, &example, Window::all()).unwrap()));
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(guard.by_example_hash(def.id, &miss, Window::all()).unwrap()));
    });
    group.sample_size(10);
    group.bench_function("full_scan", |b| {
        b.iter(|| black_box(guard.by_example(&example, Window::all()).unwrap()));
    });
    group.finish();
}

// =============================================================================
// Skiplist
// =============================================================================

fn skiplist_range_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("skiplist_range");

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    populate(&db, "users");
    let users = db.collection("users").unwrap();
    let guard = users.use_collection().unwrap();
    let (def, _) = guard
        .ensure_index(IndexDefinition::skiplist(["age"], false))
        .unwrap();

    for width in [1i64, 10, 50] {
        let range = IndexOperator::ge([20i64]).and(IndexOperator::lt([20 + width]));
        group.bench_with_input(BenchmarkId::new("range", width), &range, |b, range| {
            b.iter(|| black_box(guard.by_operator(def.id, range, Window::all()).unwrap()));
        });
    }

    let wide = IndexOperator::ge([0i64]);
    group.bench_function("first_page", |b| {
        b.iter(|| {
            black_box(
                guard
                    .by_operator(def.id, &wide, Window::new(0, Some(20)))
                    .unwrap(),
            )
        });
    });
    group.finish();
}

// =============================================================================
// Write path
// =============================================================================

fn insert_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(1));

    for indexes in [0usize, 1, 3] {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let coll = db
            .create_collection("writes", CollectionOptions::default())
            .unwrap();
        let guard = coll.use_collection().unwrap();
        let definitions = [
            IndexDefinition::hash(["user"], false),
            IndexDefinition::skiplist(["age"], false),
            IndexDefinition::skiplist(["score"], false),
        ];
        for def in definitions.into_iter().take(indexes) {
            guard.ensure_index(def).unwrap();
        }

        let mut i = 0u64;
        group.bench_with_input(BenchmarkId::new("indexes", indexes), &indexes, |b, _| {
            b.iter(|| {
                i += 1;
                black_box(
                    guard
                        .insert(json!({"user": i, "age": i % 100, "score": i as f64 / 7.0}))
                        .unwrap(),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    hash_lookup_benchmarks,
    skiplist_range_benchmarks,
    insert_benchmarks
);
criterion_main!(benches);
