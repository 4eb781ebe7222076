//! Property tests for the document directory and barrier-protected reclamation
//!
//! These tests drive the storage structures with random operation sequences
//! and compare against a simple model:
//! - DocumentDirectory against a HashMap of live/tombstoned ids
//! - random_live never returns a tombstoned document
//! - compaction source files survive until every older barrier is released

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use shoal_core::{DatafileId, DocumentId, RevisionId, TickGenerator};
use shoal_storage::{
    BarrierRegistry, Compactor, DatafileOptions, DatafileSet, Deletion, DocumentDirectory,
    DocumentMarker, DocumentPointer, Marker, MarkerLocation,
};

// ============================================================================
// Helper Functions
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Insert(u64),
    Remove(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..200).prop_map(Op::Insert),
        (0u64..200).prop_map(Op::Remove),
    ]
}

fn pointer(did: u64) -> DocumentPointer {
    DocumentPointer::new(
        DocumentId(did),
        RevisionId(did + 1),
        MarkerLocation {
            fid: DatafileId(1),
            offset: did * 10,
            size: 10,
        },
        None,
    )
}

// ============================================================================
// Directory model tests
// ============================================================================

proptest! {
    #[test]
    fn prop_directory_matches_model(ops in prop::collection::vec(op_strategy(), 1..400)) {
        let mut dir = DocumentDirectory::new();
        // did -> is_live
        let mut model: HashMap<u64, bool> = HashMap::new();

        for op in ops {
            match op {
                Op::Insert(did) => {
                    let result = dir.insert(pointer(did));
                    if model.contains_key(&did) {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(did, true);
                    }
                }
                Op::Remove(did) => {
                    let deletion = Deletion { rid: RevisionId(10_000 + did), at: Utc::now() };
                    let result = dir.remove(DocumentId(did), deletion);
                    match model.get_mut(&did) {
                        Some(live) if *live => {
                            prop_assert!(result.is_ok());
                            *live = false;
                        }
                        _ => prop_assert!(result.is_err()),
                    }
                }
            }
        }

        for (did, live) in &model {
            let found = dir.lookup(DocumentId(*did));
            prop_assert!(found.is_some());
            prop_assert_eq!(found.map(|p| p.is_deleted()), Some(!live));
            prop_assert_eq!(dir.lookup_live(DocumentId(*did)).is_some(), *live);
        }
        let live_count = model.values().filter(|l| **l).count();
        prop_assert_eq!(dir.len(), live_count);
        prop_assert_eq!(dir.iter_live().count(), live_count);
        prop_assert_eq!(dir.slot_count(), model.len());
    }

    #[test]
    fn prop_random_live_only_returns_live(
        dids in prop::collection::hash_set(0u64..500, 1..100),
        remove_mask in prop::collection::vec(any::<bool>(), 100),
        seed in any::<u64>(),
    ) {
        let mut dir = DocumentDirectory::new();
        for did in &dids {
            dir.insert(pointer(*did)).unwrap();
        }
        for (did, remove) in dids.iter().zip(remove_mask.iter()) {
            if *remove {
                dir.remove(DocumentId(*did), Deletion { rid: RevisionId(1), at: Utc::now() }).unwrap();
            }
        }

        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..10 {
            match dir.random_live(&mut rng) {
                Some(p) => prop_assert!(!p.is_deleted()),
                None => prop_assert!(dir.is_empty()),
            }
        }
    }

    #[test]
    fn prop_purge_keeps_live_entries(dids in prop::collection::hash_set(0u64..1000, 1..200)) {
        let mut dir = DocumentDirectory::new();
        for did in &dids {
            dir.insert(pointer(*did)).unwrap();
        }
        for did in dids.iter().filter(|d| *d % 3 == 0) {
            dir.remove(DocumentId(*did), Deletion { rid: RevisionId(1), at: Utc::now() }).unwrap();
        }
        dir.purge_tombstones().unwrap();
        for did in &dids {
            prop_assert_eq!(dir.lookup(DocumentId(*did)).is_some(), did % 3 != 0);
        }
    }
}

// ============================================================================
// Barrier and compaction
// ============================================================================

#[test]
fn test_compaction_waits_for_reader_barrier() {
    let dir = tempfile::tempdir().unwrap();
    let files = Arc::new(DatafileSet::create(
        dir.path(),
        DatafileOptions {
            journal_size: 300,
            wait_for_sync: false,
        },
        Arc::new(TickGenerator::default()),
    ));
    let barriers = BarrierRegistry::new("people");

    let mut locations = Vec::new();
    for did in 1..=10u64 {
        let marker = Marker::Document(
            DocumentMarker::new(DocumentId(did), RevisionId(did), None, &json!({"n": did}))
                .unwrap(),
        );
        locations.push(files.append(&marker).unwrap());
    }
    let first_fid = locations[0].fid;
    assert_ne!(files.journal_id(), Some(first_fid));

    // A reader pins the current datafiles.
    let reader = barriers.acquire();
    let pinned = locations[0];

    let compactor = Compactor::new(0.0, true);
    let outcome = compactor
        .compact(&files, first_fid, |m| m.marker.did().as_u64() % 2 == 0)
        .unwrap();
    compactor.retire(&files, &barriers, outcome.source);

    // The reader can still resolve its old location.
    assert_eq!(files.read(pinned).unwrap().did(), DocumentId(1));
    assert_eq!(files.retired_count(), 1);
    assert_eq!(barriers.pending_len(), 1);

    drop(reader);
    assert_eq!(files.retired_count(), 0);
    assert!(files.read(pinned).is_err());
}
