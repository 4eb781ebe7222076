//! shoal - embedded document store
//!
//! Documents live in append-only datafiles per collection. Each collection
//! keeps an in-memory directory of its documents plus secondary indexes
//! (hash, skiplist, bitmask, geo, edge) that can be queried concurrently.
//!
//! # Quick Start
//!
//! ```ignore
//! use serde_json::json;
//! use shoaldb::{CollectionOptions, Database, IndexDefinition, IndexOperator, Window};
//!
//! let db = Database::open("./data")?;
//! let users = db.create_collection("users", CollectionOptions::default())?;
//!
//! let guard = users.use_collection()?;
//! let (age, _) = guard.ensure_index(IndexDefinition::skiplist(["age"], false))?;
//! guard.insert(json!({"name": "ann", "age": 31}))?;
//!
//! let adults = guard.by_operator(age.id, &IndexOperator::ge([18i64]), Window::all())?;
//! ```
//!
//! # Architecture
//!
//! The public API is the engine's: [`Database`] owns the collection
//! registry, a [`Collection`] hands out guards to its loaded state, and
//! queries run against a guard. Storage internals are not re-exported.

pub use shoal_engine::*;
