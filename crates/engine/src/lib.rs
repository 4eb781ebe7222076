//! Database engine for shoal
//!
//! This crate ties storage and indexes together:
//! - Database: directory lock, configuration, collection registry, maintenance
//! - Collection: lifecycle state machine (NEW_BORN → LOADED → UNLOADING → UNLOADED)
//! - DocumentCollection: loaded collection with write path and index management
//! - query / cursor: simple queries with skip/limit and lazy cursors
//! - primary: EQ/NE lookups by document id over the directory
//! - ShoalConfig: `shoal.toml`
//! - parameters: persisted collection and index metadata

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod config;
pub mod cursor;
pub mod database;
pub mod document_collection;
mod maintenance;
pub mod parameters;
mod primary;
pub mod query;

pub use collection::{Collection, CollectionGuard};
pub use config::{ShoalConfig, CONFIG_FILE_NAME, MIN_JOURNAL_SIZE};
pub use cursor::DocumentCursor;
pub use database::{CollectionOptions, Database, MaintenanceReport};
pub use document_collection::{CollectionFigures, Document, DocumentCollection, DocumentMeta};
pub use parameters::CollectionParameters;
pub use query::{Located, QueryResult};

pub use shoal_core::{
    CollectionId, CollectionName, CollectionStatus, CollectionType, DocumentHandle, DocumentId,
    EdgeDirection, EdgeEndpoints, Error, IndexDefinition, IndexId, IndexKind, Result, RevisionId,
};
pub use shoal_index::{ComparisonOp, IndexOperator, Literal, Window};
