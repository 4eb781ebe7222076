//! Core types for shoal
//!
//! This crate defines the foundational types used throughout the system:
//! - Identifiers: CollectionId, DocumentId, RevisionId, DatafileId, IndexId
//! - TickGenerator: database-wide monotonic identifier source
//! - CollectionStatus / CollectionType / EdgeDirection / DocumentHandle
//! - IndexValue / IndexKey: comparable attribute values with an absent sentinel
//! - Shaper: attribute path registry
//! - CollectionName: validated collection names
//! - IndexDefinition: persisted index descriptions
//! - Error: error taxonomy shared by every layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection_name;
pub mod error;
pub mod index_def;
pub mod shaper;
pub mod types;
pub mod value;

pub use collection_name::{CollectionName, CollectionNameError, MAX_COLLECTION_NAME_LENGTH};
pub use error::{Error, Result};
pub use index_def::{BitmaskOptions, IndexDefinition, IndexKind};
pub use shaper::{walk_path, AttributePathId, Shaper};
pub use types::{
    CollectionId, CollectionStatus, CollectionType, DatafileId, DocumentHandle, DocumentId,
    EdgeDirection, EdgeEndpoints, IndexId, RevisionId, TickGenerator, HANDLE_SEPARATOR,
};
pub use value::{render_key, IndexKey, IndexValue};
