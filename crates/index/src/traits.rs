//! Secondary index contract
//!
//! Every index variant stores `DocumentId` back-references only; the
//! document directory owns the pointers. Mutation goes through `&mut self`,
//! so a collection serializes writers and lets lookups share the index.

use crate::edge::EdgeIndex;
use crate::eval::Evaluate;
use crate::geo::GeoIndex;
use serde_json::Value as JsonValue;
use shoal_core::{DocumentId, EdgeEndpoints, IndexDefinition, IndexId, IndexKind, Result};

/// Document as seen by an index
#[derive(Debug, Clone, Copy)]
pub struct IndexedDocument<'a> {
    /// Document identifier
    pub did: DocumentId,
    /// Document body
    pub body: &'a JsonValue,
    /// Endpoints, for edge documents
    pub edge: Option<&'a EdgeEndpoints>,
}

impl<'a> IndexedDocument<'a> {
    /// Plain document
    pub fn new(did: DocumentId, body: &'a JsonValue) -> Self {
        Self {
            did,
            body,
            edge: None,
        }
    }

    /// Edge document
    pub fn with_edge(did: DocumentId, body: &'a JsonValue, edge: &'a EdgeEndpoints) -> Self {
        Self {
            did,
            body,
            edge: Some(edge),
        }
    }
}

/// A secondary index
pub trait SecondaryIndex: Evaluate + Send + Sync {
    /// Persisted definition
    fn definition(&self) -> &IndexDefinition;

    /// Identifier
    fn id(&self) -> IndexId {
        self.definition().id
    }

    /// Variant
    fn kind(&self) -> IndexKind {
        self.definition().kind
    }

    /// Add a document
    ///
    /// # Errors
    ///
    /// `UniqueConstraintViolated` for a duplicate key in a unique index and
    /// `BadParameter` for values the index cannot hold. A failed insert leaves
    /// the index unchanged.
    fn insert(&mut self, doc: &IndexedDocument<'_>) -> Result<()>;

    /// Remove a document previously inserted with the same body
    fn remove(&mut self, doc: &IndexedDocument<'_>);

    /// Number of indexed documents
    fn len(&self) -> usize;

    /// Whether no document is indexed
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geo lookups, for geo indexes
    fn as_geo(&self) -> Option<&GeoIndex> {
        None
    }

    /// Adjacency lookups, for edge indexes
    fn as_edge(&self) -> Option<&EdgeIndex> {
        None
    }
}
