//! Document pointers
//!
//! A `DocumentPointer` is the in-memory record of one document: identity,
//! current revision, deletion state and the location of its serialized
//! content. The document directory owns pointers; indexes refer to documents
//! by `DocumentId` and resolve pointers through the directory.

use crate::datafile::MarkerLocation;
use chrono::{DateTime, Utc};
use shoal_core::{DocumentId, EdgeEndpoints, RevisionId};

/// Tombstone recorded when a document is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deletion {
    /// Revision of the deletion
    pub rid: RevisionId,
    /// Wall-clock time of the deletion
    pub at: DateTime<Utc>,
}

/// In-memory handle to a stored document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPointer {
    /// Document identifier
    pub did: DocumentId,
    /// Revision of the stored content
    pub rid: RevisionId,
    /// Set once the document is deleted
    pub deletion: Option<Deletion>,
    /// Where the content marker lives
    pub location: MarkerLocation,
    /// Endpoints of an edge document
    pub edge: Option<EdgeEndpoints>,
}

impl DocumentPointer {
    /// Pointer to a live document
    pub fn new(
        did: DocumentId,
        rid: RevisionId,
        location: MarkerLocation,
        edge: Option<EdgeEndpoints>,
    ) -> Self {
        Self {
            did,
            rid,
            deletion: None,
            location,
            edge,
        }
    }

    /// Whether the document is deleted
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }

    /// Newest revision that touched the document, deletion included
    pub fn last_revision(&self) -> RevisionId {
        match self.deletion {
            Some(d) => d.rid.max(self.rid),
            None => self.rid,
        }
    }
}
