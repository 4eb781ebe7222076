//! Lazily materialized query results

use crate::document_collection::{read_document, Document};
use shoal_core::{CollectionId, Result};
use shoal_index::Page;
use shoal_storage::{Barrier, DatafileSet, DocumentPointer};
use std::sync::Arc;
use std::vec::IntoIter;

/// Iterator over the documents of a query
///
/// Pointers are selected when the cursor is created; bodies are read one
/// at a time. The cursor holds a barrier for its whole lifetime, which
/// keeps compacted datafiles readable and postpones a requested unload of
/// the collection until it is dropped.
pub struct DocumentCursor {
    barrier: Barrier,
    files: Arc<DatafileSet>,
    cid: CollectionId,
    pending: IntoIter<DocumentPointer>,
    total: usize,
}

impl DocumentCursor {
    pub(crate) fn new(
        barrier: Barrier,
        files: Arc<DatafileSet>,
        cid: CollectionId,
        page: Page<DocumentPointer>,
    ) -> Self {
        Self {
            barrier,
            files,
            cid,
            pending: page.items.into_iter(),
            total: page.total,
        }
    }

    /// Matches before skip/limit
    pub fn total(&self) -> usize {
        self.total
    }

    /// Documents not yet returned
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Epoch of the barrier held by this cursor
    pub fn epoch(&self) -> u64 {
        self.barrier.epoch()
    }
}

impl Iterator for DocumentCursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.pending.next()?;
        Some(read_document(&self.files, self.cid, &ptr))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}

impl std::fmt::Debug for DocumentCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCursor")
            .field("cid", &self.cid)
            .field("epoch", &self.barrier.epoch())
            .field("remaining", &self.pending.len())
            .field("total", &self.total)
            .finish()
    }
}
