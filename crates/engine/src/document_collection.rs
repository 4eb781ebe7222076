//! In-memory structures of a loaded collection
//!
//! A `DocumentCollection` owns the open datafiles, the document directory
//! and the secondary indexes of one collection. It exists only while the
//! collection is LOADED.
//!
//! # Locking
//!
//! `contents` guards the directory and the indexes together:
//! - writers (insert/update/remove, index management, relocation after
//!   compaction) hold it exclusively, so a write is applied to the
//!   directory and every index before anyone can observe it;
//! - lookups hold it shared while evaluating and copying pointers out, and
//!   read document bodies afterwards under a barrier.
//!
//! # Load
//!
//! Markers are replayed in datafile id order. The revision decides which
//! marker wins for a document, so the order in which compaction output and
//! journals are replayed does not matter. Indexes are rebuilt from the
//! live documents afterwards.

use crate::parameters;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use shoal_core::{
    CollectionId, CollectionType, DatafileId, DocumentHandle, DocumentId, EdgeEndpoints, Error,
    IndexDefinition, IndexId, IndexKind, Result, RevisionId, Shaper, TickGenerator,
};
use shoal_index::{create_index, IndexedDocument, SecondaryIndex};
use shoal_storage::{
    Barrier, BarrierRegistry, Compactor, DatafileOptions, DatafileSet, Deletion, DeletionMarker,
    DocumentDirectory, DocumentMarker, DocumentPointer, Marker, ScannedMarker,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A stored document copied out of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document identifier
    pub did: DocumentId,
    /// Current revision
    pub rid: RevisionId,
    /// `"<cid>/<did>"` handle
    pub handle: DocumentHandle,
    /// Endpoints, for edge documents
    pub edge: Option<EdgeEndpoints>,
    /// Attributes
    pub body: JsonValue,
}

/// Identity of a written document revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentMeta {
    /// Document identifier
    pub did: DocumentId,
    /// Revision written
    pub rid: RevisionId,
    /// `"<cid>/<did>"` handle
    pub handle: DocumentHandle,
}

/// Size and state figures of a loaded collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionFigures {
    /// Live documents
    pub documents: usize,
    /// Deleted documents still occupying directory slots
    pub tombstones: usize,
    /// Readable datafiles, journal included
    pub datafiles: usize,
    /// Active journal
    pub journal: Option<DatafileId>,
    /// Superseded markers still on disk
    pub dead_markers: u64,
    /// Bytes of superseded markers
    pub dead_bytes: u64,
    /// Compacted files waiting for barriers to drain
    pub retired_files: usize,
    /// Secondary indexes
    pub indexes: usize,
}

/// Directory and indexes, guarded together
pub(crate) struct Contents {
    pub(crate) directory: DocumentDirectory,
    pub(crate) indexes: Vec<Box<dyn SecondaryIndex>>,
}

impl Contents {
    pub(crate) fn index(&self, iid: IndexId) -> Result<&dyn SecondaryIndex> {
        self.indexes
            .iter()
            .find(|index| index.id() == iid)
            .map(|index| index.as_ref())
            .ok_or_else(|| Error::not_found(format!("index {}", iid)))
    }
}

/// Everything a collection needs to load its files
pub(crate) struct LoadContext {
    pub(crate) cid: CollectionId,
    pub(crate) collection_type: CollectionType,
    pub(crate) dir: PathBuf,
    pub(crate) options: DatafileOptions,
    pub(crate) ticks: Arc<TickGenerator>,
    pub(crate) shaper: Arc<Shaper>,
    pub(crate) barriers: Arc<BarrierRegistry>,
    pub(crate) compactor: Compactor,
}

/// Loaded state of a collection
pub struct DocumentCollection {
    pub(crate) cid: CollectionId,
    pub(crate) collection_type: CollectionType,
    pub(crate) dir: PathBuf,
    pub(crate) files: Arc<DatafileSet>,
    pub(crate) shaper: Arc<Shaper>,
    pub(crate) ticks: Arc<TickGenerator>,
    pub(crate) barriers: Arc<BarrierRegistry>,
    pub(crate) compactor: Compactor,
    pub(crate) contents: RwLock<Contents>,
}

impl DocumentCollection {
    /// Open the datafiles of a collection and rebuild its in-memory state
    ///
    /// # Errors
    ///
    /// `Corrupted` for unreadable datafiles or metadata; I/O errors as they
    /// occur.
    pub(crate) fn load(ctx: LoadContext) -> Result<Self> {
        let files = Arc::new(DatafileSet::open(&ctx.dir, ctx.options, Arc::clone(&ctx.ticks))?);

        let mut directory = DocumentDirectory::new();
        let mut markers = 0usize;
        files.replay(|scanned| {
            markers += 1;
            apply_marker(&mut directory, &files, scanned)
        })?;

        let shaper = Arc::clone(&ctx.shaper);
        let mut definitions = parameters::load_indexes(&ctx.dir)?;
        if ctx.collection_type == CollectionType::Edge
            && !definitions.iter().any(|d| d.kind == IndexKind::Edge)
        {
            let definition = IndexDefinition::edge().with_id(IndexId(ctx.ticks.next()));
            parameters::save_index(&ctx.dir, &definition)?;
            definitions.insert(0, definition);
        }

        let mut indexes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            ctx.ticks.observe(definition.id.as_u64());
            indexes.push(create_index(definition, Arc::clone(&shaper))?);
        }
        for ptr in directory.iter_live() {
            let doc = read_document(&files, ctx.cid, ptr)?;
            insert_into_indexes(&mut indexes, &indexed(&doc.body, ptr.did, ptr.edge.as_ref()))?;
        }

        info!(
            target: "shoal::collection",
            cid = %ctx.cid,
            markers,
            documents = directory.len(),
            tombstones = directory.tombstone_count(),
            indexes = indexes.len(),
            "Loaded collection"
        );

        Ok(Self {
            cid: ctx.cid,
            collection_type: ctx.collection_type,
            dir: ctx.dir,
            files,
            shaper,
            ticks: ctx.ticks,
            barriers: ctx.barriers,
            compactor: ctx.compactor,
            contents: RwLock::new(Contents { directory, indexes }),
        })
    }

    /// Collection identifier
    pub fn cid(&self) -> CollectionId {
        self.cid
    }

    /// Document or edge collection
    pub fn collection_type(&self) -> CollectionType {
        self.collection_type
    }

    /// Collection directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Barrier registry of the collection
    pub fn barriers(&self) -> &Arc<BarrierRegistry> {
        &self.barriers
    }

    /// Pin the current datafiles until the returned barrier is dropped
    pub fn acquire_barrier(&self) -> Barrier {
        self.barriers.acquire()
    }

    /// Number of live documents
    pub fn count(&self) -> usize {
        self.contents.read().directory.len()
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Store a new document
    ///
    /// Documents of an edge collection must carry `_from` and `_to` handles.
    ///
    /// # Errors
    ///
    /// `BadParameter` for a non-object body or missing edge endpoints,
    /// `UniqueConstraintViolated` when a unique index rejects the document.
    /// On error nothing is stored.
    pub fn insert(&self, body: JsonValue) -> Result<DocumentMeta> {
        check_body(&body)?;
        let edge = self.endpoints(&body)?;

        let mut guard = self.contents.write();
        let contents = &mut *guard;
        let did = DocumentId(self.ticks.next());
        let rid = RevisionId(self.ticks.next());
        let marker = Marker::Document(DocumentMarker::new(did, rid, edge, &body)?);

        let entry = indexed(&body, did, edge.as_ref());
        insert_into_indexes(&mut contents.indexes, &entry)?;
        let location = match self.files.append(&marker) {
            Ok(location) => location,
            Err(e) => {
                remove_from_indexes(&mut contents.indexes, &entry);
                return Err(e);
            }
        };
        contents
            .directory
            .insert(DocumentPointer::new(did, rid, location, edge))?;

        debug!(target: "shoal::collection", cid = %self.cid, did = %did, rid = %rid, "Inserted document");
        Ok(self.meta(did, rid))
    }

    /// Replace the body of a live document
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or deleted documents, otherwise as
    /// [`DocumentCollection::insert`]. On error the previous revision stays
    /// current.
    pub fn update(&self, did: DocumentId, body: JsonValue) -> Result<DocumentMeta> {
        check_body(&body)?;
        let edge = self.endpoints(&body)?;

        let mut guard = self.contents.write();
        let contents = &mut *guard;
        let old = contents
            .directory
            .lookup_live(did)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("document {}", did)))?;
        let old_doc = read_document(&self.files, self.cid, &old)?;
        let rid = RevisionId(self.ticks.next());
        let marker = Marker::Document(DocumentMarker::new(did, rid, edge, &body)?);

        let old_entry = indexed(&old_doc.body, did, old.edge.as_ref());
        let new_entry = indexed(&body, did, edge.as_ref());
        remove_from_indexes(&mut contents.indexes, &old_entry);
        if let Err(e) = insert_into_indexes(&mut contents.indexes, &new_entry) {
            restore_indexes(&mut contents.indexes, &old_entry);
            return Err(e);
        }
        let location = match self.files.append(&marker) {
            Ok(location) => location,
            Err(e) => {
                remove_from_indexes(&mut contents.indexes, &new_entry);
                restore_indexes(&mut contents.indexes, &old_entry);
                return Err(e);
            }
        };
        contents
            .directory
            .update(DocumentPointer::new(did, rid, location, edge))?;
        self.files.mark_dead(old.location);

        debug!(target: "shoal::collection", cid = %self.cid, did = %did, rid = %rid, "Updated document");
        Ok(self.meta(did, rid))
    }

    /// Delete a live document
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or already deleted documents.
    pub fn remove(&self, did: DocumentId) -> Result<DocumentMeta> {
        let mut guard = self.contents.write();
        let contents = &mut *guard;
        let old = contents
            .directory
            .lookup_live(did)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("document {}", did)))?;
        let old_doc = read_document(&self.files, self.cid, &old)?;

        let deletion = Deletion {
            rid: RevisionId(self.ticks.next()),
            at: Utc::now(),
        };
        self.files.append(&Marker::Deletion(DeletionMarker {
            did,
            rid: deletion.rid,
            deleted_at: deletion.at,
        }))?;

        remove_from_indexes(
            &mut contents.indexes,
            &indexed(&old_doc.body, did, old.edge.as_ref()),
        );
        contents.directory.remove(did, deletion)?;
        self.files.mark_dead(old.location);

        debug!(target: "shoal::collection", cid = %self.cid, did = %did, "Removed document");
        Ok(self.meta(did, deletion.rid))
    }

    /// Read a live document
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or deleted documents.
    pub fn document(&self, did: DocumentId) -> Result<Document> {
        let _barrier = self.barriers.acquire();
        let ptr = self
            .contents
            .read()
            .directory
            .lookup_live(did)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("document {}", did)))?;
        read_document(&self.files, self.cid, &ptr)
    }

    fn meta(&self, did: DocumentId, rid: RevisionId) -> DocumentMeta {
        DocumentMeta {
            did,
            rid,
            handle: DocumentHandle::new(self.cid, did),
        }
    }

    fn endpoints(&self, body: &JsonValue) -> Result<Option<EdgeEndpoints>> {
        if self.collection_type == CollectionType::Document {
            return Ok(None);
        }
        let handle = |attribute: &str| {
            body.get(attribute)
                .and_then(JsonValue::as_str)
                .and_then(DocumentHandle::parse)
                .ok_or_else(|| {
                    Error::bad_parameter(format!(
                        "edge document needs a '{}' document handle",
                        attribute
                    ))
                })
        };
        Ok(Some(EdgeEndpoints {
            from: handle("_from")?,
            to: handle("_to")?,
        }))
    }

    // ========================================================================
    // Index management
    // ========================================================================

    /// Definitions of every index, the primary index first
    pub fn indexes(&self) -> Vec<IndexDefinition> {
        let contents = self.contents.read();
        std::iter::once(IndexDefinition::primary().with_id(IndexId::PRIMARY))
            .chain(contents.indexes.iter().map(|i| i.definition().clone()))
            .collect()
    }

    /// Return an equivalent existing index or build and persist a new one
    ///
    /// Returns the definition (with its id) and whether it was created.
    ///
    /// # Errors
    ///
    /// `BadParameter` for invalid or built-in definitions;
    /// `UniqueConstraintViolated` when existing documents collide in a new
    /// unique index. A failed creation leaves no trace.
    pub fn ensure_index(&self, definition: IndexDefinition) -> Result<(IndexDefinition, bool)> {
        definition.validate()?;
        if definition.kind.is_builtin() {
            return Err(Error::bad_parameter(format!(
                "{} index is created with the collection",
                definition.kind
            )));
        }

        let mut guard = self.contents.write();
        let contents = &mut *guard;
        if let Some(existing) = contents
            .indexes
            .iter()
            .find(|index| index.definition().is_equivalent(&definition))
        {
            return Ok((existing.definition().clone(), false));
        }

        let definition = definition.with_id(IndexId(self.ticks.next()));
        let mut index = create_index(definition, Arc::clone(&self.shaper))?;
        for ptr in contents.directory.iter_live() {
            let doc = read_document(&self.files, self.cid, ptr)?;
            index.insert(&indexed(&doc.body, ptr.did, ptr.edge.as_ref()))?;
        }
        parameters::save_index(&self.dir, index.definition())?;

        let created = index.definition().clone();
        info!(
            target: "shoal::collection",
            cid = %self.cid,
            iid = %created.id,
            kind = %created.kind,
            fields = ?created.fields,
            documents = index.len(),
            "Created index"
        );
        contents.indexes.push(index);
        Ok((created, true))
    }

    /// Drop a secondary index
    ///
    /// # Errors
    ///
    /// `BadParameter` for the primary and edge indexes, `NotFound` for
    /// unknown ids.
    pub fn drop_index(&self, iid: IndexId) -> Result<()> {
        if iid == IndexId::PRIMARY {
            return Err(Error::bad_parameter("the primary index cannot be dropped"));
        }
        let mut contents = self.contents.write();
        let position = contents
            .indexes
            .iter()
            .position(|index| index.id() == iid)
            .ok_or_else(|| Error::not_found(format!("index {}", iid)))?;
        if contents.indexes[position].kind() == IndexKind::Edge {
            return Err(Error::bad_parameter("the edge index cannot be dropped"));
        }
        parameters::remove_index(&self.dir, iid)?;
        contents.indexes.remove(position);
        info!(target: "shoal::collection", cid = %self.cid, iid = %iid, "Dropped index");
        Ok(())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Sync the active journal
    pub fn sync(&self) -> Result<()> {
        self.files.sync()
    }

    /// Compact every sealed datafile above the dead ratio
    ///
    /// Returns the number of datafiles compacted. Replaced datafiles are
    /// removed once all barriers older than the compaction are released.
    pub fn compact(&self) -> Result<usize> {
        let candidates = self.compactor.candidates(&self.files);
        for &source in &candidates {
            let outcome = {
                let contents = self.contents.read();
                self.compactor.compact(&self.files, source, |scanned| {
                    contents
                        .directory
                        .lookup_live(scanned.marker.did())
                        .map_or(false, |ptr| ptr.location == scanned.location)
                })?
            };

            let mut contents = self.contents.write();
            for relocation in &outcome.relocations {
                // A writer may have superseded the document since the copy.
                if !contents
                    .directory
                    .relocate(relocation.did, relocation.from, relocation.to)
                {
                    self.files.mark_dead(relocation.to);
                }
            }
            drop(contents);
            self.compactor.retire(&self.files, &self.barriers, source);
        }
        Ok(candidates.len())
    }

    /// Drop tombstoned directory slots if no barrier is outstanding
    ///
    /// Returns the number of slots freed.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if the smaller directory cannot be allocated.
    pub fn purge_tombstones(&self) -> Result<usize> {
        let mut contents = self.contents.write();
        if !self.barriers.is_empty() {
            return Ok(0);
        }
        let freed = contents.directory.purge_tombstones()?;
        if freed > 0 {
            debug!(target: "shoal::collection", cid = %self.cid, freed, "Purged tombstones");
        }
        Ok(freed)
    }

    /// Size and state figures
    pub fn figures(&self) -> CollectionFigures {
        let contents = self.contents.read();
        let mut figures = CollectionFigures {
            documents: contents.directory.len(),
            tombstones: contents.directory.tombstone_count(),
            journal: self.files.journal_id(),
            retired_files: self.files.retired_count(),
            indexes: contents.indexes.len(),
            ..Default::default()
        };
        for fid in self.files.file_ids() {
            figures.datafiles += 1;
            if let Some(stats) = self.files.stats(fid) {
                figures.dead_markers += stats.dead_markers;
                figures.dead_bytes += stats.dead_bytes;
            }
        }
        figures
    }
}

impl fmt::Debug for DocumentCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentCollection")
            .field("cid", &self.cid)
            .field("type", &self.collection_type)
            .field("dir", &self.dir)
            .field("journal", &self.files.journal_id())
            .finish_non_exhaustive()
    }
}

/// Read the body a pointer refers to
pub(crate) fn read_document(
    files: &DatafileSet,
    cid: CollectionId,
    ptr: &DocumentPointer,
) -> Result<Document> {
    match files.read(ptr.location)? {
        Marker::Document(marker) => Ok(Document {
            did: ptr.did,
            rid: ptr.rid,
            handle: DocumentHandle::new(cid, ptr.did),
            edge: ptr.edge,
            body: marker.body_json()?,
        }),
        Marker::Deletion(_) => Err(Error::corrupted(format!(
            "document {} points at a deletion marker",
            ptr.did
        ))),
    }
}

fn check_body(body: &JsonValue) -> Result<()> {
    if body.is_object() {
        Ok(())
    } else {
        Err(Error::bad_parameter("document body must be an object"))
    }
}

fn indexed<'a>(
    body: &'a JsonValue,
    did: DocumentId,
    edge: Option<&'a EdgeEndpoints>,
) -> IndexedDocument<'a> {
    IndexedDocument { did, body, edge }
}

/// Insert into every index or into none
fn insert_into_indexes(
    indexes: &mut [Box<dyn SecondaryIndex>],
    doc: &IndexedDocument<'_>,
) -> Result<()> {
    for i in 0..indexes.len() {
        if let Err(e) = indexes[i].insert(doc) {
            for index in &mut indexes[..i] {
                index.remove(doc);
            }
            return Err(e);
        }
    }
    Ok(())
}

fn remove_from_indexes(indexes: &mut [Box<dyn SecondaryIndex>], doc: &IndexedDocument<'_>) {
    for index in indexes.iter_mut() {
        index.remove(doc);
    }
}

/// Put a previously indexed revision back after a failed write
fn restore_indexes(indexes: &mut [Box<dyn SecondaryIndex>], doc: &IndexedDocument<'_>) {
    if let Err(e) = insert_into_indexes(indexes, doc) {
        warn!(target: "shoal::collection", did = %doc.did, error = %e, "Failed to restore index entries");
    }
}

/// Apply one replayed marker to the directory
///
/// The marker with the highest revision wins; every superseded document
/// marker is accounted as dead.
fn apply_marker(
    directory: &mut DocumentDirectory,
    files: &DatafileSet,
    scanned: &ScannedMarker,
) -> Result<()> {
    match &scanned.marker {
        Marker::Document(doc) => {
            let Some(current) = directory.lookup(doc.did).cloned() else {
                return directory.insert(DocumentPointer::new(
                    doc.did,
                    doc.rid,
                    scanned.location,
                    doc.edge,
                ));
            };
            if doc.rid > current.last_revision() {
                if !current.is_deleted() {
                    files.mark_dead(current.location);
                }
                directory.update(DocumentPointer::new(
                    doc.did,
                    doc.rid,
                    scanned.location,
                    doc.edge,
                ))?;
            } else if current.location != scanned.location {
                files.mark_dead(scanned.location);
            }
            Ok(())
        }
        Marker::Deletion(del) => {
            let deletion = Deletion {
                rid: del.rid,
                at: del.deleted_at,
            };
            match directory.lookup(del.did).cloned() {
                None => {
                    let mut ptr = DocumentPointer::new(del.did, del.rid, scanned.location, None);
                    ptr.deletion = Some(deletion);
                    directory.insert(ptr)
                }
                Some(mut current) if del.rid > current.last_revision() => {
                    if !current.is_deleted() {
                        files.mark_dead(current.location);
                    }
                    current.deletion = Some(deletion);
                    directory.update(current).map(|_| ())
                }
                Some(_) => Ok(()),
            }
        }
    }
}
