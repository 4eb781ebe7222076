//! Collection lifecycle
//!
//! A [`Collection`] is the registry entry for one collection. Its status
//! moves through:
//!
//! ```text
//! NewBorn ──use──▶ Loaded ──unload──▶ Unloading ──barriers drained──▶ Unloaded
//!                    ▲                                                  │
//!                    └────────────────────────use──────────────────────┘
//! any ──drop──▶ Deleted          load finds bad data ──▶ Corrupted
//! ```
//!
//! # Locking
//!
//! The status lock is a reader-writer lock. Users of a loaded collection
//! hold it shared through a [`CollectionGuard`]; loading, unloading,
//! renaming and dropping take it exclusively. The first concurrent user of
//! an unloaded collection loads it while the others wait, so a collection
//! is loaded exactly once.
//!
//! Shared acquisitions are recursive, so a guard holder may use the same
//! collection again while a drop or unload is waiting. It must still release
//! its guards before asking the database to unload, rename or drop that
//! collection itself.
//!
//! Lock order is the collection status, then the database registry, then
//! the collection parameters. Registry holders never wait for a status.

use crate::document_collection::{DocumentCollection, LoadContext};
use crate::parameters::CollectionParameters;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use shoal_core::{
    CollectionId, CollectionName, CollectionStatus, CollectionType, Error, Result, Shaper,
    TickGenerator,
};
use shoal_storage::{BarrierRegistry, Compactor, DatafileOptions};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

struct CollectionState {
    status: CollectionStatus,
    document: Option<Arc<DocumentCollection>>,
}

/// A collection known to the database
pub struct Collection {
    cid: CollectionId,
    collection_type: CollectionType,
    is_system: bool,
    dir: PathBuf,
    parameters: Mutex<CollectionParameters>,
    state: RwLock<CollectionState>,
    barriers: Arc<BarrierRegistry>,
    ticks: Arc<TickGenerator>,
    shaper: Arc<Shaper>,
    compactor: Compactor,
    loads: AtomicU64,
    unload_pending: AtomicBool,
}

/// Shared use of a loaded collection
///
/// While any guard is alive the collection cannot be unloaded, renamed or
/// dropped.
pub struct CollectionGuard<'a> {
    _state: RwLockReadGuard<'a, CollectionState>,
    document: Arc<DocumentCollection>,
}

impl Deref for CollectionGuard<'_> {
    type Target = DocumentCollection;

    fn deref(&self) -> &DocumentCollection {
        &self.document
    }
}

impl CollectionGuard<'_> {
    /// Give up the shared use
    pub fn release(self) {}
}

impl Collection {
    pub(crate) fn new(
        parameters: CollectionParameters,
        dir: PathBuf,
        status: CollectionStatus,
        ticks: Arc<TickGenerator>,
        shaper: Arc<Shaper>,
        compactor: Compactor,
    ) -> Self {
        Self {
            cid: parameters.cid,
            collection_type: parameters.collection_type,
            is_system: parameters.is_system,
            barriers: BarrierRegistry::new(parameters.name.clone()),
            dir,
            parameters: Mutex::new(parameters),
            state: RwLock::new(CollectionState {
                status,
                document: None,
            }),
            ticks,
            shaper,
            compactor,
            loads: AtomicU64::new(0),
            unload_pending: AtomicBool::new(false),
        }
    }

    /// Collection identifier
    pub fn cid(&self) -> CollectionId {
        self.cid
    }

    /// Current name
    pub fn name(&self) -> String {
        self.parameters.lock().name.clone()
    }

    /// Document or edge collection
    pub fn collection_type(&self) -> CollectionType {
        self.collection_type
    }

    /// Whether the name uses the system prefix
    pub fn is_system(&self) -> bool {
        self.is_system
    }

    /// Collection directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of the persisted parameters
    pub fn parameters(&self) -> CollectionParameters {
        self.parameters.lock().clone()
    }

    /// Current status
    pub fn status(&self) -> CollectionStatus {
        self.state.read_recursive().status
    }

    /// Number of times the collection has been loaded
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Barrier registry shared by every load of the collection
    pub fn barriers(&self) -> &Arc<BarrierRegistry> {
        &self.barriers
    }

    fn unavailable(&self, status: CollectionStatus) -> Error {
        Error::CollectionUnavailable {
            name: self.name(),
            status,
        }
    }

    // ========================================================================
    // Use
    // ========================================================================

    /// Use the collection, loading it first if needed
    ///
    /// # Errors
    ///
    /// `CollectionUnavailable` while unloading, after a drop or once
    /// corrupted. A load that finds unreadable data returns `Corrupted` and
    /// leaves the collection CORRUPTED.
    pub fn use_collection(&self) -> Result<CollectionGuard<'_>> {
        let state = self.state.read_recursive();
        let status = state.status;
        if status == CollectionStatus::Loaded {
            if let Some(document) = state.document.clone() {
                return Ok(CollectionGuard {
                    _state: state,
                    document,
                });
            }
        }
        if !status.is_loadable() {
            return Err(self.unavailable(status));
        }
        drop(state);

        let mut state = self.state.write();
        let status = state.status;
        match status {
            CollectionStatus::Loaded => {}
            status if status.is_loadable() => {
                let document = match self.load() {
                    Ok(document) => document,
                    Err(e) => {
                        if e.is_corruption() {
                            error!(target: "shoal::collection", cid = %self.cid, error = %e, "Collection is corrupted");
                            state.status = CollectionStatus::Corrupted;
                        }
                        return Err(e);
                    }
                };
                state.document = Some(Arc::new(document));
                state.status = CollectionStatus::Loaded;
                self.loads.fetch_add(1, Ordering::SeqCst);
            }
            status => return Err(self.unavailable(status)),
        }

        let state = RwLockWriteGuard::downgrade(state);
        let document = state
            .document
            .clone()
            .ok_or_else(|| self.unavailable(state.status))?;
        Ok(CollectionGuard {
            _state: state,
            document,
        })
    }

    /// Use the collection only if it is loaded and nobody is changing its
    /// status right now
    pub fn try_use_loaded(&self) -> Option<CollectionGuard<'_>> {
        let state = self.state.try_read()?;
        if state.status != CollectionStatus::Loaded {
            return None;
        }
        let document = state.document.clone()?;
        Some(CollectionGuard {
            _state: state,
            document,
        })
    }

    fn load(&self) -> Result<DocumentCollection> {
        let parameters = self.parameters();
        DocumentCollection::load(LoadContext {
            cid: self.cid,
            collection_type: self.collection_type,
            dir: self.dir.clone(),
            options: DatafileOptions {
                journal_size: parameters.journal_size,
                wait_for_sync: parameters.wait_for_sync,
            },
            ticks: Arc::clone(&self.ticks),
            shaper: Arc::clone(&self.shaper),
            barriers: Arc::clone(&self.barriers),
            compactor: self.compactor,
        })
    }

    // ========================================================================
    // Unload
    // ========================================================================

    /// Request an unload
    ///
    /// Waits for current users to release their guards, then marks the
    /// collection UNLOADING. The in-memory structures are released once
    /// every barrier is gone; until then new uses fail.
    ///
    /// # Errors
    ///
    /// `CollectionUnavailable` for dropped or corrupted collections.
    pub fn unload(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.write();
        let status = state.status;
        match status {
            CollectionStatus::Loaded => {}
            CollectionStatus::NewBorn | CollectionStatus::Unloaded | CollectionStatus::Unloading => {
                return Ok(())
            }
            status => return Err(self.unavailable(status)),
        }
        state.status = CollectionStatus::Unloading;
        drop(state);

        info!(target: "shoal::collection", cid = %self.cid, "Unloading collection");
        let collection = Arc::downgrade(self);
        self.barriers
            .defer(format!("unload collection {}", self.cid), move || {
                if let Some(collection) = collection.upgrade() {
                    collection.finish_unload();
                }
            });
        Ok(())
    }

    fn finish_unload(&self) -> bool {
        let Some(mut state) = self.state.try_write() else {
            self.unload_pending.store(true, Ordering::SeqCst);
            return false;
        };
        self.unload_pending.store(false, Ordering::SeqCst);
        if state.status != CollectionStatus::Unloading {
            return false;
        }
        let document = state.document.take();
        state.status = CollectionStatus::Unloaded;
        drop(state);

        if let Some(document) = document {
            if let Err(e) = document.sync() {
                warn!(target: "shoal::collection", cid = %self.cid, error = %e, "Failed to sync journal on unload");
            }
        }
        info!(target: "shoal::collection", cid = %self.cid, "Unloaded collection");
        true
    }

    /// Finish an unload whose barriers drained while the status lock was
    /// busy
    pub fn complete_pending_unload(&self) -> bool {
        self.unload_pending.load(Ordering::SeqCst)
            && self.barriers.is_empty()
            && self.finish_unload()
    }

    // ========================================================================
    // Structural changes
    // ========================================================================

    /// Wait for every guard to be released and hold the status exclusively
    pub(crate) fn lock_status(&self) -> StatusLock<'_> {
        StatusLock {
            collection: self,
            state: self.state.write(),
        }
    }
}

/// Exclusive hold of a collection's status for a structural change
pub(crate) struct StatusLock<'a> {
    collection: &'a Collection,
    state: RwLockWriteGuard<'a, CollectionState>,
}

impl StatusLock<'_> {
    pub(crate) fn status(&self) -> CollectionStatus {
        self.state.status
    }

    pub(crate) fn rename(&mut self, name: CollectionName) -> Result<()> {
        let collection = self.collection;
        if matches!(
            self.state.status,
            CollectionStatus::Deleted | CollectionStatus::Corrupted
        ) {
            return Err(collection.unavailable(self.state.status));
        }
        let mut parameters = collection.parameters.lock();
        let old = std::mem::replace(&mut parameters.name, name.into_inner());
        if let Err(e) = parameters.save(&collection.dir) {
            parameters.name = old;
            return Err(e);
        }
        info!(target: "shoal::collection", cid = %collection.cid, from = %old, to = %parameters.name, "Renamed collection");
        Ok(())
    }

    pub(crate) fn mark_deleted(&mut self) -> Result<()> {
        let collection = self.collection;
        let mut parameters = collection.parameters.lock();
        parameters.deleted = true;
        if let Err(e) = parameters.save(&collection.dir) {
            parameters.deleted = false;
            return Err(e);
        }
        drop(parameters);

        self.state.status = CollectionStatus::Deleted;
        if let Some(document) = self.state.document.take() {
            if let Err(e) = document.sync() {
                warn!(target: "shoal::collection", cid = %collection.cid, error = %e, "Failed to sync journal on drop");
            }
        }
        info!(target: "shoal::collection", cid = %collection.cid, "Dropped collection");
        Ok(())
    }
}

impl fmt::Debug for CollectionGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionGuard")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("cid", &self.cid)
            .field("name", &self.name())
            .field("type", &self.collection_type)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
