//! Database: collection registry and maintenance
//!
//! A database is a directory:
//!
//! ```text
//! <path>/
//!   .lock                 exclusive lock held while open
//!   shoal.toml            configuration
//!   collection-<cid>/     one directory per collection
//!     parameter.json
//!     index-<iid>.json
//!     journal-<fid>.db / datafile-<fid>.db
//! ```
//!
//! Opening registers every collection found on disk as UNLOADED; nothing
//! is read until a collection is first used. A dropped collection leaves
//! the registry once its users are gone, and maintenance deletes its files
//! when no handle or barrier refers to it anymore.
//!
//! Lock order: a collection's status lock is taken before the registry
//! lock. Lookups only read the registry, so a thread holding a guard can
//! look up collections while a drop or rename waits for that guard.

use crate::collection::Collection;
use crate::config::{ShoalConfig, CONFIG_FILE_NAME, MIN_JOURNAL_SIZE};
use crate::maintenance::Maintenance;
use crate::parameters::CollectionParameters;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use shoal_core::{
    CollectionId, CollectionName, CollectionStatus, CollectionType, Error, Result, Shaper,
    TickGenerator,
};
use shoal_storage::Compactor;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const LOCK_FILE_NAME: &str = ".lock";

/// Options for [`Database::create_collection`]
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOptions {
    /// Document or edge collection
    pub collection_type: CollectionType,
    /// Allow names with the system prefix
    pub is_system: bool,
    /// Journal size; the database default when unset
    pub journal_size: Option<u64>,
    /// Sync after every write; the database default when unset
    pub wait_for_sync: Option<bool>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            collection_type: CollectionType::Document,
            is_system: false,
            journal_size: None,
            wait_for_sync: None,
        }
    }
}

impl CollectionOptions {
    /// Options for an edge collection
    pub fn edge() -> Self {
        Self {
            collection_type: CollectionType::Edge,
            ..Default::default()
        }
    }
}

/// What one maintenance pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Datafiles compacted
    pub compacted: usize,
    /// Tombstoned directory slots freed
    pub purged: usize,
    /// Deferred unloads completed
    pub unloaded: usize,
    /// Dropped collections cleaned up
    pub removed: usize,
}

impl MaintenanceReport {
    /// Whether the pass had nothing to do
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Default)]
struct Registry {
    by_name: FxHashMap<String, Arc<Collection>>,
    by_id: FxHashMap<CollectionId, Arc<Collection>>,
}

impl Registry {
    fn insert(&mut self, name: String, collection: Arc<Collection>) {
        self.by_id.insert(collection.cid(), Arc::clone(&collection));
        self.by_name.insert(name, collection);
    }

    fn remove(&mut self, collection: &Arc<Collection>) {
        self.by_name.retain(|_, c| !Arc::ptr_eq(c, collection));
        if self
            .by_id
            .get(&collection.cid())
            .map_or(false, |c| Arc::ptr_eq(c, collection))
        {
            self.by_id.remove(&collection.cid());
        }
    }
}

/// An open database
pub struct Database {
    path: PathBuf,
    config: ShoalConfig,
    ticks: Arc<TickGenerator>,
    shaper: Arc<Shaper>,
    compactor: Compactor,
    registry: RwLock<Registry>,
    dead: Mutex<Vec<Arc<Collection>>>,
    maintenance: Mutex<Option<Maintenance>>,
    closed: AtomicBool,
    _lock_file: File,
}

impl Database {
    /// Open or create the database at `path`
    ///
    /// Writes a default `shoal.toml` when none exists and starts the
    /// maintenance thread unless the config disables it.
    ///
    /// # Errors
    ///
    /// `Locked` if the directory is already open, `BadParameter` for an
    /// invalid config, `Corrupted` for conflicting collection metadata.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path.join(LOCK_FILE_NAME))?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
            Error::Locked(format!("database at '{}' is already in use", path.display()))
        })?;

        let config_path = path.join(CONFIG_FILE_NAME);
        ShoalConfig::write_default_if_missing(&config_path)?;
        let config = ShoalConfig::from_file(&config_path)?;
        Self::open_with_config(path, config, lock_file)
    }

    fn open_with_config(path: PathBuf, config: ShoalConfig, lock_file: File) -> Result<Arc<Self>> {
        let ticks = Arc::new(TickGenerator::default());
        let shaper = Arc::new(Shaper::new());
        let compactor = Compactor::new(config.compaction_dead_ratio, config.remove_on_compacted);
        let mut registry = Registry::default();

        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let Some(cid) = entry
                .file_name()
                .to_str()
                .and_then(CollectionParameters::parse_dir_name)
            else {
                continue;
            };
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            ticks.observe(cid.as_u64());

            let parameters = match CollectionParameters::load(&dir) {
                Ok(parameters) => parameters,
                Err(e) => {
                    warn!(target: "shoal::db", dir = ?dir, error = %e, "Skipping unreadable collection directory");
                    continue;
                }
            };
            if parameters.cid != cid {
                warn!(target: "shoal::db", dir = ?dir, cid = %parameters.cid, "Skipping collection directory with mismatched id");
                continue;
            }
            if parameters.deleted {
                if config.remove_on_drop {
                    fs::remove_dir_all(&dir)?;
                    info!(target: "shoal::db", dir = ?dir, "Removed dropped collection");
                }
                continue;
            }
            if registry.by_name.contains_key(&parameters.name) {
                return Err(Error::corrupted(format!(
                    "collection name '{}' is used by more than one directory",
                    parameters.name
                )));
            }

            let name = parameters.name.clone();
            let collection = Arc::new(Collection::new(
                parameters,
                dir,
                CollectionStatus::Unloaded,
                Arc::clone(&ticks),
                Arc::clone(&shaper),
                compactor,
            ));
            registry.insert(name, collection);
        }

        info!(
            target: "shoal::db",
            path = ?path,
            collections = registry.by_id.len(),
            "Opened database"
        );

        let db = Arc::new(Self {
            path,
            config,
            ticks,
            shaper,
            compactor,
            registry: RwLock::new(registry),
            dead: Mutex::new(Vec::new()),
            maintenance: Mutex::new(None),
            closed: AtomicBool::new(false),
            _lock_file: lock_file,
        });
        if let Some(interval) = db.config.maintenance_interval() {
            let maintenance =
                Maintenance::start(Arc::downgrade(&db), db.config.sync_interval(), interval)?;
            *db.maintenance.lock() = Some(maintenance);
        }
        Ok(db)
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Active configuration
    pub fn config(&self) -> &ShoalConfig {
        &self.config
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Create and register a new collection
    ///
    /// The collection starts NEW_BORN; its files are created on first use.
    ///
    /// # Errors
    ///
    /// `IllegalName` for invalid names, `AlreadyExists` for taken names,
    /// `BadParameter` for a journal size below the minimum.
    pub fn create_collection(&self, name: &str, options: CollectionOptions) -> Result<Arc<Collection>> {
        let name = if options.is_system {
            CollectionName::system(name)?
        } else {
            CollectionName::new(name)?
        };
        let journal_size = options.journal_size.unwrap_or(self.config.journal_size);
        if journal_size < MIN_JOURNAL_SIZE {
            return Err(Error::bad_parameter(format!(
                "journal size {} is below the minimum of {} bytes",
                journal_size, MIN_JOURNAL_SIZE
            )));
        }

        let mut registry = self.registry.write();
        if registry.by_name.contains_key(name.as_str()) {
            return Err(Error::AlreadyExists(format!("collection '{}'", name)));
        }

        let cid = CollectionId(self.ticks.next());
        let dir = self.path.join(CollectionParameters::dir_name(cid));
        let parameters = CollectionParameters {
            cid,
            name: name.as_str().to_string(),
            collection_type: options.collection_type,
            is_system: options.is_system,
            journal_size,
            wait_for_sync: options.wait_for_sync.unwrap_or(self.config.wait_for_sync),
            deleted: false,
        };
        fs::create_dir(&dir)?;
        if let Err(e) = parameters.save(&dir) {
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }

        let collection = Arc::new(Collection::new(
            parameters,
            dir,
            CollectionStatus::NewBorn,
            Arc::clone(&self.ticks),
            Arc::clone(&self.shaper),
            self.compactor,
        ));
        registry.insert(name.as_str().to_string(), Arc::clone(&collection));
        info!(
            target: "shoal::db",
            cid = %cid,
            name = %name,
            collection_type = %options.collection_type,
            "Created collection"
        );
        Ok(collection)
    }

    /// Collection by name
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.registry
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("collection '{}'", name)))
    }

    /// Collection by identifier
    pub fn collection_by_id(&self, cid: CollectionId) -> Result<Arc<Collection>> {
        self.registry
            .read()
            .by_id
            .get(&cid)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("collection {}", cid)))
    }

    /// Every registered collection, ordered by name
    pub fn collections(&self) -> Vec<Arc<Collection>> {
        let registry = self.registry.read();
        let mut names: Vec<&String> = registry.by_name.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| registry.by_name.get(name).cloned())
            .collect()
    }

    /// Drop a collection
    ///
    /// Waits for current users of the collection. Afterwards every use of
    /// it fails; its files are deleted once nothing refers to it.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let collection = self.collection(name)?;
        {
            let mut status = collection.lock_status();
            // Another drop got the status first.
            if status.status() == CollectionStatus::Deleted {
                return Err(Error::not_found(format!("collection '{}'", name)));
            }
            status.mark_deleted()?;
            self.registry.write().remove(&collection);
        }

        self.dead.lock().push(collection);
        Ok(())
    }

    /// Rename a collection
    ///
    /// Waits for current users of the collection.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if `new_name` is taken; both names are then left
    /// unchanged.
    pub fn rename_collection(&self, old_name: &str, new_name: &str) -> Result<()> {
        let collection = self.collection(old_name)?;
        let name = if collection.is_system() {
            CollectionName::system(new_name)?
        } else {
            CollectionName::new(new_name)?
        };
        if old_name == new_name {
            return Ok(());
        }

        let mut status = collection.lock_status();
        let mut registry = self.registry.write();
        let current = registry
            .by_name
            .get(old_name)
            .map_or(false, |c| Arc::ptr_eq(c, &collection));
        if !current {
            return Err(Error::not_found(format!("collection '{}'", old_name)));
        }
        if registry.by_name.contains_key(new_name) {
            return Err(Error::AlreadyExists(format!("collection '{}'", new_name)));
        }

        status.rename(name)?;
        registry.by_name.remove(old_name);
        registry
            .by_name
            .insert(new_name.to_string(), Arc::clone(&collection));
        Ok(())
    }

    /// Request an unload of a collection
    pub fn unload_collection(&self, name: &str) -> Result<()> {
        self.collection(name)?.unload()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Sync the journals of every loaded collection
    pub fn sync(&self) -> Result<()> {
        for collection in self.collections() {
            if let Some(guard) = collection.try_use_loaded() {
                guard.sync()?;
            }
        }
        Ok(())
    }

    /// Run one maintenance pass
    ///
    /// Completes deferred unloads, compacts and purges loaded collections,
    /// and deletes the files of dropped collections nobody refers to.
    /// Collections busy with a status change are skipped until the next
    /// pass.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        for collection in self.collections() {
            if collection.complete_pending_unload() {
                report.unloaded += 1;
                continue;
            }
            let Some(guard) = collection.try_use_loaded() else {
                continue;
            };
            match guard.compact() {
                Ok(compacted) => report.compacted += compacted,
                Err(e) => {
                    warn!(target: "shoal::db", cid = %collection.cid(), error = %e, "Compaction failed")
                }
            }
            match guard.purge_tombstones() {
                Ok(purged) => report.purged += purged,
                Err(e) => {
                    warn!(target: "shoal::db", cid = %collection.cid(), error = %e, "Purging tombstones failed")
                }
            }
        }
        report.removed = self.cleanup_dropped();
        report
    }

    fn cleanup_dropped(&self) -> usize {
        let mut dead = self.dead.lock();
        let before = dead.len();
        dead.retain(|collection| {
            if Arc::strong_count(collection) > 1 || !collection.barriers().is_empty() {
                return true;
            }
            if self.config.remove_on_drop {
                match fs::remove_dir_all(collection.path()) {
                    Ok(()) => {
                        info!(target: "shoal::db", cid = %collection.cid(), "Removed dropped collection files")
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(target: "shoal::db", cid = %collection.cid(), error = %e, "Failed to remove dropped collection");
                        return true;
                    }
                }
            }
            false
        });
        before - dead.len()
    }

    /// Stop maintenance, sync and unload every collection
    ///
    /// Called implicitly when the last reference is dropped.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut maintenance) = self.maintenance.lock().take() {
            maintenance.stop();
        }
        self.sync()?;
        for collection in self.collections() {
            if matches!(collection.status(), CollectionStatus::Loaded) {
                collection.unload()?;
            }
        }
        self.cleanup_dropped();
        info!(target: "shoal::db", path = ?self.path, "Closed database");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(mut maintenance) = self.maintenance.lock().take() {
            maintenance.stop();
        }
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.sync() {
                warn!(target: "shoal::db", error = %e, "Final sync failed");
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("collections", &self.registry.read().by_id.len())
            .finish_non_exhaustive()
    }
}
