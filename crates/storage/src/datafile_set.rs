//! The set of files backing one collection
//!
//! `DatafileSet` owns every open datafile and the active journal of a
//! collection. Writers append through it (rotating the journal when it is
//! full), readers resolve marker locations through it, and the compactor
//! installs and retires files through it.
//!
//! Retired files stay readable until `reclaim` is called, which the owner
//! defers through the barrier registry until no reader can still hold a
//! location inside them.

use crate::datafile::{Datafile, DatafileKind, MarkerLocation, ScannedMarker};
use crate::marker::{Marker, MarkerError};
use crate::Result;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use shoal_core::{DatafileId, Error, TickGenerator};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

type SharedFile = Arc<Mutex<Datafile>>;

/// Options controlling journal behaviour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatafileOptions {
    /// Journal is sealed once the next marker would exceed this size
    pub journal_size: u64,
    /// Sync the journal after every append
    pub wait_for_sync: bool,
}

impl Default for DatafileOptions {
    fn default() -> Self {
        Self {
            journal_size: 32 * 1024 * 1024,
            wait_for_sync: false,
        }
    }
}

/// Space accounting for one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatafileStats {
    /// Number of markers in the file
    pub markers: u64,
    /// Bytes of markers in the file
    pub bytes: u64,
    /// Number of document markers superseded or deleted since
    pub dead_markers: u64,
    /// Bytes of superseded document markers
    pub dead_bytes: u64,
}

impl DatafileStats {
    /// Fraction of marker bytes that are dead
    pub fn dead_ratio(&self) -> f64 {
        if self.bytes == 0 {
            0.0
        } else {
            self.dead_bytes as f64 / self.bytes as f64
        }
    }
}

/// Open files of one collection
pub struct DatafileSet {
    dir: PathBuf,
    options: DatafileOptions,
    ticks: Arc<TickGenerator>,
    files: RwLock<BTreeMap<DatafileId, SharedFile>>,
    retired: Mutex<FxHashMap<DatafileId, SharedFile>>,
    journal: Mutex<Option<SharedFile>>,
    stats: Mutex<FxHashMap<DatafileId, DatafileStats>>,
}

impl DatafileSet {
    /// Empty set for a freshly created collection directory
    pub fn create(dir: &Path, options: DatafileOptions, ticks: Arc<TickGenerator>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            options,
            ticks,
            files: RwLock::new(BTreeMap::new()),
            retired: Mutex::new(FxHashMap::default()),
            journal: Mutex::new(None),
            stats: Mutex::new(FxHashMap::default()),
        }
    }

    /// Open every datafile and journal found in `dir`
    ///
    /// Leftover compaction files are removed. When several journals exist
    /// only the newest stays writable; older ones are sealed.
    pub fn open(dir: &Path, options: DatafileOptions, ticks: Arc<TickGenerator>) -> Result<Self> {
        let set = Self::create(dir, options, ticks);
        let mut journals = Vec::new();
        let mut files = BTreeMap::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some((kind, fid)) = name.to_str().and_then(DatafileKind::parse_file_name) else {
                continue;
            };
            set.ticks.observe(fid.as_u64());
            match kind {
                DatafileKind::Compaction => {
                    warn!(target: "shoal::compactor", path = ?entry.path(), "Removing unfinished compaction file");
                    fs::remove_file(entry.path())?;
                }
                DatafileKind::Journal => journals.push(fid),
                DatafileKind::Datafile => {
                    let file = Datafile::open(dir, fid, kind).map_err(|e| {
                        Error::corrupted(format!("datafile {}: {}", fid, e))
                    })?;
                    files.insert(fid, Arc::new(Mutex::new(file)));
                }
            }
        }

        journals.sort_unstable();
        let active = journals.pop();
        for fid in journals {
            let mut file = Datafile::open(dir, fid, DatafileKind::Journal)
                .map_err(|e| Error::corrupted(format!("journal {}: {}", fid, e)))?;
            file.seal()?;
            debug!(target: "shoal::collection", fid = %fid, "Sealed stale journal");
            files.insert(fid, Arc::new(Mutex::new(file)));
        }
        if let Some(fid) = active {
            let file = Datafile::open(dir, fid, DatafileKind::Journal)
                .map_err(|e| Error::corrupted(format!("journal {}: {}", fid, e)))?;
            let file = Arc::new(Mutex::new(file));
            files.insert(fid, Arc::clone(&file));
            *set.journal.lock() = Some(file);
        }

        *set.files.write() = files;
        Ok(set)
    }

    /// Directory holding the files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Journal options
    pub fn options(&self) -> DatafileOptions {
        self.options
    }

    /// Replay every marker in file id order
    ///
    /// A truncated final marker in the active journal is cut off with a
    /// warning. Any other unreadable marker is corruption.
    pub fn replay(&self, mut visit: impl FnMut(&ScannedMarker) -> Result<()>) -> Result<()> {
        let files: Vec<(DatafileId, SharedFile)> = self
            .files
            .read()
            .iter()
            .map(|(fid, f)| (*fid, Arc::clone(f)))
            .collect();

        for (fid, file) in files {
            let mut file = file.lock();
            self.stats.lock().insert(fid, DatafileStats::default());
            let mut truncate_at = None;

            for item in file.scan()? {
                match item {
                    Ok(scanned) => {
                        self.ticks.observe(scanned.marker.rid().as_u64());
                        self.ticks.observe(scanned.marker.did().as_u64());
                        if let Some(stats) = self.stats.lock().get_mut(&fid) {
                            stats.markers += 1;
                            stats.bytes += scanned.location.size as u64;
                        }
                        visit(&scanned)?;
                    }
                    Err(e)
                        if file.kind() == DatafileKind::Journal
                            && e.error == MarkerError::InsufficientData =>
                    {
                        truncate_at = Some(e.offset);
                    }
                    Err(e) => {
                        return Err(Error::corrupted(format!(
                            "datafile {} at offset {}: {}",
                            fid, e.offset, e.error
                        )));
                    }
                }
            }

            if let Some(offset) = truncate_at {
                warn!(target: "shoal::collection", fid = %fid, offset, "Cutting truncated journal tail");
                file.truncate(offset)?;
            }
        }
        Ok(())
    }

    /// Append a marker to the journal, rotating it when full
    pub fn append(&self, marker: &Marker) -> Result<MarkerLocation> {
        let mut journal = self.journal.lock();
        let len = marker.encoded_len() as u64;

        if let Some(current) = journal.as_ref() {
            let mut file = current.lock();
            if !file.is_empty() && file.size() + len > self.options.journal_size {
                file.seal()?;
                info!(target: "shoal::collection", fid = %file.fid(), size = file.size(), "Sealed full journal");
                drop(file);
                *journal = None;
            }
        }

        let current = match journal.as_ref() {
            Some(file) => Arc::clone(file),
            None => {
                let fid = DatafileId(self.ticks.next());
                let file = Datafile::create(&self.dir, fid, DatafileKind::Journal)?;
                debug!(target: "shoal::collection", fid = %fid, "Created journal");
                let file = Arc::new(Mutex::new(file));
                self.files.write().insert(fid, Arc::clone(&file));
                self.stats.lock().insert(fid, DatafileStats::default());
                *journal = Some(Arc::clone(&file));
                file
            }
        };

        let mut file = current.lock();
        let location = file.append(marker)?;
        if self.options.wait_for_sync {
            file.sync()?;
        }
        drop(file);

        let mut stats = self.stats.lock();
        let entry = stats.entry(location.fid).or_default();
        entry.markers += 1;
        entry.bytes += location.size as u64;
        Ok(location)
    }

    /// Read the marker at `location`, including from retired files
    pub fn read(&self, location: MarkerLocation) -> Result<Marker> {
        let file = self
            .files
            .read()
            .get(&location.fid)
            .cloned()
            .or_else(|| self.retired.lock().get(&location.fid).cloned())
            .ok_or_else(|| {
                Error::not_found(format!("datafile {} is no longer available", location.fid))
            })?;
        let mut file = file.lock();
        file.read_at(location)
    }

    /// Sync the active journal
    pub fn sync(&self) -> Result<()> {
        if let Some(journal) = self.journal.lock().as_ref() {
            journal.lock().sync()?;
        }
        Ok(())
    }

    /// Record that the marker at `location` is superseded
    pub fn mark_dead(&self, location: MarkerLocation) {
        if let Some(stats) = self.stats.lock().get_mut(&location.fid) {
            stats.dead_markers += 1;
            stats.dead_bytes += location.size as u64;
        }
    }

    /// Space accounting for a file
    pub fn stats(&self, fid: DatafileId) -> Option<DatafileStats> {
        self.stats.lock().get(&fid).copied()
    }

    /// Identifiers of all readable, non-retired files in id order
    pub fn file_ids(&self) -> Vec<DatafileId> {
        self.files.read().keys().copied().collect()
    }

    /// Identifier of the active journal, if any
    pub fn journal_id(&self) -> Option<DatafileId> {
        self.journal.lock().as_ref().map(|j| j.lock().fid())
    }

    /// Sealed datafiles whose dead ratio reaches `min_dead_ratio`
    pub fn compaction_candidates(&self, min_dead_ratio: f64) -> Vec<DatafileId> {
        let journal = self.journal_id();
        let ids = self.file_ids();
        let stats = self.stats.lock();
        ids.into_iter()
            .filter(|fid| Some(*fid) != journal)
            .filter(|fid| {
                stats
                    .get(fid)
                    .map(|s| s.dead_markers > 0 && s.dead_ratio() >= min_dead_ratio)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Scan a single file
    pub fn scan(&self, fid: DatafileId) -> Result<crate::datafile::MarkerScan> {
        let file = self
            .files
            .read()
            .get(&fid)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("datafile {}", fid)))?;
        let mut file = file.lock();
        Ok(file.scan()?)
    }

    /// Create a compaction output file with a fresh id
    pub fn create_compaction_file(&self) -> Result<Datafile> {
        let fid = DatafileId(self.ticks.next());
        Ok(Datafile::create(&self.dir, fid, DatafileKind::Compaction)?)
    }

    /// Seal a finished compaction file and make it readable
    pub fn install(&self, mut file: Datafile, stats: DatafileStats) -> Result<DatafileId> {
        file.seal()?;
        let fid = file.fid();
        self.stats.lock().insert(fid, stats);
        self.files.write().insert(fid, Arc::new(Mutex::new(file)));
        Ok(fid)
    }

    /// Remove a file from the set; it stays readable until reclaimed
    pub fn retire(&self, fid: DatafileId) -> bool {
        let Some(file) = self.files.write().remove(&fid) else {
            return false;
        };
        self.stats.lock().remove(&fid);
        self.retired.lock().insert(fid, file);
        true
    }

    /// Release a retired file, deleting it from disk when `remove_file`
    pub fn reclaim(&self, fid: DatafileId, remove_file: bool) {
        let Some(file) = self.retired.lock().remove(&fid) else {
            return;
        };
        let path = file.lock().path().to_path_buf();
        drop(file);
        if remove_file {
            match fs::remove_file(&path) {
                Ok(()) => info!(target: "shoal::compactor", path = ?path, "Removed compacted datafile"),
                Err(e) => {
                    warn!(target: "shoal::compactor", path = ?path, error = %e, "Failed to remove compacted datafile")
                }
            }
        }
    }

    /// Number of retired files awaiting reclamation
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }
}

impl std::fmt::Debug for DatafileSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatafileSet")
            .field("dir", &self.dir)
            .field("files", &self.file_ids())
            .field("retired", &self.retired_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::DocumentMarker;
    use serde_json::json;
    use shoal_core::{DocumentId, RevisionId};
    use tempfile::tempdir;

    fn doc(did: u64, padding: usize) -> Marker {
        Marker::Document(
            DocumentMarker::new(
                DocumentId(did),
                RevisionId(did),
                None,
                &json!({"pad": "x".repeat(padding)}),
            )
            .unwrap(),
        )
    }

    fn small_options() -> DatafileOptions {
        DatafileOptions {
            journal_size: 256,
            wait_for_sync: false,
        }
    }

    #[test]
    fn test_append_creates_journal_lazily() {
        let dir = tempdir().unwrap();
        let set = DatafileSet::create(dir.path(), small_options(), Arc::new(TickGenerator::default()));
        assert!(set.journal_id().is_none());

        let loc = set.append(&doc(1, 10)).unwrap();
        assert_eq!(set.journal_id(), Some(loc.fid));
        assert_eq!(set.read(loc).unwrap().did(), DocumentId(1));
    }

    #[test]
    fn test_journal_rotation() {
        let dir = tempdir().unwrap();
        let set = DatafileSet::create(dir.path(), small_options(), Arc::new(TickGenerator::default()));
        let first = set.append(&doc(1, 150)).unwrap();
        let second = set.append(&doc(2, 150)).unwrap();

        assert_ne!(first.fid, second.fid);
        assert!(dir.path().join(format!("datafile-{}.db", first.fid)).exists());
        assert!(dir.path().join(format!("journal-{}.db", second.fid)).exists());
        assert_eq!(set.read(first).unwrap().did(), DocumentId(1));
        assert_eq!(set.file_ids().len(), 2);
    }

    #[test]
    fn test_reopen_and_replay_in_order() {
        let dir = tempdir().unwrap();
        let ticks = Arc::new(TickGenerator::new(100));
        {
            let set = DatafileSet::create(dir.path(), small_options(), Arc::clone(&ticks));
            for i in 1..=5 {
                set.append(&doc(i, 100)).unwrap();
            }
            set.sync().unwrap();
        }

        let fresh_ticks = Arc::new(TickGenerator::default());
        let set = DatafileSet::open(dir.path(), small_options(), Arc::clone(&fresh_ticks)).unwrap();
        let mut seen = Vec::new();
        set.replay(|m| {
            seen.push(m.marker.did().as_u64());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(fresh_ticks.current() >= 100);
    }

    #[test]
    fn test_replay_cuts_truncated_journal_tail() {
        let dir = tempdir().unwrap();
        let journal_path;
        {
            let set = DatafileSet::create(
                dir.path(),
                DatafileOptions::default(),
                Arc::new(TickGenerator::default()),
            );
            set.append(&doc(1, 10)).unwrap();
            let loc = set.append(&doc(2, 10)).unwrap();
            journal_path = dir.path().join(format!("journal-{}.db", loc.fid));
        }
        let len = fs::metadata(&journal_path).unwrap().len();
        fs::OpenOptions::new()
            .write(true)
            .open(&journal_path)
            .unwrap()
            .set_len(len - 2)
            .unwrap();

        let set = DatafileSet::open(
            dir.path(),
            DatafileOptions::default(),
            Arc::new(TickGenerator::default()),
        )
        .unwrap();
        let mut count = 0;
        set.replay(|_| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 1);
        assert!(fs::metadata(&journal_path).unwrap().len() < len - 2);
    }

    #[test]
    fn test_replay_reports_corruption_in_sealed_file() {
        let dir = tempdir().unwrap();
        let sealed;
        {
            let set = DatafileSet::create(dir.path(), small_options(), Arc::new(TickGenerator::default()));
            sealed = set.append(&doc(1, 150)).unwrap();
            set.append(&doc(2, 150)).unwrap();
        }
        let path = dir.path().join(format!("datafile-{}.db", sealed.fid));
        let mut bytes = fs::read(&path).unwrap();
        let idx = (sealed.offset + 20) as usize;
        bytes[idx] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let set = DatafileSet::open(dir.path(), small_options(), Arc::new(TickGenerator::default()))
            .unwrap();
        let err = set.replay(|_| Ok(())).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_open_removes_compaction_leftovers() {
        let dir = tempdir().unwrap();
        Datafile::create(dir.path(), DatafileId(3), DatafileKind::Compaction).unwrap();
        let set = DatafileSet::open(dir.path(), small_options(), Arc::new(TickGenerator::default()))
            .unwrap();
        assert!(set.file_ids().is_empty());
        assert!(!dir.path().join("compaction-3.db").exists());
    }

    #[test]
    fn test_retire_keeps_file_readable_until_reclaimed() {
        let dir = tempdir().unwrap();
        let set = DatafileSet::create(dir.path(), small_options(), Arc::new(TickGenerator::default()));
        let old = set.append(&doc(1, 150)).unwrap();
        set.append(&doc(2, 150)).unwrap();

        assert!(set.retire(old.fid));
        assert!(!set.file_ids().contains(&old.fid));
        assert_eq!(set.read(old).unwrap().did(), DocumentId(1));

        set.reclaim(old.fid, true);
        assert!(set.read(old).is_err());
        assert!(!dir.path().join(format!("datafile-{}.db", old.fid)).exists());
    }

    #[test]
    fn test_compaction_candidates() {
        let dir = tempdir().unwrap();
        let set = DatafileSet::create(dir.path(), small_options(), Arc::new(TickGenerator::default()));
        let sealed = set.append(&doc(1, 150)).unwrap();
        let live = set.append(&doc(2, 150)).unwrap();

        assert!(set.compaction_candidates(0.1).is_empty());
        set.mark_dead(sealed);
        set.mark_dead(live);
        assert_eq!(set.compaction_candidates(0.1), vec![sealed.fid]);
    }
}
