//! Datafile compaction
//!
//! The compactor rewrites the still-live document markers of a sealed
//! datafile into a fresh datafile. The caller decides liveness (it owns the
//! document directory), applies the returned relocations, and then retires
//! the source file. Physical removal of the source is deferred through the
//! barrier registry so readers holding locations inside it stay valid.
//!
//! Deletion markers are always carried over: older datafiles may still hold
//! the document marker they cancel.

use crate::barrier::BarrierRegistry;
use crate::datafile::{MarkerLocation, ScannedMarker};
use crate::datafile_set::{DatafileSet, DatafileStats};
use crate::marker::Marker;
use crate::Result;
use shoal_core::{DatafileId, DocumentId, Error, RevisionId};
use std::sync::Arc;
use tracing::info;

/// A document marker copied to a new location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Document
    pub did: DocumentId,
    /// Revision of the copied marker
    pub rid: RevisionId,
    /// Old location
    pub from: MarkerLocation,
    /// New location
    pub to: MarkerLocation,
}

/// Result of compacting one datafile
#[derive(Debug, Clone, Default)]
pub struct CompactionOutcome {
    /// Compacted file
    pub source: DatafileId,
    /// Output file, if anything had to be kept
    pub target: Option<DatafileId>,
    /// Live document markers moved to the output
    pub relocations: Vec<Relocation>,
    /// Deletion markers carried over
    pub deletions_kept: usize,
    /// Dead document markers dropped
    pub dropped: usize,
}

/// Compaction policy
#[derive(Debug, Clone, Copy)]
pub struct Compactor {
    /// Minimum dead fraction for a datafile to be compacted
    pub dead_ratio: f64,
    /// Whether retired files are deleted from disk
    pub remove_files: bool,
}

impl Compactor {
    /// Create a compactor
    pub fn new(dead_ratio: f64, remove_files: bool) -> Self {
        Self {
            dead_ratio,
            remove_files,
        }
    }

    /// Sealed datafiles worth compacting
    pub fn candidates(&self, files: &DatafileSet) -> Vec<DatafileId> {
        files.compaction_candidates(self.dead_ratio)
    }

    /// Rewrite the live markers of `source`
    ///
    /// `is_live` is asked about every document marker. The source file is
    /// left untouched; call [`Compactor::retire`] once the relocations have
    /// been applied.
    pub fn compact(
        &self,
        files: &DatafileSet,
        source: DatafileId,
        mut is_live: impl FnMut(&ScannedMarker) -> bool,
    ) -> Result<CompactionOutcome> {
        if files.journal_id() == Some(source) {
            return Err(Error::bad_parameter(format!(
                "datafile {} is the active journal",
                source
            )));
        }

        let mut outcome = CompactionOutcome {
            source,
            ..Default::default()
        };
        let mut output = None;
        let mut stats = DatafileStats::default();

        for item in files.scan(source)? {
            let scanned = item.map_err(|e| {
                Error::corrupted(format!(
                    "datafile {} at offset {}: {}",
                    source, e.offset, e.error
                ))
            })?;

            let keep = match &scanned.marker {
                Marker::Deletion(_) => {
                    outcome.deletions_kept += 1;
                    true
                }
                Marker::Document(_) => is_live(&scanned),
            };
            if !keep {
                outcome.dropped += 1;
                continue;
            }

            if output.is_none() {
                output = Some(files.create_compaction_file()?);
            }
            let Some(file) = output.as_mut() else {
                continue;
            };
            let to = file.append(&scanned.marker)?;
            stats.markers += 1;
            stats.bytes += to.size as u64;
            if let Marker::Document(doc) = &scanned.marker {
                outcome.relocations.push(Relocation {
                    did: doc.did,
                    rid: doc.rid,
                    from: scanned.location,
                    to,
                });
            }
        }

        if let Some(file) = output {
            outcome.target = Some(files.install(file, stats)?);
        }

        info!(
            target: "shoal::compactor",
            source = %source,
            target = ?outcome.target,
            moved = outcome.relocations.len(),
            dropped = outcome.dropped,
            "Compacted datafile"
        );
        Ok(outcome)
    }

    /// Retire the source of a finished compaction
    ///
    /// The file stays readable until every barrier acquired before this call
    /// has been released; then it is closed and, unless disabled, deleted.
    pub fn retire(&self, files: &Arc<DatafileSet>, barriers: &BarrierRegistry, source: DatafileId) {
        if !files.retire(source) {
            return;
        }
        let files = Arc::clone(files);
        let remove = self.remove_files;
        barriers.defer(format!("reclaim datafile {}", source), move || {
            files.reclaim(source, remove);
        });
    }
}
