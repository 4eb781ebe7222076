//! Storage layer for shoal
//!
//! This crate implements the per-collection storage structures:
//! - Marker: CRC-checked datafile records (documents, deletions)
//! - Datafile / DatafileSet: append-only journals and sealed datafiles
//! - DocumentPointer / DocumentDirectory: the primary index
//! - BarrierRegistry / Barrier: protection of datafile bytes against reclamation
//! - Compactor: rewriting of datafiles with a high share of dead markers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod compactor;
pub mod datafile;
pub mod datafile_set;
pub mod directory;
pub mod document;
pub mod marker;

pub use barrier::{Barrier, BarrierRegistry};
pub use compactor::{CompactionOutcome, Compactor, Relocation};
pub use datafile::{Datafile, DatafileKind, MarkerLocation, MarkerScan, ScannedMarker};
pub use datafile_set::{DatafileOptions, DatafileSet, DatafileStats};
pub use directory::DocumentDirectory;
pub use document::{Deletion, DocumentPointer};
pub use marker::{DeletionMarker, DocumentMarker, Marker, MarkerError};

pub use shoal_core::{Error, Result};
