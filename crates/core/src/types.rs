//! Core types for shoal
//!
//! This module defines the foundational identifier types:
//! - CollectionId / DocumentId / RevisionId / DatafileId / IndexId: 64-bit ticks
//! - TickGenerator: database-wide monotonic source of those ticks
//! - CollectionType / CollectionStatus: collection classification and lifecycle
//! - EdgeDirection: direction filter for edge lookups
//! - DocumentHandle: `"<cid>/<did>"` textual document reference

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Separator between collection id and document id in a handle
pub const HANDLE_SEPARATOR: char = '/';

macro_rules! tick_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw tick value
            #[inline]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw tick value
            #[inline]
            pub const fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

tick_id!(
    /// Identifier of a collection, immutable once assigned
    CollectionId
);
tick_id!(
    /// Identifier of a document, unique within its collection
    DocumentId
);
tick_id!(
    /// Revision of a document; strictly increases with every update
    RevisionId
);
tick_id!(
    /// Identifier of a datafile, journal or compaction file
    DatafileId
);
tick_id!(
    /// Identifier of an index; the primary index of a collection uses 0
    IndexId
);

impl IndexId {
    /// Identifier reserved for the primary index
    pub const PRIMARY: IndexId = IndexId(0);
}

/// Database-wide monotonic tick source
///
/// Every identifier handed out by the database is a tick. During load the
/// generator is advanced past every tick found on disk, so newly drawn ticks
/// never collide with persisted ones.
#[derive(Debug)]
pub struct TickGenerator {
    last: AtomicU64,
}

impl TickGenerator {
    /// Create a generator whose next tick is `start + 1`
    pub fn new(start: u64) -> Self {
        Self {
            last: AtomicU64::new(start),
        }
    }

    /// Draw the next tick
    #[inline]
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Advance past a tick observed elsewhere (never moves backwards)
    #[inline]
    pub fn observe(&self, tick: u64) {
        self.last.fetch_max(tick, Ordering::SeqCst);
    }

    /// Most recently issued or observed tick
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for TickGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Kind of documents stored in a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    /// Plain documents
    Document,
    /// Edge documents carrying `_from` / `_to` vertex handles
    Edge,
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionType::Document => write!(f, "document"),
            CollectionType::Edge => write!(f, "edge"),
        }
    }
}

/// Lifecycle status of a collection
///
/// Numeric values match the persisted representation in `parameter.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    /// Unreadable on-disk data; terminal until repaired
    Corrupted = 0,
    /// Registered but no files created yet
    NewBorn = 1,
    /// Known on disk, not in memory
    Unloaded = 2,
    /// In-memory structures present
    Loaded = 3,
    /// Unload requested, waiting for barriers to drain
    Unloading = 4,
    /// Dropped
    Deleted = 5,
}

impl CollectionStatus {
    /// Whether the status can move to `Loaded` through a use
    pub fn is_loadable(&self) -> bool {
        matches!(self, CollectionStatus::NewBorn | CollectionStatus::Unloaded)
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectionStatus::Corrupted => "corrupted",
            CollectionStatus::NewBorn => "new born",
            CollectionStatus::Unloaded => "unloaded",
            CollectionStatus::Loaded => "loaded",
            CollectionStatus::Unloading => "unloading",
            CollectionStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Direction filter for edge index lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// Edges whose `_to` is the vertex
    In,
    /// Edges whose `_from` is the vertex
    Out,
    /// Either endpoint
    Any,
}

impl EdgeDirection {
    /// Whether an edge stored with direction `stored` passes this filter
    #[inline]
    pub fn accepts(&self, stored: EdgeDirection) -> bool {
        match self {
            EdgeDirection::Any => true,
            dir => *dir == stored,
        }
    }
}

/// Textual document reference `"<collection-id>/<document-id>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentHandle {
    /// Collection part
    pub cid: CollectionId,
    /// Document part
    pub did: DocumentId,
}

impl DocumentHandle {
    /// Create a handle
    pub fn new(cid: CollectionId, did: DocumentId) -> Self {
        Self { cid, did }
    }

    /// Parse a handle, returning `None` on malformed input
    pub fn parse(s: &str) -> Option<Self> {
        let (cid, did) = s.split_once(HANDLE_SEPARATOR)?;
        let cid = cid.parse::<u64>().ok()?;
        let did = did.parse::<u64>().ok()?;
        Some(Self::new(CollectionId(cid), DocumentId(did)))
    }
}

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.cid, HANDLE_SEPARATOR, self.did)
    }
}

impl FromStr for DocumentHandle {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentHandle::parse(s)
            .ok_or_else(|| crate::Error::bad_parameter(format!("invalid document handle '{}'", s)))
    }
}

/// Endpoints of an edge document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeEndpoints {
    /// Source vertex (`_from`)
    pub from: DocumentHandle,
    /// Target vertex (`_to`)
    pub to: DocumentHandle,
}
