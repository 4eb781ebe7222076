//! Document directory (primary index)
//!
//! An open-addressed hash table keyed by document id with linear probing and
//! power-of-two capacity. It is the single source of truth for whether a
//! document exists.
//!
//! Slots are never vacated while the table is in use: deleting a document
//! sets the tombstone on its pointer and leaves the slot in place, so slot
//! order (used by full scans) is stable for as long as a reader holds a
//! barrier. Tombstoned slots are dropped by `purge_tombstones`, which callers
//! only run when no barrier is outstanding.
//!
//! The table doubles once occupied slots reach two thirds of capacity. A slot
//! array that cannot be allocated is reported as `ResourceExhausted` and the
//! table keeps its previous contents.

use crate::datafile::MarkerLocation;
use crate::document::{Deletion, DocumentPointer};
use rand::Rng;
use rustc_hash::FxHasher;
use shoal_core::{DocumentId, Error, Result};
use std::hash::{Hash, Hasher};

const MIN_CAPACITY: usize = 16;

/// Primary index mapping document ids to pointers
#[derive(Debug, Clone)]
pub struct DocumentDirectory {
    slots: Vec<Option<DocumentPointer>>,
    /// Occupied slots, tombstones included
    used: usize,
    /// Occupied slots holding live documents
    live: usize,
}

impl DocumentDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            slots: vec![None; MIN_CAPACITY],
            used: 0,
            live: 0,
        }
    }

    /// Create a directory able to hold `n` documents without resizing
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if the slot array cannot be allocated.
    pub fn with_capacity(n: usize) -> Result<Self> {
        Ok(Self {
            slots: allocate(capacity_for(n)?)?,
            used: 0,
            live: 0,
        })
    }

    /// Number of live documents
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether there are no live documents
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of occupied slots, tombstones included
    pub fn slot_count(&self) -> usize {
        self.used
    }

    /// Number of tombstoned slots
    pub fn tombstone_count(&self) -> usize {
        self.used - self.live
    }

    /// Table capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Insert a new pointer
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the id already has a slot, live or tombstoned;
    /// `ResourceExhausted` if the table has to grow and cannot.
    pub fn insert(&mut self, ptr: DocumentPointer) -> Result<()> {
        if (self.used + 1) * 3 >= self.slots.len() * 2 {
            let doubled = self
                .slots
                .len()
                .checked_mul(2)
                .ok_or_else(|| exhausted(format!("directory of {} slots", self.slots.len())))?;
            self.resize(doubled)?;
        }
        match self.find(ptr.did) {
            Ok(_) => Err(Error::AlreadyExists(format!("document {}", ptr.did))),
            Err(idx) => {
                if !ptr.is_deleted() {
                    self.live += 1;
                }
                self.used += 1;
                self.slots[idx] = Some(ptr);
                Ok(())
            }
        }
    }

    /// Replace an existing pointer in place, keeping its slot
    ///
    /// Returns the previous pointer.
    pub fn update(&mut self, ptr: DocumentPointer) -> Result<DocumentPointer> {
        let idx = self
            .find(ptr.did)
            .map_err(|_| Error::not_found(format!("document {}", ptr.did)))?;
        let slot = &mut self.slots[idx];
        let previous = match slot.replace(ptr) {
            Some(p) => p,
            None => return Err(Error::corrupted("directory slot emptied during update")),
        };
        let now_deleted = slot.as_ref().map_or(true, DocumentPointer::is_deleted);
        match (previous.is_deleted(), now_deleted) {
            (false, true) => self.live -= 1,
            (true, false) => self.live += 1,
            _ => {}
        }
        Ok(previous)
    }

    /// Tombstone a live document
    ///
    /// Returns the pointer as it was before deletion.
    pub fn remove(&mut self, did: DocumentId, deletion: Deletion) -> Result<DocumentPointer> {
        let idx = self
            .find(did)
            .map_err(|_| Error::not_found(format!("document {}", did)))?;
        match self.slots[idx].as_mut() {
            Some(ptr) if !ptr.is_deleted() => {
                let previous = ptr.clone();
                ptr.deletion = Some(deletion);
                self.live -= 1;
                Ok(previous)
            }
            _ => Err(Error::not_found(format!("document {}", did))),
        }
    }

    /// Pointer for `did`, tombstoned or not
    pub fn lookup(&self, did: DocumentId) -> Option<&DocumentPointer> {
        self.find(did).ok().and_then(|idx| self.slots[idx].as_ref())
    }

    /// Pointer for `did` if the document is live
    pub fn lookup_live(&self, did: DocumentId) -> Option<&DocumentPointer> {
        self.lookup(did).filter(|p| !p.is_deleted())
    }

    /// Move a document's content to a new location after compaction
    ///
    /// Only applies if the pointer still refers to `from`; returns whether
    /// the pointer was moved.
    pub fn relocate(&mut self, did: DocumentId, from: MarkerLocation, to: MarkerLocation) -> bool {
        let Ok(idx) = self.find(did) else {
            return false;
        };
        match self.slots[idx].as_mut() {
            Some(ptr) if ptr.location == from => {
                ptr.location = to;
                true
            }
            _ => false,
        }
    }

    /// A live document chosen by probing forward from a random slot
    ///
    /// Wraps around the table; returns `None` only when no document is live.
    pub fn random_live<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&DocumentPointer> {
        if self.live == 0 {
            return None;
        }
        let capacity = self.slots.len();
        let start = rng.gen_range(0..capacity);
        (0..capacity)
            .map(|i| (start + i) & (capacity - 1))
            .find_map(|idx| self.slots[idx].as_ref().filter(|p| !p.is_deleted()))
    }

    /// All pointers in slot order, tombstones included
    pub fn iter(&self) -> impl Iterator<Item = &DocumentPointer> {
        self.slots.iter().flatten()
    }

    /// Live pointers in slot order
    pub fn iter_live(&self) -> impl Iterator<Item = &DocumentPointer> {
        self.iter().filter(|p| !p.is_deleted())
    }

    /// Drop tombstoned slots, rehashing live entries
    ///
    /// Returns the number of slots freed. Must not run while a reader may
    /// be scanning in slot order.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if the new slot array cannot be allocated; the
    /// tombstones stay in place.
    pub fn purge_tombstones(&mut self) -> Result<usize> {
        let freed = self.tombstone_count();
        if freed == 0 {
            return Ok(0);
        }
        let slots = allocate(capacity_for(self.live)?)?;
        let old = std::mem::replace(&mut self.slots, slots);
        self.used = 0;
        self.live = 0;
        for ptr in old.into_iter().flatten().filter(|p| !p.is_deleted()) {
            self.place(ptr);
        }
        Ok(freed)
    }

    fn resize(&mut self, capacity: usize) -> Result<()> {
        let slots = allocate(capacity.max(MIN_CAPACITY))?;
        let old = std::mem::replace(&mut self.slots, slots);
        self.used = 0;
        self.live = 0;
        for ptr in old.into_iter().flatten() {
            self.place(ptr);
        }
        Ok(())
    }

    /// Insert without duplicate or load checks
    fn place(&mut self, ptr: DocumentPointer) {
        let mask = self.slots.len() - 1;
        let mut idx = home_slot(ptr.did, mask);
        while self.slots[idx].is_some() {
            idx = (idx + 1) & mask;
        }
        if !ptr.is_deleted() {
            self.live += 1;
        }
        self.used += 1;
        self.slots[idx] = Some(ptr);
    }

    /// Slot holding `did`, or the empty slot where it would go
    fn find(&self, did: DocumentId) -> std::result::Result<usize, usize> {
        let mask = self.slots.len() - 1;
        let mut idx = home_slot(did, mask);
        loop {
            match &self.slots[idx] {
                None => return Err(idx),
                Some(ptr) if ptr.did == did => return Ok(idx),
                Some(_) => idx = (idx + 1) & mask,
            }
        }
    }
}

impl Default for DocumentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn home_slot(did: DocumentId, mask: usize) -> usize {
    let mut hasher = FxHasher::default();
    did.hash(&mut hasher);
    (hasher.finish() as usize) & mask
}

/// Smallest power of two keeping `n` entries below two thirds load
fn capacity_for(n: usize) -> Result<usize> {
    n.checked_mul(3)
        .and_then(|x| (x / 2 + 1).checked_next_power_of_two())
        .map(|capacity| capacity.max(MIN_CAPACITY))
        .ok_or_else(|| exhausted(format!("directory for {} documents", n)))
}

fn allocate(capacity: usize) -> Result<Vec<Option<DocumentPointer>>> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(capacity)
        .map_err(|e| exhausted(format!("directory of {} slots: {}", capacity, e)))?;
    slots.resize(capacity, None);
    Ok(slots)
}

fn exhausted(what: String) -> Error {
    Error::ResourceExhausted(format!("{} exceeds addressable memory", what))
}
