//! Key extraction
//!
//! A `KeyExtractor` turns a document body into the key tuple an index
//! stores. Attribute paths are resolved to shaper identifiers once, when the
//! index is created.

use serde_json::Value as JsonValue;
use shoal_core::{AttributePathId, IndexKey, IndexValue, Result, Shaper};
use smallvec::SmallVec;
use std::sync::Arc;

/// What to do with a document missing an indexed attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Do not index the document
    Skip,
    /// Index it with `IndexValue::Absent` in place of the attribute
    Absent,
}

/// Resolved attribute paths of one index
#[derive(Clone)]
pub struct KeyExtractor {
    shaper: Arc<Shaper>,
    paths: SmallVec<[AttributePathId; 2]>,
    missing: MissingPolicy,
}

impl KeyExtractor {
    /// Resolve `fields` through `shaper`
    pub fn new(shaper: Arc<Shaper>, fields: &[String], missing: MissingPolicy) -> Result<Self> {
        let paths = fields
            .iter()
            .map(|f| shaper.find_or_create(f))
            .collect::<Result<SmallVec<_>>>()?;
        Ok(Self {
            shaper,
            paths,
            missing,
        })
    }

    /// Resolved paths in field order
    pub fn paths(&self) -> &[AttributePathId] {
        &self.paths
    }

    /// Number of fields
    pub fn field_count(&self) -> usize {
        self.paths.len()
    }

    /// Raw attribute values in field order
    pub fn values<'d>(&self, body: &'d JsonValue) -> SmallVec<[Option<&'d JsonValue>; 2]> {
        self.paths
            .iter()
            .map(|pid| self.shaper.extract(*pid, body))
            .collect()
    }

    /// Key tuple of `body`, or `None` if the document is not indexed
    pub fn extract(&self, body: &JsonValue) -> Option<IndexKey> {
        let mut key = IndexKey::with_capacity(self.paths.len());
        for value in self.values(body) {
            match (value, self.missing) {
                (Some(v), _) => key.push(IndexValue::from_json(v)),
                (None, MissingPolicy::Absent) => key.push(IndexValue::Absent),
                (None, MissingPolicy::Skip) => return None,
            }
        }
        Some(key)
    }
}

impl std::fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExtractor")
            .field("paths", &self.paths)
            .field("missing", &self.missing)
            .finish()
    }
}
