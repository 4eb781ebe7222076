//! Attribute path registry
//!
//! Indexes address document attributes by dotted path (`"address.city"`).
//! The shaper resolves each path once to a small stable integer so that key
//! extraction on the hot path walks pre-split segments instead of re-parsing
//! attribute names.

use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Stable identifier of an attribute path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributePathId(u32);

impl AttributePathId {
    /// Raw value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AttributePathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct PathEntry {
    name: String,
    segments: Box<[String]>,
}

/// Concurrent registry mapping attribute paths to identifiers
///
/// Identifiers are assigned densely from zero in registration order and are
/// never reused. A database owns one shaper and hands it to every collection
/// it loads.
pub struct Shaper {
    by_name: DashMap<String, AttributePathId>,
    paths: RwLock<Vec<Arc<PathEntry>>>,
}

impl Shaper {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            paths: RwLock::new(Vec::new()),
        }
    }

    /// Resolve a dotted path, registering it on first sight
    ///
    /// # Errors
    ///
    /// `BadParameter` if the path is empty or contains an empty segment.
    pub fn find_or_create(&self, path: &str) -> Result<AttributePathId> {
        if let Some(pid) = self.by_name.get(path) {
            return Ok(*pid);
        }
        let segments = split_path(path)?;
        let pid = *self.by_name.entry(path.to_string()).or_insert_with(|| {
            let mut paths = self.paths.write();
            let pid = AttributePathId(paths.len() as u32);
            paths.push(Arc::new(PathEntry {
                name: path.to_string(),
                segments,
            }));
            pid
        });
        Ok(pid)
    }

    /// Resolve a path without registering it
    pub fn lookup(&self, path: &str) -> Option<AttributePathId> {
        self.by_name.get(path).map(|pid| *pid)
    }

    /// Dotted name of a registered path
    pub fn name(&self, pid: AttributePathId) -> Option<String> {
        self.entry(pid).map(|e| e.name.clone())
    }

    /// Walk a registered path inside a document
    ///
    /// Returns `None` when the path is unknown or any segment is missing or
    /// crosses a non-object value.
    pub fn extract<'d>(&self, pid: AttributePathId, doc: &'d JsonValue) -> Option<&'d JsonValue> {
        let entry = self.entry(pid)?;
        walk(doc, entry.segments.iter().map(String::as_str))
    }

    /// Number of registered paths
    pub fn len(&self) -> usize {
        self.paths.read().len()
    }

    /// Whether no paths are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, pid: AttributePathId) -> Option<Arc<PathEntry>> {
        self.paths.read().get(pid.0 as usize).cloned()
    }
}

impl Default for Shaper {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Shaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shaper").field("paths", &self.len()).finish()
    }
}

/// Walk a dotted path inside a document without registering it
///
/// Resolves exactly like [`Shaper::extract`]: every segment names a member
/// of an object, so a member whose own key contains a dot is never reached.
pub fn walk_path<'d>(doc: &'d JsonValue, path: &str) -> Option<&'d JsonValue> {
    walk(doc, path.split('.'))
}

fn walk<'d, 's>(
    doc: &'d JsonValue,
    segments: impl IntoIterator<Item = &'s str>,
) -> Option<&'d JsonValue> {
    segments
        .into_iter()
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

fn split_path(path: &str) -> Result<Box<[String]>> {
    if path.is_empty() {
        return Err(Error::bad_parameter("attribute path cannot be empty"));
    }
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(Error::bad_parameter(format!(
            "attribute path '{}' contains an empty segment",
            path
        )));
    }
    Ok(segments.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_find_or_create_is_stable() {
        let shaper = Shaper::new();
        let a = shaper.find_or_create("name").unwrap();
        let b = shaper.find_or_create("address.city").unwrap();
        assert_ne!(a, b);
        assert_eq!(shaper.find_or_create("name").unwrap(), a);
        assert_eq!(shaper.lookup("address.city"), Some(b));
        assert_eq!(shaper.name(b).as_deref(), Some("address.city"));
        assert_eq!(shaper.len(), 2);
    }

    #[test]
    fn test_invalid_paths() {
        let shaper = Shaper::new();
        assert!(shaper.find_or_create("").is_err());
        assert!(shaper.find_or_create("a..b").is_err());
        assert!(shaper.find_or_create(".a").is_err());
        assert!(shaper.is_empty());
    }

    #[test]
    fn test_extract_nested() {
        let shaper = Shaper::new();
        let pid = shaper.find_or_create("address.city").unwrap();
        let doc = json!({"address": {"city": "Oslo"}});
        assert_eq!(shaper.extract(pid, &doc), Some(&json!("Oslo")));

        let missing = json!({"address": "flat"});
        assert_eq!(shaper.extract(pid, &missing), None);
    }

    #[test]
    fn test_walk_path_ignores_dotted_keys() {
        let shaper = Shaper::new();
        let pid = shaper.find_or_create("a.b").unwrap();
        let nested = json!({"a": {"b": 1}});
        let flat = json!({"a.b": 1});

        assert_eq!(walk_path(&nested, "a.b"), Some(&json!(1)));
        assert_eq!(walk_path(&flat, "a.b"), None);
        assert_eq!(walk_path(&flat, "a.b"), shaper.extract(pid, &flat));
        assert_eq!(walk_path(&json!([1]), "0"), None);
    }

    #[test]
    fn test_concurrent_registration_assigns_one_id() {
        let shaper = Arc::new(Shaper::new());
        let ids: Vec<AttributePathId> = (0..8)
            .map(|_| {
                let shaper = Arc::clone(&shaper);
                thread::spawn(move || shaper.find_or_create("x.y").unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(shaper.len(), 1);
    }
}
