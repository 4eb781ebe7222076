//! Index values
//!
//! `IndexValue` is the representation indexes store and compare. It mirrors
//! JSON plus one extra variant, `Absent`, the sentinel for "attribute not
//! present" used by hash and bitmask indexes so equality queries can match
//! missing fields.
//!
//! Values carry a total order across types:
//! `Absent < Null < Bool < Number < String < Array < Object`.
//! Within a type the natural order applies; numbers compare with `-0.0 == 0.0`.

use serde_json::Value as JsonValue;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Key tuple extracted from a document, one value per indexed attribute
pub type IndexKey = SmallVec<[IndexValue; 2]>;

/// Comparable, hashable attribute value
#[derive(Debug, Clone)]
pub enum IndexValue {
    /// Attribute not present in the document
    Absent,
    /// JSON null
    Null,
    /// JSON boolean
    Bool(bool),
    /// JSON number (always held as f64)
    Number(f64),
    /// JSON string
    String(String),
    /// JSON array
    Array(Vec<IndexValue>),
    /// JSON object, entries sorted by key
    Object(Vec<(String, IndexValue)>),
}

impl IndexValue {
    /// Convert a JSON value
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => IndexValue::Null,
            JsonValue::Bool(b) => IndexValue::Bool(*b),
            JsonValue::Number(n) => IndexValue::Number(n.as_f64().unwrap_or(0.0)),
            JsonValue::String(s) => IndexValue::String(s.clone()),
            JsonValue::Array(items) => {
                IndexValue::Array(items.iter().map(IndexValue::from_json).collect())
            }
            JsonValue::Object(map) => {
                let mut entries: Vec<(String, IndexValue)> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), IndexValue::from_json(v)))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                IndexValue::Object(entries)
            }
        }
    }

    /// Convert back to JSON; `Absent` has no JSON form
    pub fn to_json(&self) -> Option<JsonValue> {
        Some(match self {
            IndexValue::Absent => return None,
            IndexValue::Null => JsonValue::Null,
            IndexValue::Bool(b) => JsonValue::Bool(*b),
            IndexValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            IndexValue::String(s) => JsonValue::String(s.clone()),
            IndexValue::Array(items) => {
                JsonValue::Array(items.iter().filter_map(IndexValue::to_json).collect())
            }
            IndexValue::Object(entries) => JsonValue::Object(
                entries
                    .iter()
                    .filter_map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect(),
            ),
        })
    }

    /// Numeric content, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            IndexValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether this is the absent sentinel
    pub fn is_absent(&self) -> bool {
        matches!(self, IndexValue::Absent)
    }

    /// Position of the variant in the cross-type order
    fn type_rank(&self) -> u8 {
        match self {
            IndexValue::Absent => 0,
            IndexValue::Null => 1,
            IndexValue::Bool(_) => 2,
            IndexValue::Number(_) => 3,
            IndexValue::String(_) => 4,
            IndexValue::Array(_) => 5,
            IndexValue::Object(_) => 6,
        }
    }
}

#[inline]
fn normalize(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexValue::Bool(a), IndexValue::Bool(b)) => a.cmp(b),
            (IndexValue::Number(a), IndexValue::Number(b)) => {
                normalize(*a).total_cmp(&normalize(*b))
            }
            (IndexValue::String(a), IndexValue::String(b)) => a.cmp(b),
            (IndexValue::Array(a), IndexValue::Array(b)) => a.cmp(b),
            (IndexValue::Object(a), IndexValue::Object(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl Hash for IndexValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            IndexValue::Absent | IndexValue::Null => {}
            IndexValue::Bool(b) => b.hash(state),
            IndexValue::Number(n) => normalize(*n).to_bits().hash(state),
            IndexValue::String(s) => s.hash(state),
            IndexValue::Array(items) => items.hash(state),
            IndexValue::Object(entries) => entries.hash(state),
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Some(json) => write!(f, "{}", json),
            None => write!(f, "<absent>"),
        }
    }
}

impl From<&JsonValue> for IndexValue {
    fn from(value: &JsonValue) -> Self {
        IndexValue::from_json(value)
    }
}

impl From<f64> for IndexValue {
    fn from(n: f64) -> Self {
        IndexValue::Number(n)
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        IndexValue::String(s.to_string())
    }
}

impl From<bool> for IndexValue {
    fn from(b: bool) -> Self {
        IndexValue::Bool(b)
    }
}

/// Render a key tuple for error messages
pub fn render_key(key: &[IndexValue]) -> String {
    let parts: Vec<String> = key.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}
