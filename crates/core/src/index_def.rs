//! Index definitions
//!
//! An `IndexDefinition` is the persisted description of an index: kind,
//! attribute paths, uniqueness and kind-specific options. Index contents are
//! never persisted; a definition is all that is needed to rebuild an index by
//! replaying documents.

use crate::error::{Error, Result};
use crate::types::IndexId;
use crate::value::IndexValue;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Index variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Document directory keyed by document id
    Primary,
    /// Hash over a key tuple, unique or not
    Hash,
    /// Ordered index over a key tuple
    Skiplist,
    /// Bitmask over finite attribute domains
    Bitmask,
    /// Geo-spatial index over a coordinate pair
    Geo,
    /// Adjacency index of an edge collection
    Edge,
}

impl IndexKind {
    /// Lower-case name used in messages
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Primary => "primary",
            IndexKind::Hash => "hash",
            IndexKind::Skiplist => "skiplist",
            IndexKind::Bitmask => "bitmask",
            IndexKind::Geo => "geo",
            IndexKind::Edge => "edge",
        }
    }

    /// Whether an index of this kind is created with the collection
    pub fn is_builtin(&self) -> bool {
        matches!(self, IndexKind::Primary | IndexKind::Edge)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask-specific options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmaskOptions {
    /// Declared values per field, parallel to `IndexDefinition::fields`
    pub domains: Vec<Vec<JsonValue>>,
    /// Whether undeclared values map to an "other" bucket instead of failing
    #[serde(default)]
    pub allow_other: bool,
}

/// Persisted description of an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Identifier; assigned when the index is created
    #[serde(default)]
    pub id: IndexId,
    /// Index variant
    #[serde(rename = "type")]
    pub kind: IndexKind,
    /// Attribute paths in key order
    #[serde(default)]
    pub fields: Vec<String>,
    /// Whether a key tuple may map to at most one document
    #[serde(default)]
    pub unique: bool,
    /// Bitmask domains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitmask: Option<BitmaskOptions>,
    /// Single-field geo index stores `[lon, lat]` instead of `[lat, lon]`
    #[serde(default)]
    pub geo_json: bool,
}

impl IndexDefinition {
    fn base(kind: IndexKind, fields: Vec<String>) -> Self {
        Self {
            id: IndexId::default(),
            kind,
            fields,
            unique: false,
            bitmask: None,
            geo_json: false,
        }
    }

    /// Primary index definition
    pub fn primary() -> Self {
        Self::base(IndexKind::Primary, Vec::new())
    }

    /// Edge index definition
    pub fn edge() -> Self {
        Self::base(IndexKind::Edge, vec!["_from".to_string(), "_to".to_string()])
    }

    /// Hash index over `fields`
    pub fn hash<S: Into<String>>(fields: impl IntoIterator<Item = S>, unique: bool) -> Self {
        let mut def = Self::base(IndexKind::Hash, fields.into_iter().map(Into::into).collect());
        def.unique = unique;
        def
    }

    /// Skiplist index over `fields`
    pub fn skiplist<S: Into<String>>(fields: impl IntoIterator<Item = S>, unique: bool) -> Self {
        let mut def = Self::base(
            IndexKind::Skiplist,
            fields.into_iter().map(Into::into).collect(),
        );
        def.unique = unique;
        def
    }

    /// Bitmask index over `(field, domain)` pairs
    pub fn bitmask<S: Into<String>>(
        fields: impl IntoIterator<Item = (S, Vec<JsonValue>)>,
        allow_other: bool,
    ) -> Self {
        let (names, domains): (Vec<String>, Vec<Vec<JsonValue>>) =
            fields.into_iter().map(|(f, d)| (f.into(), d)).unzip();
        let mut def = Self::base(IndexKind::Bitmask, names);
        def.bitmask = Some(BitmaskOptions {
            domains,
            allow_other,
        });
        def
    }

    /// Geo index over one attribute holding a coordinate pair
    pub fn geo_location(field: impl Into<String>, geo_json: bool) -> Self {
        let mut def = Self::base(IndexKind::Geo, vec![field.into()]);
        def.geo_json = geo_json;
        def
    }

    /// Geo index over separate latitude and longitude attributes
    pub fn geo_pair(latitude: impl Into<String>, longitude: impl Into<String>) -> Self {
        Self::base(IndexKind::Geo, vec![latitude.into(), longitude.into()])
    }

    /// Same definition carrying `id`
    pub fn with_id(mut self, id: IndexId) -> Self {
        self.id = id;
        self
    }

    /// Whether two definitions describe the same index, ignoring ids
    pub fn is_equivalent(&self, other: &IndexDefinition) -> bool {
        self.kind == other.kind
            && self.fields == other.fields
            && self.unique == other.unique
            && self.bitmask == other.bitmask
            && self.geo_json == other.geo_json
    }

    /// Check structural consistency
    ///
    /// # Errors
    ///
    /// `BadParameter` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            IndexKind::Primary => {
                if !self.fields.is_empty() {
                    return Err(Error::bad_parameter("primary index takes no fields"));
                }
            }
            IndexKind::Edge => {}
            IndexKind::Hash | IndexKind::Skiplist => {
                if self.fields.is_empty() {
                    return Err(Error::bad_parameter(format!(
                        "{} index needs at least one field",
                        self.kind
                    )));
                }
            }
            IndexKind::Geo => {
                if self.unique {
                    return Err(Error::bad_parameter("geo index cannot be unique"));
                }
                if !(1..=2).contains(&self.fields.len()) {
                    return Err(Error::bad_parameter(
                        "geo index needs one location field or a latitude/longitude pair",
                    ));
                }
            }
            IndexKind::Bitmask => self.validate_bitmask()?,
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.is_empty() {
                return Err(Error::bad_parameter("index field cannot be empty"));
            }
            if !seen.insert(field.as_str()) {
                return Err(Error::bad_parameter(format!(
                    "duplicate index field '{}'",
                    field
                )));
            }
        }
        Ok(())
    }

    fn validate_bitmask(&self) -> Result<()> {
        if self.unique {
            return Err(Error::bad_parameter("bitmask index cannot be unique"));
        }
        let options = self
            .bitmask
            .as_ref()
            .ok_or_else(|| Error::bad_parameter("bitmask index needs value domains"))?;
        if self.fields.is_empty() || options.domains.len() != self.fields.len() {
            return Err(Error::bad_parameter(
                "bitmask index needs one value domain per field",
            ));
        }
        for (field, domain) in self.fields.iter().zip(&options.domains) {
            if domain.is_empty() {
                return Err(Error::bad_parameter(format!(
                    "bitmask domain of '{}' is empty",
                    field
                )));
            }
            let mut values: Vec<IndexValue> = domain.iter().map(IndexValue::from_json).collect();
            values.sort();
            if values.windows(2).any(|w| w[0] == w[1]) {
                return Err(Error::bad_parameter(format!(
                    "bitmask domain of '{}' contains duplicates",
                    field
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_serde_shape() {
        let def = IndexDefinition::hash(["a", "b"], true).with_id(IndexId(12));
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "hash");
        assert_eq!(json["id"], 12);
        assert_eq!(json["fields"], json!(["a", "b"]));
        assert!(json.get("bitmask").is_none());

        let back: IndexDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn test_equivalence_ignores_id() {
        let a = IndexDefinition::skiplist(["x"], false).with_id(IndexId(1));
        let b = IndexDefinition::skiplist(["x"], false).with_id(IndexId(2));
        let c = IndexDefinition::skiplist(["x"], true);
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        assert!(IndexDefinition::hash(Vec::<String>::new(), false)
            .validate()
            .is_err());
        assert!(IndexDefinition::hash(["a", "a"], false).validate().is_err());
        assert!(IndexDefinition::hash(["a"], false).validate().is_ok());
    }

    #[test]
    fn test_validate_bitmask() {
        let ok = IndexDefinition::bitmask([("color", vec![json!("red"), json!("blue")])], false);
        assert!(ok.validate().is_ok());

        let dup = IndexDefinition::bitmask([("n", vec![json!(1), json!(1.0)])], false);
        assert!(dup.validate().is_err());

        let empty = IndexDefinition::bitmask([("n", vec![])], true);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_validate_geo() {
        assert!(IndexDefinition::geo_location("loc", false).validate().is_ok());
        assert!(IndexDefinition::geo_pair("lat", "lon").validate().is_ok());
        let mut unique = IndexDefinition::geo_pair("lat", "lon");
        unique.unique = true;
        assert!(unique.validate().is_err());
    }

    #[test]
    fn test_builtin_kinds() {
        assert!(IndexKind::Primary.is_builtin());
        assert!(IndexKind::Edge.is_builtin());
        assert!(!IndexKind::Hash.is_builtin());
    }
}
