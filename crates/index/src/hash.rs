//! Hash index
//!
//! Maps a key tuple to the documents carrying it. Non-unique indexes keep
//! documents with missing attributes under the `Absent` sentinel so an
//! example lacking a field matches them; unique indexes leave such documents
//! out, since any number of them may coexist.

use crate::eval::{plain_values, Evaluate, Matches};
use crate::key::{KeyExtractor, MissingPolicy};
use crate::operator::{ComparisonOp, IndexOperator, Literal};
use crate::traits::{IndexedDocument, SecondaryIndex};
use rustc_hash::FxHashMap;
use shoal_core::{
    render_key, DocumentId, Error, IndexDefinition, IndexKey, IndexKind, IndexValue, Result,
    Shaper,
};
use smallvec::SmallVec;
use std::sync::Arc;

type Bucket = SmallVec<[DocumentId; 1]>;

/// Unique or non-unique hash index
#[derive(Debug)]
pub struct HashIndex {
    definition: IndexDefinition,
    extractor: KeyExtractor,
    buckets: FxHashMap<IndexKey, Bucket>,
    len: usize,
}

impl HashIndex {
    /// Create an empty index for `definition`
    pub fn new(definition: IndexDefinition, shaper: Arc<Shaper>) -> Result<Self> {
        let extractor = KeyExtractor::new(shaper, &definition.fields, MissingPolicy::Absent)?;
        Ok(Self {
            definition,
            extractor,
            buckets: FxHashMap::default(),
            len: 0,
        })
    }

    /// Whether the index enforces uniqueness
    pub fn is_unique(&self) -> bool {
        self.definition.unique
    }

    /// Documents stored under `key`
    pub fn lookup(&self, key: &[IndexValue]) -> &[DocumentId] {
        self.buckets.get(key).map(|b| b.as_slice()).unwrap_or(&[])
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.buckets.len()
    }

    fn key_of(&self, doc: &IndexedDocument<'_>) -> Option<IndexKey> {
        let key = self.extractor.extract(doc.body)?;
        if self.is_unique() && key.iter().any(IndexValue::is_absent) {
            return None;
        }
        Some(key)
    }

    fn leaf_key(&self, values: &[Literal]) -> Result<IndexKey> {
        if values.len() != self.extractor.field_count() {
            return Err(Error::bad_parameter(format!(
                "hash index on {} field(s) needs a value for every field, got {}",
                self.extractor.field_count(),
                values.len()
            )));
        }
        Ok(plain_values(IndexKind::Hash, values)?.into_iter().collect())
    }
}

impl Evaluate for HashIndex {
    fn evaluated_kind(&self) -> IndexKind {
        IndexKind::Hash
    }

    fn eval_eq<'a>(&'a self, values: &[Literal]) -> Result<Matches<'a>> {
        let key = self.leaf_key(values)?;
        Ok(Box::new(self.lookup(&key).iter().copied()))
    }

    fn estimate(&self, op: &IndexOperator) -> Option<usize> {
        match op {
            IndexOperator::Comparison {
                op: ComparisonOp::Eq,
                values,
            } => self.leaf_key(values).ok().map(|k| self.lookup(&k).len()),
            IndexOperator::And(l, r) => match (self.estimate(l), self.estimate(r)) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            IndexOperator::Or(l, r) => Some(self.estimate(l)? + self.estimate(r)?),
            _ => None,
        }
    }
}

impl SecondaryIndex for HashIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>) -> Result<()> {
        let Some(key) = self.key_of(doc) else {
            return Ok(());
        };
        if let Some(bucket) = self.buckets.get(&key) {
            if bucket.contains(&doc.did) {
                return Ok(());
            }
            if self.is_unique() && !bucket.is_empty() {
                return Err(Error::UniqueConstraintViolated {
                    index: self.definition.id.as_u64(),
                    key: render_key(&key),
                });
            }
        }
        self.buckets.entry(key).or_default().push(doc.did);
        self.len += 1;
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>) {
        let Some(key) = self.key_of(doc) else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&key) {
            if let Some(pos) = bucket.iter().position(|d| *d == doc.did) {
                bucket.remove(pos);
                self.len -= 1;
            }
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluate;
    use serde_json::{json, Value as JsonValue};

    fn index(fields: &[&str], unique: bool) -> HashIndex {
        HashIndex::new(
            IndexDefinition::hash(fields.iter().copied(), unique),
            Arc::new(Shaper::new()),
        )
        .unwrap()
    }

    fn insert(idx: &mut HashIndex, did: u64, body: &JsonValue) -> Result<()> {
        idx.insert(&IndexedDocument::new(DocumentId(did), body))
    }

    fn ids(m: Matches<'_>) -> Vec<u64> {
        let mut v: Vec<u64> = m.map(|d| d.as_u64()).collect();
        v.sort();
        v
    }

    #[test]
    fn test_non_unique_lookup() {
        let mut idx = index(&["x"], false);
        insert(&mut idx, 1, &json!({"x": 5})).unwrap();
        insert(&mut idx, 2, &json!({"x": 9})).unwrap();
        insert(&mut idx, 3, &json!({"x": 5})).unwrap();
        assert_eq!(idx.len(), 3);
        assert_eq!(ids(evaluate(&idx, &IndexOperator::eq([5i64])).unwrap()), vec![1, 3]);
    }

    #[test]
    fn test_unique_violation_leaves_index_unchanged() {
        let mut idx = index(&["email"], true);
        insert(&mut idx, 1, &json!({"email": "a@x"})).unwrap();
        let err = insert(&mut idx, 2, &json!({"email": "a@x"})).unwrap_err();
        assert!(matches!(err, Error::UniqueConstraintViolated { .. }));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.key_count(), 1);
        assert_eq!(idx.lookup(&[IndexValue::from("a@x")]), &[DocumentId(1)]);
    }

    #[test]
    fn test_reinsert_same_document_is_idempotent() {
        let mut idx = index(&["email"], true);
        let body = json!({"email": "a@x"});
        insert(&mut idx, 1, &body).unwrap();
        insert(&mut idx, 1, &body).unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_absent_sentinel_matches_missing_attribute() {
        let mut idx = index(&["a", "b"], false);
        insert(&mut idx, 1, &json!({"a": 1})).unwrap();
        insert(&mut idx, 2, &json!({"a": 1, "b": null})).unwrap();
        let op = IndexOperator::eq([Literal::from(1i64), Literal::Value(IndexValue::Absent)]);
        assert_eq!(ids(evaluate(&idx, &op).unwrap()), vec![1]);
    }

    #[test]
    fn test_unique_skips_documents_with_missing_attributes() {
        let mut idx = index(&["email"], true);
        insert(&mut idx, 1, &json!({})).unwrap();
        insert(&mut idx, 2, &json!({"name": "b"})).unwrap();
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn test_remove() {
        let mut idx = index(&["x"], false);
        let body = json!({"x": 1});
        insert(&mut idx, 1, &body).unwrap();
        idx.remove(&IndexedDocument::new(DocumentId(1), &body));
        assert!(idx.is_empty());
        assert_eq!(idx.key_count(), 0);
        assert!(ids(evaluate(&idx, &IndexOperator::eq([1i64])).unwrap()).is_empty());
    }

    #[test]
    fn test_field_count_mismatch_is_bad_parameter() {
        let idx = index(&["a", "b"], false);
        let err = evaluate(&idx, &IndexOperator::eq([1i64])).err().unwrap();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn test_ranges_and_not_unsupported() {
        let idx = index(&["x"], false);
        assert!(matches!(
            evaluate(&idx, &IndexOperator::gt([1i64])).err().unwrap(),
            Error::Unsupported { index_kind: "hash", .. }
        ));
        assert!(matches!(
            evaluate(&idx, &!IndexOperator::eq([1i64])).err().unwrap(),
            Error::Unsupported { .. }
        ));
    }

    #[test]
    fn test_or_of_keys() {
        let mut idx = index(&["x"], false);
        for (did, x) in [(1, 1), (2, 2), (3, 3)] {
            insert(&mut idx, did, &json!({ "x": x })).unwrap();
        }
        let op = IndexOperator::eq([1i64]).or(IndexOperator::eq([3i64]));
        assert_eq!(ids(evaluate(&idx, &op).unwrap()), vec![1, 3]);
        assert_eq!(idx.estimate(&op), Some(2));
    }
}
