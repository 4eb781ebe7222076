//! Bitmask index
//!
//! Every indexed attribute has a finite declared domain. A document is
//! stored as one mask with exactly one bit set per attribute: the bit of its
//! declared value, the "absent" bit when the attribute is missing, or the
//! "other" bit for an undeclared value when the index allows one.
//!
//! Conditions compile to predicates over masks, so AND, OR and NOT combine
//! per document without building id sets. A leaf constrains each attribute
//! to a set of bits; attributes given as `Literal::Unused` are not
//! constrained. An undeclared literal can only match the "other" bucket.

use crate::eval::{Evaluate, Matches};
use crate::key::{KeyExtractor, MissingPolicy};
use crate::operator::{ComparisonOp, IndexOperator, Literal};
use crate::traits::{IndexedDocument, SecondaryIndex};
use rustc_hash::FxHashMap;
use shoal_core::{DocumentId, Error, IndexDefinition, IndexKind, IndexValue, Result, Shaper};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;

/// Fixed-width bit set
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mask(SmallVec<[u64; 2]>);

impl Mask {
    fn zeroed(words: usize) -> Self {
        Mask(smallvec![0; words])
    }

    fn set(&mut self, bit: usize) {
        self.0[bit / 64] |= 1 << (bit % 64);
    }

    fn union_with(&mut self, other: &Mask) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a |= *b;
        }
    }

    fn intersects(&self, other: &Mask) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }
}

/// Bit assignment of one attribute
#[derive(Debug)]
struct FieldLayout {
    name: String,
    domain: Vec<IndexValue>,
    bits: FxHashMap<IndexValue, usize>,
    absent: usize,
    other: Option<usize>,
}

impl FieldLayout {
    fn stored_bit(&self, value: &IndexValue) -> Option<usize> {
        if value.is_absent() {
            return Some(self.absent);
        }
        self.bits.get(value).copied().or(self.other)
    }
}

/// Compiled condition
#[derive(Debug)]
enum Predicate {
    /// Every mask must share a bit with the document mask
    All(SmallVec<[Mask; 2]>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    fn matches(&self, mask: &Mask) -> bool {
        match self {
            Predicate::All(required) => required.iter().all(|r| r.intersects(mask)),
            Predicate::And(l, r) => l.matches(mask) && r.matches(mask),
            Predicate::Or(l, r) => l.matches(mask) || r.matches(mask),
            Predicate::Not(inner) => !inner.matches(mask),
        }
    }
}

/// Bitmask index over finite attribute domains
#[derive(Debug)]
pub struct BitmaskIndex {
    definition: IndexDefinition,
    extractor: KeyExtractor,
    fields: Vec<FieldLayout>,
    words: usize,
    docs: Vec<DocumentId>,
    masks: Vec<Mask>,
    positions: FxHashMap<DocumentId, usize>,
}

impl BitmaskIndex {
    /// Create an empty index for `definition`
    ///
    /// # Errors
    ///
    /// `BadParameter` if the definition carries no usable domains.
    pub fn new(definition: IndexDefinition, shaper: Arc<Shaper>) -> Result<Self> {
        definition.validate()?;
        let options = definition
            .bitmask
            .clone()
            .ok_or_else(|| Error::bad_parameter("bitmask index needs value domains"))?;
        let extractor = KeyExtractor::new(shaper, &definition.fields, MissingPolicy::Absent)?;

        let mut next = 0;
        let mut fields = Vec::with_capacity(definition.fields.len());
        for (name, declared) in definition.fields.iter().zip(options.domains.iter()) {
            let domain: Vec<IndexValue> = declared.iter().map(IndexValue::from_json).collect();
            let bits = domain
                .iter()
                .enumerate()
                .map(|(i, v)| (v.clone(), next + i))
                .collect();
            next += domain.len();
            let absent = next;
            next += 1;
            let other = options.allow_other.then(|| {
                next += 1;
                next - 1
            });
            fields.push(FieldLayout {
                name: name.clone(),
                domain,
                bits,
                absent,
                other,
            });
        }

        Ok(Self {
            definition,
            extractor,
            fields,
            words: (next + 63) / 64,
            docs: Vec::new(),
            masks: Vec::new(),
            positions: FxHashMap::default(),
        })
    }

    fn mask_of(&self, doc: &IndexedDocument<'_>) -> Result<Mask> {
        let mut mask = Mask::zeroed(self.words);
        let Some(key) = self.extractor.extract(doc.body) else {
            return Ok(mask);
        };
        for (field, value) in self.fields.iter().zip(key.iter()) {
            let bit = field.stored_bit(value).ok_or_else(|| {
                Error::bad_parameter(format!(
                    "value {} of '{}' is not in the bitmask domain",
                    value, field.name
                ))
            })?;
            mask.set(bit);
        }
        Ok(mask)
    }

    fn leaf(&self, op: ComparisonOp, values: &[Literal]) -> Result<Predicate> {
        if values.len() != self.fields.len() {
            return Err(Error::bad_parameter(format!(
                "bitmask index on {} field(s) needs one value per field, got {}",
                self.fields.len(),
                values.len()
            )));
        }

        let mut required = SmallVec::new();
        for (field, literal) in self.fields.iter().zip(values) {
            let candidates: &[IndexValue] = match literal {
                Literal::Unused => continue,
                Literal::Value(v) => std::slice::from_ref(v),
                Literal::AnyOf(vs) => vs,
            };
            let mut allowed = Mask::zeroed(self.words);
            for value in candidates {
                match op {
                    ComparisonOp::Eq | ComparisonOp::Ne => {
                        if let Some(bit) = field.stored_bit(value) {
                            allowed.set(bit);
                        }
                    }
                    range => {
                        let mut bits = Mask::zeroed(self.words);
                        for declared in &field.domain {
                            if range.holds(declared.cmp(value)) {
                                if let Some(bit) = field.bits.get(declared) {
                                    bits.set(*bit);
                                }
                            }
                        }
                        allowed.union_with(&bits);
                    }
                }
            }
            required.push(allowed);
        }

        let clause = Predicate::All(required);
        Ok(match op {
            ComparisonOp::Ne => Predicate::Not(Box::new(clause)),
            _ => clause,
        })
    }

    fn compile(&self, op: &IndexOperator) -> Result<Predicate> {
        Ok(match op {
            IndexOperator::Comparison { op, values } => self.leaf(*op, values)?,
            IndexOperator::And(l, r) => {
                Predicate::And(Box::new(self.compile(l)?), Box::new(self.compile(r)?))
            }
            IndexOperator::Or(l, r) => {
                Predicate::Or(Box::new(self.compile(l)?), Box::new(self.compile(r)?))
            }
            IndexOperator::Not(inner) => Predicate::Not(Box::new(self.compile(inner)?)),
        })
    }

    fn run(&self, predicate: Predicate) -> Matches<'_> {
        Box::new(
            self.docs
                .iter()
                .zip(self.masks.iter())
                .filter(move |(_, mask)| predicate.matches(mask))
                .map(|(did, _)| *did),
        )
    }
}

impl Evaluate for BitmaskIndex {
    fn evaluated_kind(&self) -> IndexKind {
        IndexKind::Bitmask
    }

    fn eval_eq<'a>(&'a self, values: &[Literal]) -> Result<Matches<'a>> {
        Ok(self.run(self.leaf(ComparisonOp::Eq, values)?))
    }

    fn eval_ne<'a>(&'a self, values: &[Literal]) -> Result<Matches<'a>> {
        Ok(self.run(self.leaf(ComparisonOp::Ne, values)?))
    }

    fn eval_range<'a>(&'a self, op: ComparisonOp, values: &[Literal]) -> Result<Matches<'a>> {
        Ok(self.run(self.leaf(op, values)?))
    }

    fn eval_and<'a>(&'a self, left: &IndexOperator, right: &IndexOperator) -> Result<Matches<'a>> {
        let predicate = Predicate::And(Box::new(self.compile(left)?), Box::new(self.compile(right)?));
        Ok(self.run(predicate))
    }

    fn eval_or<'a>(&'a self, left: &IndexOperator, right: &IndexOperator) -> Result<Matches<'a>> {
        let predicate = Predicate::Or(Box::new(self.compile(left)?), Box::new(self.compile(right)?));
        Ok(self.run(predicate))
    }

    fn eval_not<'a>(&'a self, inner: &IndexOperator) -> Result<Matches<'a>> {
        Ok(self.run(Predicate::Not(Box::new(self.compile(inner)?))))
    }
}

impl SecondaryIndex for BitmaskIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>) -> Result<()> {
        if self.positions.contains_key(&doc.did) {
            return Ok(());
        }
        let mask = self.mask_of(doc)?;
        self.positions.insert(doc.did, self.docs.len());
        self.docs.push(doc.did);
        self.masks.push(mask);
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>) {
        let Some(pos) = self.positions.remove(&doc.did) else {
            return;
        };
        self.docs.swap_remove(pos);
        self.masks.swap_remove(pos);
        if let Some(moved) = self.docs.get(pos) {
            self.positions.insert(*moved, pos);
        }
    }

    fn len(&self) -> usize {
        self.docs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluate;
    use serde_json::{json, Value as JsonValue};

    fn index(allow_other: bool) -> BitmaskIndex {
        let def = IndexDefinition::bitmask(
            [
                ("color", vec![json!("red"), json!("green"), json!("blue")]),
                ("size", vec![json!(1), json!(2), json!(3)]),
            ],
            allow_other,
        );
        BitmaskIndex::new(def, Arc::new(Shaper::new())).unwrap()
    }

    fn load(idx: &mut BitmaskIndex, docs: &[(u64, JsonValue)]) {
        for (did, body) in docs {
            idx.insert(&IndexedDocument::new(DocumentId(*did), body)).unwrap();
        }
    }

    fn ids(idx: &BitmaskIndex, op: &IndexOperator) -> Vec<u64> {
        let mut v: Vec<u64> = evaluate(idx, op).unwrap().map(|d| d.as_u64()).collect();
        v.sort();
        v
    }

    fn sample() -> BitmaskIndex {
        let mut idx = index(false);
        load(
            &mut idx,
            &[
                (1, json!({"color": "red", "size": 1})),
                (2, json!({"color": "green", "size": 2})),
                (3, json!({"color": "red", "size": 3})),
                (4, json!({"size": 2})),
            ],
        );
        idx
    }

    fn val(v: JsonValue) -> Literal {
        Literal::Value(IndexValue::from_json(&v))
    }

    #[test]
    fn test_equality_with_unused_field() {
        let idx = sample();
        let op = IndexOperator::eq([val(json!("red")), Literal::Unused]);
        assert_eq!(ids(&idx, &op), vec![1, 3]);
        let op = IndexOperator::eq([val(json!("red")), val(json!(3))]);
        assert_eq!(ids(&idx, &op), vec![3]);
        let op = IndexOperator::eq([Literal::Unused, Literal::Unused]);
        assert_eq!(ids(&idx, &op), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_any_of_values() {
        let idx = sample();
        let any = Literal::AnyOf(vec![IndexValue::from("red"), IndexValue::from("green")]);
        let op = IndexOperator::eq([any, val(json!(2))]);
        assert_eq!(ids(&idx, &op), vec![2]);
        let op = IndexOperator::eq([Literal::AnyOf(Vec::new()), Literal::Unused]);
        assert!(ids(&idx, &op).is_empty());
    }

    #[test]
    fn test_absent_attribute_matches_sentinel() {
        let idx = sample();
        let op = IndexOperator::eq([Literal::Value(IndexValue::Absent), Literal::Unused]);
        assert_eq!(ids(&idx, &op), vec![4]);
    }

    #[test]
    fn test_native_not_and_ne() {
        let idx = sample();
        let red = IndexOperator::eq([val(json!("red")), Literal::Unused]);
        assert_eq!(ids(&idx, &!red.clone()), vec![2, 4]);
        let ne = IndexOperator::ne([val(json!("red")), Literal::Unused]);
        assert_eq!(ids(&idx, &ne), vec![2, 4]);
        let op = red.or(IndexOperator::eq([Literal::Unused, val(json!(2))]));
        assert_eq!(ids(&idx, &op), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_range_over_domain() {
        let idx = sample();
        let op = IndexOperator::ge([Literal::Unused, val(json!(2))]);
        assert_eq!(ids(&idx, &op), vec![2, 3, 4]);
        let op = IndexOperator::lt([Literal::Unused, val(json!(2))])
            .and(IndexOperator::eq([val(json!("red")), Literal::Unused]));
        assert_eq!(ids(&idx, &op), vec![1]);
    }

    #[test]
    fn test_undeclared_value_rejected_without_other_bucket() {
        let mut idx = index(false);
        let body = json!({"color": "purple", "size": 1});
        let err = idx
            .insert(&IndexedDocument::new(DocumentId(1), &body))
            .unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_other_bucket() {
        let mut idx = index(true);
        load(
            &mut idx,
            &[
                (1, json!({"color": "purple", "size": 1})),
                (2, json!({"color": "red", "size": 1})),
            ],
        );
        let op = IndexOperator::eq([val(json!("teal")), Literal::Unused]);
        assert_eq!(ids(&idx, &op), vec![1]);
        let op = IndexOperator::eq([val(json!("red")), Literal::Unused]);
        assert_eq!(ids(&idx, &op), vec![2]);
    }

    #[test]
    fn test_remove_keeps_positions_consistent() {
        let mut idx = sample();
        let body = json!({"color": "red", "size": 1});
        idx.remove(&IndexedDocument::new(DocumentId(1), &body));
        assert_eq!(idx.len(), 3);
        let op = IndexOperator::eq([val(json!("red")), Literal::Unused]);
        assert_eq!(ids(&idx, &op), vec![3]);
        // The document moved into the freed slot is still removable.
        let body = json!({"size": 2});
        idx.remove(&IndexedDocument::new(DocumentId(4), &body));
        assert_eq!(idx.len(), 2);
        let all = IndexOperator::eq([Literal::Unused, Literal::Unused]);
        assert_eq!(ids(&idx, &all), vec![2, 3]);
    }

    #[test]
    fn test_value_count_must_match_fields() {
        let idx = sample();
        let err = evaluate(&idx, &IndexOperator::eq([val(json!("red"))]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::BadParameter(_)));
    }
}
