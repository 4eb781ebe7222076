//! Ordered (skiplist) index
//!
//! Keeps `(key tuple, document)` pairs in total order. Leaf comparisons
//! address a prefix of the index fields and compare lexicographically on
//! that prefix, so `EQ(5)` on an index over `(x, y)` matches every key
//! starting with `x = 5` and `GT(5, 3)` matches keys after `(5, 3, ..)`.
//!
//! Every comparison except NE becomes a key range bounded by positions that
//! sit just before or just after all keys sharing a prefix:
//!
//! ```text
//! EQ p  ->  (before p, after p)
//! GT p  ->  (after p,  ..)         GE p  ->  (before p, ..)
//! LT p  ->  (..,       before p)   LE p  ->  (..,       after p)
//! ```
//!
//! AND of ranges narrows the bounds instead of intersecting id sets; NE is
//! LT chained with GT; NOT is pushed down to the complementary comparisons.
//! Documents missing an indexed attribute are not indexed.

use crate::eval::{evaluate, intersect, plain_values, Evaluate, Matches};
use crate::key::{KeyExtractor, MissingPolicy};
use crate::operator::{ComparisonOp, IndexOperator, Literal};
use crate::traits::{IndexedDocument, SecondaryIndex};
use shoal_core::{
    render_key, DocumentId, Error, IndexDefinition, IndexKey, IndexKind, IndexValue, Result,
    Shaper,
};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    Before,
    After,
}

/// Point between keys: before or after every key starting with `prefix`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    prefix: IndexKey,
    side: Side,
}

impl Position {
    /// Where `key` lies relative to this position; never `Equal`
    fn locate(&self, key: &[IndexValue]) -> Ordering {
        let n = self.prefix.len().min(key.len());
        match key[..n].cmp(&self.prefix[..n]) {
            Ordering::Equal => match self.side {
                Side::Before => Ordering::Greater,
                Side::After => Ordering::Less,
            },
            ord => ord,
        }
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        let n = self.prefix.len().min(other.prefix.len());
        match self.prefix[..n].cmp(&other.prefix[..n]) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // A shorter prefix encloses every position extending it.
        match self.prefix.len().cmp(&other.prefix.len()) {
            Ordering::Equal => self.side.cmp(&other.side),
            Ordering::Less => match self.side {
                Side::Before => Ordering::Less,
                Side::After => Ordering::Greater,
            },
            Ordering::Greater => match other.side {
                Side::Before => Ordering::Greater,
                Side::After => Ordering::Less,
            },
        }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keys strictly between `lower` and `upper`
#[derive(Debug, Clone, Default)]
struct KeyRange {
    lower: Option<Position>,
    upper: Option<Position>,
}

impl KeyRange {
    fn from_leaf(op: ComparisonOp, prefix: IndexKey) -> Option<KeyRange> {
        let at = |side| {
            Some(Position {
                prefix: prefix.clone(),
                side,
            })
        };
        Some(match op {
            ComparisonOp::Eq => KeyRange {
                lower: at(Side::Before),
                upper: at(Side::After),
            },
            ComparisonOp::Gt => KeyRange {
                lower: at(Side::After),
                upper: None,
            },
            ComparisonOp::Ge => KeyRange {
                lower: at(Side::Before),
                upper: None,
            },
            ComparisonOp::Lt => KeyRange {
                lower: None,
                upper: at(Side::Before),
            },
            ComparisonOp::Le => KeyRange {
                lower: None,
                upper: at(Side::After),
            },
            ComparisonOp::Ne => return None,
        })
    }

    fn intersect(self, other: KeyRange) -> KeyRange {
        let lower = match (self.lower, other.lower) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let upper = match (self.upper, other.upper) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        KeyRange { lower, upper }
    }

    fn is_empty(&self) -> bool {
        matches!((&self.lower, &self.upper), (Some(l), Some(u)) if l >= u)
    }
}

/// Ordered index over a key tuple
#[derive(Debug)]
pub struct SkiplistIndex {
    definition: IndexDefinition,
    extractor: KeyExtractor,
    entries: BTreeSet<(IndexKey, DocumentId)>,
}

impl SkiplistIndex {
    /// Create an empty index for `definition`
    pub fn new(definition: IndexDefinition, shaper: Arc<Shaper>) -> Result<Self> {
        let extractor = KeyExtractor::new(shaper, &definition.fields, MissingPolicy::Skip)?;
        Ok(Self {
            definition,
            extractor,
            entries: BTreeSet::new(),
        })
    }

    /// Whether the index enforces uniqueness
    pub fn is_unique(&self) -> bool {
        self.definition.unique
    }

    /// All documents in key order
    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, DocumentId)> + '_ {
        self.entries.iter().map(|(k, d)| (k, *d))
    }

    fn holder_of(&self, key: &IndexKey) -> Option<DocumentId> {
        let start = (key.clone(), DocumentId(0));
        self.entries
            .range(start..)
            .next()
            .filter(|(k, _)| k == key)
            .map(|(_, did)| *did)
    }

    fn leaf_prefix(&self, values: &[Literal]) -> Result<IndexKey> {
        let fields = self.extractor.field_count();
        if values.is_empty() || values.len() > fields {
            return Err(Error::bad_parameter(format!(
                "skiplist index on {} field(s) takes between 1 and {} values, got {}",
                fields,
                fields,
                values.len()
            )));
        }
        Ok(plain_values(IndexKind::Skiplist, values)?.into_iter().collect())
    }

    fn range_of(&self, op: &IndexOperator) -> Result<Option<KeyRange>> {
        match op {
            IndexOperator::Comparison { op, values } => {
                Ok(KeyRange::from_leaf(*op, self.leaf_prefix(values)?))
            }
            IndexOperator::And(l, r) => match (self.range_of(l)?, self.range_of(r)?) {
                (Some(a), Some(b)) => Ok(Some(a.intersect(b))),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn scan(&self, range: KeyRange) -> Matches<'_> {
        if range.is_empty() {
            return Box::new(std::iter::empty());
        }
        let KeyRange { lower, upper } = range;
        let start = match &lower {
            Some(pos) => Bound::Included((pos.prefix.clone(), DocumentId(0))),
            None => Bound::Unbounded,
        };
        Box::new(
            self.entries
                .range((start, Bound::Unbounded))
                .skip_while(move |(key, _)| {
                    lower
                        .as_ref()
                        .map_or(false, |p| p.locate(key) != Ordering::Greater)
                })
                .take_while(move |(key, _)| {
                    upper
                        .as_ref()
                        .map_or(true, |p| p.locate(key) == Ordering::Less)
                })
                .map(|(_, did)| *did),
        )
    }
}

impl Evaluate for SkiplistIndex {
    fn evaluated_kind(&self) -> IndexKind {
        IndexKind::Skiplist
    }

    fn eval_eq<'a>(&'a self, values: &[Literal]) -> Result<Matches<'a>> {
        self.eval_range(ComparisonOp::Eq, values)
    }

    fn eval_ne<'a>(&'a self, values: &[Literal]) -> Result<Matches<'a>> {
        let below = self.eval_range(ComparisonOp::Lt, values)?;
        let above = self.eval_range(ComparisonOp::Gt, values)?;
        Ok(Box::new(below.chain(above)))
    }

    fn eval_range<'a>(&'a self, op: ComparisonOp, values: &[Literal]) -> Result<Matches<'a>> {
        let prefix = self.leaf_prefix(values)?;
        match KeyRange::from_leaf(op, prefix) {
            Some(range) => Ok(self.scan(range)),
            None => self.eval_ne(values),
        }
    }

    fn eval_and<'a>(&'a self, left: &IndexOperator, right: &IndexOperator) -> Result<Matches<'a>> {
        match (self.range_of(left)?, self.range_of(right)?) {
            (Some(a), Some(b)) => Ok(self.scan(a.intersect(b))),
            _ => intersect(self, left, right),
        }
    }

    fn eval_not<'a>(&'a self, inner: &IndexOperator) -> Result<Matches<'a>> {
        evaluate(self, &inner.clone().negate())
    }
}

impl SecondaryIndex for SkiplistIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>) -> Result<()> {
        let Some(key) = self.extractor.extract(doc.body) else {
            return Ok(());
        };
        if self.is_unique() {
            if let Some(holder) = self.holder_of(&key) {
                if holder != doc.did {
                    return Err(Error::UniqueConstraintViolated {
                        index: self.definition.id.as_u64(),
                        key: render_key(&key),
                    });
                }
            }
        }
        self.entries.insert((key, doc.did));
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>) {
        if let Some(key) = self.extractor.extract(doc.body) {
            self.entries.remove(&(key, doc.did));
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
