//! Operator evaluation
//!
//! Each index kind implements [`Evaluate`], one method per operator. The
//! defaults reject comparisons and NOT with `Error::Unsupported` and combine
//! AND/OR generically over document ids, so an index only overrides what it
//! can answer natively (hash: EQ; skiplist: EQ and ranges with bound
//! narrowing; bitmask: everything over masks).
//!
//! Results are lazy, finite and non-restartable. A document matching both
//! sides of an OR is returned once.

use crate::operator::{ComparisonOp, IndexOperator, Literal};
use rustc_hash::FxHashSet;
use shoal_core::{DocumentId, Error, IndexKind, Result};

/// Lazy sequence of matching documents
pub type Matches<'a> = Box<dyn Iterator<Item = DocumentId> + 'a>;

/// Per-operator evaluation entry points of an index
pub trait Evaluate {
    /// Kind named in `Unsupported` errors
    fn evaluated_kind(&self) -> IndexKind;

    /// Documents whose key equals `values`
    fn eval_eq<'a>(&'a self, values: &[Literal]) -> Result<Matches<'a>> {
        let _ = values;
        Err(unsupported(self.evaluated_kind(), ComparisonOp::Eq.name()))
    }

    /// Documents whose key differs from `values`
    fn eval_ne<'a>(&'a self, values: &[Literal]) -> Result<Matches<'a>> {
        let _ = values;
        Err(unsupported(self.evaluated_kind(), ComparisonOp::Ne.name()))
    }

    /// Range comparison `key <op> values`
    fn eval_range<'a>(&'a self, op: ComparisonOp, values: &[Literal]) -> Result<Matches<'a>> {
        let _ = values;
        Err(unsupported(self.evaluated_kind(), op.name()))
    }

    /// Documents matching both operands
    fn eval_and<'a>(&'a self, left: &IndexOperator, right: &IndexOperator) -> Result<Matches<'a>> {
        intersect(self, left, right)
    }

    /// Documents matching either operand
    fn eval_or<'a>(&'a self, left: &IndexOperator, right: &IndexOperator) -> Result<Matches<'a>> {
        union(self, left, right)
    }

    /// Documents not matching `inner`
    fn eval_not<'a>(&'a self, inner: &IndexOperator) -> Result<Matches<'a>> {
        let _ = inner;
        Err(unsupported(self.evaluated_kind(), "NOT"))
    }

    /// Upper bound on the number of matches, when cheap to compute
    fn estimate(&self, op: &IndexOperator) -> Option<usize> {
        let _ = op;
        None
    }
}

/// Evaluate `op` against `index`
pub fn evaluate<'a, E: Evaluate + ?Sized>(index: &'a E, op: &IndexOperator) -> Result<Matches<'a>> {
    match op {
        IndexOperator::Comparison { op, values } => match op {
            ComparisonOp::Eq => index.eval_eq(values),
            ComparisonOp::Ne => index.eval_ne(values),
            range => index.eval_range(*range, values),
        },
        IndexOperator::And(l, r) => index.eval_and(l, r),
        IndexOperator::Or(l, r) => index.eval_or(l, r),
        IndexOperator::Not(inner) => index.eval_not(inner),
    }
}

/// Generic AND: materialize the cheaper side, filter the other
pub fn intersect<'a, E: Evaluate + ?Sized>(
    index: &'a E,
    left: &IndexOperator,
    right: &IndexOperator,
) -> Result<Matches<'a>> {
    let (first, second) = match (index.estimate(left), index.estimate(right)) {
        (Some(l), Some(r)) if r < l => (right, left),
        _ => (left, right),
    };
    let keep: FxHashSet<DocumentId> = evaluate(index, first)?.collect();
    if keep.is_empty() {
        return Ok(Box::new(std::iter::empty()));
    }
    let rest = evaluate(index, second)?;
    Ok(Box::new(rest.filter(move |did| keep.contains(did))))
}

/// Generic OR: chain both sides, dropping repeated documents
pub fn union<'a, E: Evaluate + ?Sized>(
    index: &'a E,
    left: &IndexOperator,
    right: &IndexOperator,
) -> Result<Matches<'a>> {
    let left = evaluate(index, left)?;
    let right = evaluate(index, right)?;
    let mut seen = FxHashSet::default();
    Ok(Box::new(left.chain(right).filter(move |did| seen.insert(*did))))
}

/// `Unsupported` error for `operator` on `kind`
pub fn unsupported(kind: IndexKind, operator: &'static str) -> Error {
    Error::Unsupported {
        index_kind: kind.name(),
        operator,
    }
}

/// Plain values of a hash or skiplist leaf
pub(crate) fn plain_values(kind: IndexKind, values: &[Literal]) -> Result<Vec<shoal_core::IndexValue>> {
    values
        .iter()
        .map(|lit| {
            lit.as_value().cloned().ok_or_else(|| {
                Error::bad_parameter(format!("{} index compares plain values only", kind))
            })
        })
        .collect()
}
