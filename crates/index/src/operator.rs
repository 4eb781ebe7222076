//! Index operator trees
//!
//! An `IndexOperator` is the condition evaluated against one index. Leaves
//! compare the indexed key tuple with literal values given in index field
//! order; inner nodes combine leaves with AND, OR and NOT.
//!
//! Trees are immutable once built and owned by the caller. Construction from
//! the JSON example/condition formats lives in [`crate::condition`].

use shoal_core::{DocumentId, IndexValue};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Not;

/// Leaf comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
}

impl ComparisonOp {
    /// Upper-case operator name used in messages
    pub fn name(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "EQ",
            ComparisonOp::Ne => "NE",
            ComparisonOp::Lt => "LT",
            ComparisonOp::Le => "LE",
            ComparisonOp::Gt => "GT",
            ComparisonOp::Ge => "GE",
        }
    }

    /// Complementary comparison
    pub fn negate(&self) -> ComparisonOp {
        match self {
            ComparisonOp::Eq => ComparisonOp::Ne,
            ComparisonOp::Ne => ComparisonOp::Eq,
            ComparisonOp::Lt => ComparisonOp::Ge,
            ComparisonOp::Le => ComparisonOp::Gt,
            ComparisonOp::Gt => ComparisonOp::Le,
            ComparisonOp::Ge => ComparisonOp::Lt,
        }
    }

    /// Whether `stored <op> literal` holds, given `stored.cmp(literal)`
    #[inline]
    pub fn holds(&self, ord: Ordering) -> bool {
        match self {
            ComparisonOp::Eq => ord == Ordering::Equal,
            ComparisonOp::Ne => ord != Ordering::Equal,
            ComparisonOp::Lt => ord == Ordering::Less,
            ComparisonOp::Le => ord != Ordering::Greater,
            ComparisonOp::Gt => ord == Ordering::Greater,
            ComparisonOp::Ge => ord != Ordering::Less,
        }
    }

    /// Whether this is one of the four range comparisons
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            ComparisonOp::Lt | ComparisonOp::Le | ComparisonOp::Gt | ComparisonOp::Ge
        )
    }

    /// Parse the textual forms accepted in condition objects
    pub fn parse(s: &str) -> Option<ComparisonOp> {
        Some(match s {
            "==" | "=" | "eq" => ComparisonOp::Eq,
            "!=" | "<>" | "ne" => ComparisonOp::Ne,
            "<" | "lt" => ComparisonOp::Lt,
            "<=" | "le" => ComparisonOp::Le,
            ">" | "gt" => ComparisonOp::Gt,
            ">=" | "ge" => ComparisonOp::Ge,
            _ => return None,
        })
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Literal compared against one indexed attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// A single value
    Value(IndexValue),
    /// Any of several values (bitmask indexes)
    AnyOf(Vec<IndexValue>),
    /// Attribute not constrained (bitmask indexes)
    Unused,
}

impl Literal {
    /// The single value, if this literal is one
    pub fn as_value(&self) -> Option<&IndexValue> {
        match self {
            Literal::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<IndexValue> for Literal {
    fn from(value: IndexValue) -> Self {
        Literal::Value(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Value(IndexValue::Number(value))
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Value(IndexValue::Number(value as f64))
    }
}

impl From<DocumentId> for Literal {
    fn from(did: DocumentId) -> Self {
        Literal::Value(IndexValue::Number(did.as_u64() as f64))
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Value(IndexValue::String(value.to_string()))
    }
}

impl From<&serde_json::Value> for Literal {
    fn from(value: &serde_json::Value) -> Self {
        Literal::Value(IndexValue::from_json(value))
    }
}

/// Condition tree evaluated against one index
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOperator {
    /// Compare the key tuple with literals in index field order
    Comparison {
        /// Comparison
        op: ComparisonOp,
        /// One literal per leading index field
        values: Vec<Literal>,
    },
    /// Both sides match
    And(Box<IndexOperator>, Box<IndexOperator>),
    /// Either side matches
    Or(Box<IndexOperator>, Box<IndexOperator>),
    /// The operand does not match
    Not(Box<IndexOperator>),
}

impl IndexOperator {
    /// Leaf comparison
    pub fn comparison<L: Into<Literal>>(
        op: ComparisonOp,
        values: impl IntoIterator<Item = L>,
    ) -> Self {
        IndexOperator::Comparison {
            op,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `EQ` leaf
    pub fn eq<L: Into<Literal>>(values: impl IntoIterator<Item = L>) -> Self {
        Self::comparison(ComparisonOp::Eq, values)
    }

    /// `NE` leaf
    pub fn ne<L: Into<Literal>>(values: impl IntoIterator<Item = L>) -> Self {
        Self::comparison(ComparisonOp::Ne, values)
    }

    /// `LT` leaf
    pub fn lt<L: Into<Literal>>(values: impl IntoIterator<Item = L>) -> Self {
        Self::comparison(ComparisonOp::Lt, values)
    }

    /// `LE` leaf
    pub fn le<L: Into<Literal>>(values: impl IntoIterator<Item = L>) -> Self {
        Self::comparison(ComparisonOp::Le, values)
    }

    /// `GT` leaf
    pub fn gt<L: Into<Literal>>(values: impl IntoIterator<Item = L>) -> Self {
        Self::comparison(ComparisonOp::Gt, values)
    }

    /// `GE` leaf
    pub fn ge<L: Into<Literal>>(values: impl IntoIterator<Item = L>) -> Self {
        Self::comparison(ComparisonOp::Ge, values)
    }

    /// Conjunction with `other`
    pub fn and(self, other: IndexOperator) -> Self {
        IndexOperator::And(Box::new(self), Box::new(other))
    }

    /// Disjunction with `other`
    pub fn or(self, other: IndexOperator) -> Self {
        IndexOperator::Or(Box::new(self), Box::new(other))
    }

    /// Operator name used in messages
    pub fn name(&self) -> &'static str {
        match self {
            IndexOperator::Comparison { op, .. } => op.name(),
            IndexOperator::And(..) => "AND",
            IndexOperator::Or(..) => "OR",
            IndexOperator::Not(..) => "NOT",
        }
    }

    /// Equivalent tree with the negation pushed down to the leaves
    ///
    /// Leaves flip to their complementary comparison, AND and OR swap under
    /// De Morgan, and a double negation cancels. The result contains no
    /// `Not` node above a leaf that was not already negated.
    pub fn negate(self) -> IndexOperator {
        match self {
            IndexOperator::Comparison { op, values } => IndexOperator::Comparison {
                op: op.negate(),
                values,
            },
            IndexOperator::And(l, r) => IndexOperator::Or(Box::new(l.negate()), Box::new(r.negate())),
            IndexOperator::Or(l, r) => IndexOperator::And(Box::new(l.negate()), Box::new(r.negate())),
            IndexOperator::Not(inner) => *inner,
        }
    }

    /// Number of leaf comparisons
    pub fn leaf_count(&self) -> usize {
        match self {
            IndexOperator::Comparison { .. } => 1,
            IndexOperator::And(l, r) | IndexOperator::Or(l, r) => l.leaf_count() + r.leaf_count(),
            IndexOperator::Not(inner) => inner.leaf_count(),
        }
    }
}

impl Not for IndexOperator {
    type Output = IndexOperator;

    fn not(self) -> IndexOperator {
        IndexOperator::Not(Box::new(self))
    }
}

impl fmt::Display for IndexOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOperator::Comparison { op, values } => {
                write!(f, "{}(", op)?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match value {
                        Literal::Value(v) => write!(f, "{}", v)?,
                        Literal::AnyOf(vs) => {
                            f.write_str("any[")?;
                            for (j, v) in vs.iter().enumerate() {
                                if j > 0 {
                                    f.write_str(", ")?;
                                }
                                write!(f, "{}", v)?;
                            }
                            f.write_str("]")?;
                        }
                        Literal::Unused => f.write_str("_")?,
                    }
                }
                f.write_str(")")
            }
            IndexOperator::And(l, r) => write!(f, "AND({}, {})", l, r),
            IndexOperator::Or(l, r) => write!(f, "OR({}, {})", l, r),
            IndexOperator::Not(inner) => write!(f, "NOT({})", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_negation_is_involutive() {
        for op in [
            ComparisonOp::Eq,
            ComparisonOp::Ne,
            ComparisonOp::Lt,
            ComparisonOp::Le,
            ComparisonOp::Gt,
            ComparisonOp::Ge,
        ] {
            assert_eq!(op.negate().negate(), op);
            for ord in [Ordering::Less, Ordering::Equal, Ordering::Greater] {
                assert_ne!(op.holds(ord), op.negate().holds(ord));
            }
        }
    }

    #[test]
    fn test_parse_operator_aliases() {
        assert_eq!(ComparisonOp::parse("=="), Some(ComparisonOp::Eq));
        assert_eq!(ComparisonOp::parse("="), Some(ComparisonOp::Eq));
        assert_eq!(ComparisonOp::parse("<>"), Some(ComparisonOp::Ne));
        assert_eq!(ComparisonOp::parse("ge"), Some(ComparisonOp::Ge));
        assert_eq!(ComparisonOp::parse("~"), None);
    }

    #[test]
    fn test_negate_applies_de_morgan() {
        let tree = IndexOperator::eq([1i64]).and(IndexOperator::lt([5i64]));
        let negated = tree.negate();
        assert_eq!(
            negated,
            IndexOperator::ne([1i64]).or(IndexOperator::ge([5i64]))
        );
    }

    #[test]
    fn test_negate_cancels_double_not() {
        let leaf = IndexOperator::gt([3i64]);
        assert_eq!((!leaf.clone()).negate(), leaf);
    }

    #[test]
    fn test_display() {
        let tree = IndexOperator::eq([1i64]).or(!IndexOperator::le(["a"]));
        assert_eq!(tree.to_string(), "OR(EQ(1.0), NOT(LE(\"a\")))");
        assert_eq!(tree.leaf_count(), 2);
    }
}
