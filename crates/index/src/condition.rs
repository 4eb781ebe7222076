//! Operator construction from JSON
//!
//! Builds [`IndexOperator`] trees from the two request formats:
//!
//! - examples: `{"attr": value, ...}`, an all-equalities match;
//! - conditions: per-field range lists for skiplist indexes
//!   (`{"x": [["==", 5]], "y": [[">", 3], ["<=", 9]]}`) and nested boolean
//!   objects for bitmask indexes
//!   (`{"or": [{"==": {"color": "red"}}, {"not": {"==": {"size": 1}}}]}`).
//!
//! Request objects may name an index field by its dotted path as a key
//! (`{"a.b": 1}`) or spell it out nested (`{"a": {"b": 1}}`). Documents are
//! only ever resolved by walking the path. Example attributes that are not
//! index fields are ignored.

use crate::operator::{ComparisonOp, IndexOperator, Literal};
use serde_json::{Map, Value as JsonValue};
use shoal_core::{walk_path, Error, IndexDefinition, IndexKind, IndexValue, Result};

type JsonObject = Map<String, JsonValue>;

/// Equality operator for an example object
///
/// - hash: one value per field; a missing field compares as absent;
/// - skiplist: the longest prefix of fields present in the example;
/// - bitmask: present fields only, a list value meaning any of its elements.
///
/// # Errors
///
/// `BadParameter` if the example is not an object, covers no usable field,
/// or the index kind does not answer example queries.
pub fn from_example(definition: &IndexDefinition, example: &JsonValue) -> Result<IndexOperator> {
    let obj = example
        .as_object()
        .ok_or_else(|| Error::bad_parameter("example must be an object"))?;
    match definition.kind {
        IndexKind::Hash => {
            let values = definition.fields.iter().map(|field| {
                Literal::Value(
                    request_value(obj, field)
                        .map(IndexValue::from_json)
                        .unwrap_or(IndexValue::Absent),
                )
            });
            Ok(IndexOperator::eq(values))
        }
        IndexKind::Skiplist => {
            let values: Vec<Literal> = definition
                .fields
                .iter()
                .map_while(|field| request_value(obj, field).map(Literal::from))
                .collect();
            if values.is_empty() {
                return Err(Error::bad_parameter(format!(
                    "example does not contain the first index field '{}'",
                    definition.fields.first().map(String::as_str).unwrap_or_default()
                )));
            }
            Ok(IndexOperator::eq(values))
        }
        IndexKind::Bitmask => Ok(IndexOperator::eq(bitmask_values(definition, obj))),
        kind => Err(Error::bad_parameter(format!(
            "{} index does not answer example queries",
            kind
        ))),
    }
}

/// Operator for a condition object
///
/// # Errors
///
/// `BadParameter` for malformed conditions, unknown operators, conditions
/// the index cannot express, or index kinds without condition support.
pub fn from_conditions(
    definition: &IndexDefinition,
    conditions: &JsonValue,
) -> Result<IndexOperator> {
    match definition.kind {
        IndexKind::Skiplist => skiplist_conditions(definition, conditions),
        IndexKind::Bitmask => bitmask_condition(definition, conditions),
        kind => Err(Error::bad_parameter(format!(
            "{} index does not answer condition queries",
            kind
        ))),
    }
}

/// Value a request object gives for an index field
fn request_value<'a>(obj: &'a JsonObject, field: &str) -> Option<&'a JsonValue> {
    obj.get(field).or_else(|| {
        let (head, rest) = field.split_once('.')?;
        walk_path(obj.get(head)?, rest)
    })
}

/// Skiplist conditions: a run of equalities, then ranges on one field
///
/// Fields are read in index order until the first one without a condition
/// list. An equality must be the only condition on its field and cannot
/// follow a range; ranges on one field are combined with AND.
fn skiplist_conditions(definition: &IndexDefinition, conditions: &JsonValue) -> Result<IndexOperator> {
    let obj = conditions
        .as_object()
        .ok_or_else(|| Error::bad_parameter("conditions must be an object"))?;

    let mut equalities: Vec<Literal> = Vec::new();
    let mut ranges: Option<IndexOperator> = None;
    let mut range_field: Option<usize> = None;

    for (i, field) in definition.fields.iter().enumerate() {
        let list = match request_value(obj, field) {
            Some(JsonValue::Array(list)) if !list.is_empty() => list,
            _ => break,
        };
        for condition in list {
            let (op, value) = parse_pair(field, condition)?;
            if op == ComparisonOp::Eq {
                if range_field.is_some() {
                    return Err(Error::bad_parameter(format!(
                        "equality on '{}' cannot follow a range condition",
                        field
                    )));
                }
                if list.len() != 1 {
                    return Err(Error::bad_parameter(format!(
                        "equality on '{}' cannot be combined with other conditions",
                        field
                    )));
                }
                equalities.push(value);
                continue;
            }

            if range_field.map_or(false, |j| j != i) {
                return Err(Error::bad_parameter(format!(
                    "range on '{}' after a range on an earlier field is not supported",
                    field
                )));
            }
            range_field = Some(i);
            let mut values = equalities.clone();
            values.push(value);
            let leaf = IndexOperator::comparison(op, values);
            ranges = Some(match ranges.take() {
                Some(previous) => previous.and(leaf),
                None if !equalities.is_empty() => IndexOperator::eq(equalities.clone()).and(leaf),
                None => leaf,
            });
        }
    }

    match ranges {
        Some(op) => Ok(op),
        None if !equalities.is_empty() => Ok(IndexOperator::eq(equalities)),
        None => Err(Error::bad_parameter(format!(
            "conditions do not constrain the first index field '{}'",
            definition.fields.first().map(String::as_str).unwrap_or_default()
        ))),
    }
}

fn parse_pair(field: &str, condition: &JsonValue) -> Result<(ComparisonOp, Literal)> {
    let pair = condition
        .as_array()
        .filter(|p| p.len() == 2)
        .ok_or_else(|| {
            Error::bad_parameter(format!(
                "condition on '{}' must be an [operator, value] pair",
                field
            ))
        })?;
    let op = pair[0]
        .as_str()
        .and_then(ComparisonOp::parse)
        .filter(|op| *op == ComparisonOp::Eq || op.is_range())
        .ok_or_else(|| {
            Error::bad_parameter(format!("unsupported operator {} on '{}'", pair[0], field))
        })?;
    Ok((op, Literal::from(&pair[1])))
}

/// One literal per bitmask field; unspecified fields are unconstrained
fn bitmask_values(definition: &IndexDefinition, obj: &JsonObject) -> Vec<Literal> {
    definition
        .fields
        .iter()
        .map(|field| match request_value(obj, field) {
            None => Literal::Unused,
            Some(JsonValue::Array(items)) => {
                Literal::AnyOf(items.iter().map(IndexValue::from_json).collect())
            }
            Some(value) => Literal::from(value),
        })
        .collect()
}

fn bitmask_condition(definition: &IndexDefinition, condition: &JsonValue) -> Result<IndexOperator> {
    let obj = condition
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| {
            Error::bad_parameter("bitmask condition must be an object with exactly one operator")
        })?;
    let Some((key, value)) = obj.iter().next() else {
        return Err(Error::bad_parameter("empty bitmask condition"));
    };

    match key.as_str() {
        "&" | "&&" | "and" => {
            let (l, r) = operands(key, value)?;
            Ok(bitmask_condition(definition, l)?.and(bitmask_condition(definition, r)?))
        }
        "|" | "||" | "or" => {
            let (l, r) = operands(key, value)?;
            Ok(bitmask_condition(definition, l)?.or(bitmask_condition(definition, r)?))
        }
        "!" | "not" => {
            if !value.is_object() {
                return Err(Error::bad_parameter(format!("'{}' takes one condition", key)));
            }
            Ok(!bitmask_condition(definition, value)?)
        }
        other => {
            let op = ComparisonOp::parse(other).ok_or_else(|| {
                Error::bad_parameter(format!("unknown condition operator '{}'", other))
            })?;
            let values = value.as_object().ok_or_else(|| {
                Error::bad_parameter(format!("'{}' takes an object of attribute values", other))
            })?;
            Ok(IndexOperator::Comparison {
                op,
                values: bitmask_values(definition, values),
            })
        }
    }
}

fn operands<'a>(key: &str, value: &'a JsonValue) -> Result<(&'a JsonValue, &'a JsonValue)> {
    match value.as_array().map(Vec::as_slice) {
        Some([l, r]) if l.is_object() && r.is_object() => Ok((l, r)),
        _ => Err(Error::bad_parameter(format!(
            "'{}' takes a list of two conditions",
            key
        ))),
    }
}
