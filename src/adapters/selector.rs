//! In-memory evaluation of selectors and sort specs, for stores that keep
//! documents locally.
//!
//! Supported: field equality (array fields match on any element), dotted
//! paths, `$eq`, `$ne`, `$in`, `$nin`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$exists`, and the logical `$and`, `$or`, `$nor`.

use std::cmp::Ordering;

use serde_json::Value;

use crate::query::{Document, SortField, SortOrder, field_value};

pub fn matches(doc: &Document, selector: &Document) -> bool {
    selector.iter().all(|(key, condition)| match key.as_str() {
        "$and" => sub_selectors(condition).all(|s| matches(doc, s)),
        "$or" => sub_selectors(condition).any(|s| matches(doc, s)),
        "$nor" => !sub_selectors(condition).any(|s| matches(doc, s)),
        field => field_matches(field_value(doc, field), condition),
    })
}

fn sub_selectors(condition: &Value) -> impl Iterator<Item = &Document> {
    condition
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if is_operator_object(ops) => {
            ops.iter().all(|(op, arg)| operator_matches(actual, op, arg))
        }
        expected => equals(actual, expected),
    }
}

fn is_operator_object(map: &Document) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn operator_matches(actual: Option<&Value>, op: &str, arg: &Value) -> bool {
    match op {
        "$eq" => equals(actual, arg),
        "$ne" => !equals(actual, arg),
        "$in" => arg
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|c| equals(actual, c))),
        "$nin" => !arg
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|c| equals(actual, c))),
        "$gt" => ordered(actual, arg, |o| o == Ordering::Greater),
        "$gte" => ordered(actual, arg, |o| o != Ordering::Less),
        "$lt" => ordered(actual, arg, |o| o == Ordering::Less),
        "$lte" => ordered(actual, arg, |o| o != Ordering::Greater),
        "$exists" => actual.is_some() == truthy(arg),
        other => {
            tracing::warn!(operator = other, "unsupported selector operator");
            false
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Null => false,
        _ => true,
    }
}

fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(whole @ Value::Array(items)) => {
            values_equal(whole, expected) || items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn ordered(actual: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match actual {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| compare(item, bound).is_some_and(&accept)),
        Some(value) => compare(value, bound).is_some_and(accept),
        None => false,
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Comparison between values of the same kind; `None` across kinds.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting: missing and `null` first, then by kind.
pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or_else(|| x.to_string().cmp(&y.to_string())),
        _ => Ordering::Equal,
    }
}

/// Stable sort of `docs` by `sort`. An empty spec keeps the current order.
pub fn sort_documents(docs: &mut [Document], sort: &[SortField]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        sort.iter()
            .map(|s| {
                let o = sort_cmp(field_value(a, &s.field), field_value(b, &s.field));
                match s.order {
                    SortOrder::Asc => o,
                    SortOrder::Desc => o.reverse(),
                }
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}
