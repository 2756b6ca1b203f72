use std::collections::{HashMap, HashSet};

use serde_json::{Value, json};

use crate::query::{Document, field_value};

/// Canonical form of a linking value. `null` links to nothing.
///
/// Numbers are keyed by numeric value, so `1` and `1.0` share a key just as
/// they match each other in a selector.
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
            Some(f) => f.to_string(),
            None => n.to_string(),
        }),
        other => Some(other.to_string()),
    }
}

/// One batched fetch: every distinct linking key gathered across a whole
/// level of parent rows, to be matched against `field` on `collection`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub collection: String,
    pub field: String,
    keys: Vec<Value>,
    seen: HashSet<String>,
}

impl BatchRequest {
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            keys: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Adds the key held in `value`. Arrays contribute each element.
    pub fn add(&mut self, value: &Value) {
        match value {
            Value::Array(items) => items.iter().for_each(|item| self.add_one(item)),
            other => self.add_one(other),
        }
    }

    fn add_one(&mut self, value: &Value) {
        if let Some(key) = key_of(value) {
            if self.seen.insert(key) {
                self.keys.push(value.clone());
            }
        }
    }

    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The selector to send: `field ∈ keys`, conjoined with the node's own selector.
    pub fn selector(&self, own: &Document) -> Document {
        let mut constraint = Document::new();
        constraint.insert(self.field.clone(), json!({ "$in": self.keys }));

        if own.is_empty() {
            return constraint;
        }

        let mut combined = Document::new();
        combined.insert(
            "$and".to_string(),
            Value::Array(vec![Value::Object(own.clone()), Value::Object(constraint)]),
        );
        combined
    }
}

/// Positions of fetched rows grouped by the key(s) they hold in one field.
/// Positions stay in fetch order, so the store's sort carries through.
#[derive(Debug, Default)]
pub struct KeyIndex {
    positions: HashMap<String, Vec<usize>>,
}

impl KeyIndex {
    pub fn build(rows: &[Document], field: &str) -> Self {
        let mut positions: HashMap<String, Vec<usize>> = HashMap::new();

        for (pos, row) in rows.iter().enumerate() {
            let Some(value) = field_value(row, field) else {
                continue;
            };
            let held: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for key in held.into_iter().filter_map(key_of) {
                let entry = positions.entry(key).or_default();
                if entry.last() != Some(&pos) {
                    entry.push(pos);
                }
            }
        }

        Self { positions }
    }

    pub fn get(&self, key: &Value) -> &[usize] {
        key_of(key)
            .and_then(|k| self.positions.get(&k))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Positions matching any key held in `value`, deduplicated, in fetch order.
    pub fn matches(&self, value: &Value) -> Vec<usize> {
        let mut out: Vec<usize> = match value {
            Value::Array(items) => items.iter().flat_map(|k| self.get(k).iter().copied()).collect(),
            other => self.get(other).to_vec(),
        };
        out.sort_unstable();
        out.dedup();
        out
    }
}
