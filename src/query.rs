use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// A document as held by a store: a JSON object identified by its `_id` field.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

/// Reads a possibly dotted path (`"profile.name"`) out of a document.
pub fn field_value<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Keeps `_id` and the listed (possibly dotted) fields.
pub fn project(doc: &Document, fields: &[String]) -> Document {
    let mut out = Map::new();
    if let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        if let Some(value) = field_value(doc, field) {
            insert_path(&mut out, field, value.clone());
        }
    }
    out
}

fn insert_path(target: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = target
                .entry(head)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = slot {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// -----------------------------
/// Templated values
/// -----------------------------

/// A value inside a query body that is either known up front or bound per call.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Literal(Value),
    Param {
        name: String,
        default: Option<Value>,
    },
    /// Object holding at least one placeholder. Key order is kept (sort specs depend on it).
    Object(Vec<(String, Template)>),
    /// Array holding at least one placeholder.
    Array(Vec<Template>),
}

impl Template {
    pub fn literal(value: impl Into<Value>) -> Self {
        Template::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Template::Param {
            name: name.into(),
            default: None,
        }
    }

    pub fn param_or(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Template::Param {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    /// Reads a JSON value, treating strings of the form `"$name"` as placeholders.
    /// `"$$text"` escapes to the literal string `"$text"`.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) if s.starts_with("$$") => Template::Literal(Value::String(s[1..].to_string())),
            Value::String(s) if s.len() > 1 && s.starts_with('$') => Template::param(&s[1..]),
            Value::Object(map) => {
                let entries: Vec<(String, Template)> = map
                    .into_iter()
                    .map(|(k, v)| (k, Template::from_json(v)))
                    .collect();

                if entries.iter().all(|(_, t)| t.is_literal()) {
                    let map = entries
                        .into_iter()
                        .filter_map(|(k, t)| t.into_literal().map(|v| (k, v)))
                        .collect();
                    Template::Literal(Value::Object(map))
                } else {
                    Template::Object(entries)
                }
            }
            Value::Array(items) => {
                let items: Vec<Template> = items.into_iter().map(Template::from_json).collect();

                if items.iter().all(Template::is_literal) {
                    Template::Literal(Value::Array(
                        items.into_iter().filter_map(Template::into_literal).collect(),
                    ))
                } else {
                    Template::Array(items)
                }
            }
            other => Template::Literal(other),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Template::Literal(_))
    }

    pub fn into_literal(self) -> Option<Value> {
        match self {
            Template::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn collect_params(&self, out: &mut BTreeSet<String>) {
        match self {
            Template::Literal(_) => {}
            Template::Param { name, .. } => {
                out.insert(name.clone());
            }
            Template::Object(entries) => entries.iter().for_each(|(_, t)| t.collect_params(out)),
            Template::Array(items) => items.iter().for_each(|t| t.collect_params(out)),
        }
    }
}

macro_rules! literal_template_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Template {
                fn from(value: $ty) -> Self {
                    Template::Literal(Value::from(value))
                }
            }
        )*
    };
}

literal_template_from!(Value, String, &str, i32, i64, u32, u64, f64, bool);

/// -----------------------------
/// Query body (templated)
/// -----------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsTemplate {
    pub sort: Option<Template>,
    pub limit: Option<Template>,
    pub skip: Option<Template>,
}

/// Declarative description of what to fetch from one collection and the
/// relations to follow from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBody {
    pub selector: BTreeMap<String, Template>,
    pub options: OptionsTemplate,
    /// Projection. `None` returns whole documents.
    pub fields: Option<Vec<String>>,
    /// When set on the root body, `limit` and `skip` params override the root options.
    pub paginate: bool,
    pub relations: BTreeMap<String, QueryBody>,
}

impl QueryBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Template>) -> Self {
        self.selector.insert(field.into(), value.into());
        self
    }

    pub fn sort(mut self, spec: impl Into<Template>) -> Self {
        self.options.sort = Some(spec.into());
        self
    }

    pub fn sort_asc(self, field: &str) -> Self {
        self.push_sort(field, "asc")
    }

    pub fn sort_desc(self, field: &str) -> Self {
        self.push_sort(field, "desc")
    }

    fn push_sort(mut self, field: &str, direction: &str) -> Self {
        let entry = Value::Array(vec![Value::from(field), Value::from(direction)]);
        match &mut self.options.sort {
            Some(Template::Literal(Value::Array(entries))) => entries.push(entry),
            _ => self.options.sort = Some(Template::Literal(Value::Array(vec![entry]))),
        }
        self
    }

    pub fn limit(mut self, limit: impl Into<Template>) -> Self {
        self.options.limit = Some(limit.into());
        self
    }

    pub fn skip(mut self, skip: impl Into<Template>) -> Self {
        self.options.skip = Some(skip.into());
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn paginate(mut self) -> Self {
        self.paginate = true;
        self
    }

    pub fn relation(mut self, name: impl Into<String>, body: QueryBody) -> Self {
        self.relations.insert(name.into(), body);
        self
    }

    /// Every placeholder name used anywhere in the body, nested relations included.
    pub fn param_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_params(&mut out);
        out
    }

    fn collect_params(&self, out: &mut BTreeSet<String>) {
        self.selector.values().for_each(|t| t.collect_params(out));
        [&self.options.sort, &self.options.limit, &self.options.skip]
            .into_iter()
            .flatten()
            .for_each(|t| t.collect_params(out));
        self.relations.values().for_each(|b| b.collect_params(out));
    }

    /// Parses the free-form body shape:
    ///
    /// ```json
    /// {
    ///   "$filters": { "authorId": "$userId" },
    ///   "$options": { "sort": { "createdAt": -1 }, "limit": "$limit" },
    ///   "$paginate": true,
    ///   "title": 1,
    ///   "comments": { "text": 1 }
    /// }
    /// ```
    ///
    /// Keys set to `1`/`true` are projected fields; object-valued keys are relations.
    pub fn from_json(value: &Value) -> Result<Self, Error> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::Decode(format!("query body must be an object, got {}", value)))?;

        let mut body = QueryBody::default();
        let mut fields = Vec::new();

        for (key, value) in map {
            match key.as_str() {
                "$filters" => {
                    let filters = value
                        .as_object()
                        .ok_or_else(|| Error::Decode("`$filters` must be an object".to_string()))?;
                    for (field, criteria) in filters {
                        body.selector
                            .insert(field.clone(), Template::from_json(criteria.clone()));
                    }
                }
                "$options" => {
                    let options = value
                        .as_object()
                        .ok_or_else(|| Error::Decode("`$options` must be an object".to_string()))?;
                    for (option, v) in options {
                        let t = Some(Template::from_json(v.clone()));
                        match option.as_str() {
                            "sort" => body.options.sort = t,
                            "limit" => body.options.limit = t,
                            "skip" => body.options.skip = t,
                            other => return Err(Error::invalid_option(other, "unsupported option")),
                        }
                    }
                }
                "$paginate" => body.paginate = value.as_bool().unwrap_or(false),
                _ => match value {
                    Value::Object(_) => {
                        body.relations
                            .insert(key.clone(), QueryBody::from_json(value)?);
                    }
                    Value::Bool(true) => fields.push(key.clone()),
                    Value::Number(n) if n.as_i64() == Some(1) => fields.push(key.clone()),
                    other => {
                        return Err(Error::Decode(format!(
                            "unexpected value for `{}`: {}",
                            key, other
                        )));
                    }
                },
            }
        }

        if !fields.is_empty() {
            body.fields = Some(fields);
        }

        Ok(body)
    }
}

/// -----------------------------
/// Concrete body (parameters applied)
/// -----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    /// Accepts `{ "a": 1, "b": -1 }` or `[["a", "asc"], ["b", -1]]`.
    pub fn parse_spec(spec: &Value) -> Result<Vec<SortField>, Error> {
        match spec {
            Value::Object(map) => map
                .iter()
                .map(|(field, dir)| Ok(SortField { field: field.clone(), order: parse_order(dir)? }))
                .collect(),
            Value::Array(entries) => entries
                .iter()
                .map(|entry| match entry.as_array().map(Vec::as_slice) {
                    Some([Value::String(field), dir]) => Ok(SortField {
                        field: field.clone(),
                        order: parse_order(dir)?,
                    }),
                    Some([Value::String(field)]) => Ok(SortField::asc(field.clone())),
                    _ => match entry {
                        Value::String(field) => Ok(SortField::asc(field.clone())),
                        _ => Err(Error::invalid_option("sort", format!("bad sort entry {}", entry))),
                    },
                })
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(Error::invalid_option("sort", format!("bad sort spec {}", other))),
        }
    }
}

fn parse_order(dir: &Value) -> Result<SortOrder, Error> {
    match dir {
        Value::Number(n) if n.as_i64() == Some(1) => Ok(SortOrder::Asc),
        Value::Number(n) if n.as_i64() == Some(-1) => Ok(SortOrder::Desc),
        Value::String(s) if s.eq_ignore_ascii_case("asc") => Ok(SortOrder::Asc),
        Value::String(s) if s.eq_ignore_ascii_case("desc") => Ok(SortOrder::Desc),
        other => Err(Error::invalid_option("sort", format!("bad sort direction {}", other))),
    }
}

/// Options handed to `Store::find`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

/// A query body with every placeholder replaced by its value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcreteBody {
    pub selector: Document,
    pub options: FindOptions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, ConcreteBody>,
}

/// -----------------------------
/// Params
/// -----------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Overlays `other` on top of these params.
    pub fn merge(&mut self, other: Params) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Params(iter.into_iter().collect())
    }
}
