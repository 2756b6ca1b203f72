use serde_json::{Map, Value};

use crate::{
    error::Error,
    query::{ConcreteBody, Document, FindOptions, Params, QueryBody, SortField, Template},
};

/// Substitutes `params` into every placeholder of `body`, at every depth.
///
/// Pure: the body is left untouched and nothing is fetched. A placeholder
/// with neither a supplied value nor a default fails the whole resolution.
pub fn resolve(body: &QueryBody, params: &Params) -> Result<ConcreteBody, Error> {
    let mut concrete = resolve_level(body, params)?;

    if body.paginate {
        if let Some(limit) = params.get("limit") {
            concrete.options.limit = as_count("limit", limit)?;
        }
        if let Some(skip) = params.get("skip") {
            concrete.options.skip = as_count("skip", skip)?;
        }
    }

    Ok(concrete)
}

fn resolve_level(body: &QueryBody, params: &Params) -> Result<ConcreteBody, Error> {
    let mut selector = Document::new();
    for (field, template) in &body.selector {
        selector.insert(field.clone(), substitute(template, params)?);
    }

    let sort = match &body.options.sort {
        Some(template) => SortField::parse_spec(&substitute(template, params)?)?,
        None => Vec::new(),
    };

    let options = FindOptions {
        sort,
        limit: resolve_count("limit", body.options.limit.as_ref(), params)?,
        skip: resolve_count("skip", body.options.skip.as_ref(), params)?,
        fields: body.fields.clone(),
    };

    let relations = body
        .relations
        .iter()
        .map(|(name, nested)| Ok((name.clone(), resolve_level(nested, params)?)))
        .collect::<Result<_, Error>>()?;

    Ok(ConcreteBody {
        selector,
        options,
        relations,
    })
}

/// Resolves a single template against `params`.
pub fn substitute(template: &Template, params: &Params) -> Result<Value, Error> {
    match template {
        Template::Literal(value) => Ok(value.clone()),
        Template::Param { name, default } => params
            .get(name)
            .or(default.as_ref())
            .cloned()
            .ok_or_else(|| Error::MissingParameter(name.clone())),
        Template::Object(entries) => entries
            .iter()
            .map(|(key, t)| Ok((key.clone(), substitute(t, params)?)))
            .collect::<Result<Map<String, Value>, Error>>()
            .map(Value::Object),
        Template::Array(items) => items
            .iter()
            .map(|t| substitute(t, params))
            .collect::<Result<Vec<_>, Error>>()
            .map(Value::Array),
    }
}

fn resolve_count(
    option: &str,
    template: Option<&Template>,
    params: &Params,
) -> Result<Option<u64>, Error> {
    match template {
        Some(t) => as_count(option, &substitute(t, params)?),
        None => Ok(None),
    }
}

fn as_count(option: &str, value: &Value) -> Result<Option<u64>, Error> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| Error::invalid_option(option, format!("expected a non-negative integer, got {}", n))),
        other => Err(Error::invalid_option(
            option,
            format!("expected a non-negative integer, got {}", other),
        )),
    }
}
