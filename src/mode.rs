//! The two ways a query gets resolved.
//!
//! Without a live subscription the query goes to the server in one remote
//! call, which answers with rows that are already joined. With one, the
//! local store already holds the subscribed window, so the body is resolved
//! locally through the graph compiler and the batched fetcher. Both paths
//! return the same shape of rows.

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;

use crate::{
    adapters::{Channel, Store},
    config::Config,
    error::Error,
    graph::{self, Fetcher, Links},
    params,
    query::{ConcreteBody, Document, Params, QueryBody},
};

/// Whether the server knows the query by name, or it is shipped as a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// The body travels with every call.
    AdHoc,
    /// Registered server side; only params travel.
    Named,
}

/// Everything a resolver needs to know about one fetch.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub name: &'a str,
    pub collection: &'a str,
    pub body: &'a QueryBody,
    pub params: &'a Params,
    pub kind: QueryKind,
    pub allow_skip: bool,
}

impl Request<'_> {
    /// Arguments sent over the channel: the resolved body for ad-hoc queries,
    /// the params for named ones.
    pub fn payload(&self) -> Result<Value, Error> {
        match self.kind {
            QueryKind::Named => Ok(self.params.to_value()),
            QueryKind::AdHoc => {
                let body = params::resolve(self.body, self.params)?;
                serde_json::to_value(&body).map_err(|e| Error::Serialize(e.to_string()))
            }
        }
    }
}

/// -----------------------------
/// Resolver contract
/// -----------------------------

#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, request: &Request<'_>) -> Result<Vec<Document>, Error>;
}

/// One round trip over the channel.
pub struct OnceResolver<'a> {
    channel: &'a dyn Channel,
}

impl<'a> OnceResolver<'a> {
    pub fn new(channel: &'a dyn Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Resolve for OnceResolver<'_> {
    async fn resolve(&self, request: &Request<'_>) -> Result<Vec<Document>, Error> {
        let payload = request.payload()?;
        let reply = call(self.channel, request.name, payload).await?;
        decode_rows(reply)
    }
}

/// Resolution against the locally synchronized store.
pub struct ReactiveResolver<'a> {
    store: &'a dyn Store,
    links: &'a Links,
    config: &'a Config,
}

impl<'a> ReactiveResolver<'a> {
    pub fn new(store: &'a dyn Store, links: &'a Links, config: &'a Config) -> Self {
        Self {
            store,
            links,
            config,
        }
    }
}

#[async_trait]
impl Resolve for ReactiveResolver<'_> {
    async fn resolve(&self, request: &Request<'_>) -> Result<Vec<Document>, Error> {
        let mut body = params::resolve(request.body, request.params)?;
        apply_skip_policy(&mut body, request.allow_skip);

        let root = graph::compile(request.collection, &body, self.links, self.config)?;
        Fetcher::new(self.store)
            .with_one_to_one(self.config.one_to_one)
            .resolve(&root)
            .await
    }
}

/// Drops the root `skip` unless the caller allowed it. The subscribed window
/// was not offset by the server, so offsetting it again locally would slice
/// the wrong rows. Nested skips are per parent and always kept.
pub fn apply_skip_policy(body: &mut ConcreteBody, allow_skip: bool) {
    if allow_skip {
        return;
    }
    if let Some(skip) = body.options.skip.take() {
        tracing::debug!(skip, "dropping root skip for reactive resolution");
    }
}

/// Issues one remote call, mapping the channel's error into the crate error.
pub(crate) async fn call(channel: &dyn Channel, method: &str, args: Value) -> Result<Value, Error> {
    counter!("syndesis.remote.calls", "method" => method.to_string()).increment(1);
    Ok(channel.call(method, args).await?)
}

pub(crate) fn decode_rows(reply: Value) -> Result<Vec<Document>, Error> {
    match reply {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(doc) => Ok(doc),
                other => Err(Error::Decode(format!("expected a document, got {}", other))),
            })
            .collect(),
        other => Err(Error::Decode(format!(
            "expected an array of documents, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::query::{FindOptions, Template};

    fn request<'a>(body: &'a QueryBody, params: &'a Params, kind: QueryKind) -> Request<'a> {
        Request {
            name: "posts.list",
            collection: "posts",
            body,
            params,
            kind,
            allow_skip: false,
        }
    }

    #[test]
    fn test_skip_policy() {
        let nested = ConcreteBody {
            options: FindOptions {
                skip: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let body = ConcreteBody {
            options: FindOptions {
                skip: Some(10),
                limit: Some(5),
                ..Default::default()
            },
            relations: [("comments".to_string(), nested)].into(),
            ..Default::default()
        };

        let mut stripped = body.clone();
        apply_skip_policy(&mut stripped, false);
        assert_eq!(stripped.options.skip, None);
        assert_eq!(stripped.options.limit, Some(5));
        assert_eq!(stripped.relations["comments"].options.skip, Some(1));

        let mut kept = body.clone();
        apply_skip_policy(&mut kept, true);
        assert_eq!(kept, body);
    }

    #[test]
    fn test_payload_by_kind() {
        let body = QueryBody::new()
            .filter("authorId", Template::param("userId"))
            .limit(10);
        let params = Params::new().with("userId", "u1");

        let named = request(&body, &params, QueryKind::Named).payload().unwrap();
        assert_eq!(named, json!({ "userId": "u1" }));

        let ad_hoc = request(&body, &params, QueryKind::AdHoc).payload().unwrap();
        assert_eq!(
            ad_hoc,
            json!({ "selector": { "authorId": "u1" }, "options": { "limit": 10 } })
        );
    }

    #[test]
    fn test_ad_hoc_payload_requires_params() {
        let body = QueryBody::new().filter("authorId", Template::param("userId"));
        let params = Params::new();

        let err = request(&body, &params, QueryKind::AdHoc).payload().unwrap_err();
        assert!(matches!(err, Error::MissingParameter(name) if name == "userId"));
    }

    #[test]
    fn test_decode_rows() {
        let rows = decode_rows(json!([{ "_id": "a" }, { "_id": "b" }])).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(decode_rows(json!([])).unwrap().is_empty());

        assert!(matches!(decode_rows(json!({ "_id": "a" })), Err(Error::Decode(_))));
        assert!(matches!(decode_rows(json!([1, 2])), Err(Error::Decode(_))));
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_once_and_reactive_agree() {
        use crate::adapters::memory::{MemoryChannel, MemoryStore};

        let store = MemoryStore::new();
        store
            .insert_many(
                "posts",
                vec![
                    json!({ "_id": "p1", "authorId": "u1", "title": "a" }),
                    json!({ "_id": "p2", "authorId": "u2", "title": "b" }),
                    json!({ "_id": "p3", "authorId": "u1", "title": "c" }),
                ],
            )
            .await
            .unwrap();

        let channel = MemoryChannel::new();
        channel.method("posts.list", |_| {
            Ok(json!([
                { "_id": "p1", "authorId": "u1", "title": "a" },
                { "_id": "p3", "authorId": "u1", "title": "c" },
            ]))
        });

        let body = QueryBody::new()
            .filter("authorId", Template::param("userId"))
            .sort_asc("title");
        let params = Params::new().with("userId", "u1");
        let request = request(&body, &params, QueryKind::AdHoc);

        let links = Links::new();
        let config = Config::default();
        let once = OnceResolver::new(&channel).resolve(&request).await.unwrap();
        let reactive = ReactiveResolver::new(&store, &links, &config)
            .resolve(&request)
            .await
            .unwrap();

        assert_eq!(once, reactive);
        assert_eq!(channel.calls().len(), 1);
    }
}
