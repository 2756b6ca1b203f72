//! # Syndesis
//!
//! *σύνδεσις: Ancient Greek for "binding together".*
//!
//! Syndesis is a declarative query layer that sits in front of a reactive
//! document store and a remote-call channel. A query is a body (selector,
//! options, projection) plus a tree of named relations into other
//! collections; Syndesis turns it into documents with their related
//! documents grafted on.
//!
//! ## Two ways to resolve
//!
//! ### Once
//! Without a live subscription, `Query::fetch` makes a single remote call
//! and the server answers with already joined rows.
//!
//! ### Reactive
//! After `Query::subscribe`, the local store is kept in sync by the
//! subscription, and `fetch` resolves the same body locally: parameters are
//! substituted, the body is compiled into a graph of collections, and the
//! graph is fetched level by level. Each graph node costs exactly one store
//! fetch, however many parent rows it hangs off. No N+1.
//!
//! ```rust,ignore
//! use syndesis::{Engine, FetchOptions, Link, Links, Params, QueryBody, Template};
//!
//! let links = Links::new()
//!     .add("posts", "author", Link::one("users", "authorId"))
//!     .add("posts", "comments", Link::inverse_many("comments", "postId"));
//!
//! let engine = Engine::new(channel, store, links);
//!
//! let mut query = engine.create_query(
//!     "posts",
//!     QueryBody::new()
//!         .filter("authorId", Template::param("userId"))
//!         .relation("author", QueryBody::new().fields(&["name"]))
//!         .relation("comments", QueryBody::new().sort_desc("createdAt").limit(3)),
//! );
//! query.set_params(Params::new().with("userId", "u1"));
//!
//! query.subscribe().await?;
//! let posts = query.fetch(FetchOptions::new()).await?;
//! ```
//!
//! ## Feature flags
//!
//! | Flag     | Default | Description                                  |
//! |----------|---------|----------------------------------------------|
//! | `memory` | ✓       | In-memory `Store` and `Channel` adapters     |
//!

pub mod adapters;
pub mod config;
pub mod error;
pub mod facade;
pub mod graph;
pub mod mode;
pub mod params;
pub mod query;

use std::sync::Arc;

pub use crate::adapters::{Channel, Store, Subscription};
pub use crate::config::{Config, OneToOnePolicy};
pub use crate::error::{Error, RemoteError};
pub use crate::facade::{Callback, FetchOptions, Query, SubscriptionHandle};
pub use crate::graph::{Cardinality, GraphNode, Link, LinkKind, Links};
pub use crate::mode::{QueryKind, Resolve};
pub use crate::query::{
    ConcreteBody, Document, FindOptions, ID_FIELD, Params, QueryBody, SortField, SortOrder,
    Template,
};

/// Entry point: owns the channel, the local store, the relation links and
/// the configuration, and hands out queries bound to them.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Syndesis>,
}

#[derive(Clone)]
pub(crate) struct Syndesis {
    pub(crate) channel: Arc<dyn Channel>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) links: Links,
    pub(crate) config: Config,
}

impl Engine {
    pub fn new(channel: Arc<dyn Channel>, store: Arc<dyn Store>, links: Links) -> Self {
        Self {
            inner: Arc::new(Syndesis {
                channel,
                store,
                links,
                config: Config::default(),
            }),
        }
    }

    /// Replaces the configuration. Queries created earlier keep the old one.
    pub fn with_config(mut self, config: Config) -> Self {
        Arc::make_mut(&mut self.inner).config = config;
        self
    }

    pub fn links(&self) -> &Links {
        &self.inner.links
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // ==================== Queries ====================

    /// An ad-hoc query: `body` is sent along with every remote call, using
    /// the collection name as the method.
    pub fn create_query(&self, collection: impl Into<String>, body: QueryBody) -> Query {
        let collection = collection.into();
        Query::new(
            Arc::clone(&self.inner),
            QueryKind::AdHoc,
            collection.clone(),
            collection,
            body,
        )
    }

    /// A query the server knows as `name`. Only params are sent remotely;
    /// `body` is what the local store is resolved with while subscribed.
    pub fn create_named_query(
        &self,
        name: impl Into<String>,
        collection: impl Into<String>,
        body: QueryBody,
    ) -> Query {
        Query::new(
            Arc::clone(&self.inner),
            QueryKind::Named,
            name.into(),
            collection.into(),
            body,
        )
    }

    /// Resolves `body` against the local store right away, without a query
    /// object or a subscription. The root `skip` is honored.
    pub async fn resolve(
        &self,
        collection: &str,
        body: &QueryBody,
        params: &Params,
    ) -> Result<Vec<Document>, Error> {
        let request = mode::Request {
            name: collection,
            collection,
            body,
            params,
            kind: QueryKind::AdHoc,
            allow_skip: true,
        };

        mode::ReactiveResolver::new(&*self.inner.store, &self.inner.links, &self.inner.config)
            .resolve(&request)
            .await
    }
}
