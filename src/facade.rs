use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::{
    Syndesis,
    adapters::Subscription,
    error::Error,
    mode::{self, OnceResolver, QueryKind, ReactiveResolver, Request, Resolve},
    query::{Document, Params, QueryBody},
};

/// Receives exactly the outcome the corresponding call returns.
pub type Callback<T> = Box<dyn FnOnce(Result<&T, &Error>) + Send>;

fn notify<T>(callback: Option<Callback<T>>, result: Result<T, Error>) -> Result<T, Error> {
    if let Some(callback) = callback {
        callback(result.as_ref());
    }
    result
}

/// Per-call options for `Query::fetch` and, with `FetchOptions::single`,
/// `Query::fetch_one`. `T` is what the callback is handed.
pub struct FetchOptions<T = Vec<Document>> {
    allow_skip: bool,
    params: Option<Params>,
    callback: Option<Callback<T>>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FetchOptions<Option<Document>> {
    /// Options for `Query::fetch_one`.
    pub fn single() -> Self {
        Self::default()
    }
}

impl<T> Default for FetchOptions<T> {
    fn default() -> Self {
        Self {
            allow_skip: false,
            params: None,
            callback: None,
        }
    }
}

impl<T> FetchOptions<T> {
    /// Keep the root `skip` when resolving against the local store.
    pub fn allow_skip(mut self) -> Self {
        self.allow_skip = true;
        self
    }

    /// Params overlaid on the query's own for this call only.
    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<&T, &Error>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl<T> fmt::Debug for FetchOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("allow_skip", &self.allow_skip)
            .field("params", &self.params)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// A live subscription held by a `Query`.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    key: String,
    inner: Arc<dyn Subscription>,
}

impl SubscriptionHandle {
    fn new(name: &str, args: &Value, inner: Arc<dyn Subscription>) -> Self {
        Self {
            id: Uuid::now_v7(),
            key: subscription_key(name, args),
            inner,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stable for a given name and arguments.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready()
    }

    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("ready", &self.inner.ready())
            .finish()
    }
}

fn subscription_key(name: &str, args: &Value) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&[0]);
    hasher.update(args.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// -----------------------------
/// Query
/// -----------------------------

/// A query bound to an engine: a named server-side query, or an ad-hoc
/// body against a collection.
///
/// While a subscription is held, `fetch` resolves against the local store;
/// otherwise it makes one remote call. `get_count` is always remote.
pub struct Query {
    name: String,
    collection: String,
    body: QueryBody,
    params: Params,
    kind: QueryKind,
    inner: Arc<Syndesis>,
    subscription: Option<SubscriptionHandle>,
}

impl Query {
    pub(crate) fn new(
        inner: Arc<Syndesis>,
        kind: QueryKind,
        name: String,
        collection: String,
        body: QueryBody,
    ) -> Self {
        Self {
            name,
            collection,
            body,
            params: Params::new(),
            kind,
            inner,
            subscription: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn body(&self) -> &QueryBody {
        &self.body
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn is_named(&self) -> bool {
        self.kind == QueryKind::Named
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn subscription(&self) -> Option<&SubscriptionHandle> {
        self.subscription.as_ref()
    }

    /// Merges `params` over the current ones.
    pub fn set_params(&mut self, params: Params) -> &mut Self {
        self.params.merge(params);
        self
    }

    /// A fresh, unsubscribed query with the same body and merged params.
    pub fn clone_with_params(&self, params: Params) -> Query {
        let mut merged = self.params.clone();
        merged.merge(params);
        Query {
            name: self.name.clone(),
            collection: self.collection.clone(),
            body: self.body.clone(),
            params: merged,
            kind: self.kind,
            inner: Arc::clone(&self.inner),
            subscription: None,
        }
    }

    fn request<'a>(&'a self, params: &'a Params, allow_skip: bool) -> Request<'a> {
        Request {
            name: &self.name,
            collection: &self.collection,
            body: &self.body,
            params,
            kind: self.kind,
            allow_skip,
        }
    }

    /// Opens a live subscription keyed by the query name and its payload.
    ///
    /// A handle that is still held gets replaced, not stopped; call
    /// `unsubscribe` first to release it.
    pub async fn subscribe(&mut self) -> Result<SubscriptionHandle, Error> {
        let args = self.request(&self.params, false).payload()?;
        let subscription = self.inner.channel.subscribe(&self.name, args.clone()).await?;
        let handle = SubscriptionHandle::new(&self.name, &args, subscription);

        if let Some(previous) = &self.subscription {
            tracing::warn!(
                query = %self.name,
                previous = %previous.id(),
                "replacing a subscription that was never stopped"
            );
        }
        tracing::debug!(query = %self.name, id = %handle.id(), "subscribed");

        self.subscription = Some(handle.clone());
        Ok(handle)
    }

    /// Stops the held subscription, if any, and forgets it.
    pub fn unsubscribe(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.stop();
            tracing::debug!(query = %self.name, id = %handle.id(), "unsubscribed");
        }
    }

    pub async fn fetch(&self, options: FetchOptions) -> Result<Vec<Document>, Error> {
        let FetchOptions {
            allow_skip,
            params,
            callback,
        } = options;

        let params = match params {
            Some(overlay) => {
                let mut merged = self.params.clone();
                merged.merge(overlay);
                merged
            }
            None => self.params.clone(),
        };
        let request = self.request(&params, allow_skip);

        let result = match &self.subscription {
            Some(_) => {
                tracing::debug!(query = %self.name, "resolving against local store");
                let inner = &self.inner;
                ReactiveResolver::new(&*inner.store, &inner.links, &inner.config)
                    .resolve(&request)
                    .await
            }
            None => {
                tracing::debug!(query = %self.name, "resolving with a remote call");
                OnceResolver::new(&*self.inner.channel)
                    .resolve(&request)
                    .await
            }
        };

        notify(callback, result)
    }

    /// First row of `fetch`, or `None` when there are no rows. The callback
    /// sees the same `Option`.
    pub async fn fetch_one(
        &self,
        options: FetchOptions<Option<Document>>,
    ) -> Result<Option<Document>, Error> {
        let FetchOptions {
            allow_skip,
            params,
            callback,
        } = options;

        let rows = FetchOptions {
            allow_skip,
            params,
            callback: None,
        };
        let result = self.fetch(rows).await.map(|rows| rows.into_iter().next());
        notify(callback, result)
    }

    /// Asks the server for the number of matching rows.
    pub async fn get_count(&self, callback: Option<Callback<u64>>) -> Result<u64, Error> {
        let result = self.count().await;
        notify(callback, result)
    }

    async fn count(&self) -> Result<u64, Error> {
        let args = self.request(&self.params, false).payload()?;
        let method = self.inner.config.count_method(&self.name);
        let reply = mode::call(&*self.inner.channel, &method, args).await?;
        reply
            .as_u64()
            .ok_or_else(|| Error::Decode(format!("expected a count, got {}", reply)))
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("subscription", &self.subscription)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Noop;

    impl Subscription for Noop {
        fn ready(&self) -> bool {
            true
        }
        fn stop(&self) {}
    }

    #[test]
    fn test_subscription_key_is_stable() {
        let a = SubscriptionHandle::new("posts", &json!({ "a": 1 }), Arc::new(Noop));
        let b = SubscriptionHandle::new("posts", &json!({ "a": 1 }), Arc::new(Noop));
        let c = SubscriptionHandle::new("posts", &json!({ "a": 2 }), Arc::new(Noop));

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.key().len(), 64);
    }

    #[test]
    fn test_notify_passes_outcome() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let callback: Callback<u64> = Box::new(move |r| {
            *sink.lock().unwrap() = Some(r.map(|n| *n).map_err(|e| e.to_string()));
        });

        let result = notify(Some(callback), Ok(7));
        assert_eq!(result.unwrap(), 7);
        assert_eq!(*seen.lock().unwrap(), Some(Ok(7)));

        let sink = Arc::clone(&seen);
        let callback: Callback<u64> = Box::new(move |r| {
            *sink.lock().unwrap() = Some(r.map(|n| *n).map_err(|e| e.to_string()));
        });
        let err = notify(Some(callback), Err(Error::MissingParameter("x".into()))).unwrap_err();
        assert_eq!(*seen.lock().unwrap(), Some(Err(err.to_string())));
    }
}
