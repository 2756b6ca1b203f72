use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Channel, Store, Subscription, selector};
use crate::{
    error::{Error, RemoteError},
    query::{Document, FindOptions, ID_FIELD, project},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// -----------------------------
/// MemoryStore
/// -----------------------------

/// Local document cache. Documents keep insertion order; inserting a
/// document whose `_id` already exists replaces it in place.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts `doc`. Documents without an `_id` get a fresh one.
    pub async fn insert(&self, collection: &str, doc: Value) -> Result<Value, Error> {
        let mut doc = match doc {
            Value::Object(map) => map,
            other => {
                return Err(Error::Store(format!(
                    "documents must be objects, got {}",
                    other
                )));
            }
        };

        let id = doc
            .entry(ID_FIELD)
            .or_insert_with(|| Value::String(Uuid::now_v7().to_string()))
            .clone();

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        match docs
            .iter_mut()
            .find(|d| d.get(ID_FIELD).is_some_and(|existing| *existing == id))
        {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }

        Ok(id)
    }

    pub async fn insert_many(
        &self,
        collection: &str,
        docs: impl IntoIterator<Item = Value>,
    ) -> Result<(), Error> {
        for doc in docs {
            self.insert(collection, doc).await?;
        }
        Ok(())
    }

    /// Removes the document with `id`. Returns whether one was removed.
    pub async fn remove(&self, collection: &str, id: &Value) -> bool {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return false;
        };
        let before = docs.len();
        docs.retain(|d| d.get(ID_FIELD) != Some(id));
        docs.len() != before
    }

    pub async fn clear(&self, collection: &str) {
        self.collections.write().await.remove(collection);
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        selector: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, Error> {
        let mut found: Vec<Document> = {
            let collections = self.collections.read().await;
            collections
                .get(collection)
                .map(|docs| {
                    docs.iter()
                        .filter(|d| selector::matches(d, selector))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        selector::sort_documents(&mut found, &options.sort);

        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let found = found.into_iter().skip(skip).take(limit);

        Ok(match &options.fields {
            Some(fields) => found.map(|d| project(&d, fields)).collect(),
            None => found.collect(),
        })
    }
}

/// -----------------------------
/// MemoryChannel
/// -----------------------------

pub type MethodHandler = Arc<dyn Fn(Value) -> Result<Value, RemoteError> + Send + Sync>;

/// In-process channel: methods are closures registered up front, every call
/// and subscription is recorded for inspection.
#[derive(Default)]
pub struct MemoryChannel {
    methods: Mutex<HashMap<String, MethodHandler>>,
    calls: Mutex<Vec<(String, Value)>>,
    subscriptions: Mutex<Vec<Arc<MemorySubscription>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        lock(&self.methods).insert(name.into(), Arc::new(handler));
    }

    /// Every `(method, args)` pair received so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }

    pub fn subscriptions(&self) -> Vec<Arc<MemorySubscription>> {
        lock(&self.subscriptions).clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        lock(&self.subscriptions)
            .iter()
            .filter(|s| !s.is_stopped())
            .count()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn call(&self, method: &str, args: Value) -> Result<Value, RemoteError> {
        lock(&self.calls).push((method.to_string(), args.clone()));

        let handler = lock(&self.methods).get(method).cloned();
        match handler {
            Some(handler) => handler(args),
            None => Err(RemoteError::new("404").with_reason(format!("Method '{}' not found", method))),
        }
    }

    async fn subscribe(
        &self,
        name: &str,
        args: Value,
    ) -> Result<Arc<dyn Subscription>, RemoteError> {
        let subscription = Arc::new(MemorySubscription {
            name: name.to_string(),
            args,
            stopped: AtomicBool::new(false),
        });
        lock(&self.subscriptions).push(Arc::clone(&subscription));
        Ok(subscription)
    }
}

#[derive(Debug)]
pub struct MemorySubscription {
    name: String,
    args: Value,
    stopped: AtomicBool,
}

impl MemorySubscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Subscription for MemorySubscription {
    fn ready(&self) -> bool {
        !self.is_stopped()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
