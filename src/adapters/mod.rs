#[cfg(feature = "memory")]
pub mod memory;

pub mod selector;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::{Error, RemoteError},
    query::{Document, FindOptions},
};

/// -----------------------------
/// Store contract
/// -----------------------------

/// The local document store, kept in sync by live subscriptions.
/// The engine only ever reads from it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch every document of `collection` matching `selector`, honoring
    /// `options` (sort, then skip, then limit, then projection).
    async fn find(
        &self,
        collection: &str,
        selector: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, Error>;
}

/// -----------------------------
/// Remote channel contract
/// -----------------------------

#[async_trait]
pub trait Channel: Send + Sync {
    /// One request, one reply.
    async fn call(&self, method: &str, args: Value) -> Result<Value, RemoteError>;

    /// Open a live subscription. Resolves once the subscription is established.
    async fn subscribe(&self, name: &str, args: Value)
    -> Result<Arc<dyn Subscription>, RemoteError>;
}

/// A live subscription opened over a `Channel`.
pub trait Subscription: Send + Sync {
    fn ready(&self) -> bool;
    fn stop(&self);
}
