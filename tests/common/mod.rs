// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use syndesis::{
    Document, Engine, Error, FindOptions, Link, Links, Store,
    adapters::memory::{MemoryChannel, MemoryStore},
};

/// Wraps a `MemoryStore` and records every `find` it serves.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    finds: Arc<Mutex<Vec<(String, Document, FindOptions)>>>,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            finds: Arc::default(),
        }
    }

    pub fn fetches(&self) -> usize {
        self.finds.lock().unwrap().len()
    }

    pub fn finds(&self) -> Vec<(String, Document, FindOptions)> {
        self.finds.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.finds.lock().unwrap().clear();
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn find(
        &self,
        collection: &str,
        selector: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, Error> {
        self.finds.lock().unwrap().push((
            collection.to_string(),
            selector.clone(),
            options.clone(),
        ));
        self.inner.find(collection, selector, options).await
    }
}

/// A store whose every fetch fails.
pub struct FailingStore;

#[async_trait]
impl Store for FailingStore {
    async fn find(&self, collection: &str, _: &Document, _: &FindOptions) -> Result<Vec<Document>, Error> {
        Err(Error::Store(format!("{} is unavailable", collection)))
    }
}

pub fn links() -> Links {
    Links::new()
        .add("posts", "author", Link::one("users", "authorId"))
        .add("posts", "comments", Link::inverse_many("comments", "postId"))
        .add("posts", "tags", Link::many("tags", "tagIds"))
        .add("comments", "user", Link::one("users", "userId"))
        .add("users", "groups", Link::inverse_many("groups", "memberIds"))
        .add("users", "profile", Link::inverse_one("profiles", "userId"))
}

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

pub fn ids(rows: &[Document]) -> Vec<Value> {
    rows.iter().map(|r| r["_id"].clone()).collect()
}

pub fn relation_ids(row: &Document, relation: &str) -> Vec<Value> {
    row[relation]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["_id"].clone())
        .collect()
}

/// Two posts by two authors; three comments on p1, two on p2.
pub async fn blog() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .insert_many(
            "users",
            vec![
                json!({ "_id": "u1", "name": "Ada" }),
                json!({ "_id": "u2", "name": "Alan" }),
            ],
        )
        .await
        .unwrap();
    store
        .insert_many(
            "posts",
            vec![
                json!({ "_id": "p1", "title": "Engines", "authorId": "u1", "tagIds": ["t1", "t2"], "rank": 1 }),
                json!({ "_id": "p2", "title": "Machines", "authorId": "u2", "tagIds": ["t2"], "rank": 2 }),
            ],
        )
        .await
        .unwrap();
    store
        .insert_many(
            "comments",
            vec![
                json!({ "_id": "c1", "postId": "p1", "userId": "u2", "text": "first", "at": 1 }),
                json!({ "_id": "c2", "postId": "p1", "userId": "u1", "text": "second", "at": 2 }),
                json!({ "_id": "c3", "postId": "p1", "userId": "u2", "text": "third", "at": 3 }),
                json!({ "_id": "c4", "postId": "p2", "userId": "u1", "text": "fourth", "at": 4 }),
                json!({ "_id": "c5", "postId": "p2", "userId": "u1", "text": "fifth", "at": 5 }),
            ],
        )
        .await
        .unwrap();
    store
        .insert_many(
            "tags",
            vec![
                json!({ "_id": "t1", "label": "history" }),
                json!({ "_id": "t2", "label": "computing" }),
            ],
        )
        .await
        .unwrap();
    store
}

pub struct Harness {
    pub engine: Engine,
    pub store: CountingStore,
    pub channel: Arc<MemoryChannel>,
}

pub fn setup(store: MemoryStore) -> Harness {
    let store = CountingStore::new(store);
    let channel = Arc::new(MemoryChannel::new());
    let engine = Engine::new(channel.clone(), Arc::new(store.clone()), links());

    Harness {
        engine,
        store,
        channel,
    }
}
