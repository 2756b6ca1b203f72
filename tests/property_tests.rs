// tests/property_tests.rs
#![cfg(feature = "memory")]

mod common;

use common::{CountingStore, links};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;
use syndesis::{
    ConcreteBody, Document, Engine, FetchOptions, Params, QueryBody, RemoteError, Template,
    adapters::{
        memory::{MemoryChannel, MemoryStore},
        selector,
    },
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn posts(specs: &[(u8, i64)]) -> Vec<Value> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (author, rank))| {
            json!({ "_id": format!("p{:03}", i), "authorId": format!("u{}", author), "rank": rank })
        })
        .collect()
}

/// Answers ad-hoc calls the way a server would: filter, sort, skip, limit.
fn serve(docs: Vec<Document>) -> impl Fn(Value) -> Result<Value, RemoteError> + Send + Sync {
    move |args| {
        let body: ConcreteBody = serde_json::from_value(args)
            .map_err(|e| RemoteError::new("400").with_reason(e.to_string()))?;

        let mut found: Vec<Document> = docs
            .iter()
            .filter(|d| selector::matches(d, &body.selector))
            .cloned()
            .collect();
        selector::sort_documents(&mut found, &body.options.sort);

        let skip = body.options.skip.unwrap_or(0) as usize;
        let limit = body.options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(Value::Array(
            found.into_iter().skip(skip).take(limit).map(Value::Object).collect(),
        ))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_once_and_reactive_parity(
        specs in prop::collection::vec((0u8..4, -5i64..5), 0..25),
        author in prop::option::of(0u8..4),
        descending in any::<bool>(),
        limit in prop::option::of(0u64..10),
        skip in prop::option::of(0u64..10),
    ) {
        let rt = runtime();
        let docs = posts(&specs);

        let mut body = if descending {
            QueryBody::new().sort_desc("rank").sort_desc("_id")
        } else {
            QueryBody::new().sort_asc("rank").sort_asc("_id")
        };
        let mut params = Params::new();
        if let Some(author) = author {
            body = body.filter("authorId", Template::param("author"));
            params.insert("author", format!("u{}", author));
        }
        if let Some(limit) = limit {
            body = body.limit(limit);
        }
        if let Some(skip) = skip {
            body = body.skip(skip);
        }

        let (once, reactive) = rt.block_on(async {
            let store = MemoryStore::new();
            store.insert_many("posts", docs.clone()).await.unwrap();

            let channel = Arc::new(MemoryChannel::new());
            let served = docs.iter().filter_map(|d| d.as_object().cloned()).collect();
            channel.method("posts", serve(served));

            let engine = Engine::new(channel, Arc::new(store), links());
            let mut query = engine.create_query("posts", body);
            query.set_params(params);

            let once = query.fetch(FetchOptions::new()).await.unwrap();
            query.subscribe().await.unwrap();
            let reactive = query.fetch(FetchOptions::new().allow_skip()).await.unwrap();
            (once, reactive)
        });

        prop_assert_eq!(once, reactive);
    }

    #[test]
    fn test_fetch_count_is_node_count(
        comments_per_post in prop::collection::vec(0usize..40, 0..15),
        users in 1usize..6,
    ) {
        let rt = runtime();

        let (fetches, total) = rt.block_on(async {
            let store = MemoryStore::new();
            for (i, count) in comments_per_post.iter().enumerate() {
                let post = format!("p{}", i);
                store.insert("posts", json!({ "_id": &post })).await.unwrap();
                for c in 0..*count {
                    store
                        .insert(
                            "comments",
                            json!({ "_id": format!("{}-c{}", post, c), "postId": &post, "userId": format!("u{}", c % users) }),
                        )
                        .await
                        .unwrap();
                }
            }
            for u in 0..users {
                store.insert("users", json!({ "_id": format!("u{}", u) })).await.unwrap();
            }

            let counting = CountingStore::new(store);
            let engine = Engine::new(Arc::new(MemoryChannel::new()), Arc::new(counting.clone()), links());
            let body = QueryBody::new().relation(
                "comments",
                QueryBody::new().relation("user", QueryBody::new()),
            );

            let rows = engine.resolve("posts", &body, &Params::new()).await.unwrap();
            let total: usize = rows
                .iter()
                .map(|r| r["comments"].as_array().map(Vec::len).unwrap_or(0))
                .sum();
            (counting.fetches(), total)
        });

        prop_assert_eq!(fetches, 3);
        prop_assert_eq!(total, comments_per_post.iter().sum::<usize>());
    }
}
