use std::time::Instant;

use futures::future::try_join_all;
use metrics::{counter, histogram};
use serde_json::Value;

use super::{
    GraphNode,
    batch::{BatchRequest, KeyIndex},
    link::{Cardinality, Link, LinkKind},
};
use crate::{
    adapters::Store,
    config::OneToOnePolicy,
    error::Error,
    query::{Document, FindOptions, ID_FIELD, field_value, project},
};

/// A graph node placed in breadth-first order.
struct PlanEntry<'g> {
    node: &'g GraphNode,
    relation: Option<&'g str>,
    parent: Option<usize>,
    depth: usize,
    children: Vec<usize>,
}

/// Rows fetched for one node, and for each parent row the positions of the
/// rows that belong to it. Below the root, every row belongs to some parent.
struct Fetched {
    rows: Vec<Document>,
    groups: Vec<Vec<usize>>,
}

/// Resolves a compiled graph against a store, one batched fetch per node.
pub struct Fetcher<'a> {
    store: &'a dyn Store,
    one_to_one: OneToOnePolicy,
}

impl<'a> Fetcher<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            one_to_one: OneToOnePolicy::default(),
        }
    }

    pub fn with_one_to_one(mut self, policy: OneToOnePolicy) -> Self {
        self.one_to_one = policy;
        self
    }

    /// Fetches every level of `root` breadth-first, then assembles the result
    /// tree. Nothing is returned unless every level succeeded.
    #[tracing::instrument(skip_all, fields(collection = %root.collection))]
    pub async fn resolve(&self, root: &GraphNode) -> Result<Vec<Document>, Error> {
        let start = Instant::now();
        let plan = flatten(root);

        let mut fetched: Vec<Option<Fetched>> = plan.iter().map(|_| None).collect();
        for level in levels(&plan) {
            let results = {
                let done = &fetched;
                try_join_all(level.iter().map(|&idx| self.fetch_entry(&plan, idx, done))).await?
            };
            for (idx, result) in level.into_iter().zip(results) {
                fetched[idx] = Some(result);
            }
        }

        let rows = assemble(&plan, fetched);

        histogram!("syndesis.resolve.duration_ms",
            "collection" => root.collection.clone()
        )
        .record(start.elapsed().as_millis() as f64);

        Ok(rows)
    }

    async fn fetch_entry(
        &self,
        plan: &[PlanEntry<'_>],
        idx: usize,
        done: &[Option<Fetched>],
    ) -> Result<Fetched, Error> {
        let entry = &plan[idx];
        let node = entry.node;
        let fields = node.fetch_fields();

        let (Some(link), Some(parent)) = (node.link.as_ref(), entry.parent) else {
            let options = FindOptions {
                fields,
                ..node.options.clone()
            };
            let rows = self.find(&node.collection, &node.selector, &options).await?;
            tracing::debug!(collection = %node.collection, rows = rows.len(), "fetched root");
            return Ok(Fetched {
                rows,
                groups: Vec::new(),
            });
        };

        let parents = done[parent]
            .as_ref()
            .map(|f| f.rows.as_slice())
            .unwrap_or_default();

        let mut batch = match link.kind {
            LinkKind::ParentHoldsKey | LinkKind::ManyToMany => {
                BatchRequest::new(&link.collection, ID_FIELD)
            }
            LinkKind::ChildHoldsKey => BatchRequest::new(&link.collection, &link.field),
        };
        for row in parents {
            if let Some(key) = parent_key(link, row) {
                batch.add(key);
            }
        }

        // Skip and limit apply per parent, after partitioning.
        let options = FindOptions {
            sort: node.options.sort.clone(),
            limit: None,
            skip: None,
            fields,
        };
        let rows = self
            .find(&node.collection, &batch.selector(&node.selector), &options)
            .await?;

        tracing::debug!(
            collection = %node.collection,
            relation = entry.relation.unwrap_or_default(),
            keys = batch.len(),
            rows = rows.len(),
            "fetched relation"
        );

        let groups = self.partition(entry, link, parents, &rows)?;
        Ok(compact(rows, groups))
    }

    fn partition(
        &self,
        entry: &PlanEntry<'_>,
        link: &Link,
        parents: &[Document],
        rows: &[Document],
    ) -> Result<Vec<Vec<usize>>, Error> {
        let index = match link.kind {
            LinkKind::ChildHoldsKey => KeyIndex::build(rows, &link.field),
            LinkKind::ParentHoldsKey | LinkKind::ManyToMany => KeyIndex::build(rows, ID_FIELD),
        };
        let options = &entry.node.options;
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);

        parents
            .iter()
            .map(|parent| {
                let mut matched: Vec<usize> = parent_key(link, parent)
                    .map(|key| index.matches(key))
                    .unwrap_or_default()
                    .into_iter()
                    .skip(skip)
                    .take(limit)
                    .collect();

                if link.cardinality == Cardinality::One && matched.len() > 1 {
                    match self.one_to_one {
                        OneToOnePolicy::Reject => {
                            return Err(Error::AmbiguousOneToOne {
                                collection: link.collection.clone(),
                                relation: entry.relation.unwrap_or_default().to_string(),
                                matches: matched.len(),
                            });
                        }
                        OneToOnePolicy::FirstBySort => {
                            tracing::debug!(
                                relation = entry.relation.unwrap_or_default(),
                                discarded = matched.len() - 1,
                                "one-to-one relation matched several rows"
                            );
                            matched.truncate(1);
                        }
                    }
                }

                Ok(matched)
            })
            .collect()
    }

    async fn find(
        &self,
        collection: &str,
        selector: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, Error> {
        counter!("syndesis.store.fetches", "collection" => collection.to_string()).increment(1);
        self.store.find(collection, selector, options).await
    }
}

/// Drops the rows no parent kept after skip, limit and the one-to-one policy,
/// so the next level is built only from rows that reach the result.
fn compact(rows: Vec<Document>, groups: Vec<Vec<usize>>) -> Fetched {
    let mut kept = vec![false; rows.len()];
    groups.iter().flatten().for_each(|&pos| kept[pos] = true);

    let mut remap = vec![0; kept.len()];
    let mut survivors = Vec::with_capacity(kept.len());
    for (pos, row) in rows.into_iter().enumerate() {
        if kept[pos] {
            remap[pos] = survivors.len();
            survivors.push(row);
        }
    }

    let groups = groups
        .into_iter()
        .map(|group| group.into_iter().map(|pos| remap[pos]).collect())
        .collect();

    Fetched {
        rows: survivors,
        groups,
    }
}

/// The value on a parent row that children are matched against.
fn parent_key<'d>(link: &Link, parent: &'d Document) -> Option<&'d Value> {
    match link.kind {
        LinkKind::ParentHoldsKey | LinkKind::ManyToMany => field_value(parent, &link.field),
        LinkKind::ChildHoldsKey => parent.get(ID_FIELD),
    }
}

fn flatten(root: &GraphNode) -> Vec<PlanEntry<'_>> {
    let mut plan = vec![PlanEntry {
        node: root,
        relation: None,
        parent: None,
        depth: 0,
        children: Vec::new(),
    }];

    let mut cursor = 0;
    while cursor < plan.len() {
        let node = plan[cursor].node;
        let depth = plan[cursor].depth;
        for (relation, child) in &node.children {
            let idx = plan.len();
            plan.push(PlanEntry {
                node: child,
                relation: Some(relation.as_str()),
                parent: Some(cursor),
                depth: depth + 1,
                children: Vec::new(),
            });
            plan[cursor].children.push(idx);
        }
        cursor += 1;
    }

    plan
}

/// Plan indices grouped by depth. Breadth-first order keeps each level contiguous.
fn levels(plan: &[PlanEntry<'_>]) -> Vec<Vec<usize>> {
    let mut levels: Vec<Vec<usize>> = Vec::new();
    for (idx, entry) in plan.iter().enumerate() {
        if levels.len() <= entry.depth {
            levels.push(Vec::new());
        }
        levels[entry.depth].push(idx);
    }
    levels
}

/// Grafts children onto parents, deepest nodes first, so a row only gains
/// its relation fields once everything below it is complete.
fn assemble(plan: &[PlanEntry<'_>], fetched: Vec<Option<Fetched>>) -> Vec<Document> {
    let (mut rows, groups): (Vec<Vec<Document>>, Vec<Vec<Vec<usize>>>) = fetched
        .into_iter()
        .map(|f| f.map(|f| (f.rows, f.groups)).unwrap_or_default())
        .unzip();

    for idx in (0..plan.len()).rev() {
        let entry = &plan[idx];
        let mut level = std::mem::take(&mut rows[idx]);

        // Join fields were fetched alongside the requested ones.
        if let Some(requested) = &entry.node.options.fields {
            level.iter_mut().for_each(|row| *row = project(row, requested));
        }

        for &child in &entry.children {
            let Some(relation) = plan[child].relation else {
                continue;
            };
            let cardinality = plan[child]
                .node
                .link
                .as_ref()
                .map(|l| l.cardinality)
                .unwrap_or(Cardinality::Many);
            let child_rows = &rows[child];

            for (row, group) in level.iter_mut().zip(&groups[child]) {
                match cardinality {
                    Cardinality::Many => {
                        let attached = group
                            .iter()
                            .map(|&pos| Value::Object(child_rows[pos].clone()))
                            .collect();
                        row.insert(relation.to_string(), Value::Array(attached));
                    }
                    Cardinality::One => match group.first() {
                        Some(&pos) => {
                            row.insert(relation.to_string(), Value::Object(child_rows[pos].clone()));
                        }
                        None => {
                            row.remove(relation);
                        }
                    },
                }
            }
        }

        rows[idx] = level;
    }

    rows.into_iter().next().unwrap_or_default()
}
