pub mod batch;
pub mod fetch;
pub mod link;

use std::collections::BTreeMap;

pub use batch::{BatchRequest, KeyIndex};
pub use fetch::Fetcher;
pub use link::{Cardinality, Link, LinkKind, Links};

use crate::{
    config::Config,
    error::Error,
    query::{ConcreteBody, Document, FindOptions, ID_FIELD},
};

/// One compiled level of a query: what to read from `collection` and how it
/// hangs off its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub collection: String,
    pub selector: Document,
    pub options: FindOptions,
    /// How this node joins its parent. `None` at the root.
    pub link: Option<Link>,
    pub children: BTreeMap<String, GraphNode>,
}

impl GraphNode {
    /// Number of nodes in this subtree, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children.values().map(GraphNode::node_count).sum::<usize>()
    }

    /// Relation depth below this node. A node without children has depth 0.
    pub fn depth(&self) -> usize {
        self.children
            .values()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Projection sent to the store: the requested fields plus whatever the
    /// joins above and below this node need.
    pub(crate) fn fetch_fields(&self) -> Option<Vec<String>> {
        let requested = self.options.fields.as_ref()?;
        let mut fields = requested.clone();

        let mut add = |field: &str| {
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        };

        add(ID_FIELD);
        if let Some(field) = self.link.as_ref().and_then(Link::child_field) {
            add(field);
        }
        for child in self.children.values() {
            if let Some(field) = child.link.as_ref().and_then(Link::parent_field) {
                add(field);
            }
        }

        Some(fields)
    }
}

/// Builds the plan for `body` rooted at `collection`.
///
/// Every relation name must be registered in `links` for the collection it
/// is nested under. Performs no I/O.
pub fn compile(
    collection: &str,
    body: &ConcreteBody,
    links: &Links,
    config: &Config,
) -> Result<GraphNode, Error> {
    compile_node(collection, body, None, links, config.max_depth, 0)
}

fn compile_node(
    collection: &str,
    body: &ConcreteBody,
    link: Option<Link>,
    links: &Links,
    max_depth: Option<usize>,
    depth: usize,
) -> Result<GraphNode, Error> {
    if let Some(max) = max_depth {
        if depth > max {
            return Err(Error::DepthExceeded { max });
        }
    }

    let mut children = BTreeMap::new();
    for (relation, nested) in &body.relations {
        let child_link = links
            .get(collection, relation)
            .ok_or_else(|| Error::UnknownRelation {
                collection: collection.to_string(),
                relation: relation.clone(),
            })?
            .clone();

        let child = compile_node(
            &child_link.collection.clone(),
            nested,
            Some(child_link),
            links,
            max_depth,
            depth + 1,
        )?;
        children.insert(relation.clone(), child);
    }

    Ok(GraphNode {
        collection: collection.to_string(),
        selector: body.selector.clone(),
        options: body.options.clone(),
        link,
        children,
    })
}
