use std::collections::HashMap;

/// Where the joining key of a relation is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `parent[field]` holds the child's `_id`.
    ParentHoldsKey,
    /// `parent[field]` holds an array of child `_id`s.
    ManyToMany,
    /// `child[field]` holds (or, as an array, contains) the parent's `_id`.
    ChildHoldsKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// A declared relationship from one collection to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub collection: String,
    pub field: String,
    pub kind: LinkKind,
    pub cardinality: Cardinality,
}

impl Link {
    /// Parent stores the child id in `field` (many-to-one, or one-to-one).
    pub fn one(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            kind: LinkKind::ParentHoldsKey,
            cardinality: Cardinality::One,
        }
    }

    /// Parent stores an array of child ids in `field`.
    pub fn many(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            kind: LinkKind::ManyToMany,
            cardinality: Cardinality::Many,
        }
    }

    /// Children store the parent id in `field` (one-to-many).
    pub fn inverse_many(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            kind: LinkKind::ChildHoldsKey,
            cardinality: Cardinality::Many,
        }
    }

    /// A single child stores the parent id in `field` (one-to-one).
    pub fn inverse_one(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            kind: LinkKind::ChildHoldsKey,
            cardinality: Cardinality::One,
        }
    }

    /// Field that must be present on parent rows to join.
    pub(crate) fn parent_field(&self) -> Option<&str> {
        match self.kind {
            LinkKind::ParentHoldsKey | LinkKind::ManyToMany => Some(&self.field),
            LinkKind::ChildHoldsKey => None,
        }
    }

    /// Field that must be present on child rows to join.
    pub(crate) fn child_field(&self) -> Option<&str> {
        match self.kind {
            LinkKind::ChildHoldsKey => Some(&self.field),
            LinkKind::ParentHoldsKey | LinkKind::ManyToMany => None,
        }
    }
}

/// Registry of relations, keyed by (collection, relation name).
#[derive(Debug, Clone, Default)]
pub struct Links {
    links: HashMap<(String, String), Link>,
}

impl Links {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        mut self,
        collection: impl Into<String>,
        relation: impl Into<String>,
        link: Link,
    ) -> Self {
        self.insert(collection, relation, link);
        self
    }

    pub fn insert(
        &mut self,
        collection: impl Into<String>,
        relation: impl Into<String>,
        link: Link,
    ) {
        self.links
            .insert((collection.into(), relation.into()), link);
    }

    pub fn get(&self, collection: &str, relation: &str) -> Option<&Link> {
        self.links
            .get(&(collection.to_string(), relation.to_string()))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
