//! Per-round change sets.

use crate::document::SyncedDocument;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Changes for one collection within a sync round.
///
/// A document id belongs to at most one of the three buckets; deletions
/// carry ids only, never payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionChanges {
    /// Documents created since the checkpoint.
    pub created: Vec<SyncedDocument>,
    /// Documents updated since the checkpoint.
    pub updated: Vec<SyncedDocument>,
    /// Ids of documents deleted since the checkpoint.
    pub deleted: Vec<String>,
}

impl CollectionChanges {
    /// Total number of changes across the three buckets.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Whether all three buckets are empty.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Returns the first document id that appears in more than one
    /// bucket, if any.
    pub fn first_overlap(&self) -> Option<String> {
        let mut seen = BTreeSet::new();
        let ids = self
            .created
            .iter()
            .map(|doc| doc.id.as_str())
            .chain(self.updated.iter().map(|doc| doc.id.as_str()))
            .chain(self.deleted.iter().map(String::as_str));

        for id in ids {
            if !seen.insert(id) {
                return Some(id.to_string());
            }
        }
        None
    }

    /// Whether every document id appears in at most one bucket.
    pub fn is_disjoint(&self) -> bool {
        self.first_overlap().is_none()
    }
}

/// All changes in one sync round, keyed by collection name.
///
/// Produced fresh on both the pull and push side of a round; never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<String, CollectionChanges>);

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        ChangeSet::default()
    }

    /// Inserts the changes for one collection, replacing any previous
    /// entry.
    pub fn insert(&mut self, collection: impl Into<String>, changes: CollectionChanges) {
        self.0.insert(collection.into(), changes);
    }

    /// Changes for one collection.
    pub fn get(&self, collection: &str) -> Option<&CollectionChanges> {
        self.0.get(collection)
    }

    /// Mutable changes for one collection, created empty on first
    /// access.
    pub fn entry(&mut self, collection: &str) -> &mut CollectionChanges {
        self.0.entry(collection.to_string()).or_default()
    }

    /// Iterates collections in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CollectionChanges)> {
        self.0.iter()
    }

    /// Collection names in order.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total number of changes across all collections.
    pub fn total_changes(&self) -> usize {
        self.0.values().map(CollectionChanges::len).sum()
    }

    /// Whether the round carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(CollectionChanges::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use crate::timestamp::Timestamp;

    fn doc(id: &str) -> SyncedDocument {
        SyncedDocument::new(id, SessionId::new("s1"), Timestamp::from_millis(1))
    }

    #[test]
    fn totals_sum_across_collections() {
        let mut set = ChangeSet::new();
        set.insert(
            "todos",
            CollectionChanges {
                created: vec![doc("a"), doc("b")],
                updated: vec![doc("c")],
                deleted: vec!["d".to_string()],
            },
        );
        set.insert(
            "users",
            CollectionChanges {
                created: vec![doc("e")],
                ..Default::default()
            },
        );

        assert_eq!(set.total_changes(), 5);
        assert!(!set.is_empty());
    }

    #[test]
    fn empty_collections_make_an_empty_set() {
        let mut set = ChangeSet::new();
        set.insert("todos", CollectionChanges::default());

        assert!(set.is_empty());
        assert_eq!(set.total_changes(), 0);
    }

    #[test]
    fn disjoint_buckets_pass() {
        let changes = CollectionChanges {
            created: vec![doc("a")],
            updated: vec![doc("b")],
            deleted: vec!["c".to_string()],
        };
        assert!(changes.is_disjoint());
        assert_eq!(changes.first_overlap(), None);
    }

    #[test]
    fn overlapping_buckets_are_reported() {
        let changes = CollectionChanges {
            created: vec![doc("a")],
            updated: vec![doc("a")],
            deleted: vec![],
        };
        assert!(!changes.is_disjoint());
        assert_eq!(changes.first_overlap(), Some("a".to_string()));
    }

    #[test]
    fn entry_creates_empty_buckets() {
        let mut set = ChangeSet::new();
        set.entry("todos").created.push(doc("a"));

        assert_eq!(set.get("todos").unwrap().created.len(), 1);
        assert_eq!(set.collections().collect::<Vec<_>>(), vec!["todos"]);
    }
}
