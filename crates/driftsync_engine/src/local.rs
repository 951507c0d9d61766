//! Local-store collaborator boundary.

use crate::error::SyncResult;
use async_trait::async_trait;
use driftsync_protocol::{ChangeSet, SyncedDocument, Timestamp};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// The local offline-first store the engine reconciles.
///
/// The engine never reaches into the local storage engine; it asks for
/// the checkpoint and pending mutations, hands back remote changes,
/// and reports round outcomes through these five calls.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// The last fully-incorporated remote instant, if the replica has
    /// ever pulled.
    async fn checkpoint(&self) -> SyncResult<Option<Timestamp>>;

    /// Persists a new checkpoint after a fully applied pull.
    async fn set_checkpoint(&self, checkpoint: Timestamp) -> SyncResult<()>;

    /// Applies remote changes to the local replica.
    ///
    /// A deletion for an id the replica never saw must be a no-op, not
    /// an error: tombstones propagate to replicas that never held the
    /// record.
    async fn apply_remote_changes(&self, changes: &ChangeSet) -> SyncResult<()>;

    /// Local mutations accumulated since the last successful push.
    async fn pending_changes(&self) -> SyncResult<ChangeSet>;

    /// Clears pending mutations after a successful push.
    async fn mark_pushed(&self) -> SyncResult<()>;
}

#[derive(Default)]
struct LocalState {
    checkpoint: Option<Timestamp>,
    records: BTreeMap<String, BTreeMap<String, SyncedDocument>>,
    pending: ChangeSet,
}

/// An in-memory local store for tests.
#[derive(Default)]
pub struct MemoryLocalStore {
    state: RwLock<LocalState>,
}

impl MemoryLocalStore {
    /// Creates an empty store with no checkpoint.
    pub fn new() -> Self {
        MemoryLocalStore::default()
    }

    /// Queues a locally created document for the next push.
    pub fn queue_created(&self, collection: &str, document: SyncedDocument) {
        let mut state = self.state.write();
        state
            .records
            .entry(collection.to_string())
            .or_default()
            .insert(document.id.clone(), document.clone());
        state.pending.entry(collection).created.push(document);
    }

    /// Queues a local update for the next push.
    pub fn queue_updated(&self, collection: &str, document: SyncedDocument) {
        let mut state = self.state.write();
        state
            .records
            .entry(collection.to_string())
            .or_default()
            .insert(document.id.clone(), document.clone());
        state.pending.entry(collection).updated.push(document);
    }

    /// Queues a local deletion for the next push.
    pub fn queue_deleted(&self, collection: &str, id: &str) {
        let mut state = self.state.write();
        if let Some(records) = state.records.get_mut(collection) {
            records.remove(id);
        }
        state.pending.entry(collection).deleted.push(id.to_string());
    }

    /// Reads one applied record.
    pub fn record(&self, collection: &str, id: &str) -> Option<SyncedDocument> {
        self.state
            .read()
            .records
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// All applied records of a collection, in id order.
    pub fn records(&self, collection: &str) -> Vec<SyncedDocument> {
        self.state
            .read()
            .records
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn checkpoint(&self) -> SyncResult<Option<Timestamp>> {
        Ok(self.state.read().checkpoint)
    }

    async fn set_checkpoint(&self, checkpoint: Timestamp) -> SyncResult<()> {
        self.state.write().checkpoint = Some(checkpoint);
        Ok(())
    }

    async fn apply_remote_changes(&self, changes: &ChangeSet) -> SyncResult<()> {
        let mut state = self.state.write();
        for (collection, collection_changes) in changes.iter() {
            let records = state.records.entry(collection.clone()).or_default();
            for document in collection_changes
                .created
                .iter()
                .chain(collection_changes.updated.iter())
            {
                records.insert(document.id.clone(), document.clone());
            }
            for id in &collection_changes.deleted {
                // Unknown ids are fine: the tombstone may predate this
                // replica.
                records.remove(id);
            }
        }
        Ok(())
    }

    async fn pending_changes(&self) -> SyncResult<ChangeSet> {
        Ok(self.state.read().pending.clone())
    }

    async fn mark_pushed(&self) -> SyncResult<()> {
        self.state.write().pending = ChangeSet::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_protocol::{CollectionChanges, SessionId};

    fn doc(id: &str) -> SyncedDocument {
        SyncedDocument::new(id, SessionId::new("remote"), Timestamp::from_millis(10))
    }

    #[tokio::test]
    async fn applies_creates_updates_and_deletes() {
        let store = MemoryLocalStore::new();
        let mut changes = ChangeSet::new();
        changes.insert(
            "todos",
            CollectionChanges {
                created: vec![doc("a"), doc("b")],
                updated: vec![],
                deleted: vec![],
            },
        );
        store.apply_remote_changes(&changes).await.unwrap();
        assert_eq!(store.records("todos").len(), 2);

        let mut deletion = ChangeSet::new();
        deletion.insert(
            "todos",
            CollectionChanges {
                deleted: vec!["a".to_string()],
                ..Default::default()
            },
        );
        store.apply_remote_changes(&deletion).await.unwrap();
        assert!(store.record("todos", "a").is_none());
        assert!(store.record("todos", "b").is_some());
    }

    #[tokio::test]
    async fn unknown_id_delete_is_a_no_op() {
        let store = MemoryLocalStore::new();
        let mut changes = ChangeSet::new();
        changes.insert(
            "todos",
            CollectionChanges {
                deleted: vec!["never-seen".to_string()],
                ..Default::default()
            },
        );
        assert!(store.apply_remote_changes(&changes).await.is_ok());
        assert!(store.records("todos").is_empty());
    }

    #[tokio::test]
    async fn pending_clears_after_push() {
        let store = MemoryLocalStore::new();
        store.queue_created("todos", doc("a"));
        store.queue_deleted("todos", "b");

        let pending = store.pending_changes().await.unwrap();
        assert_eq!(pending.total_changes(), 2);

        store.mark_pushed().await.unwrap();
        assert!(store.pending_changes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let store = MemoryLocalStore::new();
        assert_eq!(store.checkpoint().await.unwrap(), None);

        store
            .set_checkpoint(Timestamp::from_millis(42))
            .await
            .unwrap();
        assert_eq!(
            store.checkpoint().await.unwrap(),
            Some(Timestamp::from_millis(42))
        );
    }
}
