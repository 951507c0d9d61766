//! Single-root-tree storage adapter.
//!
//! The whole dataset lives under one `sync/<userId>` node
//! (Realtime-Database-shaped). There is no native membership query and
//! no per-document transaction; a commit reads the current snapshot,
//! verifies every precondition against it, applies the staged writes
//! in memory and writes the subtree back in one call. Atomicity is
//! naturally round-wide, so no write-count limit applies.

use crate::adapter::{
    DocumentHead, PullWindow, RawChanges, StagedWrite, StorageAdapter, StorageKind, StoreLimits,
    StoreScope, WriteOp,
};
use crate::error::SyncResult;
use async_trait::async_trait;
use driftsync_protocol::{SyncedDocument, Timestamp, TimestampField};
use std::collections::BTreeMap;

/// User id used for the tree root when running unauthenticated.
pub const DEFAULT_USER_ID: &str = "default_user";

/// Map of collection name to documents keyed by id, as stored under
/// one user's sync root.
pub type TreeSnapshot = BTreeMap<String, BTreeMap<String, SyncedDocument>>;

/// Minimal surface of a tree-store provider SDK.
///
/// Paths follow the `sync/<userId>/<collection>/<documentId>`
/// convention; range reads receive the collection path, snapshot
/// reads and writes receive the user root.
#[async_trait]
pub trait TreeClient: Send + Sync {
    /// Range read over the documents at `path`, ordered by one child
    /// timestamp field, both bounds inclusive.
    async fn read_range(
        &self,
        path: &str,
        field: TimestampField,
        lower: Timestamp,
        upper: Timestamp,
    ) -> SyncResult<Vec<SyncedDocument>>;

    /// Point read of the document node at `path`.
    async fn read_node(&self, path: &str) -> SyncResult<Option<SyncedDocument>>;

    /// Reads the whole subtree under `path`.
    async fn read_subtree(&self, path: &str) -> SyncResult<TreeSnapshot>;

    /// Replaces the whole subtree under `path`.
    async fn write_subtree(&self, path: &str, tree: TreeSnapshot) -> SyncResult<()>;
}

/// Storage adapter over a single-root tree store.
pub struct TreeAdapter<C> {
    client: C,
}

impl<C: TreeClient> TreeAdapter<C> {
    /// Creates an adapter over the given provider client.
    pub fn new(client: C) -> Self {
        TreeAdapter { client }
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn root(scope: &StoreScope) -> String {
        format!(
            "sync/{}",
            scope.user_id.as_deref().unwrap_or(DEFAULT_USER_ID)
        )
    }

    fn collection_path(scope: &StoreScope, collection: &str) -> String {
        format!("{}/{collection}", Self::root(scope))
    }

    fn document_path(scope: &StoreScope, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", Self::root(scope))
    }
}

#[async_trait]
impl<C: TreeClient> StorageAdapter for TreeAdapter<C> {
    fn kind(&self) -> StorageKind {
        StorageKind::Tree
    }

    fn limits(&self) -> StoreLimits {
        StoreLimits::default()
    }

    async fn pull_changes(
        &self,
        scope: &StoreScope,
        collection: &str,
        window: PullWindow,
    ) -> SyncResult<RawChanges> {
        let path = Self::collection_path(scope, collection);
        let (created, updated, deleted) = tokio::try_join!(
            self.client
                .read_range(&path, TimestampField::CreatedAt, window.since, window.until),
            self.client
                .read_range(&path, TimestampField::UpdatedAt, window.since, window.until),
            self.client
                .read_range(&path, TimestampField::DeletedAt, window.since, window.until),
        )?;

        Ok(RawChanges {
            created,
            updated,
            deleted,
        })
    }

    async fn existing_ids(
        &self,
        scope: &StoreScope,
        collection: &str,
        ids: &[String],
    ) -> SyncResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // No membership query on this shape: check against the
        // current snapshot.
        let tree = self.client.read_subtree(&Self::root(scope)).await?;
        let documents = match tree.get(collection) {
            Some(documents) => documents,
            None => return Ok(Vec::new()),
        };

        Ok(ids
            .iter()
            .filter(|id| documents.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn document_head(
        &self,
        scope: &StoreScope,
        collection: &str,
        id: &str,
    ) -> SyncResult<Option<DocumentHead>> {
        let path = Self::document_path(scope, collection, id);
        Ok(self
            .client
            .read_node(&path)
            .await?
            .map(|document| DocumentHead::of(&document)))
    }

    async fn commit_unit(&self, scope: &StoreScope, writes: &[StagedWrite]) -> SyncResult<()> {
        let root = Self::root(scope);
        let mut tree = self.client.read_subtree(&root).await?;

        // Verify every precondition against the snapshot before
        // touching it, so a violation leaves nothing half-applied.
        for write in writes {
            let head = tree
                .get(&write.collection)
                .and_then(|documents| documents.get(&write.id))
                .map(DocumentHead::of);
            write
                .precondition
                .verify(head.as_ref(), &write.collection, &write.id)?;
        }

        for write in writes {
            let documents = tree.entry(write.collection.clone()).or_default();
            match &write.op {
                WriteOp::Create(document) => {
                    documents.insert(write.id.clone(), document.clone());
                }
                WriteOp::Patch(patch) => {
                    if let Some(document) = documents.get_mut(&write.id) {
                        patch.apply_to(document);
                    }
                }
            }
        }

        self.client.write_subtree(&root, tree).await
    }
}
