//! Query-indexed storage adapter.
//!
//! Backs onto a provider with per-collection timestamp indexes and
//! real transactions (Firestore-shaped). Collection size is unbounded
//! and documents can be checked individually, but the provider caps
//! writes per atomic unit and ids per membership query; both caps are
//! honored here by chunking.

use crate::adapter::{
    DocumentHead, PullWindow, RawChanges, StagedWrite, StorageAdapter, StorageKind, StoreLimits,
    StoreScope,
};
use crate::error::SyncResult;
use async_trait::async_trait;
use driftsync_protocol::{SyncedDocument, Timestamp, TimestampField};
use futures::future::try_join_all;

/// Minimal surface of a query-indexed provider SDK.
///
/// Implement this to plug in the actual client. The adapter keeps
/// every call within the limits reported by
/// [`limits`](QueryIndexedClient::limits): membership queries never
/// carry more than `ids_per_query` ids, and
/// [`commit_atomic`](QueryIndexedClient::commit_atomic) never receives
/// more writes than `writes_per_unit`.
#[async_trait]
pub trait QueryIndexedClient: Send + Sync {
    /// Range read over one indexed timestamp field, both bounds
    /// inclusive. When `user_id` is set, only that user's documents
    /// match.
    async fn range_query(
        &self,
        collection: &str,
        field: TimestampField,
        lower: Timestamp,
        upper: Timestamp,
        user_id: Option<&str>,
    ) -> SyncResult<Vec<SyncedDocument>>;

    /// Membership query: which of `ids` exist in the collection.
    async fn ids_in(
        &self,
        collection: &str,
        ids: &[String],
        user_id: Option<&str>,
    ) -> SyncResult<Vec<String>>;

    /// Point read of one document.
    async fn get(&self, collection: &str, id: &str) -> SyncResult<Option<SyncedDocument>>;

    /// Applies `writes` in one provider transaction, verifying every
    /// precondition under its isolation.
    async fn commit_atomic(&self, writes: &[StagedWrite]) -> SyncResult<()>;

    /// Provider capacity limits.
    fn limits(&self) -> StoreLimits {
        StoreLimits {
            writes_per_unit: Some(500),
            ids_per_query: Some(10),
        }
    }
}

/// Storage adapter over a query-indexed provider.
pub struct QueryIndexedAdapter<C> {
    client: C,
}

impl<C: QueryIndexedClient> QueryIndexedAdapter<C> {
    /// Creates an adapter over the given provider client.
    pub fn new(client: C) -> Self {
        QueryIndexedAdapter { client }
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: QueryIndexedClient> StorageAdapter for QueryIndexedAdapter<C> {
    fn kind(&self) -> StorageKind {
        StorageKind::QueryIndexed
    }

    fn limits(&self) -> StoreLimits {
        self.client.limits()
    }

    async fn pull_changes(
        &self,
        scope: &StoreScope,
        collection: &str,
        window: PullWindow,
    ) -> SyncResult<RawChanges> {
        let user = scope.user_id.as_deref();
        let (created, updated, deleted) = tokio::try_join!(
            self.client.range_query(
                collection,
                TimestampField::CreatedAt,
                window.since,
                window.until,
                user,
            ),
            self.client.range_query(
                collection,
                TimestampField::UpdatedAt,
                window.since,
                window.until,
                user,
            ),
            self.client.range_query(
                collection,
                TimestampField::DeletedAt,
                window.since,
                window.until,
                user,
            ),
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

        let user = scope.user_id.as_deref();
        let chunk_size = self.client.limits().ids_per_query.unwrap_or(ids.len());
        let queries = ids
            .chunks(chunk_size.max(1))
            .map(|chunk| self.client.ids_in(collection, chunk, user));

        let found = try_join_all(queries).await?;
        Ok(found.into_iter().flatten().collect())
    }

    async fn document_head(
        &self,
        _scope: &StoreScope,
        collection: &str,
        id: &str,
    ) -> SyncResult<Option<DocumentHead>> {
        Ok(self
            .client
            .get(collection, id)
            .await?
            .map(|document| DocumentHead::of(&document)))
    }

    async fn commit_unit(&self, _scope: &StoreScope, writes: &[StagedWrite]) -> SyncResult<()> {
        self.client.commit_atomic(writes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueryClient;
    use driftsync_protocol::SessionId;

    fn doc(id: &str, created_at: i64) -> SyncedDocument {
        SyncedDocument::new(id, SessionId::new("s1"), Timestamp::from_millis(created_at))
    }

    #[tokio::test]
    async fn membership_checks_are_chunked_to_the_provider_limit() {
        let client = MemoryQueryClient::new();
        // The memory client rejects any `ids_in` call above its
        // 10-id limit, so a 25-id check passing proves chunking.
        for index in 0..5 {
            client.insert("todos", doc(&format!("existing-{index}"), 10));
        }

        let ids: Vec<String> = (0..5)
            .map(|index| format!("existing-{index}"))
            .chain((0..20).map(|index| format!("missing-{index}")))
            .collect();

        let adapter = QueryIndexedAdapter::new(client);
        let found = adapter
            .existing_ids(&StoreScope::default(), "todos", &ids)
            .await
            .unwrap();

        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|id| id.starts_with("existing-")));
    }

    #[tokio::test]
    async fn empty_membership_check_is_a_no_op() {
        let adapter = QueryIndexedAdapter::new(MemoryQueryClient::new());
        let found = adapter
            .existing_ids(&StoreScope::default(), "todos", &[])
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn pull_reads_all_three_indexes() {
        let client = MemoryQueryClient::new();
        client.insert("todos", doc("a", 100));
        let mut updated = doc("b", 10);
        updated.updated_at = Timestamp::from_millis(150);
        client.insert("todos", updated);
        let mut deleted = doc("c", 20);
        deleted.is_deleted = true;
        deleted.deleted_at = Some(Timestamp::from_millis(180));
        client.insert("todos", deleted);

        let adapter = QueryIndexedAdapter::new(client);
        let window = PullWindow {
            since: Timestamp::from_millis(50),
            until: Timestamp::from_millis(200),
        };
        let raw = adapter
            .pull_changes(&StoreScope::default(), "todos", window)
            .await
            .unwrap();

        assert_eq!(raw.created.len(), 1);
        assert_eq!(raw.created[0].id, "a");
        // "a" was created inside the window, so its updatedAt matches
        // too; "b" only matches the update index.
        assert_eq!(raw.updated.len(), 2);
        assert_eq!(raw.deleted.len(), 1);
        assert_eq!(raw.deleted[0].id, "c");
    }

    #[tokio::test]
    async fn document_head_maps_lifecycle_fields() {
        let client = MemoryQueryClient::new();
        let mut document = doc("a", 100);
        document.deleted_at = Some(Timestamp::from_millis(300));
        client.insert("todos", document);

        let adapter = QueryIndexedAdapter::new(client);
        let head = adapter
            .document_head(&StoreScope::default(), "todos", "a")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(head.updated_at, Timestamp::from_millis(100));
        assert_eq!(head.deleted_at, Some(Timestamp::from_millis(300)));

        let missing = adapter
            .document_head(&StoreScope::default(), "todos", "zzz")
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
