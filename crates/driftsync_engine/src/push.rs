//! Push-side conflict detection and write staging.

use crate::adapter::{
    DocumentPatch, Precondition, StagedWrite, StorageAdapter, StoreScope, WriteOp,
};
use crate::config::CollectionPlan;
use crate::error::{SyncError, SyncResult};
use driftsync_protocol::{CollectionChanges, SessionId, Timestamp};
use futures::future::try_join_all;

/// Pre-commit checks of a local change set against current remote
/// state.
///
/// The checks are optimistic concurrency: "has anyone changed this
/// record since I last saw consistent state?", never a comparison of
/// values. Any failure rejects the entire round before a single write
/// is staged.
pub(crate) struct ConflictGuard<'a> {
    adapter: &'a dyn StorageAdapter,
    scope: &'a StoreScope,
}

impl<'a> ConflictGuard<'a> {
    pub(crate) fn new(adapter: &'a dyn StorageAdapter, scope: &'a StoreScope) -> Self {
        ConflictGuard { adapter, scope }
    }

    /// Validates one collection's changes against the remote store.
    pub(crate) async fn check(
        &self,
        plan: &CollectionPlan,
        changes: &CollectionChanges,
        checkpoint: Timestamp,
    ) -> SyncResult<()> {
        // Two independent creates can never legitimately share an id,
        // so any collision is a protocol violation for the round.
        let created_ids: Vec<String> = changes
            .created
            .iter()
            .map(|document| document.id.clone())
            .collect();
        let existing = self
            .adapter
            .existing_ids(self.scope, &plan.push_to, &created_ids)
            .await?;
        if let Some(id) = existing.into_iter().next() {
            return Err(SyncError::RemoteIdAlreadyExists {
                collection: plan.name.clone(),
                id,
            });
        }

        let targets: Vec<&str> = changes
            .updated
            .iter()
            .map(|document| document.id.as_str())
            .chain(changes.deleted.iter().map(String::as_str))
            .collect();

        let heads = try_join_all(targets.iter().map(|id| {
            self.adapter
                .document_head(self.scope, &plan.push_to, id)
        }))
        .await?;

        let precondition = Precondition::NotModifiedSince(checkpoint);
        for (id, head) in targets.iter().zip(heads.iter()) {
            precondition.verify(head.as_ref(), &plan.name, id)?;
        }

        Ok(())
    }
}

/// Stages one collection's accepted changes as writes.
///
/// Every write of a round shares one commit timestamp: creates are
/// stamped `created_at == updated_at == commit_ts`, updates advance
/// `updated_at`, and deletions tombstone with `deleted_at` (a
/// physical delete never happens). Each write carries the
/// precondition the store re-verifies at commit.
pub(crate) fn stage_collection(
    plan: &CollectionPlan,
    changes: &CollectionChanges,
    session: &SessionId,
    scope: &StoreScope,
    checkpoint: Timestamp,
    commit_ts: Timestamp,
) -> Vec<StagedWrite> {
    let mut writes = Vec::with_capacity(changes.len());

    for document in &changes.created {
        let mut staged = document.clone();
        staged.strip_fields(&plan.exclusions);
        staged.session_id = session.clone();
        staged.created_at = commit_ts;
        staged.updated_at = commit_ts;
        staged.user_id = scope.user_id.clone();

        writes.push(StagedWrite {
            collection: plan.push_to.clone(),
            id: staged.id.clone(),
            op: WriteOp::Create(staged),
            precondition: Precondition::NotExists,
        });
    }

    for document in &changes.updated {
        let mut stripped = document.clone();
        stripped.strip_fields(&plan.exclusions);

        writes.push(StagedWrite {
            collection: plan.push_to.clone(),
            id: document.id.clone(),
            op: WriteOp::Patch(DocumentPatch {
                payload: stripped.payload,
                session_id: Some(session.clone()),
                updated_at: Some(commit_ts),
                ..Default::default()
            }),
            precondition: Precondition::NotModifiedSince(checkpoint),
        });
    }

    for id in &changes.deleted {
        writes.push(StagedWrite {
            collection: plan.push_to.clone(),
            id: id.clone(),
            op: WriteOp::Patch(DocumentPatch {
                session_id: Some(session.clone()),
                deleted_at: Some(commit_ts),
                is_deleted: Some(true),
                ..Default::default()
            }),
            precondition: Precondition::NotModifiedSince(checkpoint),
        });
    }

    writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueryClient;
    use crate::query_indexed::QueryIndexedAdapter;
    use driftsync_protocol::SyncedDocument;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn plan() -> CollectionPlan {
        CollectionPlan {
            name: "todos".to_string(),
            pull_from: "todos".to_string(),
            push_to: "todos".to_string(),
            exclusions: ["color".to_string(), "_status".to_string()]
                .into_iter()
                .collect::<BTreeSet<_>>(),
        }
    }

    fn doc(id: &str, at: i64) -> SyncedDocument {
        SyncedDocument::new(id, SessionId::new("local"), Timestamp::from_millis(at))
            .with_field("text", format!("todo {id}"))
            .with_field("color", "red")
            .with_field("_status", "created")
    }

    #[test]
    fn staging_stamps_creates_with_the_commit_time() {
        let changes = CollectionChanges {
            created: vec![doc("a", 10)],
            ..Default::default()
        };
        let writes = stage_collection(
            &plan(),
            &changes,
            &SessionId::new("s9"),
            &StoreScope::for_user("alice"),
            Timestamp::from_millis(100),
            Timestamp::from_millis(200),
        );

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].precondition, Precondition::NotExists);
        match &writes[0].op {
            WriteOp::Create(document) => {
                assert_eq!(document.created_at, Timestamp::from_millis(200));
                assert_eq!(document.updated_at, Timestamp::from_millis(200));
                assert_eq!(document.session_id, SessionId::new("s9"));
                assert_eq!(document.user_id.as_deref(), Some("alice"));
                assert!(document.payload.get("color").is_none());
                assert!(document.payload.get("_status").is_none());
                assert_eq!(document.payload.get("text"), Some(&json!("todo a")));
            }
            WriteOp::Patch(_) => panic!("created documents stage as creates"),
        }
    }

    #[test]
    fn staging_updates_patch_payload_and_updated_at() {
        let changes = CollectionChanges {
            updated: vec![doc("a", 10)],
            ..Default::default()
        };
        let writes = stage_collection(
            &plan(),
            &changes,
            &SessionId::new("s9"),
            &StoreScope::default(),
            Timestamp::from_millis(100),
            Timestamp::from_millis(200),
        );

        match &writes[0].op {
            WriteOp::Patch(patch) => {
                assert_eq!(patch.updated_at, Some(Timestamp::from_millis(200)));
                assert_eq!(patch.is_deleted, None);
                assert!(patch.payload.get("color").is_none());
                assert_eq!(patch.payload.get("text"), Some(&json!("todo a")));
            }
            WriteOp::Create(_) => panic!("updates stage as patches"),
        }
        assert_eq!(
            writes[0].precondition,
            Precondition::NotModifiedSince(Timestamp::from_millis(100))
        );
    }

    #[test]
    fn staging_deletes_tombstone_without_payload() {
        let changes = CollectionChanges {
            deleted: vec!["a".to_string()],
            ..Default::default()
        };
        let writes = stage_collection(
            &plan(),
            &changes,
            &SessionId::new("s9"),
            &StoreScope::default(),
            Timestamp::from_millis(100),
            Timestamp::from_millis(200),
        );

        match &writes[0].op {
            WriteOp::Patch(patch) => {
                assert!(patch.payload.is_empty());
                assert_eq!(patch.is_deleted, Some(true));
                assert_eq!(patch.deleted_at, Some(Timestamp::from_millis(200)));
                assert_eq!(patch.updated_at, None);
            }
            WriteOp::Create(_) => panic!("deletes stage as patches"),
        }
    }

    #[tokio::test]
    async fn create_collision_rejects_the_collection() {
        let client = MemoryQueryClient::new();
        client.insert(
            "todos",
            SyncedDocument::new("a", SessionId::new("other"), Timestamp::from_millis(5)),
        );
        let adapter = QueryIndexedAdapter::new(client);
        let scope = StoreScope::default();
        let guard = ConflictGuard::new(&adapter, &scope);

        let changes = CollectionChanges {
            created: vec![doc("a", 10), doc("b", 10)],
            ..Default::default()
        };
        let result = guard
            .check(&plan(), &changes, Timestamp::from_millis(100))
            .await;

        assert!(matches!(
            result,
            Err(SyncError::RemoteIdAlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn stale_update_target_is_rejected() {
        let client = MemoryQueryClient::new();
        client.insert(
            "todos",
            SyncedDocument::new("a", SessionId::new("other"), Timestamp::from_millis(150)),
        );
        let adapter = QueryIndexedAdapter::new(client);
        let scope = StoreScope::default();
        let guard = ConflictGuard::new(&adapter, &scope);

        let changes = CollectionChanges {
            updated: vec![doc("a", 10)],
            ..Default::default()
        };
        let result = guard
            .check(&plan(), &changes, Timestamp::from_millis(100))
            .await;

        assert!(matches!(
            result,
            Err(SyncError::RemoteRecordModified { .. })
        ));
    }

    #[tokio::test]
    async fn missing_delete_target_is_rejected() {
        let adapter = QueryIndexedAdapter::new(MemoryQueryClient::new());
        let scope = StoreScope::default();
        let guard = ConflictGuard::new(&adapter, &scope);

        let changes = CollectionChanges {
            deleted: vec!["ghost".to_string()],
            ..Default::default()
        };
        let result = guard
            .check(&plan(), &changes, Timestamp::from_millis(100))
            .await;

        assert!(matches!(result, Err(SyncError::RemoteRecordMissing { .. })));
    }

    #[tokio::test]
    async fn clean_changes_pass_the_guard() {
        let client = MemoryQueryClient::new();
        client.insert(
            "todos",
            SyncedDocument::new("a", SessionId::new("other"), Timestamp::from_millis(50)),
        );
        let adapter = QueryIndexedAdapter::new(client);
        let scope = StoreScope::default();
        let guard = ConflictGuard::new(&adapter, &scope);

        let changes = CollectionChanges {
            created: vec![doc("fresh", 10)],
            updated: vec![doc("a", 10)],
            ..Default::default()
        };
        assert!(guard
            .check(&plan(), &changes, Timestamp::from_millis(100))
            .await
            .is_ok());
    }
}
