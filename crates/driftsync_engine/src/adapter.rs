//! Remote storage capability interface.
//!
//! One trait abstracts the two remote store shapes; the engine never
//! branches on which shape it is talking to. Variant-specific behavior
//! (chunked membership queries, snapshot-merge commits) lives entirely
//! inside the implementations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use driftsync_protocol::{SessionId, SyncedDocument, Timestamp};
use serde_json::{Map, Value};

/// Which remote storage shape an adapter implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Collections with per-field indexes, range and membership
    /// queries, and real transactions capped in size.
    QueryIndexed,
    /// One tree blob per user holding the whole dataset; coarse
    /// single-write atomicity, no membership queries.
    Tree,
}

/// Provider capacity limits reported by an adapter.
///
/// `None` means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreLimits {
    /// Maximum writes per atomic unit.
    pub writes_per_unit: Option<usize>,
    /// Maximum ids per membership query.
    pub ids_per_query: Option<usize>,
}

/// Scope of one sync round against the remote store.
///
/// The engine resolves this once per round and threads it through every
/// adapter call; adapters hold no per-round state of their own.
#[derive(Debug, Clone, Default)]
pub struct StoreScope {
    /// Resolved user id, when the round runs authenticated.
    pub user_id: Option<String>,
}

impl StoreScope {
    /// Scope for an authenticated round.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        StoreScope {
            user_id: Some(user_id.into()),
        }
    }
}

/// Inclusive pull window over the indexed timestamp fields.
#[derive(Debug, Clone, Copy)]
pub struct PullWindow {
    /// The replica's checkpoint.
    pub since: Timestamp,
    /// Captured before any query is issued; becomes the next
    /// checkpoint candidate.
    pub until: Timestamp,
}

/// Unfiltered documents matching one collection's pull window.
///
/// Classification, echo suppression and field stripping happen in the
/// engine; adapters return what the store said.
#[derive(Debug, Clone, Default)]
pub struct RawChanges {
    /// Documents whose `createdAt` falls in the window.
    pub created: Vec<SyncedDocument>,
    /// Documents whose `updatedAt` falls in the window.
    pub updated: Vec<SyncedDocument>,
    /// Documents whose `deletedAt` falls in the window.
    pub deleted: Vec<SyncedDocument>,
}

/// The conflict-relevant head of a remote document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentHead {
    /// Remote time of the last mutation.
    pub updated_at: Timestamp,
    /// Remote tombstoning time, once deleted.
    pub deleted_at: Option<Timestamp>,
}

impl DocumentHead {
    /// The head of an existing document.
    pub fn of(document: &SyncedDocument) -> Self {
        DocumentHead {
            updated_at: document.updated_at,
            deleted_at: document.deleted_at,
        }
    }
}

/// Fields merged into an existing remote document.
///
/// Absent fields are left untouched; payload entries overwrite
/// per-key. Physical deletion never happens: a tombstone is a patch
/// setting `is_deleted` and `deleted_at`.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    /// Payload fields to overwrite.
    pub payload: Map<String, Value>,
    /// New writing session.
    pub session_id: Option<SessionId>,
    /// New mutation time.
    pub updated_at: Option<Timestamp>,
    /// Tombstoning time.
    pub deleted_at: Option<Timestamp>,
    /// Tombstone flag.
    pub is_deleted: Option<bool>,
}

impl DocumentPatch {
    /// Merges this patch into an existing document.
    pub fn apply_to(&self, document: &mut SyncedDocument) {
        for (key, value) in &self.payload {
            document.payload.insert(key.clone(), value.clone());
        }
        if let Some(session) = &self.session_id {
            document.session_id = session.clone();
        }
        if let Some(updated_at) = self.updated_at {
            document.updated_at = updated_at;
        }
        if let Some(deleted_at) = self.deleted_at {
            document.deleted_at = Some(deleted_at);
        }
        if let Some(is_deleted) = self.is_deleted {
            document.is_deleted = is_deleted;
        }
    }
}

/// A single write staged for commit.
#[derive(Debug, Clone)]
pub struct StagedWrite {
    /// Target collection.
    pub collection: String,
    /// Target document id.
    pub id: String,
    /// What to write.
    pub op: WriteOp,
    /// Re-verified under the store's transaction semantics at commit.
    pub precondition: Precondition,
}

/// The write half of a staged write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert a full document.
    Create(SyncedDocument),
    /// Merge fields into an existing document.
    Patch(DocumentPatch),
}

/// Commit-time check on the target document.
///
/// A violated precondition aborts the whole atomic unit; the caller
/// must re-pull and retry the round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Precondition {
    /// The target id must not exist in the collection.
    NotExists,
    /// Neither `updatedAt` nor `deletedAt` may have advanced past the
    /// given checkpoint.
    NotModifiedSince(Timestamp),
}

impl Precondition {
    /// Verifies this precondition against the current remote head.
    ///
    /// The modification check runs before the tombstone check, so a
    /// document that was updated and then deleted reports the earlier
    /// of the two violations.
    pub fn verify(
        &self,
        head: Option<&DocumentHead>,
        collection: &str,
        id: &str,
    ) -> SyncResult<()> {
        match self {
            Precondition::NotExists => match head {
                Some(_) => Err(SyncError::RemoteIdAlreadyExists {
                    collection: collection.to_string(),
                    id: id.to_string(),
                }),
                None => Ok(()),
            },
            Precondition::NotModifiedSince(checkpoint) => {
                let head = head.ok_or_else(|| SyncError::RemoteRecordMissing {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
                if head.updated_at > *checkpoint {
                    return Err(SyncError::RemoteRecordModified {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                }
                if head.deleted_at.is_some_and(|deleted| deleted > *checkpoint) {
                    return Err(SyncError::RemoteRecordDeleted {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// A remote store a replica reconciles against.
///
/// Implementations exist per storage shape and are selected by the
/// [`StorageKind`](crate::StorageKind) configuration tag, never by
/// overriding engine control flow.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// The storage shape this adapter implements.
    fn kind(&self) -> StorageKind;

    /// Provider capacity limits.
    fn limits(&self) -> StoreLimits;

    /// Runs the three timestamp range reads for one collection over
    /// the window.
    ///
    /// The reads are issued independently because the store cannot
    /// express a disjunctive range over three fields in one query.
    async fn pull_changes(
        &self,
        scope: &StoreScope,
        collection: &str,
        window: PullWindow,
    ) -> SyncResult<RawChanges>;

    /// Returns the subset of `ids` that already exist in the
    /// collection. Chunks membership queries internally as the
    /// provider requires; an empty input returns empty without I/O.
    async fn existing_ids(
        &self,
        scope: &StoreScope,
        collection: &str,
        ids: &[String],
    ) -> SyncResult<Vec<String>>;

    /// Reads the conflict-relevant head of one document.
    async fn document_head(
        &self,
        scope: &StoreScope,
        collection: &str,
        id: &str,
    ) -> SyncResult<Option<DocumentHead>>;

    /// Applies one atomic unit of writes.
    ///
    /// Preconditions are re-verified under the store's transaction
    /// semantics; any violation aborts the whole unit with the
    /// corresponding conflict error and nothing is applied.
    async fn commit_unit(&self, scope: &StoreScope, writes: &[StagedWrite]) -> SyncResult<()>;
}
