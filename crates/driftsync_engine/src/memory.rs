//! In-memory remote backends.
//!
//! Reference implementations of the provider client traits, used by
//! the engine's own tests and as executable documentation of the
//! provider contracts. Both enforce their declared limits (an
//! oversized membership query or atomic unit is an error rather than
//! silently accepted) so the engine's chunking paths are actually
//! exercised. Both also support injected failures for propagation
//! tests.
//!
//! Clones share state, like real SDK client handles.

use crate::adapter::{DocumentHead, StagedWrite, StoreLimits, WriteOp};
use crate::error::{SyncError, SyncResult};
use crate::query_indexed::QueryIndexedClient;
use crate::tree::{TreeClient, TreeSnapshot};
use async_trait::async_trait;
use driftsync_protocol::{SyncedDocument, Timestamp, TimestampField};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
struct Faults {
    next: Option<SyncError>,
    commit_after: Option<(usize, SyncError)>,
}

impl Faults {
    fn take_next(&mut self) -> SyncResult<()> {
        match self.next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn take_commit(&mut self) -> SyncResult<()> {
        match self.commit_after.as_mut() {
            Some((remaining, _)) if *remaining == 0 => {
                let error = self
                    .commit_after
                    .take()
                    .map(|(_, error)| error)
                    .unwrap_or_else(|| SyncError::storage("injected failure"));
                Err(error)
            }
            Some((remaining, _)) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct QueryStoreInner {
    collections: RwLock<BTreeMap<String, BTreeMap<String, SyncedDocument>>>,
    limits: RwLock<StoreLimits>,
    faults: Mutex<Faults>,
}

/// In-memory query-indexed provider.
#[derive(Clone, Default)]
pub struct MemoryQueryClient {
    inner: Arc<QueryStoreInner>,
}

impl MemoryQueryClient {
    /// Creates an empty store with Firestore-shaped limits
    /// (500 writes per unit, 10 ids per membership query).
    pub fn new() -> Self {
        let client = MemoryQueryClient::default();
        *client.inner.limits.write() = StoreLimits {
            writes_per_unit: Some(500),
            ids_per_query: Some(10),
        };
        client
    }

    /// Creates an empty store with the given limits.
    pub fn with_limits(limits: StoreLimits) -> Self {
        let client = MemoryQueryClient::default();
        *client.inner.limits.write() = limits;
        client
    }

    /// Seeds one document.
    pub fn insert(&self, collection: &str, document: SyncedDocument) {
        self.inner
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(document.id.clone(), document);
    }

    /// Reads one document, if present.
    pub fn document(&self, collection: &str, id: &str) -> Option<SyncedDocument> {
        self.inner
            .collections
            .read()
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned()
    }

    /// Number of documents in a collection, tombstones included.
    pub fn collection_len(&self, collection: &str) -> usize {
        self.inner
            .collections
            .read()
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Fails the next client call with the given error.
    pub fn inject_failure(&self, error: SyncError) {
        self.inner.faults.lock().next = Some(error);
    }

    /// Lets `successes` commits through, then fails the next one.
    pub fn fail_commit_after(&self, successes: usize, error: SyncError) {
        self.inner.faults.lock().commit_after = Some((successes, error));
    }

    fn matches_user(document: &SyncedDocument, user_id: Option<&str>) -> bool {
        match user_id {
            Some(user) => document.user_id.as_deref() == Some(user),
            None => true,
        }
    }
}

#[async_trait]
impl QueryIndexedClient for MemoryQueryClient {
    fn limits(&self) -> StoreLimits {
        *self.inner.limits.read()
    }

    async fn range_query(
        &self,
        collection: &str,
        field: TimestampField,
        lower: Timestamp,
        upper: Timestamp,
        user_id: Option<&str>,
    ) -> SyncResult<Vec<SyncedDocument>> {
        self.inner.faults.lock().take_next()?;

        let collections = self.inner.collections.read();
        let documents = match collections.get(collection) {
            Some(documents) => documents,
            None => return Ok(Vec::new()),
        };

        Ok(documents
            .values()
            .filter(|document| Self::matches_user(document, user_id))
            .filter(|document| {
                document
                    .timestamp(field)
                    .is_some_and(|at| at >= lower && at <= upper)
            })
            .cloned()
            .collect())
    }

    async fn ids_in(
        &self,
        collection: &str,
        ids: &[String],
        user_id: Option<&str>,
    ) -> SyncResult<Vec<String>> {
        self.inner.faults.lock().take_next()?;

        let limits = *self.inner.limits.read();
        if let Some(limit) = limits.ids_per_query {
            if ids.len() > limit {
                return Err(SyncError::storage(format!(
                    "membership query of {} ids exceeds the provider limit of {limit}",
                    ids.len()
                )));
            }
        }

        let collections = self.inner.collections.read();
        let documents = match collections.get(collection) {
            Some(documents) => documents,
            None => return Ok(Vec::new()),
        };

        Ok(ids
            .iter()
            .filter(|id| {
                documents
                    .get(*id)
                    .is_some_and(|document| Self::matches_user(document, user_id))
            })
            .cloned()
            .collect())
    }

    async fn get(&self, collection: &str, id: &str) -> SyncResult<Option<SyncedDocument>> {
        self.inner.faults.lock().take_next()?;
        Ok(self.document(collection, id))
    }

    async fn commit_atomic(&self, writes: &[StagedWrite]) -> SyncResult<()> {
        {
            let mut faults = self.inner.faults.lock();
            faults.take_next()?;
            faults.take_commit()?;
        }

        let limits = *self.inner.limits.read();
        if let Some(limit) = limits.writes_per_unit {
            if writes.len() > limit {
                return Err(SyncError::storage(format!(
                    "transaction of {} writes exceeds the provider limit of {limit}",
                    writes.len()
                )));
            }
        }

        let mut collections = self.inner.collections.write();

        // Verify every precondition before applying anything, under
        // the same lock: the transactional isolation of the provider.
        for write in writes {
            let head = collections
                .get(&write.collection)
                .and_then(|documents| documents.get(&write.id))
                .map(DocumentHead::of);
            write
                .precondition
                .verify(head.as_ref(), &write.collection, &write.id)?;
        }

        for write in writes {
            let documents = collections.entry(write.collection.clone()).or_default();
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

        Ok(())
    }
}

#[derive(Default)]
struct TreeStoreInner {
    roots: RwLock<BTreeMap<String, TreeSnapshot>>,
    faults: Mutex<Faults>,
}

/// In-memory single-root-tree provider.
#[derive(Clone, Default)]
pub struct MemoryTreeClient {
    inner: Arc<TreeStoreInner>,
}

impl MemoryTreeClient {
    /// Creates an empty store.
    pub fn new() -> Self {
        MemoryTreeClient::default()
    }

    /// Seeds one document under `sync/<user_id>`.
    pub fn seed(&self, user_id: &str, collection: &str, document: SyncedDocument) {
        self.inner
            .roots
            .write()
            .entry(format!("sync/{user_id}"))
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .insert(document.id.clone(), document);
    }

    /// Reads one document under `sync/<user_id>`, if present.
    pub fn document(&self, user_id: &str, collection: &str, id: &str) -> Option<SyncedDocument> {
        self.inner
            .roots
            .read()
            .get(&format!("sync/{user_id}"))
            .and_then(|tree| tree.get(collection))
            .and_then(|documents| documents.get(id))
            .cloned()
    }

    /// Fails the next client call with the given error.
    pub fn inject_failure(&self, error: SyncError) {
        self.inner.faults.lock().next = Some(error);
    }

    fn split_collection_path(path: &str) -> SyncResult<(String, String)> {
        match path.rsplit_once('/') {
            Some((root, collection)) if root.matches('/').count() == 1 => {
                Ok((root.to_string(), collection.to_string()))
            }
            _ => Err(SyncError::storage(format!(
                "malformed collection path {path:?}"
            ))),
        }
    }
}

#[async_trait]
impl TreeClient for MemoryTreeClient {
    async fn read_range(
        &self,
        path: &str,
        field: TimestampField,
        lower: Timestamp,
        upper: Timestamp,
    ) -> SyncResult<Vec<SyncedDocument>> {
        self.inner.faults.lock().take_next()?;

        let (root, collection) = Self::split_collection_path(path)?;
        let roots = self.inner.roots.read();
        let documents = match roots.get(&root).and_then(|tree| tree.get(&collection)) {
            Some(documents) => documents,
            None => return Ok(Vec::new()),
        };

        Ok(documents
            .values()
            .filter(|document| {
                document
                    .timestamp(field)
                    .is_some_and(|at| at >= lower && at <= upper)
            })
            .cloned()
            .collect())
    }

    async fn read_node(&self, path: &str) -> SyncResult<Option<SyncedDocument>> {
        self.inner.faults.lock().take_next()?;

        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() != 4 {
            return Err(SyncError::storage(format!(
                "malformed document path {path:?}"
            )));
        }
        let root = format!("{}/{}", segments[0], segments[1]);

        Ok(self
            .inner
            .roots
            .read()
            .get(&root)
            .and_then(|tree| tree.get(segments[2]))
            .and_then(|documents| documents.get(segments[3]))
            .cloned())
    }

    async fn read_subtree(&self, path: &str) -> SyncResult<TreeSnapshot> {
        self.inner.faults.lock().take_next()?;
        Ok(self.inner.roots.read().get(path).cloned().unwrap_or_default())
    }

    async fn write_subtree(&self, path: &str, tree: TreeSnapshot) -> SyncResult<()> {
        self.inner.faults.lock().take_next()?;
        self.inner.roots.write().insert(path.to_string(), tree);
        Ok(())
    }
}
