//! Pull window computation.
//!
//! Turns the adapter's raw range-read results into the clean
//! `ChangeSet` handed to the local store: classification, echo
//! suppression and field stripping, per collection.

use crate::adapter::{PullWindow, RawChanges, StorageAdapter, StoreScope};
use crate::config::CollectionPlan;
use crate::error::SyncResult;
use driftsync_protocol::{ChangeSet, CollectionChanges, SessionId, Timestamp};
use futures::future::try_join_all;
use std::collections::BTreeSet;
use tracing::debug;

pub(crate) struct ChangeWindowReader<'a> {
    adapter: &'a dyn StorageAdapter,
    session: &'a SessionId,
    scope: &'a StoreScope,
}

impl<'a> ChangeWindowReader<'a> {
    pub(crate) fn new(
        adapter: &'a dyn StorageAdapter,
        session: &'a SessionId,
        scope: &'a StoreScope,
    ) -> Self {
        ChangeWindowReader {
            adapter,
            session,
            scope,
        }
    }

    /// Reads the window `[since, as_of]` for every planned collection.
    ///
    /// `as_of` must have been captured before this call so documents
    /// written while the queries run fall into the next window instead
    /// of being dropped.
    pub(crate) async fn read(
        &self,
        plans: &[CollectionPlan],
        since: Timestamp,
        as_of: Timestamp,
    ) -> SyncResult<ChangeSet> {
        let window = PullWindow {
            since,
            until: as_of,
        };

        let reads = plans.iter().map(|plan| self.read_collection(plan, window));
        let results = try_join_all(reads).await?;

        let mut changes = ChangeSet::new();
        for (plan, collection_changes) in plans.iter().zip(results) {
            changes.insert(plan.name.clone(), collection_changes);
        }

        debug!(total = changes.total_changes(), "pull window read");
        Ok(changes)
    }

    async fn read_collection(
        &self,
        plan: &CollectionPlan,
        window: PullWindow,
    ) -> SyncResult<CollectionChanges> {
        let raw = self
            .adapter
            .pull_changes(self.scope, &plan.pull_from, window)
            .await?;
        Ok(classify(raw, self.session, &plan.exclusions))
    }
}

/// Classifies one collection's raw window results.
///
/// - A document in both the created and updated results (created and
///   then updated within the window) counts only as created.
/// - Documents written by this session are dropped everywhere: they
///   are this replica's own prior pushes.
/// - Tombstones surface only through the deleted id list; their
///   payload is never reconstructed.
/// - Excluded fields are stripped from every surviving document.
fn classify(
    raw: RawChanges,
    session: &SessionId,
    exclusions: &BTreeSet<String>,
) -> CollectionChanges {
    let created_ids: BTreeSet<String> = raw.created.iter().map(|doc| doc.id.clone()).collect();

    let created = raw
        .created
        .into_iter()
        .filter(|doc| &doc.session_id != session && !doc.is_tombstone())
        .map(|mut doc| {
            doc.strip_fields(exclusions);
            doc
        })
        .collect();

    let updated = raw
        .updated
        .into_iter()
        .filter(|doc| {
            &doc.session_id != session
                && !doc.is_tombstone()
                && !created_ids.contains(&doc.id)
        })
        .map(|mut doc| {
            doc.strip_fields(exclusions);
            doc
        })
        .collect();

    let deleted = raw
        .deleted
        .into_iter()
        .filter(|doc| &doc.session_id != session)
        .map(|doc| doc.id)
        .collect();

    CollectionChanges {
        created,
        updated,
        deleted,
    }
}
