//! Engine configuration.

use crate::adapter::StorageKind;
use crate::error::SyncResult;
use async_trait::async_trait;
use driftsync_protocol::RESERVED_FIELDS;
use std::collections::{BTreeMap, BTreeSet};

/// Resolves the id of the authenticated user before a round starts.
///
/// Required when [`SyncConfig::authenticated`] is set; a missing
/// provider or an empty result is a fatal
/// [`InvalidUserId`](crate::SyncError::InvalidUserId) before any I/O.
#[async_trait]
pub trait UserIdProvider: Send + Sync {
    /// The current user's id.
    async fn user_id(&self) -> SyncResult<String>;
}

/// A fixed user id.
#[derive(Debug, Clone)]
pub struct StaticUserId(String);

impl StaticUserId {
    /// Wraps a known user id.
    pub fn new(user_id: impl Into<String>) -> Self {
        StaticUserId(user_id.into())
    }
}

#[async_trait]
impl UserIdProvider for StaticUserId {
    async fn user_id(&self) -> SyncResult<String> {
        Ok(self.0.clone())
    }
}

/// Per-collection sync options.
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Fields that never cross the sync boundary, in either direction.
    pub excluded_fields: Vec<String>,
    /// Remote collection to pull from, when it differs from the local
    /// name.
    pub pull_collection: Option<String>,
    /// Remote collection to push into, when it differs from the local
    /// name.
    pub push_collection: Option<String>,
}

impl CollectionOptions {
    /// Creates options with no exclusions and default remote names.
    pub fn new() -> Self {
        CollectionOptions::default()
    }

    /// Sets the excluded fields.
    pub fn with_excluded_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the remote collection to pull from.
    pub fn with_pull_collection(mut self, collection: impl Into<String>) -> Self {
        self.pull_collection = Some(collection.into());
        self
    }

    /// Sets the remote collection to push into.
    pub fn with_push_collection(mut self, collection: impl Into<String>) -> Self {
        self.push_collection = Some(collection.into());
        self
    }
}

/// The collections a replica syncs.
///
/// Either a bare list of names or a map carrying per-collection
/// options. Normalized once into uniform plans; the engine never
/// branches on which variant was supplied.
#[derive(Debug, Clone)]
pub enum Collections {
    /// Collection names with default options.
    Names(Vec<String>),
    /// Collection names with explicit options.
    Configured(BTreeMap<String, CollectionOptions>),
}

impl Collections {
    /// Builds the bare-names variant.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Collections::Names(names.into_iter().map(Into::into).collect())
    }

    /// Builds the configured variant.
    pub fn configured<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, CollectionOptions)>,
        S: Into<String>,
    {
        Collections::Configured(
            entries
                .into_iter()
                .map(|(name, options)| (name.into(), options))
                .collect(),
        )
    }
}

/// How a round larger than the provider's atomic unit is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Reject oversized rounds with
    /// [`BatchLimitExceeded`](crate::SyncError::BatchLimitExceeded).
    /// The round applies entirely or not at all.
    #[default]
    Atomic,
    /// Split oversized rounds into sequential units of at most the
    /// provider limit. Earlier units stay committed if a later one
    /// fails, so atomicity degrades to per-unit above the limit.
    Chunked,
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Collections to sync.
    pub collections: Collections,
    /// Remote storage shape the adapter must implement.
    pub storage: StorageKind,
    /// Whether rounds run against a per-user slice of the remote
    /// store.
    pub authenticated: bool,
    /// Fields excluded from every collection, unioned with the
    /// protocol-reserved fields and per-collection exclusions.
    pub excluded_fields: Vec<String>,
    /// Oversized-round commit behavior.
    pub commit_policy: CommitPolicy,
}

impl SyncConfig {
    /// Creates a configuration for the given collections and storage
    /// shape.
    pub fn new(collections: Collections, storage: StorageKind) -> Self {
        SyncConfig {
            collections,
            storage,
            authenticated: false,
            excluded_fields: Vec::new(),
            commit_policy: CommitPolicy::default(),
        }
    }

    /// Requires an authenticated user for every round.
    pub fn with_authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    /// Sets globally excluded fields.
    pub fn with_excluded_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the oversized-round commit behavior.
    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }

    /// Normalizes the configuration into uniform per-collection plans.
    pub(crate) fn plans(&self) -> Vec<CollectionPlan> {
        let default_options = CollectionOptions::default();
        let entries: Vec<(&String, &CollectionOptions)> = match &self.collections {
            Collections::Names(names) => {
                names.iter().map(|name| (name, &default_options)).collect()
            }
            Collections::Configured(map) => map.iter().collect(),
        };

        entries
            .into_iter()
            .map(|(name, options)| {
                let mut exclusions: BTreeSet<String> =
                    RESERVED_FIELDS.iter().map(|field| field.to_string()).collect();
                exclusions.extend(self.excluded_fields.iter().cloned());
                exclusions.extend(options.excluded_fields.iter().cloned());

                CollectionPlan {
                    name: name.clone(),
                    pull_from: options.pull_collection.clone().unwrap_or_else(|| name.clone()),
                    push_to: options.push_collection.clone().unwrap_or_else(|| name.clone()),
                    exclusions,
                }
            })
            .collect()
    }
}

/// One collection's normalized sync plan for a round.
#[derive(Debug, Clone)]
pub(crate) struct CollectionPlan {
    /// Local collection name.
    pub name: String,
    /// Remote collection pulled from.
    pub pull_from: String,
    /// Remote collection pushed into.
    pub push_to: String,
    /// Merged field exclusions: reserved, global and per-collection.
    pub exclusions: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_variant_gets_default_plans() {
        let config = SyncConfig::new(
            Collections::names(["todos", "users"]),
            StorageKind::QueryIndexed,
        );
        let plans = config.plans();

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].name, "todos");
        assert_eq!(plans[0].pull_from, "todos");
        assert_eq!(plans[0].push_to, "todos");
        assert!(plans[0].exclusions.contains("_status"));
        assert!(plans[0].exclusions.contains("_changed"));
    }

    #[test]
    fn exclusions_union_reserved_global_and_per_collection() {
        let config = SyncConfig::new(
            Collections::configured([(
                "todos",
                CollectionOptions::new().with_excluded_fields(["color"]),
            )]),
            StorageKind::QueryIndexed,
        )
        .with_excluded_fields(["internal_note"]);

        let plans = config.plans();
        let exclusions = &plans[0].exclusions;
        assert!(exclusions.contains("_status"));
        assert!(exclusions.contains("_changed"));
        assert!(exclusions.contains("internal_note"));
        assert!(exclusions.contains("color"));
    }

    #[test]
    fn remote_name_overrides_apply() {
        let config = SyncConfig::new(
            Collections::configured([(
                "todos",
                CollectionOptions::new()
                    .with_pull_collection("shared_todos")
                    .with_push_collection("device_todos"),
            )]),
            StorageKind::Tree,
        );

        let plans = config.plans();
        assert_eq!(plans[0].pull_from, "shared_todos");
        assert_eq!(plans[0].push_to, "device_todos");
    }

    #[test]
    fn builder_round_trip() {
        let config = SyncConfig::new(Collections::names(["todos"]), StorageKind::Tree)
            .with_authenticated(true)
            .with_commit_policy(CommitPolicy::Chunked);

        assert!(config.authenticated);
        assert_eq!(config.commit_policy, CommitPolicy::Chunked);
        assert_eq!(config.storage, StorageKind::Tree);
    }
}
