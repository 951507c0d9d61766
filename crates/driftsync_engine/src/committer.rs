//! Batched commit against provider write limits.

use crate::adapter::{StagedWrite, StorageAdapter, StoreScope};
use crate::config::CommitPolicy;
use crate::error::{SyncError, SyncResult};
use tracing::{debug, info, warn};

/// Commits a staged round through the adapter, respecting its
/// writes-per-unit limit.
///
/// Under [`CommitPolicy::Atomic`] an oversized round is rejected
/// outright, keeping the all-or-nothing guarantee. Under
/// [`CommitPolicy::Chunked`] the round is split into sequential units
/// in staging order; a failed unit aborts the remainder but earlier
/// units stay committed, so atomicity above the limit degrades to
/// per-unit.
pub(crate) struct BatchCommitter<'a> {
    adapter: &'a dyn StorageAdapter,
    policy: CommitPolicy,
}

impl<'a> BatchCommitter<'a> {
    pub(crate) fn new(adapter: &'a dyn StorageAdapter, policy: CommitPolicy) -> Self {
        BatchCommitter { adapter, policy }
    }

    pub(crate) async fn commit(
        &self,
        scope: &StoreScope,
        writes: Vec<StagedWrite>,
    ) -> SyncResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let limit = match self.adapter.limits().writes_per_unit {
            Some(limit) if writes.len() > limit => limit,
            _ => {
                debug!(writes = writes.len(), "committing one unit");
                return self.adapter.commit_unit(scope, &writes).await;
            }
        };

        match self.policy {
            CommitPolicy::Atomic => Err(SyncError::BatchLimitExceeded {
                staged: writes.len(),
                limit,
            }),
            CommitPolicy::Chunked => {
                warn!(
                    staged = writes.len(),
                    limit,
                    "round exceeds the provider's atomic unit; committing sequential \
                     units, earlier units stay applied if a later one fails"
                );

                let total = writes.len().div_ceil(limit);
                for (index, unit) in writes.chunks(limit).enumerate() {
                    info!(unit = index + 1, total, writes = unit.len(), "committing unit");
                    self.adapter.commit_unit(scope, unit).await?;
                }
                Ok(())
            }
        }
    }
}
