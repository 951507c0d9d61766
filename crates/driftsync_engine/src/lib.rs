//! # Driftsync Engine
//!
//! Reconciliation engine between a local offline-first store and a
//! server-authoritative remote store.
//!
//! This crate provides:
//! - `StorageAdapter`, one capability interface over two remote shapes
//!   (query-indexed collections and a single-root tree)
//! - Pull window computation with echo suppression and field exclusion
//! - Optimistic conflict detection against current remote state
//! - Atomic batched commit respecting provider write limits
//! - `SyncCoordinator`, the round orchestrator and protocol boundary
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** synchronization model:
//! 1. Pull remote changes since the replica's checkpoint (the remote
//!    store is authoritative)
//! 2. Apply remote changes to the local store, advance the checkpoint
//! 3. Validate the local store's pending mutations against current
//!    remote state and push them in one atomic round
//!
//! A round is one call; the engine owns no background tasks, no
//! internal locks over remote state, and no retries. Correctness
//! across concurrent replicas comes from the optimistic timestamp
//! checks plus the remote store's own transactional isolation.
//!
//! ## Key Invariants
//!
//! - A replica never re-ingests its own writes (session echo
//!   suppression)
//! - The checkpoint advances only after a fully applied pull
//! - Deletion is terminal tombstoning, never physical removal
//! - On the atomic commit path, a push round applies entirely or not at
//!   all

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod clock;
mod committer;
mod config;
mod coordinator;
mod error;
mod local;
mod memory;
mod pull;
mod push;
mod query_indexed;
mod tree;

pub use adapter::{
    DocumentHead, DocumentPatch, Precondition, PullWindow, RawChanges, StagedWrite, StorageAdapter,
    StorageKind, StoreLimits, StoreScope, WriteOp,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CollectionOptions, Collections, CommitPolicy, StaticUserId, SyncConfig, UserIdProvider,
};
pub use coordinator::{PullOutcome, SyncCoordinator, SyncStats, SyncSummary};
pub use error::{SyncError, SyncResult};
pub use local::{LocalStore, MemoryLocalStore};
pub use memory::{MemoryQueryClient, MemoryTreeClient};
pub use query_indexed::{QueryIndexedAdapter, QueryIndexedClient};
pub use tree::{TreeAdapter, TreeClient, TreeSnapshot, DEFAULT_USER_ID};
