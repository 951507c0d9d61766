//! # Driftsync Protocol
//!
//! Data model for the driftsync replication protocol.
//!
//! This crate provides:
//! - `Timestamp` for checkpoints, pull windows and conflict detection
//! - `SessionId` for echo suppression
//! - `SyncedDocument`, the remote wire shape of a replicated record
//! - `ChangeSet` and `CollectionChanges` describing one sync round
//!
//! This is a pure data-model crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changeset;
mod document;
mod session;
mod timestamp;

pub use changeset::{ChangeSet, CollectionChanges};
pub use document::{SyncedDocument, TimestampField, RESERVED_FIELDS};
pub use session::SessionId;
pub use timestamp::Timestamp;
