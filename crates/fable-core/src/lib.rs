//! fable-core - Sync engine for Fable
//!
//! This crate contains the shared models, the embedded database layer, and
//! the local-first sync engine used by all Fable interfaces: entities are
//! written locally first, queued durably, and reconciled with the remote
//! document store when connectivity allows.

pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;

pub use error::{Error, Result};
pub use models::{EntityId, EntityKind, EntityRecord};
pub use sync::{SyncOrchestrator, SyncStatus, TriggerReason};
