//! Remote document store interface
//!
//! The remote backend is document-oriented: per entity kind a collection of
//! documents keyed by the entity id. Upserts and deletes are idempotent, which
//! is what makes the queue's at-least-once delivery safe to replay.

mod http;
mod memory;
mod value;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;
pub use value::{document_from_json, document_to_json, Document, Value};

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::models::EntityKind;

/// Boxed future returned by [`RemoteStore`] methods, so a store can travel as
/// a trait object through spawned sync tasks.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A document pulled from the remote store: its identifier plus its fields.
pub type RemoteDocument = (String, Document);

/// The remote store the sync engine pushes to and pulls from.
pub trait RemoteStore: Send + Sync {
    /// Idempotently write a document (create or replace)
    fn upsert<'a>(
        &'a self,
        kind: EntityKind,
        id: &'a str,
        doc: &'a Document,
    ) -> RemoteFuture<'a, ()>;

    /// Idempotently delete a document; deleting a missing document succeeds
    fn delete<'a>(&'a self, kind: EntityKind, id: &'a str) -> RemoteFuture<'a, ()>;

    /// Every document of `kind` the user owns (full pull)
    fn list<'a>(&'a self, kind: EntityKind, user_id: &'a str)
        -> RemoteFuture<'a, Vec<RemoteDocument>>;

    /// Documents of `kind` changed after `since_ms` (incremental pull)
    fn list_since<'a>(
        &'a self,
        kind: EntityKind,
        user_id: &'a str,
        since_ms: i64,
    ) -> RemoteFuture<'a, Vec<RemoteDocument>>;
}
