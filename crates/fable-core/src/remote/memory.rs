//! In-process remote store
//!
//! Backs the sync engine in tests and local development. Supports fault
//! injection so push-failure and pull-failure paths can be exercised.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::EntityKind;

use super::{Document, RemoteDocument, RemoteFuture, RemoteStore, Value};

#[derive(Default)]
struct State {
    docs: HashMap<(EntityKind, String), Document>,
    fail_next_writes: u32,
    fail_next_reads: u32,
    write_count: u64,
}

/// In-memory [`RemoteStore`] implementation
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
}

impl MemoryRemoteStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upserts/deletes fail with a simulated remote error
    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().expect("state lock").fail_next_writes = n;
    }

    /// Make the next `n` list calls fail with a simulated remote error
    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().expect("state lock").fail_next_reads = n;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.state.lock().expect("state lock").write_count
    }

    /// Number of documents currently stored for `kind`
    pub fn doc_count(&self, kind: EntityKind) -> usize {
        self.state
            .lock()
            .expect("state lock")
            .docs
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Fetch one document (test inspection)
    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Document> {
        self.state
            .lock()
            .expect("state lock")
            .docs
            .get(&(kind, id.to_string()))
            .cloned()
    }

    /// Seed a document directly, bypassing fault injection (test setup)
    pub fn seed(&self, kind: EntityKind, id: &str, doc: Document) {
        self.state
            .lock()
            .expect("state lock")
            .docs
            .insert((kind, id.to_string()), doc);
    }

    fn take_write_fault(state: &mut State) -> Result<()> {
        if state.fail_next_writes > 0 {
            state.fail_next_writes -= 1;
            return Err(Error::Remote("simulated write failure".to_string()));
        }
        Ok(())
    }

    fn owned_by(doc: &Document, user_id: &str) -> bool {
        doc.get("userId").and_then(Value::as_str) == Some(user_id)
    }

    fn updated_at(doc: &Document) -> i64 {
        doc.get("updatedAt").and_then(Value::as_i64).unwrap_or(0)
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn upsert<'a>(
        &'a self,
        kind: EntityKind,
        id: &'a str,
        doc: &'a Document,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("state lock");
            Self::take_write_fault(&mut state)?;
            state.docs.insert((kind, id.to_string()), doc.clone());
            state.write_count += 1;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, kind: EntityKind, id: &'a str) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("state lock");
            Self::take_write_fault(&mut state)?;
            // Deleting a missing document is still success (idempotent)
            state.docs.remove(&(kind, id.to_string()));
            state.write_count += 1;
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        kind: EntityKind,
        user_id: &'a str,
    ) -> RemoteFuture<'a, Vec<RemoteDocument>> {
        Box::pin(async move { self.list_since(kind, user_id, i64::MIN).await })
    }

    fn list_since<'a>(
        &'a self,
        kind: EntityKind,
        user_id: &'a str,
        since_ms: i64,
    ) -> RemoteFuture<'a, Vec<RemoteDocument>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("state lock");
            if state.fail_next_reads > 0 {
                state.fail_next_reads -= 1;
                return Err(Error::Remote("simulated read failure".to_string()));
            }

            let mut docs: Vec<RemoteDocument> = state
                .docs
                .iter()
                .filter(|((k, _), doc)| {
                    *k == kind && Self::owned_by(doc, user_id) && Self::updated_at(doc) > since_ms
                })
                .map(|((_, id), doc)| (id.clone(), doc.clone()))
                .collect();
            docs.sort_by_key(|(_, doc)| Self::updated_at(doc));
            Ok(docs)
        })
    }
}
