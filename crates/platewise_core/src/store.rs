//! Document Store Client boundary.
//!
//! The replication engine is an external collaborator. Platewise only needs
//! to read a document's latest snapshot, watch it for new snapshots, and
//! occasionally write one. Merge semantics stay inside the engine.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::doc_ref::DocRef;

/// Lazy, unbounded sequence of document snapshots.
///
/// Dropping the stream ends the subscription; calling
/// [`DocumentStore::subscribe`] again restarts it.
pub type SnapshotStream = BoxStream<'static, Vec<u8>>;

/// Errors raised by a [`DocumentStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    /// Local I/O failed while reading a replica.
    #[error("document store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Typed accessor to the replication engine.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Latest snapshot of `id`, or `None` if it has not replicated here yet.
    async fn get(&self, id: &DocRef) -> Result<Option<Vec<u8>>, StoreError>;

    /// Snapshots of `id` as they arrive. Yields the current snapshot first
    /// when one exists.
    fn subscribe(&self, id: &DocRef) -> SnapshotStream;

    /// Replace the snapshot of `id`.
    async fn put(&self, id: &DocRef, bytes: Vec<u8>) -> Result<(), StoreError>;
}

/// In-process [`DocumentStore`] used by tests and local tooling.
///
/// Counts every `get` so callers can assert that no fetch happened.
pub struct MemoryStore {
    docs: RwLock<HashMap<DocRef, Vec<u8>>>,
    updates: broadcast::Sender<(DocRef, Vec<u8>)>,
    fetches: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            docs: RwLock::new(HashMap::new()),
            updates,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Insert a snapshot without going through the async interface.
    pub fn insert(&self, id: &DocRef, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), bytes.clone());
        // No receivers is fine.
        let _ = self.updates.send((id.clone(), bytes));
    }

    /// Number of `get` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &DocRef) -> Result<Option<Vec<u8>>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn subscribe(&self, id: &DocRef) -> SnapshotStream {
        // Subscribe before reading the current value so nothing written in
        // between is missed.
        let rx = self.updates.subscribe();
        let current = self
            .docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        let id = id.clone();

        let updates = futures::stream::unfold(rx, move |mut rx| {
            let id = id.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok((doc, bytes)) if doc == id => return Some((bytes, rx)),
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        futures::stream::iter(current).chain(updates).boxed()
    }

    async fn put(&self, id: &DocRef, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.insert(id, bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_counts_fetches() {
        let store = MemoryStore::new();
        let id = DocRef::new("doc:a").unwrap();
        assert_eq!(store.get(&id).await.unwrap(), None);
        store.put(&id, b"x".to_vec()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn subscribe_yields_current_then_updates_for_same_doc_only() {
        let store = MemoryStore::new();
        let a = DocRef::new("doc:a").unwrap();
        let b = DocRef::new("doc:b").unwrap();
        store.insert(&a, b"v1".to_vec());

        let mut stream = store.subscribe(&a);
        assert_eq!(stream.next().await, Some(b"v1".to_vec()));

        store.insert(&b, b"other".to_vec());
        store.insert(&a, b"v2".to_vec());
        assert_eq!(stream.next().await, Some(b"v2".to_vec()));
    }
}
