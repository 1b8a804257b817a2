//! Remote document store abstraction.
//!
//! Defines the [`DocumentStore`] trait the synchronization core consumes.
//! The remote store is an opaque collaborator: it accepts writes and
//! pushes full-collection [`Snapshot`]s to subscribers on every change.
//! Concrete implementations include:
//! - [`memory::MemoryStore`] — in-process store for tests and embedding

pub mod memory;

use tokio::sync::mpsc;

use driftchat_model::document::{Fields, Snapshot};

/// Errors that can occur during remote store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The remote store rejected the write.
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// No acknowledgment arrived within the provider deadline.
    ///
    /// The core treats this exactly like a rejected write.
    #[error("store operation timed out")]
    Timeout,

    /// The connection to the store has been closed.
    #[error("store connection closed")]
    Closed,
}

/// Async trait for the remote document store.
///
/// Collections are addressed by slash-separated string paths (for
/// example `messages` or `chats/<id>/messages`). Each document carries
/// a key and a loosely-typed attribute map; decoding into model types
/// is the consumer's job.
///
/// # Contract
///
/// Every snapshot delivered by [`subscribe`](DocumentStore::subscribe)
/// is the complete current set of documents in the collection, ordered
/// by timestamp ascending. Subscribing delivers the current state
/// immediately; reconnecting constructs a fresh subscription with full
/// state, so dropped snapshots are never replayed individually.
pub trait DocumentStore: Send + Sync {
    /// Subscribe to the change feed of a collection.
    ///
    /// The receiver yields a full [`Snapshot`] on every change, starting
    /// with the collection's current contents.
    fn subscribe(&self, collection: &str) -> mpsc::Receiver<Snapshot>;

    /// Create or replace a document.
    fn write(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Merge fields into an existing document.
    fn update(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Delete a document.
    fn delete(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}
