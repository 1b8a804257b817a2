//! In-process document store for tests and embedding.
//!
//! Holds collections in memory and pushes a full, timestamp-ordered
//! snapshot to every subscriber after each mutation — the same
//! replace-style contract a real change feed provides. Test controls:
//! [`hold_writes`](MemoryStore::hold_writes) parks writers until
//! released (to observe optimistic state before confirmation) and
//! [`fail_writes`](MemoryStore::fail_writes) forces rejections (to
//! exercise the failed-send rollback).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use driftchat_model::document::{Document, FieldValue, Fields, Snapshot};
use driftchat_model::message::Timestamp;

use super::{DocumentStore, StoreError};

/// Ordering key for snapshot delivery: the document's time field in any
/// of the encodings writers produce. Documents without one sort first.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sort_key(fields: &Fields) -> Timestamp {
    let value = fields
        .get("timestamp")
        .or_else(|| fields.get("lastMessageTime"));
    match value {
        Some(FieldValue::Time(ts)) => *ts,
        Some(FieldValue::Int(secs)) => {
            Timestamp::from_millis(u64::try_from(*secs).unwrap_or_default().saturating_mul(1000))
        }
        Some(FieldValue::Double(secs)) if secs.is_finite() && *secs >= 0.0 => {
            Timestamp::from_millis((secs * 1000.0) as u64)
        }
        _ => Timestamp::from_millis(0),
    }
}

/// Channel capacity for each subscriber.
const SUBSCRIBER_BUFFER: usize = 64;

type Collection = BTreeMap<String, Fields>;

/// In-memory [`DocumentStore`] implementation.
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
    subscribers: Mutex<HashMap<String, Vec<watch::Sender<Snapshot>>>>,
    fail: AtomicBool,
    gate: watch::Sender<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            collections: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            gate,
        }
    }

    /// Parks all subsequent writes until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        // send_replace: the gate must flip even with no writer parked yet.
        self.gate.send_replace(false);
    }

    /// Releases writes parked by [`hold_writes`](Self::hold_writes).
    pub fn release_writes(&self) {
        self.gate.send_replace(true);
    }

    /// Makes subsequent writes fail with [`StoreError::WriteRejected`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of documents currently in `collection`.
    #[must_use]
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    async fn pass_gate(&self) -> Result<(), StoreError> {
        let mut rx = self.gate.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return Err(StoreError::Closed);
            }
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected("store is in failure mode".into()));
        }
        Ok(())
    }

    /// Builds the current snapshot of a collection, ordered by timestamp
    /// ascending with the document key as tie-break.
    fn snapshot_of(&self, collection: &str) -> Snapshot {
        let collections = self.collections.lock();
        let mut documents: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        drop(collections);

        documents.sort_by(|a, b| {
            sort_key(&a.fields)
                .cmp(&sort_key(&b.fields))
                .then_with(|| a.id.cmp(&b.id))
        });
        Snapshot { documents }
    }

    fn broadcast(&self, collection: &str) {
        let snapshot = self.snapshot_of(collection);
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(collection) else {
            return;
        };
        senders.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

impl DocumentStore for MemoryStore {
    /// Each subscriber gets a forwarding task fed from a `watch` of the
    /// latest snapshot, so a consumer that falls behind coalesces
    /// intermediate states instead of losing the newest one: once it
    /// drains, the next delivery is the current state, with no further
    /// mutation required.
    fn subscribe(&self, collection: &str) -> mpsc::Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (latest_tx, mut latest_rx) = watch::channel(self.snapshot_of(collection));
        self.subscribers
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(latest_tx);

        tokio::spawn(async move {
            loop {
                let snapshot = latest_rx.borrow_and_update().clone();
                if tx.send(snapshot).await.is_err() {
                    break;
                }
                if latest_rx.changed().await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    async fn write(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.pass_gate().await?;
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(doc_id.to_string(), fields);
        self.broadcast(collection);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.pass_gate().await?;
        {
            let mut collections = self.collections.lock();
            let Some(existing) = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(doc_id))
            else {
                return Err(StoreError::WriteRejected(format!(
                    "no document {collection}/{doc_id}"
                )));
            };
            existing.extend(fields);
        }
        self.broadcast(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, doc_id: &str) -> Result<(), StoreError> {
        self.pass_gate().await?;
        {
            let mut collections = self.collections.lock();
            if let Some(docs) = collections.get_mut(collection) {
                docs.remove(doc_id);
            }
        }
        self.broadcast(collection);
        Ok(())
    }
}
