//! Integration tests for exactly-once surfacing of inbound messages.
//!
//! The feed raises a one-shot signal when reconciliation discovers a
//! recent inbound message, keeps it latched until acknowledged, and
//! re-arms after the acknowledgement. Also pins the flat feed's
//! historical sender-classification behavior.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use driftchat::store::memory::MemoryStore;
use driftchat::store::DocumentStore;
use driftchat::sync::feed::{FeedView, MessageFeed, FLAT_FEED_COLLECTION, FLAT_FEED_SENDER};
use driftchat::sync::NEW_MESSAGE_WINDOW_MS;
use driftchat_model::message::{ChatId, Message, MessageStatus, Timestamp, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Waits until the published view satisfies `predicate`, or panics after
/// two seconds.
async fn wait_for_view<F>(rx: &mut watch::Receiver<FeedView>, mut predicate: F) -> FeedView
where
    F: FnMut(&FeedView) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let view = rx.borrow().clone();
            if predicate(&view) {
                return view;
            }
            rx.changed().await.expect("feed view channel closed");
        }
    })
    .await
    .expect("timed out waiting for feed view")
}

/// Writes a message document into the flat feed as `sender`.
async fn write_as(store: &MemoryStore, sender: &str, text: &str, ts: Timestamp) -> Message {
    let mut message = Message::outgoing(text, UserId::new(sender), ChatId::default());
    message.timestamp = ts;
    message.status = MessageStatus::Delivered;
    store
        .write(FLAT_FEED_COLLECTION, message.id.as_str(), message.to_fields())
        .await
        .expect("remote write failed");
    message
}

// ===========================================================================
// Raising the flag
// ===========================================================================

/// A recent inbound message raises the flag and is surfaced as the
/// flagged message.
#[tokio::test]
async fn recent_inbound_message_raises_flag() {
    let store = Arc::new(MemoryStore::new());
    let feed = MessageFeed::flat(store.clone());
    let mut views = feed.subscribe();

    let inbound = write_as(&store, "someoneElse", "hey!", Timestamp::now()).await;

    let view = wait_for_view(&mut views, |v| v.has_new_message).await;
    assert_eq!(view.flagged.as_ref().map(|m| m.id.clone()), Some(inbound.id));
}

/// The local user's own sends never raise the flag.
#[tokio::test]
async fn own_messages_do_not_raise_flag() {
    let store = Arc::new(MemoryStore::new());
    let feed = MessageFeed::flat(store.clone());
    let mut views = feed.subscribe();

    feed.send_message("talking to myself").await.expect("send failed");
    wait_for_view(&mut views, |v| {
        v.messages.iter().any(|m| m.status == MessageStatus::Delivered)
    })
    .await;

    let view = feed.view();
    assert!(!view.has_new_message);
    assert!(view.flagged.is_none());
}

/// Inbound messages older than the recency window arrive silently.
#[tokio::test]
async fn stale_inbound_message_does_not_raise_flag() {
    let store = Arc::new(MemoryStore::new());
    let feed = MessageFeed::flat(store.clone());
    let mut views = feed.subscribe();

    let stale = Timestamp::from_millis(
        Timestamp::now()
            .as_millis()
            .saturating_sub(NEW_MESSAGE_WINDOW_MS * 2),
    );
    write_as(&store, "someoneElse", "from last night", stale).await;

    let view = wait_for_view(&mut views, |v| v.messages.len() == 1).await;
    assert!(!view.has_new_message);
    assert!(view.flagged.is_none());
}

// ===========================================================================
// Latching and re-arming
// ===========================================================================

/// A raised flag is not replaced by later arrivals until acknowledged;
/// clearing re-arms detection for the next inbound message.
#[tokio::test]
async fn flag_latches_until_cleared_then_rearms() {
    let store = Arc::new(MemoryStore::new());
    let feed = MessageFeed::flat(store.clone());
    let mut views = feed.subscribe();

    let first = write_as(&store, "someoneElse", "one", Timestamp::now()).await;
    wait_for_view(&mut views, |v| v.has_new_message).await;

    // A second arrival while the flag is up must not displace it.
    write_as(&store, "someoneElse", "two", Timestamp::now()).await;
    let view = wait_for_view(&mut views, |v| v.messages.len() == 2).await;
    assert!(view.has_new_message);
    assert_eq!(view.flagged.as_ref().map(|m| m.id.clone()), Some(first.id));

    feed.clear_flag().await;
    let view = wait_for_view(&mut views, |v| !v.has_new_message).await;
    assert!(view.flagged.is_none());

    let third = write_as(&store, "someoneElse", "three", Timestamp::now()).await;
    let view = wait_for_view(&mut views, |v| v.has_new_message).await;
    assert_eq!(view.flagged.as_ref().map(|m| m.id.clone()), Some(third.id));
}

/// Re-delivering an already-seen snapshot raises nothing: the flag fires
/// at most once per message.
#[tokio::test]
async fn replayed_snapshot_does_not_raise_again() {
    let store = Arc::new(MemoryStore::new());
    let feed = MessageFeed::flat(store.clone());
    let mut views = feed.subscribe();

    let inbound = write_as(&store, "someoneElse", "hello", Timestamp::now()).await;
    wait_for_view(&mut views, |v| v.has_new_message).await;
    feed.clear_flag().await;
    wait_for_view(&mut views, |v| !v.has_new_message).await;

    // Touch an unrelated field so the store re-broadcasts the same set.
    store
        .update(
            FLAT_FEED_COLLECTION,
            inbound.id.as_str(),
            driftchat_model::document::Fields::new(),
        )
        .await
        .expect("update failed");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = feed.view();
    assert!(!view.has_new_message);
    assert!(view.flagged.is_none());
}

// ===========================================================================
// Historical flat-feed classification
// ===========================================================================

/// The flat feed classifies by the fixed placeholder sender, not a real
/// account id: a message authored under any other id counts as inbound,
/// and one authored under the placeholder never does. Long-standing
/// behavior, kept as-is; the multi-chat index uses real ids.
#[tokio::test]
async fn flat_feed_received_classification_uses_placeholder() {
    let store = Arc::new(MemoryStore::new());
    let feed = MessageFeed::flat(store.clone());
    let mut views = feed.subscribe();

    // Authored under the placeholder: treated as the local user's own.
    write_as(&store, FLAT_FEED_SENDER, "mine", Timestamp::now()).await;
    wait_for_view(&mut views, |v| v.messages.len() == 1).await;
    assert!(!feed.view().has_new_message);

    // Any other id, even a real-looking account, counts as inbound.
    let other = write_as(&store, "alice@example.com", "theirs", Timestamp::now()).await;
    let view = wait_for_view(&mut views, |v| v.has_new_message).await;
    assert_eq!(view.flagged.as_ref().map(|m| m.id.clone()), Some(other.id));
}
