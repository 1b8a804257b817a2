//! Integration tests for the multi-conversation index.
//!
//! Exercises the conversation list (participant filter, last-activity
//! ordering, optimistic creation) and the per-conversation feeds it
//! opens (summary write-back, read receipts, image sends).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use driftchat::auth::StaticAuth;
use driftchat::chats::{ChatIndex, ChatListView, CHATS_COLLECTION};
use driftchat::media::MemoryMedia;
use driftchat::store::memory::MemoryStore;
use driftchat::store::DocumentStore;
use driftchat::sync::feed::{FeedView, SendError};
use driftchat_model::chat::Chat;
use driftchat_model::document::{FieldValue, Fields};
use driftchat_model::message::{ChatId, Message, MessageKind, MessageStatus, Timestamp, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const LOCAL: &str = "alice";

fn new_index(store: &Arc<MemoryStore>, media: &Arc<MemoryMedia>) -> ChatIndex<MemoryStore, MemoryMedia> {
    ChatIndex::new(store.clone(), media.clone(), &StaticAuth::signed_in(LOCAL))
}

/// Waits until the published conversation list satisfies `predicate`.
async fn wait_for_list<F>(rx: &mut watch::Receiver<ChatListView>, mut predicate: F) -> ChatListView
where
    F: FnMut(&ChatListView) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let view = rx.borrow().clone();
            if predicate(&view) {
                return view;
            }
            rx.changed().await.expect("chat list channel closed");
        }
    })
    .await
    .expect("timed out waiting for chat list")
}

/// Waits until a conversation feed's view satisfies `predicate`.
async fn wait_for_feed<F>(rx: &mut watch::Receiver<FeedView>, mut predicate: F) -> FeedView
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

/// Writes a conversation summary document directly into the store.
async fn seed_chat(store: &MemoryStore, participants: &[&str], last_time: u64) -> Chat {
    let mut chat = Chat::new(
        ChatId::new(),
        participants.iter().map(|p| UserId::new(*p)).collect(),
        participants.len() > 2,
        None,
    );
    chat.last_message_time = Timestamp::from_millis(last_time);
    store
        .write(CHATS_COLLECTION, chat.id.as_str(), chat.to_fields())
        .await
        .expect("seed write failed");
    chat
}

// ===========================================================================
// Conversation list
// ===========================================================================

/// Only conversations the local user participates in are listed, most
/// recent activity first.
#[tokio::test]
async fn list_filters_by_participant_and_orders_by_activity() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let older = seed_chat(&store, &[LOCAL, "bob"], 1_000).await;
    let newer = seed_chat(&store, &[LOCAL, "carol"], 2_000).await;
    seed_chat(&store, &["bob", "carol"], 3_000).await; // not ours

    let index = new_index(&store, &media);
    let mut lists = index.subscribe();

    let view = wait_for_list(&mut lists, |v| v.chats.len() == 2).await;
    assert_eq!(view.chats[0].id, newer.id);
    assert_eq!(view.chats[1].id, older.id);
}

/// A summary document that fails to decode is dropped without taking
/// the rest of the list down.
#[tokio::test]
async fn undecodable_chat_document_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let good = seed_chat(&store, &[LOCAL, "bob"], 1_000).await;

    // Missing the required participants field.
    let mut fields = Fields::new();
    fields.insert("lastMessage".into(), FieldValue::Str("orphan".into()));
    store
        .write(CHATS_COLLECTION, "broken", fields)
        .await
        .expect("seed write failed");

    let index = new_index(&store, &media);
    let mut lists = index.subscribe();

    let view = wait_for_list(&mut lists, |v| v.chats.len() == 1).await;
    assert_eq!(view.chats[0].id, good.id);
}

/// A created conversation is visible immediately and survives the
/// confirming snapshot.
#[tokio::test]
async fn created_chat_is_visible_before_and_after_confirmation() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    store.hold_writes();
    let index = new_index(&store, &media);
    let mut lists = index.subscribe();

    let chat_id = index
        .create_chat(vec![UserId::new("bob")], false, None)
        .await
        .expect("create_chat returned None");

    // Optimistically listed while the write is parked.
    let view = index.view();
    assert_eq!(view.chats.len(), 1);
    assert_eq!(view.chats[0].id, chat_id);
    assert_eq!(store.document_count(CHATS_COLLECTION), 0);

    store.release_writes();
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.document_count(CHATS_COLLECTION) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("write never confirmed");

    let view = wait_for_list(&mut lists, |v| {
        v.chats.len() == 1 && v.last_error.is_none()
    })
    .await;
    assert_eq!(view.chats[0].id, chat_id);
}

/// An unconfirmed creation survives snapshots that do not carry it:
/// the list replacement must not erase the optimistic entry while its
/// write is still in flight.
#[tokio::test]
async fn optimistic_creation_survives_snapshot_replacement() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let index = new_index(&store, &media);
    let mut lists = index.subscribe();

    // The creation write is rejected, so the feed never carries the chat.
    store.fail_writes(true);
    let chat_id = index
        .create_chat(vec![UserId::new("bob")], false, None)
        .await
        .expect("create_chat returned None");
    wait_for_list(&mut lists, |v| v.last_error.is_some()).await;

    // A later snapshot (another conversation arriving) replaces the
    // confirmed list; the unconfirmed entry must still be there.
    store.fail_writes(false);
    let other = seed_chat(&store, &[LOCAL, "carol"], 5_000).await;

    let view = wait_for_list(&mut lists, |v| v.chats.len() == 2).await;
    assert_eq!(view.chats[0].id, chat_id, "unconfirmed creation stays first");
    assert_eq!(view.chats[1].id, other.id);
}

/// A rejected creation surfaces the error; the optimistic entry is not
/// rolled back.
#[tokio::test]
async fn rejected_creation_reports_error_without_rollback() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let index = new_index(&store, &media);
    let mut lists = index.subscribe();

    store.fail_writes(true);
    let chat_id = index
        .create_chat(vec![UserId::new("bob")], false, None)
        .await
        .expect("create_chat returned None");

    let view = wait_for_list(&mut lists, |v| v.last_error.is_some()).await;
    assert_eq!(view.chats.len(), 1);
    assert_eq!(view.chats[0].id, chat_id);
}

// ===========================================================================
// Per-conversation feeds
// ===========================================================================

/// Sending through a conversation updates its summary document once the
/// write confirms.
#[tokio::test]
async fn accepted_send_refreshes_chat_summary() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let index = new_index(&store, &media);
    let mut lists = index.subscribe();

    let chat_id = index
        .create_chat(vec![UserId::new("bob")], false, None)
        .await
        .expect("create_chat returned None");
    // The summary write-back needs the chat document in place.
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.document_count(CHATS_COLLECTION) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("chat document never written");

    index
        .send_message(&chat_id, "see you at 8")
        .await
        .expect("send failed")
        .expect("send was a no-op");

    let view = wait_for_list(&mut lists, |v| {
        v.chats
            .first()
            .is_some_and(|c| c.last_message_text == "see you at 8")
    })
    .await;
    assert_eq!(
        view.chats[0].last_message_sender_id,
        Some(UserId::new(LOCAL))
    );
}

/// An inbound delivered message is advanced to `read` while its
/// conversation is open, and the receipt is written back to the store.
#[tokio::test]
async fn open_conversation_issues_read_receipts() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let chat = seed_chat(&store, &[LOCAL, "bob"], 1_000).await;
    let index = new_index(&store, &media);

    let handle = index.open_chat(&chat.id).expect("open_chat returned None");
    let mut views = handle.subscribe();

    let mut inbound = Message::outgoing("read me", UserId::new("bob"), chat.id.clone());
    inbound.status = MessageStatus::Delivered;
    let collection = format!("{CHATS_COLLECTION}/{}/messages", chat.id);
    store
        .write(&collection, inbound.id.as_str(), inbound.to_fields())
        .await
        .expect("seed write failed");

    let view = wait_for_feed(&mut views, |v| {
        v.messages
            .iter()
            .any(|m| m.id == inbound.id && m.status == MessageStatus::Read)
    })
    .await;
    assert_eq!(view.messages.len(), 1);

    // The receipt reaches the store, not just the local view.
    let mut raw = store.subscribe(&collection);
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = raw.recv().await.expect("store snapshot");
            let read = snapshot.documents.first().and_then(|d| d.fields.get("status"))
                == Some(&FieldValue::Str("read".into()));
            if read {
                break;
            }
        }
    })
    .await
    .expect("read receipt never reached the store");
}

/// An image send uploads first, then sends a message referencing the
/// returned URL.
#[tokio::test]
async fn image_send_uploads_then_references_url() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let chat = seed_chat(&store, &[LOCAL, "bob"], 1_000).await;
    let index = new_index(&store, &media);

    let id = index
        .send_image(&chat.id, &[0xFF, 0xD8, 0xFF])
        .await
        .expect("send_image failed")
        .expect("send_image was a no-op");
    assert_eq!(media.upload_count(), 1);

    let handle = index.open_chat(&chat.id).expect("open_chat returned None");
    let mut views = handle.subscribe();
    let view = wait_for_feed(&mut views, |v| {
        v.messages.iter().any(|m| m.id == id)
    })
    .await;
    let message = view.messages.iter().find(|m| m.id == id).expect("message");
    assert_eq!(message.kind, MessageKind::Image);
    assert!(message
        .media_url
        .as_deref()
        .is_some_and(|url| url.starts_with("memory://uploads/")));
}

/// A failed upload produces no message at all.
#[tokio::test]
async fn failed_upload_creates_no_message() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let chat = seed_chat(&store, &[LOCAL, "bob"], 1_000).await;
    let index = new_index(&store, &media);

    media.fail_uploads(true);
    let result = index.send_image(&chat.id, &[0x00]).await;
    assert!(matches!(result, Err(SendError::Upload(_))));

    tokio::task::yield_now().await;
    let handle = index.open_chat(&chat.id).expect("open_chat returned None");
    assert!(handle.view().messages.is_empty());
    let collection = format!("{CHATS_COLLECTION}/{}/messages", chat.id);
    assert_eq!(store.document_count(&collection), 0);
}

/// Closing a conversation stops its feed; reopening resubscribes and
/// sees the full history again.
#[tokio::test]
async fn close_then_reopen_resubscribes() {
    let store = Arc::new(MemoryStore::new());
    let media = Arc::new(MemoryMedia::new());
    let chat = seed_chat(&store, &[LOCAL, "bob"], 1_000).await;
    let index = new_index(&store, &media);

    let handle = index.open_chat(&chat.id).expect("open_chat returned None");
    let mut views = handle.subscribe();
    index
        .send_message(&chat.id, "before close")
        .await
        .expect("send failed");
    wait_for_feed(&mut views, |v| v.messages.len() == 1).await;

    index.close_chat(&chat.id).await;

    let reopened = index.open_chat(&chat.id).expect("open_chat returned None");
    let mut views = reopened.subscribe();
    let view = wait_for_feed(&mut views, |v| v.messages.len() == 1).await;
    assert_eq!(view.messages[0].text, "before close");
}
