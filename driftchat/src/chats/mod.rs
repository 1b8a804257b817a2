//! Multi-conversation index.
//!
//! [`ChatIndex`] maintains one [`MessageFeed`] per opened conversation
//! plus a summary list of the local user's conversations, reconciled
//! from the `chats` collection feed and ordered by last activity.
//! Conversation creation follows the same optimistic pattern as message
//! sends: unconfirmed creations are held apart from the feed's list
//! until the feed echoes them, so a snapshot never erases one. One
//! documented gap remains: a rejected creation is surfaced in the error
//! slot but not rolled back from the local list.
//!
//! Every operation that requires a local user silently no-ops when
//! nobody is signed in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use driftchat_model::chat::Chat;
use driftchat_model::document::Snapshot;
use driftchat_model::message::{ChatId, MediaType, MessageId, MessageKind, UserId};

use crate::auth::AuthSession;
use crate::media::MediaStore;
use crate::store::{DocumentStore, StoreError};
use crate::sync::feed::{FeedConfig, MessageFeed, MessageFeedHandle, SendError};

/// Collection holding conversation summary documents.
pub const CHATS_COLLECTION: &str = "chats";

/// Capacity of the index actor's command queue.
const COMMAND_BUFFER: usize = 32;

/// Presentation-facing state of the conversation list.
#[derive(Debug, Clone, Default)]
pub struct ChatListView {
    /// The local user's conversations, most recent activity first.
    pub chats: Vec<Chat>,
    /// Most recent write error, for presentation.
    pub last_error: Option<String>,
}

enum IndexCommand {
    Created {
        chat: Chat,
        applied: oneshot::Sender<()>,
    },
    CreateOutcome {
        chat_id: ChatId,
        result: Result<(), StoreError>,
    },
    Stop,
}

/// Fans the reconciliation engine out across conversations.
pub struct ChatIndex<S, M> {
    store: Arc<S>,
    media: Arc<M>,
    local_user: Option<UserId>,
    commands: mpsc::Sender<IndexCommand>,
    view: watch::Receiver<ChatListView>,
    feeds: Mutex<HashMap<ChatId, MessageFeedHandle>>,
}

impl<S, M> ChatIndex<S, M>
where
    S: DocumentStore + 'static,
    M: MediaStore + 'static,
{
    /// Creates the index for the currently-authenticated user and
    /// starts its summary-list actor.
    ///
    /// The identity is read once here and never mutated by the index.
    /// With nobody signed in the list stays empty and all operations
    /// no-op.
    pub fn new(store: Arc<S>, media: Arc<M>, auth: &impl AuthSession) -> Self {
        let local_user = auth.current_user_id();
        let snapshots = store.subscribe(CHATS_COLLECTION);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view_rx) = watch::channel(ChatListView::default());

        let actor = IndexActor {
            local_user: local_user.clone(),
            confirmed: Vec::new(),
            pending: Vec::new(),
            last_error: None,
            view: view_tx,
        };
        tokio::spawn(actor.run(snapshots, cmd_rx));

        Self {
            store,
            media,
            local_user,
            commands: cmd_tx,
            view: view_rx,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a conversation with the local user plus `others`,
    /// optimistically prepending it to the summary list before the
    /// remote write confirms.
    ///
    /// Returns the new conversation's id, or `None` when signed out.
    /// A rejected creation is reported through the view's error slot
    /// and not rolled back.
    pub async fn create_chat(
        &self,
        others: Vec<UserId>,
        is_group: bool,
        group_name: Option<String>,
    ) -> Option<ChatId> {
        let Some(local) = self.local_user.clone() else {
            tracing::debug!("create_chat ignored: nobody signed in");
            return None;
        };

        let mut participants = vec![local];
        participants.extend(others);
        let chat = Chat::new(ChatId::new(), participants, is_group, group_name);
        let chat_id = chat.id.clone();
        let fields = chat.to_fields();

        let (applied_tx, applied_rx) = oneshot::channel();
        self.commands
            .send(IndexCommand::Created {
                chat,
                applied: applied_tx,
            })
            .await
            .ok()?;
        applied_rx.await.ok()?;

        let store = self.store.clone();
        let commands = self.commands.clone();
        let doc_id = chat_id.clone();
        tokio::spawn(async move {
            let result = store
                .write(CHATS_COLLECTION, doc_id.as_str(), fields)
                .await;
            let _ = commands
                .send(IndexCommand::CreateOutcome {
                    chat_id: doc_id,
                    result,
                })
                .await;
        });

        Some(chat_id)
    }

    /// Opens a conversation: starts (or reuses) its reconciliation
    /// actor with read receipts enabled. Other conversations'
    /// subscriptions are left running.
    ///
    /// Returns `None` when signed out.
    pub fn open_chat(&self, chat_id: &ChatId) -> Option<MessageFeedHandle> {
        let local = self.local_user.clone()?;
        let mut feeds = self.feeds.lock();
        let handle = feeds.entry(chat_id.clone()).or_insert_with(|| {
            MessageFeed::spawn(
                self.store.clone(),
                FeedConfig {
                    collection: messages_collection(chat_id),
                    chat_id: chat_id.clone(),
                    local_user: Some(local),
                    mark_inbound_read: true,
                    summary_doc: Some((CHATS_COLLECTION.to_string(), chat_id.clone())),
                },
            )
        });
        Some(handle.clone())
    }

    /// Sends a text message in a conversation.
    ///
    /// Returns `Ok(None)` when signed out (silent no-op).
    ///
    /// # Errors
    ///
    /// [`SendError::EmptyMessage`] for blank input; see
    /// [`MessageFeedHandle::send_message`] for the rest.
    pub async fn send_message(
        &self,
        chat_id: &ChatId,
        text: &str,
    ) -> Result<Option<MessageId>, SendError> {
        let Some(handle) = self.open_chat(chat_id) else {
            tracing::debug!(chat_id = %chat_id, "send_message ignored: nobody signed in");
            return Ok(None);
        };
        handle.send_message(text).await.map(Some)
    }

    /// Uploads an image and sends the message referencing it.
    ///
    /// Upload failure surfaces as [`SendError::Upload`]; no message is
    /// created. Returns `Ok(None)` when signed out.
    ///
    /// # Errors
    ///
    /// [`SendError::Upload`] if the upload fails; see
    /// [`MessageFeedHandle::send_media`] for the rest.
    pub async fn send_image(
        &self,
        chat_id: &ChatId,
        bytes: &[u8],
    ) -> Result<Option<MessageId>, SendError> {
        let Some(handle) = self.open_chat(chat_id) else {
            tracing::debug!(chat_id = %chat_id, "send_image ignored: nobody signed in");
            return Ok(None);
        };
        let url = self.media.upload(bytes, "image/jpeg").await?;
        handle
            .send_media("Image", MessageKind::Image, &url, MediaType::Image)
            .await
            .map(Some)
    }

    /// Stops a conversation's reconciliation actor and releases its
    /// resources. Reopening constructs a fresh subscription.
    pub async fn close_chat(&self, chat_id: &ChatId) {
        let handle = self.feeds.lock().remove(chat_id);
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// Stops the summary actor and every open conversation.
    pub async fn stop(&self) {
        let _ = self.commands.send(IndexCommand::Stop).await;
        let handles: Vec<MessageFeedHandle> = self.feeds.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop().await;
        }
    }

    /// Subscribes to conversation-list updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatListView> {
        self.view.clone()
    }

    /// The most recently published conversation list.
    #[must_use]
    pub fn view(&self) -> ChatListView {
        self.view.borrow().clone()
    }
}

/// Message subcollection path of one conversation.
fn messages_collection(chat_id: &ChatId) -> String {
    format!("{CHATS_COLLECTION}/{chat_id}/messages")
}

struct IndexActor {
    local_user: Option<UserId>,
    /// Conversations as last decoded from the feed. Authoritative.
    confirmed: Vec<Chat>,
    /// Optimistic creations the feed has not echoed back yet, newest
    /// first. Held apart from `confirmed` so a snapshot queued before
    /// the creation cannot erase the entry.
    pending: Vec<Chat>,
    last_error: Option<String>,
    view: watch::Sender<ChatListView>,
}

impl IndexActor {
    async fn run(
        mut self,
        mut snapshots: mpsc::Receiver<Snapshot>,
        mut commands: mpsc::Receiver<IndexCommand>,
    ) {
        loop {
            tokio::select! {
                snapshot = snapshots.recv() => match snapshot {
                    Some(snapshot) => self.on_snapshot(&snapshot),
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(IndexCommand::Stop) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }
        tracing::debug!("chat index stopped");
    }

    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        let Some(local) = &self.local_user else {
            return;
        };

        let mut confirmed: Vec<Chat> = snapshot
            .documents
            .iter()
            .filter_map(|doc| match Chat::from_document(doc) {
                Ok(chat) => Some(chat),
                Err(err) => {
                    tracing::warn!(doc_id = %doc.id, error = %err, "dropping undecodable chat document");
                    None
                }
            })
            .filter(|chat| chat.has_participant(local))
            .collect();
        confirmed.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));

        // The feed's copy supersedes an optimistic creation once it echoes
        // the id; until then the pending entry survives every snapshot.
        let confirmed_ids: HashSet<&ChatId> = confirmed.iter().map(|c| &c.id).collect();
        self.pending.retain(|c| !confirmed_ids.contains(&c.id));

        self.confirmed = confirmed;
        self.publish();
    }

    fn on_command(&mut self, command: IndexCommand) {
        match command {
            IndexCommand::Created { chat, applied } => {
                self.pending.insert(0, chat);
                self.publish();
                let _ = applied.send(());
            }
            IndexCommand::CreateOutcome { chat_id, result } => {
                if let Err(err) = result {
                    tracing::warn!(chat_id = %chat_id, error = %err, "chat creation rejected");
                    self.last_error = Some(err.to_string());
                    self.publish();
                }
            }
            IndexCommand::Stop => {}
        }
    }

    fn publish(&self) {
        let mut chats = self.pending.clone();
        chats.extend(self.confirmed.iter().cloned());
        let _ = self.view.send(ChatListView {
            chats,
            last_error: self.last_error.clone(),
        });
    }
}
