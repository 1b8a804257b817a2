//! Per-conversation message feed actor.
//!
//! One tokio task owns the conversation's [`ReconcileState`] and is the
//! single mutation point: feed snapshots, local sends, write outcomes,
//! and flag clears all pass through its queue, so merge passes never
//! interleave. The task publishes a whole [`FeedView`] through a
//! [`watch`] channel after each pass — consumers never observe a torn
//! intermediate state.
//!
//! Remote writes are fire-and-forget: the send path returns as soon as
//! the optimistic entry is visible, and the write's outcome re-enters
//! the queue as an event (confirming with a `delivered` write-back, or
//! rolling the pending entry back on failure).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use driftchat_model::document::{FieldValue, Fields, Snapshot};
use driftchat_model::message::{
    ChatId, MediaType, Message, MessageId, MessageKind, MessageStatus, Timestamp, UserId,
};

use crate::media::MediaError;
use crate::store::{DocumentStore, StoreError};
use crate::sync::ReconcileState;

/// Historical sender identity of the flat single-feed variant.
///
/// The flat feed predates real authentication and classifies a message
/// as inbound by comparing `senderId` against this placeholder, never
/// against the authenticated user's id. Known limitation, preserved
/// deliberately; the multi-chat index uses the real id throughout.
pub const FLAT_FEED_SENDER: &str = "currentUser";

/// Collection path of the flat single-feed variant.
pub const FLAT_FEED_COLLECTION: &str = "messages";

/// Capacity of the actor's command queue.
const COMMAND_BUFFER: usize = 64;

/// Errors returned by the send path.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The trimmed message text was empty. Nothing was sent and no
    /// state changed.
    #[error("message text is empty")]
    EmptyMessage,

    /// The feed's actor task is no longer running.
    #[error("message feed has stopped")]
    FeedStopped,

    /// The attachment upload failed; no message was created.
    #[error(transparent)]
    Upload(#[from] MediaError),
}

/// Configuration of one feed actor.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Collection path this feed reconciles.
    pub collection: String,
    /// Conversation id stamped onto outgoing messages.
    pub chat_id: ChatId,
    /// Sender identity for outgoing messages and inbound classification.
    /// `None` suppresses all ownership-dependent logic.
    pub local_user: Option<UserId>,
    /// Whether confirmed inbound `Delivered` messages are advanced to
    /// `Read` (with a status write-back) while this feed is open.
    pub mark_inbound_read: bool,
    /// Parent chat document to refresh with `lastMessage` summary
    /// fields after each accepted send: `(collection, chat id)`.
    pub summary_doc: Option<(String, ChatId)>,
}

impl FeedConfig {
    /// Configuration of the flat single-feed variant: root `messages`
    /// collection, placeholder sender, no read receipts.
    #[must_use]
    pub fn flat() -> Self {
        Self {
            collection: FLAT_FEED_COLLECTION.to_string(),
            chat_id: ChatId::default(),
            local_user: Some(UserId::new(FLAT_FEED_SENDER)),
            mark_inbound_read: false,
            summary_doc: None,
        }
    }
}

/// Presentation-facing state of one conversation, published whole after
/// every reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct FeedView {
    /// The canonical ordered message list.
    pub messages: Vec<Message>,
    /// Id of the last message — the "scroll to" target.
    pub last_message_id: Option<MessageId>,
    /// Whether an unacknowledged inbound message is surfaced.
    pub has_new_message: bool,
    /// The surfaced inbound message, if any.
    pub flagged: Option<Message>,
    /// Most recent write error, for presentation.
    pub last_error: Option<String>,
}

enum FeedCommand {
    Send {
        message: Message,
        applied: oneshot::Sender<()>,
    },
    WriteOutcome {
        id: MessageId,
        result: Result<(), StoreError>,
    },
    Delete {
        id: MessageId,
    },
    ClearFlag,
    Stop,
}

/// Handle to a running [`MessageFeed`] actor.
///
/// Cloneable; all clones talk to the same task. Dropping every clone
/// closes the command queue and ends the task.
#[derive(Clone)]
pub struct MessageFeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    view: watch::Receiver<FeedView>,
    sender_id: Option<UserId>,
    chat_id: ChatId,
}

impl MessageFeedHandle {
    /// Sends a text message optimistically.
    ///
    /// The trimmed text must be non-empty; otherwise
    /// [`SendError::EmptyMessage`] is returned with no state change and
    /// no store call. On success the optimistic entry is already
    /// visible in the published view when this returns; the remote
    /// write continues in the background. A rejected write removes the
    /// entry again and records the error in the view.
    ///
    /// # Errors
    ///
    /// [`SendError::EmptyMessage`] for blank input,
    /// [`SendError::FeedStopped`] if the actor has ended.
    pub async fn send_message(&self, text: &str) -> Result<MessageId, SendError> {
        self.send_internal(text, None).await
    }

    /// Sends a message carrying an already-uploaded attachment.
    ///
    /// Same optimistic protocol as [`send_message`](Self::send_message);
    /// `text` serves as the caption.
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message).
    pub async fn send_media(
        &self,
        text: &str,
        kind: MessageKind,
        media_url: &str,
        media_type: MediaType,
    ) -> Result<MessageId, SendError> {
        self.send_internal(text, Some((kind, media_url.to_string(), media_type)))
            .await
    }

    async fn send_internal(
        &self,
        text: &str,
        media: Option<(MessageKind, String, MediaType)>,
    ) -> Result<MessageId, SendError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let sender = self
            .sender_id
            .clone()
            .unwrap_or_else(|| UserId::new("unknown"));
        let mut message = Message::outgoing(trimmed, sender, self.chat_id.clone());
        if let Some((kind, url, media_type)) = media {
            message = message.with_media(kind, url, media_type);
        }
        let id = message.id.clone();

        let (applied_tx, applied_rx) = oneshot::channel();
        self.commands
            .send(FeedCommand::Send {
                message,
                applied: applied_tx,
            })
            .await
            .map_err(|_| SendError::FeedStopped)?;
        applied_rx.await.map_err(|_| SendError::FeedStopped)?;
        Ok(id)
    }

    /// Requests deletion of a message. Removal arrives back through the
    /// feed once the store confirms.
    pub async fn delete_message(&self, id: MessageId) {
        let _ = self.commands.send(FeedCommand::Delete { id }).await;
    }

    /// Acknowledges the surfaced inbound message, lowering the signal
    /// and re-arming detection.
    pub async fn clear_flag(&self) {
        let _ = self.commands.send(FeedCommand::ClearFlag).await;
    }

    /// Stops the actor. Further mutation of the conversation state
    /// ceases; re-opening constructs a fresh subscription.
    pub async fn stop(&self) {
        let _ = self.commands.send(FeedCommand::Stop).await;
    }

    /// Subscribes to view updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    /// The most recently published view.
    #[must_use]
    pub fn view(&self) -> FeedView {
        self.view.borrow().clone()
    }
}

/// The per-conversation reconciliation actor.
pub struct MessageFeed;

impl MessageFeed {
    /// Spawns the actor for `config`, subscribing to the configured
    /// collection, and returns its handle.
    pub fn spawn<S>(store: Arc<S>, config: FeedConfig) -> MessageFeedHandle
    where
        S: DocumentStore + 'static,
    {
        let snapshots = store.subscribe(&config.collection);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view_rx) = watch::channel(FeedView::default());

        let handle = MessageFeedHandle {
            commands: cmd_tx.clone(),
            view: view_rx,
            sender_id: config.local_user.clone(),
            chat_id: config.chat_id.clone(),
        };

        let actor = FeedActor {
            store,
            config,
            state: ReconcileState::new(),
            last_error: None,
            commands: cmd_tx,
            view: view_tx,
        };
        tokio::spawn(actor.run(snapshots, cmd_rx));

        handle
    }

    /// Spawns the flat single-feed variant on the root `messages`
    /// collection. See [`FLAT_FEED_SENDER`] for its classification
    /// limitation.
    pub fn flat<S>(store: Arc<S>) -> MessageFeedHandle
    where
        S: DocumentStore + 'static,
    {
        Self::spawn(store, FeedConfig::flat())
    }
}

struct FeedActor<S> {
    store: Arc<S>,
    config: FeedConfig,
    state: ReconcileState,
    last_error: Option<String>,
    commands: mpsc::Sender<FeedCommand>,
    view: watch::Sender<FeedView>,
}

impl<S> FeedActor<S>
where
    S: DocumentStore + 'static,
{
    async fn run(
        mut self,
        mut snapshots: mpsc::Receiver<Snapshot>,
        mut commands: mpsc::Receiver<FeedCommand>,
    ) {
        tracing::debug!(collection = %self.config.collection, "message feed started");
        loop {
            tokio::select! {
                snapshot = snapshots.recv() => match snapshot {
                    Some(snapshot) => self.on_snapshot(snapshot),
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(FeedCommand::Stop) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }
        tracing::debug!(collection = %self.config.collection, "message feed stopped");
    }

    fn on_snapshot(&mut self, snapshot: Snapshot) {
        let messages: Vec<Message> = snapshot
            .documents
            .iter()
            .map(Message::from_document)
            .collect();
        self.state.apply_snapshot(
            messages,
            self.config.local_user.as_ref(),
            Timestamp::now(),
        );

        if self.config.mark_inbound_read {
            if let Some(local) = self.config.local_user.clone() {
                for id in self.state.mark_inbound_read(&local) {
                    self.spawn_status_update(id, MessageStatus::Read);
                }
            }
        }

        self.publish();
    }

    fn on_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Send { message, applied } => {
                let id = message.id.clone();
                let fields = message.to_fields();
                self.state.apply_local_send(message);
                self.publish();
                let _ = applied.send(());
                self.spawn_write(id, fields);
            }
            FeedCommand::WriteOutcome { id, result } => match result {
                Ok(()) => self.on_write_confirmed(&id),
                Err(err) => self.on_write_failed(&id, &err),
            },
            FeedCommand::Delete { id } => self.spawn_delete(id),
            FeedCommand::ClearFlag => {
                self.state.clear_flag();
                self.publish();
            }
            FeedCommand::Stop => {}
        }
    }

    fn on_write_confirmed(&mut self, id: &MessageId) {
        self.spawn_status_update(id.clone(), MessageStatus::Delivered);

        if let Some((summary_collection, chat_id)) = self.config.summary_doc.clone() {
            if let Some(message) = self.state.message(id) {
                let mut fields = Fields::new();
                fields.insert(
                    "lastMessage".into(),
                    FieldValue::Str(message.text.clone()),
                );
                fields.insert(
                    "lastMessageTime".into(),
                    FieldValue::Time(message.timestamp),
                );
                fields.insert(
                    "lastMessageSenderId".into(),
                    FieldValue::Str(message.sender_id.as_str().into()),
                );
                let store = self.store.clone();
                let doc_id = chat_id.as_str().to_string();
                tokio::spawn(async move {
                    if let Err(err) = store.update(&summary_collection, &doc_id, fields).await {
                        tracing::warn!(chat_id = %doc_id, error = %err, "chat summary update failed");
                    }
                });
            }
        }
    }

    fn on_write_failed(&mut self, id: &MessageId, err: &StoreError) {
        tracing::warn!(message_id = %id, error = %err, "send rejected, rolling back optimistic entry");
        if self.state.apply_write_failure(id) {
            self.last_error = Some(err.to_string());
            self.publish();
        }
    }

    /// Issues the remote write for an optimistic send; the outcome
    /// re-enters the command queue.
    fn spawn_write(&self, id: MessageId, fields: Fields) {
        let store = self.store.clone();
        let collection = self.config.collection.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = store.write(&collection, id.as_str(), fields).await;
            let _ = commands.send(FeedCommand::WriteOutcome { id, result }).await;
        });
    }

    /// Fire-and-forget status write-back; failure is logged, not retried.
    fn spawn_status_update(&self, id: MessageId, status: MessageStatus) {
        let store = self.store.clone();
        let collection = self.config.collection.clone();
        tokio::spawn(async move {
            let fields: Fields = [(
                "status".to_string(),
                FieldValue::Str(status.as_str().into()),
            )]
            .into_iter()
            .collect();
            if let Err(err) = store.update(&collection, id.as_str(), fields).await {
                tracing::warn!(
                    message_id = %id,
                    status = status.as_str(),
                    error = %err,
                    "status write-back failed"
                );
            }
        });
    }

    fn spawn_delete(&self, id: MessageId) {
        let store = self.store.clone();
        let collection = self.config.collection.clone();
        tokio::spawn(async move {
            if let Err(err) = store.delete(&collection, id.as_str()).await {
                tracing::warn!(message_id = %id, error = %err, "message delete failed");
            }
        });
    }

    fn publish(&self) {
        let view = FeedView {
            messages: self.state.presented(),
            last_message_id: self.state.last_message_id(),
            has_new_message: self.state.has_new(),
            flagged: self.state.flagged().cloned(),
            last_error: self.last_error.clone(),
        };
        let _ = self.view.send(view);
    }
}
