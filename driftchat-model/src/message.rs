//! Message entity and its delivery-status state machine.
//!
//! A [`Message`] is created locally (optimistic send, `status = Sent`) or
//! materialized from a feed document with whatever status the remote store
//! holds. Its identity never changes after creation; only the status field
//! is mutated, and only through [`Message::advance_status`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a message.
///
/// An opaque string: client-generated for optimistic sends and echoed
/// back by the remote store once the write is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Mints a fresh client-side message identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier, e.g. one read from a feed document.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a user account, as issued by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation. The flat single-feed variant uses
/// [`ChatId::default`], which every message without an explicit
/// conversation belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(String);

impl ChatId {
    /// Mints a fresh conversation identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp, the sole ordering key for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, saturating at zero.
    #[must_use]
    pub const fn millis_since(&self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// What kind of content a message carries.
///
/// Non-text kinds keep a placeholder caption in [`Message::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// An image attachment.
    Image,
    /// A video attachment.
    Video,
    /// An audio attachment.
    Audio,
    /// A generic file attachment.
    File,
    /// A shared location.
    Location,
}

impl MessageKind {
    /// The lowercase wire encoding used in feed documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Location => "location",
        }
    }

    /// Parses the wire encoding. Unknown values map to `None`; callers
    /// decoding feed documents fall back to [`MessageKind::Text`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "file" => Some(Self::File),
            "location" => Some(Self::Location),
            _ => None,
        }
    }
}

/// Media category of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    /// An image.
    Image,
    /// A video.
    Video,
    /// An audio clip.
    Audio,
    /// A generic file.
    File,
}

impl MediaType {
    /// The lowercase wire encoding used in feed documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }

    /// Parses the wire encoding.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Delivery lifecycle of a message.
///
/// Legal transitions: `Sent -> Delivered -> Read`, with `Sent -> Failed`
/// as the escape hatch for rejected writes. `Read` and `Failed` are
/// terminal. Anything else is out of order and must be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Accepted locally; the remote write may still be in flight.
    Sent,
    /// The remote store confirmed the write.
    Delivered,
    /// The addressed user has seen the message.
    Read,
    /// The remote write was rejected or timed out.
    Failed,
}

impl MessageStatus {
    /// The lowercase wire encoding used in feed documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    /// Parses the wire encoding. Unknown values map to `None`; feed
    /// decoding falls back to [`MessageStatus::Sent`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Sent, Self::Delivered) | (Self::Sent, Self::Failed) | (Self::Delivered, Self::Read)
        )
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Failed)
    }
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique identity, assigned at creation and never changed.
    pub id: MessageId,
    /// UTF-8 content; a placeholder caption for non-text kinds.
    pub text: String,
    /// Author of the message.
    pub sender_id: UserId,
    /// Conversation this message belongs to.
    pub chat_id: ChatId,
    /// Logical send time, the sole ordering key.
    pub timestamp: Timestamp,
    /// Content kind.
    pub kind: MessageKind,
    /// Delivery lifecycle state.
    pub status: MessageStatus,
    /// Message this one replies to, if any.
    pub reply_to: Option<MessageId>,
    /// Attachment URL, if any.
    pub media_url: Option<String>,
    /// Attachment media category, if any.
    pub media_type: Option<MediaType>,
}

impl Message {
    /// Builds a fresh outgoing message: new id, `status = Sent`,
    /// `timestamp = now`.
    #[must_use]
    pub fn outgoing(text: impl Into<String>, sender_id: UserId, chat_id: ChatId) -> Self {
        Self {
            id: MessageId::new(),
            text: text.into(),
            sender_id,
            chat_id,
            timestamp: Timestamp::now(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            reply_to: None,
            media_url: None,
            media_type: None,
        }
    }

    /// Attaches media metadata to an outgoing message.
    #[must_use]
    pub fn with_media(mut self, kind: MessageKind, url: impl Into<String>, media_type: MediaType) -> Self {
        self.kind = kind;
        self.media_url = Some(url.into());
        self.media_type = Some(media_type);
        self
    }

    /// Applies a status transition if it is legal, ignoring it otherwise.
    ///
    /// Returns whether the transition was applied. Out-of-order requests
    /// (e.g. `Read -> Sent`) leave the message untouched.
    pub fn advance_status(&mut self, next: MessageStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Whether this message was authored by someone other than `local`.
    #[must_use]
    pub fn is_inbound(&self, local: &UserId) -> bool {
        self.sender_id != *local
    }
}
