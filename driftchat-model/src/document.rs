//! Raw feed documents and lenient decoding into model types.
//!
//! The remote change feed delivers full-collection snapshots of documents
//! whose fields are loosely-typed attribute maps. Decoding is deliberately
//! forgiving: a malformed message document must never stop the engine
//! from processing the rest of its snapshot. Missing message fields take
//! documented defaults; only conversation documents (which carry required
//! structure) are dropped when undecodable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chat::Chat;
use crate::message::{
    ChatId, MediaType, Message, MessageId, MessageKind, MessageStatus, Timestamp, UserId,
};

/// One loosely-typed field of a feed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer. Timestamps in this encoding are epoch seconds.
    Int(i64),
    /// Floating point. Timestamps in this encoding are fractional epoch seconds.
    Double(f64),
    /// UTF-8 string.
    Str(String),
    /// Provider-native time value, already millisecond precision.
    Time(Timestamp),
    /// Homogeneous or heterogeneous list.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Returns the string payload, if this is a string field.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a boolean field.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer field.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Attribute map of one document.
pub type Fields = BTreeMap<String, FieldValue>;

/// One document in a feed snapshot: its key plus its attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document key within its collection.
    pub id: String,
    /// Raw attributes.
    pub fields: Fields,
}

/// The complete current set of documents in a collection at one instant.
///
/// The feed is a full-state push, not a diff: every snapshot replaces the
/// consumer's previous view of the collection. Documents arrive ordered
/// by timestamp ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Documents in feed order.
    pub documents: Vec<Document>,
}

/// Error decoding a feed document that carries required structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A required field was absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A field was present but of the wrong type.
    #[error("field `{0}` has unexpected type")]
    WrongType(&'static str),
}

/// Decodes a document's `timestamp` field, accepting every encoding the
/// remote store is known to produce.
///
/// Accepted encodings, in order: provider-native time value, integer
/// epoch seconds, fractional epoch seconds. A missing or unrecognized
/// value falls back to the current instant; that is a data-quality
/// defect in the feed, logged but never fatal.
#[must_use]
pub fn decode_timestamp(doc_id: &str, fields: &Fields) -> Timestamp {
    match fields.get("timestamp") {
        Some(FieldValue::Time(ts)) => *ts,
        Some(FieldValue::Int(secs)) => Timestamp::from_millis(
            u64::try_from(*secs).unwrap_or_default().saturating_mul(1000),
        ),
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(FieldValue::Double(secs)) if secs.is_finite() && *secs >= 0.0 => {
            Timestamp::from_millis((secs * 1000.0) as u64)
        }
        other => {
            tracing::warn!(
                doc_id,
                field = ?other,
                "document timestamp missing or unrecognized, falling back to now"
            );
            Timestamp::now()
        }
    }
}

fn str_or<'a>(fields: &'a Fields, key: &str, doc_id: &str, default: &'a str) -> &'a str {
    match fields.get(key) {
        Some(FieldValue::Str(s)) => s,
        Some(other) => {
            tracing::warn!(doc_id, key, field = ?other, "string field has unexpected type, using default");
            default
        }
        None => default,
    }
}

impl Message {
    /// Decodes a message document leniently.
    ///
    /// Never fails: every missing or mistyped field takes its documented
    /// default (`text` empty, `sender_id` `"unknown"`, `chat_id`
    /// `"default"`, `kind` text, `status` sent, attachments absent). The
    /// document key stands in for a missing `id` field.
    #[must_use]
    pub fn from_document(doc: &Document) -> Self {
        let fields = &doc.fields;
        let id = str_or(fields, "id", &doc.id, &doc.id);
        let kind = fields
            .get("messageType")
            .and_then(FieldValue::as_str)
            .and_then(MessageKind::parse)
            .unwrap_or(MessageKind::Text);
        let status = fields
            .get("status")
            .and_then(FieldValue::as_str)
            .and_then(MessageStatus::parse)
            .unwrap_or(MessageStatus::Sent);

        Self {
            id: MessageId::from_string(id),
            text: str_or(fields, "text", &doc.id, "").to_string(),
            sender_id: UserId::new(str_or(fields, "senderId", &doc.id, "unknown")),
            chat_id: ChatId::from_string(str_or(fields, "chatId", &doc.id, "default")),
            timestamp: decode_timestamp(&doc.id, fields),
            kind,
            status,
            reply_to: fields
                .get("replyToMessageId")
                .and_then(FieldValue::as_str)
                .map(MessageId::from_string),
            media_url: fields
                .get("mediaUrl")
                .and_then(FieldValue::as_str)
                .map(String::from),
            media_type: fields
                .get("mediaType")
                .and_then(FieldValue::as_str)
                .and_then(MediaType::parse),
        }
    }

    /// Encodes this message as document fields for a remote write.
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("id".into(), FieldValue::Str(self.id.as_str().into()));
        fields.insert("text".into(), FieldValue::Str(self.text.clone()));
        fields.insert(
            "senderId".into(),
            FieldValue::Str(self.sender_id.as_str().into()),
        );
        fields.insert(
            "chatId".into(),
            FieldValue::Str(self.chat_id.as_str().into()),
        );
        fields.insert("timestamp".into(), FieldValue::Time(self.timestamp));
        fields.insert(
            "messageType".into(),
            FieldValue::Str(self.kind.as_str().into()),
        );
        fields.insert(
            "status".into(),
            FieldValue::Str(self.status.as_str().into()),
        );
        if let Some(reply_to) = &self.reply_to {
            fields.insert(
                "replyToMessageId".into(),
                FieldValue::Str(reply_to.as_str().into()),
            );
        }
        if let Some(url) = &self.media_url {
            fields.insert("mediaUrl".into(), FieldValue::Str(url.clone()));
        }
        if let Some(media_type) = self.media_type {
            fields.insert(
                "mediaType".into(),
                FieldValue::Str(media_type.as_str().into()),
            );
        }
        fields
    }
}

impl Chat {
    /// Decodes a conversation document.
    ///
    /// Unlike messages, conversations carry required structure: a
    /// document without a participant list is undecodable and the
    /// consumer drops it (with a log line) rather than invent members.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if `participants` is missing or not a
    /// list of strings.
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let fields = &doc.fields;
        let participants = match fields.get("participants") {
            Some(FieldValue::List(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(UserId::new)
                        .ok_or(DecodeError::WrongType("participants"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(DecodeError::WrongType("participants")),
            None => return Err(DecodeError::MissingField("participants")),
        };

        let last_message_time = match fields.get("lastMessageTime") {
            Some(FieldValue::Time(ts)) => *ts,
            _ => decode_timestamp(&doc.id, fields),
        };

        Ok(Self {
            id: ChatId::from_string(doc.id.clone()),
            participants,
            is_group: fields
                .get("isGroupChat")
                .and_then(FieldValue::as_bool)
                .unwrap_or(false),
            group_name: fields
                .get("groupName")
                .and_then(FieldValue::as_str)
                .map(String::from),
            group_image_url: fields
                .get("groupImageUrl")
                .and_then(FieldValue::as_str)
                .map(String::from),
            last_message_text: str_or(fields, "lastMessage", &doc.id, "").to_string(),
            last_message_time,
            last_message_sender_id: fields
                .get("lastMessageSenderId")
                .and_then(FieldValue::as_str)
                .filter(|s| !s.is_empty())
                .map(UserId::new),
            unread_count: fields
                .get("unreadCount")
                .and_then(FieldValue::as_int)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
        })
    }

    /// Encodes this conversation as document fields for a remote write.
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("id".into(), FieldValue::Str(self.id.as_str().into()));
        fields.insert(
            "participants".into(),
            FieldValue::List(
                self.participants
                    .iter()
                    .map(|p| FieldValue::Str(p.as_str().into()))
                    .collect(),
            ),
        );
        fields.insert("isGroupChat".into(), FieldValue::Bool(self.is_group));
        if let Some(name) = &self.group_name {
            fields.insert("groupName".into(), FieldValue::Str(name.clone()));
        }
        if let Some(url) = &self.group_image_url {
            fields.insert("groupImageUrl".into(), FieldValue::Str(url.clone()));
        }
        fields.insert(
            "lastMessage".into(),
            FieldValue::Str(self.last_message_text.clone()),
        );
        fields.insert(
            "lastMessageTime".into(),
            FieldValue::Time(self.last_message_time),
        );
        fields.insert(
            "lastMessageSenderId".into(),
            FieldValue::Str(
                self.last_message_sender_id
                    .as_ref()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
            ),
        );
        fields.insert(
            "unreadCount".into(),
            FieldValue::Int(i64::from(self.unread_count)),
        );
        fields
    }
}
