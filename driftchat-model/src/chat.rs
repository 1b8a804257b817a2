//! Conversation summary entity.

use serde::{Deserialize, Serialize};

use crate::message::{ChatId, Timestamp, UserId};

/// Summary of one conversation, as listed in the chat index.
///
/// The `last_message_*` and `unread_count` fields are derived
/// presentation data, written back by clients after accepted sends;
/// the reconciliation engine never treats them as authoritative.
/// `last_message_time` is monotonically non-decreasing as observed by
/// any single client across reconciliations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Conversation identity.
    pub id: ChatId,
    /// Member user ids; always two or more.
    pub participants: Vec<UserId>,
    /// Whether this is a group conversation.
    pub is_group: bool,
    /// Display name for group conversations.
    pub group_name: Option<String>,
    /// Group avatar URL, if any.
    pub group_image_url: Option<String>,
    /// Text of the most recent accepted message.
    pub last_message_text: String,
    /// Send time of the most recent accepted message.
    pub last_message_time: Timestamp,
    /// Author of the most recent accepted message.
    pub last_message_sender_id: Option<UserId>,
    /// Messages not yet read by the local user. Carried, not recomputed.
    pub unread_count: u32,
}

impl Chat {
    /// Creates a new conversation with empty summary fields.
    #[must_use]
    pub fn new(id: ChatId, participants: Vec<UserId>, is_group: bool, group_name: Option<String>) -> Self {
        Self {
            id,
            participants,
            is_group,
            group_name,
            group_image_url: None,
            last_message_text: String::new(),
            last_message_time: Timestamp::now(),
            last_message_sender_id: None,
            unread_count: 0,
        }
    }

    /// Whether `user` is a member of this conversation.
    #[must_use]
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }
}
