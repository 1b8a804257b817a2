//! Reconciliation engine.
//!
//! [`ReconcileState`] is the pure per-conversation state machine that
//! merges the authoritative feed state with locally-pending optimistic
//! sends into one canonical ordered list. [`feed::MessageFeed`] wraps it
//! in a single-writer actor so that snapshots and local mutations never
//! interleave mid-merge.

pub mod feed;

use std::collections::HashSet;

use driftchat_model::message::{Message, MessageId, MessageStatus, Timestamp, UserId};

/// Recency window for new-message flagging: only inbound messages this
/// recent can raise the new-message signal.
pub const NEW_MESSAGE_WINDOW_MS: u64 = 60_000;

/// Per-conversation reconciliation state.
///
/// Invariants maintained across every mutation:
/// - the presented list never holds two messages with the same id;
/// - the presented list is non-decreasing by timestamp, with ties
///   keeping confirmed entries before pending ones and pending entries
///   in insertion order.
#[derive(Debug, Default)]
pub struct ReconcileState {
    /// Messages as last received from the feed. Authoritative.
    confirmed: Vec<Message>,
    /// Optimistic sends not yet confirmed or failed, in insertion order.
    pending: Vec<Message>,
    /// Presented-list size after the previous snapshot, for growth detection.
    last_observed_count: usize,
    /// The one inbound message currently surfaced for acknowledgment.
    flagged: Option<Message>,
    /// Whether the new-message signal is currently raised.
    has_new: bool,
}

impl ReconcileState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a full feed snapshot.
    ///
    /// Replaces the confirmed set wholesale (deduplicated by id, first
    /// occurrence wins), drops any pending entry the snapshot confirms
    /// (the confirmed copy supersedes it, status included), then runs
    /// new-message detection against `now` and `local_user`.
    ///
    /// The signal is edge-triggered: while a flag is raised, later
    /// qualifying arrivals do not replace it; only the first arrival
    /// after a [`clear_flag`](Self::clear_flag) is surfaced. With no
    /// local user, inbound classification is suppressed entirely.
    pub fn apply_snapshot(
        &mut self,
        incoming: Vec<Message>,
        local_user: Option<&UserId>,
        now: Timestamp,
    ) {
        let previous_ids: HashSet<MessageId> = self
            .confirmed
            .iter()
            .chain(self.pending.iter())
            .map(|m| m.id.clone())
            .collect();

        let mut confirmed_ids = HashSet::new();
        self.confirmed = incoming
            .into_iter()
            .filter(|m| confirmed_ids.insert(m.id.clone()))
            .collect();
        self.pending.retain(|m| !confirmed_ids.contains(&m.id));

        let presented = self.presented();
        let new_count = presented.len();

        if new_count > self.last_observed_count && !self.has_new {
            if let Some(local) = local_user {
                let fresh = presented
                    .iter()
                    .filter(|m| !previous_ids.contains(&m.id))
                    .filter(|m| m.is_inbound(local))
                    .filter(|m| now.millis_since(m.timestamp) <= NEW_MESSAGE_WINDOW_MS)
                    .next_back()
                    .cloned();
                if let Some(message) = fresh {
                    tracing::debug!(message_id = %message.id, "new inbound message flagged");
                    self.flagged = Some(message);
                    self.has_new = true;
                }
            }
        }

        self.last_observed_count = new_count;
    }

    /// Records an optimistic local send.
    ///
    /// The entry becomes visible in the presented list immediately,
    /// before any remote confirmation. A duplicate id is ignored.
    pub fn apply_local_send(&mut self, message: Message) {
        if self.contains(&message.id) {
            tracing::warn!(message_id = %message.id, "duplicate local send ignored");
            return;
        }
        self.pending.push(message);
    }

    /// Rolls back a failed optimistic send.
    ///
    /// Removes exactly the pending entry with `id`; the message visibly
    /// disappears rather than lingering as `Failed`. Returns whether an
    /// entry was removed.
    pub fn apply_write_failure(&mut self, id: &MessageId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|m| m.id != *id);
        self.pending.len() != before
    }

    /// Advances confirmed inbound `Delivered` messages to `Read`.
    ///
    /// Returns the ids that transitioned, so the caller can issue the
    /// corresponding status write-backs. Messages authored by `local`
    /// and messages in other states are untouched.
    pub fn mark_inbound_read(&mut self, local: &UserId) -> Vec<MessageId> {
        let mut read = Vec::new();
        for message in &mut self.confirmed {
            if message.is_inbound(local) && message.advance_status(MessageStatus::Read) {
                read.push(message.id.clone());
            }
        }
        read
    }

    /// Clears the surfaced message and lowers the new-message signal,
    /// re-arming detection for the next qualifying arrival.
    pub fn clear_flag(&mut self) {
        self.flagged = None;
        self.has_new = false;
    }

    /// The canonical ordered list to present: confirmed plus pending,
    /// stable-sorted ascending by timestamp.
    #[must_use]
    pub fn presented(&self) -> Vec<Message> {
        let mut merged: Vec<Message> = self
            .confirmed
            .iter()
            .chain(self.pending.iter())
            .cloned()
            .collect();
        merged.sort_by_key(|m| m.timestamp);
        merged
    }

    /// Id of the last presented message — the "scroll to" target.
    #[must_use]
    pub fn last_message_id(&self) -> Option<MessageId> {
        self.presented().last().map(|m| m.id.clone())
    }

    /// Whether the new-message signal is currently raised.
    #[must_use]
    pub const fn has_new(&self) -> bool {
        self.has_new
    }

    /// The message currently surfaced for acknowledgment, if any.
    #[must_use]
    pub const fn flagged(&self) -> Option<&Message> {
        self.flagged.as_ref()
    }

    /// Looks up a message by id in either the confirmed or pending set.
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.confirmed
            .iter()
            .chain(self.pending.iter())
            .find(|m| m.id == *id)
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.message(id).is_some()
    }
}
