//! `DriftChat` — message synchronization core.
//!
//! Reconciles a locally-mutated, in-memory message list against a
//! continuously-updating remote snapshot feed: optimistic sends, the
//! delivery-status lifecycle, exactly-once new-message flagging, and
//! ordering/dedup guarantees. Everything else (auth, object storage,
//! UI) is a collaborator behind a trait.

pub mod auth;
pub mod chats;
pub mod media;
pub mod store;
pub mod sync;
