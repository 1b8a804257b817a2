//! `DriftChat` domain model.
//!
//! Message and conversation entities, the delivery-status state machine,
//! and lenient decoding of the raw attribute-map documents the remote
//! change feed delivers.

pub mod chat;
pub mod document;
pub mod message;
