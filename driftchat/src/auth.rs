//! Authentication collaborator boundary.
//!
//! The core reads a single local-user identity and never mutates it.
//! A missing identity is not an error: operations that depend on
//! ownership (read receipts, inbound classification, chat membership)
//! simply stay inert.

use driftchat_model::message::UserId;

/// Supplies the local user's identity to the synchronization core.
pub trait AuthSession: Send + Sync {
    /// The authenticated user's id, or `None` when signed out.
    fn current_user_id(&self) -> Option<UserId>;

    /// Whether a local user is currently signed in.
    fn is_authenticated(&self) -> bool {
        self.current_user_id().is_some()
    }
}

/// Fixed-identity [`AuthSession`] for tests and embedding.
#[derive(Debug, Clone)]
pub struct StaticAuth {
    user: Option<UserId>,
}

impl StaticAuth {
    /// Session for a signed-in user.
    pub fn signed_in(id: impl Into<String>) -> Self {
        Self {
            user: Some(UserId::new(id)),
        }
    }

    /// Session with nobody signed in.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self { user: None }
    }
}

impl AuthSession for StaticAuth {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.clone()
    }
}
