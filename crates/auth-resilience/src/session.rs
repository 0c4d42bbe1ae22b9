//! Session and user model.

use serde::{Deserialize, Serialize};
use session_storage::{SessionMeta, StoredSession};

/// The authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An access token plus what is needed to renew it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (epoch seconds).
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

// Tokens stay out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Seconds until expiry relative to `now` (epoch seconds). Negative once expired.
    pub fn seconds_until_expiry(&self, now: i64) -> Option<i64> {
        self.expires_at.map(|expires_at| expires_at - now)
    }

    /// Returns true if the expiry is known and not in the future.
    pub fn is_expired(&self, now: i64) -> bool {
        self.seconds_until_expiry(now)
            .is_some_and(|remaining| remaining <= 0)
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl From<StoredSession> for Session {
    fn from(stored: StoredSession) -> Self {
        Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            expires_at: stored.meta.expires_at,
            user: User {
                id: stored.meta.user_id,
                email: stored.meta.email,
            },
        }
    }
}

impl From<&Session> for StoredSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            meta: SessionMeta {
                user_id: session.user.id.clone(),
                email: session.user.email.clone(),
                expires_at: session.expires_at,
            },
        }
    }
}

/// Auth-state changes announced by the identity backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession(Option<Session>),
    SignedIn(Session),
    TokenRefreshed(Session),
    UserUpdated(User),
    SignedOut,
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::InitialSession(_) => "INITIAL_SESSION",
            AuthEvent::SignedIn(_) => "SIGNED_IN",
            AuthEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
            AuthEvent::UserUpdated(_) => "USER_UPDATED",
            AuthEvent::SignedOut => "SIGNED_OUT",
        }
    }
}
