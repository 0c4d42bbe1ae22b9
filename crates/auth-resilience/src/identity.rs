//! The identity backend seam.

use crate::{AuthEvent, AuthResult, Session};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Operations the session store needs from an identity provider.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// The session currently known to the backend, if any.
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    /// Exchange a refresh token for a new session.
    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session>;

    /// End the session, revoking `access_token` server-side when given.
    async fn sign_out(&self, access_token: Option<&str>) -> AuthResult<()>;

    /// Auth-state change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
