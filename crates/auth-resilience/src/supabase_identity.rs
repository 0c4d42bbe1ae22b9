//! Supabase Auth (GoTrue) client.
//!
//! The persisted session lives in a [`SessionVault`]; every successful
//! sign-in or refresh rewrites it and announces an [`AuthEvent`].

use crate::store::now_epoch_secs;
use crate::{AuthError, AuthEvent, AuthResult, BackendError, IdentityBackend, Session, User};
use async_trait::async_trait;
use config_and_utils::Config;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use session_storage::{SessionVault, StoredSession};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserResponse> for User {
    fn from(user: UserResponse) -> Self {
        Self {
            id: user.id,
            email: user.email,
        }
    }
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + secs));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        }
    }
}

/// Map a rejected refresh to an error. Client errors mean the refresh token
/// is no longer usable; server errors stay retryable.
fn refresh_rejection(status: StatusCode, body: &str) -> AuthError {
    let backend = BackendError::from_response(status.as_u16(), body);
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AuthError::SessionInvalid(backend.to_string())
        }
        status if status.is_server_error() => AuthError::Backend(backend),
        _ => AuthError::TokenRefresh(backend.to_string()),
    }
}

pub struct SupabaseIdentity {
    http: Client,
    base_url: String,
    publishable_key: String,
    vault: SessionVault,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseIdentity {
    /// Build a client for the configured project. The configuration is not
    /// validated here; call [`Config::validate`] first when it must be usable.
    pub fn new(config: &Config, vault: SessionVault) -> Self {
        Self::with_client(config, vault, Client::new())
    }

    pub fn with_client(config: &Config, vault: SessionVault, http: Client) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            http,
            base_url: config.supabase_base_url(),
            publishable_key: config.supabase_publishable_key.clone(),
            vault,
            events,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Take on a session the server has just issued and announce it.
    ///
    /// The server has already rotated the tokens, so a failed local write is
    /// logged and the session is still returned. The stale copy is dropped so
    /// a later load cannot bring back the revoked refresh token.
    fn adopt(&self, tokens: TokenResponse, event: fn(Session) -> AuthEvent) -> Session {
        let session = tokens.into_session(now_epoch_secs());
        if let Err(e) = self.vault.save_session(&StoredSession::from(&session)) {
            warn!(user_id = %session.user.id, error = %e, "Failed to persist session, keeping it in memory");
            if let Err(e) = self.vault.clear_session() {
                warn!(error = %e, "Failed to clear stale persisted session");
            }
        }
        self.emit(event(session.clone()));
        session
    }

    async fn request_token<B: Serialize + ?Sized>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = self.endpoint(&format!("token?grant_type={grant_type}"));
        debug!(url = %url, "Requesting token");
        self.http
            .post(&url)
            .header("apikey", &self.publishable_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let response = self
            .request_token("password", &PasswordRequest { email, password })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let backend = BackendError::from_response(status.as_u16(), &body);
            warn!(status = %status, "Sign-in failed");
            return Err(if status.is_client_error() {
                AuthError::InvalidCredentials(backend.to_string())
            } else {
                AuthError::Backend(backend)
            });
        }

        let tokens = response.json::<TokenResponse>().await?;
        let session = self.adopt(tokens, AuthEvent::SignedIn);

        info!(user_id = %session.user.id, "Signed in");
        Ok(session)
    }

    /// Fetch the user behind an access token, verifying it server-side.
    pub async fn get_user(&self, access_token: &str) -> AuthResult<User> {
        let response = self
            .http
            .get(self.endpoint("user"))
            .header("apikey", &self.publishable_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Backend(BackendError::from_response(
                status.as_u16(),
                &body,
            )));
        }

        let user: UserResponse = response.json().await?;
        Ok(user.into())
    }

    fn clear_local(&self) -> AuthResult<()> {
        self.vault.clear_session()?;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }
}

#[async_trait]
impl IdentityBackend for SupabaseIdentity {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        Ok(self.vault.load_session()?.map(Session::from))
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session> {
        let response = self
            .request_token("refresh_token", &RefreshRequest { refresh_token })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token refresh rejected");
            let error = refresh_rejection(status, &body);
            if matches!(error, AuthError::SessionInvalid(_)) {
                self.clear_local()?;
            }
            return Err(error);
        }

        let tokens = response.json::<TokenResponse>().await?;
        let session = self.adopt(tokens, AuthEvent::TokenRefreshed);

        info!(user_id = %session.user.id, "Token refreshed");
        Ok(session)
    }

    async fn sign_out(&self, access_token: Option<&str>) -> AuthResult<()> {
        let remote = match access_token {
            Some(token) => self
                .http
                .post(self.endpoint("logout"))
                .header("apikey", &self.publishable_key)
                .bearer_auth(token)
                .send()
                .await
                .map_err(AuthError::from)
                .and_then(|response| {
                    let status = response.status();
                    // An already invalid token is as good as revoked
                    if status.is_success()
                        || status == StatusCode::UNAUTHORIZED
                        || status == StatusCode::NOT_FOUND
                    {
                        Ok(())
                    } else {
                        Err(AuthError::Backend(BackendError::from_response(
                            status.as_u16(),
                            "",
                        )))
                    }
                }),
            None => Ok(()),
        };

        self.clear_local()?;
        remote
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
