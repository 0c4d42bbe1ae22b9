//! Running a backend call with one transparent session refresh on auth failure.

use crate::classify::{is_auth_error, Classify};
use crate::{SessionStore, SESSION_EXPIRED_MESSAGE};
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of an auth-retried operation.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// No usable session could be obtained; the user must log in again.
    #[error("{}", SESSION_EXPIRED_MESSAGE)]
    SessionExpired,

    /// The operation failed for a reason other than authentication.
    #[error("{0}")]
    Operation(E),
}

impl<E> RetryError<E> {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, RetryError::SessionExpired)
    }

    /// The operation's own error, if that is what ended the call.
    pub fn into_operation(self) -> Option<E> {
        match self {
            RetryError::Operation(e) => Some(e),
            RetryError::SessionExpired => None,
        }
    }
}

impl<E: Classify> Classify for RetryError<E> {
    fn shape(&self) -> crate::ErrorShape {
        match self {
            RetryError::SessionExpired => crate::ErrorShape::new().with_message(SESSION_EXPIRED_MESSAGE),
            RetryError::Operation(e) => e.shape(),
        }
    }

    fn auth_verdict(&self) -> Option<bool> {
        match self {
            RetryError::SessionExpired => Some(true),
            RetryError::Operation(e) => e.auth_verdict(),
        }
    }
}

/// Run `op`, refreshing the session and retrying when it fails with an auth error.
///
/// The session is checked once up front. Non-auth errors are returned
/// unchanged on first occurrence. Auth errors trigger a refresh and an
/// immediate retry, at most `max_retries` times; after that, or when a
/// refresh fails, the call ends with [`RetryError::SessionExpired`].
pub async fn with_auth_retry<T, E, F, Fut>(
    store: &SessionStore,
    max_retries: u32,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    if !store.ensure_valid_session().await {
        warn!("No valid session before request");
        return Err(RetryError::SessionExpired);
    }

    let mut attempt = 0;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_auth_error(&error) {
            return Err(RetryError::Operation(error));
        }

        if attempt >= max_retries {
            warn!(
                attempts = attempt + 1,
                error = %error.shape(),
                "Auth error persisted after refresh"
            );
            return Err(RetryError::SessionExpired);
        }

        attempt += 1;
        debug!(attempt, max_retries, error = %error.shape(), "Auth error, refreshing session");

        if !store.refresh_session().await {
            warn!("Session refresh failed");
            return Err(RetryError::SessionExpired);
        }
    }
}
