//! Generic backend queries with a per-attempt timeout and exponential backoff.
//!
//! Each attempt runs [`with_auth_retry`] under [`tokio::time::timeout`]. A
//! timed-out attempt is dropped, which cancels the request it was awaiting.

use crate::classify::Classify;
use crate::messages::{Notice, REQUEST_FAILED_NOTICE, REQUEST_TIMEOUT_NOTICE, SESSION_EXPIRED_NOTICE};
use crate::retry::{with_auth_retry, RetryError};
use crate::{SessionStore, SESSION_EXPIRED_MESSAGE};
use config_and_utils::ResilienceSettings;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeQueryConfig {
    /// Limit for one attempt, including any auth refresh inside it.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each later one.
    pub base_delay: Duration,
    /// Auth-refresh retries within each attempt.
    pub auth_retries: u32,
}

impl Default for SafeQueryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            auth_retries: 1,
        }
    }
}

impl SafeQueryConfig {
    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        Self {
            timeout: settings.query_timeout(),
            max_retries: settings.query_max_retries,
            base_delay: settings.query_base_delay(),
            auth_retries: settings.auth_max_retries,
        }
    }

    /// Backoff before retry number `attempt + 1` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Error, Debug)]
pub enum SafeQueryError<E> {
    #[error("{}", SESSION_EXPIRED_MESSAGE)]
    SessionExpired,

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Operation(E),
}

impl<E> SafeQueryError<E> {
    /// The notification to show for this failure.
    pub fn notice(&self) -> Notice {
        match self {
            SafeQueryError::SessionExpired => SESSION_EXPIRED_NOTICE,
            SafeQueryError::Timeout(_) => REQUEST_TIMEOUT_NOTICE,
            SafeQueryError::Operation(_) => REQUEST_FAILED_NOTICE,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, SafeQueryError::SessionExpired)
    }
}

/// Run `op` with auth retry, a timeout per attempt and backoff between attempts.
///
/// Timeouts and operation errors are retried up to `config.max_retries`
/// times; the last one is returned. An expired session ends the call at once.
pub async fn safe_query<T, E, F, Fut>(
    store: &SessionStore,
    config: &SafeQueryConfig,
    mut op: F,
) -> Result<T, SafeQueryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    let mut attempt = 0;
    loop {
        let outcome = tokio::time::timeout(
            config.timeout,
            with_auth_retry(store, config.auth_retries, &mut op),
        )
        .await;

        let (error, reason) = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(RetryError::SessionExpired)) => return Err(SafeQueryError::SessionExpired),
            Ok(Err(RetryError::Operation(e))) => {
                let reason = e.shape().to_string();
                (SafeQueryError::Operation(e), reason)
            }
            Err(_) => (
                SafeQueryError::Timeout(config.timeout),
                "timed out".to_string(),
            ),
        };

        if attempt >= config.max_retries {
            warn!(attempts = attempt + 1, reason = %reason, "Query failed");
            return Err(error);
        }

        let delay = config.delay_for_attempt(attempt);
        debug!(
            attempt = attempt + 1,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Query failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
