//! One-shot health check of configuration, session and backend reachability.

use crate::store::now_epoch_secs;
use crate::{BackendError, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_and_utils::Config;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// A cheap read proving the backend answers.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, access_token: Option<&str>) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetails {
    pub config_present: bool,
    pub session_fetched: bool,
    pub session_present: bool,
    pub session_expires_at: Option<i64>,
    pub session_expired: bool,
    pub connectivity: bool,
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub is_healthy: bool,
    pub error: Option<String>,
    pub details: HealthDetails,
}

pub struct HealthCheck {
    config_error: Option<String>,
    store: SessionStore,
    probe: Arc<dyn ConnectivityProbe>,
    timeout: Duration,
}

impl HealthCheck {
    pub fn new(
        config: &Config,
        store: SessionStore,
        probe: Arc<dyn ConnectivityProbe>,
        timeout: Duration,
    ) -> Self {
        Self {
            config_error: config.validate().err().map(|e| e.to_string()),
            store,
            probe,
            timeout,
        }
    }

    /// Run every step in order. Failures are reported, never returned.
    pub async fn run(&self) -> HealthReport {
        let mut details = HealthDetails {
            config_present: self.config_error.is_none(),
            session_fetched: false,
            session_present: false,
            session_expires_at: None,
            session_expired: false,
            connectivity: false,
            latency_ms: None,
            checked_at: Utc::now(),
        };

        if let Some(reason) = &self.config_error {
            warn!(reason = %reason, "Health check: configuration missing");
            return HealthReport {
                is_healthy: false,
                error: Some(format!("configuration missing: {reason}")),
                details,
            };
        }

        let session = match timeout(self.timeout, self.store.fetch_session()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return failed(details, format!("session check failed: {e}")),
            Err(_) => return failed(details, "session check timed out".to_string()),
        };
        details.session_fetched = true;

        let mut error = None;
        match &session {
            Some(session) => {
                details.session_present = true;
                details.session_expires_at = session.expires_at;
                details.session_expired = session.is_expired(now_epoch_secs());
                if details.session_expired {
                    error = Some("session expired".to_string());
                }
            }
            None => error = Some("no active session".to_string()),
        }

        let access_token = session.as_ref().map(|s| s.access_token.as_str());
        let started = Instant::now();
        let probe_error = match timeout(self.timeout, self.probe.probe(access_token)).await {
            Ok(Ok(())) => {
                details.connectivity = true;
                details.latency_ms = Some(started.elapsed().as_millis() as u64);
                None
            }
            Ok(Err(e)) => Some(format!("connectivity check failed: {e}")),
            Err(_) => Some("connectivity check timed out".to_string()),
        };
        // The session problem, if any, is reported first
        let error = error.or(probe_error);

        let report = HealthReport {
            is_healthy: error.is_none(),
            error,
            details,
        };
        if report.is_healthy {
            info!(latency_ms = ?report.details.latency_ms, "Health check passed");
        } else {
            debug!(error = ?report.error, "Health check failed");
        }
        report
    }
}

fn failed(details: HealthDetails, error: String) -> HealthReport {
    warn!(error = %error, "Health check failed");
    HealthReport {
        is_healthy: false,
        error: Some(error),
        details,
    }
}
