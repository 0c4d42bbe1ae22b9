//! Proactive session validation before backend calls.

use crate::store::now_epoch_secs;
use crate::SessionStore;
use tracing::{debug, info};

impl SessionStore {
    /// Make a best effort to hold a session that will not expire imminently.
    ///
    /// Fails closed: no session, or a session without a known expiry, yields
    /// `false`. A session inside the refresh threshold is refreshed and the
    /// refresh outcome is returned.
    pub async fn ensure_valid_session(&self) -> bool {
        self.wait_for_verification().await;

        let Some(session) = self.current_session() else {
            debug!("No session held");
            return false;
        };

        let Some(remaining) = session.seconds_until_expiry(now_epoch_secs()) else {
            debug!(user_id = %session.user.id, "Session has no expiry, treating as invalid");
            return false;
        };

        let threshold = i64::try_from(self.policy().refresh_threshold.as_secs()).unwrap_or(i64::MAX);
        if remaining < threshold {
            info!(remaining_secs = remaining, "Session close to expiry, refreshing");
            return self.refresh_session().await;
        }

        true
    }
}
