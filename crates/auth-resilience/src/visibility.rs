//! Re-validating the session when the application returns to the foreground.

use crate::messages::{Notice, SESSION_EXPIRED_NOTICE};
use crate::store::now_epoch_secs;
use crate::SessionStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Route shown when the user has to sign in again.
pub const LOGIN_ROUTE: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hidden" => Ok(Visibility::Hidden),
            "visible" => Ok(Visibility::Visible),
            other => Err(format!("unknown visibility state: {other}")),
        }
    }
}

/// Host side effects the monitor can trigger.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
    fn notify(&self, notice: &Notice);
}

/// What handling one visibility signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityOutcome {
    /// Not a hidden-to-visible edge.
    Ignored,
    SessionValid,
    Refreshed,
    RedirectedToLogin,
    /// The session could not be fetched; nothing was changed.
    FetchFailed,
}

pub struct VisibilityMonitor {
    store: SessionStore,
    navigator: Arc<dyn Navigator>,
    refresh_window: Duration,
    last: Mutex<Visibility>,
}

impl VisibilityMonitor {
    pub fn new(store: SessionStore, navigator: Arc<dyn Navigator>, refresh_window: Duration) -> Self {
        Self {
            store,
            navigator,
            refresh_window,
            last: Mutex::new(Visibility::Visible),
        }
    }

    /// React to a visibility signal. Only the hidden-to-visible edge does work.
    pub async fn handle(&self, visibility: Visibility) -> VisibilityOutcome {
        let previous = {
            let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *last, visibility)
        };

        if previous != Visibility::Hidden || visibility != Visibility::Visible {
            return VisibilityOutcome::Ignored;
        }

        debug!("Application visible again, checking session");

        let session = match self.store.fetch_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Could not fetch session after regaining visibility");
                return VisibilityOutcome::FetchFailed;
            }
        };

        let Some(session) = session else {
            info!("No session after regaining visibility");
            return self.redirect_to_login();
        };

        // Refresh below uses the store's tokens, so they must match the backend's
        if self.store.current_session().as_ref() != Some(&session) {
            debug!(user_id = %session.user.id, "Syncing store with backend session");
            self.store.set_session(Some(session.clone()));
        }

        let window = i64::try_from(self.refresh_window.as_secs()).unwrap_or(i64::MAX);
        let needs_refresh = session
            .seconds_until_expiry(now_epoch_secs())
            .map_or(true, |remaining| remaining < window);

        if !needs_refresh {
            return VisibilityOutcome::SessionValid;
        }

        info!(user_id = %session.user.id, "Session close to expiry after regaining visibility, refreshing");
        if self.store.refresh_session().await {
            VisibilityOutcome::Refreshed
        } else {
            self.redirect_to_login()
        }
    }

    fn redirect_to_login(&self) -> VisibilityOutcome {
        self.navigator.notify(&SESSION_EXPIRED_NOTICE);
        self.navigator.navigate(LOGIN_ROUTE);
        VisibilityOutcome::RedirectedToLogin
    }

    /// Handle every change published on `signals` until the sender is dropped.
    pub fn spawn(self: Arc<Self>, mut signals: watch::Receiver<Visibility>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while signals.changed().await.is_ok() {
                let visibility = *signals.borrow_and_update();
                let outcome = self.handle(visibility).await;
                debug!(?visibility, ?outcome, "Handled visibility change");
            }
        })
    }
}
