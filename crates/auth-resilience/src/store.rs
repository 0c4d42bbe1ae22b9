//! The process-wide session store.
//!
//! All writes to the current session go through [`SessionStore::set_session`]
//! or the refresh/load paths, which share one single-flight slot: while a
//! refresh or load is running, every other caller awaits the same shared
//! future instead of starting its own. The work runs on its own task, so it
//! finishes and clears the slot even when every caller has stopped waiting.

use crate::session_fsm::{RefreshConfig, SessionMachine, SessionMachineInput, SessionState};
use crate::{AuthEvent, AuthResult, IdentityBackend, Session, User};
use config_and_utils::ResilienceSettings;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Verification = Shared<BoxFuture<'static, bool>>;

/// Timing policy for the store and its guard.
#[derive(Debug, Clone)]
pub struct StorePolicy {
    /// The guard refreshes when less than this remains before expiry.
    pub refresh_threshold: Duration,
    /// Backoff for transient failures within one refresh.
    pub refresh: RefreshConfig,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::from_secs(120),
            refresh: RefreshConfig::default(),
        }
    }
}

impl StorePolicy {
    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        Self {
            refresh_threshold: settings.refresh_threshold(),
            refresh: RefreshConfig {
                max_retries: settings.refresh_max_retries,
                initial_delay_ms: settings.refresh_initial_delay_ms,
                max_delay_ms: settings.refresh_max_delay_ms,
            },
        }
    }
}

/// What subscribers see: the current user and session plus the FSM state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub state: SessionState,
}

impl AuthSnapshot {
    fn signed_out() -> Self {
        Self {
            user: None,
            session: None,
            state: SessionState::SignedOut,
        }
    }
}

struct StoreInner {
    backend: Arc<dyn IdentityBackend>,
    policy: StorePolicy,
    snapshot: watch::Sender<AuthSnapshot>,
    fsm: Mutex<SessionMachine>,
    in_flight: Mutex<Option<Verification>>,
}

/// Shared handle to the session state. Cloning is cheap.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SessionStore {
    pub fn new(backend: Arc<dyn IdentityBackend>, policy: StorePolicy) -> Self {
        let (snapshot, _) = watch::channel(AuthSnapshot::signed_out());
        Self {
            inner: Arc::new(StoreInner {
                backend,
                policy,
                snapshot,
                fsm: Mutex::new(SessionMachine::new()),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn IdentityBackend> {
        &self.inner.backend
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.inner.policy
    }

    /// Current user and session. Never waits on network work.
    pub fn get_state(&self) -> AuthSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.snapshot.borrow().session.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.snapshot.borrow().state
    }

    /// Receive every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Replace the session (and derived user) in one step.
    pub fn set_session(&self, session: Option<Session>) {
        let input = if session.is_some() {
            SessionMachineInput::SessionLoaded
        } else {
            SessionMachineInput::SignOutCompleted
        };
        self.apply(session, input);
    }

    /// Returns true while a refresh or load is outstanding.
    pub fn is_verifying(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    /// Wait for an outstanding refresh or load, if any.
    pub async fn wait_for_verification(&self) {
        let pending = lock(&self.inner.in_flight).clone();
        if let Some(pending) = pending {
            pending.await;
        }
    }

    /// Renew the session using its refresh token.
    ///
    /// Concurrent callers share one backend refresh and all receive its
    /// result. On failure the session is cleared.
    pub async fn refresh_session(&self) -> bool {
        self.single_flight(|store| async move { store.run_refresh().await })
            .await
    }

    /// Load the session the identity backend already holds.
    pub async fn initialize(&self) -> bool {
        self.single_flight(|store| async move { store.run_load().await })
            .await
    }

    /// Fetch the backend's current session without touching the store.
    pub async fn fetch_session(&self) -> AuthResult<Option<Session>> {
        self.inner.backend.get_session().await
    }

    /// Sign out. Local state is cleared even if the backend call fails.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let access_token = self.current_session().map(|s| s.access_token);
        let result = self.inner.backend.sign_out(access_token.as_deref()).await;
        if let Err(e) = &result {
            warn!(error = %e, "Backend sign-out failed, clearing local session anyway");
        }
        self.apply(None, SessionMachineInput::SignOutCompleted);
        info!("Signed out");
        result
    }

    /// Apply an auth-state change announced by the identity backend.
    pub fn apply_event(&self, event: AuthEvent) {
        debug!(event = event.name(), "Applying auth event");
        match event {
            AuthEvent::InitialSession(Some(session)) | AuthEvent::TokenRefreshed(session) => {
                self.apply(Some(session), SessionMachineInput::SessionLoaded)
            }
            AuthEvent::InitialSession(None) => self.apply(None, SessionMachineInput::NoSession),
            AuthEvent::SignedIn(session) => {
                self.apply(Some(session), SessionMachineInput::SignInCompleted)
            }
            AuthEvent::UserUpdated(user) => {
                if let Some(mut session) = self.current_session() {
                    session.user = user;
                    self.apply(Some(session), SessionMachineInput::SessionLoaded);
                }
            }
            AuthEvent::SignedOut => self.apply(None, SessionMachineInput::SignOutCompleted),
        }
    }

    /// Follow the backend's auth events until its channel closes.
    pub fn listen(&self) -> JoinHandle<()> {
        let mut events = self.inner.backend.subscribe();
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => store.apply_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed auth events, reloading session");
                        store.initialize().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Auth event channel closed");
                        break;
                    }
                }
            }
        })
    }

    async fn single_flight<F, Fut>(&self, make: F) -> bool
    where
        F: FnOnce(SessionStore) -> Fut,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let pending = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining verification already in flight");
                    existing.clone()
                }
                None => {
                    let store = self.clone();
                    let work = make(self.clone());
                    // Runs to completion even if every waiter is dropped
                    let handle = tokio::spawn(async move {
                        let result = match AssertUnwindSafe(work).catch_unwind().await {
                            Ok(result) => result,
                            Err(_) => {
                                warn!("Session verification panicked");
                                false
                            }
                        };
                        lock(&store.inner.in_flight).take();
                        result
                    });
                    let shared = async move { handle.await.unwrap_or(false) }
                        .boxed()
                        .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        pending.await
    }

    async fn run_load(&self) -> bool {
        self.transition(SessionMachineInput::LoadStarted);
        match self.inner.backend.get_session().await {
            Ok(Some(session)) => {
                info!(user_id = %session.user.id, "Session loaded");
                self.apply(Some(session), SessionMachineInput::SessionLoaded);
                true
            }
            Ok(None) => {
                debug!("No session to load");
                self.apply(None, SessionMachineInput::NoSession);
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to load session");
                self.apply(None, SessionMachineInput::NoSession);
                false
            }
        }
    }

    async fn run_refresh(&self) -> bool {
        let refresh_token = match self.current_session() {
            Some(session) if session.has_refresh_token() => session.refresh_token,
            _ => {
                debug!("No refresh token, cannot refresh");
                self.apply(None, SessionMachineInput::SignOutCompleted);
                return false;
            }
        };

        self.transition(SessionMachineInput::RefreshStarted);

        let config = &self.inner.policy.refresh;
        let attempts = config.max_retries.max(1);

        for attempt in 0..attempts {
            match self.inner.backend.refresh_session(&refresh_token).await {
                Ok(session) => {
                    info!(user_id = %session.user.id, "Session refreshed");
                    self.apply(Some(session), SessionMachineInput::RefreshSucceeded);
                    return true;
                }
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    self.transition(SessionMachineInput::RefreshRetry);
                    let delay = config.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Refresh failed with transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Session refresh failed");
                    break;
                }
            }
        }

        self.apply(None, SessionMachineInput::RefreshFailed);
        false
    }

    /// Move the FSM without changing the session.
    fn transition(&self, input: SessionMachineInput) {
        let state = {
            let mut fsm = lock(&self.inner.fsm);
            if fsm.consume(&input).is_err() {
                debug!(input = ?input, state = ?fsm.state(), "Ignoring session transition");
            }
            SessionState::from(fsm.state())
        };
        self.inner.snapshot.send_if_modified(|snapshot| {
            let changed = snapshot.state != state;
            snapshot.state = state;
            changed
        });
    }

    /// Move the FSM and replace the session together.
    ///
    /// Backend events can move the machine behind our back, so an input that
    /// is not valid from the current state falls back to whichever input
    /// matches the new session.
    fn apply(&self, session: Option<Session>, input: SessionMachineInput) {
        let state = {
            let mut fsm = lock(&self.inner.fsm);
            if fsm.consume(&input).is_err() {
                let fallback = if session.is_some() {
                    SessionMachineInput::SessionLoaded
                } else {
                    SessionMachineInput::SignOutCompleted
                };
                debug!(input = ?input, state = ?fsm.state(), "Resyncing session state");
                let _ = fsm.consume(&fallback);
            }
            SessionState::from(fsm.state())
        };

        let user = session.as_ref().map(|s| s.user.clone());
        let previous = self.inner.snapshot.send_replace(AuthSnapshot {
            user,
            session,
            state,
        });
        if previous.state != state {
            debug!(old_state = ?previous.state, new_state = ?state, "Session state transition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{session_expiring_in, MockIdentity};
    use crate::AuthError;

    fn store_with(mock: &Arc<MockIdentity>) -> SessionStore {
        SessionStore::new(mock.clone(), StorePolicy::default())
    }

    #[test]
    fn test_initial_state_is_signed_out() {
        let store = store_with(&Arc::new(MockIdentity::new()));
        let snapshot = store.get_state();
        assert_eq!(snapshot.session, None);
        assert_eq!(snapshot.user, None);
        assert_eq!(snapshot.state, SessionState::SignedOut);
    }

    #[test]
    fn test_set_session_updates_user_and_state() {
        let store = store_with(&Arc::new(MockIdentity::new()));
        let session = session_expiring_in(3600);

        store.set_session(Some(session.clone()));
        let snapshot = store.get_state();
        assert_eq!(snapshot.user, Some(session.user.clone()));
        assert_eq!(snapshot.session, Some(session));
        assert_eq!(snapshot.state, SessionState::SignedIn);

        store.set_session(None);
        let snapshot = store.get_state();
        assert_eq!(snapshot.user, None);
        assert_eq!(snapshot.state, SessionState::SignedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_backend_call() {
        let mock = Arc::new(MockIdentity::new());
        mock.set_refresh_delay(Duration::from_millis(200));
        let store = store_with(&mock);
        store.set_session(Some(session_expiring_in(30)));

        let (first, second) = tokio::join!(store.refresh_session(), store.refresh_session());

        assert!(first);
        assert!(second);
        assert_eq!(mock.refresh_calls(), 1);
        assert!(!store.is_verifying());
    }

    #[tokio::test]
    async fn test_refresh_success_replaces_session() {
        let mock = Arc::new(MockIdentity::new());
        let store = store_with(&mock);
        let old = session_expiring_in(30);
        store.set_session(Some(old.clone()));

        assert!(store.refresh_session().await);

        let snapshot = store.get_state();
        let new = snapshot.session.unwrap();
        assert_ne!(new.access_token, old.access_token);
        assert_eq!(snapshot.user, Some(new.user.clone()));
        assert_eq!(snapshot.state, SessionState::SignedIn);
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_session_and_slot() {
        let mock = Arc::new(MockIdentity::new());
        mock.push_refresh(Err(AuthError::SessionInvalid("revoked".to_string())));
        let store = store_with(&mock);
        store.set_session(Some(session_expiring_in(30)));

        assert!(!store.refresh_session().await);
        assert_eq!(store.current_session(), None);
        assert_eq!(store.state(), SessionState::SignedOut);
        assert!(!store.is_verifying());

        // A later refresh is not wedged by the failed one
        store.set_session(Some(session_expiring_in(30)));
        assert!(store.refresh_session().await);
        assert_eq!(mock.refresh_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_finishes_after_waiter_is_dropped() {
        let mock = Arc::new(MockIdentity::new());
        mock.set_refresh_delay(Duration::from_secs(1));
        let store = store_with(&mock);
        store.set_session(Some(session_expiring_in(30)));

        let waited =
            tokio::time::timeout(Duration::from_millis(100), store.refresh_session()).await;
        assert!(waited.is_err());
        assert!(store.is_verifying());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!store.is_verifying());
        assert_eq!(store.state(), SessionState::SignedIn);
        assert_eq!(
            store.current_session().map(|s| s.access_token),
            Some("access-refreshed-1".to_string())
        );
        assert_eq!(mock.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_store_is_released_after_refresh() {
        let mock = Arc::new(MockIdentity::new());
        let store = store_with(&mock);
        store.set_session(Some(session_expiring_in(30)));
        assert!(store.refresh_session().await);

        let weak = Arc::downgrade(&store.inner);
        drop(store);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_refresh_errors_are_retried() {
        let mock = Arc::new(MockIdentity::new());
        mock.push_refresh(Err(AuthError::NetworkUnavailable));
        mock.push_refresh(Err(AuthError::Timeout));
        let store = store_with(&mock);
        store.set_session(Some(session_expiring_in(30)));

        let started = tokio::time::Instant::now();
        assert!(store.refresh_session().await);
        assert_eq!(mock.refresh_calls(), 3);
        // 500ms + 1000ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_refresh_errors_exhaust() {
        let mock = Arc::new(MockIdentity::new());
        for _ in 0..3 {
            mock.push_refresh(Err(AuthError::NetworkUnavailable));
        }
        let store = store_with(&mock);
        store.set_session(Some(session_expiring_in(30)));

        assert!(!store.refresh_session().await);
        assert_eq!(mock.refresh_calls(), 3);
        assert_eq!(store.current_session(), None);
    }

    #[tokio::test]
    async fn test_refresh_without_session_does_not_call_backend() {
        let mock = Arc::new(MockIdentity::new());
        let store = store_with(&mock);

        assert!(!store.refresh_session().await);
        assert_eq!(mock.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_initialize_loads_backend_session() {
        let session = session_expiring_in(3600);
        let mock = Arc::new(MockIdentity::new().with_session(session.clone()));
        let store = store_with(&mock);

        assert!(store.initialize().await);
        assert_eq!(store.current_session(), Some(session));
        assert_eq!(store.state(), SessionState::SignedIn);
    }

    #[tokio::test]
    async fn test_initialize_without_session() {
        let mock = Arc::new(MockIdentity::new());
        let store = store_with(&mock);

        assert!(!store.initialize().await);
        assert_eq!(store.state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn test_initialize_backend_error_leaves_signed_out() {
        let mock = Arc::new(MockIdentity::new().with_session(session_expiring_in(3600)));
        mock.fail_get_session(true);
        let store = store_with(&mock);

        assert!(!store.initialize().await);
        assert_eq!(store.current_session(), None);
    }

    #[tokio::test]
    async fn test_sign_out_clears_state_even_on_backend_error() {
        let mock = Arc::new(MockIdentity::new());
        mock.fail_sign_out(true);
        let store = store_with(&mock);
        store.set_session(Some(session_expiring_in(3600)));

        assert!(store.sign_out().await.is_err());
        assert_eq!(store.current_session(), None);
        assert_eq!(mock.sign_out_calls(), 1);
    }

    #[test]
    fn test_apply_events() {
        let store = store_with(&Arc::new(MockIdentity::new()));
        let session = session_expiring_in(3600);

        store.apply_event(AuthEvent::SignedIn(session.clone()));
        assert_eq!(store.state(), SessionState::SignedIn);

        let user = User {
            id: session.user.id.clone(),
            email: Some("new@example.com".to_string()),
        };
        store.apply_event(AuthEvent::UserUpdated(user.clone()));
        assert_eq!(store.get_state().user, Some(user));

        store.apply_event(AuthEvent::SignedOut);
        assert_eq!(store.current_session(), None);

        // A user update without a session is ignored
        store.apply_event(AuthEvent::UserUpdated(session.user.clone()));
        assert_eq!(store.get_state().user, None);
    }

    #[tokio::test]
    async fn test_listen_follows_backend_events() {
        let mock = Arc::new(MockIdentity::new());
        let store = store_with(&mock);
        let mut updates = store.subscribe();
        let handle = store.listen();

        let session = session_expiring_in(3600);
        mock.emit(AuthEvent::TokenRefreshed(session.clone()));

        tokio::time::timeout(Duration::from_secs(1), updates.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.current_session(), Some(session));

        handle.abort();
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = ResilienceSettings {
            refresh_threshold_secs: 30,
            refresh_max_retries: 5,
            ..ResilienceSettings::default()
        };
        let policy = StorePolicy::from_settings(&settings);
        assert_eq!(policy.refresh_threshold, Duration::from_secs(30));
        assert_eq!(policy.refresh.max_retries, 5);
        assert_eq!(policy.refresh.initial_delay_ms, 500);
    }
}
