//! Scripted identity backend for unit tests.

use crate::store::now_epoch_secs;
use crate::{AuthError, AuthEvent, AuthResult, IdentityBackend, Session, User};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// A session for `user-1` whose access token expires `secs` from now.
pub fn session_expiring_in(secs: i64) -> Session {
    Session {
        access_token: format!("access-{secs}"),
        refresh_token: "refresh-0".to_string(),
        expires_at: Some(now_epoch_secs() + secs),
        user: User {
            id: "user-1".to_string(),
            email: Some("ana@example.com".to_string()),
        },
    }
}

/// In-memory [`IdentityBackend`] that counts calls.
///
/// Refreshes pop scripted results in order; once the script is empty they
/// succeed with a fresh one-hour session.
pub struct MockIdentity {
    session: Mutex<Option<Session>>,
    refresh_script: Mutex<VecDeque<AuthResult<Session>>>,
    refresh_delay: Mutex<Duration>,
    last_refresh_token: Mutex<Option<String>>,
    fail_get_session: AtomicBool,
    fail_sign_out: AtomicBool,
    get_session_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    events: broadcast::Sender<AuthEvent>,
}

impl MockIdentity {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session: Mutex::new(None),
            refresh_script: Mutex::new(VecDeque::new()),
            refresh_delay: Mutex::new(Duration::ZERO),
            last_refresh_token: Mutex::new(None),
            fail_get_session: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            get_session_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            events,
        }
    }

    pub fn with_session(self, session: Session) -> Self {
        *self.session.lock().unwrap() = Some(session);
        self
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap() = session;
    }

    pub fn push_refresh(&self, result: AuthResult<Session>) {
        self.refresh_script.lock().unwrap().push_back(result);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn fail_get_session(&self, fail: bool) {
        self.fail_get_session.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn get_session_calls(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().unwrap().clone()
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityBackend for MockIdentity {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get_session.load(Ordering::SeqCst) {
            return Err(AuthError::NetworkUnavailable);
        }
        Ok(self.session.lock().unwrap().clone())
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_string());

        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.refresh_script.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| {
            let mut session = session_expiring_in(3600);
            session.access_token = format!("access-refreshed-{call}");
            session.refresh_token = format!("refresh-{call}");
            Ok(session)
        });

        if let Ok(session) = &result {
            self.set_session(Some(session.clone()));
        }
        result
    }

    async fn sign_out(&self, _access_token: Option<&str>) -> AuthResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.set_session(None);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::NetworkUnavailable);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
