//! Authenticated-session resilience for Supabase-backed clients.
//!
//! This crate provides:
//! - A process-wide [`SessionStore`] with single-flight token refresh
//! - A proactive session guard ([`SessionStore::ensure_valid_session`])
//! - An auth-error classifier ([`is_auth_error`])
//! - Retry wrappers: [`with_auth_retry`] and the timeout/backoff [`safe_query`]
//! - A one-shot [`HealthCheck`]
//! - A [`VisibilityMonitor`] reacting to the app regaining the foreground
//! - Supabase identity ([`SupabaseIdentity`]) and PostgREST ([`SupabaseRest`]) clients
//! - An explicit FSM for the store's session state

mod backend_error;
mod classify;
mod error;
mod guard;
mod health;
mod identity;
mod messages;
mod rest;
mod retry;
mod safe_query;
mod session;
mod session_fsm;
mod store;
mod supabase_identity;
mod visibility;

#[cfg(test)]
mod testing;

pub use backend_error::{BackendError, BackendResponse};
pub use classify::{is_auth_error, Classify, ErrorShape, AUTH_ERROR_CODES, AUTH_MESSAGE_MARKERS};
pub use error::{AuthError, AuthResult};
pub use health::{ConnectivityProbe, HealthCheck, HealthDetails, HealthReport};
pub use identity::IdentityBackend;
pub use messages::{
    Notice, REQUEST_FAILED_NOTICE, REQUEST_TIMEOUT_NOTICE, SESSION_EXPIRED_MESSAGE,
    SESSION_EXPIRED_NOTICE,
};
pub use rest::SupabaseRest;
pub use retry::{with_auth_retry, RetryError};
pub use safe_query::{safe_query, SafeQueryConfig, SafeQueryError};
pub use session::{AuthEvent, Session, User};
pub use session_fsm::session_machine;
pub use session_fsm::{RefreshConfig, SessionMachine, SessionMachineInput, SessionMachineState, SessionState};
pub use store::{AuthSnapshot, SessionStore, StorePolicy};
pub use supabase_identity::SupabaseIdentity;
pub use visibility::{Navigator, Visibility, VisibilityMonitor, VisibilityOutcome, LOGIN_ROUTE};
