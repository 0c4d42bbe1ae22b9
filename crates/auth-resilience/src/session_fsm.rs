//! Session state machine using rust-fsm.
//!
//! The store drives this machine on every write so its published state is
//! always derived from explicit transitions.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐  LoadStarted   ┌─────────────────┐
//! │    SignedOut    │ ─────────────► │     Loading     │
//! │    (initial)    │ ◄───────────── │                 │
//! └────────┬────────┘   NoSession    └────────┬────────┘
//!          │                                  │
//!          │ SignInCompleted / SessionLoaded  │ SessionLoaded
//!          ▼                                  ▼
//! ┌─────────────────┐ RefreshStarted ┌─────────────────┐
//! │    SignedIn     │ ─────────────► │   Refreshing    │ ◄─┐ RefreshRetry
//! │                 │ ◄───────────── │                 │ ──┘
//! └────────┬────────┘ RefreshSucceeded└────────┬───────┘
//!          │                                  │
//!          │ SignOutCompleted                 │ RefreshFailed / SignOutCompleted
//!          ▼                                  ▼
//!     SignedOut                          SignedOut
//! ```
//!
//! `SessionLoaded` and `SignOutCompleted` are accepted in every state; the
//! store falls back to them when an externally delivered auth event has
//! already moved the machine.

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(SignedOut)

    SignedOut => {
        LoadStarted => Loading,
        SessionLoaded => SignedIn,
        SignInCompleted => SignedIn,
        SignOutCompleted => SignedOut
    },
    Loading => {
        SessionLoaded => SignedIn,
        SignInCompleted => SignedIn,
        NoSession => SignedOut,
        RefreshStarted => Refreshing,
        SignOutCompleted => SignedOut
    },
    SignedIn => {
        LoadStarted => Loading,
        SessionLoaded => SignedIn,
        SignInCompleted => SignedIn,
        RefreshStarted => Refreshing,
        NoSession => SignedOut,
        SignOutCompleted => SignedOut
    },
    Refreshing => {
        RefreshRetry => Refreshing,
        RefreshSucceeded => SignedIn,
        RefreshFailed => SignedOut,
        SessionLoaded => SignedIn,
        SignOutCompleted => SignedOut
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session.
    SignedOut,
    /// Loading the persisted session.
    Loading,
    /// Holding a session.
    SignedIn,
    /// Exchanging the refresh token for a new session.
    Refreshing,
}

impl SessionState {
    /// Returns true while a session is held (including mid-refresh).
    pub fn has_session(&self) -> bool {
        matches!(self, SessionState::SignedIn | SessionState::Refreshing)
    }

    /// Returns true if the state is a transient/in-progress state.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionState::Loading | SessionState::Refreshing)
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::SignedOut => SessionState::SignedOut,
            SessionMachineState::Loading => SessionState::Loading,
            SessionMachineState::SignedIn => SessionState::SignedIn,
            SessionMachineState::Refreshing => SessionState::Refreshing,
        }
    }
}

/// Retry behavior for a single token refresh on transient failures.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in() -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionMachineInput::SignInCompleted).unwrap();
        machine
    }

    #[test]
    fn test_initial_state_is_signed_out() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::SignedOut);
    }

    #[test]
    fn test_load_flow_with_session() {
        let mut machine = SessionMachine::new();

        machine.consume(&SessionMachineInput::LoadStarted).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Loading);

        machine.consume(&SessionMachineInput::SessionLoaded).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SignedIn);
    }

    #[test]
    fn test_load_flow_without_session() {
        let mut machine = SessionMachine::new();

        machine.consume(&SessionMachineInput::LoadStarted).unwrap();
        machine.consume(&SessionMachineInput::NoSession).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SignedOut);
    }

    #[test]
    fn test_refresh_retry_then_success() {
        let mut machine = signed_in();

        machine.consume(&SessionMachineInput::RefreshStarted).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Refreshing);

        machine.consume(&SessionMachineInput::RefreshRetry).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Refreshing);

        machine.consume(&SessionMachineInput::RefreshSucceeded).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SignedIn);
    }

    #[test]
    fn test_refresh_failure_signs_out() {
        let mut machine = signed_in();

        machine.consume(&SessionMachineInput::RefreshStarted).unwrap();
        machine.consume(&SessionMachineInput::RefreshFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SignedOut);
    }

    #[test]
    fn test_invalid_transitions_return_error() {
        let mut machine = SessionMachine::new();

        // Nothing to refresh without a session
        assert!(machine.consume(&SessionMachineInput::RefreshStarted).is_err());
        assert!(machine.consume(&SessionMachineInput::RefreshSucceeded).is_err());

        let mut machine = signed_in();
        assert!(machine.consume(&SessionMachineInput::RefreshFailed).is_err());
    }

    #[test]
    fn test_fallback_inputs_accepted_everywhere() {
        for setup in [
            vec![],
            vec![SessionMachineInput::LoadStarted],
            vec![SessionMachineInput::SignInCompleted],
            vec![
                SessionMachineInput::SignInCompleted,
                SessionMachineInput::RefreshStarted,
            ],
        ] {
            for fallback in [
                SessionMachineInput::SessionLoaded,
                SessionMachineInput::SignOutCompleted,
            ] {
                let mut machine = SessionMachine::new();
                for input in &setup {
                    machine.consume(input).unwrap();
                }
                assert!(machine.consume(&fallback).is_ok());
            }
        }
    }

    #[test]
    fn test_session_state_conversion() {
        assert_eq!(
            SessionState::from(&SessionMachineState::SignedOut),
            SessionState::SignedOut
        );
        assert_eq!(
            SessionState::from(&SessionMachineState::Loading),
            SessionState::Loading
        );
        assert_eq!(
            SessionState::from(&SessionMachineState::SignedIn),
            SessionState::SignedIn
        );
        assert_eq!(
            SessionState::from(&SessionMachineState::Refreshing),
            SessionState::Refreshing
        );
    }

    #[test]
    fn test_session_state_flags() {
        assert!(!SessionState::SignedOut.has_session());
        assert!(SessionState::SignedIn.has_session());
        assert!(SessionState::Refreshing.has_session());
        assert!(SessionState::Loading.is_transient());
        assert!(SessionState::Refreshing.is_transient());
        assert!(!SessionState::SignedIn.is_transient());
    }

    #[test]
    fn test_refresh_config_delay_exponential_backoff() {
        let config = RefreshConfig::default();

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(5000));
        assert_eq!(config.delay_for_attempt(70), Duration::from_millis(5000));
    }
}
