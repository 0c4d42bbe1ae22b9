//! Deciding whether a failure means "your credential was rejected".
//!
//! Typed errors answer directly through [`Classify::auth_verdict`]. Anything
//! without a verdict is reduced to an [`ErrorShape`] and matched against
//! status codes, backend error codes and message fragments. The fragment
//! match is broad on purpose so that untyped errors lean towards a refresh.

use crate::{AuthError, BackendError};
use std::fmt;

/// Backend error codes that always mean an auth failure.
///
/// `PGRST301`/`PGRST302` are PostgREST JWT errors, `42501` is Postgres
/// "insufficient privilege" (RLS rejecting an anonymous role).
pub const AUTH_ERROR_CODES: &[&str] = &["PGRST301", "PGRST302", "42501"];

/// Lower-case message fragments that indicate an auth failure.
pub const AUTH_MESSAGE_MARKERS: &[&str] = &[
    "jwt",
    "token",
    "unauthorized",
    "not authenticated",
    "session",
    "expired",
];

/// The loosely typed view of an error: optional status, code and message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorShape {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ErrorShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The fallback rule: any one of status, code or message matching is enough.
    pub fn looks_like_auth(&self) -> bool {
        if matches!(self.status, Some(401) | Some(403)) {
            return true;
        }

        if self
            .code
            .as_deref()
            .is_some_and(|code| AUTH_ERROR_CODES.contains(&code))
        {
            return true;
        }

        self.message.as_deref().is_some_and(|message| {
            let message = message.to_lowercase();
            AUTH_MESSAGE_MARKERS
                .iter()
                .any(|marker| message.contains(marker))
        })
    }
}

impl fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, self.status) {
            (Some(message), Some(status)) => write!(f, "{message} (status {status})"),
            (Some(message), None) => f.write_str(message),
            (None, Some(status)) => write!(f, "request failed with status {status}"),
            (None, None) => f.write_str("unknown error"),
        }
    }
}

impl std::error::Error for ErrorShape {}

/// Errors the auth-retry wrappers can inspect.
pub trait Classify {
    /// Loosely typed view used by the fallback rule.
    fn shape(&self) -> ErrorShape;

    /// A definite answer from the error's type, if it has one.
    fn auth_verdict(&self) -> Option<bool> {
        None
    }
}

/// Returns true if `err` signals a rejected or expired credential.
pub fn is_auth_error<E: Classify + ?Sized>(err: &E) -> bool {
    err.auth_verdict()
        .unwrap_or_else(|| err.shape().looks_like_auth())
}

impl Classify for ErrorShape {
    fn shape(&self) -> ErrorShape {
        self.clone()
    }
}

impl Classify for str {
    fn shape(&self) -> ErrorShape {
        ErrorShape::new().with_message(self)
    }
}

impl Classify for String {
    fn shape(&self) -> ErrorShape {
        self.as_str().shape()
    }
}

impl<E: Classify + ?Sized> Classify for Box<E> {
    fn shape(&self) -> ErrorShape {
        (**self).shape()
    }

    fn auth_verdict(&self) -> Option<bool> {
        (**self).auth_verdict()
    }
}

impl Classify for BackendError {
    fn shape(&self) -> ErrorShape {
        let mut shape = ErrorShape::new().with_message(self.to_string());
        shape.status = self.status();
        shape.code = self.code().map(str::to_string);
        shape
    }

    fn auth_verdict(&self) -> Option<bool> {
        match self {
            BackendError::Unauthorized { .. } => Some(true),
            BackendError::Network(_) | BackendError::Timeout | BackendError::Decode(_) => {
                Some(false)
            }
            BackendError::Api { .. } => None,
        }
    }
}

impl Classify for reqwest::Error {
    fn shape(&self) -> ErrorShape {
        let mut shape = ErrorShape::new().with_message(self.to_string());
        shape.status = self.status().map(|status| status.as_u16());
        shape
    }

    // The display text embeds the request URL, which for token calls contains
    // "token", so only the status is trusted.
    fn auth_verdict(&self) -> Option<bool> {
        Some(
            self.status()
                .is_some_and(|status| status.as_u16() == 401 || status.as_u16() == 403),
        )
    }
}

impl Classify for AuthError {
    fn shape(&self) -> ErrorShape {
        match self {
            AuthError::Backend(err) => err.shape(),
            AuthError::Http(err) => err.shape(),
            other => ErrorShape::new().with_message(other.to_string()),
        }
    }

    fn auth_verdict(&self) -> Option<bool> {
        match self {
            AuthError::SessionExpired
            | AuthError::NotLoggedIn
            | AuthError::SessionInvalid(_)
            | AuthError::TokenRefresh(_) => Some(true),
            AuthError::Http(err) => err.auth_verdict(),
            AuthError::Backend(err) => err.auth_verdict(),
            AuthError::InvalidCredentials(_)
            | AuthError::Storage(_)
            | AuthError::Json(_)
            | AuthError::Timeout
            | AuthError::NetworkUnavailable
            | AuthError::Config(_) => Some(false),
        }
    }
}
