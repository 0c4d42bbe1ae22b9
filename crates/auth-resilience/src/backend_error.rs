//! Errors and response envelopes returned by the Supabase backend.

use serde::Deserialize;
use thiserror::Error;

/// Error reported by GoTrue or PostgREST, or by the transport underneath.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend rejected the caller's credentials.
    #[error("unauthorized ({status}): {message}")]
    Unauthorized {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Any other API error.
    #[error("backend error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Error body shapes used by PostgREST (`code`/`message`) and GoTrue
/// (`error_code`/`msg`, or OAuth-style `error`/`error_description`).
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl BackendError {
    /// Build an error from a non-success HTTP response.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

        // GoTrue puts the numeric status in `code`; only string codes are meaningful.
        let code = parsed
            .code
            .and_then(|value| value.as_str().map(str::to_string))
            .or(parsed.error_code)
            .or(parsed.error);

        let message = parsed
            .message
            .or(parsed.msg)
            .or(parsed.error_description)
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    body.trim().to_string()
                }
            });

        let auth_code = code
            .as_deref()
            .is_some_and(|code| crate::AUTH_ERROR_CODES.contains(&code));

        if status == 401 || status == 403 || auth_code {
            BackendError::Unauthorized {
                status,
                code,
                message,
            }
        } else {
            BackendError::Api {
                status,
                code,
                message,
            }
        }
    }

    /// HTTP status, when the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Unauthorized { status, .. } | BackendError::Api { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Backend error code, when present.
    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::Unauthorized { code, .. } | BackendError::Api { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }

    /// Returns true if retrying could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Network(_) | BackendError::Timeout => true,
            BackendError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

/// A `{ data, error }` result as returned by backend queries.
///
/// Exactly one side is meaningful: a present `error` means the query failed
/// even if `data` is also set.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse<T> {
    pub data: Option<T>,
    pub error: Option<BackendError>,
}

impl<T> BackendResponse<T> {
    pub fn ok(data: Option<T>) -> Self {
        Self { data, error: None }
    }

    pub fn err(error: BackendError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Option<T>, BackendError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

impl<T> From<Result<Option<T>, BackendError>> for BackendResponse<T> {
    fn from(result: Result<Option<T>, BackendError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => Self::err(error),
        }
    }
}
