//! Typed API for the persisted session.

use crate::{SecureStorage, StorageKeys, StorageResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Session metadata stored next to the tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// User ID from the identity backend
    pub user_id: String,
    /// User email, when the backend returned one
    #[serde(default)]
    pub email: Option<String>,
    /// Access token expiry (epoch seconds)
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// A complete persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    pub meta: SessionMeta,
}

/// Reads and writes the persisted session through a [`SecureStorage`].
///
/// The session is kept under a single key, so a failed save leaves the
/// previous session intact instead of mixing old and new tokens.
pub struct SessionVault {
    storage: Box<dyn SecureStorage>,
}

impl SessionVault {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Persist a session, replacing any previous one.
    pub fn save_session(&self, session: &StoredSession) -> StorageResult<()> {
        let value = serde_json::to_string(session)?;
        self.storage.set(StorageKeys::SESSION, &value)?;
        debug!(user_id = %session.meta.user_id, "Session persisted");
        Ok(())
    }

    /// Load the persisted session.
    ///
    /// A value that does not decode as a session is treated as absent and
    /// cleared.
    pub fn load_session(&self) -> StorageResult<Option<StoredSession>> {
        let Some(value) = self.storage.get(StorageKeys::SESSION)? else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredSession>(&value) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "Persisted session is unreadable, clearing it");
                self.clear_session()?;
                Ok(None)
            }
        }
    }

    /// Check whether a session is persisted.
    pub fn has_session(&self) -> StorageResult<bool> {
        Ok(self.load_session()?.is_some())
    }

    /// Remove the persisted session.
    pub fn clear_session(&self) -> StorageResult<()> {
        self.storage.delete(StorageKeys::SESSION)?;
        Ok(())
    }
}
