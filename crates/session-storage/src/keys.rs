//! Storage key constants.

/// Storage keys used for the persisted session.
pub struct StorageKeys;

impl StorageKeys {
    /// The whole session (tokens and metadata) as one JSON value, so a single
    /// write replaces it.
    pub const SESSION: &'static str = "session";
}
