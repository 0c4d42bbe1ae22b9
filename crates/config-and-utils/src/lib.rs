//! Configuration, filesystem paths, errors and logging setup for Vigil.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, ResilienceSettings, DEFAULT_HEALTH_PROBE_TABLE, DEFAULT_LOG_LEVEL,
    DEFAULT_SUPABASE_PUBLISHABLE_KEY, DEFAULT_SUPABASE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
