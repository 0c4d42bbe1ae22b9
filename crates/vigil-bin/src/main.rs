//! Vigil - session resilience toolkit for Supabase-backed apps.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config_and_utils::{init_logging, Config, Paths};

/// Vigil command-line interface.
#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Keep a Supabase session valid and check backend health")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, session, logs). Defaults to ~/.vigil
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "VIGIL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the current session
    Status,
    /// Refresh the session now
    Refresh,
    /// Run the health check and print the report as JSON
    Health,
    /// Read rows from a table with timeout, backoff and auth retry
    Query {
        table: String,
        /// PostgREST query string, e.g. "select=id,name&limit=5"
        #[arg(short, long, default_value = "select=*&limit=10")]
        query: String,
    },
    /// Feed "visible"/"hidden" lines from stdin to the visibility monitor
    Watch,
}

impl Cli {
    /// The flag wins over `log_level` from config.json or `VIGIL_LOG_LEVEL`.
    fn effective_log_level<'a>(&'a self, config: &'a Config) -> &'a str {
        self.log_level.as_deref().unwrap_or(&config.log_level)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match &cli.base_dir {
        Some(base) => Paths::with_base_dir(base.clone()),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    init_logging(cli.effective_log_level(&config));

    let app = app::App::build(config, &paths)?;

    match cli.command {
        Commands::Login { email, password } => app.login(&email, password).await?,
        Commands::Logout => app.logout().await?,
        Commands::Status => app.status().await?,
        Commands::Refresh => app.refresh().await?,
        Commands::Health => {
            if !app.health().await? {
                std::process::exit(1);
            }
        }
        Commands::Query { table, query } => app.query(&table, &query).await?,
        Commands::Watch => app.watch().await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["vigil", "status", "--log-level", "debug", "--base-dir", "/tmp/v"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.base_dir, Some(PathBuf::from("/tmp/v")));
    }

    #[test]
    fn test_cli_query_defaults() {
        let cli = Cli::try_parse_from(["vigil", "query", "profiles"]).unwrap();
        match cli.command {
            Commands::Query { table, query } => {
                assert_eq!(table, "profiles");
                assert_eq!(query, "select=*&limit=10");
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_log_level_falls_back_to_config() {
        let config = Config {
            log_level: "warn".to_string(),
            ..Config::default()
        };

        let cli = Cli::try_parse_from(["vigil", "status"]).unwrap();
        assert_eq!(cli.effective_log_level(&config), "warn");

        let cli = Cli::try_parse_from(["vigil", "-l", "trace", "status"]).unwrap();
        assert_eq!(cli.effective_log_level(&config), "trace");
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["vigil"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
