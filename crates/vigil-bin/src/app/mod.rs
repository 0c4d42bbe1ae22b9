//! Application wiring and command handlers.

mod navigator;

use auth_resilience::{
    safe_query, AuthError, ConnectivityProbe, HealthCheck, SafeQueryConfig, SessionStore,
    StorePolicy, SupabaseIdentity, SupabaseRest, Visibility, VisibilityMonitor,
};
use chrono::{TimeZone, Utc};
use config_and_utils::{Config, Paths};
use navigator::ConsoleNavigator;
use session_storage::{FileStorage, SessionVault};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Everything a command needs, built once per invocation.
pub struct App {
    config: Config,
    identity: Arc<SupabaseIdentity>,
    store: SessionStore,
    rest: Arc<SupabaseRest>,
}

impl App {
    pub fn build(config: Config, paths: &Paths) -> AppResult<Self> {
        paths.ensure_dirs()?;

        let vault = SessionVault::new(Box::new(FileStorage::new(paths.session_file())));
        let identity = Arc::new(SupabaseIdentity::new(&config, vault));
        let store = SessionStore::new(
            identity.clone(),
            StorePolicy::from_settings(&config.resilience),
        );
        let rest = Arc::new(SupabaseRest::new(&config));

        Ok(Self {
            config,
            identity,
            store,
            rest,
        })
    }

    pub async fn login(&self, email: &str, password: Option<String>) -> AppResult<()> {
        self.config.validate()?;

        let password = match password {
            Some(password) => password,
            None => read_line("Password: ").await?,
        };

        let session = self.identity.sign_in_with_password(email, &password).await?;
        println!(
            "Signed in as {}",
            session.user.email.as_deref().unwrap_or(&session.user.id)
        );
        self.store.set_session(Some(session));
        Ok(())
    }

    pub async fn logout(&self) -> AppResult<()> {
        self.config.validate()?;
        self.store.initialize().await;
        if let Err(e) = self.store.sign_out().await {
            warn!(error = %e, "Server-side sign-out failed");
        }
        println!("Signed out");
        Ok(())
    }

    pub async fn status(&self) -> AppResult<()> {
        self.store.initialize().await;
        let snapshot = self.store.get_state();
        let now = Utc::now().timestamp();
        let expires_at = snapshot.session.as_ref().and_then(|s| s.expires_at);

        let status = serde_json::json!({
            "state": snapshot.state,
            "user": snapshot.user,
            "expiresAt": expires_at.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            "expiresInSecs": expires_at.map(|secs| secs - now),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        Ok(())
    }

    pub async fn refresh(&self) -> AppResult<()> {
        self.config.validate()?;
        if !self.store.initialize().await {
            return Err(AuthError::NotLoggedIn.into());
        }

        if !self.store.refresh_session().await {
            return Err(AuthError::SessionExpired.into());
        }

        let expires_at = self.store.current_session().and_then(|s| s.expires_at);
        info!(expires_at = ?expires_at, "Session refreshed from command line");
        println!("Session refreshed");
        Ok(())
    }

    /// Print the health report. Returns whether it was healthy.
    pub async fn health(&self) -> AppResult<bool> {
        let probe: Arc<dyn ConnectivityProbe> = self.rest.clone();
        let check = HealthCheck::new(
            &self.config,
            self.store.clone(),
            probe,
            self.config.resilience.health_timeout(),
        );

        let report = check.run().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(report.is_healthy)
    }

    pub async fn query(&self, table: &str, query: &str) -> AppResult<()> {
        self.config.validate()?;
        self.store.initialize().await;

        let settings = SafeQueryConfig::from_settings(&self.config.resilience);
        let result = safe_query(&self.store, &settings, || {
            let rest = self.rest.clone();
            let access_token = self.store.current_session().map(|s| s.access_token);
            async move {
                rest.select(table, query, access_token.as_deref())
                    .await
                    .into_result()
            }
        })
        .await;

        match result {
            Ok(rows) => {
                let rows = rows.unwrap_or(serde_json::Value::Null);
                println!("{}", serde_json::to_string_pretty(&rows)?);
                Ok(())
            }
            Err(e) => {
                let notice = e.notice();
                eprintln!("{}: {}", notice.title, notice.description);
                Err(e.into())
            }
        }
    }

    /// Drive the visibility monitor from stdin until EOF.
    pub async fn watch(&self) -> AppResult<()> {
        self.config.validate()?;
        self.store.initialize().await;
        let listener = self.store.listen();

        let monitor = VisibilityMonitor::new(
            self.store.clone(),
            Arc::new(ConsoleNavigator),
            self.config.resilience.visibility_refresh_window(),
        );

        println!("Reading visibility changes (\"hidden\" / \"visible\") from stdin");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Visibility>() {
                Ok(visibility) => {
                    let outcome = monitor.handle(visibility).await;
                    println!("{visibility:?}: {outcome:?}");
                }
                Err(e) => eprintln!("{e}"),
            }
        }

        listener.abort();
        Ok(())
    }
}

async fn read_line(prompt: &str) -> AppResult<String> {
    eprint!("{prompt}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = lines.next_line().await?.unwrap_or_default();
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
