//! Minimal PostgREST client.

use crate::{BackendError, BackendResponse, ConnectivityProbe};
use async_trait::async_trait;
use config_and_utils::Config;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

pub struct SupabaseRest {
    http: Client,
    base_url: String,
    publishable_key: String,
    probe_table: String,
}

impl SupabaseRest {
    pub fn new(config: &Config) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: &Config, http: Client) -> Self {
        Self {
            http,
            base_url: config.supabase_base_url(),
            publishable_key: config.supabase_publishable_key.clone(),
            probe_table: config.health_probe_table.clone(),
        }
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/rest/v1/{}", self.base_url, table)
        } else {
            format!("{}/rest/v1/{}?{}", self.base_url, table, query)
        }
    }

    /// `GET /rest/v1/{table}?{query}` as the signed-in user, or anonymously.
    pub async fn select(
        &self,
        table: &str,
        query: &str,
        access_token: Option<&str>,
    ) -> BackendResponse<Value> {
        self.try_select(table, query, access_token).await.into()
    }

    async fn try_select(
        &self,
        table: &str,
        query: &str,
        access_token: Option<&str>,
    ) -> Result<Option<Value>, BackendError> {
        let url = self.table_url(table, query);
        debug!(url = %url, authenticated = access_token.is_some(), "PostgREST select");

        let response = self
            .http
            .get(&url)
            .header("apikey", &self.publishable_key)
            .bearer_auth(access_token.unwrap_or(&self.publishable_key))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_response(status.as_u16(), &body));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ConnectivityProbe for SupabaseRest {
    async fn probe(&self, access_token: Option<&str>) -> Result<(), BackendError> {
        self.select(&self.probe_table, "select=*&limit=1", access_token)
            .await
            .into_result()
            .map(|_| ())
    }
}
