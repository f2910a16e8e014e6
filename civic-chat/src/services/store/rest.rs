use super::{ChatStore, SearchBackend, SearchParams, SearchProcedure, SearchRow};
use crate::config::BackendConfig;
use crate::models::ChatSessionRecord;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::error::AppError;
use std::time::Duration;
use validator::Validate;

const SESSIONS_TABLE: &str = "chat_sessions";

/// Store reached through the backend's auto-generated REST surface.
pub struct RestStore {
    client: Client,
    rest_url: String,
    anon_key: Secret<String>,
    bearer: Secret<String>,
}

#[derive(Deserialize)]
struct InsertedRow {
    id: serde_json::Value,
}

impl RestStore {
    pub fn new(backend: &BackendConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            rest_url: backend.rest_url.trim_end_matches('/').to_string(),
            anon_key: backend.anon_key.clone(),
            bearer: backend
                .access_token
                .clone()
                .unwrap_or_else(|| backend.anon_key.clone()),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.bearer.expose_secret())
            .header("apikey", self.anon_key.expose_secret())
    }

    async fn send(&self, builder: RequestBuilder, operation: &str) -> Result<Response, AppError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("{} failed: {}", operation, e)))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        tracing::warn!(operation, status = status.as_u16(), "Store request rejected");
        Err(status_to_error(status, operation, body, retry_after))
    }
}

fn status_to_error(
    status: StatusCode,
    operation: &str,
    body: String,
    retry_after: Option<u64>,
) -> AppError {
    let detail = anyhow::anyhow!("{} returned {}: {}", operation, status.as_u16(), body);
    match status.as_u16() {
        400 | 422 => AppError::BadRequest(detail),
        401 => AppError::Unauthorized(detail),
        403 => AppError::Forbidden(detail),
        404 => AppError::NotFound(detail),
        409 => AppError::Conflict(detail),
        429 => AppError::TooManyRequests(detail.to_string(), retry_after),
        _ => AppError::DatabaseError(detail),
    }
}

#[async_trait]
impl ChatStore for RestStore {
    async fn insert_session(&self, record: &ChatSessionRecord) -> Result<String, AppError> {
        let url = format!("{}/{}", self.rest_url, SESSIONS_TABLE);
        let builder = self
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(record);

        let rows: Vec<InsertedRow> = self
            .send(builder, "insert chat session")
            .await?
            .json()
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Unreadable insert response: {}", e))
            })?;

        let id = rows
            .into_iter()
            .next()
            .map(|row| match row.id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .ok_or_else(|| AppError::DatabaseError(anyhow::anyhow!("Insert returned no row")))?;

        tracing::info!(session_id = %id, chat_type = %record.chat_type, "Chat session created");
        Ok(id)
    }

    async fn update_session(&self, id: &str, record: &ChatSessionRecord) -> Result<(), AppError> {
        let url = format!("{}/{}", self.rest_url, SESSIONS_TABLE);
        let builder = self
            .client
            .patch(url)
            .query(&[("id", format!("eq.{}", id))])
            .json(record);

        self.send(builder, "update chat session").await?;
        tracing::debug!(session_id = %id, messages = record.messages.len(), "Chat session updated");
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for RestStore {
    async fn search(
        &self,
        procedure: SearchProcedure,
        params: &SearchParams,
    ) -> Result<Vec<SearchRow>, AppError> {
        params.validate()?;

        let url = format!("{}/rpc/{}", self.rest_url, procedure.as_str());
        let builder = self.client.post(url).json(params);

        let rows = self
            .send(builder, procedure.as_str())
            .await?
            .json::<Vec<SearchRow>>()
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Unreadable search response: {}", e))
            })?;

        tracing::debug!(procedure = procedure.as_str(), rows = rows.len(), "Search completed");
        Ok(rows)
    }
}
