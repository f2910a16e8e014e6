//! Hosted relational store: chat session rows and full-text search RPCs.

pub mod memory;
pub mod rest;

use crate::models::ChatSessionRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

pub use memory::MemoryStore;
pub use rest::RestStore;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Insert a new session row and return the id the server assigned.
    async fn insert_session(&self, record: &ChatSessionRecord) -> Result<String, AppError>;
    async fn update_session(&self, id: &str, record: &ChatSessionRecord) -> Result<(), AppError>;
}

/// Stored procedures backing the command palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchProcedure {
    SearchAll,
    SearchChats,
    SearchNotes,
}

impl SearchProcedure {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchProcedure::SearchAll => "search_all",
            SearchProcedure::SearchChats => "search_chats",
            SearchProcedure::SearchNotes => "search_notes",
        }
    }
}

/// Arguments of every search procedure, named as the RPC expects them.
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct SearchParams {
    #[serde(rename = "p_user_id")]
    #[validate(length(min = 1, message = "user id is required"))]
    pub user_id: String,
    #[serde(rename = "p_query")]
    pub query: String,
    #[serde(rename = "p_cursor", skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(rename = "p_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u32,
}

impl SearchParams {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>, limit: u32) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            cursor: None,
            limit,
        }
    }
}

/// One hit returned by a search procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRow {
    pub id: String,
    pub title: String,
    /// `chat`, `note`, ...
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rank: Option<f64>,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        procedure: SearchProcedure,
        params: &SearchParams,
    ) -> Result<Vec<SearchRow>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_use_rpc_argument_names() {
        let params = SearchParams::new("user-1", "housing", 20);
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["p_user_id"], "user-1");
        assert_eq!(value["p_query"], "housing");
        assert_eq!(value["p_limit"], 20);
        assert!(value.get("p_cursor").is_none());
    }

    #[test]
    fn params_require_user_and_sane_limit() {
        assert!(SearchParams::new("", "q", 20).validate().is_err());
        assert!(SearchParams::new("u", "q", 0).validate().is_err());
        assert!(SearchParams::new("u", "", 20).validate().is_ok());
    }

    #[test]
    fn row_reads_type_column() {
        let row: SearchRow = serde_json::from_str(
            r#"{"id":"c1","title":"Housing chat","type":"chat","rank":0.5}"#,
        )
        .unwrap();
        assert_eq!(row.kind, "chat");
        assert!(row.snippet.is_none());
    }
}
