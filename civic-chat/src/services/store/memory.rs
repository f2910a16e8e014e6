//! In-process store for tests and offline runs.

use super::{ChatStore, SearchBackend, SearchParams, SearchProcedure, SearchRow};
use crate::models::ChatSessionRecord;
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::Mutex;

/// A write the store accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    Insert { id: String, record: ChatSessionRecord },
    Update { id: String, record: ChatSessionRecord },
}

#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicU64,
    failures: AtomicU32,
    sessions: Mutex<HashMap<String, ChatSessionRecord>>,
    writes: Mutex<Vec<StoreWrite>>,
    rows: Mutex<HashMap<SearchProcedure, Vec<SearchRow>>>,
    queries: Mutex<Vec<(SearchProcedure, SearchParams)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with a retryable database error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub async fn writes(&self) -> Vec<StoreWrite> {
        self.writes.lock().await.clone()
    }

    pub async fn session(&self, id: &str) -> Option<ChatSessionRecord> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Rows served for `procedure` whose title contains the query.
    pub async fn set_rows(&self, procedure: SearchProcedure, rows: Vec<SearchRow>) {
        self.rows.lock().await.insert(procedure, rows);
    }

    pub async fn queries(&self) -> Vec<(SearchProcedure, SearchParams)> {
        self.queries.lock().await.clone()
    }

    fn injected_failure(&self) -> Result<(), AppError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected store failure"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn insert_session(&self, record: &ChatSessionRecord) -> Result<String, AppError> {
        self.injected_failure()?;
        let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.sessions.lock().await.insert(id.clone(), record.clone());
        self.writes.lock().await.push(StoreWrite::Insert {
            id: id.clone(),
            record: record.clone(),
        });
        Ok(id)
    }

    async fn update_session(&self, id: &str, record: &ChatSessionRecord) -> Result<(), AppError> {
        self.injected_failure()?;
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(id) {
            return Err(AppError::NotFound(anyhow::anyhow!("chat session {} not found", id)));
        }
        sessions.insert(id.to_string(), record.clone());
        self.writes.lock().await.push(StoreWrite::Update {
            id: id.to_string(),
            record: record.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for MemoryStore {
    async fn search(
        &self,
        procedure: SearchProcedure,
        params: &SearchParams,
    ) -> Result<Vec<SearchRow>, AppError> {
        self.queries.lock().await.push((procedure, params.clone()));

        let needle = params.query.to_lowercase();
        let rows = self
            .rows
            .lock()
            .await
            .get(&procedure)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.title.to_lowercase().contains(&needle))
                    .take(params.limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}
