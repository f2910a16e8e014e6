//! Write-behind persistence of chat sessions.
//!
//! The conversation never waits on the store. Each snapshot replaces the one
//! still pending, and a single worker per session upserts the newest snapshot
//! with retry. The first successful write inserts and captures the session id;
//! every later write updates that row.

use crate::models::ChatSessionRecord;
use crate::services::store::ChatStore;
use chrono::{DateTime, Utc};
use service_core::retry::{retry_call, RetryConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where the latest snapshot stands relative to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    /// Nothing has been queued yet.
    Idle,
    /// The newest snapshot is queued behind the worker.
    Pending,
    Saving,
    Synced {
        session_id: String,
        at: DateTime<Utc>,
    },
    /// Retries were exhausted or the store refused the row.
    Failed { error: String, attempts: u32 },
}

pub struct WriteBehind {
    pending: watch::Sender<Option<ChatSessionRecord>>,
    status: Arc<watch::Sender<SyncStatus>>,
    session_id: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteBehind {
    pub fn spawn(store: Arc<dyn ChatStore>, retry: RetryConfig) -> Self {
        let (pending_tx, pending_rx) = watch::channel(None);
        let (status_tx, _) = watch::channel(SyncStatus::Idle);
        let status = Arc::new(status_tx);
        let (id_tx, id_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let worker = Worker {
            store,
            retry,
            status: Arc::clone(&status),
            session_id: id_tx,
        };
        let handle = tokio::spawn(worker.run(pending_rx, cancel.clone()));

        Self {
            pending: pending_tx,
            status,
            session_id: id_rx,
            cancel,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue `record`, replacing any snapshot the worker has not picked up.
    pub fn enqueue(&self, record: ChatSessionRecord) {
        self.pending.send_replace(Some(record));
        self.status.send_replace(SyncStatus::Pending);
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.borrow().clone()
    }

    /// Stop the worker once anything still pending has been written.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Persistence worker panicked");
            }
        }
    }
}

impl Drop for WriteBehind {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    store: Arc<dyn ChatStore>,
    retry: RetryConfig,
    status: Arc<watch::Sender<SyncStatus>>,
    session_id: watch::Sender<Option<String>>,
}

impl Worker {
    async fn run(
        self,
        mut pending: watch::Receiver<Option<ChatSessionRecord>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = pending.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }

            let record = pending.borrow_and_update().clone();
            if let Some(record) = record {
                self.save(record).await;
                // A snapshot queued during the save is still waiting.
                if pending.has_changed().unwrap_or(false) {
                    self.status.send_replace(SyncStatus::Pending);
                }
            }
        }

        // Final flush of a snapshot queued after the last save.
        if pending.has_changed().unwrap_or(false) {
            let record = pending.borrow_and_update().clone();
            if let Some(record) = record {
                self.save(record).await;
            }
        }
        tracing::debug!("Persistence worker stopped");
    }

    async fn save(&self, record: ChatSessionRecord) {
        self.status.send_replace(SyncStatus::Saving);

        let existing = self.session_id.borrow().clone();
        let attempts = AtomicU32::new(0);

        let result = retry_call(&self.retry, "persist_chat_session", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            match &existing {
                Some(id) => self
                    .store
                    .update_session(id, &record)
                    .await
                    .map(|_| id.clone()),
                None => self.store.insert_session(&record).await,
            }
        })
        .await;

        match result {
            Ok(session_id) => {
                if existing.is_none() {
                    tracing::info!(
                        session_id = %session_id,
                        title = %record.title,
                        "Chat session persisted"
                    );
                    self.session_id.send_replace(Some(session_id.clone()));
                }
                self.status.send_replace(SyncStatus::Synced {
                    session_id,
                    at: Utc::now(),
                });
            }
            Err(e) => {
                let attempts = attempts.load(Ordering::SeqCst);
                tracing::error!(
                    error = %e,
                    attempts,
                    session_id = ?existing,
                    "Failed to persist chat session"
                );
                self.status.send_replace(SyncStatus::Failed {
                    error: e.to_string(),
                    attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::services::store::memory::{MemoryStore, StoreWrite};

    fn record(messages: usize) -> ChatSessionRecord {
        let messages = (0..messages).map(|i| Message::user(format!("m{}", i))).collect();
        ChatSessionRecord::snapshot("user-1", "General chat", None, messages)
    }

    async fn wait_for_synced(status: &mut watch::Receiver<SyncStatus>) -> SyncStatus {
        status
            .wait_for(|s| matches!(s, SyncStatus::Synced { .. } | SyncStatus::Failed { .. }))
            .await
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn first_write_inserts_and_later_writes_update() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteBehind::spawn(store.clone(), RetryConfig::no_retry());
        let mut status = writer.status();

        writer.enqueue(record(1));
        wait_for_synced(&mut status).await;
        assert_eq!(writer.session_id().as_deref(), Some("session-1"));

        writer.enqueue(record(2));
        writer.shutdown().await;

        let writes = store.writes().await;
        assert!(matches!(&writes[0], StoreWrite::Insert { id, .. } if id == "session-1"));
        assert!(matches!(
            writes.last(),
            Some(StoreWrite::Update { id, record })
                if id == "session-1" && record.messages.len() == 2
        ));
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn snapshot_queued_after_a_save_reports_pending() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteBehind::spawn(store.clone(), RetryConfig::no_retry());
        let mut status = writer.status();
        assert_eq!(*status.borrow(), SyncStatus::Idle);

        writer.enqueue(record(1));
        wait_for_synced(&mut status).await;

        writer.enqueue(record(2));
        assert_eq!(*status.borrow_and_update(), SyncStatus::Pending);

        let outcome = wait_for_synced(&mut status).await;
        assert!(matches!(
            outcome,
            SyncStatus::Synced { session_id, .. } if session_id == "session-1"
        ));
        writer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(2);
        let writer = WriteBehind::spawn(store.clone(), RetryConfig::quick());
        let mut status = writer.status();

        writer.enqueue(record(1));
        let outcome = wait_for_synced(&mut status).await;
        assert!(matches!(outcome, SyncStatus::Synced { .. }));
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_failed_status() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(5);
        let writer = WriteBehind::spawn(store.clone(), RetryConfig::no_retry());
        let mut status = writer.status();

        writer.enqueue(record(1));
        let outcome = wait_for_synced(&mut status).await;
        assert!(matches!(outcome, SyncStatus::Failed { attempts: 1, .. }));
        assert!(writer.session_id().is_none());
    }

    #[tokio::test]
    async fn shutdown_flushes_latest_snapshot_only() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteBehind::spawn(store.clone(), RetryConfig::no_retry());

        writer.enqueue(record(1));
        writer.enqueue(record(2));
        writer.enqueue(record(3));
        writer.shutdown().await;

        let writes = store.writes().await;
        let last = match writes.last() {
            Some(StoreWrite::Insert { record, .. })
            | Some(StoreWrite::Update { record, .. }) => record,
            None => panic!("nothing was written"),
        };
        assert_eq!(last.messages.len(), 3);
        assert!(writes.len() <= 3);
    }
}
