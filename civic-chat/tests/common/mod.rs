//! Shared fixtures for civic-chat integration tests.
//!
//! Builds chat sessions over the scripted gateway, the in-memory store and an
//! in-memory ledger pinned to a fixed day.

#![allow(dead_code)]

use chrono::NaiveDate;
use civic_chat::config::{ChatSettings, CitationSettings};
use civic_chat::models::{BillEntity, EntityRef, LedgerState, SubscriptionTier, UserProfile};
use civic_chat::services::gateway::mock::{Script, ScriptedGateway};
use civic_chat::services::usage::{LedgerStorage, MemoryLedgerStorage, UsageBus, UsageMeter};
use civic_chat::services::{ChatDeps, ChatSession, CitationPolicy, MemoryStore, SyncStatus};
use service_core::retry::RetryConfig;
use std::sync::Arc;
use tokio::sync::watch;

pub const USER_ID: &str = "user-1";

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

pub fn housing_bill() -> EntityRef {
    EntityRef::Bill(BillEntity {
        bill_id: 42,
        bill_number: "A1234".to_string(),
        title: "Housing Reform Act".to_string(),
        session_year: Some(2025),
        status: Some("In Committee".to_string()),
        sponsor: Some("Jane Doe".to_string()),
        summary: None,
        url: Some("https://www.nysenate.gov/legislation/bills/2025/A1234".to_string()),
    })
}

pub struct Harness {
    pub gateway: Arc<ScriptedGateway>,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryLedgerStorage>,
    pub meter: Arc<UsageMeter>,
}

impl Harness {
    /// Free-tier user with `words_used` already spent today.
    pub async fn new(scripts: Vec<Script>, words_used: u64) -> Self {
        let storage = Arc::new(MemoryLedgerStorage::new());
        let ledger = LedgerState {
            words_used,
            last_reset_date: today(),
        };
        storage
            .set(
                &format!("usage_{}", USER_ID),
                &serde_json::to_string(&ledger).unwrap(),
            )
            .unwrap();

        let meter = UsageMeter::new(
            storage.clone(),
            UsageBus::new(),
            UserProfile::new(USER_ID, None, SubscriptionTier::Free),
            &[],
        )
        .with_clock(today);
        meter.load().await.unwrap();

        Self {
            gateway: Arc::new(ScriptedGateway::with_scripts(scripts)),
            store: Arc::new(MemoryStore::new()),
            storage,
            meter: Arc::new(meter),
        }
    }

    pub fn deps(&self) -> ChatDeps {
        ChatDeps {
            gateway: self.gateway.clone(),
            store: self.store.clone(),
            meter: self.meter.clone(),
            citations: CitationPolicy::new(&CitationSettings::default()).unwrap(),
            retry: RetryConfig::no_retry(),
        }
    }

    pub fn open(&self, entity: Option<EntityRef>) -> ChatSession {
        self.open_with(entity, ChatSettings::default())
    }

    pub fn open_with(&self, entity: Option<EntityRef>, settings: ChatSettings) -> ChatSession {
        ChatSession::open(self.deps(), USER_ID, entity, settings)
    }
}

/// Wait until the latest snapshot has been written or given up on.
pub async fn settled_sync(status: &mut watch::Receiver<SyncStatus>) -> SyncStatus {
    status
        .wait_for(|s| matches!(s, SyncStatus::Synced { .. } | SyncStatus::Failed { .. }))
        .await
        .unwrap()
        .clone()
}

/// `n` space-separated words.
pub fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}
