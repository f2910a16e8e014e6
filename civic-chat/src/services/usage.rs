//! Daily word metering.
//!
//! Each user has one ledger entry holding the words consumed today. The date
//! is checked on every read so a new day starts from zero without a
//! scheduled job. Meters in the same process share a [`UsageBus`]: it
//! serialises read-modify-write sequences and broadcasts every new total so
//! sibling meters stay current without polling.
//!
//! The budget is advisory. It guards against accidental overuse and is not an
//! access control.

use crate::models::{LedgerState, UserProfile, WordLimit};
use chrono::{Local, NaiveDate};
use dashmap::DashMap;
use service_core::error::AppError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Key-value storage for ledger entries.
pub trait LedgerStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
}

/// One JSON file per key.
pub struct FileLedgerStorage {
    dir: PathBuf,
}

impl FileLedgerStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl LedgerStorage for FileLedgerStorage {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLedgerStorage {
    entries: DashMap<String, String>,
}

impl MemoryLedgerStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStorage for MemoryLedgerStorage {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Broadcast whenever a meter writes a new total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageUpdate {
    pub user_id: String,
    pub words_used: u64,
    pub date: NaiveDate,
}

pub struct UsageBus {
    updates: broadcast::Sender<UsageUpdate>,
    write_lock: Mutex<()>,
}

impl Default for UsageBus {
    fn default() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            updates,
            write_lock: Mutex::new(()),
        }
    }
}

impl UsageBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The bus shared by every meter in this process.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<UsageBus>> = OnceLock::new();
        SHARED.get_or_init(UsageBus::new).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsageUpdate> {
        self.updates.subscribe()
    }
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct UsageMeter {
    storage: Arc<dyn LedgerStorage>,
    bus: Arc<UsageBus>,
    user: UserProfile,
    key: String,
    limit: WordLimit,
    state: watch::Sender<LedgerState>,
    clock: Clock,
    following: CancellationToken,
}

impl UsageMeter {
    pub fn new(
        storage: Arc<dyn LedgerStorage>,
        bus: Arc<UsageBus>,
        user: UserProfile,
        admin_emails: &[String],
    ) -> Self {
        let limit = resolve_limit(&user, admin_emails);
        let clock: Clock = Arc::new(|| Local::now().date_naive());
        let (state, _) = watch::channel(LedgerState::fresh(clock()));

        Self {
            storage,
            bus,
            key: format!("usage_{}", user.user_id),
            user,
            limit,
            state,
            clock,
            following: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self.state.send_replace(LedgerState::fresh((self.clock)()));
        self
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn limit(&self) -> WordLimit {
        self.limit
    }

    /// Read today's ledger, resetting it first if it belongs to another day.
    pub async fn load(&self) -> Result<LedgerState, AppError> {
        let _guard = self.bus.write_lock.lock().await;
        let state = self.read_current()?;
        self.state.send_replace(state);
        Ok(state)
    }

    /// Record `words` against today's budget and return the new total.
    pub async fn add_words_used(&self, words: u64) -> Result<u64, AppError> {
        let _guard = self.bus.write_lock.lock().await;

        let mut state = self.read_current()?;
        state.words_used = state.words_used.saturating_add(words);
        self.persist(&state)?;
        self.state.send_replace(state);

        // No subscribers is fine.
        let _ = self.bus.updates.send(UsageUpdate {
            user_id: self.user.user_id.clone(),
            words_used: state.words_used,
            date: state.last_reset_date,
        });

        tracing::debug!(
            user_id = %self.user.user_id,
            words,
            total = state.words_used,
            "Recorded word usage"
        );
        Ok(state.words_used)
    }

    /// Whether a request costing `estimate` more words fits today's budget.
    pub fn can_make_request(&self, estimate: u64) -> bool {
        let state = self.snapshot();
        if state.last_reset_date != (self.clock)() {
            return true;
        }
        self.limit.allows(state.words_used.saturating_add(estimate))
    }

    pub fn remaining(&self) -> WordLimit {
        let state = self.snapshot();
        let used = if state.last_reset_date == (self.clock)() {
            state.words_used
        } else {
            0
        };
        match self.limit {
            WordLimit::Limited(limit) => WordLimit::Limited(limit.saturating_sub(used)),
            WordLimit::Unlimited => WordLimit::Unlimited,
        }
    }

    pub fn snapshot(&self) -> LedgerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LedgerState> {
        self.state.subscribe()
    }

    /// Apply totals written by sibling meters of the same user to this one.
    pub fn follow_siblings(self: &Arc<Self>) -> JoinHandle<()> {
        let mut updates = self.bus.subscribe();
        let meter: Weak<Self> = Arc::downgrade(self);
        let stop = self.following.clone();

        tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = stop.cancelled() => return,
                    update = updates.recv() => update,
                };
                let Some(meter) = meter.upgrade() else { return };

                match update {
                    Ok(update) if update.user_id == meter.user.user_id => {
                        meter.state.send_if_modified(|state| {
                            let incoming = LedgerState {
                                words_used: update.words_used,
                                last_reset_date: update.date,
                            };
                            if *state == incoming {
                                false
                            } else {
                                *state = incoming;
                                true
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Usage follower lagged, reloading ledger");
                        if let Err(e) = meter.load().await {
                            tracing::warn!(error = %e, "Failed to reload usage ledger");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    fn read_current(&self) -> Result<LedgerState, AppError> {
        let today = (self.clock)();
        let stored = match self.storage.get(&self.key)? {
            Some(raw) => match serde_json::from_str::<LedgerState>(&raw) {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "Corrupt usage ledger, resetting");
                    None
                }
            },
            None => None,
        };

        match stored {
            Some(state) if state.last_reset_date == today => Ok(state),
            _ => {
                let fresh = LedgerState::fresh(today);
                self.persist(&fresh)?;
                Ok(fresh)
            }
        }
    }

    fn persist(&self, state: &LedgerState) -> Result<(), AppError> {
        let raw = serde_json::to_string(state)?;
        self.storage.set(&self.key, &raw)
    }
}

impl Drop for UsageMeter {
    fn drop(&mut self) {
        self.following.cancel();
    }
}

fn resolve_limit(user: &UserProfile, admin_emails: &[String]) -> WordLimit {
    let is_admin = user
        .email
        .as_deref()
        .map(|email| {
            admin_emails
                .iter()
                .any(|admin| admin.eq_ignore_ascii_case(email.trim()))
        })
        .unwrap_or(false);

    if is_admin {
        WordLimit::Unlimited
    } else {
        user.tier.daily_limit()
    }
}

/// Whitespace-delimited word count.
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
