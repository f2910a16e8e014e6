//! Command palette search with a per-tab result cache.
//!
//! Keystrokes are debounced, each settled term is looked up for the active
//! tab, and answers are cached under `"{tab}-{query}"` for a short staleness
//! window. A newer lookup cancels the one still in flight so a slow answer
//! for an old term never overwrites a fresh one.

use crate::config::SearchSettings;
use crate::services::store::{SearchBackend, SearchParams, SearchProcedure, SearchRow};
use dashmap::DashMap;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchTab {
    All,
    Chats,
    Notes,
    /// Served from the built-in prompt catalog.
    Prompts,
}

impl SearchTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTab::All => "all",
            SearchTab::Chats => "chats",
            SearchTab::Notes => "notes",
            SearchTab::Prompts => "prompts",
        }
    }

    fn procedure(&self) -> Option<SearchProcedure> {
        match self {
            SearchTab::All => Some(SearchProcedure::SearchAll),
            SearchTab::Chats => Some(SearchProcedure::SearchChats),
            SearchTab::Notes => Some(SearchProcedure::SearchNotes),
            SearchTab::Prompts => None,
        }
    }
}

/// A canned starter prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptEntry {
    pub id: &'static str,
    pub title: &'static str,
    pub prompt: &'static str,
}

pub const PROMPT_CATALOG: &[PromptEntry] = &[
    PromptEntry {
        id: "track-bill",
        title: "Track a bill",
        prompt: "Where does this bill stand in the legislative process and what are the next steps?",
    },
    PromptEntry {
        id: "explain-bill",
        title: "Explain a bill in plain language",
        prompt: "Explain what this bill would change, in plain language, for an ordinary New Yorker.",
    },
    PromptEntry {
        id: "fiscal-impact",
        title: "Estimate fiscal impact",
        prompt: "What is the likely fiscal impact of this legislation on the state budget and local governments?",
    },
    PromptEntry {
        id: "find-my-legislator",
        title: "Find my legislator",
        prompt: "Who represents my district in the New York State Senate and Assembly?",
    },
    PromptEntry {
        id: "committee-agenda",
        title: "Committee agenda",
        prompt: "What is on this committee's agenda and which bills are likely to advance?",
    },
    PromptEntry {
        id: "education-funding",
        title: "Education funding",
        prompt: "Which pending bills affect school aid and education funding in New York?",
    },
    PromptEntry {
        id: "write-testimony",
        title: "Draft public testimony",
        prompt: "Help me draft short public testimony in support of or opposition to this bill.",
    },
];

impl PromptEntry {
    fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.title.to_lowercase().contains(needle)
            || self.prompt.to_lowercase().contains(needle)
    }

    fn to_row(self) -> SearchRow {
        SearchRow {
            id: self.id.to_string(),
            title: self.title.to_string(),
            kind: "prompt".to_string(),
            snippet: Some(self.prompt.to_string()),
            last_activity_at: None,
            rank: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchCacheEntry {
    pub tab: SearchTab,
    pub query: String,
    pub rows: Vec<SearchRow>,
    pub fetched_at: Instant,
}

pub struct SearchCache {
    entries: DashMap<String, SearchCacheEntry>,
    staleness: Duration,
}

impl SearchCache {
    pub fn new(staleness: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            staleness,
        }
    }

    pub fn key(tab: SearchTab, query: &str) -> String {
        format!("{}-{}", tab.as_str(), query)
    }

    /// Rows cached for `(tab, query)` if they are younger than the window.
    pub fn get_fresh(&self, tab: SearchTab, query: &str) -> Option<Vec<SearchRow>> {
        let key = Self::key(tab, query);
        let fresh = self.entries.get(&key).and_then(|entry| {
            (entry.fetched_at.elapsed() < self.staleness).then(|| entry.rows.clone())
        });

        if fresh.is_none() {
            let staleness = self.staleness;
            self.entries
                .remove_if(&key, |_, entry| entry.fetched_at.elapsed() >= staleness);
        }
        fresh
    }

    pub fn insert(&self, tab: SearchTab, query: &str, rows: Vec<SearchRow>) {
        self.entries.insert(
            Self::key(tab, query),
            SearchCacheEntry {
                tab,
                query: query.to_string(),
                rows,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the palette currently shows, per tab.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub all: Vec<SearchRow>,
    pub chats: Vec<SearchRow>,
    pub notes: Vec<SearchRow>,
    pub prompts: Vec<SearchRow>,
    loaded: [bool; 4],
}

impl SearchResults {
    pub fn rows(&self, tab: SearchTab) -> &[SearchRow] {
        match tab {
            SearchTab::All => &self.all,
            SearchTab::Chats => &self.chats,
            SearchTab::Notes => &self.notes,
            SearchTab::Prompts => &self.prompts,
        }
    }

    pub fn is_loaded(&self, tab: SearchTab) -> bool {
        self.loaded[tab as usize]
    }

    fn set(&mut self, tab: SearchTab, rows: Vec<SearchRow>) {
        match tab {
            SearchTab::All => self.all = rows,
            SearchTab::Chats => self.chats = rows,
            SearchTab::Notes => self.notes = rows,
            SearchTab::Prompts => self.prompts = rows,
        }
        self.loaded[tab as usize] = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Cached(Vec<SearchRow>),
    Fetched(Vec<SearchRow>),
    /// A newer lookup cancelled this one.
    Superseded,
    Local(Vec<SearchRow>),
}

pub struct SearchPalette {
    backend: Arc<dyn SearchBackend>,
    user_id: String,
    settings: SearchSettings,
    cache: SearchCache,
    active_tab: watch::Sender<SearchTab>,
    in_flight: Mutex<Option<CancellationToken>>,
    results: watch::Sender<SearchResults>,
}

impl SearchPalette {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        user_id: impl Into<String>,
        settings: SearchSettings,
    ) -> Self {
        let (active_tab, _) = watch::channel(SearchTab::All);
        let (results, _) = watch::channel(SearchResults::default());
        Self {
            backend,
            user_id: user_id.into(),
            cache: SearchCache::new(settings.staleness()),
            settings,
            active_tab,
            in_flight: Mutex::new(None),
            results,
        }
    }

    /// Start from a clean slate each time the palette is shown. A lookup
    /// still running from before is cancelled.
    pub async fn open(&self) {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(previous) = in_flight.take() {
            previous.cancel();
        }
        self.cache.clear();
        self.results.send_replace(SearchResults::default());
        tracing::debug!("Search palette opened");
    }

    pub fn set_tab(&self, tab: SearchTab) {
        self.active_tab.send_replace(tab);
    }

    pub fn active_tab(&self) -> SearchTab {
        *self.active_tab.borrow()
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    pub fn results(&self) -> watch::Receiver<SearchResults> {
        self.results.subscribe()
    }

    pub async fn fetch_tab_data(
        &self,
        tab: SearchTab,
        query: &str,
    ) -> Result<FetchOutcome, AppError> {
        let query = query.trim();

        let Some(procedure) = tab.procedure() else {
            let needle = query.to_lowercase();
            let rows: Vec<SearchRow> = PROMPT_CATALOG
                .iter()
                .filter(|entry| entry.matches(&needle))
                .map(|entry| entry.to_row())
                .collect();
            self.publish(tab, rows.clone());
            return Ok(FetchOutcome::Local(rows));
        };

        // Every network-tab lookup supersedes the one in flight, cached or not.
        let token = CancellationToken::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(previous) = in_flight.replace(token.clone()) {
                previous.cancel();
            }

            if let Some(rows) = self.cache.get_fresh(tab, query) {
                in_flight.take();
                tracing::debug!(tab = tab.as_str(), query, "Search cache hit");
                self.publish(tab, rows.clone());
                return Ok(FetchOutcome::Cached(rows));
            }
        }

        let params = SearchParams::new(self.user_id.clone(), query, self.settings.page_size);
        let rows = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(tab = tab.as_str(), query, "Search superseded");
                return Ok(FetchOutcome::Superseded);
            }
            rows = self.backend.search(procedure, &params) => rows?,
        };

        // Publish under the lock; `open()` and newer lookups take it first.
        let mut in_flight = self.in_flight.lock().await;
        if token.is_cancelled() {
            tracing::debug!(tab = tab.as_str(), query, "Search superseded");
            return Ok(FetchOutcome::Superseded);
        }
        in_flight.take();

        tracing::debug!(tab = tab.as_str(), query, rows = rows.len(), "Search fetched");
        self.cache.insert(tab, query, rows.clone());
        self.publish(tab, rows.clone());
        Ok(FetchOutcome::Fetched(rows))
    }

    /// Debounce raw input and look up each settled term on the active tab.
    pub fn spawn_input_loop(
        self: &Arc<Self>,
        keystrokes: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        let mut terms = debounce(keystrokes, self.settings.debounce());
        let palette = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(term) = terms.recv().await {
                let tab = palette.active_tab();
                let palette = Arc::clone(&palette);
                tokio::spawn(async move {
                    if let Err(e) = palette.fetch_tab_data(tab, &term).await {
                        tracing::warn!(tab = tab.as_str(), error = %e, "Search failed");
                    }
                });
            }
        })
    }

    fn publish(&self, tab: SearchTab, rows: Vec<SearchRow>) {
        self.results.send_modify(|results| results.set(tab, rows));
    }
}

/// Forward a term only once `window` has passed without a newer one.
pub fn debounce(mut input: mpsc::Receiver<String>, window: Duration) -> mpsc::Receiver<String> {
    let (tx, output) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut pending: Option<String> = None;
        loop {
            match pending.take() {
                None => match input.recv().await {
                    Some(term) => pending = Some(term),
                    None => return,
                },
                Some(term) => {
                    tokio::select! {
                        next = input.recv() => match next {
                            Some(newer) => pending = Some(newer),
                            None => {
                                let _ = tx.send(term).await;
                                return;
                            }
                        },
                        _ = tokio::time::sleep(window) => {
                            if tx.send(term).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    });

    output
}
