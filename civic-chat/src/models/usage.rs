//! Daily word budget model.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Stored shape of the per-user ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    pub words_used: u64,
    pub last_reset_date: NaiveDate,
}

impl LedgerState {
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            words_used: 0,
            last_reset_date: today,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Student,
    Staff,
    Researcher,
    Professional,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordLimit {
    Limited(u64),
    Unlimited,
}

impl WordLimit {
    pub fn allows(&self, total: u64) -> bool {
        match self {
            WordLimit::Limited(limit) => total <= *limit,
            WordLimit::Unlimited => true,
        }
    }
}

impl SubscriptionTier {
    /// Tier names are matched case-insensitively; anything unknown is free.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "student" => SubscriptionTier::Student,
            "staff" => SubscriptionTier::Staff,
            "researcher" => SubscriptionTier::Researcher,
            "professional" => SubscriptionTier::Professional,
            "enterprise" => SubscriptionTier::Enterprise,
            _ => SubscriptionTier::Free,
        }
    }

    pub fn daily_limit(&self) -> WordLimit {
        match self {
            SubscriptionTier::Free => WordLimit::Limited(1_000),
            SubscriptionTier::Student => WordLimit::Limited(5_000),
            SubscriptionTier::Staff => WordLimit::Limited(15_000),
            SubscriptionTier::Researcher => WordLimit::Limited(50_000),
            SubscriptionTier::Professional | SubscriptionTier::Enterprise => WordLimit::Unlimited,
        }
    }
}

/// Who is spending the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub tier: SubscriptionTier,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, email: Option<String>, tier: SubscriptionTier) -> Self {
        Self {
            user_id: user_id.into(),
            email,
            tier,
        }
    }
}
