//! Source citations attached to assistant messages.

use serde::{Deserialize, Serialize};

/// How much weight a source carries; 1 is the most authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CredibilityTier {
    Primary = 1,
    Secondary = 2,
    Tertiary = 3,
}

impl TryFrom<u8> for CredibilityTier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CredibilityTier::Primary),
            2 => Ok(CredibilityTier::Secondary),
            3 => Ok(CredibilityTier::Tertiary),
            other => Err(format!("credibility tier out of range: {}", other)),
        }
    }
}

impl From<CredibilityTier> for u8 {
    fn from(tier: CredibilityTier) -> Self {
        tier as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Government,
    News,
    Reference,
    ThinkTank,
    Academic,
    Advocacy,
    Internal,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<CredibilityTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<SourceCategory>,
}

impl Citation {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            excerpt: excerpt.into(),
            tier: None,
            category: None,
        }
    }

    /// A citation is only displayable when it points somewhere.
    pub fn is_resolvable(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Advisory grade of a citation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationReport {
    pub valid: bool,
    /// Number of distinct source categories.
    pub diversity_score: usize,
    /// Share of citations pointing at the application's own domain, 0–100.
    pub self_reliance_pct: f64,
    pub categories: Vec<SourceCategory>,
    pub warnings: Vec<String>,
}
