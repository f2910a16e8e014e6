//! Citation extraction and quality scoring for assistant replies.
//!
//! Citations come from three places: the gateway's own citations frame, the
//! entity a chat is scoped to, and URLs or well-known domains mentioned in the
//! reply text. Every source is graded through one domain table. The
//! resulting report is advisory and never blocks a reply.

use crate::config::CitationSettings;
use crate::models::{Citation, CitationReport, CredibilityTier, EntityRef, SourceCategory};
use regex::Regex;
use service_core::error::AppError;
use std::collections::{BTreeSet, HashSet};

const OPEN_LEGISLATION_TITLE: &str = "NYS Open Legislation API";
const OPEN_LEGISLATION_URL: &str = "https://legislation.nysenate.gov/api/3/";

struct KnownDomain {
    domain: &'static str,
    name: &'static str,
    tier: CredibilityTier,
    category: SourceCategory,
}

const fn known(
    domain: &'static str,
    name: &'static str,
    tier: CredibilityTier,
    category: SourceCategory,
) -> KnownDomain {
    KnownDomain {
        domain,
        name,
        tier,
        category,
    }
}

use CredibilityTier::{Primary, Secondary, Tertiary};
use SourceCategory::{Academic, Advocacy, Government, News, Reference, ThinkTank};

/// Matched against a host and all of its parents; the longest match wins.
const KNOWN_DOMAINS: &[KnownDomain] = &[
    known("nysenate.gov", "New York State Senate", Primary, Government),
    known("legislation.nysenate.gov", "NYS Open Legislation", Primary, Government),
    known("nyassembly.gov", "New York State Assembly", Primary, Government),
    known("assembly.state.ny.us", "New York State Assembly", Primary, Government),
    known("ny.gov", "New York State Government", Primary, Government),
    known("budget.ny.gov", "NYS Division of the Budget", Primary, Government),
    known("osc.ny.gov", "Office of the State Comptroller", Primary, Government),
    known("osc.state.ny.us", "Office of the State Comptroller", Primary, Government),
    known("elections.ny.gov", "NYS Board of Elections", Primary, Government),
    known("nycourts.gov", "New York State Unified Court System", Primary, Government),
    known("congress.gov", "Congress.gov", Primary, Government),
    known("nytimes.com", "The New York Times", Secondary, News),
    known("timesunion.com", "Times Union", Secondary, News),
    known("cityandstateny.com", "City & State", Secondary, News),
    known("politico.com", "Politico", Secondary, News),
    known("gothamist.com", "Gothamist", Secondary, News),
    known("syracuse.com", "Syracuse.com", Secondary, News),
    known("apnews.com", "Associated Press", Secondary, News),
    known("reuters.com", "Reuters", Secondary, News),
    known("spectrumlocalnews.com", "Spectrum News", Secondary, News),
    known("ballotpedia.org", "Ballotpedia", Secondary, Reference),
    known("wikipedia.org", "Wikipedia", Tertiary, Reference),
    known("empirecenter.org", "Empire Center for Public Policy", Secondary, ThinkTank),
    known("cbcny.org", "Citizens Budget Commission", Secondary, ThinkTank),
    known("fiscalpolicy.org", "Fiscal Policy Institute", Secondary, ThinkTank),
    known("rockinst.org", "Rockefeller Institute of Government", Secondary, ThinkTank),
    known("brookings.edu", "Brookings Institution", Secondary, ThinkTank),
    known("edu", "Academic institution", Secondary, Academic),
    known("nyclu.org", "New York Civil Liberties Union", Tertiary, Advocacy),
    known("commoncause.org", "Common Cause", Tertiary, Advocacy),
    known("reinventalbany.org", "Reinvent Albany", Tertiary, Advocacy),
];

/// Social media and forums are never cited.
const EXCLUDED_DOMAINS: &[&str] = &[
    "reddit.com",
    "quora.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "instagram.com",
];

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"'];

/// Grading rules plus the compiled scanners.
#[derive(Debug, Clone)]
pub struct CitationPolicy {
    own_domain: String,
    self_reliance_threshold: f64,
    url_pattern: Regex,
    mention_pattern: Regex,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    pub citations: Vec<Citation>,
    pub warnings: Vec<String>,
}

impl CitationPolicy {
    pub fn new(settings: &CitationSettings) -> Result<Self, AppError> {
        let url_pattern = Regex::new(r#"https?://[^\s<>"'`\[\]{}|\\^]+"#)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid URL pattern: {}", e)))?;

        let mut mentionable: Vec<&str> = KNOWN_DOMAINS
            .iter()
            .map(|d| d.domain)
            .filter(|d| d.contains('.'))
            .collect();
        // Longest first so `legislation.nysenate.gov` beats `nysenate.gov`.
        mentionable.sort_by_key(|d| std::cmp::Reverse(d.len()));
        let alternatives: Vec<String> = mentionable.iter().map(|d| regex::escape(d)).collect();
        let mention_pattern = Regex::new(&format!(
            r"(?i)\b(?:www\.)?({})\b",
            alternatives.join("|")
        ))
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid domain pattern: {}", e)))?;

        Ok(Self {
            own_domain: settings.app_domain.trim().to_ascii_lowercase(),
            self_reliance_threshold: settings.self_reliance_threshold,
            url_pattern,
            mention_pattern,
        })
    }

    pub fn own_domain(&self) -> &str {
        &self.own_domain
    }

    /// Tier and category for `url`, or `None` for an excluded source.
    pub fn classify(&self, url: &str) -> Option<(CredibilityTier, SourceCategory)> {
        let host = host_of(url);
        if is_excluded(&host) {
            return None;
        }
        if !self.own_domain.is_empty() && domain_matches(&host, &self.own_domain) {
            return Some((Tertiary, SourceCategory::Internal));
        }
        Some(
            lookup(&host)
                .map(|d| (d.tier, d.category))
                .unwrap_or((Tertiary, SourceCategory::Other)),
        )
    }

    fn grade(&self, citation: Citation) -> Option<Citation> {
        let (tier, category) = self.classify(&citation.url)?;
        Some(Citation {
            tier: citation.tier.or(Some(tier)),
            category: citation.category.or(Some(category)),
            ..citation
        })
    }
}

/// Canonical citations for the entity a chat is about, followed by the
/// Open Legislation API.
pub fn entity_citations(entity: &EntityRef, policy: &CitationPolicy) -> Vec<Citation> {
    let mut citations = Vec::new();

    match entity {
        EntityRef::Bill(bill) => {
            if let Some(url) = non_empty(&bill.url) {
                let excerpt = non_empty(&bill.summary)
                    .unwrap_or("Bill text, status and history from the New York State Senate");
                citations.push(Citation::new(
                    format!("{}: {}", bill.bill_number, bill.title),
                    url,
                    excerpt,
                ));
            }
        }
        EntityRef::Member(member) => {
            if let Some(url) = non_empty(&member.bio_url) {
                citations.push(Citation::new(
                    format!("{} - Official Biography", member.name),
                    url,
                    "Official legislator profile",
                ));
            }
            if let Some(url) = non_empty(&member.ballotpedia_url) {
                citations.push(Citation::new(
                    format!("{} - Ballotpedia", member.name),
                    url,
                    "Electoral history and biography",
                ));
            }
        }
        EntityRef::Committee(committee) => {
            if let Some(url) = non_empty(&committee.url) {
                let excerpt = non_empty(&committee.description)
                    .unwrap_or("Committee membership, meetings and agendas");
                citations.push(Citation::new(
                    format!("{} Committee", committee.name),
                    url,
                    excerpt,
                ));
            }
        }
    }

    citations.push(Citation::new(
        OPEN_LEGISLATION_TITLE,
        OPEN_LEGISLATION_URL,
        "Official New York State legislative data",
    ));

    citations
        .into_iter()
        .filter_map(|c| policy.grade(c))
        .collect()
}

/// Pull cited sources out of free text.
pub fn scan_text(text: &str, policy: &CitationPolicy) -> ScanResult {
    let mut result = ScanResult::default();
    let mut seen = HashSet::new();

    let mut add = |url: String, title: String, result: &mut ScanResult| {
        if !seen.insert(url.trim_end_matches('/').to_ascii_lowercase()) {
            return;
        }
        match policy.grade(Citation::new(title, url.clone(), "")) {
            Some(citation) => result.citations.push(citation),
            None => {
                let warning = format!("Excluded unreliable source: {}", host_of(&url));
                tracing::debug!(url = %url, "Dropping citation from excluded domain");
                if !result.warnings.contains(&warning) {
                    result.warnings.push(warning);
                }
            }
        }
    };

    for found in policy.url_pattern.find_iter(text) {
        let url = found.as_str().trim_end_matches(TRAILING_PUNCTUATION).to_string();
        if host_of(&url).is_empty() {
            continue;
        }
        let title = display_name(&host_of(&url));
        add(url, title, &mut result);
    }

    // Bare mentions, ignoring the URLs already handled above.
    let without_urls = policy.url_pattern.replace_all(text, " ");
    for caps in policy.mention_pattern.captures_iter(&without_urls) {
        let Some(domain) = caps.get(1) else { continue };
        let domain = domain.as_str().to_ascii_lowercase();
        let title = display_name(&domain);
        add(format!("https://{}", domain), title, &mut result);
    }

    result
}

/// Drop citations that do not point anywhere.
pub fn retain_resolvable(citations: Vec<Citation>) -> Vec<Citation> {
    citations.into_iter().filter(Citation::is_resolvable).collect()
}

/// Grade a citation set for diversity and self-reliance.
pub fn validate(citations: &[Citation], policy: &CitationPolicy) -> CitationReport {
    let categories: BTreeSet<SourceCategory> = citations
        .iter()
        .filter_map(|c| {
            c.category
                .or_else(|| policy.classify(&c.url).map(|(_, category)| category))
        })
        .collect();

    let internal = citations
        .iter()
        .filter(|c| {
            c.category == Some(SourceCategory::Internal)
                || (!policy.own_domain.is_empty()
                    && domain_matches(&host_of(&c.url), &policy.own_domain))
        })
        .count();
    let self_reliance_pct = if citations.is_empty() {
        0.0
    } else {
        internal as f64 * 100.0 / citations.len() as f64
    };

    let mut warnings = Vec::new();
    if self_reliance_pct > policy.self_reliance_threshold {
        warnings.push(format!(
            "Over-reliance on {} content: {:.0}% of citations are self-references",
            policy.own_domain, self_reliance_pct
        ));
    }
    let diversity_score = categories.len();
    if diversity_score < 2 && citations.len() > 1 {
        warnings.push(format!(
            "Low source diversity: {} citations from {} categor{}",
            citations.len(),
            diversity_score,
            if diversity_score == 1 { "y" } else { "ies" }
        ));
    }

    CitationReport {
        valid: warnings.is_empty(),
        diversity_score,
        self_reliance_pct,
        categories: categories.into_iter().collect(),
        warnings,
    }
}

/// Final citations and report for a completed reply.
///
/// Citations delivered in the stream take precedence. Without them the
/// entity's canonical sources are merged with whatever the text mentions.
pub fn annotate(
    text: &str,
    entity: Option<&EntityRef>,
    stream_citations: Vec<Citation>,
    policy: &CitationPolicy,
) -> (Vec<Citation>, CitationReport) {
    let mut scan_warnings = Vec::new();

    let citations = if stream_citations.is_empty() {
        let mut merged = entity
            .map(|e| entity_citations(e, policy))
            .unwrap_or_default();
        let scanned = scan_text(text, policy);
        scan_warnings = scanned.warnings;

        let mut seen: HashSet<String> = merged.iter().map(|c| normalize(&c.url)).collect();
        for citation in scanned.citations {
            if seen.insert(normalize(&citation.url)) {
                merged.push(citation);
            }
        }
        merged
    } else {
        retain_resolvable(stream_citations)
            .into_iter()
            .filter_map(|c| policy.grade(c))
            .collect()
    };

    let mut report = validate(&citations, policy);
    report.warnings.extend(scan_warnings);
    (citations, report)
}

fn normalize(url: &str) -> String {
    url.trim_end_matches('/').to_ascii_lowercase()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn host_of(url: &str) -> String {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let host = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.split(':').next().unwrap_or_default();
    let host = host.to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .map(|prefix| prefix.ends_with('.'))
            .unwrap_or(false)
}

fn is_excluded(host: &str) -> bool {
    EXCLUDED_DOMAINS.iter().any(|d| domain_matches(host, d))
}

fn lookup(host: &str) -> Option<&'static KnownDomain> {
    KNOWN_DOMAINS
        .iter()
        .filter(|d| domain_matches(host, d.domain))
        .max_by_key(|d| d.domain.len())
}

fn display_name(host: &str) -> String {
    lookup(host)
        .map(|d| d.name.to_string())
        .unwrap_or_else(|| host.to_string())
}
