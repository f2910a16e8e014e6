//! Legislative entities a chat or search surface can be scoped to.

use serde::{Deserialize, Serialize};

/// A bill as it arrives from the bills table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillEntity {
    pub bill_id: i64,
    /// Print number, e.g. `A1234` or `S5678B`.
    pub bill_number: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Tracking page on the Senate site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A legislator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEntity {
    pub people_id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chamber: Option<String>,
    /// Official biography page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ballotpedia_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeEntity {
    pub committee_id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chamber: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chair_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The one entity a chat session is tied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRef {
    Bill(BillEntity),
    Member(MemberEntity),
    Committee(CommitteeEntity),
}

/// Kind of conversation, stored in the `chat_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Bill,
    Member,
    Committee,
    General,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Bill => "bill",
            ChatType::Member => "member",
            ChatType::Committee => "committee",
            ChatType::General => "general",
        }
    }

    pub fn for_entity(entity: Option<&EntityRef>) -> Self {
        entity.map(EntityRef::chat_type).unwrap_or(ChatType::General)
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EntityRef {
    pub fn chat_type(&self) -> ChatType {
        match self {
            EntityRef::Bill(_) => ChatType::Bill,
            EntityRef::Member(_) => ChatType::Member,
            EntityRef::Committee(_) => ChatType::Committee,
        }
    }

    /// Primary key of the referenced row.
    pub fn related_id(&self) -> i64 {
        match self {
            EntityRef::Bill(bill) => bill.bill_id,
            EntityRef::Member(member) => member.people_id,
            EntityRef::Committee(committee) => committee.committee_id,
        }
    }

    /// Session title shown in the chat list.
    pub fn title(&self) -> String {
        match self {
            EntityRef::Bill(bill) => format!("{}: {}", bill.bill_number, bill.title),
            EntityRef::Member(member) => member.name.clone(),
            EntityRef::Committee(committee) => format!("{} Committee", committee.name),
        }
    }

    /// Prompt submitted as the hidden first turn when a panel opens.
    pub fn analysis_prompt(&self) -> String {
        match self {
            EntityRef::Bill(bill) => {
                let mut prompt = format!(
                    "Provide a comprehensive analysis of New York State bill {}: \"{}\".",
                    bill.bill_number, bill.title
                );
                if let Some(year) = bill.session_year {
                    prompt.push_str(&format!(" Legislative session: {}.", year));
                }
                if let Some(sponsor) = non_empty(&bill.sponsor) {
                    prompt.push_str(&format!(" Sponsor: {}.", sponsor));
                }
                if let Some(status) = non_empty(&bill.status) {
                    prompt.push_str(&format!(" Current status: {}.", status));
                }
                prompt.push_str(
                    " Explain its purpose, key provisions, potential fiscal impact, \
                     who it affects, and where it stands in the legislative process.",
                );
                prompt
            }
            EntityRef::Member(member) => {
                let mut prompt = format!(
                    "Provide an overview of New York State legislator {}",
                    member.name
                );
                match (non_empty(&member.chamber), non_empty(&member.district)) {
                    (Some(chamber), Some(district)) => {
                        prompt.push_str(&format!(" ({}, District {})", chamber, district))
                    }
                    (Some(chamber), None) => prompt.push_str(&format!(" ({})", chamber)),
                    (None, Some(district)) => {
                        prompt.push_str(&format!(" (District {})", district))
                    }
                    (None, None) => {}
                }
                if let Some(party) = non_empty(&member.party) {
                    prompt.push_str(&format!(", a member of the {} party", party));
                }
                prompt.push_str(
                    ". Summarize their legislative priorities, notable sponsored bills, \
                     committee assignments, and voting patterns.",
                );
                prompt
            }
            EntityRef::Committee(committee) => {
                let mut prompt = format!(
                    "Provide an overview of the New York State {} Committee",
                    committee.name
                );
                if let Some(chamber) = non_empty(&committee.chamber) {
                    prompt.push_str(&format!(" in the {}", chamber));
                }
                if let Some(chair) = non_empty(&committee.chair_name) {
                    prompt.push_str(&format!(", chaired by {}", chair));
                }
                prompt.push_str(
                    ". Describe its jurisdiction, recent activity, key pending bills, \
                     and its role in the legislative process.",
                );
                prompt
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
