//! Chat session row persisted to the hosted store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ChatType, EntityRef};
use super::message::Message;

/// Row shape of the `chat_sessions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSessionRecord {
    pub user_id: String,

    pub title: String,

    pub messages: Vec<Message>,

    pub chat_type: ChatType,

    #[serde(default)]
    pub bill_id: Option<i64>,

    #[serde(default)]
    pub member_id: Option<i64>,

    #[serde(default)]
    pub committee_id: Option<i64>,

    pub updated_at: DateTime<Utc>,
}

impl ChatSessionRecord {
    /// Build a snapshot; the foreign key is derived from the entity so at most
    /// one of them is ever set.
    pub fn snapshot(
        user_id: &str,
        title: &str,
        entity: Option<&EntityRef>,
        messages: Vec<Message>,
    ) -> Self {
        let (bill_id, member_id, committee_id) = match entity {
            Some(EntityRef::Bill(bill)) => (Some(bill.bill_id), None, None),
            Some(EntityRef::Member(member)) => (None, Some(member.people_id), None),
            Some(EntityRef::Committee(committee)) => (None, None, Some(committee.committee_id)),
            None => (None, None, None),
        };

        Self {
            user_id: user_id.to_string(),
            title: title.to_string(),
            messages,
            chat_type: ChatType::for_entity(entity),
            bill_id,
            member_id,
            committee_id,
            updated_at: Utc::now(),
        }
    }

    /// At most one foreign key is set and it agrees with `chat_type`.
    pub fn has_consistent_foreign_key(&self) -> bool {
        match (self.chat_type, self.bill_id, self.member_id, self.committee_id) {
            (ChatType::Bill, Some(_), None, None) => true,
            (ChatType::Member, None, Some(_), None) => true,
            (ChatType::Committee, None, None, Some(_)) => true,
            (ChatType::General, None, None, None) => true,
            _ => false,
        }
    }
}
