use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::citation::{Citation, CitationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Thumbs up / thumbs down left on an assistant reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Positive,
    Negative,
}

/// A message in a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Client-generated random token.
    pub id: String,

    pub role: Role,

    /// Authoritative text once the message is finalized.
    pub content: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Partial text while a reply is still streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streamed_content: Option<String>,

    #[serde(default)]
    pub is_streaming: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_report: Option<CitationReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), false)
    }

    /// Empty assistant message that tokens will be streamed into.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), true)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), false)
    }

    fn new(role: Role, content: String, is_streaming: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            streamed_content: if is_streaming { Some(String::new()) } else { None },
            is_streaming,
            citations: Vec::new(),
            citation_report: None,
            feedback: None,
        }
    }

    /// Text the UI should render right now.
    pub fn display_text(&self) -> &str {
        match (&self.streamed_content, self.is_streaming) {
            (Some(partial), true) => partial,
            _ => &self.content,
        }
    }

    /// Move whatever is in `content` to its final state and clear streaming fields.
    pub fn finalize(&mut self, content: String) {
        self.content = content;
        self.streamed_content = None;
        self.is_streaming = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_streams_until_finalized() {
        let mut msg = Message::assistant_placeholder();
        assert!(msg.is_streaming);
        assert_eq!(msg.display_text(), "");

        msg.streamed_content = Some("Half an ans".to_string());
        assert_eq!(msg.display_text(), "Half an ans");

        msg.finalize("Half an answer".to_string());
        assert!(!msg.is_streaming);
        assert!(msg.streamed_content.is_none());
        assert_eq!(msg.display_text(), "Half an answer");
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(Message::user("a").id, Message::user("a").id);
    }

    #[test]
    fn serializes_camel_case_without_empty_fields() {
        let msg = Message::assistant("Done");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["isStreaming"], false);
        assert!(value.get("streamedContent").is_none());
        assert!(value.get("citations").is_none());
    }
}
