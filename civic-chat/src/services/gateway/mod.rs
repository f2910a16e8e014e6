//! LLM gateway function abstractions.
//!
//! The gateway is a hosted serverless function that optionally enriches a
//! prompt with legislative data and proxies it to a chat-completion API. This
//! module defines its wire contract and a trait so the chat session can run
//! against the real function or a scripted double.

pub mod http;
pub mod mock;

use crate::models::{ChatType, EntityRef, Message, Role};
use crate::services::sse::StreamEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use validator::Validate;

pub use http::HttpGateway;

/// Error type for gateway operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Gateway not configured: {0}")]
    NotConfigured(String),

    #[error("Gateway error {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Prompt category the gateway uses to pick its system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Bill,
    Member,
    Committee,
    Chat,
    Problem,
    Media,
    Idea,
    Default,
}

impl From<ChatType> for RequestType {
    fn from(chat_type: ChatType) -> Self {
        match chat_type {
            ChatType::Bill => RequestType::Bill,
            ChatType::Member => RequestType::Member,
            ChatType::Committee => RequestType::Committee,
            ChatType::General => RequestType::Chat,
        }
    }
}

/// Role and content of a prior turn; nothing else is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for ContextMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<ChatType>,
    #[serde(default)]
    pub related_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_messages: Vec<ContextMessage>,
}

impl GatewayContext {
    /// Context describing the entity a session is scoped to.
    pub fn for_entity(entity: Option<&EntityRef>) -> Self {
        Self {
            chat_type: Some(ChatType::for_entity(entity)),
            related_id: entity.map(EntityRef::related_id),
            title: entity.map(EntityRef::title),
            entity: entity.and_then(|e| serde_json::to_value(e).ok()),
            system_context: None,
            previous_messages: Vec::new(),
        }
    }
}

/// JSON body accepted by the gateway function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub prompt: String,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhance_with_nys_data: Option<bool>,
    pub context: GatewayContext,
}

impl GatewayRequest {
    pub fn new(
        prompt: impl Into<String>,
        request_type: RequestType,
        context: GatewayContext,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            request_type,
            stream: false,
            model: None,
            fast_mode: None,
            enhance_with_nys_data: None,
            context,
        }
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn check(&self) -> Result<(), GatewayError> {
        self.validate()
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))
    }
}

/// Non-streamed gateway answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub generated_text: String,
    #[serde(default)]
    pub nys_data_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<serde_json::Value>,
}

/// Type alias for gateway token streams.
pub type GatewayStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

/// Anything that can answer a prompt, whole or streamed.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Wait for the complete answer.
    async fn complete(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError>;

    /// Open a token stream. Cancelling `cancel` ends the stream and aborts
    /// the underlying request.
    async fn stream(
        &self,
        request: &GatewayRequest,
        cancel: CancellationToken,
    ) -> Result<GatewayStream, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BillEntity;

    #[test]
    fn request_serializes_to_gateway_wire_shape() {
        let bill = EntityRef::Bill(BillEntity {
            bill_id: 42,
            bill_number: "S100".to_string(),
            title: "Clean Water Act".to_string(),
            session_year: None,
            status: None,
            sponsor: None,
            summary: None,
            url: None,
        });
        let mut context = GatewayContext::for_entity(Some(&bill));
        context.previous_messages.push(ContextMessage {
            role: Role::User,
            content: "Who sponsored it?".to_string(),
        });

        let mut request =
            GatewayRequest::new("Summarize", RequestType::Bill, context).streaming(true);
        request.model = Some("gpt-4o".to_string());

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "bill");
        assert_eq!(value["stream"], true);
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["context"]["chatType"], "bill");
        assert_eq!(value["context"]["relatedId"], 42);
        assert_eq!(value["context"]["previousMessages"][0]["role"], "user");
        assert_eq!(value["context"]["entity"]["bill_number"], "S100");
        assert!(value.get("fastMode").is_none());
    }

    #[test]
    fn empty_prompt_fails_validation() {
        let request = GatewayRequest::new("", RequestType::Chat, GatewayContext::default());
        assert!(matches!(request.check(), Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn general_chat_uses_chat_request_type() {
        assert_eq!(RequestType::from(ChatType::General), RequestType::Chat);
        assert_eq!(RequestType::from(ChatType::Committee), RequestType::Committee);
    }

    #[test]
    fn response_defaults_missing_flags() {
        let response: GatewayResponse =
            serde_json::from_str(r#"{"generatedText":"Hello"}"#).unwrap();
        assert_eq!(response.generated_text, "Hello");
        assert!(!response.nys_data_used);
        assert!(response.search_results.is_none());
    }
}
