//! HTTP adapter tests.
//!
//! Runs the gateway client and the REST store against a wiremock server and
//! checks headers, bodies, stream decoding and status mapping.

mod common;

use civic_chat::config::{BackendConfig, ChatSettings, CitationSettings, GatewaySettings};
use civic_chat::models::{ChatSessionRecord, ChatType, Message};
use civic_chat::services::gateway::{GatewayContext, GatewayRequest, RequestType};
use civic_chat::services::sse::StreamEvent;
use civic_chat::services::store::{SearchParams, SearchProcedure};
use civic_chat::services::{
    ChatDeps, ChatSession, ChatStore, CitationPolicy, Gateway, GatewayError, HttpGateway,
    RestStore, SearchBackend, SyncStatus, TurnOutcome,
};
use common::{housing_bill, settled_sync, Harness};
use futures::StreamExt;
use secrecy::Secret;
use serde_json::json;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FUNCTION_PATH: &str = "/functions/v1/generate-with-openai";

fn backend(server: &MockServer) -> BackendConfig {
    BackendConfig {
        rest_url: format!("{}/rest/v1", server.uri()),
        functions_url: format!("{}/functions/v1", server.uri()),
        anon_key: Secret::new("anon-key".to_string()),
        access_token: Some(Secret::new("user-jwt".to_string())),
    }
}

fn gateway(server: &MockServer) -> HttpGateway {
    HttpGateway::new(&backend(server), GatewaySettings::default()).unwrap()
}

fn store(server: &MockServer) -> RestStore {
    RestStore::new(&backend(server)).unwrap()
}

fn chat_request(prompt: &str) -> GatewayRequest {
    GatewayRequest::new(prompt, RequestType::Chat, GatewayContext::default())
}

fn sse(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {}\n\n", f)).collect()
}

async fn collect(gateway: &HttpGateway, request: &GatewayRequest) -> Vec<StreamEvent> {
    gateway
        .stream(request, CancellationToken::new())
        .await
        .unwrap()
        .map(|event| event.unwrap())
        .collect()
        .await
}

// ============================================================================
// Gateway
// ============================================================================

mod gateway_client {
    use super::*;

    #[tokio::test]
    async fn streams_deltas_with_auth_headers() {
        let server = MockServer::start().await;
        let body = sse(&[
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"{"delta":{"text":" world"}}"#,
            "[DONE]",
        ]);
        Mock::given(method("POST"))
            .and(path(FUNCTION_PATH))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer user-jwt"))
            .and(body_partial_json(json!({
                "prompt": "Hi there",
                "type": "chat",
                "stream": true,
                "enhanceWithNysData": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let events = collect(&gateway(&server), &chat_request("Hi there")).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::ContentDelta("Hello".to_string()),
                StreamEvent::ContentDelta(" world".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn body_without_done_still_terminates() {
        let server = MockServer::start().await;
        let body = format!(
            "{}data: {{\"choices\":[{{\"delta\":{{\"content\":\"tail\"}}}}]}}",
            sse(&["not json", r#"{"choices":[{"delta":{"content":"head "}}]}"#])
        );
        Mock::given(method("POST"))
            .and(path(FUNCTION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let events = collect(&gateway(&server), &chat_request("Hi")).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::ContentDelta("head ".to_string()),
                StreamEvent::ContentDelta("tail".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn rate_limit_and_server_errors_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "prompt": "busy" })))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "prompt": "broken" })))
            .respond_with(ResponseTemplate::new(500).set_body_string("model unavailable"))
            .mount(&server)
            .await;
        let gateway = gateway(&server);

        let busy = gateway.stream(&chat_request("busy"), CancellationToken::new()).await;
        assert!(matches!(busy, Err(GatewayError::RateLimited)));

        match gateway.complete(&chat_request("broken")).await {
            Err(GatewayError::ApiError { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "model unavailable");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn complete_parses_json_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(FUNCTION_PATH))
            .and(body_partial_json(json!({ "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "generatedText": "Full analysis.",
                "nysDataUsed": true
            })))
            .mount(&server)
            .await;

        let answer = gateway(&server).complete(&chat_request("Analyze")).await.unwrap();
        assert_eq!(answer.generated_text, "Full analysis.");
        assert!(answer.nys_data_used);
    }

    #[tokio::test]
    async fn empty_prompt_never_leaves_the_process() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = gateway(&server).complete(&chat_request("")).await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }
}

// ============================================================================
// REST store
// ============================================================================

mod rest_store {
    use super::*;

    fn record() -> ChatSessionRecord {
        ChatSessionRecord::snapshot(
            "user-1",
            "A1234: Housing Reform Act",
            Some(&housing_bill()),
            vec![Message::assistant("Overview.")],
        )
    }

    #[tokio::test]
    async fn insert_returns_new_row_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/chat_sessions"))
            .and(header("prefer", "return=representation"))
            .and(header("apikey", "anon-key"))
            .and(body_partial_json(json!({
                "user_id": "user-1",
                "chat_type": "bill",
                "bill_id": 42
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": "6f1c" }])))
            .expect(1)
            .mount(&server)
            .await;

        let id = store(&server).insert_session(&record()).await.unwrap();
        assert_eq!(id, "6f1c");
    }

    #[tokio::test]
    async fn numeric_ids_are_stringified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/chat_sessions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": 17 }])))
            .mount(&server)
            .await;

        assert_eq!(store(&server).insert_session(&record()).await.unwrap(), "17");
    }

    #[tokio::test]
    async fn update_filters_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/chat_sessions"))
            .and(query_param("id", "eq.6f1c"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).update_session("6f1c", &record()).await.unwrap();
    }

    #[tokio::test]
    async fn search_calls_named_procedure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/search_chats"))
            .and(body_partial_json(json!({
                "p_user_id": "user-1",
                "p_query": "housing",
                "p_limit": 20
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "c1", "title": "Housing reform", "type": "chat", "rank": 0.8 }
            ])))
            .mount(&server)
            .await;

        let rows = store(&server)
            .search(
                SearchProcedure::SearchChats,
                &SearchParams::new("user-1", "housing", 20),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "chat");
        assert_eq!(rows[0].rank, Some(0.8));
    }

    #[tokio::test]
    async fn invalid_search_params_are_rejected_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = store(&server)
            .search(SearchProcedure::SearchAll, &SearchParams::new("user-1", "q", 0))
            .await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[tokio::test]
    async fn statuses_map_to_app_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(query_param("id", "eq.denied"))
            .respond_with(ResponseTemplate::new(403).set_body_string("row level security"))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(query_param("id", "eq.down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(query_param("id", "eq.busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "5"))
            .mount(&server)
            .await;
        let store = store(&server);

        let denied = store.update_session("denied", &record()).await.unwrap_err();
        assert!(matches!(denied, AppError::Forbidden(_)));
        assert!(!denied.is_retryable());

        let down = store.update_session("down", &record()).await.unwrap_err();
        assert!(matches!(down, AppError::DatabaseError(_)));
        assert!(down.is_retryable());

        let busy = store.update_session("busy", &record()).await.unwrap_err();
        assert_eq!(busy.retry_after(), Some(5));
    }
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn bill_session_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FUNCTION_PATH))
        .and(body_partial_json(json!({ "type": "bill", "context": { "relatedId": 42 } })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                r#"{"choices":[{"delta":{"content":"The bill caps rents."}}]}"#,
                r#"{"type":"citations","citations":[{"title":"Senate bill page","url":"https://www.nysenate.gov/legislation/bills/2025/A1234","excerpt":"Bill text"}]}"#,
                "[DONE]",
            ]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/chat_sessions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": "row-1" }])))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(vec![], 0).await;
    let session = ChatSession::open(
        ChatDeps {
            gateway: Arc::new(gateway(&server)),
            store: Arc::new(store(&server)),
            meter: harness.meter.clone(),
            citations: CitationPolicy::new(&CitationSettings::default()).unwrap(),
            retry: RetryConfig::no_retry(),
        },
        common::USER_ID,
        Some(housing_bill()),
        ChatSettings::default(),
    );
    let mut sync = session.sync_status();

    assert_eq!(
        session.initialize().await.unwrap(),
        Some(TurnOutcome::Completed)
    );
    let reply = session.messages().pop().unwrap();
    assert_eq!(reply.content, "The bill caps rents.");
    assert_eq!(reply.citations.len(), 1);
    assert_eq!(reply.citations[0].title, "Senate bill page");

    match settled_sync(&mut sync).await {
        SyncStatus::Synced { session_id, .. } => assert_eq!(session_id, "row-1"),
        other => panic!("session was not saved: {:?}", other),
    }
    assert_eq!(harness.meter.snapshot().words_used, 4);
    assert_eq!(ChatType::for_entity(session.entity()), ChatType::Bill);
    session.close().await;
}
