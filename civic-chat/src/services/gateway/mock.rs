//! Scripted gateway for testing.

use super::{Gateway, GatewayError, GatewayRequest, GatewayResponse, GatewayStream};
use crate::services::sse::StreamEvent;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// One step of a scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(StreamEvent),
    Pause(Duration),
    /// Stay open until the caller cancels.
    Hang,
    Fail(GatewayError),
}

/// What the next `stream`/`complete` call should do.
#[derive(Debug, Clone)]
pub enum Script {
    Stream(Vec<ScriptStep>),
    /// The request itself fails before any byte arrives.
    Reject(GatewayError),
    Complete(GatewayResponse),
}

impl Script {
    /// Stream `chunks` as content deltas followed by `[DONE]`.
    pub fn reply(chunks: &[&str]) -> Self {
        let mut steps: Vec<ScriptStep> = chunks
            .iter()
            .map(|c| ScriptStep::Emit(StreamEvent::ContentDelta(c.to_string())))
            .collect();
        steps.push(ScriptStep::Emit(StreamEvent::Done));
        Script::Stream(steps)
    }

    /// Stream `chunks` then hang until cancelled.
    pub fn partial_then_hang(chunks: &[&str]) -> Self {
        let mut steps: Vec<ScriptStep> = chunks
            .iter()
            .map(|c| ScriptStep::Emit(StreamEvent::ContentDelta(c.to_string())))
            .collect();
        steps.push(ScriptStep::Hang);
        Script::Stream(steps)
    }

    pub fn answer(text: &str) -> Self {
        Script::Complete(GatewayResponse {
            generated_text: text.to_string(),
            nys_data_used: false,
            search_results: None,
        })
    }
}

/// Gateway double that replays queued scripts in call order and records
/// every request it receives.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GatewayRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, script: Script) {
        self.scripts.lock().await.push_back(script);
    }

    pub async fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_script(&self, request: &GatewayRequest) -> Script {
        self.requests.lock().await.push(request.clone());
        self.scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Script::reply(&["Mock response for: ", &request.prompt]))
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn complete(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        request.check()?;
        match self.next_script(request).await {
            Script::Complete(response) => Ok(response),
            Script::Reject(error) => Err(error),
            Script::Stream(steps) => {
                let mut text = String::new();
                for step in steps {
                    match step {
                        ScriptStep::Emit(StreamEvent::ContentDelta(delta)) => text.push_str(&delta),
                        ScriptStep::Fail(error) => return Err(error),
                        _ => {}
                    }
                }
                Ok(GatewayResponse {
                    generated_text: text,
                    nys_data_used: false,
                    search_results: None,
                })
            }
        }
    }

    async fn stream(
        &self,
        request: &GatewayRequest,
        cancel: CancellationToken,
    ) -> Result<GatewayStream, GatewayError> {
        request.check()?;
        let steps = match self.next_script(request).await {
            Script::Stream(steps) => steps,
            Script::Reject(error) => return Err(error),
            Script::Complete(response) => vec![
                ScriptStep::Emit(StreamEvent::ContentDelta(response.generated_text)),
                ScriptStep::Emit(StreamEvent::Done),
            ],
        };

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for step in steps {
                match step {
                    ScriptStep::Emit(event) => {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    ScriptStep::Pause(duration) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(duration) => {}
                        }
                    }
                    ScriptStep::Hang => {
                        cancel.cancelled().await;
                        return;
                    }
                    ScriptStep::Fail(error) => {
                        let _ = tx.send(Err(error)).await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as GatewayStream)
    }
}
