//! Streaming chat session.
//!
//! A session owns the message list of one conversation, optionally scoped to
//! a bill, legislator or committee. Each reply runs as its own task with its
//! own cancellation token and writes into its assistant message by id, so
//! several replies may stream at once. Observers follow the conversation
//! through a `watch` channel; persistence and usage accounting happen behind
//! the conversation and never fail it.
//!
//! ```text
//! Idle -> Initializing -> AwaitingInput <-> Streaming
//! ```

use crate::config::ChatSettings;
use crate::models::{
    ChatSessionRecord, Citation, CitationReport, EntityRef, Feedback, Message, Role, WordLimit,
};
use crate::services::citations::{self, CitationPolicy};
use crate::services::gateway::{
    ContextMessage, Gateway, GatewayContext, GatewayError, GatewayRequest, RequestType,
};
use crate::services::sse::StreamEvent;
use crate::services::store::ChatStore;
use crate::services::usage::{count_words, UsageMeter};
use crate::services::write_behind::{SyncStatus, WriteBehind};
use futures::StreamExt;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const ERROR_REPLY: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";
pub const EMPTY_REPLY: &str =
    "I apologize, but I was unable to generate a response. Please try rephrasing your question.";

const UNTITLED: &str = "New chat";
const TITLE_CHARS: usize = 60;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Daily word limit reached: {used} of {limit} words used")]
    BudgetExceeded { used: u64, limit: u64 },

    #[error("Message is empty")]
    EmptyPrompt,

    #[error("Usage ledger unavailable: {0}")]
    Usage(#[from] AppError),

    #[error("Chat session is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPhase {
    Idle,
    Initializing,
    AwaitingInput,
    Streaming,
}

/// How a reply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// What observers see after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub phase: ChatPhase,
    pub messages: Vec<Message>,
}

/// Collaborators a session talks to.
pub struct ChatDeps {
    pub gateway: Arc<dyn Gateway>,
    pub store: Arc<dyn ChatStore>,
    pub meter: Arc<UsageMeter>,
    pub citations: CitationPolicy,
    pub retry: RetryConfig,
}

/// Handle to one in-flight reply.
pub struct TurnHandle {
    message_id: String,
    outcome: oneshot::Receiver<TurnOutcome>,
}

impl TurnHandle {
    /// Id of the assistant message the reply streams into.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub async fn wait(self) -> TurnOutcome {
        self.outcome.await.unwrap_or(TurnOutcome::Cancelled)
    }
}

#[derive(Debug, Clone, Copy)]
enum ReplyMode {
    Stream,
    Complete,
}

enum ReplyEnd {
    Done { text: String, citations: Vec<Citation> },
    Cancelled { partial: String },
    Failed { error: GatewayError },
}

struct Turn {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct State {
    phase: ChatPhase,
    messages: Vec<Message>,
    in_flight: HashMap<String, Turn>,
    closed: bool,
}

struct Shared {
    deps: ChatDeps,
    user_id: String,
    entity: Option<EntityRef>,
    settings: ChatSettings,
    state: Mutex<State>,
    snapshot: watch::Sender<ChatSnapshot>,
    persistence: WriteBehind,
    initialized: AtomicBool,
}

pub struct ChatSession {
    shared: Arc<Shared>,
}

impl ChatSession {
    /// Open a session. Must be called from within a tokio runtime.
    pub fn open(
        deps: ChatDeps,
        user_id: impl Into<String>,
        entity: Option<EntityRef>,
        settings: ChatSettings,
    ) -> Self {
        let persistence = WriteBehind::spawn(Arc::clone(&deps.store), deps.retry.clone());
        let (snapshot, _) = watch::channel(ChatSnapshot {
            phase: ChatPhase::Idle,
            messages: Vec::new(),
        });

        Self {
            shared: Arc::new(Shared {
                deps,
                user_id: user_id.into(),
                entity,
                settings,
                state: Mutex::new(State {
                    phase: ChatPhase::Idle,
                    messages: Vec::new(),
                    in_flight: HashMap::new(),
                    closed: false,
                }),
                snapshot,
                persistence,
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub fn entity(&self) -> Option<&EntityRef> {
        self.shared.entity.as_ref()
    }

    /// Ask for the opening analysis of the session's entity.
    ///
    /// Runs at most once. Returns `None` when there was nothing to do: the
    /// session is a general chat or was already initialized.
    pub async fn initialize(&self) -> Result<Option<TurnOutcome>, ChatError> {
        let shared = &self.shared;

        let Some(entity) = shared.entity.as_ref() else {
            if !shared.initialized.swap(true, Ordering::SeqCst) {
                let mut state = shared.state.lock().await;
                if state.phase == ChatPhase::Idle {
                    state.phase = ChatPhase::AwaitingInput;
                    shared.publish(&state);
                }
            }
            return Ok(None);
        };

        shared.check_budget()?;
        if shared.initialized.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        let mode = if shared.settings.stream_initial_analysis {
            ReplyMode::Stream
        } else {
            ReplyMode::Complete
        };
        let request = GatewayRequest::new(
            entity.analysis_prompt(),
            RequestType::from(entity.chat_type()),
            GatewayContext::for_entity(Some(entity)),
        );

        let handle = {
            let mut state = shared.state.lock().await;
            if state.closed {
                return Err(ChatError::Closed);
            }
            let placeholder = Message::assistant_placeholder();
            let message_id = placeholder.id.clone();
            state.messages.push(placeholder);
            state.phase = ChatPhase::Initializing;
            shared.publish(&state);

            tracing::info!(
                chat_type = %entity.chat_type(),
                related_id = entity.related_id(),
                message_id = %message_id,
                streamed = shared.settings.stream_initial_analysis,
                "Requesting initial analysis"
            );
            Shared::start_turn(shared, &mut state, message_id, request, mode)
        };

        Ok(Some(handle.wait().await))
    }

    /// Send a user message and start streaming the reply.
    pub async fn send(&self, text: &str) -> Result<TurnHandle, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        let shared = &self.shared;
        shared.check_budget()?;

        let mut state = shared.state.lock().await;
        if state.closed {
            return Err(ChatError::Closed);
        }

        let mut context = GatewayContext::for_entity(shared.entity.as_ref());
        context.previous_messages = recent_context(&state.messages, shared.settings.context_window);

        let request_type = shared
            .entity
            .as_ref()
            .map(|e| RequestType::from(e.chat_type()))
            .unwrap_or(RequestType::Chat);
        let request = GatewayRequest::new(text, request_type, context);

        let placeholder = Message::assistant_placeholder();
        let message_id = placeholder.id.clone();
        state.messages.push(Message::user(text));
        state.messages.push(placeholder);
        state.phase = ChatPhase::Streaming;
        shared.publish(&state);

        tracing::info!(
            message_id = %message_id,
            prompt_len = text.len(),
            in_flight = state.in_flight.len() + 1,
            "Sending chat message"
        );
        Ok(Shared::start_turn(shared, &mut state, message_id, request, ReplyMode::Stream))
    }

    /// Cancel every reply in flight and wait until they have settled.
    pub async fn stop(&self) {
        let turns: Vec<(String, Turn)> = {
            let mut state = self.shared.state.lock().await;
            state.in_flight.drain().collect()
        };
        self.shared.settle(turns).await;
    }

    /// Cancel the reply streaming into `message_id`, if any.
    pub async fn stop_message(&self, message_id: &str) -> bool {
        let turn = {
            let mut state = self.shared.state.lock().await;
            state.in_flight.remove(message_id)
        };
        match turn {
            Some(turn) => {
                self.shared.settle(vec![(message_id.to_string(), turn)]).await;
                true
            }
            None => false,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.snapshot.borrow().messages.clone()
    }

    pub fn phase(&self) -> ChatPhase {
        self.shared.snapshot.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.persistence.status()
    }

    /// Id of the stored session row once the first save went through.
    pub fn session_id(&self) -> Option<String> {
        self.shared.persistence.session_id()
    }

    /// Attach thumbs up/down to an assistant message.
    pub async fn set_feedback(&self, message_id: &str, feedback: Feedback) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;

        let Some(message) = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && m.role == Role::Assistant && !m.is_streaming)
        else {
            return false;
        };
        message.feedback = Some(feedback);

        shared.publish(&state);
        shared.persistence.enqueue(shared.record(state.messages.clone()));
        tracing::debug!(message_id, ?feedback, "Feedback recorded");
        true
    }

    /// Stop all replies and flush pending persistence. Sends fail afterwards.
    pub async fn close(&self) {
        self.stop().await;
        self.shared.state.lock().await.closed = true;
        self.shared.persistence.shutdown().await;
        tracing::debug!(session_id = ?self.session_id(), "Chat session closed");
    }
}

impl Shared {
    fn check_budget(&self) -> Result<(), ChatError> {
        let meter = &self.deps.meter;
        if meter.can_make_request(0) {
            return Ok(());
        }

        let used = meter.snapshot().words_used;
        let limit = match meter.limit() {
            WordLimit::Limited(limit) => limit,
            WordLimit::Unlimited => u64::MAX,
        };
        tracing::warn!(user_id = %self.user_id, used, limit, "Daily word limit reached");
        Err(ChatError::BudgetExceeded { used, limit })
    }

    fn publish(&self, state: &State) {
        self.snapshot.send_replace(ChatSnapshot {
            phase: state.phase,
            messages: state.messages.clone(),
        });
    }

    fn record(&self, messages: Vec<Message>) -> ChatSessionRecord {
        let title = match &self.entity {
            Some(entity) => entity.title(),
            None => messages
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.chars().take(TITLE_CHARS).collect())
                .unwrap_or_else(|| UNTITLED.to_string()),
        };
        ChatSessionRecord::snapshot(&self.user_id, &title, self.entity.as_ref(), messages)
    }

    /// Spawn the reply task. The caller holds the state lock, so the task
    /// cannot finish before it is registered.
    fn start_turn(
        shared: &Arc<Shared>,
        state: &mut State,
        message_id: String,
        request: GatewayRequest,
        mode: ReplyMode,
    ) -> TurnHandle {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();

        let task = tokio::spawn(run_turn(
            Arc::clone(shared),
            message_id.clone(),
            request,
            mode,
            cancel.clone(),
            done_tx,
        ));
        state
            .in_flight
            .insert(message_id.clone(), Turn { cancel, task });

        TurnHandle {
            message_id,
            outcome: done_rx,
        }
    }

    async fn write_partial(&self, message_id: &str, partial: &str, cancel: &CancellationToken) {
        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            return;
        }
        if let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) {
            message.streamed_content = Some(partial.to_string());
        }
        self.publish(&state);
    }

    async fn finish_turn(&self, message_id: &str, end: ReplyEnd) -> TurnOutcome {
        let mut state = self.state.lock().await;
        state.in_flight.remove(message_id);

        let mut words = 0;
        let mut persist = false;
        let outcome = match end {
            ReplyEnd::Done {
                text,
                citations: streamed,
            } => {
                if text.trim().is_empty() {
                    tracing::warn!(message_id, "Gateway returned an empty reply");
                    finalize(&mut state, message_id, EMPTY_REPLY.to_string(), None);
                } else {
                    words = count_words(&text);
                    let annotated = citations::annotate(
                        &text,
                        self.entity.as_ref(),
                        streamed,
                        &self.deps.citations,
                    );
                    finalize(&mut state, message_id, text, Some(annotated));
                }
                persist = true;
                TurnOutcome::Completed
            }
            ReplyEnd::Cancelled { partial } => {
                tracing::info!(message_id, partial_len = partial.len(), "Reply cancelled");
                finalize(&mut state, message_id, partial, None);
                TurnOutcome::Cancelled
            }
            ReplyEnd::Failed { error } => {
                tracing::error!(message_id, error = %error, "Reply failed");
                finalize(&mut state, message_id, ERROR_REPLY.to_string(), None);
                TurnOutcome::Failed
            }
        };

        if state.in_flight.is_empty() {
            state.phase = ChatPhase::AwaitingInput;
        }
        self.publish(&state);

        if persist {
            self.persistence.enqueue(self.record(state.messages.clone()));
        }
        drop(state);

        if words > 0 {
            if let Err(e) = self.deps.meter.add_words_used(words).await {
                tracing::warn!(message_id, words, error = %e, "Failed to record word usage");
            }
        }
        outcome
    }

    /// Cancel `turns`, wait for their tasks, and make sure none of their
    /// messages is left streaming.
    async fn settle(&self, turns: Vec<(String, Turn)>) {
        if turns.is_empty() {
            return;
        }

        let mut ids = Vec::with_capacity(turns.len());
        let mut tasks = Vec::with_capacity(turns.len());
        for (id, turn) in turns {
            turn.cancel.cancel();
            ids.push(id);
            tasks.push(turn.task);
        }
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Reply task panicked");
            }
        }

        let mut state = self.state.lock().await;
        let mut changed = false;
        for id in &ids {
            if let Some(message) = state
                .messages
                .iter_mut()
                .find(|m| &m.id == id && m.is_streaming)
            {
                let partial = message.streamed_content.take().unwrap_or_default();
                message.finalize(partial);
                changed = true;
            }
        }
        if state.in_flight.is_empty() && state.phase != ChatPhase::AwaitingInput {
            state.phase = ChatPhase::AwaitingInput;
            changed = true;
        }
        if changed {
            self.publish(&state);
        }
        tracing::debug!(stopped = ids.len(), "Replies stopped");
    }
}

async fn run_turn(
    shared: Arc<Shared>,
    message_id: String,
    request: GatewayRequest,
    mode: ReplyMode,
    cancel: CancellationToken,
    done: oneshot::Sender<TurnOutcome>,
) {
    let end = match mode {
        ReplyMode::Stream => stream_reply(&shared, &message_id, &request, &cancel).await,
        ReplyMode::Complete => complete_reply(&shared, &request, &cancel).await,
    };
    let outcome = shared.finish_turn(&message_id, end).await;
    let _ = done.send(outcome);
}

async fn stream_reply(
    shared: &Shared,
    message_id: &str,
    request: &GatewayRequest,
    cancel: &CancellationToken,
) -> ReplyEnd {
    let request = request.clone().streaming(true);
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ReplyEnd::Cancelled { partial: String::new() },
        opened = shared.deps.gateway.stream(&request, cancel.clone()) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(GatewayError::Cancelled) => return ReplyEnd::Cancelled { partial: String::new() },
        Err(error) => return ReplyEnd::Failed { error },
    };

    let mut buffer = String::new();
    let mut citations = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReplyEnd::Cancelled { partial: buffer },
            next = stream.next() => next,
        };

        match next {
            Some(Ok(StreamEvent::ContentDelta(delta))) => {
                buffer.push_str(&delta);
                shared.write_partial(message_id, &buffer, cancel).await;
            }
            Some(Ok(StreamEvent::Citations(found))) => citations = found,
            Some(Ok(StreamEvent::Done)) | None => break,
            Some(Err(GatewayError::Cancelled)) => return ReplyEnd::Cancelled { partial: buffer },
            Some(Err(error)) => return ReplyEnd::Failed { error },
        }
    }

    ReplyEnd::Done {
        text: buffer,
        citations,
    }
}

async fn complete_reply(
    shared: &Shared,
    request: &GatewayRequest,
    cancel: &CancellationToken,
) -> ReplyEnd {
    let request = request.clone().streaming(false);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => ReplyEnd::Cancelled { partial: String::new() },
        answer = shared.deps.gateway.complete(&request) => match answer {
            Ok(response) => ReplyEnd::Done {
                text: response.generated_text,
                citations: Vec::new(),
            },
            Err(GatewayError::Cancelled) => ReplyEnd::Cancelled { partial: String::new() },
            Err(error) => ReplyEnd::Failed { error },
        },
    }
}

fn finalize(
    state: &mut State,
    message_id: &str,
    content: String,
    annotated: Option<(Vec<Citation>, CitationReport)>,
) {
    let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) else {
        return;
    };
    message.finalize(content);
    if let Some((citations, report)) = annotated {
        message.citations = citations;
        message.citation_report = Some(report);
    }
}

/// The last `window` settled messages, role and content only.
fn recent_context(messages: &[Message], window: usize) -> Vec<ContextMessage> {
    let settled: Vec<&Message> = messages
        .iter()
        .filter(|m| !m.is_streaming && !m.content.trim().is_empty())
        .collect();
    let skip = settled.len().saturating_sub(window);
    settled[skip..].iter().map(|m| ContextMessage::from(*m)).collect()
}
