//! Server-Sent-Events decoding for the gateway's token stream.
//!
//! Bytes go in, typed events come out. Everything tolerant about parsing
//! lives here: partial frames and split UTF-8 sequences are buffered, and
//! payloads that are not valid JSON or have an unknown shape are dropped.

use crate::models::Citation;
use serde::Deserialize;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// A decoded frame of the gateway stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text from the model.
    ContentDelta(String),
    /// Sources the gateway collected while enriching the prompt.
    Citations(Vec<Citation>),
    /// Terminal `[DONE]` frame.
    Done,
}

/// Incremental decoder; feed it chunks as they arrive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `[DONE]` frame has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode every complete line in `chunk`, keeping the remainder buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = self.decode_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        let payload = line.strip_prefix(DATA_PREFIX)?.trim_start();

        if payload.is_empty() {
            return None;
        }
        if payload == DONE_SENTINEL {
            self.finished = true;
            return Some(StreamEvent::Done);
        }

        match serde_json::from_str::<Frame>(payload) {
            Ok(frame) => frame.into_event(),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    payload_len = payload.len(),
                    "Skipping malformed stream frame"
                );
                None
            }
        }
    }
}

/// Union of the frame shapes the gateway relays.
#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    citations: Option<Vec<serde_json::Value>>,
    /// OpenAI-style chunk.
    #[serde(default)]
    choices: Vec<Choice>,
    /// Anthropic-style chunk.
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl Frame {
    fn into_event(self) -> Option<StreamEvent> {
        if self.kind.as_deref() == Some("citations") {
            let citations = self
                .citations
                .unwrap_or_default()
                .into_iter()
                .filter_map(|value| serde_json::from_value::<Citation>(value).ok())
                .filter(Citation::is_resolvable)
                .collect();
            return Some(StreamEvent::Citations(citations));
        }

        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .or_else(|| self.delta.and_then(|delta| delta.text))?;

        if text.is_empty() {
            None
        } else {
            Some(StreamEvent::ContentDelta(text))
        }
    }
}
