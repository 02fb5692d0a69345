//! Streaming event protocol.
//!
//! A run emits `perspective_detected`, an optional `gaps_identified`,
//! `translation_start`, any number of `content_delta`, then exactly one of
//! `message_done` or `error`. Events go through a single `mpsc::Sender`, so
//! their order is the order they were produced in.

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::llm::{ChatMessage, ChatModel};
use crate::models::{Direction, GapItem, Perspective};

/// Which phase an `error` event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Preprocess,
    Translate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TranslateEvent {
    PerspectiveDetected {
        perspective: Perspective,
        confidence: f64,
        reason: String,
    },
    GapsIdentified {
        gaps: Vec<GapItem>,
        suggestions: Vec<String>,
    },
    TranslationStart {
        direction: Direction,
    },
    ContentDelta {
        delta: String,
    },
    MessageDone {
        translated_content: String,
        detected_perspective: Perspective,
        direction: Direction,
        gaps: Vec<GapItem>,
        suggestions: Vec<String>,
        /// Set once the result has been stored.
        translation_id: Option<String>,
    },
    Error {
        message: String,
        stage: ErrorStage,
    },
}

impl TranslateEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PerspectiveDetected { .. } => "perspective_detected",
            Self::GapsIdentified { .. } => "gaps_identified",
            Self::TranslationStart { .. } => "translation_start",
            Self::ContentDelta { .. } => "content_delta",
            Self::MessageDone { .. } => "message_done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageDone { .. } | Self::Error { .. })
    }

    /// The event's payload object.
    pub fn data(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }

    /// Server-sent-events frame: `event: <name>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.data())
    }
}

/// How phase 2 ended.
#[derive(Debug, PartialEq)]
pub(crate) enum StreamOutcome {
    /// The model finished; carries the full text.
    Completed(String),
    Failed(String),
    /// The receiver went away; nothing more can be delivered.
    Disconnected,
}

/// Stream the translation, forwarding every non-empty delta as a
/// `content_delta` event. Going `idle` without a chunk counts as a failure.
pub(crate) async fn stream_translation(
    model: &dyn ChatModel,
    messages: &[ChatMessage],
    idle: Duration,
    events: &mpsc::Sender<TranslateEvent>,
) -> StreamOutcome {
    let mut chunks = match tokio::time::timeout(idle, model.stream(messages)).await {
        Ok(Ok(chunks)) => chunks,
        Ok(Err(e)) => return StreamOutcome::Failed(e.to_string()),
        Err(_) => return StreamOutcome::Failed(idle_message(idle)),
    };

    let mut text = String::new();
    loop {
        let chunk = match tokio::time::timeout(idle, chunks.next()).await {
            Err(_) => return StreamOutcome::Failed(idle_message(idle)),
            Ok(None) => break,
            Ok(Some(Err(e))) => return StreamOutcome::Failed(e.to_string()),
            Ok(Some(Ok(chunk))) => chunk,
        };

        let delta = chunk.delta();
        if delta.is_empty() {
            continue;
        }
        tracing::trace!(chars = delta.len(), "Content delta");
        text.push_str(&delta);
        if events.send(TranslateEvent::ContentDelta { delta }).await.is_err() {
            return StreamOutcome::Disconnected;
        }
    }
    StreamOutcome::Completed(text)
}

fn idle_message(idle: Duration) -> String {
    format!("Model produced no output for {}ms", idle.as_millis())
}
