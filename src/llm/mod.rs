//! Language-model capability consumed by the translation pipeline.
//!
//! Two calls are needed: a single-shot `invoke` and an incremental `stream`.
//! Message content may arrive either as one string or as a list of parts;
//! `MessageContent::text()` is the single place that flattens it.

pub mod mock;
pub mod ollama;

pub use mock::MockChatModel;
pub use ollama::OllamaChatModel;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("LLM backend not reachable at {0}")]
    Connection(String),

    #[error("LLM backend returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("LLM request timed out: {0}")]
    Timeout(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Streaming error: {0}")]
    Stream(String),
}

// ═══════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One element of multi-part content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text(String),
    /// Structured block, e.g. `{"type": "text", "text": "..."}` or an image
    /// reference. Only blocks carrying a string `text` field contribute text.
    Block(serde_json::Value),
}

impl ContentPart {
    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Block(value) => value.get("text").and_then(|t| t.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenate every text part in order, skipping non-text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts.iter().filter_map(ContentPart::as_text).collect(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// A complete model reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    pub content: MessageContent,
}

impl AiMessage {
    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// One increment of a streamed reply. The delta may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiMessageChunk {
    pub content: MessageContent,
}

impl AiMessageChunk {
    pub fn delta(&self) -> String {
        self.content.text()
    }
}

/// Lazy, finite, non-restartable sequence of reply chunks.
pub type ChunkStream = BoxStream<'static, Result<AiMessageChunk, LlmError>>;

/// A chat model the pipeline can call.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<AiMessage, LlmError>;

    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, LlmError>;
}
