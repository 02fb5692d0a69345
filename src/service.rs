//! Translation service: runs the agent and stores what it produces.
//!
//! In streaming mode the final `message_done` is held back until the result
//! is stored, so the event can carry the new record id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::checkpoint::{CheckpointError, SqliteBackendFactory, TenantCheckpointStore};
use crate::config::AppConfig;
use crate::db::{DatabaseError, SqliteTranslationRepository, TranslationRepository};
use crate::llm::{LlmError, OllamaChatModel};
use crate::models::{Direction, GapItem, Perspective, TranslateResult, TranslationRecord};
use crate::pipeline::{TranslateAgent, TranslateEvent};

pub const MAX_CONTENT_CHARS: usize = 10_000;
pub const MAX_CONTEXT_CHARS: usize = 2_000;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Events buffered between the agent and the caller's receiver.
const EVENT_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM setup failed: {0}")]
    Llm(#[from] LlmError),
}

// ═══════════════════════════════════════════════════════════
// Request / response types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub content: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub context: Option<String>,
}

fn default_stream() -> bool {
    true
}

impl TranslateRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stream: true,
            context: None,
        }
    }

    /// Content must be 1..=10000 characters, context at most 2000.
    pub fn validate(&self) -> Result<(), TranslateError> {
        let content_chars = self.content.chars().count();
        if content_chars == 0 {
            return Err(TranslateError::InvalidRequest("content must not be empty".into()));
        }
        if content_chars > MAX_CONTENT_CHARS {
            return Err(TranslateError::InvalidRequest(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters ({content_chars})"
            )));
        }
        if let Some(context) = &self.context {
            let context_chars = context.chars().count();
            if context_chars > MAX_CONTEXT_CHARS {
                return Err(TranslateError::InvalidRequest(format!(
                    "context exceeds {MAX_CONTEXT_CHARS} characters ({context_chars})"
                )));
            }
        }
        Ok(())
    }
}

/// Batch-mode response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub translation_id: Uuid,
    pub translated_content: String,
    pub original_content: String,
    pub direction: Direction,
    pub detected_perspective: Perspective,
    pub gaps: Vec<GapItem>,
    pub suggestions: Vec<String>,
    /// Set when a stage degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub content: Vec<TranslationRecord>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub total_pages: u32,
}

// ═══════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════

pub struct TranslateService {
    agent: TranslateAgent,
    repository: Arc<dyn TranslationRepository>,
}

impl TranslateService {
    pub fn new(agent: TranslateAgent, repository: Arc<dyn TranslationRepository>) -> Self {
        Self { agent, repository }
    }

    /// Wire the Ollama model, per-realm SQLite checkpoints and the SQLite
    /// translation store from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, TranslateError> {
        let model = Arc::new(OllamaChatModel::new(&config.llm)?);
        let checkpoints = Arc::new(TenantCheckpointStore::new(Arc::new(
            SqliteBackendFactory::new(config.storage.checkpoints_dir()),
        )));
        let repository = SqliteTranslationRepository::open(&config.storage.translations_db())?;

        tracing::info!(
            model = %model.model(),
            data_dir = %config.storage.data_dir.display(),
            "Translate service ready"
        );

        let agent = TranslateAgent::new(model, checkpoints)
            .with_stream_idle_timeout(config.llm.stream_idle_timeout);
        Ok(Self::new(agent, Arc::new(repository)))
    }

    pub fn agent(&self) -> &TranslateAgent {
        &self.agent
    }

    /// Batch translation. Degraded runs are stored and returned like
    /// successful ones, with `error` set.
    pub async fn translate(
        &self,
        content: &str,
        context: Option<&str>,
    ) -> Result<TranslateResponse, TranslateError> {
        let state = self.agent.translate(content, context).await?;
        let result = state.to_result();
        let record = self.repository.create(&result).await?;

        Ok(TranslateResponse {
            translation_id: record.id,
            translated_content: result.translated_content,
            original_content: result.original_content,
            direction: result.direction,
            detected_perspective: result.detected_perspective,
            gaps: result.gaps,
            suggestions: result.suggestions,
            error: state.error,
        })
    }

    /// Streaming translation into `sink`. Events are forwarded in order;
    /// `message_done` is sent only after the result is stored.
    pub async fn translate_stream(
        &self,
        content: &str,
        context: Option<&str>,
        sink: &mpsc::Sender<TranslateEvent>,
    ) {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

        let producer = async move {
            self.agent.stream(content, context, &tx).await;
        };

        // Owns `rx`: if the sink closes, dropping it stops the producer.
        let forwarder = async move {
            while let Some(event) = rx.recv().await {
                let event = match event {
                    TranslateEvent::MessageDone { .. } => self.store_final(content, event).await,
                    other => other,
                };
                if sink.send(event).await.is_err() {
                    tracing::debug!("Stream sink closed");
                    break;
                }
            }
        };

        tokio::join!(producer, forwarder);
    }

    /// Run `translate_stream` on a new task and return its receiver. The
    /// caller's request context (realm) carries over to the task.
    pub fn spawn_stream(
        self: &Arc<Self>,
        content: String,
        context: Option<String>,
    ) -> mpsc::Receiver<TranslateEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let service = Arc::clone(self);
        let request = crate::context::current();

        tokio::spawn(crate::context::scope(request, async move {
            service
                .translate_stream(&content, context.as_deref(), &tx)
                .await;
        }));
        rx
    }

    /// Store the result in a `message_done` event and fill in its id.
    /// A storage failure is logged and leaves the id null.
    async fn store_final(&self, content: &str, event: TranslateEvent) -> TranslateEvent {
        let result = match event {
            TranslateEvent::MessageDone {
                translated_content,
                detected_perspective,
                direction,
                gaps,
                suggestions,
                ..
            } => TranslateResult {
                original_content: content.to_string(),
                translated_content,
                detected_perspective,
                direction,
                gaps,
                suggestions,
            },
            other => return other,
        };

        let translation_id = match self.repository.create(&result).await {
            Ok(record) => Some(record.id.to_string()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to store streamed translation");
                None
            }
        };

        TranslateEvent::MessageDone {
            translated_content: result.translated_content,
            detected_perspective: result.detected_perspective,
            direction: result.direction,
            gaps: result.gaps,
            suggestions: result.suggestions,
            translation_id,
        }
    }

    /// One page of history, newest first. `page` starts at 1; `size` is
    /// clamped to 1..=100.
    pub async fn get_history(&self, page: u32, size: u32) -> Result<HistoryPage, TranslateError> {
        let page = page.max(1);
        let size = size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(size);

        let content = self.repository.list_recent(size, offset).await?;
        let total = self.repository.count().await?;
        let total_pages = page_count(total, size);

        Ok(HistoryPage {
            content,
            total,
            page,
            size,
            total_pages,
        })
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<TranslationRecord>, TranslateError> {
        Ok(self.repository.get_by_id(id).await?)
    }
}

/// Pages needed for `total` rows, saturating at `u32::MAX`.
fn page_count(total: u64, size: u32) -> u32 {
    u32::try_from(total.div_ceil(u64::from(size.max(1)))).unwrap_or(u32::MAX)
}
