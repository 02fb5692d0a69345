//! Batch and streaming entry points over the two pipeline forms.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::executor::{translate_messages, PipelineExecutor};
use super::state::RunState;
use super::stream::{stream_translation, ErrorStage, StreamOutcome, TranslateEvent};
use crate::checkpoint::{CheckpointError, RunConfig, TenantCheckpointStore};
use crate::llm::ChatModel;

const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TranslateAgent {
    model: Arc<dyn ChatModel>,
    full: PipelineExecutor,
    preprocess: PipelineExecutor,
    stream_idle_timeout: Duration,
}

impl TranslateAgent {
    pub fn new(model: Arc<dyn ChatModel>, checkpoints: Arc<TenantCheckpointStore>) -> Self {
        Self {
            full: PipelineExecutor::full(Arc::clone(&model), Arc::clone(&checkpoints)),
            preprocess: PipelineExecutor::preprocess(Arc::clone(&model), checkpoints),
            model,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Executor of the given form, e.g. for `get_state`.
    pub fn executor(&self, include_translation: bool) -> &PipelineExecutor {
        if include_translation {
            &self.full
        } else {
            &self.preprocess
        }
    }

    /// Fresh run id in the current realm.
    pub fn new_run_config() -> RunConfig {
        RunConfig::for_current_realm(Uuid::new_v4().to_string())
    }

    /// Run all stages and return the final state.
    pub async fn translate(
        &self,
        content: &str,
        context: Option<&str>,
    ) -> Result<RunState, CheckpointError> {
        self.translate_with_config(content, context, &Self::new_run_config())
            .await
    }

    pub async fn translate_with_config(
        &self,
        content: &str,
        context: Option<&str>,
        config: &RunConfig,
    ) -> Result<RunState, CheckpointError> {
        let state = self.full.invoke(content, context, config).await?;
        tracing::info!(
            realm = %config.realm,
            thread_id = %config.thread_id,
            perspective = %state.perspective,
            direction = %state.direction,
            degraded = state.has_error(),
            "Batch translation finished"
        );
        Ok(state)
    }

    /// Run in streaming mode, sending events to `events`.
    ///
    /// Always ends with exactly one terminal event unless the receiver has
    /// gone away.
    pub async fn stream(
        &self,
        content: &str,
        context: Option<&str>,
        events: &mpsc::Sender<TranslateEvent>,
    ) {
        self.stream_with_config(content, context, &Self::new_run_config(), events)
            .await
    }

    pub async fn stream_with_config(
        &self,
        content: &str,
        context: Option<&str>,
        config: &RunConfig,
        events: &mpsc::Sender<TranslateEvent>,
    ) {
        // Every send error means the receiver is gone; stop quietly.
        macro_rules! emit {
            ($event:expr) => {
                if events.send($event).await.is_err() {
                    tracing::debug!(thread_id = %config.thread_id, "Event receiver closed");
                    return;
                }
            };
        }

        // Phase 1: classification and gap analysis.
        let state = match self.preprocess.invoke(content, context, config).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(
                    realm = %config.realm,
                    thread_id = %config.thread_id,
                    error = %e,
                    "Checkpoint failure during preprocessing"
                );
                emit!(TranslateEvent::Error {
                    message: e.to_string(),
                    stage: ErrorStage::Preprocess,
                });
                return;
            }
        };

        emit!(TranslateEvent::PerspectiveDetected {
            perspective: state.perspective,
            confidence: state.confidence,
            reason: state.reason.clone(),
        });

        if !state.gaps.is_empty() {
            emit!(TranslateEvent::GapsIdentified {
                gaps: state.gaps.clone(),
                suggestions: state.suggestions.clone(),
            });
        }

        if let Some(message) = state.error.clone() {
            emit!(TranslateEvent::Error {
                message,
                stage: ErrorStage::Preprocess,
            });
            return;
        }

        // Phase 2: streamed translation.
        emit!(TranslateEvent::TranslationStart {
            direction: state.direction,
        });

        let messages = translate_messages(&state);
        match stream_translation(self.model.as_ref(), &messages, self.stream_idle_timeout, events).await
        {
            StreamOutcome::Completed(translated_content) => {
                tracing::info!(
                    thread_id = %config.thread_id,
                    direction = %state.direction,
                    chars = translated_content.len(),
                    "Streaming translation finished"
                );
                emit!(TranslateEvent::MessageDone {
                    translated_content,
                    detected_perspective: state.perspective,
                    direction: state.direction,
                    gaps: state.gaps,
                    suggestions: state.suggestions,
                    translation_id: None,
                });
            }
            StreamOutcome::Failed(message) => {
                tracing::warn!(thread_id = %config.thread_id, error = %message, "Streaming translation failed");
                emit!(TranslateEvent::Error {
                    message,
                    stage: ErrorStage::Translate,
                });
            }
            StreamOutcome::Disconnected => {
                tracing::debug!(thread_id = %config.thread_id, "Event receiver closed mid-stream");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::{
        BackendFactory, CheckpointBackend, MemoryBackendFactory,
    };
    use crate::llm::mock::StreamStep;
    use crate::llm::{LlmError, MockChatModel};
    use crate::models::{Direction, Perspective};
    use crate::pipeline::prompts::PM_TO_DEV_SYSTEM_PROMPT;

    pub(crate) const CSV_STORY: &str = "As a user, I want to export my data as CSV";
    pub(crate) const PM_REPLY: &str =
        r#"{"perspective": "pm", "confidence": 0.9, "reason": "user story"}"#;
    pub(crate) const GAPS_REPLY: &str = r#"{"gaps": [{"category": "Scope", "description": "Which fields are exported", "importance": "high"}], "suggestions": ["Is there a row limit?"]}"#;

    pub(crate) fn agent(model: Arc<MockChatModel>) -> TranslateAgent {
        let store = Arc::new(TenantCheckpointStore::new(Arc::new(MemoryBackendFactory)));
        TranslateAgent::new(model, store)
    }

    async fn run_stream(agent: &TranslateAgent, content: &str) -> Vec<TranslateEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        agent.stream(content, None, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn names(events: &[TranslateEvent]) -> Vec<&'static str> {
        events.iter().map(TranslateEvent::name).collect()
    }

    /// Protocol invariants every run must satisfy.
    fn assert_well_formed(events: &[TranslateEvent]) {
        let count = |name: &str| events.iter().filter(|e| e.name() == name).count();
        assert!(count("perspective_detected") <= 1);
        assert!(count("gaps_identified") <= 1);
        assert!(count("translation_start") <= 1);
        assert_eq!(count("message_done") + count("error"), 1, "{:?}", names(events));
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn successful_stream_event_order() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(GAPS_REPLY)
                .with_stream(&["Build ", "", "an export"]),
        );
        let events = run_stream(&agent(model.clone()), CSV_STORY).await;

        assert_well_formed(&events);
        assert_eq!(
            names(&events),
            vec![
                "perspective_detected",
                "gaps_identified",
                "translation_start",
                "content_delta",
                "content_delta",
                "message_done",
            ]
        );
        match events.last().unwrap() {
            TranslateEvent::MessageDone {
                translated_content,
                detected_perspective,
                direction,
                translation_id,
                ..
            } => {
                assert_eq!(translated_content, "Build an export");
                assert_eq!(*detected_perspective, Perspective::Pm);
                assert_eq!(*direction, Direction::PmToDev);
                assert!(translation_id.is_none());
            }
            other => panic!("unexpected terminal event {other:?}"),
        }

        let stream_calls = model.stream_calls();
        assert_eq!(stream_calls[0][0].content, PM_TO_DEV_SYSTEM_PROMPT);
        assert!(stream_calls[0][1].content.contains("- Which fields are exported"));
    }

    #[tokio::test]
    async fn no_gaps_means_no_gaps_event() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(r#"{"gaps": [], "suggestions": ["unused"]}"#)
                .with_stream(&["ok"]),
        );
        let events = run_stream(&agent(model), CSV_STORY).await;
        assert_well_formed(&events);
        assert_eq!(
            names(&events),
            vec!["perspective_detected", "translation_start", "content_delta", "message_done"]
        );
    }

    #[tokio::test]
    async fn preprocess_error_ends_run_before_translation() {
        let model = Arc::new(MockChatModel::new().with_invoke_error(LlmError::Connection("x".into())));
        let events = run_stream(&agent(model.clone()), "whatever").await;

        assert_well_formed(&events);
        assert_eq!(names(&events), vec!["perspective_detected", "error"]);
        assert!(matches!(
            &events[1],
            TranslateEvent::Error { stage: ErrorStage::Preprocess, .. }
        ));
        assert!(model.stream_calls().is_empty());
    }

    #[tokio::test]
    async fn gap_error_still_reports_perspective() {
        let model = Arc::new(MockChatModel::new().with_reply(PM_REPLY).with_reply("nope"));
        let events = run_stream(&agent(model), CSV_STORY).await;
        assert_well_formed(&events);
        assert_eq!(names(&events), vec!["perspective_detected", "error"]);
        match &events[0] {
            TranslateEvent::PerspectiveDetected { perspective, .. } => {
                assert_eq!(*perspective, Perspective::Pm)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_failure_is_terminal_translate_error() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(GAPS_REPLY)
                .with_stream_steps(vec![
                    StreamStep::Chunk("half".into()),
                    StreamStep::Fail(LlmError::Stream("eof".into())),
                ]),
        );
        let events = run_stream(&agent(model), CSV_STORY).await;
        assert_well_formed(&events);
        assert_eq!(
            names(&events),
            vec![
                "perspective_detected",
                "gaps_identified",
                "translation_start",
                "content_delta",
                "error",
            ]
        );
        assert!(matches!(
            events.last().unwrap(),
            TranslateEvent::Error { stage: ErrorStage::Translate, .. }
        ));
    }

    #[tokio::test]
    async fn stream_open_failure_is_translate_error() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(GAPS_REPLY)
                .with_stream_open_error(LlmError::Status {
                    status: 503,
                    body: "busy".into(),
                }),
        );
        let events = run_stream(&agent(model), CSV_STORY).await;
        assert_well_formed(&events);
        assert_eq!(names(&events).last(), Some(&"error"));
        assert!(!names(&events).contains(&"content_delta"));
    }

    #[tokio::test]
    async fn idle_stream_becomes_translate_error() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(GAPS_REPLY)
                .with_stream_steps(vec![StreamStep::Stall(Duration::from_millis(400))]),
        );
        let agent = agent(model).with_stream_idle_timeout(Duration::from_millis(50));
        let events = run_stream(&agent, CSV_STORY).await;
        assert_well_formed(&events);
        assert!(matches!(
            events.last().unwrap(),
            TranslateEvent::Error { stage: ErrorStage::Translate, .. }
        ));
    }

    struct BrokenFactory;

    impl BackendFactory for BrokenFactory {
        fn create(&self, realm: &str) -> Result<Arc<dyn CheckpointBackend>, CheckpointError> {
            Err(CheckpointError::Construction {
                realm: realm.to_string(),
                reason: "read-only filesystem".into(),
            })
        }
    }

    #[tokio::test]
    async fn checkpoint_failure_yields_single_preprocess_error() {
        let model = Arc::new(MockChatModel::new().with_reply(PM_REPLY));
        let store = Arc::new(TenantCheckpointStore::new(Arc::new(BrokenFactory)));
        let agent = TranslateAgent::new(model.clone(), store);

        let events = run_stream(&agent, CSV_STORY).await;
        assert_eq!(names(&events), vec!["error"]);
        assert!(model.invoke_calls().is_empty());
    }

    #[tokio::test]
    async fn batch_checkpoint_failure_is_returned() {
        let model = Arc::new(MockChatModel::new());
        let store = Arc::new(TenantCheckpointStore::new(Arc::new(BrokenFactory)));
        let agent = TranslateAgent::new(model, store);
        assert!(matches!(
            agent.translate(CSV_STORY, None).await,
            Err(CheckpointError::Construction { .. })
        ));
    }

    #[tokio::test]
    async fn runs_use_realm_from_context() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(GAPS_REPLY)
                .with_reply("done"),
        );
        let store = Arc::new(TenantCheckpointStore::new(Arc::new(MemoryBackendFactory)));
        let agent = TranslateAgent::new(model, Arc::clone(&store));

        crate::context::scope(crate::context::RequestContext::new("acme"), async {
            agent.translate(CSV_STORY, None).await.unwrap();
        })
        .await;

        assert_eq!(store.initialized_realms().unwrap(), vec!["acme"]);
    }
}
