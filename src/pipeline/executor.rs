//! The stage machine: `detect_perspective → analyze_gaps → [translate]`.
//!
//! One executor type serves both forms; `include_translation` decides
//! whether the final stage is part of the run. State is checkpointed after
//! the input is accepted and after every stage, so `resume` can pick an
//! interrupted run up at the stage recorded as `next`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use super::classify::classify_perspective;
use super::gaps::analyze_gaps;
use super::prompts::{build_translate_prompt, system_prompt};
use super::state::{RunState, StateUpdate};
use crate::checkpoint::{
    next_version, Checkpoint, CheckpointError, CheckpointMetadata, CheckpointSource,
    CheckpointTuple, PendingWrite, RunConfig, TenantCheckpointStore,
};
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{Direction, Perspective};

/// Reason recorded when the classifier fails.
pub const RECOGNITION_ERROR_REASON: &str = "recognition error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DetectPerspective,
    AnalyzeGaps,
    Translate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DetectPerspective => "detect_perspective",
            Self::AnalyzeGaps => "analyze_gaps",
            Self::Translate => "translate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "detect_perspective" => Some(Self::DetectPerspective),
            "analyze_gaps" => Some(Self::AnalyzeGaps),
            "translate" => Some(Self::Translate),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const FULL_STAGES: &[Stage] = &[Stage::DetectPerspective, Stage::AnalyzeGaps, Stage::Translate];
const PREPROCESS_STAGES: &[Stage] = &[Stage::DetectPerspective, Stage::AnalyzeGaps];

/// Where a run continues from, and the checkpoint it continues after.
struct Cursor {
    state: RunState,
    start: usize,
    step: i64,
    config: RunConfig,
    versions: BTreeMap<String, String>,
    /// Update written by the interrupted stage before its checkpoint landed.
    recovered: Option<StateUpdate>,
}

pub struct PipelineExecutor {
    model: Arc<dyn ChatModel>,
    checkpoints: Arc<TenantCheckpointStore>,
    stages: &'static [Stage],
}

impl PipelineExecutor {
    pub fn new(
        model: Arc<dyn ChatModel>,
        checkpoints: Arc<TenantCheckpointStore>,
        include_translation: bool,
    ) -> Self {
        Self {
            model,
            checkpoints,
            stages: if include_translation {
                FULL_STAGES
            } else {
                PREPROCESS_STAGES
            },
        }
    }

    /// All three stages; used for batch translation.
    pub fn full(model: Arc<dyn ChatModel>, checkpoints: Arc<TenantCheckpointStore>) -> Self {
        Self::new(model, checkpoints, true)
    }

    /// Classification and gap analysis only; phase 1 of streaming.
    pub fn preprocess(model: Arc<dyn ChatModel>, checkpoints: Arc<TenantCheckpointStore>) -> Self {
        Self::new(model, checkpoints, false)
    }

    pub fn stages(&self) -> &'static [Stage] {
        self.stages
    }

    pub fn includes_translation(&self) -> bool {
        self.stages.contains(&Stage::Translate)
    }

    fn next_after(&self, index: usize) -> Option<Stage> {
        self.stages.get(index + 1).copied()
    }

    /// Run the pipeline on new input for `config`'s thread.
    ///
    /// Always a fresh run: on a thread that already has checkpoints the input
    /// checkpoint chains onto the newest one, even if that run was cut short.
    /// Stage failures degrade into `RunState::error`; only checkpoint
    /// failures are returned as `Err`.
    pub async fn invoke(
        &self,
        content: &str,
        context: Option<&str>,
        config: &RunConfig,
    ) -> Result<RunState, CheckpointError> {
        let latest = self.checkpoints.get_tuple(&config.latest()).await?;
        let parent = latest.map_or_else(|| config.latest(), |t| t.config);
        let cursor = self.start(content, context, &parent).await?;
        self.run_from(cursor, config).await
    }

    /// Continue an interrupted run from the stage its newest checkpoint
    /// names as `next`, using the stored input.
    ///
    /// `None` when the thread has no checkpoint or nothing left to run in
    /// this form.
    pub async fn resume(&self, config: &RunConfig) -> Result<Option<RunState>, CheckpointError> {
        let Some(latest) = self.checkpoints.get_tuple(&config.latest()).await? else {
            return Ok(None);
        };
        let Some(cursor) = self.resume_point(latest) else {
            return Ok(None);
        };

        tracing::info!(
            realm = %config.realm,
            thread_id = %config.thread_id,
            stage = %self.stages[cursor.start],
            "Resuming pipeline run"
        );
        self.run_from(cursor, config).await.map(Some)
    }

    async fn run_from(&self, mut cursor: Cursor, config: &RunConfig) -> Result<RunState, CheckpointError> {
        for (index, stage) in self.stages.iter().enumerate().skip(cursor.start) {
            let update = match cursor.recovered.take() {
                Some(update) => update,
                None => {
                    let update = self.run_stage(*stage, &cursor.state).await;
                    self.record_writes(&cursor.config, *stage, &update).await?;
                    update
                }
            };

            let writes = serde_json::to_value(&update)?;
            for channel in update.channels() {
                let version = next_version(cursor.versions.get(channel).map(String::as_str));
                cursor.versions.insert(channel.to_string(), version);
            }
            cursor.state.apply(update);
            cursor.step += 1;

            let next = self.next_after(index);
            cursor.config = self
                .save(
                    &cursor.config,
                    &cursor.state,
                    &cursor.versions,
                    CheckpointMetadata {
                        source: CheckpointSource::Loop,
                        step: cursor.step,
                        next: next.map(|s| s.as_str().to_string()),
                        writes: Some(writes),
                    },
                )
                .await?;

            tracing::info!(
                thread_id = %config.thread_id,
                stage = %stage,
                perspective = %cursor.state.perspective,
                degraded = cursor.state.has_error(),
                "Stage complete"
            );
        }

        Ok(cursor.state)
    }

    /// Latest saved state of a run.
    pub async fn get_state(&self, config: &RunConfig) -> Result<Option<RunState>, CheckpointError> {
        match self.checkpoints.get_tuple(config).await? {
            Some(tuple) => Ok(Some(serde_json::from_value(tuple.checkpoint.channel_values)?)),
            None => Ok(None),
        }
    }

    async fn start(
        &self,
        content: &str,
        context: Option<&str>,
        parent: &RunConfig,
    ) -> Result<Cursor, CheckpointError> {
        let state = RunState::new(content, context.map(str::to_string));
        let mut versions = BTreeMap::new();
        for channel in ["content", "context"] {
            versions.insert(channel.to_string(), next_version(None));
        }

        let saved = self
            .save(
                parent,
                &state,
                &versions,
                CheckpointMetadata {
                    source: CheckpointSource::Input,
                    step: -1,
                    next: self.stages.first().map(|s| s.as_str().to_string()),
                    writes: None,
                },
            )
            .await?;

        Ok(Cursor {
            state,
            start: 0,
            step: -1,
            config: saved,
            versions,
            recovered: None,
        })
    }

    /// A run whose latest checkpoint names a next stage of this form.
    fn resume_point(&self, tuple: CheckpointTuple) -> Option<Cursor> {
        let next = tuple.metadata.next.as_deref().and_then(Stage::from_name)?;
        let start = self.stages.iter().position(|s| *s == next)?;
        let state: RunState = serde_json::from_value(tuple.checkpoint.channel_values).ok()?;
        let task_id = task_id(&tuple.config.thread_id, next);

        Some(Cursor {
            state,
            start,
            step: tuple.metadata.step,
            recovered: recover_update(&tuple.pending_writes, &task_id),
            config: tuple.config,
            versions: tuple.checkpoint.channel_versions,
        })
    }

    async fn save(
        &self,
        parent: &RunConfig,
        state: &RunState,
        versions: &BTreeMap<String, String>,
        metadata: CheckpointMetadata,
    ) -> Result<RunConfig, CheckpointError> {
        let checkpoint = Checkpoint {
            id: next_version(parent.checkpoint_id.as_deref()),
            ts: Utc::now(),
            channel_values: serde_json::to_value(state)?,
            channel_versions: versions.clone(),
        };
        self.checkpoints.put(parent, checkpoint, metadata).await
    }

    /// Store a stage's update as pending writes so a crash before the next
    /// checkpoint does not repeat the model call.
    async fn record_writes(
        &self,
        config: &RunConfig,
        stage: Stage,
        update: &StateUpdate,
    ) -> Result<(), CheckpointError> {
        let writes = match serde_json::to_value(update)? {
            Value::Object(map) => map
                .into_iter()
                .map(|(channel, value)| PendingWrite {
                    task_id: String::new(),
                    channel,
                    value,
                })
                .collect(),
            _ => Vec::new(),
        };
        self.checkpoints
            .put_writes(config, writes, &task_id(&config.thread_id, stage))
            .await
    }

    async fn run_stage(&self, stage: Stage, state: &RunState) -> StateUpdate {
        let model = self.model.as_ref();
        match stage {
            Stage::DetectPerspective => detect_perspective(model, state).await,
            Stage::AnalyzeGaps => analyze_gaps_stage(model, state).await,
            Stage::Translate => translate(model, state).await,
        }
    }
}

fn task_id(thread_id: &str, stage: Stage) -> String {
    format!("{thread_id}:{stage}")
}

fn recover_update(writes: &[PendingWrite], task_id: &str) -> Option<StateUpdate> {
    let map: Map<String, Value> = writes
        .iter()
        .filter(|w| w.task_id == task_id)
        .map(|w| (w.channel.clone(), w.value.clone()))
        .collect();
    if map.is_empty() {
        return None;
    }
    serde_json::from_value(Value::Object(map)).ok()
}

// ═══════════════════════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════════════════════

async fn detect_perspective(model: &dyn ChatModel, state: &RunState) -> StateUpdate {
    match classify_perspective(model, &state.content).await {
        Ok(assessment) => StateUpdate {
            perspective: Some(assessment.perspective),
            confidence: Some(assessment.confidence),
            reason: Some(assessment.reason),
            ..StateUpdate::default()
        },
        Err(e) => {
            tracing::warn!(stage = "detect_perspective", error = %e, "Perspective detection failed");
            StateUpdate {
                perspective: Some(Perspective::Unknown),
                confidence: Some(0.0),
                reason: Some(RECOGNITION_ERROR_REASON.to_string()),
                error: Some(format!("Perspective detection failed: {e}")),
                ..StateUpdate::default()
            }
        }
    }
}

async fn analyze_gaps_stage(model: &dyn ChatModel, state: &RunState) -> StateUpdate {
    // Direction and prompt are resolved even on the error path.
    let direction = Direction::for_perspective(state.perspective);
    let mut update = StateUpdate {
        direction: Some(direction),
        system_prompt: Some(system_prompt(direction).to_string()),
        gaps: Some(Vec::new()),
        suggestions: Some(Vec::new()),
        ..StateUpdate::default()
    };

    if state.has_error() {
        return update;
    }

    match analyze_gaps(model, &state.content, state.perspective).await {
        Ok(analysis) => {
            update.gaps = Some(analysis.gaps);
            update.suggestions = Some(analysis.suggestions);
        }
        Err(e) => {
            tracing::warn!(stage = "analyze_gaps", error = %e, "Gap analysis failed");
            update.error = Some(format!("Gap analysis failed: {e}"));
        }
    }
    update
}

async fn translate(model: &dyn ChatModel, state: &RunState) -> StateUpdate {
    if state.has_error() {
        return StateUpdate {
            translated_content: Some(String::new()),
            ..StateUpdate::default()
        };
    }

    match model.invoke(&translate_messages(state)).await {
        Ok(message) => StateUpdate {
            translated_content: Some(message.text()),
            ..StateUpdate::default()
        },
        Err(e) => {
            tracing::warn!(stage = "translate", error = %e, "Translation failed");
            StateUpdate {
                translated_content: Some(String::new()),
                error: Some(format!("Translation failed: {e}")),
                ..StateUpdate::default()
            }
        }
    }
}

/// System and user messages for the translate step. Streaming uses the
/// same construction.
pub fn translate_messages(state: &RunState) -> Vec<ChatMessage> {
    let system = if state.system_prompt.is_empty() {
        system_prompt(state.direction).to_string()
    } else {
        state.system_prompt.clone()
    };
    vec![
        ChatMessage::system(system),
        ChatMessage::user(build_translate_prompt(
            &state.content,
            state.context.as_deref(),
            &state.gaps,
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{ListOptions, MemoryBackendFactory};
    use crate::llm::{ContentPart, LlmError, MessageContent, MockChatModel};
    use crate::pipeline::prompts::{DEV_TO_PM_SYSTEM_PROMPT, PM_TO_DEV_SYSTEM_PROMPT};
    use serde_json::json;

    const CSV_STORY: &str = "As a user, I want to export my data as CSV";
    const PM_REPLY: &str = r#"{"perspective": "pm", "confidence": 0.9, "reason": "user story"}"#;
    const GAPS_REPLY: &str = r#"{"gaps": [{"category": "Scope", "description": "Which fields are exported", "importance": "high"}], "suggestions": ["Is there a row limit?"]}"#;

    fn store() -> Arc<TenantCheckpointStore> {
        Arc::new(TenantCheckpointStore::new(Arc::new(MemoryBackendFactory)))
    }

    fn config(thread: &str) -> RunConfig {
        RunConfig::new("default", thread)
    }

    #[tokio::test]
    async fn full_run_translates_product_story() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(GAPS_REPLY)
                .with_reply("Add GET /export.csv"),
        );
        let executor = PipelineExecutor::full(model.clone(), store());

        let state = executor.invoke(CSV_STORY, Some("admin UI"), &config("t1")).await.unwrap();

        assert_eq!(state.perspective, Perspective::Pm);
        assert!(state.confidence > 0.5);
        assert_eq!(state.direction, Direction::PmToDev);
        assert_eq!(state.system_prompt, PM_TO_DEV_SYSTEM_PROMPT);
        assert_eq!(state.gaps.len(), 1);
        assert_eq!(state.translated_content, "Add GET /export.csv");
        assert!(state.error.is_none());

        let calls = model.invoke_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2][0].content, PM_TO_DEV_SYSTEM_PROMPT);
        assert!(calls[2][1].content.contains("admin UI"));
        assert!(calls[2][1].content.contains("- Which fields are exported"));
    }

    #[tokio::test]
    async fn preprocess_form_skips_translation() {
        let model = Arc::new(MockChatModel::new().with_reply(PM_REPLY).with_reply(GAPS_REPLY));
        let executor = PipelineExecutor::preprocess(model.clone(), store());
        assert!(!executor.includes_translation());

        let state = executor.invoke(CSV_STORY, None, &config("t1")).await.unwrap();
        assert_eq!(state.direction, Direction::PmToDev);
        assert!(state.translated_content.is_empty());
        assert_eq!(model.invoke_calls().len(), 2);
    }

    #[tokio::test]
    async fn classifier_failure_degrades_and_short_circuits() {
        let model = Arc::new(MockChatModel::new().with_invoke_error(LlmError::Timeout("60s".into())));
        let executor = PipelineExecutor::full(model.clone(), store());

        let state = executor.invoke("anything", None, &config("t1")).await.unwrap();

        assert_eq!(state.perspective, Perspective::Unknown);
        assert_eq!(state.confidence, 0.0);
        assert_eq!(state.reason, RECOGNITION_ERROR_REASON);
        assert!(state.error.as_deref().unwrap().contains("Perspective detection failed"));
        // Direction is still resolved on the error path.
        assert_eq!(state.direction, Direction::DevToPm);
        assert_eq!(state.system_prompt, DEV_TO_PM_SYSTEM_PROMPT);
        assert!(state.gaps.is_empty());
        assert_eq!(state.translated_content, "");
        // Only the classifier was called.
        assert_eq!(model.invoke_calls().len(), 1);
    }

    #[tokio::test]
    async fn gap_failure_keeps_perspective() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(r#"{"perspective": "dev", "confidence": 0.7, "reason": "k8s"}"#)
                .with_reply("no json at all"),
        );
        let executor = PipelineExecutor::full(model.clone(), store());

        let state = executor.invoke("Move jobs to k8s", None, &config("t1")).await.unwrap();
        assert_eq!(state.perspective, Perspective::Dev);
        assert!(state.error.as_deref().unwrap().starts_with("Gap analysis failed"));
        assert!(state.gaps.is_empty());
        assert_eq!(state.translated_content, "");
        assert_eq!(model.invoke_calls().len(), 2);
    }

    #[tokio::test]
    async fn unknown_perspective_skips_gap_call() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(r#"{"perspective": "unknown", "confidence": 0.2, "reason": "?"}"#)
                .with_reply("For product: nothing changes."),
        );
        let executor = PipelineExecutor::full(model.clone(), store());

        let state = executor.invoke("hello", None, &config("t1")).await.unwrap();
        assert_eq!(state.direction, Direction::DevToPm);
        assert!(state.error.is_none());
        assert_eq!(state.translated_content, "For product: nothing changes.");
        assert_eq!(model.invoke_calls().len(), 2);
    }

    #[tokio::test]
    async fn translation_failure_degrades() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(r#"{"gaps": [], "suggestions": []}"#)
                .with_invoke_error(LlmError::Status {
                    status: 500,
                    body: "oom".into(),
                }),
        );
        let executor = PipelineExecutor::full(model, store());

        let state = executor.invoke(CSV_STORY, None, &config("t1")).await.unwrap();
        assert_eq!(state.translated_content, "");
        assert!(state.error.as_deref().unwrap().starts_with("Translation failed"));
        assert_eq!(state.direction, Direction::PmToDev);
    }

    #[tokio::test]
    async fn multi_part_translation_is_concatenated() {
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(r#"{"gaps": []}"#)
                .with_reply_content(MessageContent::Parts(vec![
                    ContentPart::Text("Part one. ".into()),
                    ContentPart::Block(json!({"type": "image", "url": "x"})),
                    ContentPart::Block(json!({"type": "text", "text": "Part two."})),
                ])),
        );
        let executor = PipelineExecutor::full(model, store());
        let state = executor.invoke(CSV_STORY, None, &config("t1")).await.unwrap();
        assert_eq!(state.translated_content, "Part one. Part two.");
    }

    #[tokio::test]
    async fn checkpoints_written_at_every_boundary() {
        let checkpoints = store();
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(GAPS_REPLY)
                .with_reply("done"),
        );
        let executor = PipelineExecutor::full(model, checkpoints.clone());
        let cfg = config("t-cp");
        executor.invoke(CSV_STORY, None, &cfg).await.unwrap();

        let history = checkpoints.list(&cfg, ListOptions::default()).await.unwrap();
        let steps: Vec<i64> = history.iter().map(|t| t.metadata.step).collect();
        assert_eq!(steps, vec![2, 1, 0, -1]);
        assert_eq!(history[0].metadata.next, None);
        assert_eq!(history[3].metadata.source, CheckpointSource::Input);
        assert_eq!(history[3].metadata.next.as_deref(), Some("detect_perspective"));
        assert_eq!(history[1].metadata.next.as_deref(), Some("translate"));

        let saved = executor.get_state(&cfg).await.unwrap().unwrap();
        assert_eq!(saved.translated_content, "done");
    }

    #[tokio::test]
    async fn interrupted_run_resumes_from_next_stage() {
        let checkpoints = store();
        let cfg = config("t-resume");

        // A run that stopped right after classification.
        let preprocess_model = Arc::new(MockChatModel::new().with_reply(PM_REPLY));
        let mut state = RunState::new(CSV_STORY, None);
        let update = detect_perspective(preprocess_model.as_ref(), &state).await;
        state.apply(update);
        let input = checkpoints
            .put(
                &cfg,
                Checkpoint {
                    id: next_version(None),
                    ts: Utc::now(),
                    channel_values: serde_json::to_value(&state).unwrap(),
                    channel_versions: BTreeMap::new(),
                },
                CheckpointMetadata {
                    source: CheckpointSource::Loop,
                    step: 0,
                    next: Some("analyze_gaps".into()),
                    writes: None,
                },
            )
            .await
            .unwrap();
        assert!(input.checkpoint_id.is_some());

        let model = Arc::new(MockChatModel::new().with_reply(GAPS_REPLY).with_reply("resumed"));
        let executor = PipelineExecutor::full(model.clone(), checkpoints);
        let result = executor.resume(&cfg).await.unwrap().unwrap();

        assert_eq!(result.content, CSV_STORY);
        assert_eq!(result.perspective, Perspective::Pm);
        assert_eq!(result.translated_content, "resumed");
        assert_eq!(model.invoke_calls().len(), 2);
    }

    #[tokio::test]
    async fn pending_writes_replace_the_stage_call() {
        let checkpoints = store();
        let cfg = config("t-writes");

        let mut state = RunState::new(CSV_STORY, None);
        state.perspective = Perspective::Pm;
        let saved = checkpoints
            .put(
                &cfg,
                Checkpoint {
                    id: next_version(None),
                    ts: Utc::now(),
                    channel_values: serde_json::to_value(&state).unwrap(),
                    channel_versions: BTreeMap::new(),
                },
                CheckpointMetadata {
                    source: CheckpointSource::Loop,
                    step: 1,
                    next: Some("translate".into()),
                    writes: None,
                },
            )
            .await
            .unwrap();
        checkpoints
            .put_writes(
                &saved,
                vec![PendingWrite {
                    task_id: String::new(),
                    channel: "translated_content".into(),
                    value: json!("from pending writes"),
                }],
                &task_id("t-writes", Stage::Translate),
            )
            .await
            .unwrap();

        let model = Arc::new(MockChatModel::new());
        let executor = PipelineExecutor::full(model.clone(), checkpoints);
        let result = executor.resume(&cfg).await.unwrap().unwrap();

        assert_eq!(result.translated_content, "from pending writes");
        assert!(model.invoke_calls().is_empty());
    }

    #[tokio::test]
    async fn rerun_on_finished_thread_starts_fresh_and_sorts_last() {
        let checkpoints = store();
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(r#"{"gaps": []}"#)
                .with_reply(r#"{"perspective": "dev", "confidence": 0.8, "reason": "api"}"#)
                .with_reply(r#"{"gaps": []}"#),
        );
        let executor = PipelineExecutor::preprocess(model, checkpoints.clone());
        let cfg = config("t-rerun");

        executor.invoke(CSV_STORY, None, &cfg).await.unwrap();
        let second = executor.invoke("Add an index", None, &cfg).await.unwrap();
        assert_eq!(second.perspective, Perspective::Dev);

        let latest = executor.get_state(&cfg).await.unwrap().unwrap();
        assert_eq!(latest.content, "Add an index");
        assert_eq!(checkpoints.list(&cfg, ListOptions::default()).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn new_input_on_interrupted_thread_is_not_dropped() {
        let checkpoints = store();
        let cfg = config("t-new-input");

        let first = Arc::new(MockChatModel::new().with_reply(PM_REPLY).with_reply(r#"{"gaps": []}"#));
        PipelineExecutor::preprocess(first, checkpoints.clone())
            .invoke("OLD TEXT", None, &cfg)
            .await
            .unwrap();

        // Leave the thread looking as if translation was still pending.
        let latest = checkpoints.get_tuple(&cfg).await.unwrap().unwrap();
        let mut metadata = latest.metadata.clone();
        metadata.next = Some("translate".into());
        let mut checkpoint = latest.checkpoint.clone();
        checkpoint.id = next_version(Some(latest.checkpoint.id.as_str()));
        checkpoints.put(&latest.config, checkpoint, metadata).await.unwrap();

        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(r#"{"gaps": []}"#)
                .with_reply("translated new text"),
        );
        let executor = PipelineExecutor::full(model.clone(), checkpoints);
        let state = executor.invoke("NEW TEXT", Some("ctx"), &cfg).await.unwrap();

        assert_eq!(state.content, "NEW TEXT");
        assert_eq!(state.context.as_deref(), Some("ctx"));
        assert_eq!(state.translated_content, "translated new text");
        let calls = model.invoke_calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[2][1].content.contains("NEW TEXT"));
        assert!(!calls[2][1].content.contains("OLD TEXT"));
    }

    #[tokio::test]
    async fn resume_without_pending_stage_is_none() {
        let checkpoints = store();
        let model = Arc::new(
            MockChatModel::new()
                .with_reply(PM_REPLY)
                .with_reply(r#"{"gaps": []}"#)
                .with_reply("done"),
        );
        let executor = PipelineExecutor::full(model.clone(), checkpoints);
        let cfg = config("t-finished");

        assert!(executor.resume(&cfg).await.unwrap().is_none());
        executor.invoke(CSV_STORY, None, &cfg).await.unwrap();
        assert!(executor.resume(&cfg).await.unwrap().is_none());
        assert_eq!(model.invoke_calls().len(), 3);
    }

    #[test]
    fn translate_messages_fall_back_to_direction_prompt() {
        let mut state = RunState::new("x", None);
        state.direction = Direction::PmToDev;
        let messages = translate_messages(&state);
        assert_eq!(messages[0].content, PM_TO_DEV_SYSTEM_PROMPT);
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in FULL_STAGES {
            assert_eq!(Stage::from_name(stage.as_str()), Some(*stage));
        }
        assert_eq!(Stage::from_name("review"), None);
    }

    #[test]
    fn recovered_update_ignores_other_tasks() {
        let writes = vec![PendingWrite {
            task_id: "t:analyze_gaps".into(),
            channel: "gaps".into(),
            value: json!([]),
        }];
        assert!(recover_update(&writes, "t:translate").is_none());
        let update = recover_update(&writes, "t:analyze_gaps").unwrap();
        assert_eq!(update.gaps, Some(vec![]));
    }
}
