use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context;

/// Addresses one run's checkpoints inside one realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub realm: String,
    pub thread_id: String,
    /// Specific checkpoint; `None` means the latest one.
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

impl RunConfig {
    pub fn new(realm: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            thread_id: thread_id.into(),
            checkpoint_id: None,
        }
    }

    /// Config for `thread_id` in the realm of the current request context.
    pub fn for_current_realm(thread_id: impl Into<String>) -> Self {
        Self::new(context::current_realm(), thread_id)
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Same run, latest checkpoint.
    pub fn latest(&self) -> Self {
        Self {
            checkpoint_id: None,
            ..self.clone()
        }
    }
}

/// Saved state of a run at one stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Version string; ordering by id is causal order within a run.
    pub id: String,
    pub ts: DateTime<Utc>,
    pub channel_values: serde_json::Value,
    #[serde(default)]
    pub channel_versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Written from the run input, before any stage ran.
    Input,
    /// Written after a stage completed.
    Loop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    /// -1 for the input checkpoint, then 0, 1, ...
    pub step: i64,
    /// Stage to run next; `None` once the run is complete.
    #[serde(default)]
    pub next: Option<String>,
    /// The update written by the stage that produced this checkpoint.
    #[serde(default)]
    pub writes: Option<serde_json::Value>,
}

/// A side effect recorded against a checkpoint before the next one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTuple {
    pub config: RunConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub parent_config: Option<RunConfig>,
    pub pending_writes: Vec<PendingWrite>,
}

/// Filters for `list`. Results are always newest first.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    /// Only checkpoints strictly older than this id.
    pub before: Option<String>,
}

/// Next version after `current`: a zero-padded 32-digit counter, a dot and a
/// 16-hex-digit random token. Lexicographic order follows the counter, and
/// the token keeps concurrent writers from colliding.
pub fn next_version(current: Option<&str>) -> String {
    let counter = current
        .and_then(|v| v.split('.').next())
        .and_then(|n| n.parse::<u128>().ok())
        .unwrap_or(0);
    format!("{:032}.{:016x}", counter + 1, rand::random::<u64>())
}
