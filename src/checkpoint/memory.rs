//! Process-local checkpoint backend. Nothing survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    require_checkpoint_id, BackendFactory, Checkpoint, CheckpointBackend, CheckpointError,
    CheckpointMetadata, CheckpointTuple, ListOptions, PendingWrite, RunConfig,
};

struct StoredCheckpoint {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    parent_id: Option<String>,
}

#[derive(Default)]
struct ThreadLog {
    /// Keyed by checkpoint id, so iteration order is version order.
    checkpoints: BTreeMap<String, StoredCheckpoint>,
    writes: HashMap<String, Vec<PendingWrite>>,
}

impl ThreadLog {
    fn tuple(&self, config: &RunConfig, id: &str) -> Option<CheckpointTuple> {
        let stored = self.checkpoints.get(id)?;
        Some(CheckpointTuple {
            config: config.latest().with_checkpoint_id(id),
            checkpoint: stored.checkpoint.clone(),
            metadata: stored.metadata.clone(),
            parent_config: stored
                .parent_id
                .as_ref()
                .map(|p| config.latest().with_checkpoint_id(p.clone())),
            pending_writes: self.writes.get(id).cloned().unwrap_or_default(),
        })
    }
}

#[derive(Default)]
pub struct MemoryCheckpointBackend {
    threads: Mutex<HashMap<String, ThreadLog>>,
}

impl MemoryCheckpointBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn threads(&self) -> Result<MutexGuard<'_, HashMap<String, ThreadLog>>, CheckpointError> {
        self.threads.lock().map_err(|_| CheckpointError::LockPoisoned)
    }
}

impl CheckpointBackend for MemoryCheckpointBackend {
    fn setup(&self) -> Result<(), CheckpointError> {
        Ok(())
    }

    fn get_tuple(&self, config: &RunConfig) -> Result<Option<CheckpointTuple>, CheckpointError> {
        let threads = self.threads()?;
        let Some(log) = threads.get(&config.thread_id) else {
            return Ok(None);
        };
        let id = match &config.checkpoint_id {
            Some(id) => Some(id.as_str()),
            None => log.checkpoints.keys().next_back().map(String::as_str),
        };
        Ok(id.and_then(|id| log.tuple(config, id)))
    }

    fn put(
        &self,
        config: &RunConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<RunConfig, CheckpointError> {
        let id = checkpoint.id.clone();
        let mut threads = self.threads()?;
        threads
            .entry(config.thread_id.clone())
            .or_default()
            .checkpoints
            .insert(
                id.clone(),
                StoredCheckpoint {
                    checkpoint,
                    metadata,
                    parent_id: config.checkpoint_id.clone(),
                },
            );
        Ok(config.latest().with_checkpoint_id(id))
    }

    fn put_writes(
        &self,
        config: &RunConfig,
        writes: &[PendingWrite],
        task_id: &str,
    ) -> Result<(), CheckpointError> {
        let checkpoint_id = require_checkpoint_id(config)?;
        let mut threads = self.threads()?;
        let stored = threads
            .entry(config.thread_id.clone())
            .or_default()
            .writes
            .entry(checkpoint_id.to_string())
            .or_default();

        // Re-running a task replaces what it wrote before.
        stored.retain(|w| w.task_id != task_id);
        stored.extend(writes.iter().cloned().map(|mut w| {
            w.task_id = task_id.to_string();
            w
        }));
        Ok(())
    }

    fn list(
        &self,
        config: &RunConfig,
        options: &ListOptions,
    ) -> Result<Vec<CheckpointTuple>, CheckpointError> {
        let threads = self.threads()?;
        let Some(log) = threads.get(&config.thread_id) else {
            return Ok(Vec::new());
        };

        let tuples = log
            .checkpoints
            .keys()
            .rev()
            .filter(|id| options.before.as_ref().map_or(true, |b| *id < b))
            .take(options.limit.unwrap_or(usize::MAX))
            .filter_map(|id| log.tuple(config, id))
            .collect();
        Ok(tuples)
    }

    fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError> {
        self.threads()?.remove(thread_id);
        Ok(())
    }
}

/// Hands every realm its own in-memory backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackendFactory;

impl BackendFactory for MemoryBackendFactory {
    fn create(&self, _realm: &str) -> Result<Arc<dyn CheckpointBackend>, CheckpointError> {
        Ok(Arc::new(MemoryCheckpointBackend::new()))
    }
}
