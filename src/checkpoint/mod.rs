//! Checkpoint persistence, one backend per realm.
//!
//! Backends are synchronous (`rusqlite` is); `TenantCheckpointStore` moves
//! every call onto the blocking pool and owns the lazy per-realm
//! construction.

pub mod memory;
pub mod sqlite;
pub mod tenant;
pub mod types;

pub use memory::{MemoryBackendFactory, MemoryCheckpointBackend};
pub use sqlite::{SqliteBackendFactory, SqliteCheckpointBackend};
pub use tenant::TenantCheckpointStore;
pub use types::*;

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint backend for realm '{0}' is not ready: must initialize asynchronously first")]
    NotInitialized(String),

    #[error("Invalid realm name: {0:?}")]
    InvalidRealm(String),

    #[error("Failed to construct checkpoint backend for realm '{realm}': {reason}")]
    Construction { realm: String, reason: String },

    #[error("Checkpoint config for thread '{0}' has no checkpoint id")]
    MissingCheckpointId(String),

    #[error("Checkpoint lock poisoned")]
    LockPoisoned,

    #[error("Checkpoint storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint task failed: {0}")]
    Task(String),
}

/// Storage for one realm's checkpoints.
pub trait CheckpointBackend: Send + Sync {
    /// One-time initialisation, called once per realm before first use.
    fn setup(&self) -> Result<(), CheckpointError>;

    /// The checkpoint named by `config`, or the run's latest one.
    fn get_tuple(&self, config: &RunConfig) -> Result<Option<CheckpointTuple>, CheckpointError>;

    /// Store `checkpoint` as a child of `config.checkpoint_id` and return the
    /// config addressing the new checkpoint.
    fn put(
        &self,
        config: &RunConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<RunConfig, CheckpointError>;

    /// Record pending writes against the checkpoint in `config`.
    fn put_writes(
        &self,
        config: &RunConfig,
        writes: &[PendingWrite],
        task_id: &str,
    ) -> Result<(), CheckpointError>;

    /// The run's checkpoints, newest first.
    fn list(
        &self,
        config: &RunConfig,
        options: &ListOptions,
    ) -> Result<Vec<CheckpointTuple>, CheckpointError>;

    fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError>;
}

/// Builds the backend for a realm. Called at most once per realm.
pub trait BackendFactory: Send + Sync {
    fn create(&self, realm: &str) -> Result<Arc<dyn CheckpointBackend>, CheckpointError>;
}

/// Realm names end up in file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_realm(realm: &str) -> Result<(), CheckpointError> {
    let valid = !realm.is_empty()
        && realm
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidRealm(realm.to_string()))
    }
}

/// Effective checkpoint id for `put_writes`.
fn require_checkpoint_id(config: &RunConfig) -> Result<&str, CheckpointError> {
    config
        .checkpoint_id
        .as_deref()
        .ok_or_else(|| CheckpointError::MissingCheckpointId(config.thread_id.clone()))
}
