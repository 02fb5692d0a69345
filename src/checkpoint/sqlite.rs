//! SQLite checkpoint backend, one database file per realm.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    require_checkpoint_id, validate_realm, BackendFactory, Checkpoint, CheckpointBackend,
    CheckpointError, CheckpointMetadata, CheckpointTuple, ListOptions, PendingWrite, RunConfig,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT NOT NULL,
    checkpoint_id TEXT NOT NULL,
    parent_checkpoint_id TEXT,
    checkpoint TEXT NOT NULL,
    metadata TEXT NOT NULL,
    PRIMARY KEY (thread_id, checkpoint_id)
);

CREATE TABLE IF NOT EXISTS checkpoint_writes (
    thread_id TEXT NOT NULL,
    checkpoint_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    idx INTEGER NOT NULL,
    channel TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (thread_id, checkpoint_id, task_id, idx)
);
";

pub struct SqliteCheckpointBackend {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointBackend {
    /// Open the database at `path`. Tables are created by `setup`.
    pub fn open(path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self, CheckpointError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CheckpointError> {
        self.conn.lock().map_err(|_| CheckpointError::LockPoisoned)
    }
}

/// Columns of `checkpoints` as stored.
struct RawCheckpoint {
    checkpoint_id: String,
    parent_checkpoint_id: Option<String>,
    checkpoint: String,
    metadata: String,
}

impl RawCheckpoint {
    const COLUMNS: &'static str = "checkpoint_id, parent_checkpoint_id, checkpoint, metadata";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            checkpoint_id: row.get(0)?,
            parent_checkpoint_id: row.get(1)?,
            checkpoint: row.get(2)?,
            metadata: row.get(3)?,
        })
    }

    fn into_tuple(
        self,
        conn: &Connection,
        config: &RunConfig,
    ) -> Result<CheckpointTuple, CheckpointError> {
        let checkpoint: Checkpoint = serde_json::from_str(&self.checkpoint)?;
        let metadata: CheckpointMetadata = serde_json::from_str(&self.metadata)?;
        let pending_writes = load_writes(conn, &config.thread_id, &self.checkpoint_id)?;

        Ok(CheckpointTuple {
            config: config.latest().with_checkpoint_id(self.checkpoint_id),
            checkpoint,
            metadata,
            parent_config: self
                .parent_checkpoint_id
                .map(|p| config.latest().with_checkpoint_id(p)),
            pending_writes,
        })
    }
}

fn load_writes(
    conn: &Connection,
    thread_id: &str,
    checkpoint_id: &str,
) -> Result<Vec<PendingWrite>, CheckpointError> {
    let mut stmt = conn.prepare(
        "SELECT task_id, channel, value FROM checkpoint_writes
         WHERE thread_id = ?1 AND checkpoint_id = ?2
         ORDER BY task_id, idx",
    )?;
    let rows = stmt.query_map(params![thread_id, checkpoint_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut writes = Vec::new();
    for row in rows {
        let (task_id, channel, value) = row?;
        writes.push(PendingWrite {
            task_id,
            channel,
            value: serde_json::from_str(&value)?,
        });
    }
    Ok(writes)
}

impl CheckpointBackend for SqliteCheckpointBackend {
    fn setup(&self) -> Result<(), CheckpointError> {
        self.conn()?.execute_batch(SCHEMA)?;
        tracing::debug!("Checkpoint schema ready");
        Ok(())
    }

    fn get_tuple(&self, config: &RunConfig) -> Result<Option<CheckpointTuple>, CheckpointError> {
        let conn = self.conn()?;
        let raw = match &config.checkpoint_id {
            Some(id) => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM checkpoints WHERE thread_id = ?1 AND checkpoint_id = ?2",
                        RawCheckpoint::COLUMNS
                    ),
                    params![config.thread_id, id],
                    RawCheckpoint::from_row,
                )
                .optional()?,
            None => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM checkpoints WHERE thread_id = ?1
                         ORDER BY checkpoint_id DESC LIMIT 1",
                        RawCheckpoint::COLUMNS
                    ),
                    params![config.thread_id],
                    RawCheckpoint::from_row,
                )
                .optional()?,
        };
        raw.map(|r| r.into_tuple(&conn, config)).transpose()
    }

    fn put(
        &self,
        config: &RunConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<RunConfig, CheckpointError> {
        let checkpoint_json = serde_json::to_string(&checkpoint)?;
        let metadata_json = serde_json::to_string(&metadata)?;

        self.conn()?.execute(
            "INSERT OR REPLACE INTO checkpoints
                (thread_id, checkpoint_id, parent_checkpoint_id, checkpoint, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                config.thread_id,
                checkpoint.id,
                config.checkpoint_id,
                checkpoint_json,
                metadata_json,
            ],
        )?;
        Ok(config.latest().with_checkpoint_id(checkpoint.id))
    }

    fn put_writes(
        &self,
        config: &RunConfig,
        writes: &[PendingWrite],
        task_id: &str,
    ) -> Result<(), CheckpointError> {
        let checkpoint_id = require_checkpoint_id(config)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM checkpoint_writes
             WHERE thread_id = ?1 AND checkpoint_id = ?2 AND task_id = ?3",
            params![config.thread_id, checkpoint_id, task_id],
        )?;
        for (idx, write) in writes.iter().enumerate() {
            tx.execute(
                "INSERT INTO checkpoint_writes
                    (thread_id, checkpoint_id, task_id, idx, channel, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    config.thread_id,
                    checkpoint_id,
                    task_id,
                    idx as i64,
                    write.channel,
                    serde_json::to_string(&write.value)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list(
        &self,
        config: &RunConfig,
        options: &ListOptions,
    ) -> Result<Vec<CheckpointTuple>, CheckpointError> {
        let conn = self.conn()?;
        // SQLite treats a negative LIMIT as "no limit".
        let limit = options.limit.map_or(-1, |l| l as i64);

        let raws = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM checkpoints
                 WHERE thread_id = ?1 AND (?2 IS NULL OR checkpoint_id < ?2)
                 ORDER BY checkpoint_id DESC LIMIT ?3",
                RawCheckpoint::COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![config.thread_id, options.before, limit],
                RawCheckpoint::from_row,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        raws.into_iter()
            .map(|raw| raw.into_tuple(&conn, config))
            .collect()
    }

    fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])?;
        tx.execute(
            "DELETE FROM checkpoint_writes WHERE thread_id = ?1",
            params![thread_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// One `<realm>.db` file per realm under `dir`.
#[derive(Debug, Clone)]
pub struct SqliteBackendFactory {
    dir: PathBuf,
}

impl SqliteBackendFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, realm: &str) -> Result<PathBuf, CheckpointError> {
        validate_realm(realm)?;
        Ok(self.dir.join(format!("{realm}.db")))
    }
}

impl BackendFactory for SqliteBackendFactory {
    fn create(&self, realm: &str) -> Result<Arc<dyn CheckpointBackend>, CheckpointError> {
        let path = self.path_for(realm)?;
        let backend = SqliteCheckpointBackend::open(&path).map_err(|e| {
            CheckpointError::Construction {
                realm: realm.to_string(),
                reason: e.to_string(),
            }
        })?;
        tracing::debug!(realm, path = %path.display(), "Opened checkpoint database");
        Ok(Arc::new(backend))
    }
}
