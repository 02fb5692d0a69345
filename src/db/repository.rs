//! Translation record persistence.
//!
//! The pipeline only ever calls `create`; the read side backs the history
//! views. Gaps and suggestions are stored together as one JSON document, and
//! only when the run found at least one gap.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::{Direction, GapItem, Perspective, TranslateResult, TranslationRecord};

/// Storage for finished translations.
#[async_trait]
pub trait TranslationRepository: Send + Sync {
    /// Store a result and return the record with its generated id.
    async fn create(&self, result: &TranslateResult) -> Result<TranslationRecord, DatabaseError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<TranslationRecord>, DatabaseError>;

    /// Most recent first.
    async fn list_recent(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TranslationRecord>, DatabaseError>;

    async fn count(&self) -> Result<u64, DatabaseError>;
}

/// JSON shape of the `gaps_identified` column.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredGaps {
    #[serde(default)]
    gaps: Vec<GapItem>,
    #[serde(default)]
    suggestions: Vec<String>,
}

// ═══════════════════════════════════════════════════════════
// SQLite implementation
// ═══════════════════════════════════════════════════════════

/// `TranslationRepository` over a single SQLite connection.
///
/// Queries run on the blocking pool so a slow disk never stalls the runtime.
#[derive(Clone)]
pub struct SqliteTranslationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTranslationRepository {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open (and migrate) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(open_database(path)?))
    }

    /// Fresh in-memory database.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(open_memory_database()?))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| DatabaseError::Task(e.to_string()))?
    }
}

#[async_trait]
impl TranslationRepository for SqliteTranslationRepository {
    async fn create(&self, result: &TranslateResult) -> Result<TranslationRecord, DatabaseError> {
        let record = TranslationRecord {
            id: Uuid::new_v4(),
            content: result.original_content.clone(),
            translated_content: result.translated_content.clone(),
            direction: result.direction,
            detected_perspective: Some(result.detected_perspective),
            gaps: result.gaps.clone(),
            suggestions: result.suggestions.clone(),
            created_at: Utc::now(),
        };

        let row = record.clone();
        self.with_conn(move |conn| insert_translation(conn, &row)).await?;

        tracing::debug!(id = %record.id, direction = %record.direction, "Translation stored");
        Ok(record)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<TranslationRecord>, DatabaseError> {
        self.with_conn(move |conn| get_translation(conn, &id)).await
    }

    async fn list_recent(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TranslationRecord>, DatabaseError> {
        self.with_conn(move |conn| list_translations(conn, limit, offset))
            .await
    }

    async fn count(&self) -> Result<u64, DatabaseError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM translations", [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        })
        .await
    }
}

// ═══════════════════════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════════════════════

const SELECT_COLUMNS: &str = "SELECT id, content, translated_content, direction, detected_perspective,
        gaps_identified, created_at FROM translations";

pub fn insert_translation(conn: &Connection, record: &TranslationRecord) -> Result<(), DatabaseError> {
    let gaps_json = if record.gaps.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&StoredGaps {
            gaps: record.gaps.clone(),
            suggestions: record.suggestions.clone(),
        })?)
    };

    conn.execute(
        "INSERT INTO translations (id, content, translated_content, direction,
            detected_perspective, gaps_identified, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.id.to_string(),
            record.content,
            record.translated_content,
            record.direction.as_str(),
            record.detected_perspective.map(|p| p.as_str()),
            gaps_json,
            record.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_translation(conn: &Connection, id: &Uuid) -> Result<Option<TranslationRecord>, DatabaseError> {
    let raw = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id.to_string()],
            RawRow::from_row,
        )
        .optional()?;
    raw.map(RawRow::into_record).transpose()
}

pub fn list_translations(
    conn: &Connection,
    limit: u32,
    offset: u32,
) -> Result<Vec<TranslationRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt.query_map(params![limit, offset], RawRow::from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

/// Column values as read, before enum and JSON decoding.
struct RawRow {
    id: String,
    content: String,
    translated_content: String,
    direction: String,
    detected_perspective: Option<String>,
    gaps_identified: Option<String>,
    created_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            translated_content: row.get(2)?,
            direction: row.get(3)?,
            detected_perspective: row.get(4)?,
            gaps_identified: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<TranslationRecord, DatabaseError> {
        let stored: StoredGaps = match self.gaps_identified.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => StoredGaps::default(),
        };
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default();

        Ok(TranslationRecord {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            content: self.content,
            translated_content: self.translated_content,
            direction: Direction::from_str(&self.direction)?,
            detected_perspective: self
                .detected_perspective
                .as_deref()
                .map(Perspective::from_str)
                .transpose()?,
            gaps: stored.gaps,
            suggestions: stored.suggestions,
            created_at,
        })
    }
}
