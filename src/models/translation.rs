use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Direction, Importance, Perspective};

/// A piece of information judged missing from the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapItem {
    pub category: String,
    pub description: String,
    pub importance: Importance,
}

/// Outcome of one pipeline run, successful or degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateResult {
    pub original_content: String,
    pub translated_content: String,
    pub detected_perspective: Perspective,
    pub direction: Direction,
    pub gaps: Vec<GapItem>,
    pub suggestions: Vec<String>,
}

/// A stored translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: Uuid,
    pub content: String,
    pub translated_content: String,
    pub direction: Direction,
    pub detected_perspective: Option<Perspective>,
    pub gaps: Vec<GapItem>,
    pub suggestions: Vec<String>,
    pub created_at: DateTime<Utc>,
}
