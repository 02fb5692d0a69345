//! Defensive JSON extraction from model output.
//!
//! Models wrap JSON in prose or code fences. Extraction tries, in order:
//! the whole text, a ```` ```json ```` fenced block, then the span from the
//! first `{` to the last `}`. Whatever comes back is still untrusted; the
//! lenient readers below coerce individual fields.

use serde_json::{Map, Value};
use thiserror::Error;

const PREVIEW_CHARS: usize = 200;
const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Could not extract JSON from response: {preview}")]
pub struct ExtractionError {
    /// First ~200 characters of the offending text.
    pub preview: String,
}

impl ExtractionError {
    fn for_text(text: &str) -> Self {
        Self {
            preview: text.chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

/// Extract the JSON object embedded in a model response.
///
/// A fenced JSON block, when present, is authoritative: if its body does not
/// parse, extraction fails rather than guessing from the surrounding prose.
pub fn extract_json(response: &str) -> Result<Map<String, Value>, ExtractionError> {
    let content = response.trim();

    if let Some(map) = parse_object(content) {
        return Ok(map);
    }

    if let Some(inner) = fenced_json_block(content) {
        return parse_object(inner).ok_or_else(|| ExtractionError::for_text(content));
    }

    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
        if start < end {
            if let Some(map) = parse_object(&content[start..=end]) {
                return Ok(map);
            }
        }
    }

    Err(ExtractionError::for_text(content))
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Inner text of the first ```` ```json ```` block, if it is closed and non-empty.
fn fenced_json_block(content: &str) -> Option<&str> {
    let start = content.find(JSON_FENCE)? + JSON_FENCE.len();
    let len = content[start..].find(FENCE)?;
    let inner = content[start..start + len].trim();
    (!inner.is_empty()).then_some(inner)
}

// ═══════════════════════════════════════════════════════════
// Lenient field readers
// ═══════════════════════════════════════════════════════════

/// Render a scalar as text. Strings are taken verbatim, null is absent.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Read a number that may arrive as a JSON number or a numeric string.
pub fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Confidence in [0, 1], rounded to two decimals. Missing or non-numeric
/// values become `default`.
pub fn clamp_confidence(value: Option<&Value>, default: f64) -> f64 {
    let raw = lenient_f64(value).unwrap_or(default);
    (raw.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Non-blank text entries of a JSON array. Anything else yields an empty list.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_to_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
