//! Gap analyzer: asks a reviewer persona what the text leaves out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::json::{extract_json, string_list, value_to_text};
use super::prompts::{gap_prompt, GAPS_SYSTEM_PROMPT};
use super::AnalysisError;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{GapItem, Importance, Perspective};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub gaps: Vec<GapItem>,
    pub suggestions: Vec<String>,
}

impl GapAnalysis {
    /// Validate a parsed model answer, dropping gaps without a category or
    /// description.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let gaps = match map.get("gaps") {
            Some(Value::Array(items)) => items.iter().filter_map(validate_gap).collect(),
            _ => Vec::new(),
        };

        Self {
            gaps,
            suggestions: string_list(map.get("suggestions")),
        }
    }
}

fn validate_gap(value: &Value) -> Option<GapItem> {
    let obj = value.as_object()?;
    let required = |key: &str| {
        obj.get(key)
            .and_then(value_to_text)
            .filter(|s| !s.trim().is_empty())
    };

    let importance = obj
        .get("importance")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Importance>().ok())
        .unwrap_or_default();

    Some(GapItem {
        category: required("category")?,
        description: required("description")?,
        importance,
    })
}

/// Find missing information in `content`. `Unknown` perspective skips the
/// model call and returns an empty analysis.
pub async fn analyze_gaps(
    model: &dyn ChatModel,
    content: &str,
    perspective: Perspective,
) -> Result<GapAnalysis, AnalysisError> {
    let Some(prompt) = gap_prompt(perspective, content) else {
        tracing::debug!("Perspective unknown, skipping gap analysis");
        return Ok(GapAnalysis::default());
    };

    let messages = [ChatMessage::system(GAPS_SYSTEM_PROMPT), ChatMessage::user(prompt)];
    let response = model.invoke(&messages).await?;
    let analysis = GapAnalysis::from_json(&extract_json(&response.text())?);

    tracing::debug!(
        %perspective,
        gaps = analysis.gaps.len(),
        suggestions = analysis.suggestions.len(),
        "Gap analysis complete"
    );
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChatModel;
    use serde_json::json;

    #[test]
    fn incomplete_gaps_dropped() {
        let map = json!({
            "gaps": [
                {"category": "Scope", "description": "No size limit", "importance": "high"},
                {"category": "Users"},
                {"description": "orphan"},
                {"category": "", "description": "blank category"},
                "just a string",
                {"category": "Timing", "description": "No deadline", "importance": "urgent"},
                {"category": "Data", "description": "Which fields"}
            ],
            "suggestions": ["What is the max file size?"]
        });
        let analysis = GapAnalysis::from_json(map.as_object().unwrap());

        assert_eq!(analysis.gaps.len(), 3);
        assert_eq!(analysis.gaps[0].importance, Importance::High);
        assert_eq!(analysis.gaps[1].importance, Importance::Medium);
        assert_eq!(analysis.gaps[2].importance, Importance::Medium);
        assert_eq!(analysis.suggestions, vec!["What is the max file size?".to_string()]);
    }

    #[test]
    fn importance_matches_exact_values_only() {
        let map = json!({"gaps": [
            {"category": "Scope", "description": "a", "importance": "HIGH"},
            {"category": "Scope", "description": "b", "importance": "low"}
        ]});
        let analysis = GapAnalysis::from_json(map.as_object().unwrap());
        assert_eq!(analysis.gaps[0].importance, Importance::Medium);
        assert_eq!(analysis.gaps[1].importance, Importance::Low);
    }

    #[test]
    fn non_list_fields_become_empty() {
        let map = json!({"gaps": "none", "suggestions": {"a": 1}});
        let analysis = GapAnalysis::from_json(map.as_object().unwrap());
        assert_eq!(analysis, GapAnalysis::default());
    }

    #[tokio::test]
    async fn unknown_perspective_makes_no_call() {
        let model = MockChatModel::new();
        let analysis = analyze_gaps(&model, "hello", Perspective::Unknown).await.unwrap();
        assert!(analysis.gaps.is_empty());
        assert!(model.invoke_calls().is_empty());
    }

    #[tokio::test]
    async fn dev_text_reviewed_by_product_persona() {
        let model = MockChatModel::new().with_reply(
            r#"Sure! {"gaps": [{"category": "Risk", "description": "No rollback plan", "importance": "low"}], "suggestions": []}"#,
        );
        let analysis = analyze_gaps(&model, "Migrate to Postgres 16", Perspective::Dev)
            .await
            .unwrap();
        assert_eq!(analysis.gaps.len(), 1);
        assert_eq!(analysis.gaps[0].importance, Importance::Low);

        let calls = model.invoke_calls();
        assert!(calls[0][1].content.contains("senior product manager"));
    }
}
