//! Perspective classifier: one model call deciding whether text reads as
//! product (`pm`) or engineering (`dev`) writing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::json::{clamp_confidence, extract_json, value_to_text};
use super::prompts::{perspective_prompt, PERSPECTIVE_SYSTEM_PROMPT};
use super::AnalysisError;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::Perspective;

/// Used when the model omits or garbles the confidence.
const DEFAULT_CONFIDENCE: f64 = 0.5;
const DEFAULT_REASON: &str = "AI analysis result";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveAssessment {
    pub perspective: Perspective,
    /// Always within [0, 1].
    pub confidence: f64,
    pub reason: String,
}

impl PerspectiveAssessment {
    /// Validate a parsed model answer. Never fails: bad fields get defaults.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let perspective = map
            .get("perspective")
            .and_then(Value::as_str)
            .map(Perspective::parse_lenient)
            .unwrap_or_default();

        let reason = map
            .get("reason")
            .and_then(value_to_text)
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REASON.to_string());

        Self {
            perspective,
            confidence: clamp_confidence(map.get("confidence"), DEFAULT_CONFIDENCE),
            reason,
        }
    }
}

/// Ask the model which perspective `content` is written from.
pub async fn classify_perspective(
    model: &dyn ChatModel,
    content: &str,
) -> Result<PerspectiveAssessment, AnalysisError> {
    let messages = [
        ChatMessage::system(PERSPECTIVE_SYSTEM_PROMPT),
        ChatMessage::user(perspective_prompt(content)),
    ];

    let response = model.invoke(&messages).await?;
    let parsed = extract_json(&response.text())?;
    let assessment = PerspectiveAssessment::from_json(&parsed);

    tracing::debug!(
        perspective = %assessment.perspective,
        confidence = assessment.confidence,
        "Perspective classified"
    );
    Ok(assessment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockChatModel};
    use serde_json::json;

    fn assess(value: Value) -> PerspectiveAssessment {
        PerspectiveAssessment::from_json(value.as_object().unwrap())
    }

    #[test]
    fn valid_answer_passes_through() {
        let a = assess(json!({"perspective": "dev", "confidence": 0.8, "reason": "mentions Redis"}));
        assert_eq!(a.perspective, Perspective::Dev);
        assert_eq!(a.confidence, 0.8);
        assert_eq!(a.reason, "mentions Redis");
    }

    #[test]
    fn unknown_perspective_values_coerced() {
        assert_eq!(assess(json!({"perspective": "designer"})).perspective, Perspective::Unknown);
        assert_eq!(assess(json!({"perspective": 7})).perspective, Perspective::Unknown);
        assert_eq!(assess(json!({})).perspective, Perspective::Unknown);
    }

    #[test]
    fn confidence_always_in_unit_interval() {
        for raw in [json!(2.5), json!(-1), json!("abc"), json!(null), json!([1])] {
            let c = assess(json!({"perspective": "pm", "confidence": raw})).confidence;
            assert!((0.0..=1.0).contains(&c), "confidence {c} out of range");
        }
    }

    #[test]
    fn missing_reason_gets_default() {
        assert_eq!(assess(json!({"perspective": "pm"})).reason, DEFAULT_REASON);
    }

    #[tokio::test]
    async fn classifies_product_text() {
        let model = MockChatModel::new().with_reply(
            "```json\n{\"perspective\": \"pm\", \"confidence\": 0.92, \"reason\": \"user story\"}\n```",
        );
        let content = "As a user, I want to export my data as CSV";
        let a = classify_perspective(&model, content).await.unwrap();
        assert_eq!(a.perspective, Perspective::Pm);
        assert!(a.confidence > 0.5);

        let calls = model.invoke_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0][1].content.contains(content));
    }

    #[tokio::test]
    async fn model_failure_is_an_error() {
        let model = MockChatModel::new().with_invoke_error(LlmError::Timeout("60s".into()));
        let err = classify_perspective(&model, "x").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Llm(LlmError::Timeout(_))));
    }

    #[tokio::test]
    async fn garbage_answer_is_an_extraction_error() {
        let model = MockChatModel::new().with_reply("I think it's a PM.");
        let err = classify_perspective(&model, "x").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Extraction(_)));
    }
}
