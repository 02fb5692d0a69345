//! Run state shared by the pipeline stages.
//!
//! Stages read the whole `RunState` and return a `StateUpdate`; `apply`
//! overwrites every field present in the update and keeps the rest.

use serde::{Deserialize, Serialize};

use crate::models::{Direction, GapItem, Perspective, TranslateResult};

/// Accumulator for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub content: String,
    pub context: Option<String>,
    pub perspective: Perspective,
    pub confidence: f64,
    pub reason: String,
    pub gaps: Vec<GapItem>,
    pub suggestions: Vec<String>,
    pub direction: Direction,
    pub system_prompt: String,
    pub translated_content: String,
    pub error: Option<String>,
}

impl RunState {
    pub fn new(content: impl Into<String>, context: Option<String>) -> Self {
        Self {
            content: content.into(),
            context,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            perspective,
            confidence,
            reason,
            gaps,
            suggestions,
            direction,
            system_prompt,
            translated_content,
            error,
        } = update;

        if let Some(v) = perspective {
            self.perspective = v;
        }
        if let Some(v) = confidence {
            self.confidence = v;
        }
        if let Some(v) = reason {
            self.reason = v;
        }
        if let Some(v) = gaps {
            self.gaps = v;
        }
        if let Some(v) = suggestions {
            self.suggestions = v;
        }
        if let Some(v) = direction {
            self.direction = v;
        }
        if let Some(v) = system_prompt {
            self.system_prompt = v;
        }
        if let Some(v) = translated_content {
            self.translated_content = v;
        }
        if let Some(v) = error {
            self.error = Some(v);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// The record handed to persistence once the run finished.
    pub fn to_result(&self) -> TranslateResult {
        TranslateResult {
            original_content: self.content.clone(),
            translated_content: self.translated_content.clone(),
            detected_perspective: self.perspective,
            direction: self.direction,
            gaps: self.gaps.clone(),
            suggestions: self.suggestions.clone(),
        }
    }
}

/// Partial state written by one stage. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perspective: Option<Perspective>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaps: Option<Vec<GapItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_content: Option<String>,
    /// Setting an error is sticky: an update can add one, never clear it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateUpdate {
    /// Names of the fields this update writes, in declaration order.
    pub fn channels(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut push = |present: bool, name: &'static str| {
            if present {
                names.push(name);
            }
        };
        push(self.perspective.is_some(), "perspective");
        push(self.confidence.is_some(), "confidence");
        push(self.reason.is_some(), "reason");
        push(self.gaps.is_some(), "gaps");
        push(self.suggestions.is_some(), "suggestions");
        push(self.direction.is_some(), "direction");
        push(self.system_prompt.is_some(), "system_prompt");
        push(self.translated_content.is_some(), "translated_content");
        push(self.error.is_some(), "error");
        names
    }
}
