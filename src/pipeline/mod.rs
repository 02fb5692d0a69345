pub mod agent;
pub mod classify;
pub mod executor;
pub mod gaps;
pub mod json;
pub mod prompts;
pub mod state;
pub mod stream;

pub use agent::TranslateAgent;
pub use classify::{classify_perspective, PerspectiveAssessment};
pub use executor::{PipelineExecutor, Stage};
pub use gaps::{analyze_gaps, GapAnalysis};
pub use json::{extract_json, ExtractionError};
pub use state::{RunState, StateUpdate};
pub use stream::{ErrorStage, TranslateEvent};

use thiserror::Error;

use crate::llm::LlmError;

/// Failure of a single-call analysis stage (classifier or gap analyzer).
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
