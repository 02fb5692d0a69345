//! Prompt texts and prompt assembly.

use crate::models::{Direction, GapItem, Perspective};

// ═══════════════════════════════════════════════════════════
// Perspective classification
// ═══════════════════════════════════════════════════════════

pub const PERSPECTIVE_SYSTEM_PROMPT: &str = "You are a communication analyst who identifies \
the point of view a text is written from. Always answer with the requested JSON only.";

const PERSPECTIVE_ANALYSIS_TEMPLATE: &str = r#"Decide whether the text below is written from a product manager's point of view or a software engineer's point of view.

Signals:
- Product manager: user needs, business value, feature descriptions, usage scenarios, user experience, commercial goals.
- Software engineer: technical implementation, system architecture, interface design, performance, code logic, technical approach.

Answer with JSON in exactly this shape:
{
  "perspective": "pm" | "dev" | "unknown",
  "confidence": number between 0.0 and 1.0,
  "reason": "one sentence explaining the decision"
}

Text:
{content}

Return only the JSON."#;

// ═══════════════════════════════════════════════════════════
// Gap analysis
// ═══════════════════════════════════════════════════════════

pub const GAPS_SYSTEM_PROMPT: &str = "You are a requirements analyst who spots information \
missing from cross-team communication. Always answer with the requested JSON only.";

/// A developer reviewing a product spec.
const GAPS_TEMPLATE_PM: &str = r#"You are a senior software engineer reviewing a product manager's requirement.

Identify key information that is missing and that an engineer would need to understand and build it. Consider:
- whether the user scenario and target users are clear
- whether business value and expected outcome are stated
- whether scope and acceptance criteria are defined
- whether priority and timing are given
- whether error cases and edge conditions are covered

Requirement:
{content}

Answer with JSON in exactly this shape:
{
  "gaps": [
    {"category": "e.g. user scenario, acceptance criteria", "description": "what is missing", "importance": "high" | "medium" | "low"}
  ],
  "suggestions": ["a concrete question the product manager should answer"]
}

Only list information that is really missing. An empty list is fine for a complete requirement.
Return only the JSON."#;

/// A product manager reviewing a tech design.
const GAPS_TEMPLATE_DEV: &str = r#"You are a senior product manager reviewing an engineer's technical design.

Identify key information that is missing and that a product manager would need to understand the design and make decisions. Consider:
- whether the architecture and technology choices are clear
- whether interfaces and data flow are explained
- whether technical risks and mitigations are assessed
- whether schedule and resource needs are stated
- whether the impact on user experience is considered

Technical design:
{content}

Answer with JSON in exactly this shape:
{
  "gaps": [
    {"category": "e.g. architecture, technical risk", "description": "what is missing", "importance": "high" | "medium" | "low"}
  ],
  "suggestions": ["a concrete question the engineer should answer"]
}

Only list information that is really missing. An empty list is fine for a complete design.
Return only the JSON."#;

// ═══════════════════════════════════════════════════════════
// Translation
// ═══════════════════════════════════════════════════════════

pub const PM_TO_DEV_SYSTEM_PROMPT: &str = r#"You translate product requirements into engineering language.

Rewrite the product manager's text so that a software engineer can act on it:
- restate the goal as concrete functional requirements
- name the likely components, data and interfaces involved
- spell out inputs, outputs, constraints and edge cases
- list open technical questions where the requirement is silent
- suggest acceptance criteria that can be tested

Keep the original intent. Do not invent business facts. Answer in clear, structured Markdown."#;

pub const DEV_TO_PM_SYSTEM_PROMPT: &str = r#"You translate engineering language into product language.

Rewrite the engineer's text so that a product manager can make decisions from it:
- explain what changes for users and the business
- translate technical terms into plain language
- make risks, trade-offs and dependencies explicit
- state effort, timeline or resource implications where they are implied
- list the decisions the product manager needs to take

Keep the technical facts accurate. Do not invent commitments. Answer in clear, structured Markdown."#;

/// System prompt for a translation direction.
pub fn system_prompt(direction: Direction) -> &'static str {
    match direction {
        Direction::PmToDev => PM_TO_DEV_SYSTEM_PROMPT,
        Direction::DevToPm => DEV_TO_PM_SYSTEM_PROMPT,
    }
}

pub fn perspective_prompt(content: &str) -> String {
    PERSPECTIVE_ANALYSIS_TEMPLATE.replace("{content}", content)
}

/// Gap-analysis prompt for a perspective. `None` for `Unknown`: there is no
/// reviewer role to take.
pub fn gap_prompt(perspective: Perspective, content: &str) -> Option<String> {
    let template = match perspective {
        Perspective::Pm => GAPS_TEMPLATE_PM,
        Perspective::Dev => GAPS_TEMPLATE_DEV,
        Perspective::Unknown => return None,
    };
    Some(template.replace("{content}", content))
}

/// User prompt for the translate step: the content, an optional context
/// block, and the detected gaps as caveats.
pub fn build_translate_prompt(content: &str, context: Option<&str>, gaps: &[GapItem]) -> String {
    let mut prompt = format!("Translate the following content:\n\n{content}");

    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\n\nAdditional context:\n");
        prompt.push_str(context);
    }

    if !gaps.is_empty() {
        prompt.push_str(
            "\n\nNote: the input may be missing the following information. \
             Fill it in where reasonable or flag it in the translation:",
        );
        for gap in gaps {
            prompt.push_str("\n- ");
            prompt.push_str(&gap.description);
        }
    }

    prompt
}
