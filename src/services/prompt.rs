use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::schemas::grading::{
    REQUIRED_OUTLINE_CHECK, REQUIRED_OUTLINE_POINTS, STATEMENT_OF_ASSURANCES_CHECK,
    STATEMENT_OF_ASSURANCES_POINTS,
};
use crate::schemas::rubric::Rubric;
use crate::services::llm::ChatMessage;

pub const SCHEMA_NAME: &str = "grading_result";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaId {
    pub name: &'static str,
    pub version: u32,
}

/// Everything the grading call needs; the rubric travels along so the
/// response can be checked against it.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    pub schema: SchemaId,
    pub messages: Vec<ChatMessage>,
    pub response_format: Value,
    pub rubric: Arc<Rubric>,
    pub truncated: bool,
}

const SYSTEM_PROMPT: &str = "You are an experienced competition judge scoring a written \
business report against an official rubric. Score each rubric section on the substance \
it demonstrates: claims without data, research or reasoning earn little credit, and polish \
does not compensate for missing analysis. Feedback must be specific about what is missing \
and what would raise the score. Respond with JSON that matches the provided schema and \
nothing else.";

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(
        rubric: Arc<Rubric>,
        outline: &[String],
        text: &str,
        truncated: bool,
    ) -> PromptPayload {
        let user = user_prompt(&rubric, outline, text, truncated);
        PromptPayload {
            schema: SchemaId { name: SCHEMA_NAME, version: SCHEMA_VERSION },
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
            response_format: response_format(),
            rubric,
            truncated,
        }
    }
}

fn user_prompt(rubric: &Rubric, outline: &[String], text: &str, truncated: bool) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "EVENT: {}", rubric.display_name());
    if let Some(description) = rubric.event_description.as_deref() {
        let _ = writeln!(prompt, "EVENT DESCRIPTION: {description}");
        let _ = writeln!(
            prompt,
            "A report written for a different event must score low in every section, and \
             overall_feedback must say so first."
        );
    }

    let _ = writeln!(prompt, "\nRUBRIC ({} points total):", rubric.total_points);
    for section in &rubric.sections {
        let _ = writeln!(prompt, "- {} (max {} points)", section.name, section.max_points);
        if let Some(description) = section.description.as_deref() {
            let _ = writeln!(prompt, "  {description}");
        }
        for tier in &section.scoring_guide {
            let _ = writeln!(prompt, "  * {}: {}", tier.tier, tier.description);
        }
    }

    if !outline.is_empty() {
        let _ = writeln!(prompt, "\nREQUIRED OUTLINE (in order):");
        for (idx, heading) in outline.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {heading}", idx + 1);
        }
    }

    let _ = writeln!(
        prompt,
        "\nPENALTY CHECKLIST. Report each entry in `penalties` with exactly this description; \
         status is \"flagged\" when the text shows the problem, \"clear\" when the text shows \
         the requirement is met, \"manual_check\" when the text cannot tell:"
    );
    let _ = writeln!(
        prompt,
        "- \"{STATEMENT_OF_ASSURANCES_CHECK}\" ({STATEMENT_OF_ASSURANCES_POINTS} points): the \
         report includes a signed statement of assurances page."
    );
    let _ = writeln!(
        prompt,
        "- \"{REQUIRED_OUTLINE_CHECK}\" ({REQUIRED_OUTLINE_POINTS} points): the report follows \
         the required outline."
    );

    let _ = writeln!(
        prompt,
        "\nRULES: list every rubric section exactly once using its exact name and max_points; \
         awarded_points is between 0 and max_points; total_awarded is the sum of \
         awarded_points; total_possible is {}. Penalties never change section scores.",
        rubric.total_points
    );

    if truncated {
        let _ = writeln!(
            prompt,
            "\nNOTE: the report text was cut to fit the length limit. Do not penalize content \
             that may have been cut off at the end."
        );
    }

    let _ = write!(prompt, "\nREPORT TEXT:\n{text}");
    prompt
}

/// Strict `json_schema` response format for `grading_result` v1.
fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": SCHEMA_NAME,
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "event_name": {"type": "string"},
                    "total_possible": {"type": "integer"},
                    "total_awarded": {"type": "integer"},
                    "sections": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "max_points": {"type": "integer"},
                                "awarded_points": {"type": "integer"},
                                "feedback": {"type": "string"}
                            },
                            "required": ["name", "max_points", "awarded_points", "feedback"],
                            "additionalProperties": false
                        }
                    },
                    "overall_feedback": {"type": "string"},
                    "penalties": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "description": {"type": "string"},
                                "penalty_points": {"type": "integer"},
                                "status": {
                                    "type": "string",
                                    "enum": ["flagged", "clear", "manual_check"]
                                },
                                "note": {"type": "string"}
                            },
                            "required": ["description", "penalty_points", "status", "note"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": [
                    "event_name", "total_possible", "total_awarded",
                    "sections", "overall_feedback", "penalties"
                ],
                "additionalProperties": false
            }
        }
    })
}
