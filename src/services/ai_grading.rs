use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::core::config::Settings;
use crate::core::metrics::CORRECTIVE_RETRIES_TOTAL;
use crate::schemas::grading::GradingResult;
use crate::schemas::rubric::Rubric;
use crate::services::llm::{ChatMessage, ChatModel, ChatRequest, LlmError};
use crate::services::prompt::PromptPayload;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("model output violated the grading schema after a corrective retry: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),
    #[error(transparent)]
    External(#[from] LlmError),
}

#[derive(Debug, Clone)]
pub struct GradingConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl GradingConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.ai().grading_model.clone(),
            temperature: settings.ai().grading_temperature,
            max_tokens: settings.ai().max_tokens,
            timeout: settings.ai().request_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct GradingClient {
    model: Arc<dyn ChatModel>,
    config: GradingConfig,
}

impl GradingClient {
    pub fn new(model: Arc<dyn ChatModel>, config: GradingConfig) -> Self {
        Self { model, config }
    }

    /// Calls the grading model and returns a result consistent with the
    /// payload's rubric. A rejected answer gets exactly one corrective retry;
    /// transport failures and timeouts are returned as-is.
    pub async fn grade(&self, payload: &PromptPayload) -> Result<GradingResult, GradingError> {
        let timer = Instant::now();
        let first = self.call(payload, payload.messages.clone()).await?;

        let violations = match check_response(&first, &payload.rubric) {
            Ok(result) => return Ok(self.finish(result, &payload.rubric, timer)),
            Err(violations) => violations,
        };

        tracing::warn!(
            event_code = %payload.rubric.event_code,
            schema = payload.schema.name,
            schema_version = payload.schema.version,
            violations = ?violations,
            "Grading response rejected, issuing corrective retry"
        );
        metrics::counter!(CORRECTIVE_RETRIES_TOTAL).increment(1);

        let mut messages = payload.messages.clone();
        messages.push(ChatMessage::assistant(first));
        messages.push(ChatMessage::user(corrective_prompt(&violations)));

        let second = self.call(payload, messages).await?;
        match check_response(&second, &payload.rubric) {
            Ok(result) => Ok(self.finish(result, &payload.rubric, timer)),
            Err(violations) => {
                tracing::warn!(
                    event_code = %payload.rubric.event_code,
                    schema = payload.schema.name,
                    schema_version = payload.schema.version,
                    violations = ?violations,
                    "Grading response rejected after corrective retry"
                );
                Err(GradingError::SchemaValidation(violations))
            }
        }
    }

    async fn call(
        &self,
        payload: &PromptPayload,
        messages: Vec<ChatMessage>,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: Some(payload.response_format.clone()),
        };

        let completion = tokio::time::timeout(self.config.timeout, self.model.complete(&request))
            .await
            .map_err(|_| LlmError::Timeout(self.config.timeout))??;

        tracing::debug!(
            prompt_tokens = completion.prompt_tokens,
            completion_tokens = completion.completion_tokens,
            "Grading call returned"
        );
        Ok(completion.content)
    }

    fn finish(&self, mut result: GradingResult, rubric: &Rubric, timer: Instant) -> GradingResult {
        result.event_name = rubric.display_name();
        result.graded_by = Some(self.config.model.clone());
        tracing::info!(
            event_code = %rubric.event_code,
            total_awarded = result.total_awarded,
            total_possible = result.total_possible,
            duration_seconds = timer.elapsed().as_secs_f64(),
            "AI grading completed"
        );
        result
    }
}

fn corrective_prompt(violations: &[String]) -> String {
    let mut prompt = String::from(
        "Your previous answer was rejected because it broke these constraints:\n",
    );
    for violation in violations {
        prompt.push_str("- ");
        prompt.push_str(violation);
        prompt.push('\n');
    }
    prompt.push_str("Return the complete corrected JSON object and nothing else.");
    prompt
}

/// Parses the raw answer and checks it against the rubric. Every violation
/// is reported, not just the first.
pub(crate) fn check_response(raw: &str, rubric: &Rubric) -> Result<GradingResult, Vec<String>> {
    let result: GradingResult = serde_json::from_str(raw)
        .map_err(|err| vec![format!("response is not a valid grading_result object: {err}")])?;

    let violations = violations(&result, rubric);
    if violations.is_empty() {
        Ok(result)
    } else {
        Err(violations)
    }
}

fn violations(result: &GradingResult, rubric: &Rubric) -> Vec<String> {
    let mut violations = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for section in &result.sections {
        match rubric.section(&section.name) {
            Some(expected) => {
                *seen.entry(expected.name.clone()).or_default() += 1;
                if section.max_points != expected.max_points {
                    violations.push(format!(
                        "section \"{}\" has max_points {} but the rubric says {}",
                        expected.name, section.max_points, expected.max_points
                    ));
                }
            }
            None => violations.push(format!("section \"{}\" is not in the rubric", section.name)),
        }
        if section.awarded_points > section.max_points {
            violations.push(format!(
                "section \"{}\" awards {} points, more than its max of {}",
                section.name, section.awarded_points, section.max_points
            ));
        }
    }

    for expected in &rubric.sections {
        match seen.get(&expected.name).copied().unwrap_or(0) {
            0 => violations.push(format!("section \"{}\" is missing", expected.name)),
            1 => {}
            count => violations
                .push(format!("section \"{}\" appears {count} times", expected.name)),
        }
    }

    if result.total_possible != rubric.total_points {
        violations.push(format!(
            "total_possible is {} but the rubric totals {}",
            result.total_possible, rubric.total_points
        ));
    }

    let sum = result.sections_total();
    if u64::from(result.total_awarded) != sum {
        violations.push(format!(
            "total_awarded is {} but the section scores sum to {sum}",
            result.total_awarded
        ));
    }

    violations
}
