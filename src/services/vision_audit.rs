use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;
use crate::core::metrics::VISION_AUDIT_TOTAL;
use crate::schemas::grading::{
    Penalty, PenaltyStatus, STATEMENT_OF_ASSURANCES_CHECK, STATEMENT_OF_ASSURANCES_POINTS,
};
use crate::services::llm::{ChatMessage, ChatModel, ChatRequest, ContentPart, ImageUrl, LlmError};
use crate::services::pdf_render::{PageRenderer, RenderError};
use crate::services::storage::{FileStore, StorageError};

const MAX_AUDIT_PAGES: usize = 8;
const SIGNATURE_NOTE: &str = "Signatures must be verified manually.";

const VISION_PROMPT: &str = "You are checking selected pages of a business report for a \
Statement of Assurances or Academic Integrity form. It may be typed, scanned, or photographed. \
Look for the form title, signature lines, assurance checkboxes, or an official integrity \
agreement. Do not judge formatting or writing quality. Answer with JSON: soa_found is true \
only if such a form is visible; soa_note says what you saw.";

#[derive(Debug, Error)]
pub enum VisionAuditError {
    #[error("vision check timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not read document: {0}")]
    Storage(#[from] StorageError),
    #[error("could not render pages: {0}")]
    Render(#[from] RenderError),
    #[error("vision model call failed: {0}")]
    Model(#[from] LlmError),
    #[error("vision model returned malformed JSON: {0}")]
    Malformed(String),
    #[error("page rendering task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub enabled: bool,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl VisionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enabled: settings.ai().vision_enabled,
            model: settings.ai().vision_model.clone(),
            temperature: settings.ai().vision_temperature,
            max_tokens: 512,
            timeout: settings.ai().vision_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VisionVerdict {
    soa_found: bool,
    #[serde(default)]
    soa_note: String,
}

/// Best-effort statement-of-assurances check over rendered page images.
/// Never fails: problems degrade the entry to `manual_check`.
#[derive(Clone)]
pub struct VisionAuditor {
    files: Arc<dyn FileStore>,
    renderer: Arc<dyn PageRenderer>,
    model: Arc<dyn ChatModel>,
    config: VisionConfig,
}

impl VisionAuditor {
    pub fn new(
        files: Arc<dyn FileStore>,
        renderer: Arc<dyn PageRenderer>,
        model: Arc<dyn ChatModel>,
        config: VisionConfig,
    ) -> Self {
        Self { files, renderer, model, config }
    }

    /// Returns the penalties this pass is authoritative for. An empty list
    /// leaves the text pass's entries in place: that happens when the pass
    /// is disabled, when no selected page is a full-page scan, and when the
    /// form was not found but some selected pages were typed.
    pub async fn audit(&self, file_ref: &str, outline: &[String]) -> Vec<Penalty> {
        if !self.config.enabled {
            metrics::counter!(VISION_AUDIT_TOTAL, "outcome" => "disabled").increment(1);
            return Vec::new();
        }

        let outcome = tokio::time::timeout(self.config.timeout, self.check(file_ref, outline))
            .await
            .unwrap_or(Err(VisionAuditError::Timeout(self.config.timeout)));

        match outcome {
            Ok(Some(penalty)) => {
                let label = match penalty.status {
                    PenaltyStatus::Clear => "clear",
                    PenaltyStatus::Flagged => "flagged",
                    PenaltyStatus::ManualCheck => "manual_check",
                };
                metrics::counter!(VISION_AUDIT_TOTAL, "outcome" => label).increment(1);
                vec![penalty]
            }
            Ok(None) => {
                tracing::debug!(file_ref, "No page images to audit, keeping text verdict");
                metrics::counter!(VISION_AUDIT_TOTAL, "outcome" => "skipped").increment(1);
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(file_ref, error = %err, "Vision check failed, flagging for manual check");
                metrics::counter!(VISION_AUDIT_TOTAL, "outcome" => "error").increment(1);
                vec![soa_penalty(
                    PenaltyStatus::ManualCheck,
                    format!("Automated visual check unavailable ({err}). {SIGNATURE_NOTE}"),
                )]
            }
        }
    }

    async fn check(
        &self,
        file_ref: &str,
        outline: &[String],
    ) -> Result<Option<Penalty>, VisionAuditError> {
        let bytes = self.files.read(file_ref).await?;
        let renderer = self.renderer.clone();
        let (selected, pages) = tokio::task::spawn_blocking(move || {
            let selected = select_pages(renderer.page_count(&bytes)?);
            let pages = renderer.render_pages(&bytes, &selected)?;
            Ok::<_, RenderError>((selected.len(), pages))
        })
        .await
        .map_err(|err| VisionAuditError::Join(err.to_string()))??;

        if pages.is_empty() {
            return Ok(None);
        }

        let mut prompt = VISION_PROMPT.to_string();
        if !outline.is_empty() {
            prompt.push_str(" Pages titled with these report sections are not the form: ");
            prompt.push_str(&outline.join("; "));
            prompt.push('.');
        }

        let mut parts = vec![ContentPart::Text { text: prompt }];
        parts.extend(pages.iter().map(|page| ContentPart::ImageUrl {
            image_url: ImageUrl { url: page.data_url(), detail: Some("low".to_string()) },
        }));

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user_parts(parts)],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: Some(response_format()),
        };
        let completion = self.model.complete(&request).await?;
        let verdict: VisionVerdict = serde_json::from_str(&completion.content)
            .map_err(|err| VisionAuditError::Malformed(err.to_string()))?;

        // Typed pages were left out of the images, so "not found" only
        // counts when every selected page was seen.
        if !verdict.soa_found && pages.len() < selected {
            tracing::debug!(
                file_ref,
                rendered = pages.len(),
                selected,
                "Form not among scanned pages, keeping text verdict"
            );
            return Ok(None);
        }

        let status = if verdict.soa_found { PenaltyStatus::Clear } else { PenaltyStatus::Flagged };
        let mut note = verdict.soa_note.trim().to_string();
        if !note.to_ascii_lowercase().contains("verif") {
            if !note.is_empty() {
                note.push(' ');
            }
            note.push_str(SIGNATURE_NOTE);
        }

        tracing::info!(file_ref, pages = pages.len(), soa_found = verdict.soa_found, "Vision check completed");
        Ok(Some(soa_penalty(status, note)))
    }
}

fn soa_penalty(status: PenaltyStatus, note: String) -> Penalty {
    Penalty {
        description: STATEMENT_OF_ASSURANCES_CHECK.to_string(),
        penalty_points: STATEMENT_OF_ASSURANCES_POINTS,
        status,
        note,
    }
}

/// First page, the last four, and the 25/50/75 % marks. More than eight
/// candidates are cut to the first four and last four.
pub fn select_pages(page_count: usize) -> Vec<usize> {
    if page_count == 0 {
        return Vec::new();
    }

    let mut pages = BTreeSet::from([0]);
    pages.extend(page_count.saturating_sub(4)..page_count);
    if page_count > 2 {
        for quarter in 1..=3 {
            pages.insert(page_count * quarter / 4);
        }
    }

    let pages: Vec<usize> = pages.into_iter().collect();
    if pages.len() <= MAX_AUDIT_PAGES {
        return pages;
    }
    let half = MAX_AUDIT_PAGES / 2;
    let mut kept = pages[..half].to_vec();
    kept.extend_from_slice(&pages[pages.len() - half..]);
    kept
}

fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "vision_check_result",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "soa_found": {"type": "boolean"},
                    "soa_note": {"type": "string"}
                },
                "required": ["soa_found", "soa_note"],
                "additionalProperties": false
            }
        }
    })
}
