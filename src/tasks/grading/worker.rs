use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use validator::Validate;

use crate::core::metrics::{
    GRADING_DURATION_SECONDS, JOBS_TOTAL, QUEUE_LATENCY_SECONDS, TEXT_TRUNCATIONS_TOTAL,
};
use crate::core::time::{primitive_now_utc, seconds_between};
use crate::schemas::grading::GradingResult;
use crate::schemas::job::{ErrorKind, Job, JobError, JobStatus, JobStatusView, SubmitRequest};
use crate::schemas::rubric::normalize_event_code;
use crate::services::ai_grading::GradingClient;
use crate::services::job_store::{JobStore, JobStoreError, Transition};
use crate::services::pdf_text::{ExtractionError, TextExtractor};
use crate::services::prompt::PromptBuilder;
use crate::services::result_merge::{merge, page_count_penalty};
use crate::services::rubric_resolver::RubricResolver;
use crate::services::storage::FileStore;
use crate::services::token_budget::TokenBudgeter;
use crate::services::vision_audit::VisionAuditor;

use super::errors::{PipelineError, SubmitError};

/// Collaborators the pipeline is assembled from.
pub struct PipelineParts {
    pub jobs: Arc<dyn JobStore>,
    pub files: Arc<dyn FileStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub resolver: RubricResolver,
    pub budgeter: TokenBudgeter,
    pub grader: GradingClient,
    pub auditor: VisionAuditor,
    pub extraction_timeout: Duration,
}

/// Where a processed job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error_kind: Option<ErrorKind>,
}

/// Drives jobs from `pending` to a terminal state. Cheap to clone; every
/// worker loop holds its own handle.
#[derive(Clone)]
pub struct GradingPipeline {
    inner: Arc<PipelineParts>,
}

impl GradingPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self { inner: Arc::new(parts) }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.inner.jobs
    }

    pub fn files(&self) -> &Arc<dyn FileStore> {
        &self.inner.files
    }

    pub async fn submit(&self, event_code: &str, file_ref: &str) -> Result<Uuid, SubmitError> {
        let request =
            SubmitRequest { event_code: event_code.trim().to_string(), file_ref: file_ref.to_string() };
        request.validate()?;

        let event_code = normalize_event_code(&request.event_code);
        let job_id = self.inner.jobs.create(&event_code, &request.file_ref).await?;
        tracing::info!(%job_id, event_code = %event_code, "Grading job submitted");
        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView, JobStoreError> {
        Ok(self.inner.jobs.get(job_id).await?.status_view())
    }

    /// Claims a specific job and runs it to completion.
    pub async fn process(&self, job_id: Uuid) -> Result<JobOutcome, JobStoreError> {
        let job = self.inner.jobs.claim(job_id).await?;
        Ok(self.run_claimed(job).await)
    }

    /// Claims the oldest pending job, if any, and runs it.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, JobStoreError> {
        match self.inner.jobs.claim_next().await? {
            Some(job) => Ok(Some(self.run_claimed(job).await)),
            None => Ok(None),
        }
    }

    async fn run_claimed(&self, job: Job) -> JobOutcome {
        let job_id = job.id;
        let started_at = job.started_at.unwrap_or_else(primitive_now_utc);
        metrics::histogram!(QUEUE_LATENCY_SECONDS)
            .record(seconds_between(job.created_at, started_at).max(0.0));
        tracing::info!(%job_id, event_code = %job.event_code, "Grading job claimed");

        let stages = tokio::spawn(run_stages(self.inner.clone(), job.clone()));
        let outcome = match stages.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%job_id, error = %err, "Grading task aborted");
                Err(PipelineError::Internal(format!("grading task aborted: {err}")))
            }
        };

        let outcome = match outcome {
            Ok(result) => self.persist_success(job_id, &result).await,
            Err(err) => {
                tracing::warn!(%job_id, kind = err.kind().as_str(), error = %err, "Grading job failed");
                self.persist_failure(job_id, err.to_job_error()).await
            }
        };

        if let Err(err) = self.inner.files.delete(&job.file_ref).await {
            tracing::warn!(%job_id, file_ref = %job.file_ref, error = %err, "Failed to delete uploaded file");
        }

        metrics::counter!(JOBS_TOTAL, "status" => outcome.status.as_str()).increment(1);
        metrics::histogram!(GRADING_DURATION_SECONDS)
            .record(seconds_between(started_at, primitive_now_utc()).max(0.0));
        outcome
    }

    async fn persist_success(&self, job_id: Uuid, result: &GradingResult) -> JobOutcome {
        match self.inner.jobs.complete(job_id, result).await {
            Ok(Transition::Applied) => {
                tracing::info!(
                    %job_id,
                    total_awarded = result.total_awarded,
                    total_possible = result.total_possible,
                    was_truncated = result.was_truncated,
                    "Grading job completed"
                );
                JobOutcome { job_id, status: JobStatus::Complete, error_kind: None }
            }
            Ok(Transition::AlreadyTerminal) => self.current_outcome(job_id).await,
            Err(err) => {
                tracing::error!(%job_id, error = %err, "Failed to store grading result");
                let error =
                    JobError::new(ErrorKind::Internal, format!("failed to store result: {err}"));
                self.persist_failure(job_id, error).await
            }
        }
    }

    async fn persist_failure(&self, job_id: Uuid, error: JobError) -> JobOutcome {
        let kind = error.kind;
        match self.inner.jobs.fail(job_id, &error).await {
            Ok(Transition::Applied) => {
                JobOutcome { job_id, status: JobStatus::Failed, error_kind: Some(kind) }
            }
            Ok(Transition::AlreadyTerminal) => self.current_outcome(job_id).await,
            Err(err) => {
                // The stale-processing sweep fails the job later.
                tracing::error!(%job_id, error = %err, "Failed to store job failure");
                JobOutcome { job_id, status: JobStatus::Processing, error_kind: Some(kind) }
            }
        }
    }

    async fn current_outcome(&self, job_id: Uuid) -> JobOutcome {
        match self.inner.jobs.get(job_id).await {
            Ok(job) => JobOutcome {
                job_id,
                status: job.status,
                error_kind: job.error.map(|error| error.kind),
            },
            Err(err) => {
                tracing::error!(%job_id, error = %err, "Failed to reload job");
                JobOutcome { job_id, status: JobStatus::Processing, error_kind: None }
            }
        }
    }
}

async fn run_stages(parts: Arc<PipelineParts>, job: Job) -> Result<GradingResult, PipelineError> {
    let job_id = job.id;

    let document =
        tokio::time::timeout(parts.extraction_timeout, parts.extractor.extract(&job.file_ref))
            .await
            .map_err(|_| ExtractionError::Timeout(parts.extraction_timeout))??;
    tracing::debug!(%job_id, pages = document.page_count, "Text extracted");

    let budgeter = parts.budgeter.clone();
    let text = document.text;
    let budgeted = tokio::task::spawn_blocking(move || budgeter.budget(&text))
        .await
        .map_err(|err| PipelineError::Internal(format!("token budgeting failed: {err}")))?;
    if budgeted.truncated {
        tracing::warn!(
            %job_id,
            original_tokens = budgeted.original_tokens,
            kept_tokens = budgeted.kept_tokens,
            "Extracted text truncated to token cap"
        );
        metrics::counter!(TEXT_TRUNCATIONS_TOTAL).increment(1);
    }

    let resolved = parts.resolver.resolve(&job.event_code).await?;
    let payload = PromptBuilder::build(
        resolved.rubric.clone(),
        &resolved.outline,
        &budgeted.text,
        budgeted.truncated,
    );

    let graded = parts.grader.grade(&payload).await?;

    let mut penalties = parts.auditor.audit(&job.file_ref, &resolved.outline).await;
    penalties.push(page_count_penalty(document.page_count));

    let mut result = merge(graded, penalties);
    result.was_truncated = budgeted.truncated;
    result.truncated_at_tokens = budgeted
        .truncated
        .then(|| u32::try_from(parts.budgeter.policy().effective_cap()).unwrap_or(u32::MAX));

    if !result.is_consistent() {
        return Err(PipelineError::Internal("merged result broke score invariants".to_string()));
    }

    Ok(result)
}
