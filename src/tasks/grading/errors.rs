use thiserror::Error;
use validator::ValidationErrors;

use crate::schemas::job::{ErrorKind, JobError};
use crate::services::ai_grading::GradingError;
use crate::services::job_store::JobStoreError;
use crate::services::llm::LlmError;
use crate::services::pdf_text::ExtractionError;
use crate::services::rubric_resolver::ResolveError;

/// Rejections raised before a job exists.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid submission: {0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Fatal stage failures. Each one ends the job in `failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("no rubric registered for event {0}")]
    RubricNotFound(String),
    #[error("model output violated the grading schema after a corrective retry: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),
    #[error("grading service failed: {0}")]
    ExternalService(#[from] LlmError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Extraction(_) => ErrorKind::Extraction,
            PipelineError::RubricNotFound(_) => ErrorKind::RubricNotFound,
            PipelineError::SchemaValidation(_) => ErrorKind::SchemaValidation,
            PipelineError::ExternalService(_) => ErrorKind::ExternalService,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn to_job_error(&self) -> JobError {
        JobError::new(self.kind(), self.to_string())
    }
}

impl From<ResolveError> for PipelineError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(code) => PipelineError::RubricNotFound(code),
            ResolveError::Store(err) => PipelineError::Internal(err.to_string()),
        }
    }
}

impl From<GradingError> for PipelineError {
    fn from(err: GradingError) -> Self {
        match err {
            GradingError::SchemaValidation(violations) => {
                PipelineError::SchemaValidation(violations)
            }
            GradingError::External(err) => PipelineError::ExternalService(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn kinds_follow_taxonomy() {
        let timeout: PipelineError = GradingError::External(LlmError::Timeout(Duration::from_secs(20))).into();
        assert_eq!(timeout.kind(), ErrorKind::ExternalService);

        let schema: PipelineError = GradingError::SchemaValidation(vec!["bad".into()]).into();
        assert_eq!(schema.kind(), ErrorKind::SchemaValidation);

        let missing: PipelineError = ResolveError::NotFound("XYZ".to_string()).into();
        let error = missing.to_job_error();
        assert_eq!(error.kind, ErrorKind::RubricNotFound);
        assert_eq!(error.message, "no rubric registered for event XYZ");

        let unreadable: PipelineError = ExtractionError::Unreadable("blank".to_string()).into();
        assert_eq!(unreadable.kind(), ErrorKind::Extraction);
    }
}
