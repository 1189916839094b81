use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::JobRow;
pub use crate::db::types::{ErrorKind, JobStatus};
use crate::schemas::grading::GradingResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub event_code: String,
    pub file_ref: String,
    pub status: JobStatus,
    pub result: Option<GradingResult>,
    pub error: Option<JobError>,
    pub created_at: PrimitiveDateTime,
    pub started_at: Option<PrimitiveDateTime>,
    pub completed_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Polling view returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub result: Option<GradingResult>,
    pub error: Option<JobError>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitRequest {
    #[validate(length(min = 1, max = 32, message = "event code must be 1-32 characters"))]
    pub event_code: String,
    #[validate(length(min = 1, max = 512, message = "file reference must be 1-512 characters"))]
    pub file_ref: String,
}

impl Job {
    /// Terminal records hold exactly one of result/error, matching the status.
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            JobStatus::Complete => self.result.is_some() && self.error.is_none(),
            JobStatus::Failed => self.result.is_none() && self.error.is_some(),
            JobStatus::Pending | JobStatus::Processing => {
                self.result.is_none() && self.error.is_none()
            }
        }
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id,
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: format_primitive(self.created_at),
            completed_at: self.completed_at.map(format_primitive),
        }
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let error = match (row.error_kind, row.error) {
            (Some(kind), Some(message)) => Some(JobError { kind, message }),
            (None, Some(message)) => Some(JobError { kind: ErrorKind::Internal, message }),
            _ => None,
        };

        Self {
            id: row.id,
            event_code: row.event_code,
            file_ref: row.file_ref,
            status: row.status,
            result: row.result.map(|json| json.0),
            error,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn job(status: JobStatus) -> Job {
        Job {
            id: Uuid::new_v4(),
            event_code: "FOR".to_string(),
            file_ref: "uploads/a.pdf".to_string(),
            status,
            result: None,
            error: None,
            created_at: primitive_now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn failed_job_needs_error_only() {
        let mut failed = job(JobStatus::Failed);
        assert!(!failed.is_well_formed());
        failed.error = Some(JobError::new(ErrorKind::Extraction, "unreadable"));
        assert!(failed.is_well_formed());
    }

    #[test]
    fn status_view_serializes_error_kind() {
        let mut failed = job(JobStatus::Failed);
        failed.error = Some(JobError::new(ErrorKind::RubricNotFound, "no rubric for XYZ"));
        let view = serde_json::to_value(failed.status_view()).expect("encode");
        assert_eq!(view["status"], "failed");
        assert_eq!(view["error"]["kind"], "rubric_not_found");
        assert!(view["result"].is_null());
    }

    #[test]
    fn submit_request_rejects_blank_fields() {
        let request =
            SubmitRequest { event_code: String::new(), file_ref: "uploads/a.pdf".to_string() };
        assert!(request.validate().is_err());

        let request =
            SubmitRequest { event_code: "FOR".to_string(), file_ref: "uploads/a.pdf".to_string() };
        assert!(request.validate().is_ok());
    }
}
