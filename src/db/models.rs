use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::types::{ErrorKind, JobStatus};
use crate::schemas::grading::GradingResult;
use crate::schemas::rubric::Rubric;

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub event_code: String,
    pub file_ref: String,
    pub status: JobStatus,
    pub result: Option<Json<GradingResult>>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub created_at: PrimitiveDateTime,
    pub started_at: Option<PrimitiveDateTime>,
    pub completed_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RubricRow {
    pub event_code: String,
    pub rubric_data: Json<Rubric>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}
