use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::JobRow;
use crate::db::types::{ErrorKind, JobStatus};
use crate::schemas::grading::GradingResult;

const COLUMNS: &str = "id, event_code, file_ref, status, result, error_kind, error, created_at, started_at, completed_at";

pub(crate) async fn insert_pending(
    pool: &PgPool,
    id: Uuid,
    event_code: &str,
    file_ref: &str,
    now: PrimitiveDateTime,
) -> Result<JobRow, sqlx::Error> {
    sqlx::query_as::<_, JobRow>(&format!(
        "INSERT INTO grading_jobs (id, event_code, file_ref, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $5)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(event_code)
    .bind(file_ref)
    .bind(JobStatus::Pending)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<JobRow>, sqlx::Error> {
    sqlx::query_as::<_, JobRow>(&format!("SELECT {COLUMNS} FROM grading_jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Compare-and-set on status; `None` means the job was not pending.
pub(crate) async fn claim(
    pool: &PgPool,
    id: Uuid,
    now: PrimitiveDateTime,
) -> Result<Option<JobRow>, sqlx::Error> {
    sqlx::query_as::<_, JobRow>(&format!(
        "UPDATE grading_jobs
         SET status = $1,
             started_at = $2,
             updated_at = $2
         WHERE id = $3 AND status = $4
         RETURNING {COLUMNS}"
    ))
    .bind(JobStatus::Processing)
    .bind(now)
    .bind(id)
    .bind(JobStatus::Pending)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn claim_next(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Option<JobRow>, sqlx::Error> {
    sqlx::query_as::<_, JobRow>(
        "WITH candidate AS (
            SELECT id
            FROM grading_jobs
            WHERE status = $1
            ORDER BY created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE grading_jobs
        SET status = $2,
            started_at = $3,
            updated_at = $3
        FROM candidate
        WHERE grading_jobs.id = candidate.id
        RETURNING grading_jobs.id, grading_jobs.event_code, grading_jobs.file_ref,
                  grading_jobs.status, grading_jobs.result, grading_jobs.error_kind,
                  grading_jobs.error, grading_jobs.created_at, grading_jobs.started_at,
                  grading_jobs.completed_at",
    )
    .bind(JobStatus::Pending)
    .bind(JobStatus::Processing)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn mark_complete(
    pool: &PgPool,
    id: Uuid,
    result: &GradingResult,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE grading_jobs
         SET status = $1,
             result = $2,
             completed_at = $3,
             updated_at = $3
         WHERE id = $4 AND status = $5",
    )
    .bind(JobStatus::Complete)
    .bind(Json(result))
    .bind(now)
    .bind(id)
    .bind(JobStatus::Processing)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    kind: ErrorKind,
    message: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE grading_jobs
         SET status = $1,
             error_kind = $2,
             error = $3,
             completed_at = $4,
             updated_at = $4
         WHERE id = $5 AND status = $6",
    )
    .bind(JobStatus::Failed)
    .bind(kind)
    .bind(message)
    .bind(now)
    .bind(id)
    .bind(JobStatus::Processing)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn fail_started_before(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
    kind: ErrorKind,
    message: &str,
    now: PrimitiveDateTime,
) -> Result<Vec<(Uuid, String)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, String)>(
        "UPDATE grading_jobs
         SET status = $1,
             error_kind = $2,
             error = $3,
             completed_at = $4,
             updated_at = $4
         WHERE status = $5
           AND started_at IS NOT NULL
           AND started_at < $6
         RETURNING id, file_ref",
    )
    .bind(JobStatus::Failed)
    .bind(kind)
    .bind(message)
    .bind(now)
    .bind(JobStatus::Processing)
    .bind(cutoff)
    .fetch_all(pool)
    .await
}
