use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::RubricRow;
use crate::schemas::rubric::Rubric;

pub(crate) async fn find_by_code(
    pool: &PgPool,
    event_code: &str,
) -> Result<Option<RubricRow>, sqlx::Error> {
    sqlx::query_as::<_, RubricRow>(
        "SELECT event_code, rubric_data, created_at, updated_at
         FROM rubrics
         WHERE event_code = $1",
    )
    .bind(event_code)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn upsert(
    pool: &PgPool,
    rubric: &Rubric,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO rubrics (event_code, rubric_data, created_at, updated_at)
         VALUES ($1, $2, $3, $3)
         ON CONFLICT (event_code) DO UPDATE
         SET rubric_data = EXCLUDED.rubric_data,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(&rubric.event_code)
    .bind(Json(rubric))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn insert_if_absent(
    pool: &PgPool,
    rubric: &Rubric,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        "INSERT INTO rubrics (event_code, rubric_data, created_at, updated_at)
         VALUES ($1, $2, $3, $3)
         ON CONFLICT (event_code) DO NOTHING",
    )
    .bind(&rubric.event_code)
    .bind(Json(rubric))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(inserted.rows_affected() > 0)
}

pub(crate) async fn list_codes(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT event_code FROM rubrics ORDER BY event_code")
        .fetch_all(pool)
        .await
}
