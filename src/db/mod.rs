pub mod models;
pub mod types;

use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};

use crate::core::config::Settings;

/// Connects and applies pending migrations before any worker claims a job.
pub async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    let pool = init_pool(settings).await.context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("Failed to run migrations")?;
    tracing::info!(max_connections = pool.options().get_max_connections(), "Postgres ready");
    Ok(pool)
}

async fn init_pool(settings: &Settings) -> Result<PgPool, sqlx::Error> {
    let database_url = settings.database().database_url();
    let mut connect_options: PgConnectOptions = database_url.parse()?;

    connect_options = connect_options
        .application_name("rubric-grader")
        .log_statements(tracing::log::LevelFilter::Off);

    // Claim loops plus maintenance each hold at most one connection at a time.
    let max_connections = (settings.worker().concurrency as u32).saturating_add(4).max(5);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await
}
