pub mod core;
pub mod db;
pub(crate) mod repositories;
pub mod schemas;
pub mod services;
pub mod tasks;

use std::sync::Arc;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::services::ai_grading::{GradingClient, GradingConfig};
use crate::services::job_store::{JobStore, PgJobStore};
use crate::services::llm::{ChatModel, OpenAiChatModel};
use crate::services::pdf_render::LopdfPageRenderer;
use crate::services::pdf_text::PdfTextExtractor;
use crate::services::rubric_resolver::RubricResolver;
use crate::services::rubric_store::{seed_rubrics_from_dir, PgRubricStore, RubricStore};
use crate::services::storage::{FileStore, LocalFileStore, S3FileStore};
use crate::services::token_budget::{BudgetPolicy, TokenBudgeter};
use crate::services::vision_audit::{VisionAuditor, VisionConfig};
use crate::tasks::grading::{GradingPipeline, PipelineParts};

pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::connect(&settings).await?;

    let rubrics: Arc<dyn RubricStore> = Arc::new(PgRubricStore::new(db_pool.clone()));
    if let Some(dir) = &settings.rubrics().seed_dir {
        seed_rubrics_from_dir(rubrics.as_ref(), dir).await?;
    }

    let files: Arc<dyn FileStore> = match S3FileStore::from_settings(&settings).await? {
        Some(s3) => {
            tracing::info!(bucket = %settings.s3().bucket, "Reading uploads from S3");
            Arc::new(s3)
        }
        None => {
            tracing::info!(dir = %settings.uploads().upload_dir.display(), "Reading uploads from local directory");
            Arc::new(LocalFileStore::new(settings.uploads().upload_dir.clone()))
        }
    };

    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool));
    let pipeline = build_pipeline(&settings, jobs.clone(), files.clone(), rubrics)?;
    let state = AppState::new(settings, jobs, files, pipeline);

    tasks::scheduler::run(state).await
}

/// Wires the production collaborators around the given stores.
pub fn build_pipeline(
    settings: &Settings,
    jobs: Arc<dyn JobStore>,
    files: Arc<dyn FileStore>,
    rubrics: Arc<dyn RubricStore>,
) -> anyhow::Result<GradingPipeline> {
    let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::from_settings(settings)?);
    let budgeter = TokenBudgeter::new(BudgetPolicy::from_settings(settings))?;

    Ok(GradingPipeline::new(PipelineParts {
        extractor: Arc::new(PdfTextExtractor::new(files.clone(), settings.uploads().max_pages)),
        resolver: RubricResolver::new(rubrics),
        budgeter,
        grader: GradingClient::new(model.clone(), GradingConfig::from_settings(settings)),
        auditor: VisionAuditor::new(
            files.clone(),
            Arc::new(LopdfPageRenderer),
            model,
            VisionConfig::from_settings(settings),
        ),
        extraction_timeout: settings.uploads().extraction_timeout(),
        jobs,
        files,
    }))
}
