use std::sync::Arc;

use crate::core::config::Settings;
use crate::services::job_store::JobStore;
use crate::services::storage::FileStore;
use crate::tasks::grading::GradingPipeline;

/// Shared handles for the worker loops.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    jobs: Arc<dyn JobStore>,
    files: Arc<dyn FileStore>,
    pipeline: GradingPipeline,
}

impl AppState {
    pub fn new(
        settings: Settings,
        jobs: Arc<dyn JobStore>,
        files: Arc<dyn FileStore>,
        pipeline: GradingPipeline,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, jobs, files, pipeline }) }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.inner.jobs
    }

    pub fn files(&self) -> &Arc<dyn FileStore> {
        &self.inner.files
    }

    pub fn pipeline(&self) -> &GradingPipeline {
        &self.inner.pipeline
    }
}
