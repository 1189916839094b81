mod errors;
mod maintenance;
mod worker;

pub use errors::{PipelineError, SubmitError};
pub use maintenance::recover_stale_processing_jobs;
pub use worker::{GradingPipeline, JobOutcome, PipelineParts};
