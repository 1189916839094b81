use std::time::Duration;

use anyhow::{Context, Result};

use crate::core::metrics::STALE_JOBS_RECOVERED_TOTAL;
use crate::core::time::primitive_now_utc;
use crate::schemas::job::{ErrorKind, JobError};
use crate::services::job_store::JobStore;
use crate::services::storage::FileStore;

/// Fails jobs that have sat in `processing` longer than any run could take
/// (a worker crashed or lost its database connection) and releases their
/// uploads. Returns how many jobs were recovered.
pub async fn recover_stale_processing_jobs(
    jobs: &dyn JobStore,
    files: &dyn FileStore,
    stale_after: Duration,
) -> Result<usize> {
    let cutoff = primitive_now_utc() - stale_after;
    let error = JobError::new(
        ErrorKind::Internal,
        format!("job exceeded the {}s processing deadline and was abandoned", stale_after.as_secs()),
    );

    let recovered = jobs
        .fail_stale(cutoff, &error)
        .await
        .context("Failed to fail stale processing jobs")?;

    for (job_id, file_ref) in &recovered {
        tracing::warn!(%job_id, file_ref = %file_ref, "Recovered stale processing job");
        if let Err(err) = files.delete(file_ref).await {
            tracing::warn!(%job_id, error = %err, "Failed to delete file of stale job");
        }
    }

    if !recovered.is_empty() {
        metrics::counter!(STALE_JOBS_RECOVERED_TOTAL).increment(recovered.len() as u64);
    }

    Ok(recovered.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::job::JobStatus;
    use crate::services::job_store::MemoryJobStore;
    use crate::services::storage::LocalFileStore;

    #[tokio::test]
    async fn stale_jobs_are_failed_and_files_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("stuck.pdf"), b"%PDF").expect("write");
        let files = LocalFileStore::new(dir.path());
        let jobs = MemoryJobStore::new();

        let stuck = jobs.create("FOR", "stuck.pdf").await.expect("create");
        jobs.claim(stuck).await.expect("claim");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let recovered =
            recover_stale_processing_jobs(&jobs, &files, Duration::from_millis(5)).await.expect("sweep");
        assert_eq!(recovered, 1);

        let job = jobs.get(stuck).await.expect("get");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.map(|error| error.kind), Some(ErrorKind::Internal));
        assert!(!dir.path().join("stuck.pdf").exists());
    }

    #[tokio::test]
    async fn fresh_jobs_are_left_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = LocalFileStore::new(dir.path());
        let jobs = MemoryJobStore::new();
        let running = jobs.create("FOR", "running.pdf").await.expect("create");
        jobs.claim(running).await.expect("claim");

        let recovered =
            recover_stale_processing_jobs(&jobs, &files, Duration::from_secs(600)).await.expect("sweep");
        assert_eq!(recovered, 0);
        assert_eq!(jobs.get(running).await.expect("get").status, JobStatus::Processing);
    }
}
