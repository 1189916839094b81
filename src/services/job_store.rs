use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::grading::GradingResult;
use crate::schemas::job::{Job, JobError, JobStatus};

/// Outcome of a terminal write. Writing a terminal state twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyTerminal,
}

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job {0} is not pending")]
    AlreadyClaimed(Uuid),
    #[error("job {id} cannot finish from status {from}")]
    InvalidTransition { id: Uuid, from: &'static str },
    #[error("job store state is unavailable: {0}")]
    Poisoned(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, event_code: &str, file_ref: &str) -> Result<Uuid, JobStoreError>;

    async fn get(&self, id: Uuid) -> Result<Job, JobStoreError>;

    /// pending -> processing, atomically. Any other status is `AlreadyClaimed`.
    async fn claim(&self, id: Uuid) -> Result<Job, JobStoreError>;

    /// Claims the oldest pending job, if any.
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    async fn complete(&self, id: Uuid, result: &GradingResult)
        -> Result<Transition, JobStoreError>;

    async fn fail(&self, id: Uuid, error: &JobError) -> Result<Transition, JobStoreError>;

    /// Fails every processing job claimed before `started_before` and returns
    /// `(id, file_ref)` for each so the uploads can be released.
    async fn fail_stale(
        &self,
        started_before: PrimitiveDateTime,
        error: &JobError,
    ) -> Result<Vec<(Uuid, String)>, JobStoreError>;
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn resolve_noop(&self, id: Uuid) -> Result<Transition, JobStoreError> {
        let row = repositories::jobs::find_by_id(&self.pool, id)
            .await?
            .ok_or(JobStoreError::NotFound(id))?;
        settle(id, row.status)
    }
}

/// Decides what a terminal write that matched no `processing` row means.
fn settle(id: Uuid, status: JobStatus) -> Result<Transition, JobStoreError> {
    if status.is_terminal() {
        Ok(Transition::AlreadyTerminal)
    } else {
        Err(JobStoreError::InvalidTransition { id, from: status.as_str() })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, event_code: &str, file_ref: &str) -> Result<Uuid, JobStoreError> {
        let row = repositories::jobs::insert_pending(
            &self.pool,
            Uuid::new_v4(),
            event_code,
            file_ref,
            primitive_now_utc(),
        )
        .await?;
        Ok(row.id)
    }

    async fn get(&self, id: Uuid) -> Result<Job, JobStoreError> {
        repositories::jobs::find_by_id(&self.pool, id)
            .await?
            .map(Job::from)
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn claim(&self, id: Uuid) -> Result<Job, JobStoreError> {
        match repositories::jobs::claim(&self.pool, id, primitive_now_utc()).await? {
            Some(row) => Ok(Job::from(row)),
            None => match repositories::jobs::find_by_id(&self.pool, id).await? {
                Some(_) => Err(JobStoreError::AlreadyClaimed(id)),
                None => Err(JobStoreError::NotFound(id)),
            },
        }
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let row = repositories::jobs::claim_next(&self.pool, primitive_now_utc()).await?;
        Ok(row.map(Job::from))
    }

    async fn complete(
        &self,
        id: Uuid,
        result: &GradingResult,
    ) -> Result<Transition, JobStoreError> {
        if repositories::jobs::mark_complete(&self.pool, id, result, primitive_now_utc()).await? {
            return Ok(Transition::Applied);
        }
        self.resolve_noop(id).await
    }

    async fn fail(&self, id: Uuid, error: &JobError) -> Result<Transition, JobStoreError> {
        if repositories::jobs::mark_failed(
            &self.pool,
            id,
            error.kind,
            &error.message,
            primitive_now_utc(),
        )
        .await?
        {
            return Ok(Transition::Applied);
        }
        self.resolve_noop(id).await
    }

    async fn fail_stale(
        &self,
        started_before: PrimitiveDateTime,
        error: &JobError,
    ) -> Result<Vec<(Uuid, String)>, JobStoreError> {
        let failed = repositories::jobs::fail_started_before(
            &self.pool,
            started_before,
            error.kind,
            &error.message,
            primitive_now_utc(),
        )
        .await?;
        Ok(failed)
    }
}

/// Mutex-guarded map with the same compare-and-set semantics as Postgres,
/// for tests and embedding. Finished jobs stay in memory until
/// [`MemoryJobStore::evict_finished`] is called; the service binary always
/// runs on [`PgJobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryJobs>,
}

#[derive(Default)]
struct MemoryJobs {
    next_seq: u64,
    jobs: HashMap<Uuid, (u64, Job)>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops completed and failed jobs that finished before `finished_before`
    /// and returns how many were removed. Pending and processing jobs stay.
    pub fn evict_finished(
        &self,
        finished_before: PrimitiveDateTime,
    ) -> Result<usize, JobStoreError> {
        let mut state = self.lock()?;
        let before = state.jobs.len();
        state.jobs.retain(|_, (_, job)| {
            !(job.status.is_terminal()
                && job.completed_at.is_some_and(|completed| completed < finished_before))
        });
        Ok(before - state.jobs.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryJobs>, JobStoreError> {
        self.inner.lock().map_err(|err| JobStoreError::Poisoned(err.to_string()))
    }

    fn finish(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut Job, PrimitiveDateTime),
    ) -> Result<Transition, JobStoreError> {
        let mut state = self.lock()?;
        let (_, job) = state.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.status != JobStatus::Processing {
            return settle(id, job.status);
        }
        apply(job, primitive_now_utc());
        Ok(Transition::Applied)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, event_code: &str, file_ref: &str) -> Result<Uuid, JobStoreError> {
        let mut state = self.lock()?;
        let id = Uuid::new_v4();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            id,
            (
                seq,
                Job {
                    id,
                    event_code: event_code.to_string(),
                    file_ref: file_ref.to_string(),
                    status: JobStatus::Pending,
                    result: None,
                    error: None,
                    created_at: primitive_now_utc(),
                    started_at: None,
                    completed_at: None,
                },
            ),
        );
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let state = self.lock()?;
        state.jobs.get(&id).map(|(_, job)| job.clone()).ok_or(JobStoreError::NotFound(id))
    }

    async fn claim(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let mut state = self.lock()?;
        let (_, job) = state.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.status != JobStatus::Pending {
            return Err(JobStoreError::AlreadyClaimed(id));
        }
        job.status = JobStatus::Processing;
        job.started_at = Some(primitive_now_utc());
        Ok(job.clone())
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let mut state = self.lock()?;
        let next = state
            .jobs
            .values_mut()
            .filter(|(_, job)| job.status == JobStatus::Pending)
            .min_by_key(|(seq, _)| *seq);

        Ok(next.map(|(_, job)| {
            job.status = JobStatus::Processing;
            job.started_at = Some(primitive_now_utc());
            job.clone()
        }))
    }

    async fn complete(
        &self,
        id: Uuid,
        result: &GradingResult,
    ) -> Result<Transition, JobStoreError> {
        self.finish(id, |job, now| {
            job.status = JobStatus::Complete;
            job.result = Some(result.clone());
            job.completed_at = Some(now);
        })
    }

    async fn fail(&self, id: Uuid, error: &JobError) -> Result<Transition, JobStoreError> {
        self.finish(id, |job, now| {
            job.status = JobStatus::Failed;
            job.error = Some(error.clone());
            job.completed_at = Some(now);
        })
    }

    async fn fail_stale(
        &self,
        started_before: PrimitiveDateTime,
        error: &JobError,
    ) -> Result<Vec<(Uuid, String)>, JobStoreError> {
        let mut state = self.lock()?;
        let now = primitive_now_utc();
        let mut failed = Vec::new();
        for (_, job) in state.jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.started_at.is_some_and(|started| started < started_before);
            if stale {
                job.status = JobStatus::Failed;
                job.error = Some(error.clone());
                job.completed_at = Some(now);
                failed.push((job.id, job.file_ref.clone()));
            }
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::grading::GradingResult;
    use crate::schemas::job::ErrorKind;
    use std::sync::Arc;

    fn result() -> GradingResult {
        GradingResult {
            event_name: "FOR".to_string(),
            total_possible: 10,
            total_awarded: 7,
            sections: Vec::new(),
            overall_feedback: "ok".to_string(),
            penalties: Vec::new(),
            was_truncated: false,
            truncated_at_tokens: None,
            graded_by: None,
        }
    }

    #[tokio::test]
    async fn claim_is_compare_and_set() {
        let store = MemoryJobStore::new();
        let id = store.create("FOR", "a.pdf").await.expect("create");

        let claimed = store.claim(id).await.expect("first claim");
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(claimed.started_at.is_some());

        assert!(matches!(store.claim(id).await, Err(JobStoreError::AlreadyClaimed(_))));
        assert!(matches!(store.claim(Uuid::new_v4()).await, Err(JobStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryJobStore::new());
        let id = store.create("FOR", "a.pdf").await.expect("create");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.claim(id).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => winners += 1,
                Err(JobStoreError::AlreadyClaimed(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn claim_next_takes_oldest_pending() {
        let store = MemoryJobStore::new();
        let first = store.create("FOR", "a.pdf").await.expect("create");
        let second = store.create("FOR", "b.pdf").await.expect("create");

        assert_eq!(store.claim_next().await.expect("claim").map(|job| job.id), Some(first));
        assert_eq!(store.claim_next().await.expect("claim").map(|job| job.id), Some(second));
        assert!(store.claim_next().await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn terminal_writes_are_idempotent() {
        let store = MemoryJobStore::new();
        let id = store.create("FOR", "a.pdf").await.expect("create");
        store.claim(id).await.expect("claim");

        assert_eq!(store.complete(id, &result()).await.expect("complete"), Transition::Applied);
        let error = JobError::new(ErrorKind::Internal, "late failure");
        assert_eq!(store.fail(id, &error).await.expect("fail"), Transition::AlreadyTerminal);

        let job = store.get(id).await.expect("get");
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.is_well_formed());
    }

    #[tokio::test]
    async fn finishing_pending_job_is_rejected() {
        let store = MemoryJobStore::new();
        let id = store.create("FOR", "a.pdf").await.expect("create");

        let outcome = store.complete(id, &result()).await;
        assert!(matches!(outcome, Err(JobStoreError::InvalidTransition { from: "pending", .. })));
    }

    #[tokio::test]
    async fn fail_stale_only_touches_old_processing_jobs() {
        let store = MemoryJobStore::new();
        let stale = store.create("FOR", "stale.pdf").await.expect("create");
        let pending = store.create("FOR", "pending.pdf").await.expect("create");
        store.claim(stale).await.expect("claim");

        let cutoff = primitive_now_utc() + time::Duration::seconds(1);
        let error = JobError::new(ErrorKind::Internal, "stuck");
        let failed = store.fail_stale(cutoff, &error).await.expect("sweep");

        assert_eq!(failed, vec![(stale, "stale.pdf".to_string())]);
        assert_eq!(store.get(stale).await.expect("get").status, JobStatus::Failed);
        assert_eq!(store.get(pending).await.expect("get").status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn evict_finished_keeps_live_jobs() {
        let store = MemoryJobStore::new();
        let done = store.create("FOR", "done.pdf").await.expect("create");
        let failed = store.create("FOR", "failed.pdf").await.expect("create");
        let running = store.create("FOR", "running.pdf").await.expect("create");
        let waiting = store.create("FOR", "waiting.pdf").await.expect("create");
        store.claim(done).await.expect("claim");
        store.claim(failed).await.expect("claim");
        store.claim(running).await.expect("claim");
        store.complete(done, &result()).await.expect("complete");
        store.fail(failed, &JobError::new(ErrorKind::Internal, "boom")).await.expect("fail");

        let long_ago = primitive_now_utc() - time::Duration::hours(1);
        assert_eq!(store.evict_finished(long_ago).expect("evict"), 0);

        let cutoff = primitive_now_utc() + time::Duration::seconds(1);
        assert_eq!(store.evict_finished(cutoff).expect("evict"), 2);
        assert!(matches!(store.get(done).await, Err(JobStoreError::NotFound(_))));
        assert!(matches!(store.get(failed).await, Err(JobStoreError::NotFound(_))));
        assert_eq!(store.get(running).await.expect("get").status, JobStatus::Processing);
        assert_eq!(store.get(waiting).await.expect("get").status, JobStatus::Pending);
    }
}
