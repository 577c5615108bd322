//! Claim-based FIFO job queue over the persistence boundary.
//!
//! The queue exclusively mutates job state; executors treat jobs as
//! read-only. Atomicity of [`JobQueue::claim`] comes from the store
//! (`FOR UPDATE SKIP LOCKED` in postgres, a map-wide write lock in memory).

use std::sync::Arc;

use uuid::Uuid;

use crate::db::Database;
use crate::db::models::{JobState, JobType, ScanJob};
use crate::error::QueueError;

/// Facade enforcing the job state machine on top of the store.
#[derive(Clone)]
pub struct JobQueue {
    db: Arc<dyn Database>,
}

impl JobQueue {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Write a new queued job. Ordering is insertion time.
    pub async fn enqueue(
        &self,
        scan_id: Uuid,
        job_type: JobType,
        payload: serde_json::Value,
    ) -> Result<ScanJob, QueueError> {
        let job = ScanJob::new(scan_id, job_type, payload);
        self.db.insert_job(&job).await?;
        tracing::debug!(job_id = %job.id, job_type = job_type.as_str(), "Enqueued job");
        Ok(job)
    }

    /// Claim the oldest queued job for a worker, or `None` when empty.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<ScanJob>, QueueError> {
        Ok(self.db.claim_next_job(worker_id).await?)
    }

    /// running -> done.
    pub async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.transition(job_id, JobState::Done, None, None).await
    }

    /// running -> failed, with a typed error string.
    pub async fn fail(
        &self,
        job_id: Uuid,
        error_type: &str,
        error_message: &str,
    ) -> Result<(), QueueError> {
        self.transition(job_id, JobState::Failed, Some(error_type), Some(error_message))
            .await
    }

    /// Any non-terminal state -> cancelled.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.transition(job_id, JobState::Cancelled, None, None).await
    }

    async fn transition(
        &self,
        job_id: Uuid,
        to: JobState,
        error_type: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), QueueError> {
        let job = self.db.get_job(job_id).await?;
        if !transition_allowed(job.state, to) {
            return Err(QueueError::InvalidTransition {
                from: job.state,
                to,
            });
        }
        self.db
            .update_job_state(job_id, to, error_type, error_message)
            .await?;
        Ok(())
    }
}

fn transition_allowed(from: JobState, to: JobState) -> bool {
    match to {
        JobState::Done | JobState::Failed => from == JobState::Running,
        JobState::Cancelled => !from.is_terminal(),
        JobState::Running => from == JobState::Queued,
        JobState::Queued => false,
    }
}
