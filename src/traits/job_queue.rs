use async_trait::async_trait;

use crate::types::{JobState, LockJob};

/// Deduplicating work queue keyed by job id.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Admit a job unless one with the same id is waiting, delayed or
    /// active. Returns whether the job was admitted.
    async fn enqueue(&self, job_id: &str, payload: LockJob) -> bool;

    /// Current state of a job, without side effects.
    async fn job_state(&self, job_id: &str) -> Option<JobState>;
}
