//! In-process lock job queue.
//!
//! Jobs are keyed by id (`lock-<roundId>`); a job is admitted only when no
//! job with the same id is waiting, delayed or active. Workers pull admitted
//! jobs from a kanal channel and run `RoundEngine::lock_round`. Retryable
//! failures go back through the `delayed` state up to `max_attempts`.
//!
//! Job state lives only as long as the queue. After a restart the engine's
//! own status check is what keeps re-delivered jobs safe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kanal::{unbounded_async, AsyncReceiver, AsyncSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::config::BaseConfig;
use crate::engine::RoundEngine;
use crate::shutdown::Shutdown;
use crate::traits::JobQueue;
use crate::types::{JobState, LockJob};

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub workers: usize,
    /// Total attempts per job, including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl QueueSettings {
    pub fn from_config(config: &BaseConfig) -> Self {
        Self {
            workers: config.lock_workers.max(1),
            max_attempts: config.lock_max_attempts.max(1),
            retry_delay: Duration::from_millis(config.lock_retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone)]
struct JobRecord {
    state: JobState,
    attempts: u32,
    last_error: Option<String>,
}

impl JobRecord {
    fn waiting() -> Self {
        Self {
            state: JobState::Waiting,
            attempts: 0,
            last_error: None,
        }
    }
}

pub struct LockQueue {
    jobs: Arc<Mutex<HashMap<String, JobRecord>>>,
    tx: AsyncSender<LockJob>,
    rx: AsyncReceiver<LockJob>,
    settings: QueueSettings,
}

impl LockQueue {
    pub fn new(settings: QueueSettings) -> Self {
        let (tx, rx) = unbounded_async::<LockJob>();
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            tx,
            rx,
            settings,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Attempts made so far for a job.
    pub async fn job_attempts(&self, job_id: &str) -> Option<u32> {
        self.jobs.lock().await.get(job_id).map(|r| r.attempts)
    }

    pub async fn last_error(&self, job_id: &str) -> Option<String> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .and_then(|r| r.last_error.clone())
    }

    /// Forget completed and failed jobs. Returns how many were dropped.
    pub async fn prune_finished(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, record| record.state.is_in_flight());
        before - jobs.len()
    }

    /// Spawn the worker pool. Workers stop pulling jobs once `shutdown` is
    /// signaled; a job already running is finished first.
    pub fn spawn_workers(
        self: &Arc<Self>,
        engine: Arc<RoundEngine>,
        shutdown: Shutdown,
    ) -> Vec<JoinHandle<()>> {
        (0..self.settings.workers)
            .map(|worker_id| {
                let queue = Arc::clone(self);
                let engine = Arc::clone(&engine);
                let shutdown = shutdown.clone();
                let span = span!(Level::INFO, "lock_worker", worker_id);
                tokio::spawn(
                    async move { queue.worker_loop(engine, shutdown).await }.instrument(span),
                )
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, engine: Arc<RoundEngine>, mut shutdown: Shutdown) {
        debug!("Lock worker started");
        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                job = self.rx.recv() => match job {
                    Ok(job) => job,
                    Err(_) => break,
                },
            };
            self.process_once(&engine, job).await;
        }
        debug!("Lock worker stopped");
    }

    /// Run one delivery of `job` and record its resulting state.
    pub async fn process_once(&self, engine: &RoundEngine, job: LockJob) -> JobState {
        let attempt = {
            let mut jobs = self.jobs.lock().await;
            let record = jobs
                .entry(job.job_id.clone())
                .or_insert_with(JobRecord::waiting);
            record.state = JobState::Active;
            record.attempts += 1;
            record.attempts
        };

        match engine.lock_round(&job.round_id).await {
            Ok(round) => {
                debug!(
                    "Job {} completed (round {} is {})",
                    job.job_id, round.id, round.status
                );
                self.finish(&job.job_id, JobState::Completed, None).await
            }
            Err(e) if e.is_retryable() && attempt < self.settings.max_attempts => {
                warn!(
                    "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                    job.job_id, attempt, self.settings.max_attempts, self.settings.retry_delay, e
                );
                let state = self
                    .finish(&job.job_id, JobState::Delayed, Some(e.to_string()))
                    .await;
                self.schedule_retry(job);
                state
            }
            Err(e) => {
                error!(
                    "Job {} failed after {} attempt(s) (round {}): {}",
                    job.job_id, attempt, job.round_id, e
                );
                self.finish(&job.job_id, JobState::Failed, Some(e.to_string()))
                    .await
            }
        }
    }

    async fn finish(&self, job_id: &str, state: JobState, error: Option<String>) -> JobState {
        let mut jobs = self.jobs.lock().await;
        if let Some(record) = jobs.get_mut(job_id) {
            record.state = state;
            if error.is_some() {
                record.last_error = error;
            }
        }
        state
    }

    fn schedule_retry(&self, job: LockJob) {
        let jobs = Arc::clone(&self.jobs);
        let tx = self.tx.clone();
        let delay = self.settings.retry_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut jobs = jobs.lock().await;
                match jobs.get_mut(&job.job_id) {
                    Some(record) if record.state == JobState::Delayed => {
                        record.state = JobState::Waiting;
                    }
                    _ => return,
                }
            }
            if let Err(e) = tx.send(job).await {
                error!("Failed to requeue lock job: {}", e);
            }
        });
    }
}

#[async_trait]
impl JobQueue for LockQueue {
    async fn enqueue(&self, job_id: &str, payload: LockJob) -> bool {
        {
            let mut jobs = self.jobs.lock().await;
            if let Some(existing) = jobs.get(job_id) {
                if existing.state.is_in_flight() {
                    debug!("Job {} already {:?}, not enqueued", job_id, existing.state);
                    return false;
                }
            }
            jobs.insert(job_id.to_string(), JobRecord::waiting());
        }

        let job = LockJob {
            job_id: job_id.to_string(),
            ..payload
        };
        if let Err(e) = self.tx.send(job).await {
            error!("Failed to enqueue job {}: {}", job_id, e);
            self.finish(job_id, JobState::Failed, Some(e.to_string()))
                .await;
            return false;
        }

        info!("Enqueued job {}", job_id);
        true
    }

    async fn job_state(&self, job_id: &str) -> Option<JobState> {
        self.jobs.lock().await.get(job_id).map(|r| r.state)
    }
}
