use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::tasks::LOCK_TIMEOUT_REASON;
use super::{
    auto_lock_once, reconcile_once, retention_once, AutoLockReport, Orchestrator, ReconcileReport,
};
use crate::clock::Clock;
use crate::config::{BaseConfig, ExecutionType, StoreType};
use crate::execution::mock::MOCK_DELEGATION_PROGRAM_ID;
use crate::execution::ExecutionLayerVariant;
use crate::queue::{LockQueue, QueueSettings};
use crate::round_store::RoundStoreVariant;
use crate::shutdown;
use crate::test_support::TestHarness;
use crate::traits::{JobQueue, RoundStore};
use crate::types::{AccountInfo, JobState, Layer, LockJob, RoundStatus};

const ROUND_DURATION: u64 = 60;
const GRACE: u64 = 300;
const RETENTION: u64 = 86_400;

fn queue() -> LockQueue {
    LockQueue::new(QueueSettings {
        workers: 1,
        max_attempts: 3,
        retry_delay: Duration::from_millis(10),
    })
}

/// Queue that reports every job in one fixed state.
struct FixedStateQueue {
    state: JobState,
    enqueued: AtomicUsize,
}

impl FixedStateQueue {
    fn new(state: JobState) -> Self {
        Self {
            state,
            enqueued: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JobQueue for FixedStateQueue {
    async fn enqueue(&self, _job_id: &str, _payload: LockJob) -> bool {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn job_state(&self, _job_id: &str) -> Option<JobState> {
        Some(self.state)
    }
}

// ==================== TESTS: auto_lock_once ====================

#[tokio::test]
async fn test_auto_lock_enqueues_only_overdue_rounds() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();
    let queue = queue();

    let overdue = h.engine.open_round("M").await?;
    h.clock.advance(30);
    let fresh = h.engine.open_round("M").await?;
    h.clock.advance(30);

    let report = auto_lock_once(
        &h.shared_store,
        &queue,
        h.clock.now_secs(),
        ROUND_DURATION,
        &shutdown,
    )
    .await?;

    assert_eq!(report.due, 1);
    assert_eq!(report.enqueued, 1);
    assert_eq!(
        queue.job_state(&overdue.lock_job_id()).await,
        Some(JobState::Waiting)
    );
    assert_eq!(queue.job_state(&fresh.lock_job_id()).await, None);

    Ok(())
}

#[tokio::test]
async fn test_auto_lock_skips_in_flight_jobs() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();
    let queue = queue();

    let round = h.engine.open_round("M").await?;
    h.clock.advance(ROUND_DURATION);
    let now = h.clock.now_secs();

    let first = auto_lock_once(&h.shared_store, &queue, now, ROUND_DURATION, &shutdown).await?;
    let second = auto_lock_once(&h.shared_store, &queue, now, ROUND_DURATION, &shutdown).await?;

    assert_eq!(first.enqueued, 1);
    assert_eq!(second.due, 1);
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(
        queue.job_state(&round.lock_job_id()).await,
        Some(JobState::Waiting)
    );

    Ok(())
}

#[tokio::test]
async fn test_auto_lock_skips_active_and_delayed_jobs() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();

    h.engine.open_round("M").await?;
    h.clock.advance(ROUND_DURATION);
    let now = h.clock.now_secs();

    for state in [JobState::Active, JobState::Delayed] {
        let queue = FixedStateQueue::new(state);
        let report = auto_lock_once(&h.shared_store, &queue, now, ROUND_DURATION, &shutdown).await?;

        assert_eq!(report.due, 1);
        assert_eq!(report.enqueued, 0, "{:?} job must not be re-enqueued", state);
        assert_eq!(report.skipped, 1);
        assert_eq!(queue.enqueued.load(Ordering::SeqCst), 0);
    }

    // Finished jobs do not block a new one.
    let queue = FixedStateQueue::new(JobState::Failed);
    let report = auto_lock_once(&h.shared_store, &queue, now, ROUND_DURATION, &shutdown).await?;
    assert_eq!(report.enqueued, 1);

    Ok(())
}

#[tokio::test]
async fn test_auto_lock_skips_job_while_worker_runs_it() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (trigger, shutdown) = shutdown::channel();
    let queue = Arc::new(queue());

    let round = h.engine.open_round("M").await?;
    h.clock.advance(ROUND_DURATION);
    let now = h.clock.now_secs();
    h.execution.set_delay(Some(Duration::from_millis(200)));

    let workers = queue.spawn_workers(Arc::clone(&h.engine), shutdown.clone());
    let first =
        auto_lock_once(&h.shared_store, queue.as_ref(), now, ROUND_DURATION, &shutdown).await?;
    assert_eq!(first.enqueued, 1);

    let job_id = round.lock_job_id();
    let mut state = None;
    for _ in 0..100 {
        state = queue.job_state(&job_id).await;
        if state == Some(JobState::Active) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(state, Some(JobState::Active));

    let second =
        auto_lock_once(&h.shared_store, queue.as_ref(), now, ROUND_DURATION, &shutdown).await?;
    assert_eq!(second.due, 1);
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.skipped, 1);

    trigger.signal();
    for worker in workers {
        worker.await?;
    }
    assert_eq!(h.execution.lock_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_auto_lock_ignores_locked_rounds() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();
    let queue = queue();

    let round = h.engine.open_round("M").await?;
    h.engine.lock_round(&round.id).await?;
    h.clock.advance(ROUND_DURATION * 2);

    let report = auto_lock_once(
        &h.shared_store,
        &queue,
        h.clock.now_secs(),
        ROUND_DURATION,
        &shutdown,
    )
    .await?;
    assert_eq!(report, AutoLockReport::default());

    Ok(())
}

#[tokio::test]
async fn test_auto_lock_stops_when_shutdown_signaled() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (trigger, shutdown) = shutdown::channel();
    let queue = queue();

    h.engine.open_round("M").await?;
    h.clock.advance(ROUND_DURATION);
    trigger.signal();

    let report = auto_lock_once(
        &h.shared_store,
        &queue,
        h.clock.now_secs(),
        ROUND_DURATION,
        &shutdown,
    )
    .await?;
    assert_eq!(report.due, 1);
    assert_eq!(report.enqueued, 0);

    Ok(())
}

// ==================== TESTS: reconcile_once ====================

#[tokio::test]
async fn test_reconcile_fails_stuck_round() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();

    let stuck = h.engine.open_round("M").await?;
    h.clock.advance(ROUND_DURATION + GRACE);
    let within_grace = h.engine.open_round("M").await?;
    let now = h.clock.now_secs();

    let report =
        reconcile_once(&h.shared_store, &h.engine, now, ROUND_DURATION, GRACE, &shutdown).await?;
    assert_eq!(report.failed, 1);
    assert_eq!(report.mismatches, 0);
    assert_eq!(report.errors, 0);

    let failed = h.store.get(&stuck.id).await?.unwrap();
    assert_eq!(failed.status, RoundStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some(LOCK_TIMEOUT_REASON));
    assert_eq!(failed.failed_at, Some(now));

    let untouched = h.store.get(&within_grace.id).await?.unwrap();
    assert_eq!(untouched.status, RoundStatus::Predicting);

    // A second sweep finds nothing left to fail.
    let again =
        reconcile_once(&h.shared_store, &h.engine, now, ROUND_DURATION, GRACE, &shutdown).await?;
    assert_eq!(again.failed, 0);

    Ok(())
}

#[tokio::test]
async fn test_reconcile_keeps_round_locked_during_sweep() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();

    let round = h.engine.open_round("M").await?;
    h.clock.advance(ROUND_DURATION + GRACE + 1);
    h.execution.set_delay(Some(Duration::from_millis(100)));

    // Lock lands while the sweep is waiting on the round.
    let engine = Arc::clone(&h.engine);
    let id = round.id.clone();
    let lock = tokio::spawn(async move { engine.lock_round(&id).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = reconcile_once(
        &h.shared_store,
        &h.engine,
        h.clock.now_secs(),
        ROUND_DURATION,
        GRACE,
        &shutdown,
    )
    .await?;
    let locked = lock.await??;

    assert_eq!(report.failed, 0);
    assert_eq!(locked.status, RoundStatus::Locked);

    let stored = h.store.get(&round.id).await?.unwrap();
    assert_eq!(stored.status, RoundStatus::Locked);
    assert!(stored.failure_reason.is_none());
    assert_eq!(stored.lock_tx_hash, locked.lock_tx_hash);

    Ok(())
}

#[tokio::test]
async fn test_reconcile_accepts_consistent_delegation() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();

    let delegated = h.engine.open_round("M").await?;
    h.engine.delegate_round(&delegated.id).await?;

    let locked = h.engine.open_round("M").await?;
    h.engine.delegate_round(&locked.id).await?;
    h.engine.lock_round(&locked.id).await?;

    h.engine.open_round("M").await?;

    let report = reconcile_once(
        &h.shared_store,
        &h.engine,
        h.clock.now_secs(),
        ROUND_DURATION,
        GRACE,
        &shutdown,
    )
    .await?;
    assert_eq!(report, ReconcileReport::default());

    Ok(())
}

#[tokio::test]
async fn test_reconcile_reports_delegation_mismatch() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();

    // Delegated on chain, but the record never saw the delegate tx.
    let round = h.engine.open_round("M").await?;
    let account = AccountInfo {
        owner: MOCK_DELEGATION_PROGRAM_ID.to_string(),
        lamports: 1,
    };
    h.execution.set_account(Layer::Base, &round.solana_address, Some(account.clone()));
    h.execution.set_account(Layer::Ephemeral, &round.solana_address, Some(account));

    let report = reconcile_once(
        &h.shared_store,
        &h.engine,
        h.clock.now_secs(),
        ROUND_DURATION,
        GRACE,
        &shutdown,
    )
    .await?;
    assert_eq!(report.mismatches, 1);

    // Reported only; the record is left alone.
    let stored = h.store.get(&round.id).await?.unwrap();
    assert_eq!(stored.status, RoundStatus::Predicting);
    assert!(stored.delegate_tx_hash.is_none());

    Ok(())
}

#[tokio::test]
async fn test_reconcile_counts_unreadable_accounts() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();

    let round = h.engine.open_round("M").await?;
    h.execution.set_account(Layer::Base, &round.solana_address, None);

    let report = reconcile_once(
        &h.shared_store,
        &h.engine,
        h.clock.now_secs(),
        ROUND_DURATION,
        GRACE,
        &shutdown,
    )
    .await?;
    assert_eq!(report.errors, 1);
    assert_eq!(report.mismatches, 0);

    Ok(())
}

// ==================== TESTS: retention_once ====================

#[tokio::test]
async fn test_retention_deletes_only_old_terminal_rounds() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();

    let old_failed = h.engine.open_round("M").await?;
    h.engine.fail_round(&old_failed.id, "manual").await?;
    let old_predicting = h.engine.open_round("M").await?;

    h.clock.advance(RETENTION + 10);
    let young_failed = h.engine.open_round("M").await?;
    h.engine.fail_round(&young_failed.id, "manual").await?;

    let deleted = retention_once(&h.shared_store, h.clock.now_secs(), RETENTION, &shutdown).await?;
    assert_eq!(deleted, 1);

    assert!(h.store.get(&old_failed.id).await?.is_none());
    assert!(h.store.get(&old_predicting.id).await?.is_some());
    assert!(h.store.get(&young_failed.id).await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_retention_measures_from_last_activity() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let (_trigger, shutdown) = shutdown::channel();

    // Opened long ago but settled recently.
    let round = h.engine.open_round("M").await?;
    h.clock.advance(RETENTION);
    h.engine.lock_round(&round.id).await?;
    let outcome = crate::types::RoundOutcome::DiceRoll { total: 6 };
    let attestation = h.attest(&round.id, &outcome, h.clock.now_secs());
    h.engine.settle_round(&round.id, outcome, &attestation).await?;
    h.clock.advance(10);

    let deleted = retention_once(&h.shared_store, h.clock.now_secs(), RETENTION, &shutdown).await?;
    assert_eq!(deleted, 0);
    assert!(h.store.get(&round.id).await?.is_some());

    h.clock.advance(RETENTION);
    let deleted = retention_once(&h.shared_store, h.clock.now_secs(), RETENTION, &shutdown).await?;
    assert_eq!(deleted, 1);

    Ok(())
}

// ==================== TESTS: run ====================

fn fast_config() -> BaseConfig {
    BaseConfig {
        store_type: StoreType::Memory,
        execution_type: ExecutionType::Mock,
        round_duration_secs: ROUND_DURATION,
        auto_lock_interval_secs: 1,
        reconcile_interval_secs: 1,
        retention_interval_secs: 1,
        lock_workers: 2,
        lock_retry_delay_ms: 10,
        ..BaseConfig::default()
    }
}

#[tokio::test]
async fn test_run_locks_overdue_round_and_stops_on_shutdown() -> anyhow::Result<()> {
    let h = TestHarness::new().await;
    let round = h.engine.open_round("M").await?;
    h.clock.advance(ROUND_DURATION);

    let orchestrator = Orchestrator::new(
        fast_config(),
        RoundStoreVariant::Memory(h.store.clone()),
        ExecutionLayerVariant::Mock(h.execution.clone()),
        h.signer.verifier(),
        Arc::new(h.clock.clone()),
    );

    let (trigger, shutdown) = shutdown::channel();
    let run = tokio::spawn(orchestrator.run(shutdown));

    let mut status = RoundStatus::Predicting;
    for _ in 0..200 {
        status = h.store.get(&round.id).await?.unwrap().status;
        if status == RoundStatus::Locked {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, RoundStatus::Locked);
    assert_eq!(h.execution.lock_count(), 1);

    trigger.signal();
    tokio::time::timeout(Duration::from_secs(2), run).await???;

    Ok(())
}

#[tokio::test]
async fn test_lock_job_id_matches_queue_key() {
    let job = LockJob::for_round("abc");
    assert_eq!(job.job_id, "lock-abc");
    assert_eq!(job.round_id, "abc");
}
