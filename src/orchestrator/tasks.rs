//! Periodic sweeps. Each `*_once` function is a pure function of (now, store
//! contents); `Orchestrator::run` only schedules them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, span, warn, Instrument, Level};

use super::core::Orchestrator;
use crate::engine::RoundEngine;
use crate::round_store::RoundStoreVariant;
use crate::shutdown::Shutdown;
use crate::traits::{JobQueue, RoundStore};
use crate::types::{DelegationStatus, LockJob, RoundStatus};

/// Failure reason recorded on rounds that never locked.
pub const LOCK_TIMEOUT_REASON: &str = "lock-timeout";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoLockReport {
    /// Overdue PREDICTING rounds seen this tick.
    pub due: usize,
    pub enqueued: usize,
    /// Rounds whose lock job was already in flight.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rounds force-failed for missing their lock deadline.
    pub failed: usize,
    /// Rounds whose recorded delegation disagrees with the live layers.
    pub mismatches: usize,
    pub errors: usize,
}

// ==================== AUTO-LOCK ====================

/// Enqueue one lock job for every PREDICTING round whose window closed.
///
/// Rounds with a waiting, delayed or active job are skipped. A failed store
/// query abandons the tick; the next one sees the same overdue rounds.
pub async fn auto_lock_once<Q: JobQueue + ?Sized>(
    store: &RoundStoreVariant,
    queue: &Q,
    now: u64,
    round_duration_secs: u64,
    shutdown: &Shutdown,
) -> Result<AutoLockReport> {
    let lock_threshold = now.saturating_sub(round_duration_secs);
    let due = store.find_due(RoundStatus::Predicting, lock_threshold).await?;

    let mut report = AutoLockReport {
        due: due.len(),
        ..Default::default()
    };

    for round in due {
        if shutdown.is_signaled() {
            debug!("Shutdown signaled, stopping auto-lock scan");
            break;
        }

        let job_id = round.lock_job_id();
        if let Some(state) = queue.job_state(&job_id).await {
            if state.is_in_flight() {
                debug!("Round {} lock job already {:?}", round.id, state);
                report.skipped += 1;
                continue;
            }
        }

        if queue.enqueue(&job_id, LockJob::for_round(&round.id)).await {
            report.enqueued += 1;
        } else {
            report.skipped += 1;
        }
    }

    if report.due > 0 {
        info!(
            "Auto-lock tick: {} due, {} enqueued, {} already in flight",
            report.due, report.enqueued, report.skipped
        );
    }
    Ok(report)
}

// ==================== RECONCILIATION ====================

/// Fail rounds stuck in PREDICTING past `lock deadline + grace`, then
/// cross-check recorded delegation against the live layers.
///
/// Mismatches are only logged: correcting them automatically could lock a
/// round on the wrong layer.
pub async fn reconcile_once(
    store: &RoundStoreVariant,
    engine: &RoundEngine,
    now: u64,
    round_duration_secs: u64,
    grace_secs: u64,
    shutdown: &Shutdown,
) -> Result<ReconcileReport> {
    let stuck_before = now
        .saturating_sub(round_duration_secs)
        .saturating_sub(grace_secs);
    let stuck = store
        .find_due(RoundStatus::Predicting, stuck_before)
        .await?;

    let mut report = ReconcileReport::default();

    for round in stuck {
        if shutdown.is_signaled() {
            return Ok(report);
        }
        match engine
            .fail_round_from(&round.id, RoundStatus::Predicting, LOCK_TIMEOUT_REASON)
            .await
        {
            Ok(failed) if failed.status == RoundStatus::Failed => report.failed += 1,
            Ok(other) => debug!("Round {} is {}, left as is", other.id, other.status),
            Err(e) => {
                error!("Failed to fail stuck round {}: {}", round.id, e);
                report.errors += 1;
            }
        }
    }

    let mut live = store.list_by_status(RoundStatus::Predicting).await?;
    live.extend(store.list_by_status(RoundStatus::Locked).await?);

    for round in live {
        if shutdown.is_signaled() {
            break;
        }

        // A delegated round returns to the base layer when it locks.
        let expect_delegated =
            round.status == RoundStatus::Predicting && round.delegate_tx_hash.is_some();

        match engine.delegation_status(&round.solana_address).await {
            Ok(status) => {
                let delegated = status == DelegationStatus::Delegated;
                if delegated != expect_delegated {
                    warn!(
                        "Delegation mismatch for round {} ({}): recorded delegated={}, live={:?}",
                        round.id, round.status, expect_delegated, status
                    );
                    report.mismatches += 1;
                }
            }
            Err(e) => {
                warn!("Could not read delegation for round {}: {}", round.id, e);
                report.errors += 1;
            }
        }
    }

    if report != ReconcileReport::default() {
        info!(
            "Reconcile tick: {} failed, {} delegation mismatches, {} errors",
            report.failed, report.mismatches, report.errors
        );
    }
    Ok(report)
}

// ==================== RETENTION ====================

/// Delete SETTLED and FAILED rounds whose every lifecycle timestamp is older
/// than the retention window.
pub async fn retention_once(
    store: &RoundStoreVariant,
    now: u64,
    retention_secs: u64,
    shutdown: &Shutdown,
) -> Result<usize> {
    let cutoff = now.saturating_sub(retention_secs);
    let mut deleted = 0;

    for status in [RoundStatus::Settled, RoundStatus::Failed] {
        let candidates = store.find_due(status, cutoff).await?;
        for round in candidates {
            if shutdown.is_signaled() {
                return Ok(deleted);
            }
            if round.last_activity_at() >= cutoff {
                continue;
            }
            match store.delete(&round.id).await {
                Ok(true) => {
                    debug!("Deleted {} round {}", round.status, round.id);
                    deleted += 1;
                }
                Ok(false) => {}
                Err(e) => error!("Failed to delete round {}: {}", round.id, e),
            }
        }
    }

    if deleted > 0 {
        info!("Retention tick: deleted {} rounds", deleted);
    }
    Ok(deleted)
}

fn tick_interval(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

impl Orchestrator {
    /// Run the lock workers and the three periodic sweeps until `shutdown`
    /// is signaled.
    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        info!(
            "Starting orchestrator (round_duration={}s, workers={})",
            self.config.round_duration_secs,
            self.queue.settings().workers
        );

        let Orchestrator {
            config,
            store,
            engine,
            queue,
            clock,
        } = self;

        let worker_handles = queue.spawn_workers(Arc::clone(&engine), shutdown.clone());

        // === Auto-lock task: enqueue lock jobs for overdue rounds ===
        let auto_lock_handle = {
            let store = Arc::clone(&store);
            let queue = Arc::clone(&queue);
            let clock = Arc::clone(&clock);
            let mut shutdown = shutdown.clone();
            let round_duration = config.round_duration_secs;
            let mut interval = tick_interval(config.auto_lock_interval_secs);

            tokio::spawn(
                async move {
                    info!("Auto-lock task started");
                    loop {
                        tokio::select! {
                            biased;
                            _ = shutdown.wait() => break,
                            _ = interval.tick() => {}
                        }
                        let now = clock.now_secs();
                        if let Err(e) =
                            auto_lock_once(&store, queue.as_ref(), now, round_duration, &shutdown)
                                .await
                        {
                            error!("Auto-lock tick abandoned: {}", e);
                        }
                    }
                    info!("Auto-lock task stopped");
                }
                .instrument(span!(Level::INFO, "auto_lock_task")),
            )
        };

        // === Reconcile task: fail stuck rounds, cross-check delegation ===
        let reconcile_handle = {
            let store = Arc::clone(&store);
            let engine = Arc::clone(&engine);
            let clock = Arc::clone(&clock);
            let mut shutdown = shutdown.clone();
            let round_duration = config.round_duration_secs;
            let grace = config.reconcile_grace_secs;
            let mut interval = tick_interval(config.reconcile_interval_secs);

            tokio::spawn(
                async move {
                    info!("Reconcile task started (grace={}s)", grace);
                    loop {
                        tokio::select! {
                            biased;
                            _ = shutdown.wait() => break,
                            _ = interval.tick() => {}
                        }
                        let now = clock.now_secs();
                        if let Err(e) =
                            reconcile_once(&store, &engine, now, round_duration, grace, &shutdown)
                                .await
                        {
                            error!("Reconcile tick abandoned: {}", e);
                        }
                    }
                    info!("Reconcile task stopped");
                }
                .instrument(span!(Level::INFO, "reconcile_task")),
            )
        };

        // === Retention task: delete old terminal rounds ===
        let retention_handle = {
            let store = Arc::clone(&store);
            let queue = Arc::clone(&queue);
            let clock = Arc::clone(&clock);
            let mut shutdown = shutdown.clone();
            let retention = config.retention_secs;
            let mut interval = tick_interval(config.retention_interval_secs);

            tokio::spawn(
                async move {
                    info!("Retention task started (retention={}s)", retention);
                    loop {
                        tokio::select! {
                            biased;
                            _ = shutdown.wait() => break,
                            _ = interval.tick() => {}
                        }
                        let now = clock.now_secs();
                        if let Err(e) = retention_once(&store, now, retention, &shutdown).await {
                            error!("Retention tick abandoned: {}", e);
                        }
                        let pruned = queue.prune_finished().await;
                        if pruned > 0 {
                            debug!("Pruned {} finished lock jobs", pruned);
                        }
                    }
                    info!("Retention task stopped");
                }
                .instrument(span!(Level::INFO, "retention_task")),
            )
        };

        let (auto_lock_res, reconcile_res, retention_res) =
            tokio::join!(auto_lock_handle, reconcile_handle, retention_handle);
        auto_lock_res?;
        reconcile_res?;
        retention_res?;

        for handle in worker_handles {
            handle.await?;
        }

        info!("Orchestrator stopped");
        Ok(())
    }
}
