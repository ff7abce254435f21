//! Round lifecycle engine: one legal state transition per call.
//!
//! ```text
//! PREDICTING --lock--> LOCKED --settle--> SETTLED
//! PREDICTING --fail--> FAILED
//! LOCKED     --fail--> FAILED
//! ```
//!
//! Side effects (execution layer calls) happen before the store write, and
//! every store write is a compare-and-transition on the status observed at
//! the start of the call. Calls for the same round are serialized within the
//! process so concurrent callers submit at most one transaction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::attestation::AttestationVerifier;
use crate::clock::Clock;
use crate::error::{ExecutionError, LifecycleError};
use crate::execution::{self, ExecutionLayerVariant};
use crate::round_store::RoundStoreVariant;
use crate::traits::{ExecutionLayer, RoundStore};
use crate::types::{
    Attestation, DelegationStatus, Instruction, Layer, NewRound, Round, RoundOutcome, RoundPatch,
    RoundStatus, Transition,
};

/// Bounded retries of `fail_round` when the status moves underneath it.
const FAIL_CONFLICT_RETRIES: usize = 3;

pub struct RoundEngine {
    store: Arc<RoundStoreVariant>,
    execution: Arc<ExecutionLayerVariant>,
    verifier: AttestationVerifier,
    clock: Arc<dyn Clock>,
    rpc_timeout: Duration,
    round_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RoundEngine {
    pub fn new(
        store: Arc<RoundStoreVariant>,
        execution: Arc<ExecutionLayerVariant>,
        verifier: AttestationVerifier,
        clock: Arc<dyn Clock>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            store,
            execution,
            verifier,
            clock,
            rpc_timeout,
            round_guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<RoundStoreVariant> {
        &self.store
    }

    pub fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    // ==================== OPEN ====================

    /// Open a new round for an active market, starting now.
    pub async fn open_round(&self, market_id: &str) -> Result<Round, LifecycleError> {
        let now = self.clock.now_secs();
        self.create_round(market_id, now, None).await
    }

    /// Pre-create a round that opens at `release_at`.
    pub async fn schedule_round(
        &self,
        market_id: &str,
        release_at: u64,
    ) -> Result<Round, LifecycleError> {
        let now = self.clock.now_secs();
        self.create_round(market_id, release_at.max(now), Some(now)).await
    }

    async fn create_round(
        &self,
        market_id: &str,
        opened_at: u64,
        queued_at: Option<u64>,
    ) -> Result<Round, LifecycleError> {
        let market = self
            .store
            .get_market(market_id)
            .await?
            .ok_or_else(|| LifecycleError::MarketNotFound(market_id.to_string()))?;
        if !market.is_active {
            return Err(LifecycleError::MarketInactive(market_id.to_string()));
        }

        let round_id = uuid::Uuid::new_v4().to_string();
        let address = self.execution.round_address(&round_id);

        let init = Instruction::InitializeRound {
            round: address.clone(),
            round_id: round_id.clone(),
            market_id: market_id.to_string(),
        };
        let tx = self.submit(Layer::Base, &init).await?;
        debug!("Round {} account {} initialized (tx={})", round_id, address, tx);

        let round = self
            .store
            .create(NewRound {
                id: round_id,
                market_id: market_id.to_string(),
                solana_address: address,
                opened_at,
                queued_at,
                scheduled_release_at: queued_at.map(|_| opened_at),
            })
            .await?;

        info!(
            "Opened round {} (market={}, number={}, opened_at={})",
            round.id, round.market_id, round.round_number, round.opened_at
        );
        Ok(round)
    }

    // ==================== DELEGATE ====================

    /// Delegate a PREDICTING round's account to the ephemeral layer.
    pub async fn delegate_round(&self, round_id: &str) -> Result<Round, LifecycleError> {
        self.with_round_guard(round_id, self.delegate_round_inner(round_id)).await
    }

    async fn delegate_round_inner(&self, round_id: &str) -> Result<Round, LifecycleError> {
        let round = self.load_round(round_id).await?;
        if round.status != RoundStatus::Predicting {
            return Err(LifecycleError::InvalidTransition {
                round_id: round_id.to_string(),
                from: round.status,
                action: "delegate",
            });
        }
        if round.delegate_tx_hash.is_some() {
            debug!("Round {} already delegated", round_id);
            return Ok(round);
        }

        let ix = Instruction::Delegate {
            round: round.solana_address.clone(),
        };
        let tx = self.submit(Layer::Base, &ix).await?;

        let patch = RoundPatch {
            delegate_tx_hash: Some(tx.clone()),
            ..Default::default()
        };
        match self
            .store
            .compare_and_transition(round_id, RoundStatus::Predicting, &patch)
            .await?
        {
            Transition::Applied(round) => {
                info!("Delegated round {} to ephemeral layer (tx={})", round_id, tx);
                Ok(round)
            }
            Transition::Conflict(current) => {
                warn!(
                    "Round {} moved to {} while delegating (tx={})",
                    round_id, current.status, tx
                );
                Err(LifecycleError::InvalidTransition {
                    round_id: round_id.to_string(),
                    from: current.status,
                    action: "delegate",
                })
            }
            Transition::NotFound => Err(LifecycleError::RoundNotFound(round_id.to_string())),
        }
    }

    // ==================== LOCK ====================

    /// Lock a PREDICTING round on whichever layer currently holds it.
    ///
    /// A round already LOCKED or SETTLED is returned unchanged: a duplicate
    /// or late lock is a no-op.
    pub async fn lock_round(&self, round_id: &str) -> Result<Round, LifecycleError> {
        self.with_round_guard(round_id, self.lock_round_inner(round_id)).await
    }

    async fn lock_round_inner(&self, round_id: &str) -> Result<Round, LifecycleError> {
        let round = self.load_round(round_id).await?;
        match round.status {
            RoundStatus::Predicting => {}
            RoundStatus::Locked | RoundStatus::Settled => {
                debug!("Round {} already {}, lock is a no-op", round_id, round.status);
                return Ok(round);
            }
            RoundStatus::Failed => {
                return Err(LifecycleError::InvalidTransition {
                    round_id: round_id.to_string(),
                    from: round.status,
                    action: "lock",
                });
            }
        }

        let delegation = self.delegation_status(&round.solana_address).await?;
        let recorded = round.delegate_tx_hash.is_some();
        if recorded != (delegation == DelegationStatus::Delegated) {
            warn!(
                "Round {} delegation mismatch: recorded={}, live={:?}; locking on live layer",
                round_id, recorded, delegation
            );
        }

        let layer = match delegation {
            DelegationStatus::Delegated => Layer::Ephemeral,
            DelegationStatus::Undelegated => Layer::Base,
        };
        let ix = Instruction::Lock {
            round: round.solana_address.clone(),
            commit_and_undelegate: layer == Layer::Ephemeral,
        };
        let tx = self.submit(layer, &ix).await?;

        let patch = RoundPatch {
            status: Some(RoundStatus::Locked),
            locked_at: Some(self.clock.now_secs().max(round.last_activity_at())),
            lock_tx_hash: Some(tx.clone()),
            lock_layer: Some(layer),
            ..Default::default()
        };

        match self
            .store
            .compare_and_transition(round_id, RoundStatus::Predicting, &patch)
            .await?
        {
            Transition::Applied(round) => {
                info!("Locked round {} on {} layer (tx={})", round_id, layer, tx);
                Ok(round)
            }
            Transition::Conflict(current) => match current.status {
                RoundStatus::Locked | RoundStatus::Settled => {
                    warn!(
                        "Round {} was locked by another worker; discarding tx {}",
                        round_id, tx
                    );
                    Ok(current)
                }
                status => {
                    error!(
                        "Round {} became {} while lock tx {} was in flight",
                        round_id, status, tx
                    );
                    Err(LifecycleError::InvalidTransition {
                        round_id: round_id.to_string(),
                        from: status,
                        action: "lock",
                    })
                }
            },
            Transition::NotFound => Err(LifecycleError::RoundNotFound(round_id.to_string())),
        }
    }

    // ==================== SETTLE ====================

    /// Settle a LOCKED round with an attested outcome.
    ///
    /// The attestation is verified before anything else happens; a round with
    /// a bad attestation stays LOCKED.
    pub async fn settle_round(
        &self,
        round_id: &str,
        outcome: RoundOutcome,
        attestation: &Attestation,
    ) -> Result<Round, LifecycleError> {
        self.with_round_guard(
            round_id,
            self.settle_round_inner(round_id, outcome, attestation),
        )
        .await
    }

    async fn settle_round_inner(
        &self,
        round_id: &str,
        outcome: RoundOutcome,
        attestation: &Attestation,
    ) -> Result<Round, LifecycleError> {
        let round = self.load_round(round_id).await?;
        match round.status {
            RoundStatus::Locked => {}
            RoundStatus::Settled if round.outcome.as_ref() == Some(&outcome) => {
                debug!("Round {} already settled with this outcome", round_id);
                return Ok(round);
            }
            status => {
                return Err(LifecycleError::InvalidTransition {
                    round_id: round_id.to_string(),
                    from: status,
                    action: "settle",
                });
            }
        }

        let digest = self
            .verifier
            .verify(round_id, &outcome, attestation)
            .map_err(|source| {
                error!("Round {} attestation rejected: {}", round_id, source);
                LifecycleError::AttestationInvalid {
                    round_id: round_id.to_string(),
                    source,
                }
            })?;

        let market = self
            .store
            .get_market(&round.market_id)
            .await?
            .ok_or_else(|| LifecycleError::MarketNotFound(round.market_id.clone()))?;
        market
            .config
            .validate_outcome(&outcome)
            .map_err(|reason| LifecycleError::InvalidOutcome {
                round_id: round_id.to_string(),
                reason,
            })?;

        let ix = Instruction::Settle {
            round: round.solana_address.clone(),
            outcome: outcome.clone(),
            attestation_digest: hex::encode(digest),
        };
        let tx = self.submit(Layer::Base, &ix).await?;

        let now = self.clock.now_secs();
        let locked_at = round.locked_at.unwrap_or(round.opened_at);
        let settled_at = now.max(locked_at);
        let revealed_at = attestation.issued_at.clamp(locked_at, settled_at);

        let patch = RoundPatch {
            status: Some(RoundStatus::Settled),
            revealed_at: Some(revealed_at),
            settled_at: Some(settled_at),
            settle_tx_hash: Some(tx.clone()),
            outcome: Some(outcome),
            ..Default::default()
        };

        match self
            .store
            .compare_and_transition(round_id, RoundStatus::Locked, &patch)
            .await?
        {
            Transition::Applied(round) => {
                info!("Settled round {} (tx={})", round_id, tx);
                Ok(round)
            }
            Transition::Conflict(current) => {
                error!(
                    "Round {} became {} while settle tx {} was in flight",
                    round_id, current.status, tx
                );
                Err(LifecycleError::InvalidTransition {
                    round_id: round_id.to_string(),
                    from: current.status,
                    action: "settle",
                })
            }
            Transition::NotFound => Err(LifecycleError::RoundNotFound(round_id.to_string())),
        }
    }

    // ==================== FAIL ====================

    /// Force a PREDICTING or LOCKED round to FAILED. Failing a FAILED round
    /// is a no-op.
    pub async fn fail_round(&self, round_id: &str, reason: &str) -> Result<Round, LifecycleError> {
        self.with_round_guard(round_id, self.fail_round_inner(round_id, None, reason)).await
    }

    /// Fail a round only while it is still in `from`.
    ///
    /// A round that has moved on (for example a lock that landed while this
    /// call waited for the round) is returned unchanged.
    pub async fn fail_round_from(
        &self,
        round_id: &str,
        from: RoundStatus,
        reason: &str,
    ) -> Result<Round, LifecycleError> {
        self.with_round_guard(round_id, self.fail_round_inner(round_id, Some(from), reason))
            .await
    }

    async fn fail_round_inner(
        &self,
        round_id: &str,
        from: Option<RoundStatus>,
        reason: &str,
    ) -> Result<Round, LifecycleError> {
        let mut round = self.load_round(round_id).await?;

        for _ in 0..FAIL_CONFLICT_RETRIES {
            match round.status {
                RoundStatus::Failed => {
                    debug!("Round {} already failed", round_id);
                    return Ok(round);
                }
                status if from.is_some_and(|from| from != status) => {
                    debug!(
                        "Round {} is {}, not failing it (reason={})",
                        round_id, status, reason
                    );
                    return Ok(round);
                }
                RoundStatus::Settled => {
                    return Err(LifecycleError::InvalidTransition {
                        round_id: round_id.to_string(),
                        from: round.status,
                        action: "fail",
                    });
                }
                RoundStatus::Predicting | RoundStatus::Locked => {}
            }

            let patch = RoundPatch {
                status: Some(RoundStatus::Failed),
                failed_at: Some(self.clock.now_secs().max(round.last_activity_at())),
                failure_reason: Some(reason.to_string()),
                ..Default::default()
            };

            match self
                .store
                .compare_and_transition(round_id, round.status, &patch)
                .await?
            {
                Transition::Applied(failed) => {
                    warn!(
                        "Failed round {} from {} (reason={})",
                        round_id, round.status, reason
                    );
                    return Ok(failed);
                }
                Transition::Conflict(current) => round = current,
                Transition::NotFound => {
                    return Err(LifecycleError::RoundNotFound(round_id.to_string()))
                }
            }
        }

        Err(LifecycleError::InvalidTransition {
            round_id: round_id.to_string(),
            from: round.status,
            action: "fail",
        })
    }

    // ==================== HELPERS ====================

    /// Live delegation status of a round account, bounded by the RPC timeout.
    pub async fn delegation_status(
        &self,
        address: &str,
    ) -> Result<DelegationStatus, ExecutionError> {
        self.bounded(
            Layer::Base,
            execution::delegation_status(self.execution.as_ref(), address),
        )
        .await
    }

    async fn load_round(&self, round_id: &str) -> Result<Round, LifecycleError> {
        self.store
            .get(round_id)
            .await?
            .ok_or_else(|| LifecycleError::RoundNotFound(round_id.to_string()))
    }

    async fn submit(&self, layer: Layer, ix: &Instruction) -> Result<String, ExecutionError> {
        self.bounded(layer, self.execution.submit_transaction(layer, ix))
            .await
    }

    async fn bounded<T>(
        &self,
        layer: Layer,
        call: impl Future<Output = Result<T, ExecutionError>>,
    ) -> Result<T, ExecutionError> {
        match tokio::time::timeout(self.rpc_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout {
                layer,
                timeout_ms: self.rpc_timeout.as_millis() as u64,
            }),
        }
    }

    /// Run `op` while holding the in-process guard for `round_id`.
    async fn with_round_guard<T>(
        &self,
        round_id: &str,
        op: impl Future<Output = Result<T, LifecycleError>>,
    ) -> Result<T, LifecycleError> {
        let guard = {
            let mut guards = self.round_guards.lock().await;
            Arc::clone(guards.entry(round_id.to_string()).or_default())
        };

        let result = {
            let _held = guard.lock().await;
            op.await
        };

        drop(guard);
        let mut guards = self.round_guards.lock().await;
        if let Some(entry) = guards.get(round_id) {
            if Arc::strong_count(entry) == 1 {
                guards.remove(round_id);
            }
        }

        result
    }
}
