//! Core Orchestrator struct and initialization - no business logic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::attestation::AttestationVerifier;
use crate::clock::{Clock, SystemClock};
use crate::config::BaseConfig;
use crate::engine::RoundEngine;
use crate::execution::ExecutionLayerVariant;
use crate::queue::{LockQueue, QueueSettings};
use crate::round_store::RoundStoreVariant;
use crate::traits::{ExecutionLayer, RoundStore};

/// Wires the round store, execution layers, engine and lock queue together.
pub struct Orchestrator {
    /// Global/base configuration.
    pub config: BaseConfig,

    /// Canonical round store.
    pub store: Arc<RoundStoreVariant>,

    /// Lifecycle engine shared by workers and sweeps.
    pub engine: Arc<RoundEngine>,

    /// Lock job queue fed by the auto-lock tick.
    pub queue: Arc<LockQueue>,

    pub clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        config: BaseConfig,
        store: RoundStoreVariant,
        execution: ExecutionLayerVariant,
        verifier: AttestationVerifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(store);
        let engine = Arc::new(RoundEngine::new(
            Arc::clone(&store),
            Arc::new(execution),
            verifier,
            Arc::clone(&clock),
            Duration::from_millis(config.rpc_timeout_ms),
        ));
        let queue = Arc::new(LockQueue::new(QueueSettings::from_config(&config)));

        Self {
            config,
            store,
            engine,
            queue,
            clock,
        }
    }

    /// Build the backends selected by `config`, using the system clock.
    pub fn initialize(config: BaseConfig) -> Result<Self> {
        let verifier = AttestationVerifier::from_hex(&config.attestation_pubkey)
            .context("invalid --attestation-pubkey")?;

        let store = RoundStoreVariant::open(&config)?;
        info!("Round store opened: {} ({})", store.name(), config.storage_path);

        let execution = ExecutionLayerVariant::new(&config);
        info!("Execution layer client: {}", execution.name());

        Ok(Self::new(
            config,
            store,
            execution,
            verifier,
            Arc::new(SystemClock),
        ))
    }
}
