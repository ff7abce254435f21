//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use crate::attestation::AttestationSigner;
use crate::clock::ManualClock;
use crate::engine::RoundEngine;
use crate::execution::{ExecutionLayerVariant, MockExecutionLayer};
use crate::round_store::{MemoryRoundStore, RoundStoreVariant};
use crate::traits::RoundStore;
use crate::types::{Attestation, Market, MarketConfig, RoundOutcome};

pub const TEST_START: u64 = 1_700_000_000;

pub fn dice_market(id: &str) -> Market {
    Market {
        id: id.to_string(),
        config: MarketConfig::DiceRoll { dice: 2 },
        is_active: true,
    }
}

pub struct TestHarness {
    pub clock: ManualClock,
    pub store: MemoryRoundStore,
    pub shared_store: Arc<RoundStoreVariant>,
    pub execution: MockExecutionLayer,
    pub engine: Arc<RoundEngine>,
    pub signer: AttestationSigner,
}

impl TestHarness {
    /// Harness with an active dice market "M".
    pub async fn new() -> Self {
        Self::with_timeout(Duration::from_secs(1)).await
    }

    pub async fn with_timeout(rpc_timeout: Duration) -> Self {
        let clock = ManualClock::new(TEST_START);
        let store = MemoryRoundStore::new();
        store
            .put_market(&dice_market("M"))
            .await
            .expect("seed market");
        let execution = MockExecutionLayer::new();
        let signer = AttestationSigner::from_seed([7u8; 32]);

        let shared_store = Arc::new(RoundStoreVariant::Memory(store.clone()));
        let engine = Arc::new(RoundEngine::new(
            Arc::clone(&shared_store),
            Arc::new(ExecutionLayerVariant::Mock(execution.clone())),
            signer.verifier(),
            Arc::new(clock.clone()),
            rpc_timeout,
        ));

        Self {
            clock,
            store,
            shared_store,
            execution,
            engine,
            signer,
        }
    }

    pub fn attest(&self, round_id: &str, outcome: &RoundOutcome, issued_at: u64) -> Attestation {
        self.signer
            .attest(round_id, outcome, "vrf-test", issued_at)
            .expect("sign attestation")
    }

    /// Attestation signed by a key the engine does not trust.
    pub fn forge(&self, round_id: &str, outcome: &RoundOutcome, issued_at: u64) -> Attestation {
        AttestationSigner::from_seed([13u8; 32])
            .attest(round_id, outcome, "vrf-test", issued_at)
            .expect("sign attestation")
    }
}
