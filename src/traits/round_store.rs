use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Market, NewRound, Round, RoundPatch, RoundStatus, Transition};

/// Durable record of markets and rounds.
///
/// Implementations must apply `create` and `compare_and_transition` as
/// single atomic read-modify-write units: two racing transitions for the same
/// round can never both observe the expected status.
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Store name for logging.
    fn name(&self) -> &'static str;

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>>;

    /// Insert or replace a market. Used by the market-opening flow.
    async fn put_market(&self, market: &Market) -> Result<()>;

    /// Persist a new PREDICTING round, assigning the next round number for
    /// its market.
    async fn create(&self, new_round: NewRound) -> Result<Round>;

    async fn get(&self, round_id: &str) -> Result<Option<Round>>;

    /// Rounds with `status` whose `opened_at <= before`.
    async fn find_due(&self, status: RoundStatus, before: u64) -> Result<Vec<Round>>;

    async fn list_by_status(&self, status: RoundStatus) -> Result<Vec<Round>> {
        self.find_due(status, u64::MAX).await
    }

    /// Apply `patch` only if the round is currently in `expected`.
    async fn compare_and_transition(
        &self,
        round_id: &str,
        expected: RoundStatus,
        patch: &RoundPatch,
    ) -> Result<Transition>;

    /// Returns true if the round existed.
    async fn delete(&self, round_id: &str) -> Result<bool>;
}
