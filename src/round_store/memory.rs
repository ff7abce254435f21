use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::transition_in_place;
use crate::traits::RoundStore;
use crate::types::{Market, NewRound, Round, RoundPatch, RoundStatus, Transition};

#[derive(Default)]
struct MemoryState {
    markets: HashMap<String, Market>,
    rounds: HashMap<String, Round>,
    round_numbers: HashMap<String, u64>,
}

/// In-memory round store. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryRoundStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rounds currently stored.
    pub async fn round_count(&self) -> usize {
        self.state.lock().await.rounds.len()
    }
}

#[async_trait]
impl RoundStore for MemoryRoundStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        Ok(self.state.lock().await.markets.get(market_id).cloned())
    }

    async fn put_market(&self, market: &Market) -> Result<()> {
        self.state
            .lock()
            .await
            .markets
            .insert(market.id.clone(), market.clone());
        Ok(())
    }

    async fn create(&self, new_round: NewRound) -> Result<Round> {
        let mut state = self.state.lock().await;
        if state.rounds.contains_key(&new_round.id) {
            anyhow::bail!("round {} already exists", new_round.id);
        }
        let counter = state
            .round_numbers
            .entry(new_round.market_id.clone())
            .or_insert(0);
        *counter += 1;
        let round = new_round.into_round(*counter);
        state.rounds.insert(round.id.clone(), round.clone());
        Ok(round)
    }

    async fn get(&self, round_id: &str) -> Result<Option<Round>> {
        Ok(self.state.lock().await.rounds.get(round_id).cloned())
    }

    async fn find_due(&self, status: RoundStatus, before: u64) -> Result<Vec<Round>> {
        let state = self.state.lock().await;
        let mut due: Vec<Round> = state
            .rounds
            .values()
            .filter(|r| r.status == status && r.opened_at <= before)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.opened_at);
        Ok(due)
    }

    async fn compare_and_transition(
        &self,
        round_id: &str,
        expected: RoundStatus,
        patch: &RoundPatch,
    ) -> Result<Transition> {
        let mut state = self.state.lock().await;
        match state.rounds.get_mut(round_id) {
            Some(round) => transition_in_place(round, expected, patch),
            None => Ok(Transition::NotFound),
        }
    }

    async fn delete(&self, round_id: &str) -> Result<bool> {
        Ok(self.state.lock().await.rounds.remove(round_id).is_some())
    }
}
