use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::derive_round_address;
use crate::error::ExecutionError;
use crate::traits::ExecutionLayer;
use crate::types::{AccountInfo, Instruction, Layer};

pub const MOCK_PROGRAM_ID: &str = "mock-round-program";
pub const MOCK_DELEGATION_PROGRAM_ID: &str = "mock-delegation-program";

#[derive(Default)]
struct MockState {
    base: HashMap<String, AccountInfo>,
    ephemeral: HashMap<String, AccountInfo>,
    submissions: Vec<(Layer, Instruction)>,
    reject_submissions: usize,
    delay: Option<Duration>,
    next_tx: u64,
}

/// In-memory execution layers for testing.
///
/// Submitted instructions mutate the simulated accounts the way the real
/// program would: initialize creates the base account, delegate hands it to
/// the delegation program and mirrors it on the ephemeral layer, and an
/// ephemeral commit-and-undelegate lock hands it back.
#[derive(Clone, Default)]
pub struct MockExecutionLayer {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All submitted instructions, in order.
    pub fn submissions(&self) -> Vec<(Layer, Instruction)> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Number of submitted lock instructions.
    pub fn lock_count(&self) -> usize {
        self.submissions()
            .iter()
            .filter(|(_, ix)| matches!(ix, Instruction::Lock { .. }))
            .count()
    }

    /// Reject the next `n` submissions.
    pub fn reject_next(&self, n: usize) {
        self.state.lock().unwrap().reject_submissions = n;
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn set_account(&self, layer: Layer, address: &str, account: Option<AccountInfo>) {
        let mut state = self.state.lock().unwrap();
        let accounts = match layer {
            Layer::Base => &mut state.base,
            Layer::Ephemeral => &mut state.ephemeral,
        };
        match account {
            Some(account) => {
                accounts.insert(address.to_string(), account);
            }
            None => {
                accounts.remove(address);
            }
        }
    }

    async fn maybe_delay(&self) {
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn owned_by(owner: &str) -> AccountInfo {
        AccountInfo {
            owner: owner.to_string(),
            lamports: 1_000_000,
        }
    }
}

#[async_trait]
impl ExecutionLayer for MockExecutionLayer {
    fn name(&self) -> &'static str {
        "mock-execution"
    }

    fn program_id(&self) -> &str {
        MOCK_PROGRAM_ID
    }

    fn delegation_program_id(&self) -> &str {
        MOCK_DELEGATION_PROGRAM_ID
    }

    fn round_address(&self, round_id: &str) -> String {
        derive_round_address(MOCK_PROGRAM_ID, round_id)
    }

    async fn get_account(
        &self,
        layer: Layer,
        address: &str,
    ) -> Result<Option<AccountInfo>, ExecutionError> {
        self.maybe_delay().await;
        let state = self.state.lock().unwrap();
        let accounts = match layer {
            Layer::Base => &state.base,
            Layer::Ephemeral => &state.ephemeral,
        };
        Ok(accounts.get(address).cloned())
    }

    async fn submit_transaction(
        &self,
        layer: Layer,
        instruction: &Instruction,
    ) -> Result<String, ExecutionError> {
        self.maybe_delay().await;
        let mut state = self.state.lock().unwrap();

        if state.reject_submissions > 0 {
            state.reject_submissions -= 1;
            return Err(ExecutionError::Rejected {
                layer,
                reason: "mock rejection".to_string(),
            });
        }

        match (layer, instruction) {
            (Layer::Base, Instruction::InitializeRound { round, .. }) => {
                state.base.insert(round.clone(), Self::owned_by(MOCK_PROGRAM_ID));
            }
            (Layer::Base, Instruction::Delegate { round }) => {
                state
                    .base
                    .insert(round.clone(), Self::owned_by(MOCK_DELEGATION_PROGRAM_ID));
                state
                    .ephemeral
                    .insert(round.clone(), Self::owned_by(MOCK_PROGRAM_ID));
            }
            (
                Layer::Ephemeral,
                Instruction::Lock {
                    round,
                    commit_and_undelegate: true,
                },
            ) => {
                state.ephemeral.remove(round);
                state.base.insert(round.clone(), Self::owned_by(MOCK_PROGRAM_ID));
            }
            _ => {}
        }

        state.submissions.push((layer, instruction.clone()));
        state.next_tx += 1;
        Ok(format!("mock-tx-{}", state.next_tx))
    }
}
