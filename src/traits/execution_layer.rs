use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::types::{AccountInfo, Instruction, Layer};

/// Read account state and submit transactions on the base and ephemeral
/// layers.
///
/// Submissions are not idempotent: callers must re-check round state before
/// retrying one.
#[async_trait]
pub trait ExecutionLayer: Send + Sync {
    /// Client name for logging.
    fn name(&self) -> &'static str;

    /// Program owning round accounts while they live on the base layer.
    fn program_id(&self) -> &str;

    /// Program owning round accounts on the base layer while delegated.
    fn delegation_program_id(&self) -> &str;

    /// Deterministic account address for a round.
    fn round_address(&self, round_id: &str) -> String;

    async fn get_account(
        &self,
        layer: Layer,
        address: &str,
    ) -> Result<Option<AccountInfo>, ExecutionError>;

    /// Submit an instruction, returning the transaction hash.
    async fn submit_transaction(
        &self,
        layer: Layer,
        instruction: &Instruction,
    ) -> Result<String, ExecutionError>;
}
