pub mod mock;
pub mod rpc;
pub mod variant;

pub use mock::MockExecutionLayer;
pub use rpc::RpcExecutionLayer;
pub use variant::ExecutionLayerVariant;

use sha2::{Digest, Sha256};

use crate::error::ExecutionError;
use crate::traits::ExecutionLayer;
use crate::types::{AccountInfo, DelegationStatus, Layer};

/// Deterministic round account address: hex sha256 over the owning program
/// and the round id.
pub fn derive_round_address(program_id: &str, round_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(program_id.as_bytes());
    hasher.update(b"round");
    hasher.update(round_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Classify a round account from what both layers report.
pub fn classify_delegation(
    address: &str,
    delegation_program_id: &str,
    base: Option<AccountInfo>,
    ephemeral: Option<AccountInfo>,
) -> Result<DelegationStatus, ExecutionError> {
    let Some(base) = base else {
        return Err(ExecutionError::AccountUnreadable {
            address: address.to_string(),
            reason: "account missing on base layer".to_string(),
        });
    };

    if base.owner != delegation_program_id {
        return Ok(DelegationStatus::Undelegated);
    }

    match ephemeral {
        Some(_) => Ok(DelegationStatus::Delegated),
        None => Err(ExecutionError::AccountUnreadable {
            address: address.to_string(),
            reason: "delegated on base layer but not yet visible on ephemeral layer".to_string(),
        }),
    }
}

/// Query both layers concurrently and classify the account.
pub async fn delegation_status<E: ExecutionLayer + ?Sized>(
    client: &E,
    address: &str,
) -> Result<DelegationStatus, ExecutionError> {
    let (base, ephemeral) = tokio::join!(
        client.get_account(Layer::Base, address),
        client.get_account(Layer::Ephemeral, address)
    );
    classify_delegation(address, client.delegation_program_id(), base?, ephemeral?)
}
