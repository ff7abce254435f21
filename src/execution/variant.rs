use async_trait::async_trait;

use super::{mock::MockExecutionLayer, rpc::RpcExecutionLayer};
use crate::config::{BaseConfig, ExecutionType};
use crate::error::ExecutionError;
use crate::traits::ExecutionLayer;
use crate::types::{AccountInfo, Instruction, Layer};

/// Enum representing all execution layer client implementations.
pub enum ExecutionLayerVariant {
    Rpc(RpcExecutionLayer),
    Mock(MockExecutionLayer),
}

impl ExecutionLayerVariant {
    /// Create the client selected by the configuration.
    pub fn new(config: &BaseConfig) -> Self {
        match config.execution_type {
            ExecutionType::Rpc => ExecutionLayerVariant::Rpc(RpcExecutionLayer::new(
                config.base_rpc_url.clone(),
                config.ephemeral_rpc_url.clone(),
                config.program_id.clone(),
                config.delegation_program_id.clone(),
            )),
            ExecutionType::Mock => ExecutionLayerVariant::Mock(MockExecutionLayer::new()),
        }
    }
}

#[async_trait]
impl ExecutionLayer for ExecutionLayerVariant {
    fn name(&self) -> &'static str {
        match self {
            ExecutionLayerVariant::Rpc(inner) => inner.name(),
            ExecutionLayerVariant::Mock(inner) => inner.name(),
        }
    }

    fn program_id(&self) -> &str {
        match self {
            ExecutionLayerVariant::Rpc(inner) => inner.program_id(),
            ExecutionLayerVariant::Mock(inner) => inner.program_id(),
        }
    }

    fn delegation_program_id(&self) -> &str {
        match self {
            ExecutionLayerVariant::Rpc(inner) => inner.delegation_program_id(),
            ExecutionLayerVariant::Mock(inner) => inner.delegation_program_id(),
        }
    }

    fn round_address(&self, round_id: &str) -> String {
        match self {
            ExecutionLayerVariant::Rpc(inner) => inner.round_address(round_id),
            ExecutionLayerVariant::Mock(inner) => inner.round_address(round_id),
        }
    }

    async fn get_account(
        &self,
        layer: Layer,
        address: &str,
    ) -> Result<Option<AccountInfo>, ExecutionError> {
        match self {
            ExecutionLayerVariant::Rpc(inner) => inner.get_account(layer, address).await,
            ExecutionLayerVariant::Mock(inner) => inner.get_account(layer, address).await,
        }
    }

    async fn submit_transaction(
        &self,
        layer: Layer,
        instruction: &Instruction,
    ) -> Result<String, ExecutionError> {
        match self {
            ExecutionLayerVariant::Rpc(inner) => inner.submit_transaction(layer, instruction).await,
            ExecutionLayerVariant::Mock(inner) => {
                inner.submit_transaction(layer, instruction).await
            }
        }
    }
}
