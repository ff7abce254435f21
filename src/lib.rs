// Library exports for testing and external use

pub mod attestation;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod queue;
pub mod round_store;
pub mod shutdown;
pub mod telemetry;
pub mod traits;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export commonly used types and traits
pub use attestation::{AttestationSigner, AttestationVerifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BaseConfig, ExecutionType, StoreType};
pub use engine::RoundEngine;
pub use error::{AttestationError, ExecutionError, LifecycleError};
pub use orchestrator::Orchestrator;
pub use queue::{LockQueue, QueueSettings};
pub use traits::{ExecutionLayer, JobQueue, RoundStore};
pub use types::{
    Attestation, DelegationStatus, Instruction, JobState, Layer, LockJob, Market, MarketConfig,
    MarketType, NewRound, Round, RoundOutcome, RoundPatch, RoundStatus, Transition,
};

// Re-export variant enums for convenience
pub use execution::{ExecutionLayerVariant, MockExecutionLayer, RpcExecutionLayer};
pub use round_store::{MemoryRoundStore, RocksDbRoundStore, RoundStoreVariant};
