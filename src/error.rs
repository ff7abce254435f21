use thiserror::Error;

use crate::types::{Layer, RoundStatus};

/// Failures talking to an execution layer. All of them are retryable from
/// the engine's point of view.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{layer} layer call timed out after {timeout_ms}ms")]
    Timeout { layer: Layer, timeout_ms: u64 },

    #[error("transaction rejected on {layer} layer: {reason}")]
    Rejected { layer: Layer, reason: String },

    #[error("account {address} unreadable: {reason}")]
    AccountUnreadable { address: String, reason: String },

    #[error("{layer} layer transport error: {message}")]
    Transport { layer: Layer, message: String },
}

#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("malformed attestation key: {0}")]
    MalformedKey(String),

    #[error("malformed attestation signature: {0}")]
    MalformedSignature(String),

    #[error("attestation signature does not verify")]
    SignatureMismatch,

    #[error("outcome cannot be encoded for attestation: {0}")]
    UnencodableOutcome(String),
}

/// Errors surfaced by the round lifecycle engine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("market {0} not found")]
    MarketNotFound(String),

    #[error("market {0} is inactive")]
    MarketInactive(String),

    #[error("round {0} not found")]
    RoundNotFound(String),

    #[error("round {round_id} cannot {action} from {from}")]
    InvalidTransition {
        round_id: String,
        from: RoundStatus,
        action: &'static str,
    },

    #[error("round {round_id} outcome rejected: {reason}")]
    InvalidOutcome { round_id: String, reason: String },

    #[error("execution layer error: {0}")]
    ExecutionLayer(#[from] ExecutionError),

    #[error("round {round_id} attestation invalid: {source}")]
    AttestationInvalid {
        round_id: String,
        #[source]
        source: AttestationError,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl LifecycleError {
    /// Whether a later attempt of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::ExecutionLayer(_) | LifecycleError::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let timeout = LifecycleError::ExecutionLayer(ExecutionError::Timeout {
            layer: Layer::Base,
            timeout_ms: 10,
        });
        assert!(timeout.is_retryable());

        let forged = LifecycleError::AttestationInvalid {
            round_id: "r1".to_string(),
            source: AttestationError::SignatureMismatch,
        };
        assert!(!forged.is_retryable());

        let invalid = LifecycleError::InvalidTransition {
            round_id: "r1".to_string(),
            from: RoundStatus::Failed,
            action: "lock",
        };
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.to_string(), "round r1 cannot lock from FAILED");
    }

    #[test]
    fn test_outcome_encoding_error_is_not_a_signature_error() {
        let err = AttestationError::UnencodableOutcome("bad float".to_string());
        assert_eq!(
            err.to_string(),
            "outcome cannot be encoded for attestation: bad float"
        );
        assert!(!matches!(err, AttestationError::MalformedSignature(_)));
    }
}
