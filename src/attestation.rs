//! Outcome attestations: an ed25519 signature by the randomness oracle over
//! a sha256 digest binding round, outcome, source and issue time.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::AttestationError;
use crate::types::{Attestation, RoundOutcome};

const DOMAIN_TAG: &[u8] = b"roundsmith-attestation-v1";

/// Digest covered by the attestation signature.
pub fn attestation_digest(
    round_id: &str,
    outcome: &RoundOutcome,
    source: &str,
    issued_at: u64,
) -> Result<[u8; 32], AttestationError> {
    let outcome_bytes = serde_json::to_vec(outcome)
        .map_err(|e| AttestationError::UnencodableOutcome(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_TAG);
    hasher.update((round_id.len() as u64).to_be_bytes());
    hasher.update(round_id.as_bytes());
    hasher.update((outcome_bytes.len() as u64).to_be_bytes());
    hasher.update(&outcome_bytes);
    hasher.update((source.len() as u64).to_be_bytes());
    hasher.update(source.as_bytes());
    hasher.update(issued_at.to_be_bytes());
    Ok(hasher.finalize().into())
}

/// Verifies attestations against the trusted oracle key.
#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    key: VerifyingKey,
}

impl AttestationVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Build from a hex encoded 32-byte ed25519 public key.
    pub fn from_hex(public_key: &str) -> Result<Self, AttestationError> {
        let bytes =
            hex::decode(public_key).map_err(|e| AttestationError::MalformedKey(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AttestationError::MalformedKey(format!("{} bytes", bytes.len())))?;
        let key = VerifyingKey::from_bytes(&arr)
            .map_err(|e| AttestationError::MalformedKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Check the signature over `outcome` for `round_id`. Runs on every call;
    /// results are never cached.
    pub fn verify(
        &self,
        round_id: &str,
        outcome: &RoundOutcome,
        attestation: &Attestation,
    ) -> Result<[u8; 32], AttestationError> {
        let sig_bytes = hex::decode(&attestation.signature)
            .map_err(|e| AttestationError::MalformedSignature(e.to_string()))?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|e| AttestationError::MalformedSignature(e.to_string()))?;

        let digest =
            attestation_digest(round_id, outcome, &attestation.source, attestation.issued_at)?;

        self.key
            .verify_strict(&digest, &signature)
            .map_err(|_| AttestationError::SignatureMismatch)?;
        Ok(digest)
    }
}

/// Oracle-side signer, used by operator tooling and tests.
pub struct AttestationSigner {
    key: SigningKey,
}

impl AttestationSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    pub fn verifier(&self) -> AttestationVerifier {
        AttestationVerifier::new(self.key.verifying_key())
    }

    pub fn attest(
        &self,
        round_id: &str,
        outcome: &RoundOutcome,
        source: &str,
        issued_at: u64,
    ) -> Result<Attestation, AttestationError> {
        let digest = attestation_digest(round_id, outcome, source, issued_at)?;
        let signature = self.key.sign(&digest);
        Ok(Attestation {
            source: source.to_string(),
            issued_at,
            signature: hex::encode(signature.to_bytes()),
        })
    }
}
