pub mod memory;
pub mod rocks;
pub mod variant;

pub use memory::MemoryRoundStore;
pub use rocks::RocksDbRoundStore;
pub use variant::RoundStoreVariant;

use anyhow::{bail, Result};

use crate::types::{Round, RoundPatch, RoundStatus, Transition};

/// Status-checked patch application shared by the store backends. The
/// caller must hold the backend's write lock.
///
/// A patch that moves the status along an edge the lifecycle graph does not
/// have is an error and leaves the round untouched.
pub(crate) fn transition_in_place(
    round: &mut Round,
    expected: RoundStatus,
    patch: &RoundPatch,
) -> Result<Transition> {
    if round.status != expected {
        return Ok(Transition::Conflict(round.clone()));
    }
    if let Some(next) = patch.status {
        if next != expected && !expected.can_transition_to(next) {
            bail!(
                "illegal transition for round {}: {} -> {}",
                round.id,
                expected,
                next
            );
        }
    }
    patch.apply(round);
    Ok(Transition::Applied(round.clone()))
}
