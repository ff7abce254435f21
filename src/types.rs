use std::fmt;

use serde::{Deserialize, Serialize};

/// Round identifier (UUID v4, hyphenated).
pub type RoundId = String;
pub type MarketId = String;

/// Lifecycle status of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Predicting,
    Locked,
    Settled,
    Failed,
}

impl RoundStatus {
    /// Whether the lifecycle graph has an edge from `self` to `next`.
    pub fn can_transition_to(self, next: RoundStatus) -> bool {
        matches!(
            (self, next),
            (RoundStatus::Predicting, RoundStatus::Locked)
                | (RoundStatus::Locked, RoundStatus::Settled)
                | (RoundStatus::Predicting, RoundStatus::Failed)
                | (RoundStatus::Locked, RoundStatus::Failed)
        )
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundStatus::Predicting => "PREDICTING",
            RoundStatus::Locked => "LOCKED",
            RoundStatus::Settled => "SETTLED",
            RoundStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Execution layer a round account may live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Base,
    Ephemeral,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Base => f.write_str("base"),
            Layer::Ephemeral => f.write_str("ephemeral"),
        }
    }
}

/// The ten game types a market can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    CoinFlip,
    DiceRoll,
    HighLow,
    Roulette,
    ColorWheel,
    NumberPick,
    OverUnder,
    Crash,
    Lottery,
    RockPaperScissors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Rock,
    Paper,
    Scissors,
}

/// Per-game market configuration. The `type` tag selects the game; unknown
/// tags fail to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarketConfig {
    CoinFlip,
    DiceRoll { dice: u8 },
    HighLow { pivot: u16, max: u16 },
    Roulette { double_zero: bool },
    ColorWheel { segments: u8 },
    NumberPick { min: u32, max: u32 },
    OverUnder { line: u32, max: u32 },
    Crash { max_multiplier_bps: u32 },
    Lottery { picks: u8, pool: u8 },
    RockPaperScissors,
}

/// Verified random result of a round, shaped per game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoundOutcome {
    CoinFlip { heads: bool },
    DiceRoll { total: u16 },
    HighLow { value: u16 },
    Roulette { pocket: u8 },
    ColorWheel { segment: u8 },
    NumberPick { number: u32 },
    OverUnder { value: u32 },
    Crash { multiplier_bps: u32 },
    Lottery { numbers: Vec<u8> },
    RockPaperScissors { hand: Hand },
}

impl RoundOutcome {
    pub fn market_type(&self) -> MarketType {
        match self {
            RoundOutcome::CoinFlip { .. } => MarketType::CoinFlip,
            RoundOutcome::DiceRoll { .. } => MarketType::DiceRoll,
            RoundOutcome::HighLow { .. } => MarketType::HighLow,
            RoundOutcome::Roulette { .. } => MarketType::Roulette,
            RoundOutcome::ColorWheel { .. } => MarketType::ColorWheel,
            RoundOutcome::NumberPick { .. } => MarketType::NumberPick,
            RoundOutcome::OverUnder { .. } => MarketType::OverUnder,
            RoundOutcome::Crash { .. } => MarketType::Crash,
            RoundOutcome::Lottery { .. } => MarketType::Lottery,
            RoundOutcome::RockPaperScissors { .. } => MarketType::RockPaperScissors,
        }
    }
}

impl MarketConfig {
    pub fn market_type(&self) -> MarketType {
        match self {
            MarketConfig::CoinFlip => MarketType::CoinFlip,
            MarketConfig::DiceRoll { .. } => MarketType::DiceRoll,
            MarketConfig::HighLow { .. } => MarketType::HighLow,
            MarketConfig::Roulette { .. } => MarketType::Roulette,
            MarketConfig::ColorWheel { .. } => MarketType::ColorWheel,
            MarketConfig::NumberPick { .. } => MarketType::NumberPick,
            MarketConfig::OverUnder { .. } => MarketType::OverUnder,
            MarketConfig::Crash { .. } => MarketType::Crash,
            MarketConfig::Lottery { .. } => MarketType::Lottery,
            MarketConfig::RockPaperScissors => MarketType::RockPaperScissors,
        }
    }

    /// Check that `outcome` belongs to this game and lies in its range.
    pub fn validate_outcome(&self, outcome: &RoundOutcome) -> Result<(), String> {
        if outcome.market_type() != self.market_type() {
            return Err(format!(
                "outcome for {:?} does not match market type {:?}",
                outcome.market_type(),
                self.market_type()
            ));
        }

        let in_range = match (self, outcome) {
            (MarketConfig::DiceRoll { dice }, RoundOutcome::DiceRoll { total }) => {
                let dice = u16::from(*dice);
                dice > 0 && (dice..=dice * 6).contains(total)
            }
            (MarketConfig::HighLow { max, .. }, RoundOutcome::HighLow { value }) => value <= max,
            (MarketConfig::Roulette { double_zero }, RoundOutcome::Roulette { pocket }) => {
                let last = if *double_zero { 37 } else { 36 };
                *pocket <= last
            }
            (MarketConfig::ColorWheel { segments }, RoundOutcome::ColorWheel { segment }) => {
                segment < segments
            }
            (MarketConfig::NumberPick { min, max }, RoundOutcome::NumberPick { number }) => {
                (*min..=*max).contains(number)
            }
            (MarketConfig::OverUnder { max, .. }, RoundOutcome::OverUnder { value }) => {
                value <= max
            }
            (
                MarketConfig::Crash { max_multiplier_bps },
                RoundOutcome::Crash { multiplier_bps },
            ) => (10_000..=*max_multiplier_bps).contains(multiplier_bps),
            (MarketConfig::Lottery { picks, pool }, RoundOutcome::Lottery { numbers }) => {
                let mut sorted = numbers.clone();
                sorted.sort_unstable();
                sorted.dedup();
                numbers.len() == usize::from(*picks)
                    && sorted.len() == numbers.len()
                    && numbers.iter().all(|n| (1..=*pool).contains(n))
            }
            _ => true,
        };

        if in_range {
            Ok(())
        } else {
            Err(format!("outcome {:?} out of range for {:?}", outcome, self))
        }
    }
}

/// A market owning a sequence of rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub config: MarketConfig,
    /// Gates whether new rounds are opened for this market.
    pub is_active: bool,
}

/// One timed prediction cycle of a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub market_id: MarketId,
    pub round_number: u64,
    pub status: RoundStatus,

    /// UTC unix timestamps in seconds.
    pub opened_at: u64,
    pub queued_at: Option<u64>,
    pub scheduled_release_at: Option<u64>,
    pub locked_at: Option<u64>,
    pub revealed_at: Option<u64>,
    pub settled_at: Option<u64>,
    pub failed_at: Option<u64>,

    /// On-chain account identifying this round.
    pub solana_address: String,
    /// Present iff the round account was delegated to the ephemeral layer.
    pub delegate_tx_hash: Option<String>,
    pub lock_tx_hash: Option<String>,
    pub lock_layer: Option<Layer>,
    pub settle_tx_hash: Option<String>,

    pub outcome: Option<RoundOutcome>,
    pub failure_reason: Option<String>,
}

impl Round {
    /// Latest lifecycle timestamp recorded on this round.
    pub fn last_activity_at(&self) -> u64 {
        [
            Some(self.opened_at),
            self.queued_at,
            self.locked_at,
            self.revealed_at,
            self.settled_at,
            self.failed_at,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(self.opened_at)
    }

    /// Lock job id used as the queue dedup key.
    pub fn lock_job_id(&self) -> String {
        lock_job_id(&self.id)
    }
}

pub fn lock_job_id(round_id: &str) -> String {
    format!("lock-{}", round_id)
}

/// Fields supplied when a round is first persisted. The store assigns the
/// round number.
#[derive(Debug, Clone)]
pub struct NewRound {
    pub id: RoundId,
    pub market_id: MarketId,
    pub solana_address: String,
    pub opened_at: u64,
    pub queued_at: Option<u64>,
    pub scheduled_release_at: Option<u64>,
}

impl NewRound {
    pub fn into_round(self, round_number: u64) -> Round {
        Round {
            id: self.id,
            market_id: self.market_id,
            round_number,
            status: RoundStatus::Predicting,
            opened_at: self.opened_at,
            queued_at: self.queued_at,
            scheduled_release_at: self.scheduled_release_at,
            locked_at: None,
            revealed_at: None,
            settled_at: None,
            failed_at: None,
            solana_address: self.solana_address,
            delegate_tx_hash: None,
            lock_tx_hash: None,
            lock_layer: None,
            settle_tx_hash: None,
            outcome: None,
            failure_reason: None,
        }
    }
}

/// Field updates applied together with a status check.
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct RoundPatch {
    pub status: Option<RoundStatus>,
    pub locked_at: Option<u64>,
    pub revealed_at: Option<u64>,
    pub settled_at: Option<u64>,
    pub failed_at: Option<u64>,
    pub delegate_tx_hash: Option<String>,
    pub lock_tx_hash: Option<String>,
    pub lock_layer: Option<Layer>,
    pub settle_tx_hash: Option<String>,
    pub outcome: Option<RoundOutcome>,
    pub failure_reason: Option<String>,
}

impl RoundPatch {
    pub fn apply(&self, round: &mut Round) {
        if let Some(status) = self.status {
            round.status = status;
        }
        // Lifecycle timestamps are write-once.
        round.locked_at = round.locked_at.or(self.locked_at);
        round.revealed_at = round.revealed_at.or(self.revealed_at);
        round.settled_at = round.settled_at.or(self.settled_at);
        round.failed_at = round.failed_at.or(self.failed_at);

        if let Some(hash) = &self.delegate_tx_hash {
            round.delegate_tx_hash = Some(hash.clone());
        }
        if let Some(hash) = &self.lock_tx_hash {
            round.lock_tx_hash = Some(hash.clone());
        }
        if let Some(layer) = self.lock_layer {
            round.lock_layer = Some(layer);
        }
        if let Some(hash) = &self.settle_tx_hash {
            round.settle_tx_hash = Some(hash.clone());
        }
        if let Some(outcome) = &self.outcome {
            round.outcome = Some(outcome.clone());
        }
        if let Some(reason) = &self.failure_reason {
            round.failure_reason = Some(reason.clone());
        }
    }
}

/// Result of a compare-and-transition against the round store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Status matched and the patch was written; carries the new round.
    Applied(Round),
    /// Status did not match; carries the round as currently stored.
    Conflict(Round),
    NotFound,
}

/// Account state as reported by an execution layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Program owning the account.
    pub owner: String,
    pub lamports: u64,
}

/// Where a round account currently has authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationStatus {
    /// Owned by the delegation program and mirrored on the ephemeral layer.
    Delegated,
    Undelegated,
}

/// Program instructions the orchestrator submits. Encoding and signing
/// belong to the execution layer client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    InitializeRound {
        round: String,
        round_id: RoundId,
        market_id: MarketId,
    },
    Delegate {
        round: String,
    },
    Lock {
        round: String,
        /// Commit state back and return the account to the base layer.
        commit_and_undelegate: bool,
    },
    Settle {
        round: String,
        outcome: RoundOutcome,
        /// Hex sha256 digest the attestation signature covers.
        attestation_digest: String,
    },
}

/// Signed proof binding an outcome to its randomness source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Randomness source reference (e.g. VRF request id).
    pub source: String,
    /// UTC unix seconds when the oracle signed the outcome.
    pub issued_at: u64,
    /// Hex encoded 64-byte ed25519 signature.
    pub signature: String,
}

/// Queue-side state of a lock job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    /// Pending or running; a new job with the same id must not be admitted.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobState::Waiting | JobState::Active | JobState::Delayed)
    }
}

/// Payload carried by a lock job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockJob {
    pub job_id: String,
    pub round_id: RoundId,
}

impl LockJob {
    pub fn for_round(round_id: &str) -> Self {
        Self {
            job_id: lock_job_id(round_id),
            round_id: round_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_graph() {
        use RoundStatus::*;
        assert!(Predicting.can_transition_to(Locked));
        assert!(Locked.can_transition_to(Settled));
        assert!(Predicting.can_transition_to(Failed));
        assert!(Locked.can_transition_to(Failed));

        assert!(!Predicting.can_transition_to(Settled));
        assert!(!Settled.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Locked));
        assert!(!Locked.can_transition_to(Predicting));
    }

    #[test]
    fn test_unknown_market_tag_rejected() {
        let raw = r#"{"type":"Blackjack","decks":6}"#;
        assert!(serde_json::from_str::<MarketConfig>(raw).is_err());

        let raw = r#"{"type":"DiceRoll","dice":2}"#;
        let config: MarketConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config, MarketConfig::DiceRoll { dice: 2 });
    }

    #[test]
    fn test_unknown_outcome_tag_rejected() {
        let raw = r#"{"type":"Slots","reels":[1,2,3]}"#;
        assert!(serde_json::from_str::<RoundOutcome>(raw).is_err());
    }

    #[test]
    fn test_validate_outcome_type_mismatch() {
        let config = MarketConfig::DiceRoll { dice: 2 };
        let err = config
            .validate_outcome(&RoundOutcome::CoinFlip { heads: true })
            .unwrap_err();
        assert!(err.contains("does not match"));
    }

    #[test]
    fn test_validate_outcome_ranges() {
        let dice = MarketConfig::DiceRoll { dice: 2 };
        assert!(dice.validate_outcome(&RoundOutcome::DiceRoll { total: 7 }).is_ok());
        assert!(dice.validate_outcome(&RoundOutcome::DiceRoll { total: 1 }).is_err());
        assert!(dice.validate_outcome(&RoundOutcome::DiceRoll { total: 13 }).is_err());

        let roulette = MarketConfig::Roulette { double_zero: false };
        assert!(roulette.validate_outcome(&RoundOutcome::Roulette { pocket: 36 }).is_ok());
        assert!(roulette.validate_outcome(&RoundOutcome::Roulette { pocket: 37 }).is_err());

        let lottery = MarketConfig::Lottery { picks: 3, pool: 10 };
        assert!(lottery
            .validate_outcome(&RoundOutcome::Lottery { numbers: vec![1, 5, 10] })
            .is_ok());
        assert!(lottery
            .validate_outcome(&RoundOutcome::Lottery { numbers: vec![1, 1, 10] })
            .is_err());
        assert!(lottery
            .validate_outcome(&RoundOutcome::Lottery { numbers: vec![0, 5, 10] })
            .is_err());

        let rps = MarketConfig::RockPaperScissors;
        assert!(rps
            .validate_outcome(&RoundOutcome::RockPaperScissors { hand: Hand::Paper })
            .is_ok());
    }

    #[test]
    fn test_patch_timestamps_write_once() {
        let mut round = NewRound {
            id: "r1".to_string(),
            market_id: "m1".to_string(),
            solana_address: "addr".to_string(),
            opened_at: 100,
            queued_at: None,
            scheduled_release_at: None,
        }
        .into_round(1);

        let first = RoundPatch {
            status: Some(RoundStatus::Locked),
            locked_at: Some(160),
            ..Default::default()
        };
        first.apply(&mut round);

        let second = RoundPatch {
            locked_at: Some(999),
            ..Default::default()
        };
        second.apply(&mut round);

        assert_eq!(round.status, RoundStatus::Locked);
        assert_eq!(round.locked_at, Some(160));
        assert_eq!(round.last_activity_at(), 160);
    }

    #[test]
    fn test_job_state_in_flight() {
        assert!(JobState::Waiting.is_in_flight());
        assert!(JobState::Active.is_in_flight());
        assert!(JobState::Delayed.is_in_flight());
        assert!(!JobState::Completed.is_in_flight());
        assert!(!JobState::Failed.is_in_flight());
        assert_eq!(LockJob::for_round("abc").job_id, "lock-abc");
    }
}
