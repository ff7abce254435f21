use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use super::transition_in_place;
use crate::traits::RoundStore;
use crate::types::{Market, NewRound, Round, RoundPatch, RoundStatus, Transition};

const MARKET_PREFIX: &[u8] = b"market/";
const ROUND_PREFIX: &[u8] = b"round/";
const SEQ_PREFIX: &[u8] = b"seq/";

/// RocksDB-backed round store.
///
/// Rounds and markets are stored as JSON under prefixed keys. All writes go
/// through `write_lock`, which makes each read-modify-write atomic within the
/// process.
pub struct RocksDbRoundStore {
    db: Arc<DB>,
    write_lock: Mutex<()>,
}

impl RocksDbRoundStore {
    pub fn open(path: &str) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).with_context(|| format!("open rocksdb at {}", path))?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn encode_key(prefix: &[u8], id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + id.len());
        key.extend_from_slice(prefix);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn read<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key)? {
            Some(raw) => {
                let value = serde_json::from_slice(&raw).with_context(|| {
                    format!("decode record {}", String::from_utf8_lossy(key))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        self.db.put(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn read_seq(&self, market_id: &str) -> Result<u64> {
        let key = Self::encode_key(SEQ_PREFIX, market_id);
        match self.db.get(&key)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .context("round number counter must be 8 bytes")?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Scan every round, keeping those accepted by `keep`.
    fn scan_rounds(&self, keep: impl Fn(&Round) -> bool) -> Result<Vec<Round>> {
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(ROUND_PREFIX, Direction::Forward));

        for item in iter {
            let (raw_key, value) = item?;
            if !raw_key.starts_with(ROUND_PREFIX) {
                break;
            }
            let round: Round = serde_json::from_slice(&value).with_context(|| {
                format!("decode round {}", String::from_utf8_lossy(&raw_key))
            })?;
            if keep(&round) {
                out.push(round);
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl RoundStore for RocksDbRoundStore {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        self.read(&Self::encode_key(MARKET_PREFIX, market_id))
    }

    async fn put_market(&self, market: &Market) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(&Self::encode_key(MARKET_PREFIX, &market.id), market)
    }

    async fn create(&self, new_round: NewRound) -> Result<Round> {
        let _guard = self.write_lock.lock().await;

        let round_key = Self::encode_key(ROUND_PREFIX, &new_round.id);
        if self.db.get(&round_key)?.is_some() {
            anyhow::bail!("round {} already exists", new_round.id);
        }

        let round_number = self.read_seq(&new_round.market_id)? + 1;
        let round = new_round.into_round(round_number);

        // Counter and record land together or not at all.
        let mut batch = WriteBatch::default();
        batch.put(
            Self::encode_key(SEQ_PREFIX, &round.market_id),
            round_number.to_be_bytes(),
        );
        batch.put(&round_key, serde_json::to_vec(&round)?);
        self.db.write(batch)?;

        Ok(round)
    }

    async fn get(&self, round_id: &str) -> Result<Option<Round>> {
        self.read(&Self::encode_key(ROUND_PREFIX, round_id))
    }

    async fn find_due(&self, status: RoundStatus, before: u64) -> Result<Vec<Round>> {
        let mut due = self.scan_rounds(|r| r.status == status && r.opened_at <= before)?;
        due.sort_by_key(|r| r.opened_at);
        Ok(due)
    }

    async fn compare_and_transition(
        &self,
        round_id: &str,
        expected: RoundStatus,
        patch: &RoundPatch,
    ) -> Result<Transition> {
        let _guard = self.write_lock.lock().await;

        let key = Self::encode_key(ROUND_PREFIX, round_id);
        let Some(mut round) = self.read::<Round>(&key)? else {
            return Ok(Transition::NotFound);
        };

        let transition = transition_in_place(&mut round, expected, patch)?;
        if let Transition::Applied(updated) = &transition {
            self.write(&key, updated)?;
        }
        Ok(transition)
    }

    async fn delete(&self, round_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let key = Self::encode_key(ROUND_PREFIX, round_id);
        if self.db.get(&key)?.is_none() {
            return Ok(false);
        }
        self.db.delete(&key)?;
        Ok(true)
    }
}
