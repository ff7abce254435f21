use anyhow::Result;
use async_trait::async_trait;

use super::{memory::MemoryRoundStore, rocks::RocksDbRoundStore};
use crate::config::{BaseConfig, StoreType};
use crate::traits::RoundStore;
use crate::types::{Market, NewRound, Round, RoundPatch, RoundStatus, Transition};

/// Enum representing all round store implementations.
pub enum RoundStoreVariant {
    RocksDb(RocksDbRoundStore),
    Memory(MemoryRoundStore),
}

impl RoundStoreVariant {
    /// Open the store selected by the configuration.
    pub fn open(config: &BaseConfig) -> Result<Self> {
        match config.store_type {
            StoreType::RocksDb => Ok(RoundStoreVariant::RocksDb(RocksDbRoundStore::open(
                &config.storage_path,
            )?)),
            StoreType::Memory => Ok(RoundStoreVariant::Memory(MemoryRoundStore::new())),
        }
    }
}

#[async_trait]
impl RoundStore for RoundStoreVariant {
    fn name(&self) -> &'static str {
        match self {
            RoundStoreVariant::RocksDb(inner) => inner.name(),
            RoundStoreVariant::Memory(inner) => inner.name(),
        }
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        match self {
            RoundStoreVariant::RocksDb(inner) => inner.get_market(market_id).await,
            RoundStoreVariant::Memory(inner) => inner.get_market(market_id).await,
        }
    }

    async fn put_market(&self, market: &Market) -> Result<()> {
        match self {
            RoundStoreVariant::RocksDb(inner) => inner.put_market(market).await,
            RoundStoreVariant::Memory(inner) => inner.put_market(market).await,
        }
    }

    async fn create(&self, new_round: NewRound) -> Result<Round> {
        match self {
            RoundStoreVariant::RocksDb(inner) => inner.create(new_round).await,
            RoundStoreVariant::Memory(inner) => inner.create(new_round).await,
        }
    }

    async fn get(&self, round_id: &str) -> Result<Option<Round>> {
        match self {
            RoundStoreVariant::RocksDb(inner) => inner.get(round_id).await,
            RoundStoreVariant::Memory(inner) => inner.get(round_id).await,
        }
    }

    async fn find_due(&self, status: RoundStatus, before: u64) -> Result<Vec<Round>> {
        match self {
            RoundStoreVariant::RocksDb(inner) => inner.find_due(status, before).await,
            RoundStoreVariant::Memory(inner) => inner.find_due(status, before).await,
        }
    }

    async fn compare_and_transition(
        &self,
        round_id: &str,
        expected: RoundStatus,
        patch: &RoundPatch,
    ) -> Result<Transition> {
        match self {
            RoundStoreVariant::RocksDb(inner) => {
                inner.compare_and_transition(round_id, expected, patch).await
            }
            RoundStoreVariant::Memory(inner) => {
                inner.compare_and_transition(round_id, expected, patch).await
            }
        }
    }

    async fn delete(&self, round_id: &str) -> Result<bool> {
        match self {
            RoundStoreVariant::RocksDb(inner) => inner.delete(round_id).await,
            RoundStoreVariant::Memory(inner) => inner.delete(round_id).await,
        }
    }
}
