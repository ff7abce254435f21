use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Round store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[value(name = "rocksdb")]
    RocksDb,
    Memory,
}

/// Execution layer client backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Rpc,
    Mock,
}

/// Base configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "roundsmith", about = "Prediction round lifecycle orchestrator")]
pub struct BaseConfig {
    /// Path for persistent storage (RocksDB).
    #[arg(long, env = "ROUNDSMITH_STORAGE_PATH", default_value = "./data")]
    pub storage_path: String,

    #[arg(long, env = "ROUNDSMITH_STORE", value_enum, default_value_t = StoreType::RocksDb)]
    pub store_type: StoreType,

    #[arg(long, env = "ROUNDSMITH_EXECUTION", value_enum, default_value_t = ExecutionType::Rpc)]
    pub execution_type: ExecutionType,

    /// JSON-RPC endpoint of the base layer.
    #[arg(long, env = "ROUNDSMITH_BASE_RPC_URL", default_value = "http://127.0.0.1:8899")]
    pub base_rpc_url: String,

    /// JSON-RPC endpoint of the ephemeral layer.
    #[arg(long, env = "ROUNDSMITH_EPHEMERAL_RPC_URL", default_value = "http://127.0.0.1:7799")]
    pub ephemeral_rpc_url: String,

    /// Program owning round accounts.
    #[arg(long, env = "ROUNDSMITH_PROGRAM_ID", default_value = "roundsmith-program")]
    pub program_id: String,

    /// Program owning round accounts on the base layer while delegated.
    #[arg(long, env = "ROUNDSMITH_DELEGATION_PROGRAM_ID", default_value = "delegation-program")]
    pub delegation_program_id: String,

    /// Length of the prediction window in seconds.
    #[arg(long, env = "ROUNDSMITH_ROUND_DURATION_SECS", default_value_t = 60)]
    pub round_duration_secs: u64,

    #[arg(long, env = "ROUNDSMITH_AUTO_LOCK_INTERVAL_SECS", default_value_t = 5)]
    pub auto_lock_interval_secs: u64,

    #[arg(long, env = "ROUNDSMITH_RECONCILE_INTERVAL_SECS", default_value_t = 120)]
    pub reconcile_interval_secs: u64,

    /// Extra time past the lock deadline before a round counts as stuck.
    #[arg(long, env = "ROUNDSMITH_RECONCILE_GRACE_SECS", default_value_t = 300)]
    pub reconcile_grace_secs: u64,

    #[arg(long, env = "ROUNDSMITH_RETENTION_INTERVAL_SECS", default_value_t = 3600)]
    pub retention_interval_secs: u64,

    /// Terminal rounds idle for longer than this are deleted.
    #[arg(long, env = "ROUNDSMITH_RETENTION_SECS", default_value_t = 86400)]
    pub retention_secs: u64,

    /// Number of lock queue workers.
    #[arg(long, env = "ROUNDSMITH_LOCK_WORKERS", default_value_t = 4)]
    pub lock_workers: usize,

    /// Attempts per lock job before it is marked failed.
    #[arg(long, env = "ROUNDSMITH_LOCK_MAX_ATTEMPTS", default_value_t = 3)]
    pub lock_max_attempts: u32,

    #[arg(long, env = "ROUNDSMITH_LOCK_RETRY_DELAY_MS", default_value_t = 2000)]
    pub lock_retry_delay_ms: u64,

    /// Upper bound for every execution layer call.
    #[arg(long, env = "ROUNDSMITH_RPC_TIMEOUT_MS", default_value_t = 10_000)]
    pub rpc_timeout_ms: u64,

    /// Hex encoded ed25519 public key of the randomness oracle.
    #[arg(long, env = "ROUNDSMITH_ATTESTATION_PUBKEY", default_value = "")]
    pub attestation_pubkey: String,
}

impl Default for BaseConfig {
    fn default() -> Self {
        BaseConfig {
            storage_path: "./data".to_string(),
            store_type: StoreType::RocksDb,
            execution_type: ExecutionType::Rpc,
            base_rpc_url: "http://127.0.0.1:8899".to_string(),
            ephemeral_rpc_url: "http://127.0.0.1:7799".to_string(),
            program_id: "roundsmith-program".to_string(),
            delegation_program_id: "delegation-program".to_string(),
            round_duration_secs: 60,
            auto_lock_interval_secs: 5,
            reconcile_interval_secs: 120,
            reconcile_grace_secs: 300,
            retention_interval_secs: 3600,
            retention_secs: 86400, // 1 day
            lock_workers: 4,
            lock_max_attempts: 3,
            lock_retry_delay_ms: 2000,
            rpc_timeout_ms: 10_000,
            attestation_pubkey: String::new(),
        }
    }
}
