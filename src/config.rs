//! Runtime configuration
//!
//! [`ChainConfig`] carries the orchestrator's tunables. [`Cli`] is the node
//! binary's command line; every flag can also come from the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::constants::{
    DEFAULT_HEAD_LENGTH, MAX_CLOCK_DRIFT_NANOS, MAX_TRANSACTIONS_PER_BLOCK, MINT_INTERVAL_MS,
};
use crate::crypto::{PublicKey, SignatureError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Blocks kept ahead of the tree root before chopping
    pub head_length: u64,
    pub mint_interval: Duration,
    pub max_transactions_per_block: usize,
    /// Nanoseconds a block timestamp may run ahead of the local clock
    pub max_clock_drift: i64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            head_length: DEFAULT_HEAD_LENGTH,
            mint_interval: Duration::from_millis(MINT_INTERVAL_MS),
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK,
            max_clock_drift: MAX_CLOCK_DRIFT_NANOS,
        }
    }
}

impl ChainConfig {
    pub fn head_length(mut self, head_length: u64) -> Self {
        self.head_length = head_length;
        self
    }
}

#[derive(Debug, Parser)]
#[command(name = "stakechain-node", version, about = "Proof-of-stake blockchain node")]
pub struct Cli {
    /// Directory of the finalized ledger database
    #[arg(long, env = "STAKECHAIN_DATA_DIR", default_value = "./stakechain-data")]
    pub data_dir: PathBuf,

    /// Port of the HTTP API
    #[arg(long, env = "STAKECHAIN_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Hex-encoded signing key; a fresh key is generated when absent
    #[arg(long, env = "STAKECHAIN_KEY")]
    pub key: Option<String>,

    /// Hex public key funded in the genesis block (repeatable).
    /// Defaults to the node's own key.
    #[arg(long = "genesis-account", env = "STAKECHAIN_GENESIS_ACCOUNTS", value_delimiter = ',')]
    pub genesis_accounts: Vec<String>,

    #[arg(long, env = "STAKECHAIN_HEAD_LENGTH", default_value_t = DEFAULT_HEAD_LENGTH)]
    pub head_length: u64,

    #[arg(long, env = "STAKECHAIN_MINT_INTERVAL_MS", default_value_t = MINT_INTERVAL_MS)]
    pub mint_interval_ms: u64,

    /// Base URL of a node to catch up from before minting starts
    #[arg(long, env = "STAKECHAIN_SYNC_REMOTE")]
    pub sync_remote: Option<String>,

    /// Fallback log filter when RUST_LOG is unset
    #[arg(long, env = "STAKECHAIN_LOG", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            head_length: self.head_length,
            mint_interval: Duration::from_millis(self.mint_interval_ms),
            ..ChainConfig::default()
        }
    }

    /// Parse the configured genesis stakeholders
    pub fn genesis_stakeholders(&self) -> Result<Vec<PublicKey>, SignatureError> {
        self.genesis_accounts.iter().map(|hex| PublicKey::from_hex(hex)).collect()
    }
}
