//! Stakechain Core Library
//!
//! Consensus and chain management for a proof-of-stake blockchain node:
//! a fork tree of unfinalized blocks, a stake-weighted block lottery,
//! reconciliation of out-of-order blocks from untrusted peers, and
//! continuous minting.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod mining;
pub mod node;
pub mod p2p;
pub mod rpc;
pub mod storage;
pub mod validation;

/// Protocol constants
pub mod constants {
    /// Reward credited to the creator of every block
    pub const BLOCK_REWARD: i128 = 100;

    /// Longest branch kept in memory before the excess is finalized
    pub const DEFAULT_HEAD_LENGTH: u64 = 256;

    /// Pause between minting attempts
    pub const MINT_INTERVAL_MS: u64 = 500;

    /// Pending transactions considered per minted block
    pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 512;

    /// Target carried by the genesis block
    pub const GENESIS_TARGET: u64 = 100_000;

    /// Amount granted to each stakeholder in the genesis block
    pub const GENESIS_GRANT_AMOUNT: u64 = 100_000;

    /// How far ahead of the local clock a block timestamp may be
    pub const MAX_CLOCK_DRIFT_NANOS: i64 = 15 * NANOS_PER_SECOND;

    pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

    /// Numerator of the per-block difficulty increment (2^63)
    pub const DIFFICULTY_NUMERATOR: u64 = 1 << 63;

    /// Chain name used in logs and the HTTP banner
    pub const CHAIN_NAME: &str = "stakechain";
}

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
