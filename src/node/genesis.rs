//! Genesis block construction
//!
//! Every node configured with the same stakeholder list derives a
//! byte-for-byte identical genesis block.

use crate::consensus::Block;
use crate::constants::{GENESIS_GRANT_AMOUNT, GENESIS_TARGET};
use crate::crypto::{Hash, PublicKey};
use crate::validation::Transaction;

/// Inputs to genesis construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisConfig {
    /// Receiver and amount of each genesis grant
    pub grants: Vec<(PublicKey, u64)>,
    pub target: u64,
    /// Nanoseconds since the Unix epoch
    pub creation_time: i64,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            grants: Vec::new(),
            target: GENESIS_TARGET,
            creation_time: 0,
        }
    }
}

impl GenesisConfig {
    /// Grant [`GENESIS_GRANT_AMOUNT`] to each stakeholder
    pub fn with_stakeholders(stakeholders: Vec<PublicKey>) -> Self {
        Self {
            grants: stakeholders
                .into_iter()
                .map(|key| (key, GENESIS_GRANT_AMOUNT))
                .collect(),
            ..Self::default()
        }
    }

    pub fn target(mut self, target: u64) -> Self {
        self.target = target;
        self
    }

    pub fn creation_time(mut self, creation_time: i64) -> Self {
        self.creation_time = creation_time;
        self
    }
}

/// Create the genesis block: height 0, no parent, zero id and challenge,
/// zero creator, unsigned, carrying one grant per stakeholder.
pub fn create_genesis_block(config: &GenesisConfig) -> Block {
    let transactions = config
        .grants
        .iter()
        .map(|(receiver, amount)| Transaction::genesis_grant(*receiver, *amount))
        .collect();

    Block {
        id: Hash::zero(),
        parent_id: None,
        height: 0,
        creation_time: config.creation_time,
        transactions,
        creator: PublicKey::zero(),
        target: config.target,
        challenge: Hash::zero(),
        cumulative_difficulty: 0,
        signature: None,
    }
}
