//! Block reward and per-account balance accounting
//!
//! A block changes an account's balance in three ways:
//! - the creator earns [`BLOCK_REWARD`] plus every fee in the block
//! - a receiver gains `amount`
//! - a sender loses `amount + fee`
//!
//! Balances are accumulated as `i128` so no realistic history overflows.

use std::collections::HashMap;

use crate::consensus::Block;
use crate::constants::BLOCK_REWARD;
use crate::crypto::{Hash, PublicKey};

/// Reward paid to the creator of `block`, fees included.
/// Genesis pays no reward.
pub fn creator_reward(block: &Block) -> i128 {
    if block.is_genesis() {
        return 0;
    }
    BLOCK_REWARD + block.total_fees() as i128
}

/// Net change of `account`'s balance caused by `block`
pub fn balance_effect(block: &Block, account: &PublicKey) -> i128 {
    let mut delta: i128 = 0;

    if block.creator == *account {
        delta += creator_reward(block);
    }

    for tx in &block.transactions {
        if tx.receiver == *account {
            delta += tx.amount as i128;
        }
        if tx.sender == *account {
            delta -= tx.total_cost() as i128;
        }
    }

    delta
}

/// Sum of [`balance_effect`] over a sequence of blocks
pub fn balance_over<'a, I>(blocks: I, account: &PublicKey) -> i128
where
    I: IntoIterator<Item = &'a Block>,
{
    blocks.into_iter().map(|block| balance_effect(block, account)).sum()
}

/// Clamp an accumulated balance into the proof engine's stake range
pub fn stake_from_balance(balance: i128) -> i64 {
    balance.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Running balance of every account touched by a chain of blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSheet {
    tip: Option<Hash>,
    balances: HashMap<PublicKey, i128>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last block folded in
    pub fn tip(&self) -> Option<Hash> {
        self.tip
    }

    pub fn balance(&self, account: &PublicKey) -> i128 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    /// Fold in the child of the current tip
    pub fn apply(&mut self, block: &Block) {
        let mut touched = vec![block.creator];
        for tx in &block.transactions {
            touched.push(tx.sender);
            touched.push(tx.receiver);
        }
        touched.sort_unstable();
        touched.dedup();

        for account in touched {
            *self.balances.entry(account).or_default() += balance_effect(block, &account);
        }
        self.tip = Some(block.id);
    }
}
