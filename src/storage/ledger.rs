//! Finalized ledger contract
//!
//! The append-only history below the chain tree's root. Blocks arrive in
//! finalization order and are never removed.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::consensus::Block;
use crate::crypto::{Hash, PublicKey};
use crate::validation::Transaction;

/// Blocks read per batch by full-ledger scans
pub const LEDGER_SCAN_BATCH: u64 = 256;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger is empty")]
    Empty,
    #[error("block {0} not found in ledger")]
    BlockNotFound(Hash),
    #[error("transaction {0} not found in ledger")]
    TransactionNotFound(Hash),
    #[error("block {id} at height {height} does not extend the ledger tip")]
    NotAppendable { id: Hash, height: u64 },
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt {tree} row: expected a 32-byte id, found {len} bytes")]
    Corrupt { tree: &'static str, len: usize },
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::BlockNotFound(_) | LedgerError::TransactionNotFound(_))
    }
}

/// Persisted history of finalized blocks
pub trait Ledger: Send + Sync {
    fn block_count(&self) -> Result<u64, LedgerError>;

    /// Highest finalized block, or [`LedgerError::Empty`]
    fn last_block(&self) -> Result<Block, LedgerError>;

    fn block_by_id(&self, id: &Hash) -> Result<Block, LedgerError>;

    fn transaction_by_id(&self, id: &Hash) -> Result<Transaction, LedgerError>;

    /// Persist a block and its transactions atomically. Adding a block
    /// that is already stored is a no-op.
    fn add_block(&self, block: &Block) -> Result<(), LedgerError>;

    /// Blocks with `from_height <= height < to_height`, ascending
    fn blocks_in_range(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>, LedgerError>;

    /// The finalized child of `parent_id`
    fn block_after(&self, parent_id: &Hash) -> Result<Block, LedgerError>;

    fn contains_block(&self, id: &Hash) -> Result<bool, LedgerError> {
        match self.block_by_id(id) {
            Ok(_) => Ok(true),
            Err(LedgerError::BlockNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn contains_transaction(&self, id: &Hash) -> Result<bool, LedgerError> {
        match self.transaction_by_id(id) {
            Ok(_) => Ok(true),
            Err(LedgerError::TransactionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Finalized transactions sent or received by `account`, oldest first
    fn transactions_for_account(&self, account: &PublicKey) -> Result<Vec<Transaction>, LedgerError> {
        let count = self.block_count()?;
        let mut found = Vec::new();
        let mut height = 0;
        while height < count {
            let upper = (height + LEDGER_SCAN_BATCH).min(count);
            for block in self.blocks_in_range(height, upper)? {
                found.extend(block.transactions.into_iter().filter(|tx| tx.involves(account)));
            }
            height = upper;
        }
        Ok(found)
    }
}

/// Only genesis may start the ledger; everything else extends the tip
pub(crate) fn check_appendable(block: &Block, tip: Option<&Block>) -> Result<(), LedgerError> {
    let appendable = match tip {
        None => block.is_genesis(),
        Some(tip) => block.parent_id == Some(tip.id) && block.height == tip.height + 1,
    };
    if appendable {
        Ok(())
    } else {
        Err(LedgerError::NotAppendable {
            id: block.id,
            height: block.height,
        })
    }
}

#[derive(Debug, Default)]
struct MemoryLedgerInner {
    blocks: Vec<Block>,
    by_id: HashMap<Hash, usize>,
    transactions: HashMap<Hash, usize>,
}

/// In-memory ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<MemoryLedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with `genesis`
    pub fn with_genesis(genesis: &Block) -> Result<Self, LedgerError> {
        let ledger = Self::new();
        ledger.add_block(genesis)?;
        Ok(ledger)
    }
}

impl Ledger for MemoryLedger {
    fn block_count(&self) -> Result<u64, LedgerError> {
        Ok(self.inner.read().blocks.len() as u64)
    }

    fn last_block(&self) -> Result<Block, LedgerError> {
        self.inner.read().blocks.last().cloned().ok_or(LedgerError::Empty)
    }

    fn block_by_id(&self, id: &Hash) -> Result<Block, LedgerError> {
        let inner = self.inner.read();
        inner
            .by_id
            .get(id)
            .map(|index| inner.blocks[*index].clone())
            .ok_or(LedgerError::BlockNotFound(*id))
    }

    fn transaction_by_id(&self, id: &Hash) -> Result<Transaction, LedgerError> {
        let inner = self.inner.read();
        inner
            .transactions
            .get(id)
            .and_then(|index| inner.blocks[*index].transaction(id).cloned())
            .ok_or(LedgerError::TransactionNotFound(*id))
    }

    fn add_block(&self, block: &Block) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        if inner.by_id.contains_key(&block.id) {
            return Ok(());
        }
        check_appendable(block, inner.blocks.last())?;

        let index = inner.blocks.len();
        inner.by_id.insert(block.id, index);
        for tx in &block.transactions {
            inner.transactions.insert(tx.id, index);
        }
        inner.blocks.push(block.clone());
        Ok(())
    }

    fn blocks_in_range(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>, LedgerError> {
        let inner = self.inner.read();
        let len = inner.blocks.len() as u64;
        let from = from_height.min(len) as usize;
        let to = to_height.min(len) as usize;
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(inner.blocks[from..to].to_vec())
    }

    fn block_after(&self, parent_id: &Hash) -> Result<Block, LedgerError> {
        let inner = self.inner.read();
        let index = inner
            .by_id
            .get(parent_id)
            .ok_or(LedgerError::BlockNotFound(*parent_id))?;
        inner
            .blocks
            .get(index + 1)
            .cloned()
            .ok_or(LedgerError::BlockNotFound(*parent_id))
    }
}
