//! Finalized ledger persisted with Sled
//!
//! Four trees:
//! - `blocks`: block id -> bincode block
//! - `heights`: big-endian height -> block id
//! - `transactions`: transaction id -> containing block id
//! - `children`: parent id -> finalized child id
//!
//! Each block is written to all four in a single sled transaction.

use std::path::Path;

use sled::transaction::TransactionError;
use sled::{Db, Transactional, Tree};
use tracing::debug;

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::storage::ledger::check_appendable;
use crate::storage::{Ledger, LedgerError};
use crate::validation::Transaction;

#[derive(Debug, Clone)]
pub struct SledLedger {
    db: Db,
    blocks: Tree,
    heights: Tree,
    transactions: Tree,
    children: Tree,
}

impl SledLedger {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        Self::from_db(sled::open(path)?)
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> Result<Self, LedgerError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, LedgerError> {
        Ok(Self {
            blocks: db.open_tree("blocks")?,
            heights: db.open_tree("heights")?,
            transactions: db.open_tree("transactions")?,
            children: db.open_tree("children")?,
            db,
        })
    }

    /// Store `genesis` if the ledger is empty
    pub fn ensure_genesis(&self, genesis: &Block) -> Result<(), LedgerError> {
        if self.blocks.is_empty() {
            self.add_block(genesis)?;
        }
        Ok(())
    }

    fn decode_block(bytes: &[u8]) -> Result<Block, LedgerError> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn decode_id(tree: &'static str, bytes: &[u8]) -> Result<Hash, LedgerError> {
        let id: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LedgerError::Corrupt { tree, len: bytes.len() })?;
        Ok(Hash(id))
    }
}

impl Ledger for SledLedger {
    fn block_count(&self) -> Result<u64, LedgerError> {
        Ok(self.blocks.len() as u64)
    }

    fn last_block(&self) -> Result<Block, LedgerError> {
        match self.heights.last()? {
            Some((_, id)) => self.block_by_id(&Self::decode_id("heights", &id)?),
            None => Err(LedgerError::Empty),
        }
    }

    fn block_by_id(&self, id: &Hash) -> Result<Block, LedgerError> {
        match self.blocks.get(id.0)? {
            Some(bytes) => Self::decode_block(&bytes),
            None => Err(LedgerError::BlockNotFound(*id)),
        }
    }

    fn transaction_by_id(&self, id: &Hash) -> Result<Transaction, LedgerError> {
        let block_id = match self.transactions.get(id.0)? {
            Some(bytes) => Self::decode_id("transactions", &bytes)?,
            None => return Err(LedgerError::TransactionNotFound(*id)),
        };
        self.block_by_id(&block_id)?
            .transaction(id)
            .cloned()
            .ok_or(LedgerError::TransactionNotFound(*id))
    }

    fn add_block(&self, block: &Block) -> Result<(), LedgerError> {
        if self.blocks.contains_key(block.id.0)? {
            return Ok(());
        }
        let tip = match self.last_block() {
            Ok(tip) => Some(tip),
            Err(LedgerError::Empty) => None,
            Err(e) => return Err(e),
        };
        check_appendable(block, tip.as_ref())?;

        let encoded = bincode::serialize(block)?;
        let height_key = block.height.to_be_bytes();

        let outcome: Result<(), TransactionError<()>> = (&self.blocks, &self.heights, &self.transactions, &self.children)
            .transaction(|(blocks, heights, transactions, children)| {
                blocks.insert(&block.id.0[..], encoded.as_slice())?;
                heights.insert(&height_key[..], &block.id.0[..])?;
                for tx in &block.transactions {
                    transactions.insert(&tx.id.0[..], &block.id.0[..])?;
                }
                if let Some(parent) = &block.parent_id {
                    children.insert(&parent.0[..], &block.id.0[..])?;
                }
                Ok(())
            });

        outcome.map_err(|e| match e {
            TransactionError::Storage(e) => LedgerError::Storage(e),
            TransactionError::Abort(()) => {
                LedgerError::Storage(sled::Error::Unsupported("ledger transaction aborted".to_string()))
            }
        })?;

        self.db.flush()?;
        debug!(block = %block.id.short(), height = block.height, "persisted finalized block");
        Ok(())
    }

    fn blocks_in_range(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>, LedgerError> {
        if from_height >= to_height {
            return Ok(Vec::new());
        }
        let mut blocks = Vec::new();
        for entry in self.heights.range(from_height.to_be_bytes()..to_height.to_be_bytes()) {
            let (_, id) = entry?;
            blocks.push(self.block_by_id(&Self::decode_id("heights", &id)?)?);
        }
        Ok(blocks)
    }

    fn block_after(&self, parent_id: &Hash) -> Result<Block, LedgerError> {
        match self.children.get(parent_id.0)? {
            Some(child) => self.block_by_id(&Self::decode_id("children", &child)?),
            None => Err(LedgerError::BlockNotFound(*parent_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::node::{create_genesis_block, GenesisConfig};

    fn seeded() -> (SledLedger, Block, PrivateKey) {
        let key = PrivateKey::generate();
        let genesis = create_genesis_block(&GenesisConfig::with_stakeholders(vec![key.public_key()]));
        let ledger = SledLedger::temporary().unwrap();
        ledger.ensure_genesis(&genesis).unwrap();
        (ledger, genesis, key)
    }

    #[test]
    fn test_genesis_seeded_once() {
        let (ledger, genesis, _) = seeded();
        ledger.ensure_genesis(&genesis).unwrap();
        assert_eq!(ledger.block_count().unwrap(), 1);
        assert_eq!(ledger.last_block().unwrap(), genesis);
        let grant = &genesis.transactions[0];
        assert_eq!(ledger.transaction_by_id(&grant.id).unwrap(), *grant);
    }

    #[test]
    fn test_blocks_persist_in_order() {
        let (ledger, genesis, key) = seeded();
        let tx = Transaction::new(key.public_key(), key.public_key(), 9, 1, 0).signed(&key).unwrap();
        let first = Block::candidate(&genesis, key.public_key(), 1, vec![tx.clone()]);
        let second = Block::candidate(&first, key.public_key(), 2, vec![]);
        ledger.add_block(&first).unwrap();
        ledger.add_block(&second).unwrap();
        ledger.add_block(&first).unwrap();

        assert_eq!(ledger.block_count().unwrap(), 3);
        assert_eq!(ledger.last_block().unwrap(), second);
        assert_eq!(ledger.block_after(&genesis.id).unwrap(), first);
        assert_eq!(ledger.block_after(&first.id).unwrap(), second);
        assert_eq!(ledger.transaction_by_id(&tx.id).unwrap(), tx);

        let range: Vec<u64> = ledger.blocks_in_range(1, 3).unwrap().iter().map(|b| b.height).collect();
        assert_eq!(range, vec![1, 2]);
    }

    #[test]
    fn test_missing_lookups() {
        let (ledger, _, _) = seeded();
        let missing = Hash::random();
        assert!(matches!(ledger.block_by_id(&missing), Err(LedgerError::BlockNotFound(_))));
        assert!(matches!(ledger.transaction_by_id(&missing), Err(LedgerError::TransactionNotFound(_))));
        assert!(!ledger.contains_block(&missing).unwrap());
        assert!(SledLedger::temporary().unwrap().last_block().is_err());
    }

    #[test]
    fn test_rejects_fork_of_finalized_history() {
        let (ledger, genesis, key) = seeded();
        let first = Block::candidate(&genesis, key.public_key(), 1, vec![]);
        let rival = Block::candidate(&genesis, key.public_key(), 1, vec![]);
        ledger.add_block(&first).unwrap();
        assert!(matches!(ledger.add_block(&rival), Err(LedgerError::NotAppendable { .. })));
    }

    #[test]
    fn test_truncated_rows_reported_as_corrupt() {
        let (ledger, genesis, _) = seeded();
        let grant = genesis.transactions[0].id;
        ledger.heights.insert(7u64.to_be_bytes(), &[1u8, 2, 3][..]).unwrap();
        ledger.transactions.insert(grant.0, &[9u8; 4][..]).unwrap();

        assert!(matches!(
            ledger.last_block(),
            Err(LedgerError::Corrupt { tree: "heights", len: 3 })
        ));
        assert!(matches!(ledger.blocks_in_range(0, 10), Err(LedgerError::Corrupt { .. })));
        assert!(matches!(
            ledger.transaction_by_id(&grant),
            Err(LedgerError::Corrupt { tree: "transactions", len: 4 })
        ));
        assert_eq!(ledger.block_by_id(&genesis.id).unwrap(), genesis);
    }
}
