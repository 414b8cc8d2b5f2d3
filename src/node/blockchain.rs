//! Consensus orchestrator
//!
//! [`Blockchain`] owns the pending transaction pool, the pending block
//! queue and the chain tree, and holds references to the finalized ledger
//! and the peer network. Every operation that reads or mutates chain
//! structure runs under one lock, so reconciliation, minting and
//! transaction submission are totally ordered.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::ChainConfig;
use crate::consensus::{
    balance_over, compute_proof, stake_from_balance, validate_block, validate_transaction, BalanceSheet,
    Block, Proof, ProofError, ValidationError,
};
use crate::crypto::{Hash, PrivateKey, PublicKey, SignatureError};
use crate::node::{EventBus, Topic};
use crate::now_nanos;
use crate::p2p::{PeerMessage, PeerNetwork, ProtocolError};
use crate::storage::{ChainTree, Ledger, LedgerError, TreeError, LEDGER_SCAN_BATCH};
use crate::validation::Transaction;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transaction {0} is already known")]
    Duplicate(Hash),
    #[error("block {0} not found")]
    BlockNotFound(Hash),
    #[error("transaction {0} not found")]
    TransactionNotFound(Hash),
    #[error("parent {0} is unknown")]
    ParentNotFound(Hash),
    #[error("block {0} has no parent")]
    MissingParent(Hash),
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ChainError {
    /// The minting lottery did not pick us this round
    pub fn is_not_our_turn(&self) -> bool {
        matches!(self, ChainError::Proof(ProofError::HitAboveUpperBound { .. }))
    }

    /// Storage or codec failure rather than a problem with the input
    pub fn is_resource_failure(&self) -> bool {
        match self {
            ChainError::Ledger(e) => !e.is_not_found() && !matches!(e, LedgerError::Empty),
            ChainError::Protocol(_) => true,
            _ => false,
        }
    }
}

/// What one `migrate_block` call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Inserted into the tree, in insertion order
    pub inserted: Vec<Hash>,
    /// Rejected, with the reason
    pub dropped: Vec<(Hash, String)>,
    /// Still pending afterwards
    pub pending: Vec<Hash>,
    /// Written to the ledger by a chop, root to tip
    pub finalized: Vec<Hash>,
    /// Removed from the tree on a losing branch
    pub orphaned: Vec<Hash>,
    /// Parents requested from peers
    pub requested: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// In the ledger
    Finalized(Transaction),
    /// In a block of the chain tree
    Accepted(Transaction),
    /// Waiting in the pool
    Pending(Transaction),
}

impl TransactionStatus {
    pub fn transaction(&self) -> &Transaction {
        match self {
            TransactionStatus::Finalized(tx)
            | TransactionStatus::Accepted(tx)
            | TransactionStatus::Pending(tx) => tx,
        }
    }
}

/// Transactions sent or received by one account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountTransactions {
    pub pending: Vec<Transaction>,
    /// Finalized, then on the canonical tree branch, oldest first
    pub persisted: Vec<Transaction>,
}

/// Whether accepted blocks are relayed to peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relay {
    Announce,
    /// Catching up from a trusted source: no block or parent gossip
    Quiet,
}

/// Point-in-time copy of the orchestrator's mutable state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub pending_blocks: Vec<Hash>,
    pub pending_transactions: Vec<Hash>,
    pub tree: Option<ChainTree>,
    pub ledger_blocks: u64,
}

#[derive(Debug, Default)]
struct ChainState {
    pending_transactions: Vec<Transaction>,
    pending_blocks: Vec<Block>,
    tree: Option<ChainTree>,
    /// Balances at the ledger tip, loaded on first use
    finalized: Option<BalanceSheet>,
}

pub struct Blockchain {
    state: Mutex<ChainState>,
    ledger: Arc<dyn Ledger>,
    peer: Arc<dyn PeerNetwork>,
    events: EventBus,
    key: PrivateKey,
    config: ChainConfig,
}

impl Blockchain {
    /// The ledger must already hold genesis
    pub fn new(
        ledger: Arc<dyn Ledger>,
        peer: Arc<dyn PeerNetwork>,
        events: EventBus,
        key: PrivateKey,
        config: ChainConfig,
    ) -> Self {
        Self {
            state: Mutex::new(ChainState::default()),
            ledger,
            peer,
            events,
            key,
            config,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Encode and hand `message` to the peer network. Never blocks.
    pub fn announce(&self, message: &PeerMessage) {
        match message.to_bytes() {
            Ok(bytes) => self.peer.broadcast(bytes),
            Err(e) => warn!(kind = message.kind(), error = %e, "failed to encode peer message"),
        }
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Admit a signed transaction into the pending pool and relay it
    pub fn add_pending_transaction(&self, tx: Transaction) -> Result<(), ChainError> {
        validate_transaction(&tx)?;

        {
            let mut state = self.state.lock();
            let known = state.pending_transactions.iter().any(|pending| pending.id == tx.id)
                || state.tree.as_ref().is_some_and(|tree| tree.contains_transaction(&tx.id))
                || self.ledger.contains_transaction(&tx.id)?;
            if known {
                return Err(ChainError::Duplicate(tx.id));
            }
            state.pending_transactions.push(tx.clone());
        }

        debug!(tx = %tx.id.short(), amount = tx.amount, fee = tx.fee, "transaction pending");
        self.events.publish_transaction(Topic::NewLocalTransaction, &tx);
        self.announce(&PeerMessage::NewTransaction(tx));
        Ok(())
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().pending_transactions.clone()
    }

    /// Fee that keeps a transaction within one block's worth of the
    /// best-paying pending transactions. 1 on an empty pool, the lowest
    /// pending fee while the pool fits in a single block.
    pub fn recommended_fee(&self) -> u64 {
        let state = self.state.lock();
        let mut fees: Vec<u64> = state.pending_transactions.iter().map(|tx| tx.fee).collect();
        fees.sort_unstable();

        let per_block = self.config.max_transactions_per_block.max(1);
        match fees.len() {
            0 => 1,
            len if len < per_block => fees[0],
            len => fees[len - per_block],
        }
    }

    pub fn transaction_status(&self, id: &Hash) -> Result<TransactionStatus, ChainError> {
        let state = self.state.lock();

        match self.ledger.transaction_by_id(id) {
            Ok(tx) => return Ok(TransactionStatus::Finalized(tx)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(tx) = state.tree.as_ref().and_then(|tree| tree.transaction(id)) {
            return Ok(TransactionStatus::Accepted(tx.clone()));
        }
        state
            .pending_transactions
            .iter()
            .find(|tx| tx.id == *id)
            .map(|tx| TransactionStatus::Pending(tx.clone()))
            .ok_or(ChainError::TransactionNotFound(*id))
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Queue `block` and fold every pending block that can now attach
    /// into the chain tree.
    pub fn migrate_block(&self, block: Block) -> Result<MigrationReport, ChainError> {
        let mut state = self.state.lock();
        self.migrate_locked(&mut state, block, Relay::Announce)
    }

    /// [`Blockchain::migrate_block`] without relaying accepted blocks or
    /// requesting missing parents
    pub fn migrate_synced_block(&self, block: Block) -> Result<MigrationReport, ChainError> {
        let mut state = self.state.lock();
        self.migrate_locked(&mut state, block, Relay::Quiet)
    }

    fn migrate_locked(&self, state: &mut ChainState, block: Block, relay: Relay) -> Result<MigrationReport, ChainError> {
        self.load_finalized_balances(state)?;
        let mut report = MigrationReport::default();

        if state.pending_blocks.iter().any(|pending| pending.id == block.id) {
            trace!(block = %block.id.short(), "block already pending");
            report.pending = state.pending_blocks.iter().map(|b| b.id).collect();
            return Ok(report);
        }
        state.pending_blocks.insert(0, block);

        loop {
            let pending = state.pending_blocks.clone();
            let mut requeued = Vec::with_capacity(pending.len());
            let mut dropped: HashSet<Hash> = HashSet::new();
            let mut inserted = 0usize;

            for candidate in pending {
                if self.is_accepted(state, &candidate.id)? {
                    trace!(block = %candidate.id.short(), "block already accepted");
                    continue;
                }

                let parent_id = match candidate.parent_id {
                    Some(parent_id) => parent_id,
                    None => {
                        reject(&mut report, &mut dropped, &candidate, "block has no parent".to_string());
                        continue;
                    }
                };

                if !self.is_accepted(state, &parent_id)? {
                    debug!(block = %candidate.id.short(), parent = %parent_id.short(), "parent missing, requeued");
                    requeued.push(candidate);
                    continue;
                }

                if let Err(e) = self.validate_candidate(state, &candidate) {
                    if e.is_resource_failure() {
                        return Err(e);
                    }
                    reject(&mut report, &mut dropped, &candidate, e.to_string());
                    continue;
                }

                match state.tree.as_mut() {
                    None => {
                        let tip = self.ledger.last_block()?;
                        if tip.id != parent_id {
                            debug!(
                                block = %candidate.id.short(),
                                tip = %tip.id.short(),
                                "parent is not the ledger tip, requeued"
                            );
                            requeued.push(candidate);
                            continue;
                        }
                        info!(root = %candidate.id.short(), height = candidate.height, "chain tree created");
                        state.tree = Some(ChainTree::new(candidate.clone()));
                    }
                    Some(tree) => {
                        if let Err(e) = tree.insert(candidate.clone()) {
                            reject(&mut report, &mut dropped, &candidate, e.to_string());
                            continue;
                        }
                    }
                }

                self.accept(state, &candidate, relay);
                report.inserted.push(candidate.id);
                inserted += 1;
            }

            // descendants of rejected blocks can never attach
            loop {
                let before = requeued.len();
                requeued.retain(|pending: &Block| {
                    let orphaned = pending.parent_id.is_some_and(|parent| dropped.contains(&parent));
                    if orphaned {
                        dropped.insert(pending.id);
                        report.dropped.push((pending.id, "ancestor was rejected".to_string()));
                        warn!(block = %pending.id.short(), "dropped descendant of rejected block");
                    }
                    !orphaned
                });
                if requeued.len() == before {
                    break;
                }
            }

            state.pending_blocks = requeued;
            if inserted == 0 {
                break;
            }
        }

        self.finalize_locked(state, &mut report)?;
        if relay == Relay::Announce {
            self.request_missing_parents(state, &mut report)?;
        }
        report.pending = state.pending_blocks.iter().map(|b| b.id).collect();
        Ok(report)
    }

    /// Proof, linkage, clock and signature checks for a block whose parent
    /// is known
    fn validate_candidate(&self, state: &ChainState, candidate: &Block) -> Result<Proof, ChainError> {
        let parent_id = candidate.parent_id.ok_or(ChainError::MissingParent(candidate.id))?;
        let parent = self
            .known_block(state, &parent_id)?
            .ok_or(ChainError::ParentNotFound(parent_id))?;

        let proof = self.proof_against(state, candidate, &parent)?;
        validate_block(candidate, &parent, &proof, now_nanos(), self.config.max_clock_drift)?;
        self.check_replays(state, candidate, &parent_id)?;
        Ok(proof)
    }

    /// A transaction may appear once on any path from genesis: not in the
    /// ledger and not in the tree ancestors of `parent_id`
    fn check_replays(&self, state: &ChainState, candidate: &Block, parent_id: &Hash) -> Result<(), ChainError> {
        if candidate.transactions.is_empty() {
            return Ok(());
        }
        let ancestors: HashSet<Hash> = match state.tree.as_ref().filter(|tree| tree.contains(parent_id)) {
            Some(tree) => tree
                .get_chain(parent_id)?
                .iter()
                .flat_map(|block| block.transactions.iter().map(|tx| tx.id))
                .collect(),
            None => HashSet::new(),
        };

        for tx in &candidate.transactions {
            if ancestors.contains(&tx.id) || self.ledger.contains_transaction(&tx.id)? {
                return Err(ValidationError::DuplicateTransaction(tx.id.short()).into());
            }
        }
        Ok(())
    }

    /// Bookkeeping after a block enters the tree
    fn accept(&self, state: &mut ChainState, block: &Block, relay: Relay) {
        let included: HashSet<Hash> = block.transactions.iter().map(|tx| tx.id).collect();
        state.pending_transactions.retain(|tx| !included.contains(&tx.id));

        info!(
            block = %block.id.short(),
            height = block.height,
            creator = %hex::encode(&block.creator.0[..3]),
            transactions = block.transactions.len(),
            "block accepted"
        );
        self.events.publish_block(Topic::NewLocalBlock, block);
        if relay == Relay::Announce {
            self.announce(&PeerMessage::NewBlock(block.clone()));
        }
    }

    /// Chop the tree once its longest chain outgrows the head length.
    /// The chopped copy replaces the tree only after every stem block is
    /// in the ledger.
    fn finalize_locked(&self, state: &mut ChainState, report: &mut MigrationReport) -> Result<(), ChainError> {
        let mut next = match state.tree.as_ref() {
            Some(tree) if tree.longest_chain_length() > self.config.head_length => tree.clone(),
            _ => return Ok(()),
        };

        let chop = next.chop(self.config.head_length)?;
        for block in &chop.stem {
            self.ledger.add_block(block)?;
        }
        state.tree = Some(next);

        let stem_parent = chop.stem.first().and_then(|block| block.parent_id);
        let extends_sheet = state.finalized.as_ref().is_some_and(|sheet| sheet.tip() == stem_parent);
        if !extends_sheet {
            // reloaded from the ledger on next use
            state.finalized = None;
        } else if let Some(sheet) = state.finalized.as_mut() {
            for block in &chop.stem {
                sheet.apply(block);
            }
        }

        info!(
            root = %chop.root.short(),
            finalized = chop.stem.len(),
            orphaned = chop.orphaned.len(),
            "chain tree chopped"
        );
        if let Some(tree) = state.tree.as_ref() {
            trace!(tree = %tree.render(), "chain tree after chop");
        }

        report.finalized.extend(chop.stem.iter().map(|block| block.id));
        for orphan in &chop.orphaned {
            for block in orphan.blocks() {
                report.orphaned.push(block.id);
                for tx in &block.transactions {
                    self.return_to_pending(state, tx)?;
                }
            }
        }
        Ok(())
    }

    fn return_to_pending(&self, state: &mut ChainState, tx: &Transaction) -> Result<(), ChainError> {
        let known = state.pending_transactions.iter().any(|pending| pending.id == tx.id)
            || state.tree.as_ref().is_some_and(|tree| tree.contains_transaction(&tx.id))
            || self.ledger.contains_transaction(&tx.id)?;
        if !known {
            debug!(tx = %tx.id.short(), "transaction from orphaned block returned to pool");
            state.pending_transactions.push(tx.clone());
        }
        Ok(())
    }

    /// Ask peers for parents that are neither accepted nor pending
    fn request_missing_parents(&self, state: &ChainState, report: &mut MigrationReport) -> Result<(), ChainError> {
        let pending_ids: HashSet<Hash> = state.pending_blocks.iter().map(|b| b.id).collect();
        let mut requested = HashSet::new();

        for block in &state.pending_blocks {
            let Some(parent) = block.parent_id else {
                continue;
            };
            if pending_ids.contains(&parent) || requested.contains(&parent) || self.is_accepted(state, &parent)? {
                continue;
            }
            requested.insert(parent);
            debug!(parent = %parent.short(), child = %block.id.short(), "requesting missing parent");
            self.announce(&PeerMessage::ResolveBlockRequest { block_id: parent });
            report.requested.push(parent);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn is_accepted(&self, state: &ChainState, id: &Hash) -> Result<bool, ChainError> {
        if state.tree.as_ref().is_some_and(|tree| tree.contains(id)) {
            return Ok(true);
        }
        Ok(self.ledger.contains_block(id)?)
    }

    fn known_block(&self, state: &ChainState, id: &Hash) -> Result<Option<Block>, ChainError> {
        if let Some(block) = state.tree.as_ref().and_then(|tree| tree.get(id)) {
            return Ok(Some(block.clone()));
        }
        match self.ledger.block_by_id(id) {
            Ok(block) => Ok(Some(block)),
            Err(LedgerError::BlockNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Accepted block by id, from the tree or the ledger
    pub fn block_by_id(&self, id: &Hash) -> Result<Block, ChainError> {
        let state = self.state.lock();
        self.known_block(&state, id)?.ok_or(ChainError::BlockNotFound(*id))
    }

    /// Child of `parent_id`: the finalized one if any, else the tree child
    /// on the canonical chain, else the first tree child
    pub fn block_after(&self, parent_id: &Hash) -> Result<Block, ChainError> {
        let state = self.state.lock();

        match self.ledger.block_after(parent_id) {
            Ok(block) => return Ok(block),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let tree = state.tree.as_ref().ok_or(ChainError::BlockNotFound(*parent_id))?;
        if tree.root().parent_id == Some(*parent_id) {
            return Ok(tree.root().clone());
        }

        let canonical: HashSet<Hash> = tree.longest_chain().iter().map(|block| block.id).collect();
        let children = tree.children_of(parent_id);
        children
            .iter()
            .find(|child| canonical.contains(&child.id))
            .or_else(|| children.first())
            .map(|child| (*child).clone())
            .ok_or(ChainError::BlockNotFound(*parent_id))
    }

    /// Tip of the canonical chain: the tree's fork-choice endpoint, or the
    /// ledger tip while no tree exists
    pub fn best_endpoint(&self) -> Result<Block, ChainError> {
        let state = self.state.lock();
        self.best_endpoint_locked(&state)
    }

    fn best_endpoint_locked(&self, state: &ChainState) -> Result<Block, ChainError> {
        match state.tree.as_ref() {
            Some(tree) => Ok(tree.find_longest_chain_endpoint().clone()),
            None => Ok(self.ledger.last_block()?),
        }
    }

    /// Balance of `account` after applying every block from genesis up to
    /// and including `block_id`
    pub fn account_balance_until(&self, account: &PublicKey, block_id: &Hash) -> Result<i128, ChainError> {
        let mut state = self.state.lock();
        self.load_finalized_balances(&mut state)?;
        self.balance_until_locked(&state, account, block_id)
    }

    /// Balance of `account` at the canonical tip
    pub fn account_balance(&self, account: &PublicKey) -> Result<i128, ChainError> {
        let mut state = self.state.lock();
        self.load_finalized_balances(&mut state)?;
        let endpoint = self.best_endpoint_locked(&state)?;
        self.balance_until_locked(&state, account, &endpoint.id)
    }

    /// Pending and canonical-chain transactions of `account`
    pub fn account_transactions(&self, account: &PublicKey) -> Result<AccountTransactions, ChainError> {
        let state = self.state.lock();

        let pending = state
            .pending_transactions
            .iter()
            .filter(|tx| tx.involves(account))
            .cloned()
            .collect();
        let mut persisted = self.ledger.transactions_for_account(account)?;
        if let Some(tree) = state.tree.as_ref() {
            for block in tree.longest_chain() {
                persisted.extend(block.transactions.iter().filter(|tx| tx.involves(account)).cloned());
            }
        }
        Ok(AccountTransactions { pending, persisted })
    }

    /// Sum the ledger into a balance sheet unless one is already loaded
    fn load_finalized_balances(&self, state: &mut ChainState) -> Result<(), ChainError> {
        if state.finalized.is_some() {
            return Ok(());
        }
        let mut sheet = BalanceSheet::new();
        let count = self.ledger.block_count()?;
        let mut height = 0;
        while height < count {
            let upper = (height + LEDGER_SCAN_BATCH).min(count);
            for block in self.ledger.blocks_in_range(height, upper)? {
                sheet.apply(&block);
            }
            height = upper;
        }
        debug!(blocks = count, "finalized balances loaded");
        state.finalized = Some(sheet);
        Ok(())
    }

    fn balance_until_locked(&self, state: &ChainState, account: &PublicKey, block_id: &Hash) -> Result<i128, ChainError> {
        if let Some(sheet) = state.finalized.as_ref() {
            if sheet.tip() == Some(*block_id) {
                return Ok(sheet.balance(account));
            }
            if let Some(tree) = state.tree.as_ref() {
                if tree.contains(block_id) && tree.root().parent_id == sheet.tip() {
                    let head = tree.stake_between(account, &tree.root_id(), true, block_id, true)?;
                    return Ok(sheet.balance(account) + head);
                }
            }
        }
        self.scan_balance_until(state, account, block_id)
    }

    /// Balance from a full ledger scan; used for historical blocks
    fn scan_balance_until(&self, state: &ChainState, account: &PublicKey, block_id: &Hash) -> Result<i128, ChainError> {
        let mut balance: i128 = 0;
        let count = self.ledger.block_count()?;

        let mut height = 0;
        while height < count {
            let upper = (height + LEDGER_SCAN_BATCH).min(count);
            for block in self.ledger.blocks_in_range(height, upper)? {
                balance += balance_over([&block], account);
                if block.id == *block_id {
                    return Ok(balance);
                }
            }
            height = upper;
        }

        let tree = state.tree.as_ref().ok_or(ChainError::BlockNotFound(*block_id))?;
        let path = tree
            .get_chain(block_id)
            .map_err(|_| ChainError::BlockNotFound(*block_id))?;

        // skip tree blocks already counted from the ledger
        let mut first_unfinalized = None;
        for block in &path {
            if !self.ledger.contains_block(&block.id)? {
                first_unfinalized = Some(block.id);
                break;
            }
        }
        if let Some(from) = first_unfinalized {
            balance += tree.stake_between(account, &from, true, block_id, true)?;
        }
        Ok(balance)
    }

    /// Proof for `block` against its already-accepted parent
    pub fn calculate_proof(&self, block: &Block) -> Result<Proof, ChainError> {
        let mut state = self.state.lock();
        self.load_finalized_balances(&mut state)?;
        let parent_id = block.parent_id.ok_or(ChainError::MissingParent(block.id))?;
        let parent = self
            .known_block(&state, &parent_id)?
            .ok_or(ChainError::ParentNotFound(parent_id))?;
        self.proof_against(&state, block, &parent)
    }

    fn proof_against(&self, state: &ChainState, block: &Block, parent: &Block) -> Result<Proof, ChainError> {
        let balance = self.balance_until_locked(state, &block.creator, &parent.id)?;
        Ok(compute_proof(block, parent, stake_from_balance(balance))?)
    }

    // ------------------------------------------------------------------
    // Minting
    // ------------------------------------------------------------------

    /// Build and sign a block on the canonical tip if the local stake wins
    /// this round. Fails with `HitAboveUpperBound` when it does not.
    pub fn mint_block(&self) -> Result<Block, ChainError> {
        let mut state = self.state.lock();
        self.load_finalized_balances(&mut state)?;
        self.mint_locked(&state)
    }

    /// Mint and reconcile under a single lock acquisition
    pub fn mint_and_migrate(&self) -> Result<MigrationReport, ChainError> {
        let mut state = self.state.lock();
        self.load_finalized_balances(&mut state)?;
        let block = self.mint_locked(&state)?;
        self.migrate_locked(&mut state, block, Relay::Announce)
    }

    fn mint_locked(&self, state: &ChainState) -> Result<Block, ChainError> {
        let endpoint = self.best_endpoint_locked(state)?;
        let transactions = self.select_transactions(state)?;
        let mut block = Block::candidate(&endpoint, self.key.public_key(), now_nanos(), transactions);

        let proof = self.proof_against(state, &block, &endpoint)?;
        proof.validate()?;
        block.apply_proof(&proof);
        block.sign(&self.key)?;

        debug!(block = %block.id.short(), height = block.height, hit = proof.hit, "minted block");
        Ok(block)
    }

    /// Oldest pending transactions not yet finalized, up to the block limit
    fn select_transactions(&self, state: &ChainState) -> Result<Vec<Transaction>, ChainError> {
        let mut selected = Vec::new();
        for tx in &state.pending_transactions {
            if selected.len() >= self.config.max_transactions_per_block {
                break;
            }
            if !self.ledger.contains_transaction(&tx.id)? {
                selected.push(tx.clone());
            }
        }
        Ok(selected)
    }

    pub fn snapshot(&self) -> Result<ChainSnapshot, ChainError> {
        let state = self.state.lock();
        Ok(ChainSnapshot {
            pending_blocks: state.pending_blocks.iter().map(|b| b.id).collect(),
            pending_transactions: state.pending_transactions.iter().map(|tx| tx.id).collect(),
            tree: state.tree.clone(),
            ledger_blocks: self.ledger.block_count()?,
        })
    }
}

fn reject(report: &mut MigrationReport, dropped: &mut HashSet<Hash>, block: &Block, reason: String) {
    warn!(block = %block.id.short(), height = block.height, reason = %reason, "block dropped");
    dropped.insert(block.id);
    report.dropped.push((block.id, reason));
}
