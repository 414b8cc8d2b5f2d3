//! End-to-end reconciliation scenarios
//!
//! Blocks are forged directly against a genesis block an hour in the past
//! with a very large target, so every forged proof wins the lottery and
//! the outcome of each scenario is deterministic.

use std::sync::Arc;

use stakechain::config::ChainConfig;
use stakechain::consensus::{compute_proof, Block};
use stakechain::constants::NANOS_PER_SECOND;
use stakechain::crypto::PrivateKey;
use stakechain::node::{
    create_genesis_block, sync_from, Blockchain, ChainError, EventBus, GenesisConfig, SyncOptions, TransactionStatus,
};
use stakechain::now_nanos;
use stakechain::p2p::{handle_peer_message, LocalPeer, PeerHub, PeerNetwork};
use stakechain::storage::{Ledger, SledLedger};
use stakechain::validation::Transaction;

const EASY_TARGET: u64 = 1_000_000_000_000_000;

struct Network {
    hub: PeerHub,
    genesis: Block,
    alice: PrivateKey,
    bob: PrivateKey,
}

impl Network {
    fn new() -> Self {
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate();
        let genesis = create_genesis_block(
            &GenesisConfig::with_stakeholders(vec![alice.public_key(), bob.public_key()])
                .target(EASY_TARGET)
                .creation_time(now_nanos() - 3_600 * NANOS_PER_SECOND),
        );
        Self {
            hub: PeerHub::new(),
            genesis,
            alice,
            bob,
        }
    }

    fn node(&self, key: &PrivateKey, config: ChainConfig) -> (Blockchain, Arc<SledLedger>, LocalPeer) {
        let ledger = Arc::new(SledLedger::temporary().unwrap());
        ledger.ensure_genesis(&self.genesis).unwrap();
        let peer = self.hub.join();
        let chain = Blockchain::new(
            ledger.clone(),
            Arc::new(peer.clone()),
            EventBus::default(),
            key.clone(),
            config,
        );
        (chain, ledger, peer)
    }
}

/// Signed child of `parent` created `seconds` after it
fn forge(parent: &Block, key: &PrivateKey, seconds: i64, transactions: Vec<Transaction>) -> Block {
    let mut block = Block::candidate(
        parent,
        key.public_key(),
        parent.creation_time + seconds * NANOS_PER_SECOND,
        transactions,
    );
    let proof = compute_proof(&block, parent, 100_000).unwrap();
    proof.validate().unwrap();
    block.apply_proof(&proof);
    block.sign(key).unwrap();
    block
}

fn transfer(from: &PrivateKey, to: &PrivateKey, amount: u64, fee: u64) -> Transaction {
    Transaction::new(from.public_key(), to.public_key(), amount, fee, now_nanos())
        .signed(from)
        .unwrap()
}

// ============================================================================
// BALANCES
// ============================================================================

#[test]
fn minted_transfer_moves_balances() {
    let net = Network::new();
    let (chain, _, _) = net.node(&net.alice, ChainConfig::default());

    chain.add_pending_transaction(transfer(&net.alice, &net.bob, 500, 0)).unwrap();
    let report = chain.mint_and_migrate().unwrap();
    assert_eq!(report.inserted.len(), 1);
    let block1 = report.inserted[0];

    assert_eq!(chain.account_balance_until(&net.alice.public_key(), &block1).unwrap(), 99_600);
    assert_eq!(chain.account_balance_until(&net.bob.public_key(), &block1).unwrap(), 100_500);
    assert_eq!(chain.account_balance_until(&net.alice.public_key(), &net.genesis.id).unwrap(), 100_000);
}

// ============================================================================
// OUT-OF-ORDER ARRIVAL
// ============================================================================

#[test]
fn orphan_child_waits_for_parent() {
    let net = Network::new();
    let (chain, _, _) = net.node(&net.alice, ChainConfig::default());

    let b1 = forge(&net.genesis, &net.bob, 1, vec![]);
    let b2 = forge(&b1, &net.bob, 1, vec![]);

    let report = chain.migrate_block(b2.clone()).unwrap();
    assert!(report.inserted.is_empty());
    assert!(report.dropped.is_empty());
    assert_eq!(report.pending, vec![b2.id]);
    assert_eq!(report.requested, vec![b1.id]);

    let report = chain.migrate_block(b1.clone()).unwrap();
    assert_eq!(report.inserted, vec![b1.id, b2.id]);
    assert!(report.pending.is_empty());
    assert_eq!(chain.best_endpoint().unwrap().id, b2.id);
}

#[test]
fn migration_is_idempotent() {
    let net = Network::new();
    let (chain, _, _) = net.node(&net.alice, ChainConfig::default());

    let b1 = forge(&net.genesis, &net.bob, 1, vec![]);
    let orphan = forge(&forge(&b1, &net.bob, 1, vec![]), &net.bob, 1, vec![]);

    chain.migrate_block(b1.clone()).unwrap();
    chain.migrate_block(orphan.clone()).unwrap();
    let before = chain.snapshot().unwrap();

    chain.migrate_block(b1).unwrap();
    chain.migrate_block(orphan).unwrap();
    assert_eq!(chain.snapshot().unwrap(), before);
}

// ============================================================================
// REJECTION
// ============================================================================

#[test]
fn invalid_block_drops_descendants() {
    let net = Network::new();
    let (chain, _, _) = net.node(&net.alice, ChainConfig::default());

    let mut bad = forge(&net.genesis, &net.bob, 1, vec![]);
    bad.cumulative_difficulty += 1;
    let child = forge(&bad, &net.bob, 1, vec![]);

    let report = chain.migrate_block(child.clone()).unwrap();
    assert_eq!(report.pending, vec![child.id]);

    let report = chain.migrate_block(bad.clone()).unwrap();
    let dropped: Vec<_> = report.dropped.iter().map(|(id, _)| *id).collect();
    assert_eq!(dropped, vec![bad.id, child.id]);
    assert!(report.pending.is_empty());
    assert!(chain.snapshot().unwrap().tree.is_none());
}

#[test]
fn future_block_rejected() {
    let net = Network::new();
    let (chain, _, _) = net.node(&net.alice, ChainConfig::default());

    let future = forge(&net.genesis, &net.bob, 3_700, vec![]);
    let report = chain.migrate_block(future).unwrap();
    assert_eq!(report.dropped.len(), 1);
    assert!(report.dropped[0].1.contains("ahead"));
}

#[test]
fn unfunded_creator_rejected() {
    let net = Network::new();
    let (chain, _, _) = net.node(&net.alice, ChainConfig::default());
    let stranger = PrivateKey::generate();

    let block = forge(&net.genesis, &stranger, 1, vec![]);
    let report = chain.migrate_block(block).unwrap();
    assert_eq!(report.dropped.len(), 1);
    assert!(matches!(
        chain.calculate_proof(&forge(&net.genesis, &stranger, 1, vec![])),
        Err(ChainError::Proof(_))
    ));
}

#[test]
fn replayed_transaction_rejected() {
    let net = Network::new();
    let (chain, _, _) = net.node(&net.alice, ChainConfig::default());
    let payment = transfer(&net.alice, &net.bob, 500, 0);
    let fresh = transfer(&net.alice, &net.bob, 1, 0);

    let b1 = forge(&net.genesis, &net.bob, 1, vec![payment.clone()]);
    let replay = forge(&b1, &net.bob, 1, vec![payment]);
    let doubled = forge(&b1, &net.bob, 2, vec![fresh.clone(), fresh]);

    let report = chain.migrate_block(b1.clone()).unwrap();
    assert_eq!(report.inserted, vec![b1.id]);
    for block in [replay, doubled] {
        let report = chain.migrate_block(block.clone()).unwrap();
        assert!(report.inserted.is_empty());
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].0, block.id);
        assert!(report.dropped[0].1.contains("already on the chain"));
    }

    assert_eq!(chain.best_endpoint().unwrap().id, b1.id);
    assert_eq!(chain.account_balance_until(&net.alice.public_key(), &b1.id).unwrap(), 99_500);
    assert_eq!(chain.account_balance(&net.alice.public_key()).unwrap(), 99_500);
}

#[test]
fn finalized_transaction_cannot_be_replayed() {
    let net = Network::new();
    let (chain, ledger, _) = net.node(&net.alice, ChainConfig::default().head_length(1));
    let payment = transfer(&net.alice, &net.bob, 500, 0);

    let b1 = forge(&net.genesis, &net.bob, 1, vec![payment.clone()]);
    let b2 = forge(&b1, &net.bob, 1, vec![]);
    let b3 = forge(&b2, &net.bob, 1, vec![]);
    for block in [&b1, &b2, &b3] {
        chain.migrate_block((*block).clone()).unwrap();
    }
    assert!(ledger.contains_transaction(&payment.id).unwrap());
    assert!(matches!(chain.transaction_status(&payment.id).unwrap(), TransactionStatus::Finalized(_)));

    let replay = forge(&b3, &net.bob, 1, vec![payment]);
    let report = chain.migrate_block(replay).unwrap();
    assert_eq!(report.dropped.len(), 1);
    assert!(report.dropped[0].1.contains("already on the chain"));
    assert_eq!(chain.account_balance(&net.alice.public_key()).unwrap(), 99_500);
}

#[test]
fn unfunded_node_cannot_mint() {
    let net = Network::new();
    let (chain, _, _) = net.node(&PrivateKey::generate(), ChainConfig::default());
    assert!(matches!(chain.mint_block(), Err(ChainError::Proof(_))));
}

// ============================================================================
// FORKS AND FINALIZATION
// ============================================================================

#[test]
fn losing_fork_is_orphaned_on_chop() {
    let net = Network::new();
    let (chain, ledger, _) = net.node(&net.alice, ChainConfig::default().head_length(2));

    let b1 = forge(&net.genesis, &net.bob, 1, vec![]);
    let stray = transfer(&net.alice, &net.bob, 7, 1);
    let b2a = forge(&b1, &net.bob, 1, vec![]);
    let b2b = forge(&b1, &net.bob, 1, vec![stray.clone()]);

    for block in [&b1, &b2a, &b2b] {
        chain.migrate_block((*block).clone()).unwrap();
    }
    // equal height and difficulty: the smaller id wins
    let expected = if b2a.id < b2b.id { b2a.id } else { b2b.id };
    assert_eq!(chain.best_endpoint().unwrap().id, expected);
    assert!(matches!(chain.transaction_status(&stray.id).unwrap(), TransactionStatus::Accepted(_)));

    let b3 = forge(&b2a, &net.bob, 1, vec![]);
    let report = chain.migrate_block(b3.clone()).unwrap();
    assert!(report.finalized.is_empty());
    assert_eq!(chain.best_endpoint().unwrap().id, b3.id);

    let b4 = forge(&b3, &net.bob, 1, vec![]);
    let report = chain.migrate_block(b4.clone()).unwrap();
    assert_eq!(report.finalized, vec![b1.id]);
    assert_eq!(report.orphaned, vec![b2b.id]);

    assert_eq!(ledger.block_count().unwrap(), 2);
    assert_eq!(ledger.last_block().unwrap().id, b1.id);
    let tree = chain.snapshot().unwrap().tree.unwrap();
    assert_eq!(tree.root_id(), b2a.id);
    assert_eq!(tree.longest_chain_length(), 2);
    assert!(!tree.contains(&b2b.id));

    assert_eq!(chain.pending_transactions(), vec![stray.clone()]);
    assert_eq!(chain.transaction_status(&stray.id).unwrap(), TransactionStatus::Pending(stray));
    assert_eq!(chain.block_after(&b1.id).unwrap().id, b2a.id);
    assert_eq!(chain.block_after(&net.genesis.id).unwrap().id, b1.id);

    // finalized history still counts toward balances
    let bob_total = chain.account_balance(&net.bob.public_key()).unwrap();
    assert_eq!(bob_total, 100_000 + 4 * 100);
}

// ============================================================================
// GOSSIP
// ============================================================================

#[test]
fn minted_block_reaches_peer() {
    let net = Network::new();
    let (minter, _, minter_peer) = net.node(&net.alice, ChainConfig::default());
    let (follower, _, follower_peer) = net.node(&net.bob, ChainConfig::default());
    let mut minter_inbox = minter_peer.subscribe();
    let mut follower_inbox = follower_peer.subscribe();

    let tx = transfer(&net.bob, &net.alice, 10, 2);
    follower.add_pending_transaction(tx.clone()).unwrap();
    while let Ok(bytes) = minter_inbox.try_recv() {
        handle_peer_message(&minter, &bytes).unwrap();
    }
    assert_eq!(minter.pending_transactions(), vec![tx.clone()]);

    let report = minter.mint_and_migrate().unwrap();
    let minted = minter.block_by_id(&report.inserted[0]).unwrap();
    assert!(minted.contains_transaction(&tx.id));

    while let Ok(bytes) = follower_inbox.try_recv() {
        handle_peer_message(&follower, &bytes).unwrap();
    }

    assert_eq!(follower.best_endpoint().unwrap().id, minted.id);
    assert!(follower.pending_transactions().is_empty());
    assert!(matches!(follower.transaction_status(&tx.id).unwrap(), TransactionStatus::Accepted(_)));
    assert_eq!(follower.account_balance(&net.alice.public_key()).unwrap(), 100_112);
    assert_eq!(
        follower.account_balance(&net.alice.public_key()).unwrap(),
        minter.account_balance(&net.alice.public_key()).unwrap()
    );
}

// ============================================================================
// SYNC
// ============================================================================

#[tokio::test]
async fn fresh_node_catches_up_quietly() {
    let net = Network::new();
    let (source, _, _) = net.node(&net.alice, ChainConfig::default());
    let tx = transfer(&net.alice, &net.bob, 250, 5);
    let b1 = forge(&net.genesis, &net.bob, 1, vec![tx.clone()]);
    let b2 = forge(&b1, &net.alice, 1, vec![]);
    let b3 = forge(&b2, &net.bob, 1, vec![]);
    for block in [&b1, &b2, &b3] {
        source.migrate_block((*block).clone()).unwrap();
    }

    let (follower, _, _) = net.node(&net.bob, ChainConfig::default());
    let mut observer = net.hub.join().subscribe();
    let follower = Arc::new(follower);

    let synced = sync_from(&follower, &Arc::new(source), SyncOptions::default()).await.unwrap();
    assert_eq!(synced, 3);
    assert_eq!(follower.best_endpoint().unwrap().id, b3.id);
    assert!(matches!(follower.transaction_status(&tx.id).unwrap(), TransactionStatus::Accepted(_)));
    assert_eq!(follower.account_balance(&net.bob.public_key()).unwrap(), 100_000 + 250 + 200 + 5);
    assert!(observer.try_recv().is_err());

    // nothing newer on the source
    let source = Arc::new(net.node(&net.alice, ChainConfig::default()).0);
    assert_eq!(sync_from(&follower, &source, SyncOptions::default()).await.unwrap(), 0);
}
