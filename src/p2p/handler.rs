//! Inbound peer message handling

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, trace, warn};

use crate::node::{Blockchain, ChainError, Topic};
use crate::p2p::PeerMessage;

/// Decode one peer message and apply it to the chain.
///
/// Duplicates and unknown blocks are expected on a gossip network and are
/// not errors. Anything malformed is.
pub fn handle_peer_message(chain: &Blockchain, bytes: &[u8]) -> Result<(), ChainError> {
    let message = PeerMessage::from_bytes(bytes)?;
    trace!(kind = message.kind(), size = bytes.len(), "peer message received");

    match message {
        PeerMessage::NewTransaction(tx) => {
            chain.events().publish_transaction(Topic::NewRemoteTransaction, &tx);
            match chain.add_pending_transaction(tx) {
                Err(ChainError::Duplicate(id)) => {
                    trace!(tx = %id.short(), "transaction already known");
                    Ok(())
                }
                other => other,
            }
        }
        PeerMessage::NewBlock(block) => {
            chain.events().publish_block(Topic::NewRemoteBlock, &block);
            let report = chain.migrate_block(block)?;
            if !report.dropped.is_empty() {
                debug!(dropped = report.dropped.len(), "remote block rejected");
            }
            Ok(())
        }
        PeerMessage::ResolveBlockRequest { block_id } => match chain.block_by_id(&block_id) {
            Ok(block) => {
                debug!(block = %block_id.short(), "answering resolve request");
                chain.announce(&PeerMessage::ResolveBlockResponse { resolved_block: block });
                Ok(())
            }
            Err(ChainError::BlockNotFound(_)) => {
                trace!(block = %block_id.short(), "cannot resolve unknown block");
                Ok(())
            }
            Err(e) => Err(e),
        },
        PeerMessage::ResolveBlockResponse { resolved_block } => {
            debug!(block = %resolved_block.id.short(), "resolved block received");
            chain.migrate_block(resolved_block)?;
            Ok(())
        }
    }
}

/// Feed every message from `inbox` into the chain until the peer
/// network goes away
pub async fn listen(chain: Arc<Blockchain>, mut inbox: broadcast::Receiver<Vec<u8>>) {
    loop {
        match inbox.recv().await {
            Ok(bytes) => {
                let chain = Arc::clone(&chain);
                // chain operations hold a blocking lock
                let handled = tokio::task::spawn_blocking(move || handle_peer_message(&chain, &bytes)).await;
                match handled {
                    Ok(Ok(())) => {}
                    Ok(Err(ChainError::Protocol(e))) => debug!(error = %e, "ignored undecodable peer message"),
                    Ok(Err(e)) => warn!(error = %e, "peer message rejected"),
                    Err(e) => error!(error = %e, "peer message handler panicked"),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "peer inbox lagged, messages lost");
            }
            Err(RecvError::Closed) => {
                info!("peer inbox closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::crypto::{Hash, PrivateKey};
    use crate::node::{create_genesis_block, EventBus, GenesisConfig};
    use crate::p2p::{PeerHub, PeerNetwork, ProtocolError};
    use crate::storage::MemoryLedger;
    use crate::validation::Transaction;

    fn node(hub: &PeerHub, key: PrivateKey, stakeholders: Vec<crate::crypto::PublicKey>) -> Blockchain {
        let genesis = create_genesis_block(&GenesisConfig::with_stakeholders(stakeholders));
        let ledger = Arc::new(MemoryLedger::with_genesis(&genesis).unwrap());
        Blockchain::new(ledger, Arc::new(hub.join()), EventBus::default(), key, ChainConfig::default())
    }

    #[test]
    fn test_malformed_message_rejected() {
        let hub = PeerHub::new();
        let chain = node(&hub, PrivateKey::generate(), vec![]);
        assert!(matches!(
            handle_peer_message(&chain, b"not json"),
            Err(ChainError::Protocol(ProtocolError::Malformed(_)))
        ));
    }

    #[test]
    fn test_remote_transaction_pooled_once() {
        let hub = PeerHub::new();
        let key = PrivateKey::generate();
        let chain = node(&hub, key.clone(), vec![key.public_key()]);
        let mut remote = chain.events().subscribe(Topic::NewRemoteTransaction);

        let tx = Transaction::new(key.public_key(), key.public_key(), 1, 0, 0).signed(&key).unwrap();
        let bytes = PeerMessage::NewTransaction(tx.clone()).to_bytes().unwrap();

        handle_peer_message(&chain, &bytes).unwrap();
        handle_peer_message(&chain, &bytes).unwrap();

        assert_eq!(chain.pending_transactions(), vec![tx]);
        assert!(remote.try_recv().is_ok());
    }

    #[test]
    fn test_resolve_request_answered_for_known_block() {
        let hub = PeerHub::new();
        let chain = node(&hub, PrivateKey::generate(), vec![]);
        let mut observer = hub.join().subscribe();

        let genesis = chain.block_by_id(&Hash::zero()).unwrap();
        let request = PeerMessage::ResolveBlockRequest { block_id: genesis.id }.to_bytes().unwrap();
        handle_peer_message(&chain, &request).unwrap();

        let response = PeerMessage::from_bytes(&observer.try_recv().unwrap()).unwrap();
        assert_eq!(response, PeerMessage::ResolveBlockResponse { resolved_block: genesis });

        let unknown = PeerMessage::ResolveBlockRequest { block_id: Hash::random() }.to_bytes().unwrap();
        handle_peer_message(&chain, &unknown).unwrap();
        assert!(observer.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listen_stops_when_inbox_closes() {
        let hub = PeerHub::new();
        let chain = Arc::new(node(&hub, PrivateKey::generate(), vec![]));
        let (sender, inbox) = broadcast::channel(4);
        let task = tokio::spawn(listen(Arc::clone(&chain), inbox));

        sender.send(b"garbage".to_vec()).unwrap();
        drop(sender);
        task.await.unwrap();
    }
}
