//! Peer collaborator
//!
//! The node only needs to broadcast opaque messages and to receive every
//! message other peers broadcast. Transports plug in behind
//! [`PeerNetwork`]; [`PeerHub`] connects nodes living in one process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

/// Messages buffered per subscriber before it starts lagging
pub const PEER_CHANNEL_CAPACITY: usize = 1024;

pub trait PeerNetwork: Send + Sync {
    /// Queue `message` for every other peer. Must not block.
    fn broadcast(&self, message: Vec<u8>);

    /// Stream of messages received from other peers
    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>>;
}

struct Member {
    id: usize,
    inbox: broadcast::Sender<Vec<u8>>,
}

/// In-process fan-out between [`LocalPeer`]s
#[derive(Clone, Default)]
pub struct PeerHub {
    members: Arc<RwLock<Vec<Member>>>,
    next_id: Arc<AtomicUsize>,
}

impl PeerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new member
    pub fn join(&self) -> LocalPeer {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (inbox, _) = broadcast::channel(PEER_CHANNEL_CAPACITY);
        self.members.write().push(Member {
            id,
            inbox: inbox.clone(),
        });
        LocalPeer {
            id,
            hub: self.clone(),
            inbox,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }
}

/// Hub member. Broadcasts reach every member except the sender.
#[derive(Clone)]
pub struct LocalPeer {
    id: usize,
    hub: PeerHub,
    inbox: broadcast::Sender<Vec<u8>>,
}

impl LocalPeer {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl PeerNetwork for LocalPeer {
    fn broadcast(&self, message: Vec<u8>) {
        let members = self.hub.members.read();
        for member in members.iter().filter(|member| member.id != self.id) {
            // no subscriber on that member is not an error
            let delivered = member.inbox.send(message.clone()).is_ok();
            trace!(from = self.id, to = member.id, delivered, "peer broadcast");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inbox.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_other_members_only() {
        let hub = PeerHub::new();
        let a = hub.join();
        let b = hub.join();
        let c = hub.join();
        assert_eq!(hub.member_count(), 3);

        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();
        let mut c_rx = c.subscribe();

        a.broadcast(b"hello".to_vec());

        assert_eq!(b_rx.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(c_rx.recv().await.unwrap(), b"hello".to_vec());
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_block() {
        let hub = PeerHub::new();
        let a = hub.join();
        let b = hub.join();
        for _ in 0..(PEER_CHANNEL_CAPACITY * 2) {
            a.broadcast(vec![0]);
        }
        assert_ne!(a.id(), b.id());
    }
}
