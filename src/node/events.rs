//! Local event bus
//!
//! One broadcast channel per topic. Publishing is fire-and-forget: a topic
//! without subscribers drops the event, and a slow subscriber sees
//! `Lagged` instead of stalling the publisher.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::broadcast;

use crate::consensus::Block;
use crate::validation::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewLocalBlock,
    NewRemoteBlock,
    NewLocalTransaction,
    NewRemoteTransaction,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::NewLocalBlock,
        Topic::NewRemoteBlock,
        Topic::NewLocalTransaction,
        Topic::NewRemoteTransaction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::NewLocalBlock => "new-local-block",
            Topic::NewRemoteBlock => "new-remote-block",
            Topic::NewLocalTransaction => "new-local-transaction",
            Topic::NewRemoteTransaction => "new-remote-transaction",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Block(Block),
    Transaction(Transaction),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    channels: HashMap<Topic, broadcast::Sender<Event>>,
}

impl EventBus {
    /// `capacity` events are buffered per topic
    pub fn new(capacity: usize) -> Self {
        let channels = Topic::ALL
            .iter()
            .map(|topic| (*topic, broadcast::channel(capacity).0))
            .collect();
        Self { channels }
    }

    /// Deliver to current subscribers; returns how many received it
    pub fn publish(&self, topic: Topic, event: Event) -> usize {
        self.channels
            .get(&topic)
            .and_then(|sender| sender.send(event).ok())
            .unwrap_or(0)
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        match self.channels.get(&topic) {
            Some(sender) => sender.subscribe(),
            // every topic is created in `new`
            None => broadcast::channel(1).1,
        }
    }

    pub fn publish_block(&self, topic: Topic, block: &Block) -> usize {
        self.publish(topic, Event::Block(block.clone()))
    }

    pub fn publish_transaction(&self, topic: Topic, tx: &Transaction) -> usize {
        self.publish(topic, Event::Transaction(tx.clone()))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
