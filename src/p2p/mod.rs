//! P2P networking module - peer transport, wire messages, and inbound handling

mod handler;
mod peer;
mod protocol;

pub use handler::*;
pub use peer::*;
pub use protocol::*;
