//! Node module - genesis, local events, the consensus orchestrator, and
//! catch-up from a remote node

mod blockchain;
mod events;
mod genesis;
mod sync;

pub use blockchain::*;
pub use events::*;
pub use genesis::*;
pub use sync::*;
