//! Consensus module - Block structure, proof of stake, rewards, and validation

mod block;
mod proof;
mod rewards;
mod validation;

pub use block::*;
pub use proof::*;
pub use rewards::*;
pub use validation::*;
