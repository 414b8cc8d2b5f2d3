//! Minting module - periodic stake-lottery block production

mod minter;

pub use minter::*;
