//! Storage module - chain tree of unfinalized blocks and the finalized ledger

mod db;
mod ledger;
mod tree;

pub use db::*;
pub use ledger::*;
pub use tree::*;
