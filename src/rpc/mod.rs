//! HTTP API module
//!
//! Exposes block, balance and transaction queries plus transaction
//! submission over JSON.

mod methods;
mod server;

pub use methods::*;
pub use server::*;
