//! Cryptography module - SHA-256 hashing, Schnorr signatures, hex encodings

mod encoding;
mod hash;
mod schnorr;

pub(crate) use encoding::{hex_bytes, opt_hex};
pub use hash::*;
pub use schnorr::*;
