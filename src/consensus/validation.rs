//! Block and transaction validation
//!
//! Pure checks applied to a block from an untrusted source once its parent
//! is known and its proof has been recomputed.

use std::collections::HashSet;

use thiserror::Error;

use crate::consensus::{Block, Proof, ProofError};
use crate::validation::Transaction;

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid proof: {0}")]
    Proof(#[from] ProofError),
    #[error("missing or invalid block signature")]
    InvalidSignature,
    #[error("height {got} does not follow parent height {parent}")]
    InvalidHeight { parent: u64, got: u64 },
    #[error("parent id does not match")]
    InvalidParent,
    #[error("timestamp {time} is more than {drift}ns ahead of local clock {now}")]
    TimestampTooFarAhead { time: i64, now: i64, drift: i64 },
    #[error("challenge does not match the recomputed proof")]
    ChallengeMismatch,
    #[error("target {got} does not match recomputed {expected}")]
    TargetMismatch { expected: u64, got: u64 },
    #[error("cumulative difficulty {got} does not match recomputed {expected}")]
    DifficultyMismatch { expected: u64, got: u64 },
    #[error("invalid transaction {id}: {reason}")]
    InvalidTransaction { id: String, reason: &'static str },
    #[error("transaction {0} is already on the chain")]
    DuplicateTransaction(String),
}

/// Linkage: the block must sit exactly one level above its parent
pub fn validate_linkage(block: &Block, parent: &Block) -> Result<(), ValidationError> {
    if block.parent_id != Some(parent.id) {
        return Err(ValidationError::InvalidParent);
    }
    if block.height != parent.height + 1 {
        return Err(ValidationError::InvalidHeight {
            parent: parent.height,
            got: block.height,
        });
    }
    Ok(())
}

/// Reject blocks stamped too far in the future
pub fn validate_timestamp(block: &Block, now: i64, max_drift: i64) -> Result<(), ValidationError> {
    if block.creation_time > now.saturating_add(max_drift) {
        return Err(ValidationError::TimestampTooFarAhead {
            time: block.creation_time,
            now,
            drift: max_drift,
        });
    }
    Ok(())
}

/// The stored proof fields must equal the recomputed ones
pub fn validate_proof_fields(block: &Block, proof: &Proof) -> Result<(), ValidationError> {
    if block.challenge != proof.challenge {
        return Err(ValidationError::ChallengeMismatch);
    }
    if block.target != proof.target {
        return Err(ValidationError::TargetMismatch {
            expected: proof.target,
            got: block.target,
        });
    }
    if block.cumulative_difficulty != proof.cumulative_difficulty {
        return Err(ValidationError::DifficultyMismatch {
            expected: proof.cumulative_difficulty,
            got: block.cumulative_difficulty,
        });
    }
    Ok(())
}

/// A transaction submitted after genesis: signed by its sender and not a grant
pub fn validate_transaction(tx: &Transaction) -> Result<(), ValidationError> {
    if tx.is_genesis_grant() {
        return Err(ValidationError::InvalidTransaction {
            id: tx.id.short(),
            reason: "genesis grant outside genesis",
        });
    }
    if !tx.verify_signature() {
        return Err(ValidationError::InvalidTransaction {
            id: tx.id.short(),
            reason: "missing or invalid signature",
        });
    }
    Ok(())
}

/// Everything except parent resolution and stake lookup: linkage, clock,
/// proof, recomputed fields, signature, then each transaction.
pub fn validate_block(
    block: &Block,
    parent: &Block,
    proof: &Proof,
    now: i64,
    max_drift: i64,
) -> Result<(), ValidationError> {
    validate_linkage(block, parent)?;
    validate_timestamp(block, now, max_drift)?;
    proof.validate()?;
    validate_proof_fields(block, proof)?;

    if !block.verify_signature() {
        return Err(ValidationError::InvalidSignature);
    }

    let mut seen = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        validate_transaction(tx)?;
        if !seen.insert(tx.id) {
            return Err(ValidationError::DuplicateTransaction(tx.id.short()));
        }
    }

    Ok(())
}
