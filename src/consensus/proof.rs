//! Proof of stake
//!
//! Every (creator, parent) pair has exactly one deterministic challenge.
//! The first eight bytes of that challenge are the creator's "hit" for the
//! round. The block is valid once the hit falls at or below an upper bound
//! that grows with the parent's target, the time elapsed since the parent,
//! and the creator's stake:
//!
//! ```text
//! upper_bound = Tp * ns * stake / 1e9
//! target      = Tp * ns / 1e9
//! difficulty  = parent difficulty + 2^63 / target
//! ```
//!
//! All products are computed with arbitrary precision.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use thiserror::Error;

use crate::consensus::Block;
use crate::constants::{DIFFICULTY_NUMERATOR, NANOS_PER_SECOND};
use crate::crypto::{hash_concat, Hash};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("creator has no stake ({stake})")]
    NoStake { stake: i64 },
    #[error("block timestamp is {elapsed_nanoseconds}ns before its parent")]
    TimestampBeforeParent { elapsed_nanoseconds: i64 },
    #[error("derived target is zero")]
    DegenerateTarget,
    #[error("hit {hit} is above upper bound {upper_bound} (stake {stake})")]
    HitAboveUpperBound {
        hit: u64,
        upper_bound: BigUint,
        stake: i64,
    },
}

/// Derived values for one candidate block. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub challenge: Hash,
    pub hit: u64,
    pub upper_bound: BigUint,
    pub target: u64,
    pub cumulative_difficulty: u64,
    pub stake: i64,
    pub elapsed_nanoseconds: i64,
}

/// Challenge for `creator` building on a parent with `parent_challenge`
pub fn compute_challenge(creator: &crate::crypto::PublicKey, parent_challenge: &Hash) -> Hash {
    hash_concat(&[creator.0.as_slice(), parent_challenge.0.as_slice()])
}

/// Hit: big-endian u64 of the first eight challenge bytes
pub fn compute_hit(challenge: &Hash) -> u64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&challenge.0[..8]);
    u64::from_be_bytes(prefix)
}

/// Compute the proof for `candidate` on top of `parent` given the
/// creator's balance at the parent.
pub fn compute_proof(candidate: &Block, parent: &Block, stake: i64) -> Result<Proof, ProofError> {
    let challenge = compute_challenge(&candidate.creator, &parent.challenge);
    let hit = compute_hit(&challenge);

    if stake <= 0 {
        return Err(ProofError::NoStake { stake });
    }

    let elapsed = i128::from(candidate.creation_time) - i128::from(parent.creation_time);
    if elapsed < 0 {
        return Err(ProofError::TimestampBeforeParent {
            elapsed_nanoseconds: clamp_i64(elapsed),
        });
    }
    let elapsed_nanoseconds = clamp_i64(elapsed);

    let nanos_per_second = BigUint::from(NANOS_PER_SECOND as u64);
    let scaled_target = BigUint::from(parent.target) * BigUint::from(elapsed_nanoseconds as u64);

    let upper_bound = &scaled_target * BigUint::from(stake as u64) / &nanos_per_second;
    let new_target = scaled_target / &nanos_per_second;
    if new_target.is_zero() {
        return Err(ProofError::DegenerateTarget);
    }

    let increment = BigUint::from(DIFFICULTY_NUMERATOR) / &new_target;
    let cumulative = BigUint::from(parent.cumulative_difficulty) + increment;

    Ok(Proof {
        challenge,
        hit,
        upper_bound,
        target: new_target.to_u64().unwrap_or(u64::MAX),
        cumulative_difficulty: cumulative.to_u64().unwrap_or(u64::MAX),
        stake,
        elapsed_nanoseconds,
    })
}

impl Proof {
    /// Accept iff `hit <= upper_bound`
    pub fn validate(&self) -> Result<(), ProofError> {
        if BigUint::from(self.hit) <= self.upper_bound {
            Ok(())
        } else {
            Err(ProofError::HitAboveUpperBound {
                hit: self.hit,
                upper_bound: self.upper_bound.clone(),
                stake: self.stake,
            })
        }
    }
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
