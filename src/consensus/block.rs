//! Block structure
//!
//! A block is immutable once signed. Its `challenge`, `target` and
//! `cumulative_difficulty` are filled in from a [`Proof`] and are always
//! recomputed by receivers rather than trusted.

use serde::{Deserialize, Serialize};

use crate::consensus::Proof;
use crate::crypto::{hash_bytes, Hash, PrivateKey, PublicKey, SchnorrSignature, SignatureError};
use crate::validation::Transaction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Random 256-bit identifier
    pub id: Hash,
    /// Absent only for genesis
    #[serde(rename = "parentID")]
    pub parent_id: Option<Hash>,
    pub height: u64,
    /// Nanoseconds since the Unix epoch
    #[serde(rename = "timeUnixNano")]
    pub creation_time: i64,
    pub transactions: Vec<Transaction>,
    pub creator: PublicKey,
    pub target: u64,
    pub challenge: Hash,
    pub cumulative_difficulty: u64,
    pub signature: Option<SchnorrSignature>,
}

impl Block {
    /// Unsigned child of `parent` with a fresh id. Proof fields stay
    /// zeroed until [`Block::apply_proof`].
    pub fn candidate(
        parent: &Block,
        creator: PublicKey,
        creation_time: i64,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            id: Hash::random(),
            parent_id: Some(parent.id),
            height: parent.height + 1,
            creation_time,
            transactions,
            creator,
            target: 0,
            challenge: Hash::zero(),
            cumulative_difficulty: 0,
            signature: None,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Copy the derived proof values into the block
    pub fn apply_proof(&mut self, proof: &Proof) {
        self.challenge = proof.challenge;
        self.target = proof.target;
        self.cumulative_difficulty = proof.cumulative_difficulty;
    }

    /// Serialize every field except the signature
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(200 + self.transactions.len() * 32);

        bytes.extend_from_slice(&self.id.0);
        match &self.parent_id {
            Some(parent) => {
                bytes.push(1);
                bytes.extend_from_slice(&parent.0);
            }
            None => bytes.push(0),
        }
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.creation_time.to_le_bytes());
        bytes.extend_from_slice(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            bytes.extend_from_slice(&tx.hash().0);
        }
        bytes.extend_from_slice(&self.creator.0);
        bytes.extend_from_slice(&self.target.to_le_bytes());
        bytes.extend_from_slice(&self.challenge.0);
        bytes.extend_from_slice(&self.cumulative_difficulty.to_le_bytes());

        bytes
    }

    pub fn signing_hash(&self) -> Hash {
        hash_bytes(&self.signing_bytes())
    }

    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), SignatureError> {
        self.signature = Some(key.sign(&self.signing_hash())?);
        Ok(())
    }

    /// True when a signature is present and verifies against the creator
    pub fn verify_signature(&self) -> bool {
        match &self.signature {
            Some(signature) => self.creator.verify(&self.signing_hash(), signature),
            None => false,
        }
    }

    pub fn transaction(&self, id: &Hash) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.id == *id)
    }

    pub fn contains_transaction(&self, id: &Hash) -> bool {
        self.transaction(id).is_some()
    }

    /// Sum of fees paid to the creator
    pub fn total_fees(&self) -> u128 {
        self.transactions.iter().map(|tx| tx.fee as u128).sum()
    }
}
