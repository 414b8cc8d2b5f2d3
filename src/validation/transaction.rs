//! Transaction structure and signing
//!
//! Account-based transfers signed with Schnorr keys. A transaction moves
//! `amount` from `sender` to `receiver` and pays `fee` to whoever mints
//! the block that includes it.

use serde::{Deserialize, Serialize};

use crate::constants::GENESIS_GRANT_AMOUNT;
use crate::crypto::{hash_bytes, Hash, PrivateKey, PublicKey, SchnorrSignature, SignatureError};

/// A signed value transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique identifier chosen by the creator
    pub id: Hash,
    pub sender: PublicKey,
    pub receiver: PublicKey,
    pub amount: u64,
    pub fee: u64,
    /// Nanoseconds since the Unix epoch
    #[serde(rename = "timeUnixNano")]
    pub creation_time: i64,
    /// Opaque payload, hex in JSON
    #[serde(default, with = "crate::crypto::opt_hex")]
    pub data: Option<Vec<u8>>,
    /// Signature over every other field
    pub signature: Option<SchnorrSignature>,
}

impl Transaction {
    /// Create an unsigned transfer with a fresh random id
    pub fn new(sender: PublicKey, receiver: PublicKey, amount: u64, fee: u64, creation_time: i64) -> Self {
        Self {
            id: Hash::random(),
            sender,
            receiver,
            amount,
            fee,
            creation_time,
            data: None,
            signature: None,
        }
    }

    /// Genesis grant: paid by the all-zero key, id derived from the receiver
    pub fn genesis_grant(receiver: PublicKey, amount: u64) -> Self {
        Self {
            id: hash_bytes(&receiver.0),
            sender: PublicKey::zero(),
            receiver,
            amount,
            fee: 0,
            creation_time: 0,
            data: None,
            signature: None,
        }
    }

    /// Genesis grant for the default stakeholder amount
    pub fn default_genesis_grant(receiver: PublicKey) -> Self {
        Self::genesis_grant(receiver, GENESIS_GRANT_AMOUNT)
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_genesis_grant(&self) -> bool {
        self.sender.is_zero()
    }

    /// Serialize every field except the signature
    pub fn signing_bytes(&self) -> Vec<u8> {
        let data_len = self.data.as_ref().map_or(0, Vec::len);
        let mut bytes = Vec::with_capacity(32 * 3 + 8 * 3 + 9 + data_len);

        bytes.extend_from_slice(&self.id.0);
        bytes.extend_from_slice(&self.sender.0);
        bytes.extend_from_slice(&self.receiver.0);
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes.extend_from_slice(&self.fee.to_le_bytes());
        bytes.extend_from_slice(&self.creation_time.to_le_bytes());
        match &self.data {
            Some(data) => {
                bytes.push(1);
                bytes.extend_from_slice(&(data.len() as u64).to_le_bytes());
                bytes.extend_from_slice(data);
            }
            None => bytes.push(0),
        }

        bytes
    }

    /// Digest the sender signs
    pub fn signing_hash(&self) -> Hash {
        hash_bytes(&self.signing_bytes())
    }

    /// Digest of the full transaction including its signature.
    /// Blocks commit to their transactions through this value.
    pub fn hash(&self) -> Hash {
        let mut bytes = self.signing_bytes();
        match &self.signature {
            Some(signature) => {
                bytes.push(1);
                bytes.extend_from_slice(&signature.0);
            }
            None => bytes.push(0),
        }
        hash_bytes(&bytes)
    }

    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), SignatureError> {
        self.signature = Some(key.sign(&self.signing_hash())?);
        Ok(())
    }

    /// Builder form of [`Transaction::sign`]
    pub fn signed(mut self, key: &PrivateKey) -> Result<Self, SignatureError> {
        self.sign(key)?;
        Ok(self)
    }

    /// True when a signature is present and verifies against the sender
    pub fn verify_signature(&self) -> bool {
        match &self.signature {
            Some(signature) => self.sender.verify(&self.signing_hash(), signature),
            None => false,
        }
    }

    /// Total debited from the sender
    pub fn total_cost(&self) -> u128 {
        self.amount as u128 + self.fee as u128
    }

    /// `account` is the sender or the receiver
    pub fn involves(&self, account: &PublicKey) -> bool {
        self.sender == *account || self.receiver == *account
    }
}
