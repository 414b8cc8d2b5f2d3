//! Peer protocol messages
//!
//! Each message is a JSON document with exactly one top-level key:
//!
//! ```text
//! {"newTransaction": Transaction}
//! {"newBlock": Block}
//! {"resolveBlockRequest": {"blockID": id}}
//! {"resolveBlockResponse": {"resolvedBlock": Block}}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::validation::Transaction;

/// Maximum message size (4 MB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message of {0} bytes exceeds the size limit")]
    TooLarge(usize),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerMessage {
    NewTransaction(Transaction),
    NewBlock(Block),
    ResolveBlockRequest {
        #[serde(rename = "blockID")]
        block_id: Hash,
    },
    ResolveBlockResponse {
        #[serde(rename = "resolvedBlock")]
        resolved_block: Block,
    },
}

impl PeerMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(bytes.len()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::NewTransaction(_) => "newTransaction",
            PeerMessage::NewBlock(_) => "newBlock",
            PeerMessage::ResolveBlockRequest { .. } => "resolveBlockRequest",
            PeerMessage::ResolveBlockResponse { .. } => "resolveBlockResponse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::node::{create_genesis_block, GenesisConfig};

    #[test]
    fn test_wire_shapes() {
        let id = Hash::random();
        let request = PeerMessage::ResolveBlockRequest { block_id: id };
        let value: serde_json::Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({ "resolveBlockRequest": { "blockID": id.to_hex() } }));

        let genesis = create_genesis_block(&GenesisConfig::default());
        let response = PeerMessage::ResolveBlockResponse { resolved_block: genesis };
        let value: serde_json::Value = serde_json::from_slice(&response.to_bytes().unwrap()).unwrap();
        assert!(value["resolveBlockResponse"]["resolvedBlock"].is_object());
    }

    #[test]
    fn test_decode_each_shape() {
        let key = PrivateKey::generate();
        let tx = Transaction::new(key.public_key(), key.public_key(), 3, 0, 0).signed(&key).unwrap();
        let block = create_genesis_block(&GenesisConfig::default());

        for message in [
            PeerMessage::NewTransaction(tx),
            PeerMessage::NewBlock(block.clone()),
            PeerMessage::ResolveBlockRequest { block_id: block.id },
            PeerMessage::ResolveBlockResponse { resolved_block: block },
        ] {
            let decoded = PeerMessage::from_bytes(&message.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded.kind(), message.kind());
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_unknown_shape_rejected() {
        assert!(matches!(
            PeerMessage::from_bytes(br#"{"ping": 1}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            PeerMessage::from_bytes(br#"{"resolveBlockRequest": {}}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let bytes = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(PeerMessage::from_bytes(&bytes), Err(ProtocolError::TooLarge(_))));
    }
}
