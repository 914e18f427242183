//! Wire messages exchanged over the WebSocket RPC

use borsh::{BorshDeserialize, BorshSerialize};
use peerchain_consensus::{Block, Update};

/// One frame on the wire
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum WireMessage {
    /// Non-verifier -> verifier
    VerifyUpdate(Update),
    /// Verifier -> every other node
    RegisterBlock(Block),
    /// Request accepted; processing continues in the background
    Ack,
    /// Request could not be decoded
    Reject { reason: String },
}

impl WireMessage {
    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        borsh::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> std::io::Result<Self> {
        borsh::from_slice(data)
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireMessage::VerifyUpdate(_) => "VerifyUpdate",
            WireMessage::RegisterBlock(_) => "RegisterBlock",
            WireMessage::Ack => "Ack",
            WireMessage::Reject { .. } => "Reject",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerchain_consensus::GENESIS_HASH;

    #[test]
    fn test_block_survives_the_wire() {
        let block = Block::new(3, vec![1, 2, 3], 0, GENESIS_HASH);
        let bytes = WireMessage::RegisterBlock(block.clone()).to_bytes().unwrap();

        match WireMessage::from_bytes(&bytes).unwrap() {
            WireMessage::RegisterBlock(decoded) => {
                assert_eq!(decoded, block);
                assert!(decoded.is_sealed());
            }
            other => panic!("unexpected message {}", other.name()),
        }
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let bytes = WireMessage::VerifyUpdate(Update::new(1, vec![9; 16], 2))
            .to_bytes()
            .unwrap();
        assert!(WireMessage::from_bytes(&bytes[..bytes.len() - 4]).is_err());
        assert!(WireMessage::from_bytes(&[]).is_err());
    }
}
