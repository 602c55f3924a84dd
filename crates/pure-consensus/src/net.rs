use std::fmt;

use pure_core::serialize;
use pure_core::{hash_blake3, verify, CoreError, Hash, PublicKey, ScriptHash, Sig, Transaction};
use serde::{Deserialize, Serialize};

/// Messages exchanged between validators during a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// Vote to abandon `view_number` for `new_view_number`
    ChangeView { view_number: u8, new_view_number: u8 },
    /// The primary's proposal
    PrepareRequest {
        view_number: u8,
        nonce: u64,
        next_consensus: ScriptHash,
        transaction_hashes: Vec<Hash>,
        miner_transaction: Transaction,
        /// Primary's signature over the proposed header
        signature: Sig,
    },
    /// A backup's signature over the header it computed from the proposal
    PrepareResponse { view_number: u8, signature: Sig },
}

impl ConsensusMessage {
    pub fn view_number(&self) -> u8 {
        match self {
            ConsensusMessage::ChangeView { view_number, .. }
            | ConsensusMessage::PrepareRequest { view_number, .. }
            | ConsensusMessage::PrepareResponse { view_number, .. } => *view_number,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            ConsensusMessage::ChangeView { .. } => MessageKind::ChangeView,
            ConsensusMessage::PrepareRequest { .. } => MessageKind::PrepareRequest,
            ConsensusMessage::PrepareResponse { .. } => MessageKind::PrepareResponse,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_bytes(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ChangeView,
    PrepareRequest,
    PrepareResponse,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::ChangeView => "ChangeView",
            MessageKind::PrepareRequest => "PrepareRequest",
            MessageKind::PrepareResponse => "PrepareResponse",
        };
        f.write_str(name)
    }
}

/// Signed envelope carrying one encoded [`ConsensusMessage`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusPayload {
    pub version: u32,
    pub prev_hash: Hash,
    pub block_index: u64,
    pub validator_index: u16,
    pub timestamp: u64,
    pub data: Vec<u8>,
    /// Sender's signature over everything above
    pub witness: Sig,
}

#[derive(Serialize)]
struct UnsignedPayload<'a> {
    version: u32,
    prev_hash: &'a Hash,
    block_index: u64,
    validator_index: u16,
    timestamp: u64,
    data: &'a [u8],
}

impl ConsensusPayload {
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(&UnsignedPayload {
            version: self.version,
            prev_hash: &self.prev_hash,
            block_index: self.block_index,
            validator_index: self.validator_index,
            timestamp: self.timestamp,
            data: &self.data,
        })
    }

    /// Inventory hash used by the relay layer
    pub fn hash(&self) -> Result<Hash, CoreError> {
        Ok(hash_blake3(&self.unsigned_bytes()?))
    }

    pub fn verify_witness(&self, sender: &PublicKey) -> Result<(), CoreError> {
        verify(sender, &self.unsigned_bytes()?, &self.witness)
    }

    pub fn message(&self) -> Result<ConsensusMessage, CoreError> {
        ConsensusMessage::decode(&self.data)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pure_core::{sign, KeyPair};

    fn envelope(kp: &KeyPair, message: &ConsensusMessage) -> ConsensusPayload {
        let mut payload = ConsensusPayload {
            version: 0,
            prev_hash: hash_blake3(b"prev"),
            block_index: 100,
            validator_index: 2,
            timestamp: 1_700_000_000,
            data: message.encode().unwrap(),
            witness: Sig::default(),
        };
        payload.witness = sign(&kp.secret, &payload.unsigned_bytes().unwrap());
        payload
    }

    #[test]
    fn test_wire_envelope_decodes_and_verifies() {
        let kp = KeyPair::generate();
        let message = ConsensusMessage::PrepareRequest {
            view_number: 1,
            nonce: 42,
            next_consensus: ScriptHash::of(b"next"),
            transaction_hashes: vec![hash_blake3(b"reward"), hash_blake3(b"tx")],
            miner_transaction: Transaction::miner(42, vec![]),
            signature: Sig::default(),
        };
        let payload = envelope(&kp, &message);

        let received = ConsensusPayload::decode(&payload.encode().unwrap()).unwrap();
        received.verify_witness(&kp.public).unwrap();
        let decoded = received.message().unwrap();
        assert_eq!(decoded.kind(), MessageKind::PrepareRequest);
        assert_eq!(decoded.view_number(), 1);
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_witness_covers_envelope_fields() {
        let kp = KeyPair::generate();
        let message = ConsensusMessage::ChangeView {
            view_number: 0,
            new_view_number: 1,
        };
        let mut payload = envelope(&kp, &message);
        payload.block_index += 1;
        assert!(payload.verify_witness(&kp.public).is_err());
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(ConsensusMessage::decode(&[0xff, 0xff, 0xff, 0xff, 1]).is_err());
        assert!(ConsensusMessage::decode(&[]).is_err());

        // Trailing bytes after a valid message are malformed too
        let mut bytes = ConsensusMessage::PrepareResponse {
            view_number: 0,
            signature: Sig::default(),
        }
        .encode()
        .unwrap();
        bytes.push(0);
        assert!(ConsensusMessage::decode(&bytes).is_err());
    }
}
