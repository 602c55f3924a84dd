use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, merkle_root, Hash, PublicKey, ScriptHash, Sig};
use crate::error::CoreError;
use crate::serialize;
use crate::types::asset::AssetState;
use crate::types::transaction::{Transaction, TransactionKind, TxOutput};

/// Block header. Validators sign the hash of this structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Hash of the previous header (zeros for genesis)
    pub prev_hash: Hash,
    /// Merkle root over the ordered transaction hashes, reward first
    pub merkle_root: Hash,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    /// Block height (0 for genesis)
    pub index: u64,
    /// Proposal nonce
    pub consensus_data: u64,
    /// Multi-signature address of the validators for the next block
    pub next_consensus: ScriptHash,
}

impl BlockHeader {
    pub fn hash(&self) -> Result<Hash, CoreError> {
        Ok(hash_blake3(&serialize::to_bytes(self)?))
    }
}

/// A signature from the validator at `validator_index` in the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSignature {
    pub validator_index: u16,
    pub signature: Sig,
}

/// Quorum of validator signatures over a header hash, in roster order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub signatures: Vec<ValidatorSignature>,
}

impl QuorumCertificate {
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }
}

/// A complete block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub qc: QuorumCertificate,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, qc: QuorumCertificate, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            qc,
            transactions,
        }
    }

    pub fn hash(&self) -> Result<Hash, CoreError> {
        self.header.hash()
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn transaction_hashes(&self) -> Result<Vec<Hash>, CoreError> {
        self.transactions.iter().map(Transaction::hash).collect()
    }

    pub fn compute_merkle_root(&self) -> Result<Hash, CoreError> {
        Ok(merkle_root(&self.transaction_hashes()?))
    }

    pub fn verify_merkle_root(&self) -> Result<bool, CoreError> {
        Ok(self.compute_merkle_root()? == self.header.merkle_root)
    }

    /// Exactly one reward transaction, in first position
    pub fn has_reward_first(&self) -> bool {
        match self.transactions.split_first() {
            Some((first, rest)) => first.is_miner() && !rest.iter().any(Transaction::is_miner),
            None => false,
        }
    }
}

/// Genesis block parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub timestamp: u64,
    pub validators: Vec<PublicKey>,
    pub assets: Vec<AssetState>,
    /// Initial outputs created by the genesis issue transaction
    pub allocations: Vec<TxOutput>,
    /// Consensus address of `validators`
    pub next_consensus: ScriptHash,
}

impl GenesisConfig {
    pub fn create_genesis_block(&self) -> Result<Block, CoreError> {
        let transactions = vec![
            Transaction::miner(0, Vec::new()),
            Transaction::new(TransactionKind::Issue, Vec::new(), self.allocations.clone()),
        ];
        let hashes: Result<Vec<Hash>, _> = transactions.iter().map(Transaction::hash).collect();

        let header = BlockHeader {
            version: 0,
            prev_hash: Hash::ZERO,
            merkle_root: merkle_root(&hashes?),
            timestamp: self.timestamp,
            index: 0,
            consensus_data: 0,
            next_consensus: self.next_consensus,
        };

        Ok(Block::new(header, QuorumCertificate::default(), transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::asset::asset_id_for;
    use crate::types::fixed8::Fixed8;

    fn genesis() -> GenesisConfig {
        let faucet = KeyPair::generate();
        GenesisConfig {
            timestamp: 1_700_000_000,
            validators: vec![KeyPair::generate().public],
            assets: vec![AssetState::native("utility")],
            allocations: vec![TxOutput::new(
                asset_id_for("utility"),
                Fixed8::from_units(1_000),
                faucet.public.script_hash(),
            )],
            next_consensus: ScriptHash::ZERO,
        }
    }

    #[test]
    fn test_genesis_block_shape() {
        let block = genesis().create_genesis_block().unwrap();
        assert_eq!(block.index(), 0);
        assert_eq!(block.header.prev_hash, Hash::ZERO);
        assert!(block.has_reward_first());
        assert!(block.verify_merkle_root().unwrap());
    }

    #[test]
    fn test_header_hash_covers_every_field() {
        let block = genesis().create_genesis_block().unwrap();
        let base = block.header.hash().unwrap();

        let mut changed = block.header.clone();
        changed.consensus_data = 1;
        assert_ne!(changed.hash().unwrap(), base);

        let mut changed = block.header.clone();
        changed.timestamp += 1;
        assert_ne!(changed.hash().unwrap(), base);
    }

    #[test]
    fn test_reward_must_be_first_and_unique() {
        let mut block = genesis().create_genesis_block().unwrap();
        block.transactions.reverse();
        assert!(!block.has_reward_first());

        block.transactions.reverse();
        block.transactions.push(Transaction::miner(9, vec![]));
        assert!(!block.has_reward_first());

        block.transactions.clear();
        assert!(!block.has_reward_first());
    }
}
