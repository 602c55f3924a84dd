//! Collaborators the consensus service talks to.
//!
//! The service never does I/O itself. Everything it needs from the ledger,
//! the transaction pool, the wallet and the network comes through these
//! traits, and every call is expected to return without blocking.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pure_core::{
    sign, AssetId, AssetState, Block, BlockHeader, CoinReference, Hash, KeyPair, PublicKey,
    ScriptHash, Sig, Transaction, TxOutput,
};
use pure_mempool::{Mempool, PooledTransaction};
use pure_state::ChainState;
use thiserror::Error;
use tracing::debug;

use crate::fees::AssetRegistry;
use crate::net::ConsensusPayload;
use crate::timer::TimerTick;

/// Read access to the chain the service builds on
pub trait Ledger: AssetRegistry {
    /// Height of the last persisted block
    fn height(&self) -> u64;

    fn current_block_hash(&self) -> Hash;

    fn header(&self, hash: &Hash) -> Option<BlockHeader>;

    /// Roster that validates the block at `height`
    fn validators(&self, height: u64) -> Vec<PublicKey>;

    /// Validators implied for the next height once `transactions` are applied
    fn next_validators(&self, transactions: &[&Transaction]) -> Vec<PublicKey>;

    fn contains_transaction(&self, hash: &Hash) -> bool;

    /// Whether `tx` is valid next to the `others` already collected
    fn verify_transaction(&self, tx: &Transaction, others: &[&Transaction]) -> bool;
}

pub trait TransactionPool: Send + Sync {
    /// Verified transactions, best first
    fn pooled(&self) -> Vec<PooledTransaction>;

    fn get(&self, hash: &Hash) -> Option<Transaction>;

    /// Keep these hashes available while a proposal waits on them
    fn allow_hashes(&self, hashes: &[Hash]);

    /// Ask peers for transactions this node is missing
    fn request_missing(&self, hashes: &[Hash]);
}

#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("No key for {0}")]
    KeyNotFound(PublicKey),

    #[error("Wallet is locked")]
    Locked,
}

pub trait Wallet: Send + Sync {
    fn contains_key(&self, key: &PublicKey) -> bool;

    fn sign(&self, key: &PublicKey, message: &[u8]) -> Result<Sig, WalletError>;

    /// Address that receives the proposer's share of block rewards
    fn change_address(&self) -> ScriptHash;
}

/// Outbound side of the peer network. Both calls report whether the
/// message was accepted for delivery.
pub trait Transport: Send + Sync {
    fn broadcast(&self, payload: ConsensusPayload) -> bool;

    fn relay_block(&self, block: Block) -> bool;
}

/// Local admission rules applied on top of ledger verification
pub trait TransactionPolicy: Send + Sync {
    fn check(&self, _tx: &Transaction) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl TransactionPolicy for AcceptAll {}

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

pub trait TimerScheduler: Send {
    /// Arm the round timer, replacing whatever was armed before
    fn schedule(&mut self, tick: TimerTick, after: Duration);
}

/// Wallet holding a single validator key
pub struct KeyPairWallet {
    key: KeyPair,
    change_address: ScriptHash,
}

impl KeyPairWallet {
    pub fn new(key: KeyPair) -> Self {
        let change_address = key.public.script_hash();
        KeyPairWallet {
            key,
            change_address,
        }
    }

    pub fn with_change_address(mut self, address: ScriptHash) -> Self {
        self.change_address = address;
        self
    }
}

impl Wallet for KeyPairWallet {
    fn contains_key(&self, key: &PublicKey) -> bool {
        &self.key.public == key
    }

    fn sign(&self, key: &PublicKey, message: &[u8]) -> Result<Sig, WalletError> {
        if !self.contains_key(key) {
            return Err(WalletError::KeyNotFound(*key));
        }
        Ok(sign(&self.key.secret, message))
    }

    fn change_address(&self) -> ScriptHash {
        self.change_address
    }
}

impl AssetRegistry for ChainState {
    fn asset(&self, id: &AssetId) -> Option<AssetState> {
        ChainState::asset(self, id).cloned()
    }

    fn resolve_output(&self, reference: &CoinReference) -> Option<TxOutput> {
        ChainState::resolve_output(self, reference).cloned()
    }
}

impl Ledger for ChainState {
    fn height(&self) -> u64 {
        ChainState::height(self)
    }

    fn current_block_hash(&self) -> Hash {
        self.head_hash()
    }

    fn header(&self, hash: &Hash) -> Option<BlockHeader> {
        ChainState::header(self, hash).cloned()
    }

    fn validators(&self, _height: u64) -> Vec<PublicKey> {
        self.validators.clone()
    }

    fn next_validators(&self, _transactions: &[&Transaction]) -> Vec<PublicKey> {
        self.validators.clone()
    }

    fn contains_transaction(&self, hash: &Hash) -> bool {
        ChainState::contains_transaction(self, hash)
    }

    fn verify_transaction(&self, tx: &Transaction, others: &[&Transaction]) -> bool {
        match ChainState::verify_transaction(self, tx, others) {
            Ok(()) => true,
            Err(e) => {
                debug!("Transaction failed verification: {}", e);
                false
            }
        }
    }
}

impl TransactionPool for Mempool {
    fn pooled(&self) -> Vec<PooledTransaction> {
        Mempool::pooled(self)
    }

    fn get(&self, hash: &Hash) -> Option<Transaction> {
        Mempool::get(self, hash)
    }

    fn allow_hashes(&self, hashes: &[Hash]) {
        Mempool::allow_hashes(self, hashes)
    }

    fn request_missing(&self, hashes: &[Hash]) {
        Mempool::request_missing(self, hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_signs_only_its_key() {
        let key = KeyPair::generate();
        let public = key.public;
        let wallet = KeyPairWallet::new(key);

        let sig = wallet.sign(&public, b"header").unwrap();
        pure_core::verify(&public, b"header", &sig).unwrap();

        let stranger = KeyPair::generate().public;
        assert!(!wallet.contains_key(&stranger));
        assert!(matches!(
            wallet.sign(&stranger, b"header"),
            Err(WalletError::KeyNotFound(_))
        ));
        assert_eq!(wallet.change_address(), public.script_hash());
    }

    #[test]
    fn test_default_policy_accepts() {
        assert!(AcceptAll.check(&Transaction::miner(0, vec![])));
    }
}
