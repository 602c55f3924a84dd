use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use pure_core::{Fixed8, Hash, Transaction};
use tracing::{debug, warn};

use crate::ordering::{OrderingMode, TxPriority};

/// Configuration for the mempool
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the pool
    pub max_size: usize,
    /// Transaction expiry time in seconds
    pub expiry_seconds: u64,
    /// Ordering mode
    pub ordering_mode: OrderingMode,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_size: 50_000,
            expiry_seconds: 3600, // 1 hour
            ordering_mode: OrderingMode::FeeRate,
        }
    }
}

/// A verified transaction waiting in the pool
#[derive(Debug, Clone)]
pub struct PooledTransaction {
    pub tx: Transaction,
    pub hash: Hash,
    pub network_fee: Fixed8,
    pub size: usize,
    pub priority: TxPriority,
    pub added_at: u64,
}

#[derive(Default)]
struct PoolInner {
    by_hash: HashMap<Hash, PooledTransaction>,
    by_priority: BTreeMap<(TxPriority, Hash), Hash>,
    /// Hashes a proposal is waiting on; admitted even if the pool is full
    allowed: HashSet<Hash>,
    /// Hashes to fetch from peers
    requested: HashSet<Hash>,
    next_sequence: u64,
}

impl PoolInner {
    fn remove(&mut self, hash: &Hash) -> Option<PooledTransaction> {
        let pooled = self.by_hash.remove(hash)?;
        self.by_priority.remove(&(pooled.priority, *hash));
        Some(pooled)
    }

    fn evict_lowest_priority(&mut self) -> bool {
        let lowest = self
            .by_priority
            .iter()
            .map(|(_, hash)| *hash)
            .find(|hash| !self.allowed.contains(hash));
        match lowest {
            Some(hash) => {
                self.remove(&hash);
                warn!("Evicted lowest priority transaction {}", hash);
                true
            }
            None => false,
        }
    }
}

/// The transaction mempool, shared between the network side and consensus
pub struct Mempool {
    config: MempoolConfig,
    inner: RwLock<PoolInner>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Mempool {
            config,
            inner: RwLock::new(PoolInner::default()),
        }
    }

    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    // A panic elsewhere cannot leave the maps half-updated, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, PoolInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PoolInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a transaction that has already been verified against the ledger.
    ///
    /// `network_fee` is what the transaction pays beyond its system fee and
    /// determines its priority.
    pub fn add(&self, tx: Transaction, network_fee: Fixed8) -> Result<Hash, MempoolError> {
        if tx.is_miner() {
            return Err(MempoolError::InvalidTransaction);
        }
        let hash = tx.hash().map_err(|_| MempoolError::InvalidTransaction)?;
        let size = tx.size().map_err(|_| MempoolError::InvalidTransaction)?;

        let mut inner = self.write();
        if inner.by_hash.contains_key(&hash) {
            return Err(MempoolError::AlreadyExists);
        }

        if inner.by_hash.len() >= self.config.max_size
            && !inner.allowed.contains(&hash)
            && !inner.evict_lowest_priority()
        {
            return Err(MempoolError::PoolFull);
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let priority = TxPriority::new(network_fee, size, sequence);

        inner.requested.remove(&hash);
        inner.by_priority.insert((priority, hash), hash);
        inner.by_hash.insert(
            hash,
            PooledTransaction {
                tx,
                hash,
                network_fee,
                size,
                priority,
                added_at: Self::current_timestamp(),
            },
        );

        debug!("Added transaction {} to mempool", hash);
        Ok(hash)
    }

    /// Remove a transaction from the mempool
    pub fn remove(&self, hash: &Hash) -> Option<Transaction> {
        let removed = self.write().remove(hash).map(|p| p.tx);
        if removed.is_some() {
            debug!("Removed transaction {} from mempool", hash);
        }
        removed
    }

    /// Get a transaction by hash
    pub fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.read().by_hash.get(hash).map(|p| p.tx.clone())
    }

    /// Check if a transaction exists
    pub fn contains(&self, hash: &Hash) -> bool {
        self.read().by_hash.contains_key(hash)
    }

    /// Every pooled transaction, best first
    pub fn pooled(&self) -> Vec<PooledTransaction> {
        let inner = self.read();
        match self.config.ordering_mode {
            OrderingMode::FeeRate => inner
                .by_priority
                .iter()
                .rev()
                .filter_map(|(_, hash)| inner.by_hash.get(hash).cloned())
                .collect(),
            OrderingMode::Fifo => {
                let mut txs: Vec<_> = inner.by_hash.values().cloned().collect();
                txs.sort_by_key(|p| p.priority.sequence);
                txs
            }
        }
    }

    /// Get up to `max_count` transactions, best first
    pub fn get_transactions(&self, max_count: usize) -> Vec<Transaction> {
        self.pooled()
            .into_iter()
            .take(max_count)
            .map(|p| p.tx)
            .collect()
    }

    /// Mark hashes a proposal depends on so eviction leaves them alone
    pub fn allow_hashes(&self, hashes: &[Hash]) {
        self.write().allowed.extend(hashes.iter().copied());
    }

    /// Record hashes that should be fetched from peers
    pub fn request_missing(&self, hashes: &[Hash]) {
        let mut inner = self.write();
        for hash in hashes {
            if !inner.by_hash.contains_key(hash) {
                inner.requested.insert(*hash);
            }
        }
    }

    /// Drain the outstanding fetch requests
    pub fn take_requested(&self) -> Vec<Hash> {
        let mut requested: Vec<Hash> = self.write().requested.drain().collect();
        requested.sort();
        requested
    }

    /// Remove transactions that have been included in a block
    pub fn remove_committed(&self, tx_hashes: &[Hash]) {
        let mut inner = self.write();
        for hash in tx_hashes {
            inner.remove(hash);
            inner.requested.remove(hash);
        }
        // A new height invalidates any proposal the allow list served
        inner.allowed.clear();
    }

    /// Drop every transaction `keep` rejects, returning how many went
    pub fn retain(&self, mut keep: impl FnMut(&Transaction) -> bool) -> usize {
        let mut inner = self.write();
        let dropped: Vec<Hash> = inner
            .by_hash
            .values()
            .filter(|p| !keep(&p.tx))
            .map(|p| p.hash)
            .collect();
        for hash in &dropped {
            inner.remove(hash);
            debug!("Dropped transaction {} from mempool", hash);
        }
        dropped.len()
    }

    /// Remove expired transactions
    pub fn remove_expired(&self) {
        let expiry_threshold = Self::current_timestamp().saturating_sub(self.config.expiry_seconds);
        let mut inner = self.write();

        let expired: Vec<Hash> = inner
            .by_hash
            .iter()
            .filter(|(_, p)| p.added_at < expiry_threshold)
            .map(|(h, _)| *h)
            .collect();

        for hash in expired {
            inner.remove(&hash);
            warn!("Removed expired transaction {}", hash);
        }
    }

    /// Get current pool size
    pub fn size(&self) -> usize {
        self.read().by_hash.len()
    }
}

/// Mempool errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MempoolError {
    #[error("Transaction already exists in mempool")]
    AlreadyExists,

    #[error("Mempool is full")]
    PoolFull,

    #[error("Invalid transaction")]
    InvalidTransaction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pure_core::{asset_id_for, CoinReference, KeyPair, TransactionKind, TxOutput};

    fn create_test_tx(seed: u8) -> Transaction {
        let owner = KeyPair::from_seed(&[seed; 32]);
        let mut tx = Transaction::new(
            TransactionKind::Contract,
            vec![CoinReference::new(pure_core::hash_blake3(&[seed]), 0)],
            vec![TxOutput::new(
                asset_id_for("utility"),
                Fixed8::from_units(1),
                KeyPair::generate().public.script_hash(),
            )],
        );
        tx.sign(&owner.secret).unwrap();
        tx
    }

    #[test]
    fn test_add_and_get() {
        let mempool = Mempool::new(MempoolConfig::default());
        let tx = create_test_tx(1);
        let hash = mempool.add(tx.clone(), Fixed8::ZERO).unwrap();

        assert_eq!(mempool.get(&hash).unwrap(), tx);
        assert!(mempool.contains(&hash));
    }

    #[test]
    fn test_duplicate_rejection() {
        let mempool = Mempool::new(MempoolConfig::default());
        let tx = create_test_tx(1);

        mempool.add(tx.clone(), Fixed8::ZERO).unwrap();
        let result = mempool.add(tx, Fixed8::ONE);

        assert!(matches!(result, Err(MempoolError::AlreadyExists)));
    }

    #[test]
    fn test_reward_transactions_not_pooled() {
        let mempool = Mempool::new(MempoolConfig::default());
        let result = mempool.add(Transaction::miner(1, vec![]), Fixed8::ZERO);
        assert!(matches!(result, Err(MempoolError::InvalidTransaction)));
    }

    #[test]
    fn test_remove() {
        let mempool = Mempool::new(MempoolConfig::default());
        let hash = mempool.add(create_test_tx(1), Fixed8::ZERO).unwrap();

        mempool.remove(&hash);
        assert!(!mempool.contains(&hash));
        assert_eq!(mempool.size(), 0);
    }

    #[test]
    fn test_ordering_by_fee() {
        let mempool = Mempool::new(MempoolConfig::default());

        mempool.add(create_test_tx(1), Fixed8::from_raw(10_000)).unwrap();
        let high = mempool.add(create_test_tx(2), Fixed8::from_raw(1_000_000)).unwrap();
        mempool.add(create_test_tx(3), Fixed8::from_raw(100_000)).unwrap();

        let pooled = mempool.pooled();
        assert_eq!(pooled.len(), 3);
        assert_eq!(pooled[0].hash, high);
        assert!(pooled[0].priority >= pooled[1].priority);
        assert!(pooled[1].priority >= pooled[2].priority);
    }

    #[test]
    fn test_fifo_ordering() {
        let config = MempoolConfig {
            ordering_mode: OrderingMode::Fifo,
            ..Default::default()
        };
        let mempool = Mempool::new(config);
        let first = mempool.add(create_test_tx(1), Fixed8::ZERO).unwrap();
        mempool.add(create_test_tx(2), Fixed8::ONE).unwrap();

        assert_eq!(mempool.pooled()[0].hash, first);
    }

    #[test]
    fn test_full_pool_evicts_lowest() {
        let config = MempoolConfig {
            max_size: 2,
            ..Default::default()
        };
        let mempool = Mempool::new(config);
        let cheap = mempool.add(create_test_tx(1), Fixed8::ZERO).unwrap();
        mempool.add(create_test_tx(2), Fixed8::ONE).unwrap();
        mempool.add(create_test_tx(3), Fixed8::ONE).unwrap();

        assert_eq!(mempool.size(), 2);
        assert!(!mempool.contains(&cheap));
    }

    #[test]
    fn test_allowed_hashes_survive_eviction() {
        let config = MempoolConfig {
            max_size: 1,
            ..Default::default()
        };
        let mempool = Mempool::new(config);
        let needed = mempool.add(create_test_tx(1), Fixed8::ZERO).unwrap();
        mempool.allow_hashes(&[needed]);

        let result = mempool.add(create_test_tx(2), Fixed8::ONE);
        assert!(matches!(result, Err(MempoolError::PoolFull)));
        assert!(mempool.contains(&needed));
    }

    #[test]
    fn test_requested_hashes_cleared_on_arrival() {
        let mempool = Mempool::new(MempoolConfig::default());
        let tx = create_test_tx(1);
        let hash = tx.hash().unwrap();
        let other = pure_core::hash_blake3(b"elsewhere");

        mempool.request_missing(&[hash, other]);
        mempool.add(tx, Fixed8::ZERO).unwrap();

        assert_eq!(mempool.take_requested(), vec![other]);
        assert!(mempool.take_requested().is_empty());
    }

    #[test]
    fn test_remove_committed() {
        let mempool = Mempool::new(MempoolConfig::default());
        let a = mempool.add(create_test_tx(1), Fixed8::ZERO).unwrap();
        let b = mempool.add(create_test_tx(2), Fixed8::ZERO).unwrap();

        mempool.remove_committed(&[a]);
        assert!(!mempool.contains(&a));
        assert!(mempool.contains(&b));
    }

    #[test]
    fn test_retain_drops_rejected() {
        let mempool = Mempool::new(MempoolConfig::default());
        let stale = mempool.add(create_test_tx(1), Fixed8::ZERO).unwrap();
        let fresh = mempool.add(create_test_tx(2), Fixed8::ZERO).unwrap();

        let dropped = mempool.retain(|tx| tx.hash().map_or(false, |h| h != stale));
        assert_eq!(dropped, 1);
        assert!(!mempool.contains(&stale));
        assert!(mempool.contains(&fresh));
        assert_eq!(mempool.pooled().len(), 1);
    }
}
