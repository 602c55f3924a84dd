//! Pure Mempool - Transaction pool
//!
//! This crate holds verified transactions waiting for a proposer, ordered by
//! the network fee they pay per byte.

pub mod ordering;
pub mod pool;

pub use ordering::{OrderingMode, TxPriority};
pub use pool::{Mempool, MempoolConfig, MempoolError, PooledTransaction};
