use std::time::Duration;

use crate::fees::FeePolicy;

/// Configuration for the consensus service
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Protocol version carried in every envelope
    pub version: u32,
    /// Target interval between blocks; also the base of the view backoff
    pub block_time: Duration,
    /// Upper bound on a proposal, reward transaction included
    pub max_transactions_per_block: usize,
    /// How far ahead of the local clock a proposal timestamp may be
    pub max_clock_skew: Duration,
    pub fee_policy: FeePolicy,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            version: 0,
            block_time: Duration::from_secs(15),
            max_transactions_per_block: 500,
            max_clock_skew: Duration::from_secs(10 * 60),
            fee_policy: FeePolicy::default(),
        }
    }
}
