use pure_core::Transaction;

use crate::net::ConsensusPayload;
use crate::timer::TimerTick;

/// Triggers the consensus service reacts to, delivered through one channel
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// The ledger persisted a new block
    BlockPersisted,
    /// An envelope arrived from a peer
    Payload(ConsensusPayload),
    /// A transaction arrived from a peer
    Transaction(Transaction),
    /// The round timer fired
    Timeout(TimerTick),
}
