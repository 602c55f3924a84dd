use std::cmp::{Ordering, Reverse};

use pure_core::Fixed8;

/// Transaction priority for ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxPriority {
    /// Network fee per byte, in raw `Fixed8` units (higher is better)
    pub fee_rate: i64,
    /// Admission sequence number (earlier is better for tie-breaking)
    pub sequence: u64,
}

impl TxPriority {
    pub fn new(network_fee: Fixed8, size: usize, sequence: u64) -> Self {
        TxPriority {
            fee_rate: fee_per_byte(network_fee, size),
            sequence,
        }
    }
}

impl Ord for TxPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.fee_rate, Reverse(self.sequence)).cmp(&(other.fee_rate, Reverse(other.sequence)))
    }
}

impl PartialOrd for TxPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Network fee divided by the encoded size
pub fn fee_per_byte(network_fee: Fixed8, size: usize) -> i64 {
    match i64::try_from(size) {
        Ok(size) if size > 0 => network_fee.raw() / size,
        _ => network_fee.raw(),
    }
}

/// Ordering mode for transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingMode {
    /// Order by fee rate (highest first)
    FeeRate,
    /// Order by admission (FIFO)
    Fifo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_fee_rate_wins() {
        let cheap = TxPriority::new(Fixed8::from_raw(1_000), 100, 0);
        let rich = TxPriority::new(Fixed8::from_raw(5_000), 100, 1);
        assert!(rich > cheap);
    }

    #[test]
    fn test_earlier_wins_on_equal_rate() {
        let first = TxPriority::new(Fixed8::from_raw(1_000), 100, 0);
        let second = TxPriority::new(Fixed8::from_raw(1_000), 100, 1);
        assert!(first > second);
    }

    #[test]
    fn test_zero_size_keeps_fee() {
        assert_eq!(fee_per_byte(Fixed8::from_raw(42), 0), 42);
    }
}
