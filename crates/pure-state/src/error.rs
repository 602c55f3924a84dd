use pure_core::{AssetId, CoinReference, Fixed8, Hash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Block height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },

    #[error("Previous hash mismatch")]
    PrevHashMismatch,

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Transaction already committed: {0}")]
    DuplicateTransaction(Hash),

    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetId),

    #[error("Input {}:{} is unknown or already spent", .0.prev_hash, .0.prev_index)]
    UnspendableInput(CoinReference),

    #[error("Input {}:{} is spent twice", .0.prev_hash, .0.prev_index)]
    DoubleSpend(CoinReference),

    #[error("Missing witness for {0}")]
    MissingWitness(String),

    #[error("Outputs exceed inputs for asset {0}")]
    Overspend(AssetId),

    #[error("Fees need {required}, only {left} left after outputs")]
    InsufficientFee { required: Fixed8, left: Fixed8 },

    #[error("Core error: {0}")]
    Core(#[from] pure_core::CoreError),
}
