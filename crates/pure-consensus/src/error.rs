use pure_core::{AssetId, CoinReference, Fixed8, Hash};
use thiserror::Error;

use crate::ports::WalletError;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid quorum certificate: {0}")]
    InvalidQc(String),

    #[error("Insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    #[error("Invalid signature from validator {0}")]
    InvalidSignature(usize),

    #[error("Validator index {0} is outside the roster")]
    UnknownValidator(usize),

    #[error("Not a validator for this round")]
    NotValidator,

    #[error("Unknown header: {0}")]
    UnknownHeader(Hash),

    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetId),

    #[error("Input {}:{} cannot be resolved", .0.prev_hash, .0.prev_index)]
    UnresolvedInput(CoinReference),

    #[error("Fee totals overflow")]
    FeeOverflow,

    #[error("Flat fees need {required} utility, only {collected} collected")]
    UnfundedFees { required: Fixed8, collected: Fixed8 },

    #[error("Reward transaction mismatch: {0}")]
    RewardMismatch(String),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("State error: {0}")]
    State(#[from] pure_state::StateError),

    #[error("Core error: {0}")]
    Core(#[from] pure_core::CoreError),
}
