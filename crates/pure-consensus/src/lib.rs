//! Pure Consensus - dBFT block agreement
//!
//! This crate provides the per-node consensus state machine: round
//! bookkeeping, proposal assembly with fee distribution, vote collection,
//! view changes and the signed message codec exchanged between validators.

pub mod block_builder;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fees;
pub mod net;
pub mod ports;
mod proposer;
pub mod qc;
pub mod quorum;
pub mod runner;
pub mod service;
pub mod timer;
mod validator;

pub use block_builder::{assemble_block, BlockAssembler, HeaderTemplate};
pub use config::ConsensusConfig;
pub use context::{Role, RoundContext, RoundState};
pub use error::ConsensusError;
pub use events::ConsensusEvent;
pub use fees::{AssetRegistry, FeeDistributor, FeePolicy, FeeTier, RewardSplit, Share};
pub use net::{ConsensusMessage, ConsensusPayload, MessageKind};
pub use ports::{
    AcceptAll, Clock, KeyPairWallet, Ledger, SystemClock, TimerScheduler, TransactionPolicy,
    TransactionPool, Transport, Wallet, WalletError,
};
pub use qc::{collect_qc, verify_qc};
pub use quorum::{consensus_address, max_faulty, quorum};
pub use service::ConsensusService;
pub use timer::{backoff, TimerTick, TokioTimer};
