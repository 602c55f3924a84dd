pub mod asset;
pub mod block;
pub mod fixed8;
pub mod transaction;

pub use asset::{asset_id_for, AssetId, AssetState, GOVERNING_ASSET, UTILITY_ASSET};
pub use block::{Block, BlockHeader, GenesisConfig, QuorumCertificate, ValidatorSignature};
pub use fixed8::Fixed8;
pub use transaction::{CoinReference, JoinSplit, Transaction, TransactionKind, TxOutput, Witness};
