//! Pure State - In-memory ledger
//!
//! This crate provides the chain state consulted by consensus: headers,
//! the transaction index, unspent outputs, registered assets and the
//! validator roster.

pub mod error;
pub mod state;

pub use error::StateError;
pub use state::ChainState;
