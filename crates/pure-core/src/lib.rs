//! Pure Core - Core types, cryptography, and serialization
//!
//! This crate provides the foundational types shared by the ledger, the
//! transaction pool and the dBFT consensus engine of the Pure chain.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{
    hash_blake3, merkle_root, sign, verify, Hash, KeyPair, PublicKey, ScriptHash, SecretKey, Sig,
};
pub use error::CoreError;
pub use types::*;
