pub mod hash;
pub mod keys;
pub mod signature;

pub use hash::{hash_blake3, merkle_root, Hash, ScriptHash};
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use signature::{sign, verify, Sig};
