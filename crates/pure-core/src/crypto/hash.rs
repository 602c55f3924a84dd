use serde::{Deserialize, Serialize};

/// Shared byte-array plumbing for the fixed-width identifiers.
macro_rules! fixed_bytes {
    ($name:ident, $len:expr) => {
        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn from_slice(slice: &[u8]) -> Result<Self, $crate::error::CoreError> {
                let bytes: [u8; $len] =
                    slice.try_into().map_err(|_| $crate::error::CoreError::InvalidLength {
                        expected: $len,
                        got: slice.len(),
                    })?;
                Ok($name(bytes))
            }

            pub fn from_hex(s: &str) -> Result<Self, $crate::error::CoreError> {
                Self::from_slice(&hex::decode(s)?)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }
    };
}

pub(crate) use fixed_bytes;

/// A 32-byte Blake3 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

fixed_bytes!(Hash, 32);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// First eight bytes read as a little-endian integer
    pub fn low_u64(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(word)
    }
}

/// A 20-byte address: the truncated digest of a verification descriptor
/// (a single public key or an m-of-n validator set).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ScriptHash(pub [u8; 20]);

fixed_bytes!(ScriptHash, 20);

impl ScriptHash {
    pub const ZERO: ScriptHash = ScriptHash([0u8; 20]);

    /// Address of an arbitrary verification descriptor
    pub fn of(descriptor: &[u8]) -> Self {
        let digest = hash_blake3(descriptor);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.0[..20]);
        ScriptHash(bytes)
    }
}

/// Compute Blake3 hash of data
pub fn hash_blake3(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&left.0);
    hasher.update(&right.0);
    Hash(*hasher.finalize().as_bytes())
}

/// Merkle root over an ordered hash list.
///
/// An odd node at any level is paired with itself. The empty list maps to
/// `Hash::ZERO` and a single hash is its own root.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    match hashes {
        [] => Hash::ZERO,
        [only] => *only,
        _ => {
            let mut level = hashes.to_vec();
            while level.len() > 1 {
                level = level
                    .chunks(2)
                    .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                    .collect();
            }
            level[0]
        }
    }
}
