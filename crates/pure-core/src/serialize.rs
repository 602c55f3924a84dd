use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Encode to the canonical wire/hash representation (bincode, fixed-width
/// little endian integers).
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Decode from the canonical representation.
///
/// Trailing bytes are rejected so that two different byte strings can never
/// decode to the same value.
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    use bincode::Options;

    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Size of the canonical encoding in bytes
pub fn encoded_len<T: Serialize>(value: &T) -> Result<usize, CoreError> {
    bincode::serialized_size(value)
        .map(|n| n as usize)
        .map_err(|e| CoreError::Serialization(e.to_string()))
}
