use pure_core::{PublicKey, ScriptHash};

/// Largest number of Byzantine validators a roster of `n` tolerates
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Votes needed for a decision, `n - (n-1)/3`
pub fn quorum(n: usize) -> usize {
    n - max_faulty(n)
}

/// Multi-signature address of a validator set: `quorum(n)`-of-`n` over the
/// sorted keys. Blocks name the set for the next height through this address.
pub fn consensus_address(validators: &[PublicKey]) -> ScriptHash {
    let mut keys = validators.to_vec();
    keys.sort();

    // Counts are encoded as u16, rosters never get close to that
    let m = u16::try_from(quorum(keys.len())).unwrap_or(u16::MAX);
    let n = u16::try_from(keys.len()).unwrap_or(u16::MAX);

    let mut descriptor = Vec::with_capacity(4 + keys.len() * 32);
    descriptor.extend_from_slice(&m.to_le_bytes());
    for key in &keys {
        descriptor.extend_from_slice(key.as_bytes());
    }
    descriptor.extend_from_slice(&n.to_le_bytes());
    ScriptHash::of(&descriptor)
}
