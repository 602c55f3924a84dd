use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, Hash, ScriptHash};
use crate::types::fixed8::Fixed8;

/// Assets are identified by the hash of their registration
pub type AssetId = Hash;

/// Native asset whose net fee goes to the proposer in full
pub const GOVERNING_ASSET: &str = "governing";
/// Native asset every fee is paid in
pub const UTILITY_ASSET: &str = "utility";

/// Registered asset and its fee schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetState {
    pub asset_id: AssetId,
    pub name: String,
    /// Flat fee charged per transaction that moves this asset
    pub fee: Fixed8,
    /// Flat fee charged per shielded transaction that moves this asset
    pub anonymous_fee: Fixed8,
    /// Receives the beneficiary share of the asset's fees
    pub fee_address: ScriptHash,
}

impl AssetState {
    pub fn new(name: impl Into<String>, fee: Fixed8, anonymous_fee: Fixed8, fee_address: ScriptHash) -> Self {
        let name = name.into();
        AssetState {
            asset_id: asset_id_for(&name),
            name,
            fee,
            anonymous_fee,
            fee_address,
        }
    }

    /// Asset without a flat fee (the native assets)
    pub fn native(name: impl Into<String>) -> Self {
        Self::new(name, Fixed8::ZERO, Fixed8::ZERO, ScriptHash::ZERO)
    }
}

/// Deterministic asset id derived from the registered name
pub fn asset_id_for(name: &str) -> AssetId {
    let mut descriptor = b"asset:".to_vec();
    descriptor.extend_from_slice(name.as_bytes());
    hash_blake3(&descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_derived_from_name() {
        let a = AssetState::native("governing");
        let b = AssetState::native("governing");
        let c = AssetState::native("utility");
        assert_eq!(a.asset_id, b.asset_id);
        assert_ne!(a.asset_id, c.asset_id);
        assert_eq!(a.asset_id, asset_id_for("governing"));
    }
}
