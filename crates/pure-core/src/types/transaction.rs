use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, sign, verify, Hash, PublicKey, ScriptHash, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;
use crate::types::asset::AssetId;
use crate::types::fixed8::Fixed8;

/// Points at an output of an earlier transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoinReference {
    pub prev_hash: Hash,
    pub prev_index: u16,
}

impl CoinReference {
    pub fn new(prev_hash: Hash, prev_index: u16) -> Self {
        CoinReference {
            prev_hash,
            prev_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub asset_id: AssetId,
    pub value: Fixed8,
    pub script_hash: ScriptHash,
}

impl TxOutput {
    pub fn new(asset_id: AssetId, value: Fixed8, script_hash: ScriptHash) -> Self {
        TxOutput {
            asset_id,
            value,
            script_hash,
        }
    }
}

/// Public part of a shielded transfer: value entering (`vpub_old`) and
/// leaving (`vpub_new`) the shielded pool for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSplit {
    pub asset_id: AssetId,
    pub vpub_old: Fixed8,
    pub vpub_new: Fixed8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Block reward, always the first transaction of a block
    Miner { nonce: u32 },
    /// Initial distribution, only valid in genesis
    Issue,
    /// Claim of accrued rewards; carries no fee
    Claim,
    /// Ordinary transfer
    Contract,
    /// Shielded transfer; the proof itself is opaque to this layer
    Anonymous { join_splits: Vec<JoinSplit> },
}

/// Signature by the owner of spent outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub public_key: PublicKey,
    pub signature: Sig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub inputs: Vec<CoinReference>,
    pub outputs: Vec<TxOutput>,
    /// Fee burned by the system, outside the reward distribution
    pub system_fee: Fixed8,
    pub witnesses: Vec<Witness>,
}

/// Everything except the witnesses; this is what gets hashed and signed
#[derive(Serialize)]
struct UnsignedTransaction<'a> {
    kind: &'a TransactionKind,
    inputs: &'a [CoinReference],
    outputs: &'a [TxOutput],
    system_fee: Fixed8,
}

impl Transaction {
    pub fn new(kind: TransactionKind, inputs: Vec<CoinReference>, outputs: Vec<TxOutput>) -> Self {
        Transaction {
            kind,
            inputs,
            outputs,
            system_fee: Fixed8::ZERO,
            witnesses: Vec::new(),
        }
    }

    /// Reward transaction: no inputs, no witnesses
    pub fn miner(nonce: u32, outputs: Vec<TxOutput>) -> Self {
        Self::new(TransactionKind::Miner { nonce }, Vec::new(), outputs)
    }

    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(&UnsignedTransaction {
            kind: &self.kind,
            inputs: &self.inputs,
            outputs: &self.outputs,
            system_fee: self.system_fee,
        })
    }

    /// Hash of the unsigned data, so witnesses never change identity
    pub fn hash(&self) -> Result<Hash, CoreError> {
        Ok(hash_blake3(&self.signing_bytes()?))
    }

    /// Encoded size in bytes, witnesses included
    pub fn size(&self) -> Result<usize, CoreError> {
        serialize::encoded_len(self)
    }

    /// Append a witness for `secret_key`
    pub fn sign(&mut self, secret_key: &SecretKey) -> Result<(), CoreError> {
        let signature = sign(secret_key, &self.signing_bytes()?);
        self.witnesses.push(Witness {
            public_key: secret_key.public_key(),
            signature,
        });
        Ok(())
    }

    /// Verify every attached witness against the unsigned data
    pub fn verify_witnesses(&self) -> Result<(), CoreError> {
        let bytes = self.signing_bytes()?;
        for witness in &self.witnesses {
            verify(&witness.public_key, &bytes, &witness.signature)?;
        }
        Ok(())
    }

    pub fn is_miner(&self) -> bool {
        matches!(self.kind, TransactionKind::Miner { .. })
    }

    pub fn is_claim(&self) -> bool {
        matches!(self.kind, TransactionKind::Claim)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.kind, TransactionKind::Anonymous { .. })
    }

    /// Anonymous transaction funded purely from the shielded pool
    pub fn is_shielded(&self) -> bool {
        self.is_anonymous() && self.inputs.is_empty()
    }

    pub fn join_splits(&self) -> &[JoinSplit] {
        match &self.kind {
            TransactionKind::Anonymous { join_splits } => join_splits,
            _ => &[],
        }
    }

    /// Sum of outputs paying `asset`
    pub fn output_total(&self, asset: &AssetId) -> Result<Fixed8, CoreError> {
        Fixed8::checked_sum(
            self.outputs
                .iter()
                .filter(|o| &o.asset_id == asset)
                .map(|o| o.value),
        )
        .ok_or(CoreError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::asset::asset_id_for;

    fn transfer(owner: &KeyPair) -> Transaction {
        let asset = asset_id_for("utility");
        Transaction::new(
            TransactionKind::Contract,
            vec![CoinReference::new(hash_blake3(b"funding"), 0)],
            vec![
                TxOutput::new(asset, Fixed8::from_units(9), KeyPair::generate().public.script_hash()),
                TxOutput::new(asset, Fixed8::from_raw(50_000_000), owner.public.script_hash()),
            ],
        )
    }

    #[test]
    fn test_hash_ignores_witnesses() {
        let owner = KeyPair::generate();
        let mut tx = transfer(&owner);
        let unsigned_hash = tx.hash().unwrap();

        tx.sign(&owner.secret).unwrap();
        assert_eq!(tx.hash().unwrap(), unsigned_hash);
        assert!(tx.verify_witnesses().is_ok());
    }

    #[test]
    fn test_tampered_output_breaks_witness() {
        let owner = KeyPair::generate();
        let mut tx = transfer(&owner);
        tx.sign(&owner.secret).unwrap();

        tx.outputs[0].value = Fixed8::from_units(10);
        assert!(tx.verify_witnesses().is_err());
    }

    #[test]
    fn test_kind_predicates() {
        let shielded = Transaction::new(
            TransactionKind::Anonymous {
                join_splits: vec![JoinSplit {
                    asset_id: asset_id_for("utility"),
                    vpub_old: Fixed8::ZERO,
                    vpub_new: Fixed8::ONE,
                }],
            },
            vec![],
            vec![],
        );
        assert!(shielded.is_anonymous());
        assert!(shielded.is_shielded());
        assert_eq!(shielded.join_splits().len(), 1);

        let miner = Transaction::miner(7, vec![]);
        assert!(miner.is_miner());
        assert!(miner.join_splits().is_empty());
    }

    #[test]
    fn test_output_total_filters_by_asset() {
        let owner = KeyPair::generate();
        let tx = transfer(&owner);
        assert_eq!(tx.output_total(&asset_id_for("utility")).unwrap(), Fixed8::from_raw(950_000_000));
        assert_eq!(tx.output_total(&asset_id_for("governing")).unwrap(), Fixed8::ZERO);
    }

    #[test]
    fn test_miner_nonce_changes_hash() {
        assert_ne!(
            Transaction::miner(1, vec![]).hash().unwrap(),
            Transaction::miner(2, vec![]).hash().unwrap()
        );
    }
}
