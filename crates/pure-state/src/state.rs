use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use pure_core::{
    asset_id_for, AssetId, AssetState, Block, BlockHeader, CoinReference, CoreError, Fixed8,
    GenesisConfig, Hash, PublicKey, ScriptHash, Transaction, TransactionKind, TxOutput,
    UTILITY_ASSET,
};
use tracing::{debug, info};

use crate::error::StateError;

/// The chain state as seen by one node
#[derive(Debug, Clone)]
pub struct ChainState {
    /// Validator roster (static for the lifetime of the chain)
    pub validators: Vec<PublicKey>,
    assets: BTreeMap<AssetId, AssetState>,
    /// Block storage by height
    blocks: BTreeMap<u64, Block>,
    headers: HashMap<Hash, BlockHeader>,
    /// Transaction index by hash
    tx_index: HashMap<Hash, Transaction>,
    unspent: HashSet<CoinReference>,
    fee_asset: AssetId,
    head_hash: Hash,
    height: u64,
}

impl ChainState {
    /// Initialize state from genesis configuration
    pub fn from_genesis(config: &GenesisConfig) -> Result<Self, StateError> {
        info!("Initializing genesis state");

        let genesis = config.create_genesis_block()?;
        let mut state = ChainState {
            validators: config.validators.clone(),
            assets: config
                .assets
                .iter()
                .map(|asset| (asset.asset_id, asset.clone()))
                .collect(),
            blocks: BTreeMap::new(),
            headers: HashMap::new(),
            tx_index: HashMap::new(),
            unspent: HashSet::new(),
            fee_asset: asset_id_for(UTILITY_ASSET),
            head_hash: Hash::ZERO,
            height: 0,
        };
        state.apply(genesis)?;

        info!(
            "Genesis {} with {} validators and {} assets",
            state.head_hash,
            state.validators.len(),
            state.assets.len()
        );
        Ok(state)
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn head_hash(&self) -> Hash {
        self.head_hash
    }

    pub fn block(&self, height: u64) -> Option<&Block> {
        self.blocks.get(&height)
    }

    pub fn header(&self, hash: &Hash) -> Option<&BlockHeader> {
        self.headers.get(hash)
    }

    pub fn asset(&self, id: &AssetId) -> Option<&AssetState> {
        self.assets.get(id)
    }

    pub fn transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.tx_index.get(hash)
    }

    pub fn contains_transaction(&self, hash: &Hash) -> bool {
        self.tx_index.contains_key(hash)
    }

    /// Any committed output, spent or not
    pub fn resolve_output(&self, reference: &CoinReference) -> Option<&TxOutput> {
        self.tx_index
            .get(&reference.prev_hash)
            .and_then(|tx| tx.outputs.get(usize::from(reference.prev_index)))
    }

    pub fn is_unspent(&self, reference: &CoinReference) -> bool {
        self.unspent.contains(reference)
    }

    /// Whether `tx` spends an output some committed transaction already spent.
    /// Such a transaction can never become valid again.
    pub fn spends_committed_input(&self, tx: &Transaction) -> bool {
        tx.inputs
            .iter()
            .any(|input| self.resolve_output(input).is_some() && !self.is_unspent(input))
    }

    /// Unspent outputs locked to `owner`, in deterministic order
    pub fn unspent_for(&self, owner: &ScriptHash) -> Vec<(CoinReference, TxOutput)> {
        let mut owned: Vec<_> = self
            .unspent
            .iter()
            .filter_map(|r| {
                self.resolve_output(r)
                    .filter(|o| &o.script_hash == owner)
                    .map(|o| (*r, o.clone()))
            })
            .collect();
        owned.sort_by(|a, b| a.0.cmp(&b.0));
        owned
    }

    /// Asset every flat fee is paid in
    pub fn fee_asset(&self) -> AssetId {
        self.fee_asset
    }

    /// Fee paid in `fee_asset` beyond the system fee
    pub fn network_fee(&self, tx: &Transaction, fee_asset: &AssetId) -> Result<Fixed8, StateError> {
        let mut paid_in = Fixed8::ZERO;
        for input in &tx.inputs {
            let output = self
                .resolve_output(input)
                .ok_or(StateError::UnspendableInput(*input))?;
            if &output.asset_id == fee_asset {
                paid_in = paid_in.checked_add(output.value).ok_or(CoreError::Overflow)?;
            }
        }
        let fee = paid_in
            .checked_sub(tx.output_total(fee_asset)?)
            .and_then(|rest| rest.checked_sub(tx.system_fee))
            .ok_or(CoreError::Overflow)?;
        Ok(fee)
    }

    /// Check `tx` against committed state and the other transactions it
    /// would share a block with.
    ///
    /// Apart from the reward transaction, whose amounts consensus checks,
    /// nothing may create value: every asset's outputs are covered by its
    /// inputs (or shielded public values), and what is left of the fee
    /// asset pays the flat fees of every asset moved plus the system fee.
    pub fn verify_transaction(
        &self,
        tx: &Transaction,
        others: &[&Transaction],
    ) -> Result<(), StateError> {
        let hash = tx.hash()?;
        if self.contains_transaction(&hash) {
            return Err(StateError::DuplicateTransaction(hash));
        }

        match tx.kind {
            TransactionKind::Issue => {
                return Err(StateError::InvalidTransaction(
                    "issue transactions are only valid in genesis".to_string(),
                ))
            }
            TransactionKind::Claim => {
                return Err(StateError::InvalidTransaction(
                    "claims need reward accrual, which this ledger does not track".to_string(),
                ))
            }
            TransactionKind::Miner { .. } if !tx.inputs.is_empty() => {
                return Err(StateError::InvalidTransaction(
                    "reward transaction cannot spend inputs".to_string(),
                ))
            }
            TransactionKind::Anonymous { .. } if !tx.is_shielded() => {
                return Err(StateError::InvalidTransaction(
                    "anonymous transactions cannot spend public inputs".to_string(),
                ))
            }
            _ => {}
        }

        let mut outputs_by_asset: BTreeMap<AssetId, Fixed8> = BTreeMap::new();
        for output in &tx.outputs {
            if !self.assets.contains_key(&output.asset_id) {
                return Err(StateError::UnknownAsset(output.asset_id));
            }
            if !output.value.is_positive() {
                return Err(StateError::InvalidTransaction(format!(
                    "non-positive output value {}",
                    output.value
                )));
            }
            add_to(&mut outputs_by_asset, output.asset_id, output.value)?;
        }

        let claimed_elsewhere: HashSet<&CoinReference> = others
            .iter()
            .filter(|other| other.hash().map(|h| h != hash).unwrap_or(false))
            .flat_map(|other| other.inputs.iter())
            .collect();

        let mut seen = HashSet::new();
        let mut owners = BTreeSet::new();
        let mut available: BTreeMap<AssetId, Fixed8> = BTreeMap::new();
        for input in &tx.inputs {
            if !seen.insert(*input) || claimed_elsewhere.contains(input) {
                return Err(StateError::DoubleSpend(*input));
            }
            if !self.is_unspent(input) {
                return Err(StateError::UnspendableInput(*input));
            }
            let output = self
                .resolve_output(input)
                .ok_or(StateError::UnspendableInput(*input))?;
            owners.insert(output.script_hash);
            add_to(&mut available, output.asset_id, output.value)?;
        }

        if !tx.is_miner() {
            self.check_balance(tx, available, outputs_by_asset)?;
        }

        tx.verify_witnesses()?;
        let signers: HashSet<ScriptHash> = tx
            .witnesses
            .iter()
            .map(|w| w.public_key.script_hash())
            .collect();
        if let Some(owner) = owners.iter().find(|owner| !signers.contains(*owner)) {
            return Err(StateError::MissingWitness(owner.to_hex()));
        }

        Ok(())
    }

    fn check_balance(
        &self,
        tx: &Transaction,
        mut available: BTreeMap<AssetId, Fixed8>,
        mut spent: BTreeMap<AssetId, Fixed8>,
    ) -> Result<(), StateError> {
        if tx.system_fee < Fixed8::ZERO {
            return Err(StateError::InvalidTransaction(format!(
                "negative system fee {}",
                tx.system_fee
            )));
        }

        // Shielded value leaves the pool as vpub_new and enters it as vpub_old
        for join_split in tx.join_splits() {
            if !self.assets.contains_key(&join_split.asset_id) {
                return Err(StateError::UnknownAsset(join_split.asset_id));
            }
            if join_split.vpub_old < Fixed8::ZERO || join_split.vpub_new < Fixed8::ZERO {
                return Err(StateError::InvalidTransaction(
                    "negative shielded public value".to_string(),
                ));
            }
            add_to(&mut available, join_split.asset_id, join_split.vpub_new)?;
            add_to(&mut spent, join_split.asset_id, join_split.vpub_old)?;
        }

        for (asset, value) in &spent {
            if available.get(asset).copied().unwrap_or_default() < *value {
                return Err(StateError::Overspend(*asset));
            }
        }

        let touched: BTreeSet<AssetId> = if tx.is_anonymous() {
            tx.join_splits().iter().map(|js| js.asset_id).collect()
        } else {
            tx.outputs.iter().map(|o| o.asset_id).collect()
        };
        let mut required = tx.system_fee;
        for asset_id in touched {
            let asset = self
                .assets
                .get(&asset_id)
                .ok_or(StateError::UnknownAsset(asset_id))?;
            let fee = if tx.is_shielded() {
                asset.anonymous_fee
            } else {
                asset.fee
            };
            required = required.checked_add(fee).ok_or(CoreError::Overflow)?;
        }

        let left = available
            .get(&self.fee_asset)
            .copied()
            .unwrap_or_default()
            .checked_sub(spent.get(&self.fee_asset).copied().unwrap_or_default())
            .ok_or(CoreError::Overflow)?;
        if left < required {
            return Err(StateError::InsufficientFee { required, left });
        }
        Ok(())
    }

    /// Append a block agreed by consensus.
    ///
    /// The quorum certificate is checked by the caller, which knows the
    /// quorum rules; this only checks chain linkage and block structure.
    pub fn persist_block(&mut self, block: Block) -> Result<(), StateError> {
        let expected = self.height + 1;
        if block.index() != expected {
            return Err(StateError::HeightMismatch {
                expected,
                got: block.index(),
            });
        }
        if block.header.prev_hash != self.head_hash {
            return Err(StateError::PrevHashMismatch);
        }
        self.apply(block)
    }

    fn apply(&mut self, block: Block) -> Result<(), StateError> {
        if !block.has_reward_first() {
            return Err(StateError::InvalidBlock(
                "reward transaction must come first".to_string(),
            ));
        }
        if !block.verify_merkle_root()? {
            return Err(StateError::InvalidBlock(
                "merkle root mismatch".to_string(),
            ));
        }

        let hash = block.hash()?;
        for tx in &block.transactions {
            let tx_hash = tx.hash()?;
            for input in &tx.inputs {
                self.unspent.remove(input);
            }
            for index in 0..tx.outputs.len() {
                let index = u16::try_from(index).map_err(|_| {
                    StateError::InvalidTransaction("too many outputs".to_string())
                })?;
                self.unspent.insert(CoinReference::new(tx_hash, index));
            }
            self.tx_index.insert(tx_hash, tx.clone());
        }

        debug!(
            "Applied block {} at height {} with {} transactions",
            hash,
            block.index(),
            block.transactions.len()
        );

        self.height = block.index();
        self.head_hash = hash;
        self.headers.insert(hash, block.header.clone());
        self.blocks.insert(block.index(), block);
        Ok(())
    }
}

fn add_to(
    totals: &mut BTreeMap<AssetId, Fixed8>,
    asset: AssetId,
    value: Fixed8,
) -> Result<(), CoreError> {
    let total = totals.entry(asset).or_default();
    *total = total.checked_add(value).ok_or(CoreError::Overflow)?;
    Ok(())
}
