use std::collections::{BTreeMap, BTreeSet};

use pure_core::{
    asset_id_for, AssetId, AssetState, CoinReference, Fixed8, ScriptHash, Transaction, TxOutput,
};
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

pub use pure_core::{GOVERNING_ASSET, UTILITY_ASSET};

/// Ledger lookups the fee computation needs
pub trait AssetRegistry {
    fn asset(&self, id: &AssetId) -> Option<AssetState>;

    /// Output referenced by `reference`, whether or not it is still unspent
    fn resolve_output(&self, reference: &CoinReference) -> Option<TxOutput>;
}

/// Fraction `num / den`, applied to raw fixed-point values with truncation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub num: i64,
    pub den: i64,
}

impl Share {
    pub const fn new(num: i64, den: i64) -> Self {
        Share { num, den }
    }

    pub fn of(&self, amount: Fixed8) -> Fixed8 {
        amount.mul_div(self.num, self.den)
    }
}

/// Split applied to a non-native asset's fee while it is at or below `up_to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    /// Inclusive ceiling; `None` matches any amount
    pub up_to: Option<Fixed8>,
    pub proposer: Share,
    pub beneficiary: Share,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Net fee goes to the proposer in full
    pub governing_asset: AssetId,
    /// Fees are paid out in this asset
    pub utility_asset: AssetId,
    /// Checked in order, first match wins
    pub tiers: Vec<FeeTier>,
}

impl FeePolicy {
    pub fn new(governing_asset: AssetId, utility_asset: AssetId) -> Self {
        FeePolicy {
            governing_asset,
            utility_asset,
            tiers: Self::default_tiers(),
        }
    }

    /// 30/70 up to one unit, 40/60 above
    pub fn default_tiers() -> Vec<FeeTier> {
        vec![
            FeeTier {
                up_to: Some(Fixed8::ONE),
                proposer: Share::new(3, 10),
                beneficiary: Share::new(7, 10),
            },
            FeeTier {
                up_to: None,
                proposer: Share::new(4, 10),
                beneficiary: Share::new(6, 10),
            },
        ]
    }

    pub fn is_native(&self, asset: &AssetId) -> bool {
        asset == &self.governing_asset || asset == &self.utility_asset
    }

    pub fn tier_for(&self, amount: Fixed8) -> Option<&FeeTier> {
        self.tiers
            .iter()
            .find(|tier| tier.up_to.map_or(true, |ceiling| amount <= ceiling))
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::new(asset_id_for(GOVERNING_ASSET), asset_id_for(UTILITY_ASSET))
    }
}

/// Computes what a block's transactions owe the proposer and each asset's
/// fee beneficiary.
pub struct FeeDistributor<'a, R: AssetRegistry + ?Sized> {
    policy: &'a FeePolicy,
    registry: &'a R,
}

impl<'a, R: AssetRegistry + ?Sized> FeeDistributor<'a, R> {
    pub fn new(policy: &'a FeePolicy, registry: &'a R) -> Self {
        FeeDistributor { policy, registry }
    }

    pub fn policy(&self) -> &FeePolicy {
        self.policy
    }

    /// Net fee per asset over `transactions`, strictly positive entries only.
    ///
    /// Native assets carry what inputs (or shielded public values) exceed
    /// outputs. Every other asset carries the sum of its flat fees, which are
    /// paid in the utility asset and so come out of the utility entry. A set
    /// whose flat fees exceed the utility it brings in is refused.
    pub fn net_fees(
        &self,
        transactions: &[&Transaction],
    ) -> Result<BTreeMap<AssetId, Fixed8>, ConsensusError> {
        let mut totals: BTreeMap<AssetId, Fixed8> = BTreeMap::new();
        let mut flat_fees: BTreeMap<AssetId, Fixed8> = BTreeMap::new();

        for tx in transactions {
            if tx.is_miner() || tx.is_claim() {
                continue;
            }

            if !tx.is_anonymous() {
                for input in &tx.inputs {
                    let output = self
                        .registry
                        .resolve_output(input)
                        .ok_or(ConsensusError::UnresolvedInput(*input))?;
                    if self.policy.is_native(&output.asset_id) {
                        credit(&mut totals, output.asset_id, output.value)?;
                    }
                }
                self.subtract_native_outputs(tx, &mut totals)?;
            } else if tx.is_shielded() {
                for join_split in tx.join_splits() {
                    if self.policy.is_native(&join_split.asset_id) {
                        credit(&mut totals, join_split.asset_id, join_split.vpub_new)?;
                    }
                }
                self.subtract_native_outputs(tx, &mut totals)?;
            }

            let touched: BTreeSet<AssetId> = if tx.is_anonymous() {
                tx.join_splits().iter().map(|js| js.asset_id).collect()
            } else {
                tx.outputs.iter().map(|o| o.asset_id).collect()
            };
            for asset_id in touched {
                let asset = self
                    .registry
                    .asset(&asset_id)
                    .ok_or(ConsensusError::UnknownAsset(asset_id))?;
                let fee = if tx.is_shielded() {
                    asset.anonymous_fee
                } else {
                    asset.fee
                };
                credit(&mut flat_fees, asset_id, fee)?;
            }
        }

        let mut net = BTreeMap::new();
        let governing = totals
            .get(&self.policy.governing_asset)
            .copied()
            .unwrap_or_default();
        if governing.is_positive() {
            net.insert(self.policy.governing_asset, governing);
        }

        let mut tiered_total = Fixed8::ZERO;
        for (asset_id, fee) in flat_fees {
            if self.policy.is_native(&asset_id) || !fee.is_positive() {
                continue;
            }
            tiered_total = tiered_total
                .checked_add(fee)
                .ok_or(ConsensusError::FeeOverflow)?;
            net.insert(asset_id, fee);
        }

        let collected = totals
            .get(&self.policy.utility_asset)
            .copied()
            .unwrap_or_default();
        if tiered_total > collected {
            return Err(ConsensusError::UnfundedFees {
                required: tiered_total,
                collected,
            });
        }
        let utility = collected
            .checked_sub(tiered_total)
            .ok_or(ConsensusError::FeeOverflow)?;
        if utility.is_positive() {
            net.insert(self.policy.utility_asset, utility);
        }

        Ok(net)
    }

    fn subtract_native_outputs(
        &self,
        tx: &Transaction,
        totals: &mut BTreeMap<AssetId, Fixed8>,
    ) -> Result<(), ConsensusError> {
        for output in &tx.outputs {
            if self.policy.is_native(&output.asset_id) {
                let total = totals.entry(output.asset_id).or_default();
                *total = total
                    .checked_sub(output.value)
                    .ok_or(ConsensusError::FeeOverflow)?;
            }
        }
        Ok(())
    }

    /// Split `net` between the proposer and the asset beneficiaries
    pub fn split(&self, net: &BTreeMap<AssetId, Fixed8>) -> Result<RewardSplit, ConsensusError> {
        let mut split = RewardSplit {
            governing: net
                .get(&self.policy.governing_asset)
                .copied()
                .unwrap_or_default(),
            proposer_utility: net
                .get(&self.policy.utility_asset)
                .copied()
                .unwrap_or_default(),
            beneficiaries: Vec::new(),
        };

        for (asset_id, amount) in net {
            if self.policy.is_native(asset_id) {
                continue;
            }
            let asset = self
                .registry
                .asset(asset_id)
                .ok_or(ConsensusError::UnknownAsset(*asset_id))?;
            let proposer_share = match self.policy.tier_for(*amount) {
                Some(tier) => {
                    split
                        .beneficiaries
                        .push((asset.fee_address, tier.beneficiary.of(*amount)));
                    tier.proposer.of(*amount)
                }
                // Without a matching tier the proposer keeps the whole fee
                None => *amount,
            };
            split.proposer_utility = split
                .proposer_utility
                .checked_add(proposer_share)
                .ok_or(ConsensusError::FeeOverflow)?;
        }

        Ok(split)
    }

    /// Reward outputs for `net`, paying the proposer share to `payout`.
    ///
    /// Order: governing output, proposer utility output, then one utility
    /// output per beneficiary in asset order. Zero amounts are left out.
    pub fn reward_outputs(
        &self,
        net: &BTreeMap<AssetId, Fixed8>,
        payout: ScriptHash,
    ) -> Result<Vec<TxOutput>, ConsensusError> {
        let split = self.split(net)?;
        let utility = self.policy.utility_asset;

        let mut outputs = Vec::with_capacity(split.beneficiaries.len() + 2);
        outputs.push(TxOutput::new(self.policy.governing_asset, split.governing, payout));
        outputs.push(TxOutput::new(utility, split.proposer_utility, payout));
        for (fee_address, amount) in split.beneficiaries {
            outputs.push(TxOutput::new(utility, amount, fee_address));
        }
        outputs.retain(|o| o.value.is_positive());
        Ok(outputs)
    }
}

/// Per-party amounts of one block's fees
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardSplit {
    pub governing: Fixed8,
    /// Utility paid to the proposer, tier shares included
    pub proposer_utility: Fixed8,
    /// Utility owed to each tiered asset's fee address, in asset order
    pub beneficiaries: Vec<(ScriptHash, Fixed8)>,
}

impl RewardSplit {
    pub fn utility_total(&self) -> Result<Fixed8, ConsensusError> {
        let shares = self.beneficiaries.iter().map(|(_, amount)| *amount);
        Fixed8::checked_sum(std::iter::once(self.proposer_utility).chain(shares))
            .ok_or(ConsensusError::FeeOverflow)
    }
}

fn credit(
    totals: &mut BTreeMap<AssetId, Fixed8>,
    asset: AssetId,
    value: Fixed8,
) -> Result<(), ConsensusError> {
    let total = totals.entry(asset).or_default();
    *total = total.checked_add(value).ok_or(ConsensusError::FeeOverflow)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pure_core::{hash_blake3, JoinSplit, TransactionKind};
    use std::collections::HashMap;

    #[derive(Default)]
    pub(crate) struct TestRegistry {
        pub assets: HashMap<AssetId, AssetState>,
        pub outputs: HashMap<CoinReference, TxOutput>,
    }

    impl TestRegistry {
        pub fn new() -> Self {
            let mut registry = TestRegistry::default();
            registry.add_asset(AssetState::native(GOVERNING_ASSET));
            registry.add_asset(AssetState::new(
                UTILITY_ASSET,
                Fixed8::from_raw(1_000),
                Fixed8::ZERO,
                ScriptHash::ZERO,
            ));
            registry
        }

        pub fn add_asset(&mut self, asset: AssetState) {
            self.assets.insert(asset.asset_id, asset);
        }

        pub fn fund(&mut self, seed: &[u8], asset: AssetId, value: Fixed8) -> CoinReference {
            let reference = CoinReference::new(hash_blake3(seed), 0);
            self.outputs
                .insert(reference, TxOutput::new(asset, value, ScriptHash::ZERO));
            reference
        }
    }

    impl AssetRegistry for TestRegistry {
        fn asset(&self, id: &AssetId) -> Option<AssetState> {
            self.assets.get(id).cloned()
        }

        fn resolve_output(&self, reference: &CoinReference) -> Option<TxOutput> {
            self.outputs.get(reference).cloned()
        }
    }

    fn token(name: &str, fee: Fixed8) -> AssetState {
        AssetState::new(name, fee, Fixed8::from_raw(fee.raw() * 2), ScriptHash::of(name.as_bytes()))
    }

    fn contract(inputs: Vec<CoinReference>, outputs: Vec<TxOutput>) -> Transaction {
        Transaction::new(TransactionKind::Contract, inputs, outputs)
    }

    fn utility() -> AssetId {
        asset_id_for(UTILITY_ASSET)
    }

    fn governing() -> AssetId {
        asset_id_for(GOVERNING_ASSET)
    }

    #[test]
    fn test_native_net_fee_is_inputs_minus_outputs() {
        let mut registry = TestRegistry::new();
        let a = registry.fund(b"a", utility(), Fixed8::from_units(10));
        let b = registry.fund(b"b", governing(), Fixed8::from_units(5));
        let txs = [
            contract(vec![a], vec![TxOutput::new(utility(), Fixed8::from_units(9), ScriptHash::ZERO)]),
            contract(vec![b], vec![TxOutput::new(governing(), Fixed8::from_units(4), ScriptHash::ZERO)]),
        ];
        let refs: Vec<&Transaction> = txs.iter().collect();

        let policy = FeePolicy::default();
        let net = FeeDistributor::new(&policy, &registry).net_fees(&refs).unwrap();

        assert_eq!(net.get(&utility()), Some(&Fixed8::from_units(1)));
        assert_eq!(net.get(&governing()), Some(&Fixed8::from_units(1)));
        assert_eq!(net.len(), 2);
    }

    #[test]
    fn test_tiered_asset_fees_come_out_of_utility() {
        let mut registry = TestRegistry::new();
        let gold = token("gold", Fixed8::from_raw(50_000_000));
        let gold_id = gold.asset_id;
        registry.add_asset(gold);
        let fee_input = registry.fund(b"fee", utility(), Fixed8::from_units(2));
        let gold_input = registry.fund(b"gold", gold_id, Fixed8::from_units(100));

        let tx = contract(
            vec![gold_input, fee_input],
            vec![
                TxOutput::new(gold_id, Fixed8::from_units(100), ScriptHash::ZERO),
                TxOutput::new(utility(), Fixed8::from_units(1), ScriptHash::ZERO),
            ],
        );

        let policy = FeePolicy::default();
        let distributor = FeeDistributor::new(&policy, &registry);
        let net = distributor.net_fees(&[&tx]).unwrap();

        assert_eq!(net.get(&gold_id), Some(&Fixed8::from_raw(50_000_000)));
        assert_eq!(net.get(&utility()), Some(&Fixed8::from_raw(50_000_000)));

        let payout = ScriptHash::of(b"proposer");
        let outputs = distributor.reward_outputs(&net, payout).unwrap();
        // 0.5 utility left plus 30% of 0.5 gold fee to the proposer, 70% to the beneficiary
        assert_eq!(
            outputs,
            vec![
                TxOutput::new(utility(), Fixed8::from_raw(65_000_000), payout),
                TxOutput::new(utility(), Fixed8::from_raw(35_000_000), ScriptHash::of(b"gold")),
            ]
        );
    }

    #[test]
    fn test_tier_boundary_at_one_unit() {
        let mut registry = TestRegistry::new();
        for (name, fee) in [("at", Fixed8::ONE), ("above", Fixed8::ONE + Fixed8::SATOSHI)] {
            registry.add_asset(token(name, fee));
        }
        let policy = FeePolicy::default();
        let distributor = FeeDistributor::new(&policy, &registry);
        let payout = ScriptHash::ZERO;

        let mut net = BTreeMap::new();
        net.insert(asset_id_for("at"), Fixed8::ONE);
        let outputs = distributor.reward_outputs(&net, payout).unwrap();
        assert_eq!(outputs[0].value, Fixed8::from_raw(30_000_000));
        assert_eq!(outputs[1].value, Fixed8::from_raw(70_000_000));

        let mut net = BTreeMap::new();
        net.insert(asset_id_for("above"), Fixed8::from_raw(100_000_001));
        let outputs = distributor.reward_outputs(&net, payout).unwrap();
        // 40% and 60% of 100_000_001, both truncated; one raw unit of dust is dropped
        assert_eq!(outputs[0].value, Fixed8::from_raw(40_000_000));
        assert_eq!(outputs[1].value, Fixed8::from_raw(60_000_000));
    }

    #[test]
    fn test_shielded_uses_public_values_and_anonymous_fee() {
        let mut registry = TestRegistry::new();
        let gold = token("gold", Fixed8::from_raw(10_000_000));
        let gold_id = gold.asset_id;
        registry.add_asset(gold);

        let shielded = Transaction::new(
            TransactionKind::Anonymous {
                join_splits: vec![
                    JoinSplit {
                        asset_id: utility(),
                        vpub_old: Fixed8::ZERO,
                        vpub_new: Fixed8::from_units(3),
                    },
                    JoinSplit {
                        asset_id: gold_id,
                        vpub_old: Fixed8::ZERO,
                        vpub_new: Fixed8::ZERO,
                    },
                ],
            },
            vec![],
            vec![TxOutput::new(utility(), Fixed8::from_units(2), ScriptHash::ZERO)],
        );

        let policy = FeePolicy::default();
        let net = FeeDistributor::new(&policy, &registry).net_fees(&[&shielded]).unwrap();

        // anonymous_fee of gold is 0.2, taken out of the 1 unit of utility
        assert_eq!(net.get(&gold_id), Some(&Fixed8::from_raw(20_000_000)));
        assert_eq!(net.get(&utility()), Some(&Fixed8::from_raw(80_000_000)));
    }

    #[test]
    fn test_miner_and_claim_contribute_nothing() {
        let registry = TestRegistry::new();
        let txs = [
            Transaction::miner(1, vec![TxOutput::new(utility(), Fixed8::ONE, ScriptHash::ZERO)]),
            Transaction::new(
                TransactionKind::Claim,
                vec![],
                vec![TxOutput::new(utility(), Fixed8::ONE, ScriptHash::ZERO)],
            ),
        ];
        let refs: Vec<&Transaction> = txs.iter().collect();
        let policy = FeePolicy::default();
        let distributor = FeeDistributor::new(&policy, &registry);

        let net = distributor.net_fees(&refs).unwrap();
        assert!(net.is_empty());
        assert!(distributor.reward_outputs(&net, ScriptHash::ZERO).unwrap().is_empty());
    }

    #[test]
    fn test_unresolvable_input_is_an_error() {
        let registry = TestRegistry::new();
        let tx = contract(vec![CoinReference::new(hash_blake3(b"nowhere"), 3)], vec![]);
        let policy = FeePolicy::default();

        assert!(matches!(
            FeeDistributor::new(&policy, &registry).net_fees(&[&tx]),
            Err(ConsensusError::UnresolvedInput(_))
        ));
    }

    #[test]
    fn test_distribution_conserves_and_repeats() {
        let mut registry = TestRegistry::new();
        let mut txs = Vec::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let asset = token(name, Fixed8::from_raw(33_333_333 * (i as i64 + 1)));
            let id = asset.asset_id;
            registry.add_asset(asset);
            let fee_input = registry.fund(name.as_bytes(), utility(), Fixed8::from_units(5));
            txs.push(contract(
                vec![fee_input],
                vec![
                    TxOutput::new(id, Fixed8::ONE, ScriptHash::ZERO),
                    TxOutput::new(utility(), Fixed8::from_units(3), ScriptHash::ZERO),
                ],
            ));
        }
        let refs: Vec<&Transaction> = txs.iter().collect();
        let policy = FeePolicy::default();
        let distributor = FeeDistributor::new(&policy, &registry);

        let net = distributor.net_fees(&refs).unwrap();
        let outputs = distributor.reward_outputs(&net, ScriptHash::ZERO).unwrap();
        assert_eq!(outputs, distributor.reward_outputs(&net, ScriptHash::ZERO).unwrap());
        assert_eq!(net, distributor.net_fees(&refs).unwrap());

        // Paid out never exceeds what was collected, and the gap is rounding dust
        let collected: Fixed8 = net.values().sum();
        let paid: Fixed8 = outputs.iter().map(|o| o.value).sum();
        assert!(paid <= collected);
        let tiered = net.keys().filter(|id| !policy.is_native(id)).count() as i64;
        assert!(collected - paid <= Fixed8::from_raw(2 * tiered));
    }

    #[test]
    fn test_tiered_fee_without_utility_is_refused() {
        let mut registry = TestRegistry::new();
        let silver = token("silver", Fixed8::from_units(2));
        let silver_id = silver.asset_id;
        registry.add_asset(silver);
        let coin = registry.fund(b"silver", silver_id, Fixed8::from_units(5));
        let tx = contract(vec![coin], vec![TxOutput::new(silver_id, Fixed8::from_units(5), ScriptHash::ZERO)]);

        let policy = FeePolicy::default();
        let result = FeeDistributor::new(&policy, &registry).net_fees(&[&tx]);
        assert!(matches!(
            result,
            Err(ConsensusError::UnfundedFees { required, collected })
                if required == Fixed8::from_units(2) && collected == Fixed8::ZERO
        ));
    }

    #[test]
    fn test_overflowing_outputs_are_an_error() {
        let registry = TestRegistry::new();
        let huge = Fixed8::from_raw(i64::MAX);
        let tx = Transaction::new(
            TransactionKind::Anonymous {
                join_splits: vec![JoinSplit {
                    asset_id: utility(),
                    vpub_old: Fixed8::ZERO,
                    vpub_new: Fixed8::ONE,
                }],
            },
            vec![],
            vec![
                TxOutput::new(utility(), huge, ScriptHash::ZERO),
                TxOutput::new(utility(), huge, ScriptHash::ZERO),
            ],
        );

        let policy = FeePolicy::default();
        assert!(matches!(
            FeeDistributor::new(&policy, &registry).net_fees(&[&tx]),
            Err(ConsensusError::FeeOverflow)
        ));
    }
}
