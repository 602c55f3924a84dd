use std::collections::BTreeMap;

use pure_core::{
    merkle_root, Block, BlockHeader, Fixed8, Hash, QuorumCertificate, ScriptHash, Transaction,
    TransactionKind,
};
use tracing::debug;

use crate::error::ConsensusError;
use crate::fees::{AssetRegistry, FeeDistributor, FeePolicy};

/// Fields of a proposal that end up in the block header
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    pub version: u32,
    pub prev_hash: Hash,
    pub index: u64,
    pub timestamp: u64,
    pub nonce: u64,
    pub next_consensus: ScriptHash,
}

impl HeaderTemplate {
    /// Header over `transaction_hashes`, reward transaction first
    pub fn header(&self, transaction_hashes: &[Hash]) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_hash: self.prev_hash,
            merkle_root: merkle_root(transaction_hashes),
            timestamp: self.timestamp,
            index: self.index,
            consensus_data: self.nonce,
            next_consensus: self.next_consensus,
        }
    }
}

/// Builds and checks reward transactions and seals finished blocks
pub struct BlockAssembler<'a, R: AssetRegistry + ?Sized> {
    distributor: FeeDistributor<'a, R>,
}

impl<'a, R: AssetRegistry + ?Sized> BlockAssembler<'a, R> {
    pub fn new(policy: &'a FeePolicy, registry: &'a R) -> Self {
        BlockAssembler {
            distributor: FeeDistributor::new(policy, registry),
        }
    }

    /// Reward transaction for `transactions`, paying the proposer share to
    /// `payout`. Only the low 32 bits of `nonce` are carried.
    pub fn reward_transaction(
        &self,
        transactions: &[&Transaction],
        nonce: u64,
        payout: ScriptHash,
    ) -> Result<Transaction, ConsensusError> {
        let net = self.distributor.net_fees(transactions)?;
        let outputs = self.distributor.reward_outputs(&net, payout)?;
        debug!(
            "Reward transaction with {} outputs over {} transactions",
            outputs.len(),
            transactions.len()
        );
        Ok(Transaction::miner(nonce as u32, outputs))
    }

    /// Check a proposer's reward transaction against the other transactions
    /// of the proposal. The proposer's own address is not checked, only the
    /// amounts and what each beneficiary receives.
    pub fn verify_reward(
        &self,
        reward: &Transaction,
        others: &[&Transaction],
    ) -> Result<(), ConsensusError> {
        if !matches!(reward.kind, TransactionKind::Miner { .. }) || !reward.inputs.is_empty() {
            return Err(ConsensusError::RewardMismatch(
                "not a reward transaction".to_string(),
            ));
        }

        let policy = self.distributor.policy();
        let net = self.distributor.net_fees(others)?;
        let split = self.distributor.split(&net)?;

        if let Some(stray) = reward.outputs.iter().find(|o| !policy.is_native(&o.asset_id)) {
            return Err(ConsensusError::RewardMismatch(format!(
                "pays non-native asset {}",
                stray.asset_id
            )));
        }

        let governing = reward.output_total(&policy.governing_asset)?;
        if governing != split.governing {
            return Err(ConsensusError::RewardMismatch(format!(
                "governing amount {}, expected {}",
                governing, split.governing
            )));
        }

        let utility = policy.utility_asset;
        let utility_paid = reward.output_total(&utility)?;
        let expected = split.utility_total()?;
        if utility_paid != expected {
            return Err(ConsensusError::RewardMismatch(format!(
                "utility amount {}, expected {}",
                utility_paid, expected
            )));
        }

        let mut owed: BTreeMap<ScriptHash, Fixed8> = BTreeMap::new();
        for (beneficiary, amount) in &split.beneficiaries {
            let total = owed.entry(*beneficiary).or_default();
            *total = total.checked_add(*amount).ok_or(ConsensusError::FeeOverflow)?;
        }
        for (beneficiary, amount) in owed {
            // Bounded by utility_paid, which was summed without overflow
            let paid: Fixed8 = reward
                .outputs
                .iter()
                .filter(|o| o.asset_id == utility && o.script_hash == beneficiary)
                .map(|o| o.value)
                .sum();
            if paid < amount {
                return Err(ConsensusError::RewardMismatch(format!(
                    "beneficiary {} owed {}, paid {}",
                    beneficiary, amount, paid
                )));
            }
        }

        Ok(())
    }
}

/// Block from a header, its collected signatures and the ordered transactions
pub fn assemble_block(
    header: BlockHeader,
    qc: QuorumCertificate,
    transactions: Vec<Transaction>,
) -> Result<Block, ConsensusError> {
    let block = Block::new(header, qc, transactions);
    if !block.has_reward_first() {
        return Err(ConsensusError::InvalidBlock(
            "reward transaction must come first".to_string(),
        ));
    }
    if !block.verify_merkle_root()? {
        return Err(ConsensusError::InvalidBlock("merkle root mismatch".to_string()));
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::tests::TestRegistry;
    use crate::fees::UTILITY_ASSET;
    use pure_core::{asset_id_for, AssetState, TxOutput};

    struct Proposal {
        registry: TestRegistry,
        transactions: Vec<Transaction>,
    }

    fn proposal() -> Proposal {
        let mut registry = TestRegistry::new();
        let utility = asset_id_for(UTILITY_ASSET);
        let silver = AssetState::new("silver", Fixed8::from_units(2), Fixed8::ZERO, ScriptHash::of(b"mint"));
        let silver_id = silver.asset_id;
        registry.add_asset(silver);
        let input = registry.fund(b"in", utility, Fixed8::from_units(10));
        let transactions = vec![Transaction::new(
            TransactionKind::Contract,
            vec![input],
            vec![
                TxOutput::new(silver_id, Fixed8::ONE, ScriptHash::ZERO),
                TxOutput::new(utility, Fixed8::from_units(7), ScriptHash::ZERO),
            ],
        )];
        Proposal {
            registry,
            transactions,
        }
    }

    impl Proposal {
        fn refs(&self) -> Vec<&Transaction> {
            self.transactions.iter().collect()
        }
    }

    #[test]
    fn test_reward_splits_and_verifies() {
        let p = proposal();
        let policy = FeePolicy::default();
        let assembler = BlockAssembler::new(&policy, &p.registry);
        let payout = ScriptHash::of(b"proposer");

        let reward = assembler.reward_transaction(&p.refs(), 7, payout).unwrap();
        // 3 utility collected, 2 of it is silver's flat fee split 40/60
        assert_eq!(
            reward.outputs,
            vec![
                TxOutput::new(policy.utility_asset, Fixed8::from_raw(180_000_000), payout),
                TxOutput::new(policy.utility_asset, Fixed8::from_raw(120_000_000), ScriptHash::of(b"mint")),
            ]
        );
        assert_eq!(reward.kind, TransactionKind::Miner { nonce: 7 });
        assembler.verify_reward(&reward, &p.refs()).unwrap();
    }

    #[test]
    fn test_reward_keeps_low_nonce_bits() {
        let p = proposal();
        let policy = FeePolicy::default();
        let assembler = BlockAssembler::new(&policy, &p.registry);
        let reward = assembler
            .reward_transaction(&p.refs(), (5u64 << 32) | 9, ScriptHash::ZERO)
            .unwrap();
        assert_eq!(reward.kind, TransactionKind::Miner { nonce: 9 });
    }

    #[test]
    fn test_verify_rejects_greedy_or_shortchanging_reward() {
        let p = proposal();
        let policy = FeePolicy::default();
        let assembler = BlockAssembler::new(&policy, &p.registry);
        let honest = assembler
            .reward_transaction(&p.refs(), 1, ScriptHash::of(b"proposer"))
            .unwrap();

        let mut greedy = honest.clone();
        greedy.outputs[0].value += Fixed8::SATOSHI;
        assert!(matches!(
            assembler.verify_reward(&greedy, &p.refs()),
            Err(ConsensusError::RewardMismatch(_))
        ));

        // Same total, but the beneficiary's share moved to the proposer
        let mut short = honest.clone();
        short.outputs[0].value += Fixed8::ONE;
        short.outputs[1].value -= Fixed8::ONE;
        assert!(assembler.verify_reward(&short, &p.refs()).is_err());

        let mut not_reward = honest;
        not_reward.kind = TransactionKind::Contract;
        assert!(assembler.verify_reward(&not_reward, &p.refs()).is_err());
    }

    #[test]
    fn test_assemble_block_checks_layout() {
        let p = proposal();
        let policy = FeePolicy::default();
        let assembler = BlockAssembler::new(&policy, &p.registry);
        let reward = assembler.reward_transaction(&p.refs(), 1, ScriptHash::ZERO).unwrap();

        let mut transactions = vec![reward];
        transactions.extend(p.transactions.iter().cloned());
        let hashes: Vec<Hash> = transactions.iter().map(|t| t.hash().unwrap()).collect();
        let template = HeaderTemplate {
            version: 0,
            prev_hash: Hash::ZERO,
            index: 1,
            timestamp: 10,
            nonce: 1,
            next_consensus: ScriptHash::ZERO,
        };

        let header = template.header(&hashes);
        assert_eq!(header.merkle_root, merkle_root(&hashes));
        assemble_block(header.clone(), QuorumCertificate::default(), transactions.clone()).unwrap();

        transactions.reverse();
        assert!(assemble_block(header, QuorumCertificate::default(), transactions).is_err());
    }
}
