use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use pure_consensus::fees::{GOVERNING_ASSET, UTILITY_ASSET};
use pure_consensus::{consensus_address, ConsensusConfig, FeePolicy, FeeTier, Share};
use pure_core::{
    asset_id_for, AssetState, Fixed8, GenesisConfig, KeyPair, ScriptHash, SecretKey, TxOutput,
};
use serde::{Deserialize, Serialize};

/// Devnet configuration.
///
/// Amounts are decimal strings (`"0.5"`), keys are hex-encoded secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Target block interval in milliseconds
    pub block_time_ms: u64,

    /// Upper bound on a proposal, reward transaction included
    pub max_transactions_per_block: usize,

    /// Mempool max size
    pub mempool_max_size: usize,

    /// Genesis timestamp; `0` means the time the devnet starts
    pub genesis_timestamp: u64,

    /// One secret key per validator, in roster order
    pub validator_keys: Vec<String>,

    /// Roster indices that never run, to exercise view changes
    #[serde(default)]
    pub silent_validators: Vec<usize>,

    /// Assets registered in genesis besides the two native ones
    #[serde(default)]
    pub assets: Vec<AssetConfig>,

    /// Fee split tiers; the built-in 30/70 and 40/60 split when empty
    #[serde(default)]
    pub fee_tiers: Vec<FeeTierConfig>,

    /// Owner of the genesis utility allocations
    pub faucet_key: String,

    /// Number of genesis utility outputs paid to the faucet
    pub faucet_outputs: usize,

    /// Value of each faucet output
    pub faucet_amount: String,

    pub txgen: Option<TxGenConfig>,

    /// Stop once this height is committed
    pub stop_at_height: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub name: String,
    pub fee: String,
    #[serde(default = "zero_amount")]
    pub anonymous_fee: String,
    /// Hex script hash receiving the beneficiary share
    pub fee_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeTierConfig {
    /// Inclusive ceiling; absent matches any amount
    pub up_to: Option<String>,
    pub proposer: Share,
    pub beneficiary: Share,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxGenConfig {
    /// Milliseconds between generated transactions
    pub interval_ms: u64,
    /// Value each transaction sends away
    pub amount: String,
    /// Network fee each transaction leaves for the proposer
    pub fee: String,
}

fn zero_amount() -> String {
    "0".to_string()
}

fn parse_amount(value: &str) -> Result<Fixed8> {
    value
        .parse()
        .with_context(|| format!("invalid amount {value:?}"))
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time_ms)
    }

    pub fn validator_keypairs(&self) -> Result<Vec<KeyPair>> {
        if self.validator_keys.is_empty() {
            bail!("at least one validator key is required");
        }
        self.validator_keys
            .iter()
            .map(|hex| Ok(KeyPair::from_secret(SecretKey::from_hex(hex)?)))
            .collect()
    }

    pub fn faucet_keypair(&self) -> Result<KeyPair> {
        Ok(KeyPair::from_secret(SecretKey::from_hex(&self.faucet_key)?))
    }

    pub fn fee_policy(&self) -> Result<FeePolicy> {
        let mut policy = FeePolicy::default();
        if !self.fee_tiers.is_empty() {
            policy.tiers = self
                .fee_tiers
                .iter()
                .map(|tier| {
                    Ok(FeeTier {
                        up_to: tier.up_to.as_deref().map(parse_amount).transpose()?,
                        proposer: tier.proposer,
                        beneficiary: tier.beneficiary,
                    })
                })
                .collect::<Result<_>>()?;
        }
        Ok(policy)
    }

    pub fn consensus_config(&self) -> Result<ConsensusConfig> {
        Ok(ConsensusConfig {
            block_time: self.block_time(),
            max_transactions_per_block: self.max_transactions_per_block,
            fee_policy: self.fee_policy()?,
            ..ConsensusConfig::default()
        })
    }

    /// Convert genesis config to core type
    pub fn to_genesis_config(&self) -> Result<GenesisConfig> {
        let validators: Vec<_> = self.validator_keypairs()?.iter().map(|k| k.public).collect();
        if let Some(index) = self.silent_validators.iter().find(|i| **i >= validators.len()) {
            bail!("silent validator {index} is outside the roster");
        }

        let mut assets = vec![
            AssetState::native(GOVERNING_ASSET),
            AssetState::native(UTILITY_ASSET),
        ];
        for asset in &self.assets {
            let fee_address = ScriptHash::from_hex(&asset.fee_address)
                .map_err(|e| anyhow!("fee address of {}: {e}", asset.name))?;
            assets.push(AssetState::new(
                asset.name.clone(),
                parse_amount(&asset.fee)?,
                parse_amount(&asset.anonymous_fee)?,
                fee_address,
            ));
        }

        let faucet = self.faucet_keypair()?.public.script_hash();
        let amount = parse_amount(&self.faucet_amount)?;
        let utility = asset_id_for(UTILITY_ASSET);
        let allocations = (0..self.faucet_outputs)
            .map(|_| TxOutput::new(utility, amount, faucet))
            .collect();

        let timestamp = if self.genesis_timestamp == 0 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        } else {
            self.genesis_timestamp
        };

        Ok(GenesisConfig {
            timestamp,
            next_consensus: consensus_address(&validators),
            validators,
            assets,
            allocations,
        })
    }
}

/// Sample devnet with `validators` fresh keys and a transaction generator
pub fn generate_sample_config(validators: usize) -> NodeConfig {
    NodeConfig {
        block_time_ms: 2000,
        max_transactions_per_block: 500,
        mempool_max_size: 10_000,
        genesis_timestamp: 0,
        validator_keys: (0..validators)
            .map(|_| KeyPair::generate().secret.to_hex())
            .collect(),
        silent_validators: Vec::new(),
        assets: Vec::new(),
        fee_tiers: Vec::new(),
        faucet_key: KeyPair::generate().secret.to_hex(),
        faucet_outputs: 64,
        faucet_amount: "100".to_string(),
        txgen: Some(TxGenConfig {
            interval_ms: 500,
            amount: "1".to_string(),
            fee: "0.01".to_string(),
        }),
        stop_at_height: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config() {
        let config = generate_sample_config(4);
        assert_eq!(config.validator_keypairs().unwrap().len(), 4);
        assert!(config.txgen.is_some());
    }

    #[test]
    fn test_genesis_conversion() {
        let mut config = generate_sample_config(4);
        config.genesis_timestamp = 1_700_000_000;
        config.assets.push(AssetConfig {
            name: "silver".to_string(),
            fee: "2".to_string(),
            anonymous_fee: zero_amount(),
            fee_address: ScriptHash::of(b"mint").to_hex(),
        });

        let genesis = config.to_genesis_config().unwrap();
        assert_eq!(genesis.timestamp, 1_700_000_000);
        assert_eq!(genesis.validators.len(), 4);
        assert_eq!(genesis.assets.len(), 3);
        assert_eq!(genesis.assets[2].fee, Fixed8::from_units(2));
        assert_eq!(genesis.allocations.len(), 64);
        assert_eq!(genesis.next_consensus, consensus_address(&genesis.validators));
    }

    #[test]
    fn test_custom_fee_tiers() {
        let mut config = generate_sample_config(1);
        config.fee_tiers = vec![FeeTierConfig {
            up_to: None,
            proposer: Share::new(1, 2),
            beneficiary: Share::new(1, 2),
        }];
        let policy = config.fee_policy().unwrap();
        assert_eq!(policy.tiers.len(), 1);
        assert_eq!(policy.tier_for(Fixed8::from_units(100)).unwrap().proposer, Share::new(1, 2));
    }

    #[test]
    fn test_rejects_silent_index_outside_roster() {
        let mut config = generate_sample_config(4);
        config.silent_validators = vec![4];
        assert!(config.to_genesis_config().is_err());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = generate_sample_config(2);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.validator_keys, config.validator_keys);
    }
}
