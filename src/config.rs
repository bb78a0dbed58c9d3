//! Engine configuration.
//!
//! Defaults, then an optional file (TOML/YAML/JSON by extension), then
//! `OMNI_*` environment variables (`OMNI_DIFFICULTY=3`,
//! `OMNI_DATA_DIR=/var/lib/omni`). The merged result is validated before use.

use omni_core::AssetPolicy;
use omni_economics::FeeSchedule;
use omni_governance::GovernanceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Highest accepted difficulty (leading zero hex nibbles)
pub const MAX_DIFFICULTY: u8 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: String,
    pub asset: String,
    /// Minor units, the same width as ledger balances
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Required leading zero hex nibbles per block hash
    pub difficulty: u8,

    /// Fee unit multiplied by each kind's basis-point multiplier
    pub base_fee: u64,

    pub fee_asset: String,
    pub fee_sink: String,
    pub known_assets: Vec<String>,

    pub governance_asset: String,
    pub governance_registry: String,

    /// Genesis block timestamp (ms since Unix epoch)
    pub genesis_timestamp: u64,
    pub genesis_allocations: Vec<GenesisAllocation>,

    /// Pending transactions older than this are dropped by `prune_mempool`
    pub mempool_ttl_secs: u64,

    /// Nonces tried between cancellation checks
    pub mining_check_interval: u64,

    /// Pause between background mining rounds
    pub mining_interval_ms: u64,

    /// Enables the block log and snapshots when set
    pub data_dir: Option<PathBuf>,

    /// Write a ledger snapshot every N blocks
    pub snapshot_interval: u64,

    /// Seed for rarity draws and key generation; entropy when unset
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            difficulty: 4,
            base_fee: omni_economics::DEFAULT_BASE_FEE as u64,
            fee_asset: "OMNI".to_string(),
            fee_sink: "omni-fee-sink".to_string(),
            known_assets: vec!["OMNI".to_string(), "LOYAL".to_string(), "GOV".to_string()],
            governance_asset: "GOV".to_string(),
            governance_registry: "omni-governance".to_string(),
            genesis_timestamp: 1_700_000_000_000,
            genesis_allocations: Vec::new(),
            mempool_ttl_secs: 3_600,
            mining_check_interval: omni_consensus::DEFAULT_CHECK_INTERVAL,
            mining_interval_ms: 1_000,
            data_dir: None,
            snapshot_interval: 10,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    /// Load defaults, the optional file and `OMNI_*` overrides, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OMNI")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("known_assets"),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds {}",
                self.difficulty, MAX_DIFFICULTY
            )));
        }
        if !self.known_assets.iter().any(|a| a == &self.fee_asset) {
            return Err(ConfigError::Invalid(format!(
                "fee_asset {} is not a known asset",
                self.fee_asset
            )));
        }
        if !self.known_assets.iter().any(|a| a == &self.governance_asset) {
            return Err(ConfigError::Invalid(format!(
                "governance_asset {} is not a known asset",
                self.governance_asset
            )));
        }
        if self.known_assets.iter().any(|a| a == omni_core::NFT_ASSET) {
            return Err(ConfigError::Invalid(format!(
                "{} is reserved for collectibles",
                omni_core::NFT_ASSET
            )));
        }
        if self.fee_sink.is_empty() || self.governance_registry.is_empty() {
            return Err(ConfigError::Invalid(
                "fee_sink and governance_registry must be set".to_string(),
            ));
        }
        if self.snapshot_interval == 0 {
            return Err(ConfigError::Invalid("snapshot_interval must be > 0".to_string()));
        }
        if self.mining_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "mining_check_interval must be > 0".to_string(),
            ));
        }
        for allocation in &self.genesis_allocations {
            if allocation.address.is_empty() || allocation.amount == 0 {
                return Err(ConfigError::Invalid(format!(
                    "genesis allocation {:?} needs an address and a nonzero amount",
                    allocation
                )));
            }
            if !self.known_assets.contains(&allocation.asset) {
                return Err(ConfigError::Invalid(format!(
                    "genesis allocation uses unknown asset {}",
                    allocation.asset
                )));
            }
        }
        self.fee_schedule().validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn asset_policy(&self) -> AssetPolicy {
        AssetPolicy::new(self.known_assets.iter().cloned(), &self.fee_asset, &self.fee_sink)
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule::new(self.base_fee as u128)
    }

    pub fn governance(&self) -> GovernanceConfig {
        GovernanceConfig {
            registry_address: self.governance_registry.clone(),
            governance_asset: self.governance_asset.clone(),
            record_asset: self.fee_asset.clone(),
        }
    }

    /// Genesis allocations as `(address, asset, amount)` triples
    pub fn allocations(&self) -> Vec<(String, String, u128)> {
        self.genesis_allocations
            .iter()
            .map(|a| (a.address.clone(), a.asset.clone(), a.amount))
            .collect()
    }

    pub fn mempool_ttl_ms(&self) -> u64 {
        self.mempool_ttl_secs.saturating_mul(1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_excessive_difficulty() {
        let config = EngineConfig {
            difficulty: 17,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_fee_asset() {
        let config = EngineConfig {
            fee_asset: "BTC".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_allocation_in_unknown_asset() {
        let config = EngineConfig {
            genesis_allocations: vec![GenesisAllocation {
                address: "alice".into(),
                asset: "XYZ".into(),
                amount: 5,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allocation_beyond_u64_is_kept_whole() {
        let big = u64::MAX as u128 * 3;
        let config = EngineConfig {
            genesis_allocations: vec![GenesisAllocation {
                address: "alice".into(),
                asset: "OMNI".into(),
                amount: big,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.allocations(), vec![("alice".into(), "OMNI".into(), big)]);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
difficulty = 2
base_fee = 10
rng_seed = 42

[[genesis_allocations]]
address = "alice"
asset = "OMNI"
amount = 1000
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.base_fee, 10);
        assert_eq!(config.rng_seed, Some(42));
        assert_eq!(config.fee_asset, "OMNI");
        assert_eq!(config.allocations(), vec![("alice".into(), "OMNI".into(), 1000u128)]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/omni.toml");
        assert!(matches!(
            EngineConfig::load(Some(missing)),
            Err(ConfigError::Load(_))
        ));
    }
}
