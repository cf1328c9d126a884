//! Chain and mempool configuration
//!
//! Genesis parameters are an explicit value handed to the chain at
//! construction. They are never mutated afterwards.

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Consensus parameters fixed at chain creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub timestamp: i64,
    pub initial_difficulty: u32,
    pub initial_reward: u64,
    pub max_supply: u64,
    pub halving_interval: u64,
    pub difficulty_window: u64,
    pub target_block_interval: u64,
    #[serde(default = "default_max_tx_per_block")]
    pub max_tx_per_block: usize,
}

fn default_version() -> u32 {
    LEDGER_VERSION
}

fn default_max_tx_per_block() -> usize {
    MAX_TX_PER_BLOCK
}

impl GenesisConfig {
    pub fn mainnet() -> Self {
        Self {
            chain_id: MAINNET_CHAIN_ID.to_string(),
            version: LEDGER_VERSION,
            timestamp: MAINNET_GENESIS_TIMESTAMP,
            initial_difficulty: INITIAL_DIFFICULTY,
            initial_reward: INITIAL_REWARD,
            max_supply: MAX_SUPPLY,
            halving_interval: HALVING_INTERVAL,
            difficulty_window: DIFFICULTY_WINDOW,
            target_block_interval: TARGET_BLOCK_INTERVAL,
            max_tx_per_block: MAX_TX_PER_BLOCK,
        }
    }

    /// Mainnet parameters with a 10 coin reward
    pub fn testnet() -> Self {
        Self {
            chain_id: TESTNET_CHAIN_ID.to_string(),
            initial_reward: 10 * UNITS_PER_COIN,
            ..Self::mainnet()
        }
    }

    /// Trivial proof of work and a short retarget window, for tests and local use
    pub fn regtest() -> Self {
        Self {
            chain_id: REGTEST_CHAIN_ID.to_string(),
            initial_difficulty: 1,
            halving_interval: 150,
            difficulty_window: 10,
            target_block_interval: 1,
            ..Self::mainnet()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.halving_interval == 0 {
            return Err(ConsensusError::Config("halving_interval must be positive".to_string()));
        }
        if self.difficulty_window == 0 {
            return Err(ConsensusError::Config("difficulty_window must be positive".to_string()));
        }
        if self.target_block_interval == 0 {
            return Err(ConsensusError::Config(
                "target_block_interval must be positive".to_string(),
            ));
        }
        if self.initial_reward > self.max_supply {
            return Err(ConsensusError::Config(format!(
                "initial_reward {} exceeds max_supply {}",
                self.initial_reward, self.max_supply
            )));
        }
        if self.max_tx_per_block == 0 {
            return Err(ConsensusError::Config("max_tx_per_block must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Mempool limits and expiry schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolConfig {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_size() -> usize {
    DEFAULT_MEMPOOL_SIZE
}

fn default_max_age_secs() -> u64 {
    DEFAULT_MEMPOOL_MAX_AGE_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_MEMPOOL_SWEEP_SECS
}

impl MempoolConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MEMPOOL_SIZE,
            max_age_secs: DEFAULT_MEMPOOL_MAX_AGE_SECS,
            sweep_interval_secs: DEFAULT_MEMPOOL_SWEEP_SECS,
        }
    }
}

/// Everything needed to open a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub genesis: GenesisConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
}

impl NodeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NodeConfig = serde_json::from_str(json)
            .map_err(|e| ConsensusError::Config(format!("invalid config: {}", e)))?;
        config.genesis.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ConsensusError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn regtest() -> Self {
        Self {
            genesis: GenesisConfig::regtest(),
            mempool: MempoolConfig::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            genesis: GenesisConfig::mainnet(),
            mempool: MempoolConfig::default(),
        }
    }
}
