use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::params::*;
use crate::types::Amount;

/// How an eligible entry's weight is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    /// Full balance at round end.
    #[default]
    Flat,
    /// Balance scaled by the share of the round it was held.
    TimeWeighted,
}

/// Errors loading or validating a [`LedgerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cache_blocks must be greater than zero")]
    ZeroCacheBlocks,

    #[error("max_flush_failures must be greater than zero")]
    ZeroFlushBudget,

    #[error("max_reorg_depth must be greater than zero")]
    ZeroReorgDepth,
}

/// Tunables of the rewards ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub network: Network,
    /// Blocks staged before a batch write.
    pub cache_blocks: usize,
    /// Tip distance within which the ledger counts as synced.
    pub sync_distance: u64,
    /// Eligibility floor.
    pub min_balance: Amount,
    pub weight_scheme: WeightScheme,
    /// Consecutive failed writes after which the ledger halts.
    pub max_flush_failures: u32,
    /// Blocks below the tip that can still be disconnected. Undo data for
    /// older blocks is deleted on flush.
    pub max_reorg_depth: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            cache_blocks: CACHE_BLOCKS,
            sync_distance: REWARDS_SYNC_DISTANCE,
            min_balance: SMART_REWARDS_MIN_BALANCE,
            weight_scheme: WeightScheme::Flat,
            max_flush_failures: 3,
            max_reorg_depth: MAX_REORG_DEPTH,
        }
    }
}

impl LedgerConfig {
    /// Default configuration for `network`.
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_blocks == 0 {
            return Err(ConfigError::ZeroCacheBlocks);
        }
        if self.max_flush_failures == 0 {
            return Err(ConfigError::ZeroFlushBudget);
        }
        if self.max_reorg_depth == 0 {
            return Err(ConfigError::ZeroReorgDepth);
        }
        Ok(())
    }

    /// Reward schedule of the configured network.
    pub fn chain_params(&self) -> ChainParams {
        ChainParams::for_network(self.network)
    }
}
