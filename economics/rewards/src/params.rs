use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::*;

/// Minimum balance an address must hold to qualify for a round.
pub const SMART_REWARDS_MIN_BALANCE: Amount = 1000 * COIN;

/// Blocks staged in memory before a batch write.
pub const CACHE_BLOCKS: usize = 50;

/// Maximum distance between chain tip and processed height to count as synced.
pub const REWARDS_SYNC_DISTANCE: u64 = 30;

/// Default number of recent blocks kept reversible.
pub const MAX_REORG_DEPTH: u64 = 100;

/// First height the ledger processes; the genesis block carries no spendable outputs.
pub const LEDGER_START_HEIGHT: u64 = 1;

// Mainnet first round.
pub const FIRST_ROUND_START_TIME: i64 = 1_500_966_000;
pub const FIRST_ROUND_END_TIME: i64 = 1_503_644_400;
pub const FIRST_ROUND_START_BLOCK: u64 = 1;
pub const FIRST_ROUND_END_BLOCK: u64 = 60_001;

// Testnet first round. Starts with the first real testnet transaction.
pub const FIRST_TX_TIMESTAMP_TESTNET: i64 = 1_526_307_133;
pub const FIRST_ROUND_START_TIME_TESTNET: i64 = FIRST_TX_TIMESTAMP_TESTNET;
pub const FIRST_ROUND_END_TIME_TESTNET: i64 = FIRST_ROUND_START_TIME_TESTNET + 24 * 60 * 60;
pub const FIRST_ROUND_START_BLOCK_TESTNET: u64 = 1;
pub const FIRST_ROUND_END_BLOCK_TESTNET: u64 = 1_570;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Height and time bounds of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundBounds {
    pub start_height: u64,
    pub end_height: u64,
    pub start_time: i64,
    pub end_time: i64,
}

/// Network-specific reward schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,
    /// Bounds of round 1.
    pub first_round: RoundBounds,
    /// Length in blocks of every round after the first.
    pub round_blocks: u64,
    /// Nominal duration in seconds of every round after the first.
    pub round_seconds: i64,
    /// Reward set aside per block for distribution.
    pub reward_per_block: Amount,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            first_round: RoundBounds {
                start_height: FIRST_ROUND_START_BLOCK,
                end_height: FIRST_ROUND_END_BLOCK,
                start_time: FIRST_ROUND_START_TIME,
                end_time: FIRST_ROUND_END_TIME,
            },
            round_blocks: 47_127,
            round_seconds: 30 * 24 * 60 * 60,
            reward_per_block: 750 * COIN,
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            first_round: RoundBounds {
                start_height: FIRST_ROUND_START_BLOCK_TESTNET,
                end_height: FIRST_ROUND_END_BLOCK_TESTNET,
                start_time: FIRST_ROUND_START_TIME_TESTNET,
                end_time: FIRST_ROUND_END_TIME_TESTNET,
            },
            round_blocks: 1_570,
            round_seconds: 24 * 60 * 60,
            reward_per_block: 750 * COIN,
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
        }
    }

    /// Total reward accumulated over `start..=end`.
    pub fn rewards_for_block_range(&self, start: u64, end: u64) -> Amount {
        if end < start {
            return 0;
        }
        (end - start + 1).saturating_mul(self.reward_per_block)
    }

    /// The bootstrap round, not yet active.
    pub fn first_round(&self) -> Round {
        let b = self.first_round;
        Round {
            number: 1,
            start_height: b.start_height,
            end_height: b.end_height,
            start_time: b.start_time,
            end_time: b.end_time,
            status: RoundStatus::Pending,
            total_reward: self.rewards_for_block_range(b.start_height, b.end_height),
            eligible_entries: 0,
            eligible_weight: 0,
            paid: 0,
            disqualified_entries: 0,
            disqualified_balance: 0,
        }
    }

    /// The round that follows `current`, starting right after its last block.
    pub fn next_round(&self, current: &Round, start_time: i64) -> LedgerResult<Round> {
        let number = current.number.checked_add(1).ok_or(LedgerError::Overflow)?;
        let start_height = current.end_height + 1;
        let end_height = start_height + self.round_blocks - 1;
        Ok(Round {
            number,
            start_height,
            end_height,
            start_time,
            end_time: start_time + self.round_seconds,
            status: RoundStatus::Pending,
            total_reward: self.rewards_for_block_range(start_height, end_height),
            eligible_entries: 0,
            eligible_weight: 0,
            paid: 0,
            disqualified_entries: 0,
            disqualified_balance: 0,
        })
    }
}
