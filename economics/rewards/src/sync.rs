use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sync progress of the ledger against the chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// No chain tip known yet.
    NotStarted,
    Syncing,
    Synced,
    /// Verification failed; updates are refused until a resync.
    Corrupted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::NotStarted => write!(f, "not-started"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Synced => write!(f, "synced"),
            SyncState::Corrupted => write!(f, "corrupted"),
        }
    }
}

/// Chain tip height versus the height the ledger has processed through.
#[derive(Debug, Default)]
pub struct HeightTracker {
    chain_height: AtomicU64,
    reward_height: AtomicU64,
}

impl HeightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, chain_height: u64, reward_height: u64) {
        self.chain_height.store(chain_height, Ordering::SeqCst);
        self.reward_height.store(reward_height, Ordering::SeqCst);
    }

    pub fn set_reward_height(&self, reward_height: u64) {
        self.reward_height.store(reward_height, Ordering::SeqCst);
    }

    pub fn chain_height(&self) -> u64 {
        self.chain_height.load(Ordering::SeqCst)
    }

    pub fn reward_height(&self) -> u64 {
        self.reward_height.load(Ordering::SeqCst)
    }

    /// True iff the ledger trails the chain tip by at most `distance` blocks.
    pub fn is_synced(&self, distance: u64) -> bool {
        self.chain_height().saturating_sub(self.reward_height()) <= distance
    }

    /// Processed fraction of the chain in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        let chain = self.chain_height();
        if chain == 0 {
            return 0.0;
        }
        (self.reward_height() as f64 / chain as f64).min(1.0)
    }

    pub fn state(&self, distance: u64) -> SyncState {
        if self.chain_height() == 0 {
            SyncState::NotStarted
        } else if self.is_synced(distance) {
            SyncState::Synced
        } else {
            SyncState::Syncing
        }
    }
}
