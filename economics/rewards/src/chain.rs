use serde::{Deserialize, Serialize};

use smartrewards_storage::KvStore;

use crate::ledger::SmartRewards;
use crate::types::*;

/// Hooks the chain layer drives as blocks join and leave the main chain.
pub trait ChainListener {
    fn on_block_connected(&self, block: &ConnectedBlock) -> LedgerResult<UpdateResult>;

    fn on_block_disconnected(&self, height: u64, hash: Hash256) -> LedgerResult<BlockMarker>;
}

impl<S: KvStore> ChainListener for SmartRewards<S> {
    /// Near the tip every block is flushed as soon as it is applied.
    fn on_block_connected(&self, block: &ConnectedBlock) -> LedgerResult<UpdateResult> {
        let sync = self.chain_height() > 0 && self.is_synced();
        self.update(block, sync)
    }

    fn on_block_disconnected(&self, height: u64, hash: Hash256) -> LedgerResult<BlockMarker> {
        self.disconnect_block(height, hash)
    }
}

/// One line of a block feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChainEvent {
    Connected(ConnectedBlock),
    Disconnected { height: u64, hash: Hash256 },
    /// New best chain height, for sync tracking.
    Tip { height: u64 },
}

/// What applying a [`ChainEvent`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Connected(UpdateResult),
    Disconnected(BlockMarker),
    Tip,
}

/// Route one event to `listener`. Tip events update sync tracking on `ledger`.
pub fn dispatch<S: KvStore>(ledger: &SmartRewards<S>, event: &ChainEvent) -> LedgerResult<EventOutcome> {
    match event {
        ChainEvent::Connected(block) => ledger.on_block_connected(block).map(EventOutcome::Connected),
        ChainEvent::Disconnected { height, hash } => ledger
            .on_block_disconnected(*height, *hash)
            .map(EventOutcome::Disconnected),
        ChainEvent::Tip { height } => {
            ledger.update_heights(*height, ledger.reward_height());
            Ok(EventOutcome::Tip)
        }
    }
}
