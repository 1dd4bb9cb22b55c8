use std::collections::{BTreeMap, HashSet};

use crate::db::LedgerBatch;
use crate::types::*;

/// Mutations staged in memory between two flushes.
///
/// Owned by the update coordinator; replaced by a fresh value after every
/// successful write.
#[derive(Debug, Default)]
pub struct PendingBatch {
    entries: BTreeMap<Address, RewardEntry>,
    blocks: Vec<BlockMarker>,
    undos: Vec<BlockUndo>,
    transactions: Vec<RewardTransaction>,
    transaction_hashes: HashSet<Hash256>,
    rounds: BTreeMap<RoundNumber, Round>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the latest state of an entry.
    pub fn prepare_for_update(&mut self, entry: RewardEntry) {
        self.entries.insert(entry.address.clone(), entry);
    }

    /// Stage a processed block together with the data needed to revert it.
    pub fn add_block(&mut self, block: BlockMarker, undo: BlockUndo) {
        self.blocks.push(block);
        self.undos.push(undo);
    }

    pub fn add_transaction(&mut self, tx: RewardTransaction) {
        self.transaction_hashes.insert(tx.hash);
        self.transactions.push(tx);
    }

    pub fn stage_round(&mut self, round: Round) {
        self.rounds.insert(round.number, round);
    }

    pub fn entry(&self, address: &Address) -> Option<&RewardEntry> {
        self.entries.get(address)
    }

    pub fn contains_transaction(&self, hash: &Hash256) -> bool {
        self.transaction_hashes.contains(hash)
    }

    pub fn last_block(&self) -> Option<&BlockMarker> {
        self.blocks.last()
    }

    /// Number of staged blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
            && self.entries.is_empty()
            && self.transactions.is_empty()
            && self.rounds.is_empty()
    }

    /// Encode everything staged into one batch. Staging is left untouched so a
    /// failed write can be retried.
    pub fn to_batch(&self) -> LedgerResult<LedgerBatch> {
        let mut batch = LedgerBatch::new();
        for entry in self.entries.values() {
            batch.put_entry(entry)?;
        }
        for block in &self.blocks {
            batch.put_block(block)?;
        }
        for undo in &self.undos {
            batch.put_undo(undo)?;
        }
        for tx in &self.transactions {
            batch.put_transaction(tx)?;
        }
        for round in self.rounds.values() {
            batch.put_round(round)?;
        }
        if let Some(tip) = self.blocks.last() {
            batch.set_tip(Some(tip))?;
        }
        Ok(batch)
    }
}
