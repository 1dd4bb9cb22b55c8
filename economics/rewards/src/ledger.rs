use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, error, info, warn};

use smartrewards_storage::KvStore;

use crate::config::LedgerConfig;
use crate::db::{LedgerBatch, LedgerDb};
use crate::evaluator::{evaluate_round, EvaluationPolicy, RoundEvaluation};
use crate::params::{ChainParams, LEDGER_START_HEIGHT};
use crate::pending::PendingBatch;
use crate::sync::{HeightTracker, SyncState};
use crate::types::*;

/// Reverse of the current tip, built by [`SmartRewards::prepare_for_remove`].
#[derive(Debug)]
pub struct PreparedRollback {
    /// Block being removed.
    pub block: BlockMarker,
    /// Tip after the rollback.
    pub previous: Option<BlockMarker>,
    batch: LedgerBatch,
    restored_round: Option<Round>,
    reopened_round: Option<RoundNumber>,
}

/// Diagnostic counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub entries: usize,
    pub blocks: usize,
    pub rounds: usize,
    pub staged_blocks: usize,
    pub last_block: Option<BlockMarker>,
}

/// State behind the store lock.
#[derive(Default)]
struct WriterState {
    pending: PendingBatch,
    /// Last processed block, staged or committed.
    tip: Option<BlockMarker>,
    /// Working copy of the current round, including staged changes.
    round: Option<Round>,
    flush_failures: u32,
    /// Undo data at or below this height has been pruned.
    undo_floor: u64,
    halted: Option<String>,
    prepared: Option<PreparedRollback>,
}

/// Committed round view, behind the round-state lock.
#[derive(Default)]
struct RoundState {
    current: Option<Round>,
    finished: Vec<Round>,
}

/// Everything one block changes, computed before anything is staged.
struct AppliedBlock {
    marker: BlockMarker,
    entries: Vec<RewardEntry>,
    transactions: Vec<RewardTransaction>,
    undo: BlockUndo,
    round: Option<Round>,
    disqualified_entries: u64,
    disqualified_smart: u64,
    disqualified_amount: Amount,
}

/// The rewards ledger: applies connected blocks, stages their effects,
/// flushes them in batches, closes rounds, and rolls blocks back on reorg.
///
/// Lock order: the store lock (`writer`) is always taken before the
/// round-state lock (`rounds`). Readers take at most the round-state lock and
/// only ever see committed store state.
pub struct SmartRewards<S> {
    db: LedgerDb<S>,
    params: ChainParams,
    config: LedgerConfig,
    writer: Mutex<WriterState>,
    rounds: Mutex<RoundState>,
    heights: HeightTracker,
    corrupted: AtomicBool,
    staged_blocks: AtomicUsize,
}

impl<S: KvStore> SmartRewards<S> {
    /// Load ledger state from `store` and verify it.
    ///
    /// A store that fails verification still opens, but halted: updates are
    /// refused until [`SmartRewards::resync`].
    pub fn open(store: S, params: ChainParams, config: LedgerConfig) -> LedgerResult<Self> {
        config
            .validate()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        let db = LedgerDb::new(store);
        let tip = db.tip()?;
        let undo_floor = db.undo_floor()?;
        let (finished, open): (Vec<Round>, Vec<Round>) =
            db.rounds()?.into_iter().partition(Round::is_finished);

        let heights = HeightTracker::new();
        heights.set_reward_height(tip.as_ref().map_or(0, |b| b.height));

        let ledger = Self {
            db,
            params,
            config,
            writer: Mutex::new(WriterState {
                tip: tip.clone(),
                round: open.last().cloned(),
                undo_floor,
                ..WriterState::default()
            }),
            rounds: Mutex::new(RoundState {
                current: open.last().cloned(),
                finished,
            }),
            heights,
            corrupted: AtomicBool::new(false),
            staged_blocks: AtomicUsize::new(0),
        };

        match ledger.verify() {
            Ok(()) => info!(
                network = %ledger.params.network,
                tip = tip.as_ref().map_or(0, |b| b.height),
                round = ledger.get_current_round().map_or(0, |r| r.number),
                "rewards ledger opened"
            ),
            Err(e) => {
                error!(error = %e, "rewards ledger failed verification, halting until resync");
                ledger.writer.lock().halted = Some(e.to_string());
                ledger.corrupted.store(true, Ordering::SeqCst);
            }
        }

        Ok(ledger)
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        self.db.store()
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn policy(&self) -> EvaluationPolicy {
        EvaluationPolicy {
            min_balance: self.config.min_balance,
            weight_scheme: self.config.weight_scheme,
        }
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Apply the next block on the main chain.
    ///
    /// `block.height` must be exactly one above the last processed block.
    /// Staged state is written out every `cache_blocks` blocks, when `sync` is
    /// set, and before a round is finalized.
    pub fn update(&self, block: &ConnectedBlock, sync: bool) -> LedgerResult<UpdateResult> {
        let mut guard = self.writer.lock();
        let w = &mut *guard;
        if let Some(reason) = &w.halted {
            return Err(LedgerError::Halted(reason.clone()));
        }

        if let Some(tip) = w.tip.clone() {
            if tip.height == block.height && tip.hash == block.hash {
                // Already staged; the caller is retrying after a failed write.
                let flushed = !w.pending.is_empty();
                self.flush_locked(w)?;
                let finalized_round = self.finalize_overdue(w)?;
                return Ok(UpdateResult {
                    disqualified_entries: 0,
                    disqualified_smart: 0,
                    disqualified_amount: 0,
                    block: tip,
                    applied: false,
                    flushed,
                    finalized_round,
                });
            }
        }

        let expected = w.tip.as_ref().map_or(LEDGER_START_HEIGHT, |t| t.height + 1);
        if block.height != expected {
            warn!(expected, got = block.height, "rejecting out-of-order block");
            return Err(LedgerError::Sequencing {
                expected,
                got: block.height,
            });
        }

        self.finalize_overdue(w)?;
        if w.round.is_none() && block.height >= self.params.first_round.start_height {
            self.start_first_round(w)?;
        }

        let AppliedBlock {
            marker,
            entries,
            transactions,
            undo,
            round,
            disqualified_entries,
            disqualified_smart,
            disqualified_amount,
        } = self.apply_block(w, block)?;

        for entry in entries {
            w.pending.prepare_for_update(entry);
        }
        for tx in transactions {
            w.pending.add_transaction(tx);
        }
        if round != w.round {
            if let Some(r) = &round {
                w.pending.stage_round(r.clone());
            }
        }
        w.pending.add_block(marker.clone(), undo);
        w.round = round;
        w.tip = Some(marker.clone());
        self.staged_blocks
            .store(w.pending.block_count(), Ordering::SeqCst);
        self.heights.set_reward_height(marker.height);

        let closes_round = w.round.as_ref().map_or(false, |r| {
            r.status == RoundStatus::Active && marker.height >= r.end_height
        });

        let mut flushed = false;
        if sync || closes_round || w.pending.block_count() >= self.config.cache_blocks {
            self.flush_locked(w)?;
            flushed = true;
        }
        let finalized_round = if closes_round {
            self.finalize_overdue(w)?
        } else {
            None
        };

        debug!(
            height = marker.height,
            disqualified = disqualified_entries,
            flushed,
            "block applied to rewards ledger"
        );

        Ok(UpdateResult {
            disqualified_entries,
            disqualified_smart,
            disqualified_amount,
            block: marker,
            applied: true,
            flushed,
            finalized_round,
        })
    }

    /// Compute the effects of `block` without touching staging, so a rejected
    /// block leaves no trace.
    fn apply_block(&self, w: &WriterState, block: &ConnectedBlock) -> LedgerResult<AppliedBlock> {
        let mut touched: BTreeMap<Address, RewardEntry> = BTreeMap::new();
        let mut undo = BlockUndo::new(block.height, block.hash);
        let mut transactions = Vec::new();

        let prior_round = w.round.clone();
        let mut round = w.round.clone();
        if let Some(r) = round.as_mut() {
            if r.status == RoundStatus::Pending && block.height >= r.start_height {
                r.status = RoundStatus::Active;
                info!(round = r.number, height = block.height, "reward round active");
            }
        }
        let active = round
            .as_ref()
            .filter(|r| r.status == RoundStatus::Active && r.contains(block.height))
            .cloned();

        let mut disqualified_entries = 0u64;
        let mut disqualified_smart = 0u64;
        let mut disqualified_amount: Amount = 0;

        for tx in &block.transactions {
            if tx.deltas.is_empty() {
                continue;
            }
            if undo.transactions.contains(&tx.hash)
                || w.pending.contains_transaction(&tx.hash)
                || self.db.transaction(&tx.hash)?.is_some()
            {
                warn!(tx = %tx.hash, height = block.height, "transaction already recorded, skipping");
                continue;
            }

            for delta in &tx.deltas {
                let entry = match touched.entry(delta.address.clone()) {
                    btree_map::Entry::Occupied(o) => o.into_mut(),
                    btree_map::Entry::Vacant(v) => {
                        let prior = match w.pending.entry(&delta.address) {
                            Some(e) => Some(e.clone()),
                            None => self.db.entry(&delta.address)?,
                        };
                        undo.entries.push((delta.address.clone(), prior.clone()));
                        v.insert(prior.unwrap_or_else(|| RewardEntry::new(delta.address.clone())))
                    }
                };

                if let Some(r) = &active {
                    entry.settle_weight(r, block.height);
                }

                if delta.amount >= 0 {
                    entry.credit(delta.amount as Amount)?;
                } else {
                    let before = entry.balance;
                    entry.debit(delta.amount.unsigned_abs())?;
                    // Any transfer out during an active round forfeits it.
                    if let Some(r) = &active {
                        if !entry.is_disqualified_in(r.number) {
                            entry.disqualify(r.number, block.height);
                            disqualified_entries += 1;
                            if before >= self.config.min_balance {
                                disqualified_smart += 1;
                                disqualified_amount = disqualified_amount.saturating_add(before);
                            }
                        }
                    }
                }
                entry.last_changed_height = block.height;
            }

            undo.transactions.push(tx.hash);
            transactions.push(RewardTransaction {
                hash: tx.hash,
                height: block.height,
            });
        }

        if let Some(r) = round.as_mut() {
            r.disqualified_entries += disqualified_entries;
            r.disqualified_balance = r.disqualified_balance.saturating_add(disqualified_amount);
        }
        if round != prior_round {
            if let Some(prior) = prior_round {
                undo.rounds.push(prior);
            }
        }

        Ok(AppliedBlock {
            marker: BlockMarker {
                height: block.height,
                hash: block.hash,
                time: block.time,
                processed_at: chrono::Utc::now().timestamp(),
            },
            entries: touched.into_values().collect(),
            transactions,
            undo,
            round,
            disqualified_entries,
            disqualified_smart,
            disqualified_amount,
        })
    }

    /// Write one batch, tracking consecutive failures. Reaching the configured
    /// budget halts the ledger.
    fn commit(&self, w: &mut WriterState, batch: LedgerBatch) -> LedgerResult<()> {
        match self.db.write(batch) {
            Ok(()) => {
                w.flush_failures = 0;
                Ok(())
            }
            Err(e) => {
                w.flush_failures += 1;
                error!(failures = w.flush_failures, error = %e, "rewards batch write failed");
                if w.flush_failures >= self.config.max_flush_failures {
                    let reason = format!("{} consecutive write failures, last: {e}", w.flush_failures);
                    error!(%reason, "halting rewards ledger");
                    w.halted = Some(reason);
                }
                Err(e)
            }
        }
    }

    /// Write everything staged. On failure staging is kept for a retry.
    ///
    /// The same batch deletes undo data that fell out of the reorg window.
    fn flush_locked(&self, w: &mut WriterState) -> LedgerResult<()> {
        if w.pending.is_empty() {
            return Ok(());
        }
        let mut batch = w.pending.to_batch()?;
        let blocks = w.pending.block_count();
        let entries = w.pending.entry_count();

        // Deletes follow the puts, so undo staged below the floor is dropped too.
        let tip_height = w.tip.as_ref().map_or(0, |b| b.height);
        let floor = tip_height.saturating_sub(self.config.max_reorg_depth);
        if floor > w.undo_floor {
            for height in w.undo_floor + 1..=floor {
                batch.delete_undo(height);
            }
            batch.set_undo_floor(floor)?;
        }

        let mut rounds = self.rounds.lock();
        self.commit(w, batch)?;
        rounds.current = w.round.clone();
        drop(rounds);

        if floor > w.undo_floor {
            debug!(floor, pruned = floor - w.undo_floor, "pruned undo data");
            w.undo_floor = floor;
        }
        w.pending = PendingBatch::new();
        self.staged_blocks.store(0, Ordering::SeqCst);
        debug!(
            blocks,
            entries,
            tip = w.tip.as_ref().map_or(0, |b| b.height),
            "flushed staged rewards batch"
        );
        Ok(())
    }

    /// Persist round 1 as pending.
    fn start_first_round(&self, w: &mut WriterState) -> LedgerResult<()> {
        let round = self.params.first_round();
        let mut batch = LedgerBatch::new();
        batch.put_round(&round)?;

        let mut rounds = self.rounds.lock();
        self.commit(w, batch)?;
        rounds.current = Some(round.clone());

        info!(
            start = round.start_height,
            end = round.end_height,
            total_reward = round.total_reward,
            "first reward round scheduled"
        );
        w.round = Some(round);
        Ok(())
    }

    /// Finalize the current round if the tip has reached its last block.
    fn finalize_overdue(&self, w: &mut WriterState) -> LedgerResult<Option<RoundNumber>> {
        let (Some(round), Some(tip)) = (w.round.clone(), w.tip.clone()) else {
            return Ok(None);
        };
        if round.status != RoundStatus::Active || tip.height < round.end_height {
            return Ok(None);
        }

        // Everything up to the closing block must be durable first.
        self.flush_locked(w)?;

        let entries = self.db.entries()?;
        let evaluation = match evaluate_round(&round, &entries, &self.policy(), &self.params, tip.time) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                error!(round = round.number, error = %e, "round evaluation failed, halting");
                w.halted = Some(e.to_string());
                return Err(e);
            }
        };
        self.finalize_round(w, &round, evaluation, &tip)?;
        Ok(Some(round.number))
    }

    /// Close `current` and open its successor in one batch: finished round,
    /// snapshots, pending successor, and the closing block's undo record.
    fn finalize_round(
        &self,
        w: &mut WriterState,
        current: &Round,
        evaluation: RoundEvaluation,
        closing: &BlockMarker,
    ) -> LedgerResult<()> {
        let RoundEvaluation {
            finished,
            next,
            snapshots,
        } = evaluation;

        let mut undo = self.db.undo(closing.height)?.ok_or_else(|| {
            LedgerError::Corrupted(format!("missing undo record for block {}", closing.height))
        })?;
        undo.rounds.push(current.clone());
        undo.created_rounds.push(next.number);
        undo.finalized_round = Some(finished.number);

        let mut batch = LedgerBatch::new();
        batch.put_round(&finished)?;
        batch.put_round(&next)?;
        for snapshot in &snapshots {
            batch.put_snapshot(snapshot)?;
        }
        batch.put_undo(&undo)?;

        let mut rounds = self.rounds.lock();
        self.commit(w, batch)?;
        rounds.current = Some(next.clone());
        rounds.finished.push(finished.clone());
        drop(rounds);

        info!(
            round = finished.number,
            eligible = finished.eligible_entries,
            total_reward = finished.total_reward,
            paid = finished.paid,
            unallocated = finished.total_reward - finished.paid,
            next_start = next.start_height,
            next_end = next.end_height,
            "reward round finalized"
        );
        w.round = Some(next);
        Ok(())
    }

    /// Write out everything staged, e.g. before shutdown.
    pub fn flush(&self) -> LedgerResult<()> {
        let mut guard = self.writer.lock();
        let w = &mut *guard;
        if let Some(reason) = &w.halted {
            return Err(LedgerError::Halted(reason.clone()));
        }
        self.flush_locked(w)
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    /// Build the rollback of the tip block `(height, hash)` and keep it until
    /// [`commit_prepared`](Self::commit_prepared) or
    /// [`remove_prepared`](Self::remove_prepared).
    pub fn prepare_for_remove(&self, height: u64, hash: Hash256) -> LedgerResult<BlockMarker> {
        let mut guard = self.writer.lock();
        self.prepare_locked(&mut guard, height, hash)
    }

    fn prepare_locked(&self, w: &mut WriterState, height: u64, hash: Hash256) -> LedgerResult<BlockMarker> {
        if let Some(reason) = &w.halted {
            return Err(LedgerError::Halted(reason.clone()));
        }
        // Undo records live in the store.
        self.flush_locked(w)?;

        let tip = w.tip.clone().ok_or(LedgerError::Sequencing {
            expected: 0,
            got: height,
        })?;
        if tip.height != height {
            return Err(LedgerError::Sequencing {
                expected: tip.height,
                got: height,
            });
        }
        if tip.hash != hash {
            return Err(LedgerError::HashMismatch {
                height,
                expected: tip.hash,
                got: hash,
            });
        }

        if height <= w.undo_floor {
            warn!(height, floor = w.undo_floor, "disconnect below the reorg window refused");
            return Err(LedgerError::ReorgTooDeep {
                height,
                floor: w.undo_floor,
            });
        }
        let undo = self
            .db
            .undo(height)?
            .ok_or_else(|| LedgerError::Corrupted(format!("missing undo record for block {height}")))?;
        let previous = if height > LEDGER_START_HEIGHT {
            Some(self.db.block(height - 1)?.ok_or_else(|| {
                LedgerError::Corrupted(format!("missing block marker {}", height - 1))
            })?)
        } else {
            None
        };

        let mut batch = LedgerBatch::new();
        for (address, prior) in &undo.entries {
            match prior {
                Some(entry) => batch.put_entry(entry)?,
                None => batch.delete_entry(address),
            }
        }
        for tx in &undo.transactions {
            batch.delete_transaction(tx);
        }
        if let Some(number) = undo.finalized_round {
            for snapshot in self.db.snapshots(number)? {
                batch.delete_snapshot(number, &snapshot.address);
            }
        }
        for number in &undo.created_rounds {
            batch.delete_round(*number);
        }
        let originals = undo.original_rounds();
        for round in &originals {
            batch.put_round(round)?;
        }
        batch.delete_block(height);
        batch.delete_undo(height);
        batch.set_tip(previous.as_ref())?;

        let restored_round = match originals.iter().max_by_key(|r| r.number) {
            Some(round) => Some(round.clone()),
            None => w.round.clone(),
        };

        debug!(height, entries = undo.entries.len(), "rollback prepared");
        w.prepared = Some(PreparedRollback {
            block: tip.clone(),
            previous,
            batch,
            restored_round,
            reopened_round: undo.finalized_round,
        });
        Ok(tip)
    }

    /// Apply the prepared rollback. On a write failure it stays prepared.
    pub fn commit_prepared(&self) -> LedgerResult<BlockMarker> {
        let mut guard = self.writer.lock();
        self.commit_prepared_locked(&mut guard)
    }

    fn commit_prepared_locked(&self, w: &mut WriterState) -> LedgerResult<BlockMarker> {
        if let Some(reason) = &w.halted {
            return Err(LedgerError::Halted(reason.clone()));
        }
        let prepared = w.prepared.as_ref().ok_or(LedgerError::NoRollbackPrepared)?;
        if w.tip.as_ref() != Some(&prepared.block) || !w.pending.is_empty() {
            return Err(LedgerError::Sequencing {
                expected: w.tip.as_ref().map_or(0, |b| b.height),
                got: prepared.block.height,
            });
        }
        let batch = prepared.batch.clone();

        let mut rounds = self.rounds.lock();
        self.commit(w, batch)?;

        let Some(prepared) = w.prepared.take() else {
            return Err(LedgerError::NoRollbackPrepared);
        };
        rounds.current = prepared.restored_round.clone();
        if let Some(number) = prepared.reopened_round {
            rounds.finished.retain(|r| r.number != number);
        }
        drop(rounds);

        w.round = prepared.restored_round;
        w.tip = prepared.previous;
        self.heights
            .set_reward_height(w.tip.as_ref().map_or(0, |b| b.height));

        info!(
            height = prepared.block.height,
            hash = %prepared.block.hash,
            reopened_round = prepared.reopened_round,
            "block disconnected from rewards ledger"
        );
        Ok(prepared.block)
    }

    /// Discard a prepared rollback. Returns whether one was pending.
    pub fn remove_prepared(&self) -> bool {
        self.writer.lock().prepared.take().is_some()
    }

    /// Revert the tip block: prepare, commit, and drop the prepared buffer.
    pub fn disconnect_block(&self, height: u64, hash: Hash256) -> LedgerResult<BlockMarker> {
        let mut guard = self.writer.lock();
        let w = &mut *guard;
        self.prepare_locked(w, height, hash)?;
        let result = self.commit_prepared_locked(w);
        w.prepared = None;
        result
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Recompute the snapshot of a finished round from the persisted entries,
    /// replacing the stored one.
    pub fn restore_snapshot(&self, number: RoundNumber) -> LedgerResult<Vec<RewardSnapshot>> {
        let mut guard = self.writer.lock();
        let w = &mut *guard;
        if let Some(reason) = &w.halted {
            return Err(LedgerError::Halted(reason.clone()));
        }

        let round = self.db.round(number)?.ok_or(LedgerError::RoundNotFound(number))?;
        let is_current = w.round.as_ref().map(|r| r.number) == Some(number);
        if !round.is_finished() || is_current {
            return Err(LedgerError::RoundNotFinished(number));
        }

        self.flush_locked(w)?;
        let entries = self.db.entries()?;

        let mut reopened = round.clone();
        reopened.status = RoundStatus::Active;
        let evaluation = evaluate_round(&reopened, &entries, &self.policy(), &self.params, round.end_time)?;

        let mut batch = LedgerBatch::new();
        for old in self.db.snapshots(number)? {
            batch.delete_snapshot(number, &old.address);
        }
        for snapshot in &evaluation.snapshots {
            batch.put_snapshot(snapshot)?;
        }
        batch.put_round(&evaluation.finished)?;

        let mut rounds = self.rounds.lock();
        self.commit(w, batch)?;
        if let Some(slot) = rounds.finished.iter_mut().find(|r| r.number == number) {
            *slot = evaluation.finished.clone();
        }
        drop(rounds);

        warn!(
            round = number,
            payouts = evaluation.snapshots.len(),
            paid = evaluation.finished.paid,
            "reward snapshot restored"
        );
        Ok(evaluation.snapshots)
    }

    /// Check the persisted state for consistency.
    ///
    /// Block markers must run contiguously from the start height to the tip,
    /// and every block inside the reorg window needs an undo record. At most
    /// one round may be open, and every finished
    /// round's snapshot payouts must match its recorded total within the
    /// truncation remainder.
    pub fn verify(&self) -> LedgerResult<()> {
        let _guard = self.writer.lock();

        let blocks = self.db.blocks()?;
        let tip = self.db.tip()?;
        if blocks.last() != tip.as_ref() {
            return Err(LedgerError::Corrupted(
                "tip marker does not match the highest stored block".into(),
            ));
        }
        if let Some(first) = blocks.first() {
            if first.height != LEDGER_START_HEIGHT {
                return Err(LedgerError::Corrupted(format!(
                    "block markers start at {} instead of {LEDGER_START_HEIGHT}",
                    first.height
                )));
            }
        }
        for pair in blocks.windows(2) {
            if pair[1].height != pair[0].height + 1 {
                return Err(LedgerError::Corrupted(format!(
                    "gap in block markers between {} and {}",
                    pair[0].height, pair[1].height
                )));
            }
        }
        let floor = self.db.undo_floor()?;
        for block in blocks.iter().filter(|b| b.height > floor) {
            if self.db.undo(block.height)?.is_none() {
                return Err(LedgerError::Corrupted(format!(
                    "missing undo record for block {}",
                    block.height
                )));
            }
        }

        let rounds = self.db.rounds()?;
        if rounds.iter().filter(|r| !r.is_finished()).count() > 1 {
            return Err(LedgerError::Corrupted("more than one open round".into()));
        }
        for pair in rounds.windows(2) {
            let next_number = pair[0].number.checked_add(1);
            let next_start = pair[0].end_height.checked_add(1);
            if next_number != Some(pair[1].number) || next_start != Some(pair[1].start_height) {
                return Err(LedgerError::Corrupted(format!(
                    "rounds {} and {} are not contiguous",
                    pair[0].number, pair[1].number
                )));
            }
        }
        for round in rounds.iter().filter(|r| r.is_finished()) {
            let snapshots = self.db.snapshots(round.number)?;
            let paid: u128 = snapshots.iter().map(|s| s.payout as u128).sum();
            let total = round.total_reward as u128;
            let fail = |what: &str| {
                Err(LedgerError::Corrupted(format!(
                    "round {}: {what} (paid {paid}, total {total}, snapshots {})",
                    round.number,
                    snapshots.len()
                )))
            };
            if paid > total {
                return fail("payouts exceed total reward");
            }
            if paid != round.paid as u128 || snapshots.len() as u64 != round.eligible_entries {
                return fail("snapshot does not match round record");
            }
            let remainder = total - paid;
            if snapshots.is_empty() && paid != 0 {
                return fail("payouts without eligible entries");
            }
            if !snapshots.is_empty() && remainder >= snapshots.len() as u128 {
                return fail("remainder exceeds truncation bound");
            }
        }

        Ok(())
    }

    /// Drop all ledger state so it can be rebuilt from the chain.
    pub fn resync(&self) -> LedgerResult<()> {
        let mut guard = self.writer.lock();
        let mut rounds = self.rounds.lock();
        self.db.clear()?;
        *guard = WriterState::default();
        *rounds = RoundState::default();
        self.corrupted.store(false, Ordering::SeqCst);
        self.staged_blocks.store(0, Ordering::SeqCst);
        self.heights.set_reward_height(0);
        warn!("rewards ledger cleared for resync");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync progress
    // ------------------------------------------------------------------

    pub fn update_heights(&self, height: u64, reward_height: u64) {
        self.heights.update(height, reward_height);
    }

    pub fn is_synced(&self) -> bool {
        self.heights.is_synced(self.config.sync_distance)
    }

    pub fn get_progress(&self) -> f64 {
        self.heights.progress()
    }

    pub fn sync_state(&self) -> SyncState {
        if self.corrupted.load(Ordering::SeqCst) {
            return SyncState::Corrupted;
        }
        self.heights.state(self.config.sync_distance)
    }

    pub fn chain_height(&self) -> u64 {
        self.heights.chain_height()
    }

    pub fn reward_height(&self) -> u64 {
        self.heights.reward_height()
    }

    // ------------------------------------------------------------------
    // Queries (committed state only)
    // ------------------------------------------------------------------

    pub fn get_last_block(&self) -> LedgerResult<Option<BlockMarker>> {
        self.db.tip()
    }

    pub fn get_transaction(&self, hash: &Hash256) -> LedgerResult<Option<RewardTransaction>> {
        self.db.transaction(hash)
    }

    pub fn get_current_round(&self) -> Option<Round> {
        self.rounds.lock().current.clone()
    }

    /// Finished rounds, oldest first.
    pub fn get_reward_rounds(&self) -> Vec<Round> {
        self.rounds.lock().finished.clone()
    }

    pub fn get_reward_entry(&self, address: &Address) -> LedgerResult<Option<RewardEntry>> {
        self.db.entry(address)
    }

    /// The entry for `address`, or a fresh zero entry with `found = false`.
    pub fn get_entry(&self, address: &Address) -> LedgerResult<(RewardEntry, bool)> {
        Ok(match self.db.entry(address)? {
            Some(entry) => (entry, true),
            None => (RewardEntry::new(address.clone()), false),
        })
    }

    pub fn get_reward_entries(&self) -> LedgerResult<Vec<RewardEntry>> {
        self.db.entries()
    }

    /// Every eligible entry of a finished round.
    pub fn get_reward_snapshots(&self, round: RoundNumber) -> LedgerResult<Vec<RewardSnapshot>> {
        let _rounds = self.rounds.lock();
        self.db.snapshots(round)
    }

    /// Snapshots of a finished round with a non-zero payout.
    pub fn get_reward_payouts(&self, round: RoundNumber) -> LedgerResult<Vec<RewardSnapshot>> {
        Ok(self
            .get_reward_snapshots(round)?
            .into_iter()
            .filter(|s| s.payout > 0)
            .collect())
    }

    pub fn stats(&self) -> LedgerResult<LedgerStats> {
        Ok(LedgerStats {
            entries: self.db.entries()?.len(),
            blocks: self.db.blocks()?.len(),
            rounds: self.db.rounds()?.len(),
            staged_blocks: self.staged_blocks.load(Ordering::SeqCst),
            last_block: self.db.tip()?,
        })
    }
}
