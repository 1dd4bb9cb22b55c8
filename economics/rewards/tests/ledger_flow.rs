//! End-to-end flows through the rewards ledger: replaying block feeds,
//! reorgs across round boundaries, the first mainnet round, and reopening a
//! RocksDB-backed ledger.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

use smartrewards_ledger::db::{LedgerBatch, LedgerDb};
use smartrewards_ledger::params::RoundBounds;
use smartrewards_ledger::*;
use smartrewards_storage::{KvStore, MemoryStore, RocksStore};

const ADDRESSES: [&str; 8] = ["Sa", "Sb", "Sc", "Sd", "Se", "Sf", "Sg", "Sh"];

fn block_hash(height: u64, branch: u8) -> Hash256 {
    let mut bytes = [branch; 32];
    bytes[..8].copy_from_slice(&height.to_be_bytes());
    Hash256(bytes)
}

fn tx_hash(n: u64, branch: u8) -> Hash256 {
    let mut bytes = [0xee; 32];
    bytes[..8].copy_from_slice(&n.to_be_bytes());
    bytes[8] = branch;
    Hash256(bytes)
}

fn coins(n: i64) -> i64 {
    n * COIN as i64
}

fn credit(seed: u64, address: &str, amount: i64) -> BlockTransaction {
    BlockTransaction {
        hash: tx_hash(seed, 0),
        deltas: vec![BalanceDelta {
            address: Address::from(address),
            amount,
        }],
    }
}

fn empty_block(height: u64) -> ConnectedBlock {
    ConnectedBlock {
        height,
        hash: block_hash(height, 0),
        time: 1_500_000_000 + height as i64 * 55,
        transactions: vec![],
    }
}

/// Rounds of ten blocks paying 100 units per block.
fn short_rounds() -> ChainParams {
    let mut params = ChainParams::testnet();
    params.first_round = RoundBounds {
        start_height: 1,
        end_height: 10,
        start_time: 1_500_000_000,
        end_time: 1_500_000_550,
    };
    params.round_blocks = 10;
    params.round_seconds = 550;
    params.reward_per_block = 100;
    params
}

fn config() -> LedgerConfig {
    LedgerConfig::for_network(Network::Testnet)
}

/// A random but valid feed: transfers between a few addresses, plus mints
/// whenever the sender cannot cover the amount.
fn random_feed(seed: u64, blocks: u64, branch: u8, from_height: u64) -> Vec<ConnectedBlock> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut balances: HashMap<&str, i64> = HashMap::new();
    let mut tx_counter = 0u64;
    let mut feed = Vec::new();

    for height in from_height..from_height + blocks {
        let mut transactions = Vec::new();
        for _ in 0..rng.gen_range(0..4) {
            tx_counter += 1;
            let from = ADDRESSES[rng.gen_range(0..ADDRESSES.len())];
            let to = ADDRESSES[rng.gen_range(0..ADDRESSES.len())];
            let amount = coins(rng.gen_range(1..3_000));

            let deltas = if from != to && balances.get(from).copied().unwrap_or(0) >= amount {
                *balances.entry(from).or_default() -= amount;
                vec![
                    BalanceDelta {
                        address: Address::from(from),
                        amount: -amount,
                    },
                    BalanceDelta {
                        address: Address::from(to),
                        amount,
                    },
                ]
            } else {
                vec![BalanceDelta {
                    address: Address::from(to),
                    amount,
                }]
            };
            *balances.entry(to).or_default() += amount;
            transactions.push(BlockTransaction {
                hash: tx_hash(tx_counter, branch),
                deltas,
            });
        }
        feed.push(ConnectedBlock {
            height,
            hash: block_hash(height, branch),
            time: 1_500_000_000 + height as i64 * 55,
            transactions,
        });
    }
    feed
}

#[derive(Debug, PartialEq)]
struct LedgerState {
    entries: Vec<RewardEntry>,
    finished: Vec<Round>,
    current: Option<Round>,
    snapshots: Vec<Vec<RewardSnapshot>>,
}

fn state<S: KvStore>(ledger: &SmartRewards<S>) -> LedgerState {
    let finished = ledger.get_reward_rounds();
    let snapshots = finished
        .iter()
        .map(|r| ledger.get_reward_snapshots(r.number).unwrap())
        .collect();
    LedgerState {
        entries: ledger.get_reward_entries().unwrap(),
        finished,
        current: ledger.get_current_round(),
        snapshots,
    }
}

fn memory_ledger(params: ChainParams) -> SmartRewards<MemoryStore> {
    SmartRewards::open(MemoryStore::new(), params, config()).unwrap()
}

#[test]
fn replay_is_independent_of_flush_cadence() {
    let feed = random_feed(7, 120, 0xb1, 1);

    let batched = memory_ledger(short_rounds());
    let eager = memory_ledger(short_rounds());
    for block in &feed {
        batched.update(block, false).unwrap();
        eager.update(block, true).unwrap();
    }
    batched.flush().unwrap();

    let a = state(&batched);
    assert_eq!(a, state(&eager));
    assert_eq!(a.finished.len(), 12);
    batched.verify().unwrap();
    eager.verify().unwrap();
}

#[test]
fn finished_rounds_respect_truncation_bound() {
    let ledger = memory_ledger(short_rounds());
    for block in random_feed(99, 200, 0xb1, 1) {
        ledger.update(&block, false).unwrap();
    }

    for round in ledger.get_reward_rounds() {
        let snapshots = ledger.get_reward_snapshots(round.number).unwrap();
        let paid: Amount = snapshots.iter().map(|s| s.payout).sum();
        assert!(paid <= round.total_reward);
        if snapshots.is_empty() {
            assert_eq!(paid, 0);
        } else {
            assert!(round.total_reward - paid < snapshots.len() as u64);
        }
        for snapshot in &snapshots {
            assert!(snapshot.balance >= 1000 * COIN);
        }
    }
}

#[test]
fn reorg_across_round_boundaries_restores_state() {
    let main = random_feed(21, 25, 0xb1, 1);
    let ledger = memory_ledger(short_rounds());

    for block in &main[..12] {
        ledger.update(block, false).unwrap();
    }
    ledger.flush().unwrap();
    let fork_point = state(&ledger);

    for block in &main[12..] {
        ledger.update(block, false).unwrap();
    }
    assert_eq!(ledger.get_reward_rounds().len(), 2);

    for block in main[12..].iter().rev() {
        ledger.disconnect_block(block.height, block.hash).unwrap();
    }
    assert_eq!(state(&ledger), fork_point);
    assert_eq!(ledger.get_last_block().unwrap().unwrap().height, 12);
    ledger.verify().unwrap();

    // Follow a different branch and compare with a ledger that never saw the
    // abandoned one.
    let side = random_feed(22, 13, 0xc2, 13);
    for block in &side {
        ledger.update(block, false).unwrap();
    }
    ledger.flush().unwrap();

    let fresh = memory_ledger(short_rounds());
    for block in main[..12].iter().chain(side.iter()) {
        fresh.update(block, false).unwrap();
    }
    fresh.flush().unwrap();
    assert_eq!(state(&ledger), state(&fresh));
}

#[test]
fn proportional_split_of_four_thousand() {
    let mut params = short_rounds();
    params.first_round.end_height = 4;
    params.reward_per_block = 1_000;
    let ledger = memory_ledger(params);

    let first = ConnectedBlock {
        transactions: vec![credit(1, "Sa", coins(1000)), credit(2, "Sb", coins(3000))],
        ..empty_block(1)
    };
    ledger.update(&first, false).unwrap();
    for height in 2..=4 {
        ledger.update(&empty_block(height), false).unwrap();
    }

    let round = &ledger.get_reward_rounds()[0];
    assert_eq!(round.total_reward, 4_000);
    let payouts: Vec<(String, Amount)> = ledger
        .get_reward_payouts(1)
        .unwrap()
        .into_iter()
        .map(|s| (s.address.to_string(), s.payout))
        .collect();
    assert_eq!(payouts, vec![("Sa".into(), 1_000), ("Sb".into(), 3_000)]);
}

#[test]
fn mainnet_first_round() {
    let ledger = memory_ledger(ChainParams::mainnet());
    let first = ConnectedBlock {
        transactions: vec![
            credit(1, "Sa", coins(1000)),
            credit(2, "Sb", coins(1000)),
            credit(3, "Sc", coins(5000)),
        ],
        ..empty_block(1)
    };
    ledger.update(&first, false).unwrap();
    for height in 2..59_999 {
        ledger.update(&empty_block(height), false).unwrap();
    }

    let drop = ConnectedBlock {
        transactions: vec![BlockTransaction {
            hash: tx_hash(4, 0),
            deltas: vec![
                BalanceDelta {
                    address: Address::from("Sb"),
                    amount: -coins(1),
                },
                BalanceDelta {
                    address: Address::from("Sd"),
                    amount: coins(1),
                },
            ],
        }],
        ..empty_block(59_999)
    };
    let result = ledger.update(&drop, false).unwrap();
    assert_eq!(result.disqualified_entries, 1);
    assert_eq!(result.disqualified_smart, 1);

    ledger.update(&empty_block(60_000), false).unwrap();
    let result = ledger.update(&empty_block(60_001), false).unwrap();
    assert_eq!(result.finalized_round, Some(1));

    let total = 60_001 * 750 * COIN;
    let round = &ledger.get_reward_rounds()[0];
    assert_eq!(round.total_reward, total);
    assert_eq!(round.disqualified_entries, 1);

    let payouts: Vec<(String, Amount)> = ledger
        .get_reward_payouts(1)
        .unwrap()
        .into_iter()
        .map(|s| (s.address.to_string(), s.payout))
        .collect();
    assert_eq!(
        payouts,
        vec![("Sa".into(), total / 6), ("Sc".into(), total / 6 * 5)]
    );

    let next = ledger.get_current_round().unwrap();
    assert_eq!(next.number, 2);
    assert_eq!(next.start_height, 60_002);
    assert_eq!(next.end_height, 60_001 + 47_127);
    assert_eq!(next.status, RoundStatus::Pending);
}

#[test]
fn restore_snapshot_reproduces_payouts() {
    let ledger = memory_ledger(short_rounds());
    for block in random_feed(5, 15, 0xb1, 1) {
        ledger.update(&block, false).unwrap();
    }
    // No block after the close: recomputing gives the stored snapshot back.
    let stable = memory_ledger(short_rounds());
    for block in random_feed(5, 10, 0xb1, 1) {
        stable.update(&block, false).unwrap();
    }
    let before = stable.get_reward_snapshots(1).unwrap();
    assert_eq!(stable.restore_snapshot(1).unwrap(), before);
    stable.verify().unwrap();

    // Entries moved after the close: the recomputed snapshot still satisfies
    // the round invariants.
    ledger.restore_snapshot(1).unwrap();
    ledger.verify().unwrap();
}

#[test]
fn tampered_snapshot_fails_verification() {
    let store = Arc::new(MemoryStore::new());
    let ledger = SmartRewards::open(store.clone(), short_rounds(), config()).unwrap();
    let first = ConnectedBlock {
        transactions: vec![credit(1, "Sa", coins(1000)), credit(2, "Sb", coins(3000))],
        ..empty_block(1)
    };
    ledger.update(&first, false).unwrap();
    for height in 2..=10 {
        ledger.update(&empty_block(height), false).unwrap();
    }
    drop(ledger);

    let db = LedgerDb::new(store.clone());
    let mut snapshot = db.snapshots(1).unwrap().remove(0);
    snapshot.payout += 1;
    let mut batch = LedgerBatch::new();
    batch.put_snapshot(&snapshot).unwrap();
    db.write(batch).unwrap();

    let reopened = SmartRewards::open(store, short_rounds(), config()).unwrap();
    assert_eq!(reopened.sync_state(), SyncState::Corrupted);
    assert!(matches!(
        reopened.update(&empty_block(11), false),
        Err(LedgerError::Halted(_))
    ));
}

#[test]
fn rocksdb_ledger_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("smartrewards_flow_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let feed = random_feed(11, 37, 0xb1, 1);

    let expected = {
        let ledger =
            SmartRewards::open(RocksStore::open(&dir).unwrap(), short_rounds(), config()).unwrap();
        for block in &feed {
            ledger.update(block, false).unwrap();
        }
        ledger.flush().unwrap();
        ledger.store().compact().unwrap();
        state(&ledger)
    };

    let reopened =
        SmartRewards::open(RocksStore::open(&dir).unwrap(), short_rounds(), config()).unwrap();
    assert_eq!(state(&reopened), expected);
    assert_eq!(reopened.reward_height(), 37);
    assert_ne!(reopened.sync_state(), SyncState::Corrupted);

    // Unflushed blocks are lost on restart, and the feed resumes after the tip.
    for block in random_feed(12, 5, 0xb3, 38) {
        reopened.update(&block, false).unwrap();
    }
    drop(reopened);
    let again =
        SmartRewards::open(RocksStore::open(&dir).unwrap(), short_rounds(), config()).unwrap();
    assert_eq!(again.get_last_block().unwrap().unwrap().height, 40);

    let _ = std::fs::remove_dir_all(&dir);
}
