//! Typed view of the rewards tables over a [`KvStore`].
//!
//! Every record is bincode-encoded under a one-byte table tag. Integer key
//! parts are big-endian so prefix scans come back in numeric order.

use serde::{de::DeserializeOwned, Serialize};

use smartrewards_storage::{KvStore, StorageKey, StorageValue, WriteBatch};

use crate::types::*;

const ENTRY: u8 = b'e';
const BLOCK: u8 = b'b';
const ROUND: u8 = b'r';
const SNAPSHOT: u8 = b's';
const TRANSACTION: u8 = b't';
const UNDO: u8 = b'u';
const META: u8 = b'm';

const META_TIP: &[u8] = b"tip";
const META_UNDO_FLOOR: &[u8] = b"undo_floor";

fn entry_key(address: &Address) -> StorageKey {
    StorageKey::prefixed(ENTRY, address.as_str().as_bytes())
}

fn block_key(height: u64) -> StorageKey {
    StorageKey::prefixed(BLOCK, &height.to_be_bytes())
}

fn round_key(number: RoundNumber) -> StorageKey {
    StorageKey::prefixed(ROUND, &number.to_be_bytes())
}

fn snapshot_prefix(round: RoundNumber) -> Vec<u8> {
    let mut prefix = vec![SNAPSHOT];
    prefix.extend_from_slice(&round.to_be_bytes());
    prefix
}

fn snapshot_key(round: RoundNumber, address: &Address) -> StorageKey {
    let mut key = snapshot_prefix(round);
    key.extend_from_slice(address.as_str().as_bytes());
    StorageKey(key)
}

fn transaction_key(hash: &Hash256) -> StorageKey {
    StorageKey::prefixed(TRANSACTION, &hash.0)
}

fn undo_key(height: u64) -> StorageKey {
    StorageKey::prefixed(UNDO, &height.to_be_bytes())
}

fn meta_key(name: &[u8]) -> StorageKey {
    StorageKey::prefixed(META, name)
}

fn encode<T: Serialize>(value: &T) -> LedgerResult<StorageValue> {
    Ok(StorageValue(bincode::serialize(value)?))
}

fn decode<T: DeserializeOwned>(value: &StorageValue) -> LedgerResult<T> {
    Ok(bincode::deserialize(value.as_bytes())?)
}

/// One atomic write across every rewards table.
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    inner: WriteBatch,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_entry(&mut self, entry: &RewardEntry) -> LedgerResult<()> {
        self.inner.put(entry_key(&entry.address), encode(entry)?);
        Ok(())
    }

    pub fn delete_entry(&mut self, address: &Address) {
        self.inner.delete(entry_key(address));
    }

    pub fn put_block(&mut self, block: &BlockMarker) -> LedgerResult<()> {
        self.inner.put(block_key(block.height), encode(block)?);
        Ok(())
    }

    pub fn delete_block(&mut self, height: u64) {
        self.inner.delete(block_key(height));
    }

    /// Record the highest processed block, or clear it.
    pub fn set_tip(&mut self, tip: Option<&BlockMarker>) -> LedgerResult<()> {
        match tip {
            Some(block) => self.inner.put(meta_key(META_TIP), encode(block)?),
            None => self.inner.delete(meta_key(META_TIP)),
        }
        Ok(())
    }

    /// Record that undo data at or below `height` has been deleted.
    pub fn set_undo_floor(&mut self, height: u64) -> LedgerResult<()> {
        self.inner.put(meta_key(META_UNDO_FLOOR), encode(&height)?);
        Ok(())
    }

    pub fn put_round(&mut self, round: &Round) -> LedgerResult<()> {
        self.inner.put(round_key(round.number), encode(round)?);
        Ok(())
    }

    pub fn delete_round(&mut self, number: RoundNumber) {
        self.inner.delete(round_key(number));
    }

    pub fn put_snapshot(&mut self, snapshot: &RewardSnapshot) -> LedgerResult<()> {
        self.inner.put(
            snapshot_key(snapshot.round, &snapshot.address),
            encode(snapshot)?,
        );
        Ok(())
    }

    pub fn delete_snapshot(&mut self, round: RoundNumber, address: &Address) {
        self.inner.delete(snapshot_key(round, address));
    }

    pub fn put_transaction(&mut self, tx: &RewardTransaction) -> LedgerResult<()> {
        self.inner.put(transaction_key(&tx.hash), encode(tx)?);
        Ok(())
    }

    pub fn delete_transaction(&mut self, hash: &Hash256) {
        self.inner.delete(transaction_key(hash));
    }

    pub fn put_undo(&mut self, undo: &BlockUndo) -> LedgerResult<()> {
        self.inner.put(undo_key(undo.height), encode(undo)?);
        Ok(())
    }

    pub fn delete_undo(&mut self, height: u64) {
        self.inner.delete(undo_key(height));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn into_write_batch(self) -> WriteBatch {
        self.inner
    }
}

/// Typed accessor over the committed rewards tables.
pub struct LedgerDb<S> {
    store: S,
}

impl<S: KvStore> LedgerDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn get<T: DeserializeOwned>(&self, key: &StorageKey) -> LedgerResult<Option<T>> {
        match self.store.get(key)? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &[u8]) -> LedgerResult<Vec<T>> {
        self.store
            .scan_prefix(prefix)?
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }

    pub fn entry(&self, address: &Address) -> LedgerResult<Option<RewardEntry>> {
        self.get(&entry_key(address))
    }

    /// All entries ordered by address.
    pub fn entries(&self) -> LedgerResult<Vec<RewardEntry>> {
        self.scan(&[ENTRY])
    }

    pub fn block(&self, height: u64) -> LedgerResult<Option<BlockMarker>> {
        self.get(&block_key(height))
    }

    /// All block markers ordered by height.
    pub fn blocks(&self) -> LedgerResult<Vec<BlockMarker>> {
        self.scan(&[BLOCK])
    }

    pub fn tip(&self) -> LedgerResult<Option<BlockMarker>> {
        self.get(&meta_key(META_TIP))
    }

    /// Highest height whose undo data has been pruned, 0 if none.
    pub fn undo_floor(&self) -> LedgerResult<u64> {
        Ok(self.get(&meta_key(META_UNDO_FLOOR))?.unwrap_or(0))
    }

    pub fn round(&self, number: RoundNumber) -> LedgerResult<Option<Round>> {
        self.get(&round_key(number))
    }

    /// All rounds ordered by number.
    pub fn rounds(&self) -> LedgerResult<Vec<Round>> {
        self.scan(&[ROUND])
    }

    /// Snapshots of `round` ordered by address.
    pub fn snapshots(&self, round: RoundNumber) -> LedgerResult<Vec<RewardSnapshot>> {
        self.scan(&snapshot_prefix(round))
    }

    pub fn transaction(&self, hash: &Hash256) -> LedgerResult<Option<RewardTransaction>> {
        self.get(&transaction_key(hash))
    }

    pub fn undo(&self, height: u64) -> LedgerResult<Option<BlockUndo>> {
        self.get(&undo_key(height))
    }

    pub fn write(&self, batch: LedgerBatch) -> LedgerResult<()> {
        self.store.write(batch.into_write_batch())?;
        Ok(())
    }

    pub fn clear(&self) -> LedgerResult<()> {
        self.store.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartrewards_storage::MemoryStore;

    fn marker(height: u64) -> BlockMarker {
        BlockMarker {
            height,
            hash: Hash256([height as u8; 32]),
            time: 1_000 + height as i64,
            processed_at: 0,
        }
    }

    fn snapshot(round: RoundNumber, address: &str, payout: Amount) -> RewardSnapshot {
        RewardSnapshot {
            round,
            address: Address::from(address),
            balance: payout,
            weight: payout,
            payout,
        }
    }

    #[test]
    fn missing_entry_is_none() {
        let db = LedgerDb::new(MemoryStore::new());
        assert_eq!(db.entry(&Address::from("nobody")).unwrap(), None);
    }

    #[test]
    fn blocks_scan_in_height_order() {
        let db = LedgerDb::new(MemoryStore::new());
        let mut batch = LedgerBatch::new();
        for h in [300u64, 2, 256, 1] {
            batch.put_block(&marker(h)).unwrap();
        }
        db.write(batch).unwrap();

        let heights: Vec<u64> = db.blocks().unwrap().iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![1, 2, 256, 300]);
    }

    #[test]
    fn snapshots_are_scoped_to_round() {
        let db = LedgerDb::new(MemoryStore::new());
        let mut batch = LedgerBatch::new();
        batch.put_snapshot(&snapshot(1, "Sb", 10)).unwrap();
        batch.put_snapshot(&snapshot(1, "Sa", 20)).unwrap();
        batch.put_snapshot(&snapshot(2, "Sa", 30)).unwrap();
        db.write(batch).unwrap();

        let round1 = db.snapshots(1).unwrap();
        assert_eq!(round1.len(), 2);
        assert_eq!(round1[0].address, Address::from("Sa"));
        assert_eq!(db.snapshots(2).unwrap().len(), 1);
        assert!(db.snapshots(3).unwrap().is_empty());
    }

    #[test]
    fn tip_set_and_cleared() {
        let db = LedgerDb::new(MemoryStore::new());
        let mut batch = LedgerBatch::new();
        batch.set_tip(Some(&marker(7))).unwrap();
        db.write(batch).unwrap();
        assert_eq!(db.tip().unwrap().map(|b| b.height), Some(7));

        let mut batch = LedgerBatch::new();
        batch.set_tip(None).unwrap();
        db.write(batch).unwrap();
        assert_eq!(db.tip().unwrap(), None);
    }

    #[test]
    fn undo_floor_defaults_to_zero() {
        let db = LedgerDb::new(MemoryStore::new());
        assert_eq!(db.undo_floor().unwrap(), 0);

        let mut batch = LedgerBatch::new();
        batch.set_undo_floor(42).unwrap();
        db.write(batch).unwrap();
        assert_eq!(db.undo_floor().unwrap(), 42);
        // The floor lives beside the tip without disturbing it.
        assert_eq!(db.tip().unwrap(), None);
    }

    #[test]
    fn tables_do_not_collide() {
        let db = LedgerDb::new(MemoryStore::new());
        let mut batch = LedgerBatch::new();
        let mut entry = RewardEntry::new(Address::from("Sa"));
        entry.balance = 5;
        batch.put_entry(&entry).unwrap();
        batch.put_block(&marker(1)).unwrap();
        batch
            .put_transaction(&RewardTransaction {
                hash: Hash256([9; 32]),
                height: 1,
            })
            .unwrap();
        db.write(batch).unwrap();

        assert_eq!(db.entries().unwrap(), vec![entry]);
        assert_eq!(db.blocks().unwrap().len(), 1);
        assert!(db.rounds().unwrap().is_empty());
        assert_eq!(db.transaction(&Hash256([9; 32])).unwrap().unwrap().height, 1);
    }

    #[test]
    fn garbage_value_is_codec_error() {
        let db = LedgerDb::new(MemoryStore::new());
        let mut raw = WriteBatch::new();
        raw.put(round_key(1), StorageValue::from("x"));
        db.store().write(raw).unwrap();
        assert!(matches!(db.round(1), Err(LedgerError::Codec(_))));
    }
}
