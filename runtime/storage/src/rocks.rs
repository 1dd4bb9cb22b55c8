use rocksdb::{Direction, IteratorMode, Options, WriteOptions, DB};
use std::path::{Path, PathBuf};

use crate::store::KvStore;
use crate::types::*;

/// Disk-backed store on RocksDB.
///
/// Each [`WriteBatch`] maps onto one `rocksdb::WriteBatch` written with a
/// synced WAL, so a batch is durable and visible as a whole or not at all.
pub struct RocksStore {
    db: DB,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, &path)?;
        tracing::debug!(path = %path.display(), "rocksdb store opened");
        Ok(Self { db, path })
    }

    /// Directory the database lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compact the whole key range, dropping overwritten and deleted values.
    pub fn compact(&self) -> StorageResult<()> {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
        tracing::info!(path = %self.path.display(), "rocksdb store compacted");
        Ok(())
    }

    /// Flush memtables to SST files.
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn write_synced(&self, batch: rocksdb::WriteBatch) -> StorageResult<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &StorageKey) -> StorageResult<Option<StorageValue>> {
        Ok(self.db.get(key.as_bytes())?.map(StorageValue::from))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(StorageKey, StorageValue)>> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((StorageKey::from(key.into_vec()), StorageValue::from(value.into_vec())));
        }
        Ok(out)
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut rocks = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(key, value) => rocks.put(key.as_bytes(), value.as_bytes()),
                WriteOp::Delete(key) => rocks.delete(key.as_bytes()),
            }
        }
        self.write_synced(rocks)
    }

    fn clear(&self) -> StorageResult<()> {
        let mut rocks = rocksdb::WriteBatch::default();
        let mut removed = 0usize;
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            rocks.delete(&key);
            removed += 1;
        }
        self.write_synced(rocks)?;
        tracing::info!(path = %self.path.display(), removed, "rocksdb store cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        env::temp_dir().join(format!("smartrewards_rocks_{name}_{}", std::process::id()))
    }

    fn cleanup(path: &Path) {
        let _ = fs::remove_dir_all(path);
    }

    fn batch(pairs: &[(&str, &str)]) -> WriteBatch {
        let mut b = WriteBatch::new();
        for (k, v) in pairs {
            b.put(StorageKey::from(*k), StorageValue::from(*v));
        }
        b
    }

    #[test]
    fn roundtrip_put_get() {
        let dir = temp_dir("roundtrip");
        cleanup(&dir);

        let store = RocksStore::open(&dir).unwrap();
        store.write(batch(&[("block_42", "data_here")])).unwrap();
        assert_eq!(
            store.get(&StorageKey::from("block_42")).unwrap(),
            Some(StorageValue::from("data_here"))
        );
        assert_eq!(store.get(&StorageKey::from("block_43")).unwrap(), None);

        drop(store);
        cleanup(&dir);
    }

    #[test]
    fn survives_reopen() {
        let dir = temp_dir("reopen");
        cleanup(&dir);

        {
            let store = RocksStore::open(&dir).unwrap();
            store.write(batch(&[("a", "1"), ("b", "2")])).unwrap();
            let mut del = WriteBatch::new();
            del.delete(StorageKey::from("a"));
            store.write(del).unwrap();
        }

        let store = RocksStore::open(&dir).unwrap();
        assert_eq!(store.get(&StorageKey::from("a")).unwrap(), None);
        assert_eq!(
            store.get(&StorageKey::from("b")).unwrap(),
            Some(StorageValue::from("2"))
        );

        drop(store);
        cleanup(&dir);
    }

    #[test]
    fn later_ops_in_a_batch_win() {
        let dir = temp_dir("order");
        cleanup(&dir);

        let store = RocksStore::open(&dir).unwrap();
        let mut b = batch(&[("k", "old")]);
        b.delete(StorageKey::from("k"));
        b.put(StorageKey::from("k"), StorageValue::from("new"));
        b.put(StorageKey::from("gone"), StorageValue::from("x"));
        b.delete(StorageKey::from("gone"));
        store.write(b).unwrap();

        assert_eq!(store.get(&StorageKey::from("k")).unwrap(), Some(StorageValue::from("new")));
        assert_eq!(store.get(&StorageKey::from("gone")).unwrap(), None);

        drop(store);
        cleanup(&dir);
    }

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let dir = temp_dir("scan");
        cleanup(&dir);

        let store = RocksStore::open(&dir).unwrap();
        let mut b = WriteBatch::new();
        for n in [300u64, 2, 256] {
            b.put(StorageKey::prefixed(b'B', &n.to_be_bytes()), StorageValue::from("blk"));
        }
        b.put(StorageKey::prefixed(b'A', &[9]), StorageValue::from("before"));
        b.put(StorageKey::prefixed(b'C', &[0]), StorageValue::from("after"));
        store.write(b).unwrap();

        let heights: Vec<u64> = store
            .scan_prefix(b"B")
            .unwrap()
            .into_iter()
            .map(|(k, _)| u64::from_be_bytes(k.as_bytes()[1..].try_into().unwrap()))
            .collect();
        assert_eq!(heights, vec![2, 256, 300]);
        assert!(store.scan_prefix(b"Z").unwrap().is_empty());

        drop(store);
        cleanup(&dir);
    }

    #[test]
    fn compact_preserves_live_keys() {
        let dir = temp_dir("compact");
        cleanup(&dir);

        {
            let store = RocksStore::open(&dir).unwrap();
            for i in 0..20 {
                store.write(batch(&[("counter", i.to_string().as_str())])).unwrap();
            }
            store.write(batch(&[("other", "x")])).unwrap();
            store.flush().unwrap();
            store.compact().unwrap();
            assert_eq!(
                store.get(&StorageKey::from("counter")).unwrap(),
                Some(StorageValue::from("19"))
            );
        }

        let store = RocksStore::open(&dir).unwrap();
        assert_eq!(store.get(&StorageKey::from("counter")).unwrap(), Some(StorageValue::from("19")));
        assert_eq!(store.get(&StorageKey::from("other")).unwrap(), Some(StorageValue::from("x")));

        drop(store);
        cleanup(&dir);
    }

    #[test]
    fn clear_empties_the_database() {
        let dir = temp_dir("clear");
        cleanup(&dir);

        {
            let store = RocksStore::open(&dir).unwrap();
            store.write(batch(&[("a", "1"), ("b", "2")])).unwrap();
            store.clear().unwrap();
            assert!(store.scan_prefix(b"").unwrap().is_empty());
            store.write(batch(&[("c", "3")])).unwrap();
        }

        let store = RocksStore::open(&dir).unwrap();
        assert_eq!(store.get(&StorageKey::from("a")).unwrap(), None);
        assert_eq!(store.get(&StorageKey::from("c")).unwrap(), Some(StorageValue::from("3")));

        drop(store);
        cleanup(&dir);
    }
}
