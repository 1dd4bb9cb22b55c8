use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::*;

/// Key-value contract the rewards ledger persists through.
///
/// Implementations must apply a [`WriteBatch`] atomically: concurrent readers
/// observe either none or all of its operations.
pub trait KvStore: Send + Sync {
    /// Read a single committed value.
    fn get(&self, key: &StorageKey) -> StorageResult<Option<StorageValue>>;

    /// All committed pairs whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(StorageKey, StorageValue)>>;

    /// Apply every operation of `batch` as one atomic unit.
    fn write(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Drop every key.
    fn clear(&self) -> StorageResult<()>;
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn get(&self, key: &StorageKey) -> StorageResult<Option<StorageValue>> {
        (**self).get(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(StorageKey, StorageValue)>> {
        (**self).scan_prefix(prefix)
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        (**self).write(batch)
    }

    fn clear(&self) -> StorageResult<()> {
        (**self).clear()
    }
}

/// Apply a batch to an ordered map. Shared by the in-memory backends.
pub(crate) fn apply_ops(map: &mut BTreeMap<StorageKey, StorageValue>, ops: Vec<WriteOp>) {
    for op in ops {
        match op {
            WriteOp::Put(key, value) => {
                map.insert(key, value);
            }
            WriteOp::Delete(key) => {
                map.remove(&key);
            }
        }
    }
}

/// Ordered prefix scan over a `BTreeMap`.
pub(crate) fn scan_map(
    map: &BTreeMap<StorageKey, StorageValue>,
    prefix: &[u8],
) -> Vec<(StorageKey, StorageValue)> {
    map.range(StorageKey::from(prefix)..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
