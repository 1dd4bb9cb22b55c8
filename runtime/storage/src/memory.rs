use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::store::{apply_ops, scan_map, KvStore};
use crate::types::*;

/// RAM-only store used by tests and ephemeral nodes.
///
/// Thread-safe via `parking_lot::RwLock`. A batch is applied under a single
/// write guard, so readers never see half of it.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<StorageKey, StorageValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &StorageKey) -> StorageResult<Option<StorageValue>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(StorageKey, StorageValue)>> {
        Ok(scan_map(&self.inner.read(), prefix))
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut map = self.inner.write();
        apply_ops(&mut map, batch.into_ops());
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.inner.write().clear();
        Ok(())
    }
}
