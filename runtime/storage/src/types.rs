use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque storage key over raw bytes.
///
/// Keys order bytewise, so big-endian encoded integers iterate in numeric order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey(pub Vec<u8>);

impl StorageKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Build a key from a one-byte table tag followed by `rest`.
    pub fn prefixed(tag: u8, rest: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(rest.len() + 1);
        bytes.push(tag);
        bytes.extend_from_slice(rest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl From<Vec<u8>> for StorageKey {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for StorageKey {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl From<&str> for StorageKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Opaque storage value over raw bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageValue(pub Vec<u8>);

impl StorageValue {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for StorageValue {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for StorageValue {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl From<&str> for StorageValue {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// A single mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    Put(StorageKey, StorageValue),
    Delete(StorageKey),
}

impl WriteOp {
    pub fn key(&self) -> &StorageKey {
        match self {
            WriteOp::Put(key, _) => key,
            WriteOp::Delete(key) => key,
        }
    }
}

/// An ordered set of mutations applied atomically by [`crate::KvStore::write`].
///
/// Later operations on the same key win.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: StorageKey, value: StorageValue) {
        self.ops.push(WriteOp::Put(key, value));
    }

    pub fn delete(&mut self, key: StorageKey) {
        self.ops.push(WriteOp::Delete(key));
    }

    /// Append every operation of `other` after the ones already queued.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Errors produced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("RocksDB error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("Corrupted store: {0}")]
    Corrupted(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_from_str() {
        let key = StorageKey::from("hello");
        assert_eq!(key.as_bytes(), b"hello");
    }

    #[test]
    fn prefixed_key_layout() {
        let key = StorageKey::prefixed(b'B', &7u64.to_be_bytes());
        assert_eq!(key.as_bytes()[0], b'B');
        assert_eq!(key.as_bytes().len(), 9);
        assert!(key.starts_with(b"B"));
    }

    #[test]
    fn big_endian_keys_sort_numerically() {
        let lo = StorageKey::prefixed(b'B', &255u64.to_be_bytes());
        let hi = StorageKey::prefixed(b'B', &256u64.to_be_bytes());
        assert!(lo < hi);
    }

    #[test]
    fn storage_value_len() {
        let val = StorageValue::new(vec![1, 2, 3]);
        assert_eq!(val.len(), 3);
        assert!(!val.is_empty());
    }

    #[test]
    fn batch_keeps_operation_order() {
        let mut batch = WriteBatch::new();
        batch.put(StorageKey::from("a"), StorageValue::from("1"));
        batch.delete(StorageKey::from("a"));

        let mut tail = WriteBatch::new();
        tail.put(StorageKey::from("b"), StorageValue::from("2"));
        batch.extend(tail);

        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.ops()[1], WriteOp::Delete(_)));
        assert_eq!(batch.ops()[2].key(), &StorageKey::from("b"));
    }

    #[test]
    fn storage_key_display_hex() {
        let key = StorageKey::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(key.to_string(), "0xdeadbeef");
    }
}
