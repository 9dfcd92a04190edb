use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::store::KvStore;

/// Ordered in-memory store. Readers never wait on each other; the single
/// writer holds the lock only for the insert itself.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put(&self, key: Bytes, value: Bytes) -> Result<(), StoreError> {
        self.inner.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.inner.write().remove(key).is_some())
    }

    fn range_after(&self, after: Option<&[u8]>, limit: usize) -> Result<Vec<(Bytes, Bytes)>, StoreError> {
        let map = self.inner.read();
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(map
            .range::<[u8], _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().len())
    }
}
