//! Local key/value store behind a cache.
//!
//! Backends are byte-oriented ([`KvStore`]). [`EncodedStore`] layers the
//! cache's key/value encodings on top, the way values are kept at rest.

pub mod memory;
pub mod sqlite;

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use crate::codec::{Datum, Encoding};
use crate::error::StoreError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const SCAN_PAGE_SIZE: usize = 256;

pub trait KvStore: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    fn put(&self, key: Bytes, value: Bytes) -> Result<(), StoreError>;

    /// Returns whether the key was present.
    fn delete(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Up to `limit` entries with keys strictly after `after`, in key order.
    fn range_after(&self, after: Option<&[u8]>, limit: usize) -> Result<Vec<(Bytes, Bytes)>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

// ========================================
// ENCODED STORE
// ========================================

#[derive(Clone)]
pub struct EncodedStore {
    inner: Arc<dyn KvStore>,
    key_encoding: Encoding,
    value_encoding: Encoding,
}

impl EncodedStore {
    pub fn new(inner: Arc<dyn KvStore>, key_encoding: Encoding, value_encoding: Encoding) -> Self {
        Self { inner, key_encoding, value_encoding }
    }

    pub fn key_encoding(&self) -> Encoding {
        self.key_encoding
    }

    pub fn value_encoding(&self) -> Encoding {
        self.value_encoding
    }

    pub fn get(&self, key: &Datum) -> Result<Option<Datum>, StoreError> {
        let raw_key = self.key_encoding.encode(key)?;
        match self.inner.get(&raw_key)? {
            Some(raw) => Ok(Some(self.value_encoding.decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &Datum, value: &Datum) -> Result<(), StoreError> {
        let raw_key = self.key_encoding.encode(key)?;
        let raw_value = self.value_encoding.encode(value)?;
        self.inner.put(raw_key, raw_value)
    }

    pub fn delete(&self, key: &Datum) -> Result<bool, StoreError> {
        let raw_key = self.key_encoding.encode(key)?;
        self.inner.delete(&raw_key)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.inner.len()
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.inner.is_empty()
    }

    pub fn scan(&self) -> Scan {
        Scan {
            store: self.clone(),
            after: None,
            page: VecDeque::new(),
            page_size: SCAN_PAGE_SIZE,
            exhausted: false,
        }
    }
}

/// Lazy, paged iteration over a store in key order.
///
/// Each page is read on demand, so entries written during the scan may or
/// may not show up.
pub struct Scan {
    store: EncodedStore,
    after: Option<Bytes>,
    page: VecDeque<(Bytes, Bytes)>,
    page_size: usize,
    exhausted: bool,
}

impl Scan {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn fill(&mut self) -> Result<(), StoreError> {
        let batch = self.store.inner.range_after(self.after.as_deref(), self.page_size)?;
        if batch.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some((last_key, _)) = batch.last() {
            self.after = Some(last_key.clone());
        }
        self.page.extend(batch);
        Ok(())
    }
}

impl Iterator for Scan {
    type Item = Result<(Datum, Datum), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let (raw_key, raw_value) = self.page.pop_front()?;
        let decoded = self
            .store
            .key_encoding
            .decode(&raw_key)
            .and_then(|k| self.store.value_encoding.decode(&raw_value).map(|v| (k, v)))
            .map_err(StoreError::from);
        Some(decoded)
    }
}
