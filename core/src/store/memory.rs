//! In-memory blob store

use hashbrown::HashMap;

use super::{BlobRecord, BlobStore, validate_key};
use crate::error::StoreError;

/// Blob store that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    records: HashMap<String, BlobRecord>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<BlobRecord>, StoreError> {
        validate_key(key)?;
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, key: &str, record: &BlobRecord) -> Result<(), StoreError> {
        validate_key(key)?;
        self.records.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self.records.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.records.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
