//! Keyed blob storage for programs and persistent RAM
//!
//! Records are addressed by string keys derived from the program's content
//! hash, so the same program finds its persistent RAM again regardless of
//! the file name it was loaded from.

mod file;
mod memory;
mod sync;

pub use file::FileBlobStore;
pub use memory::MemoryBlobStore;
pub use sync::PersistentRamSync;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Descriptive data stored alongside a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Human-readable name, e.g. the program's file name
    pub name: String,
    pub modified: DateTime<Utc>,
    /// PNG preview of the screen when the blob was written
    pub thumbnail: Option<Vec<u8>>,
}

/// One stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRecord {
    pub bytes: Vec<u8>,
    pub metadata: BlobMetadata,
}

impl BlobRecord {
    /// Record stamped with the current time
    pub fn new(bytes: Vec<u8>, name: impl Into<String>) -> Self {
        Self {
            bytes,
            metadata: BlobMetadata {
                name: name.into(),
                modified: Utc::now(),
                thumbnail: None,
            },
        }
    }

    /// Attach a PNG preview
    pub fn with_thumbnail(mut self, png: Vec<u8>) -> Self {
        self.metadata.thumbnail = Some(png);
        self
    }
}

/// Key to record storage.
pub trait BlobStore {
    fn get(&self, key: &str) -> Result<Option<BlobRecord>, StoreError>;

    fn put(&mut self, key: &str, record: &BlobRecord) -> Result<(), StoreError>;

    /// Remove `key`; returns whether it existed
    fn delete(&mut self, key: &str) -> Result<bool, StoreError>;

    /// All stored keys, sorted
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Content-derived keys for one program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    digest: String,
}

impl ProgramKey {
    /// Key for `program`'s bytes (SHA-256, hex)
    pub fn of(program: &[u8]) -> Self {
        Self {
            digest: hex::encode(Sha256::digest(program)),
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Key of the program image itself
    pub fn program(&self) -> String {
        format!("{}.program", self.digest)
    }

    /// Key of the program's persistent RAM
    pub fn persistent_ram(&self) -> String {
        format!("{}.ram", self.digest)
    }
}

/// Reject keys that cannot be used as a single file name
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
