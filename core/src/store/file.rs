//! File-backed blob store
//!
//! One file per key under a root directory:
//!
//! ```text
//! magic "RWBL" | version u32 | modified millis i64 | name len u32 | name
//!              | data len u32 | data | thumbnail len u32 | thumbnail PNG
//! ```
//!
//! All integers are little-endian. A zero thumbnail length means none;
//! version 1 files end after the data and never carry one.
//!
//! Writes go to a temporary file that is renamed over the target, so a
//! crash mid-write leaves the previous record intact.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{BlobMetadata, BlobRecord, BlobStore, validate_key};
use crate::error::StoreError;

pub const BLOB_MAGIC: [u8; 4] = *b"RWBL";
pub const BLOB_VERSION: u32 = 2;
const BLOB_EXTENSION: &str = "blob";

/// Blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store in the platform data directory
    pub fn open_default() -> Option<Self> {
        crate::config::data_dir().map(|dir| Self::new(dir.join("blobs")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{BLOB_EXTENSION}"))
    }

    fn encode(record: &BlobRecord) -> io::Result<Vec<u8>> {
        let name = record.metadata.name.as_bytes();
        let thumbnail = record.metadata.thumbnail.as_deref().unwrap_or_default();
        let mut out =
            Vec::with_capacity(28 + name.len() + record.bytes.len() + thumbnail.len());
        out.extend_from_slice(&BLOB_MAGIC);
        out.write_u32::<LittleEndian>(BLOB_VERSION)?;
        out.write_i64::<LittleEndian>(record.metadata.modified.timestamp_millis())?;
        out.write_u32::<LittleEndian>(name.len() as u32)?;
        out.extend_from_slice(name);
        out.write_u32::<LittleEndian>(record.bytes.len() as u32)?;
        out.extend_from_slice(&record.bytes);
        out.write_u32::<LittleEndian>(thumbnail.len() as u32)?;
        out.extend_from_slice(thumbnail);
        Ok(out)
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<BlobRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            key: key.to_string(),
            reason,
        };
        let truncated = |_: io::Error| StoreError::Corrupt {
            key: key.to_string(),
            reason: "truncated".into(),
        };

        let mut cursor = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(truncated)?;
        if magic != BLOB_MAGIC {
            return Err(corrupt("bad magic".into()));
        }
        let version = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if version == 0 || version > BLOB_VERSION {
            return Err(corrupt(format!("unsupported version {version}")));
        }

        let millis = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
        let modified = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| corrupt(format!("timestamp {millis} out of range")))?;

        let name_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let name = read_block(&mut cursor, name_len).map_err(truncated)?;
        let name = String::from_utf8(name).map_err(|_| corrupt("name is not UTF-8".into()))?;

        let data_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let data = read_block(&mut cursor, data_len).map_err(truncated)?;

        let thumbnail = if version >= 2 {
            let len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
            Some(read_block(&mut cursor, len).map_err(truncated)?).filter(|t| !t.is_empty())
        } else {
            None
        };
        if (cursor.position() as usize) != bytes.len() {
            return Err(corrupt("trailing bytes".into()));
        }

        Ok(BlobRecord {
            bytes: data,
            metadata: BlobMetadata {
                name,
                modified,
                thumbnail,
            },
        })
    }
}

fn read_block(cursor: &mut Cursor<&[u8]>, len: usize) -> io::Result<Vec<u8>> {
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<BlobRecord>, StoreError> {
        validate_key(key)?;
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path)(e)),
        };
        Self::decode(key, &bytes).map(Some)
    }

    fn put(&mut self, key: &str, record: &BlobRecord) -> Result<(), StoreError> {
        validate_key(key)?;
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;

        let path = self.path_for(key);
        let mut tmp_name = OsString::from(key);
        tmp_name.push(".tmp");
        let tmp_path = self.root.join(tmp_name);

        let out = Self::encode(record).map_err(io_err(&path))?;
        {
            let mut f = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
            f.write_all(&out).map_err(io_err(&tmp_path))?;
            f.sync_all().map_err(io_err(&tmp_path))?;
        }

        #[cfg(windows)]
        {
            if path.exists() {
                // Windows rename fails if destination exists.
                fs::remove_file(&path).map_err(io_err(&path))?;
            }
        }

        fs::rename(&tmp_path, &path).map_err(io_err(&path))?;
        debug!("Stored {} ({} bytes)", key, record.bytes.len());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root)(e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err(&self.root))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
