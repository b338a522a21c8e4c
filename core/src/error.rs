//! Error types

use std::path::PathBuf;

/// Errors reported by a [`StepEngine`](crate::engine::StepEngine).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Program bytes could not be loaded
    #[error("invalid program: {0}")]
    InvalidProgram(String),

    /// Snapshot does not belong to this engine
    #[error("snapshot mismatch: expected {expected} bytes, got {actual}")]
    SnapshotMismatch { expected: usize, actual: usize },

    /// Snapshot payload failed validation
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Persistent RAM buffer has the wrong size
    #[error("persistent RAM size mismatch: expected {expected} bytes, got {actual}")]
    PersistentRamSize { expected: usize, actual: usize },
}

/// Errors surfaced by a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Program failed to load; no session was created
    #[error("invalid program: {0}")]
    InvalidProgram(String),

    /// Configuration rejected at creation
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Fatal engine fault; the session must be recreated
    #[error("engine fault: {0}")]
    Engine(#[from] EngineError),
}

/// Reasons a rewind operation was refused or failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewindError {
    /// Seek requested outside a rewind session
    #[error("not rewinding")]
    NotRewinding,

    /// No history has been recorded
    #[error("rewind history is empty")]
    Empty,

    /// Seek target outside the recorded history
    #[error("tick {target} outside recorded range [{oldest}, {newest}]")]
    OutOfRange {
        target: u64,
        oldest: u64,
        newest: u64,
    },

    /// A single record cannot fit in the buffer
    #[error("record of {size} bytes exceeds rewind capacity of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: usize },

    /// Stored record failed to decode
    #[error("rewind record decode failed: {0}")]
    Decode(String),

    /// Engine rejected the restored state
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors from a [`BlobStore`](crate::store::BlobStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record on disk failed validation
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Key cannot be used as a file name
    #[error("invalid key {0:?}")]
    InvalidKey(String),
}

/// Errors loading or saving [`SessionConfig`](crate::config::SessionConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_wraps_engine_error() {
        let err: SessionError = EngineError::CorruptSnapshot("bad header".into()).into();
        assert_eq!(err.to_string(), "engine fault: corrupt snapshot: bad header");
    }

    #[test]
    fn engine_error_display() {
        let err = EngineError::PersistentRamSize {
            expected: 8192,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "persistent RAM size mismatch: expected 8192 bytes, got 12"
        );
    }
}
