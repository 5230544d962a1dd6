//! The error set callers of the engine see.

use datafile::DataFileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Keys must be non-empty byte strings.
    #[error("key is empty")]
    EmptyKey,

    /// The key is absent or tombstoned.
    #[error("key not found")]
    KeyNotFound,

    /// A keydir entry points at a segment that no longer exists.
    #[error("data file not found")]
    DataFileNotFound,

    #[error("dir path is empty")]
    EmptyDirPath,

    #[error("segment size must be greater than 0")]
    InvalidSegmentSize,

    #[error("merge ratio must be between 0 and 1")]
    InvalidMergeRatio,

    /// The store directory contains files the engine cannot make sense of.
    #[error("data directory corrupted: {0}")]
    DirectoryCorrupted(String),

    /// The batch holds more records than `max_batch_size` allows.
    #[error("batch exceeds the maximum record count")]
    BatchTooLarge,

    /// Only one merge may run at a time.
    #[error("merge is in progress, try again later")]
    MergeInProgress,

    /// Another process holds the directory lock.
    #[error("the database directory is used by another process")]
    DirectoryInUse,

    /// Reclaimable bytes have not crossed the configured merge ratio.
    #[error("the merge ratio threshold has not been reached")]
    MergeRatioNotReached,

    /// Merging would not leave enough free disk space.
    #[error("not enough disk space for merge")]
    InsufficientDiskSpace,

    /// A record failed checksum validation.
    #[error("invalid record crc")]
    InvalidCrc,

    #[error("keydir error: {0}")]
    Keydir(#[from] keydir::KeydirError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DataFileError> for EngineError {
    fn from(err: DataFileError) -> Self {
        match err {
            DataFileError::Io(e) => EngineError::Io(e),
            DataFileError::InvalidCrc => EngineError::InvalidCrc,
            DataFileError::Corrupted(msg) => EngineError::DirectoryCorrupted(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
