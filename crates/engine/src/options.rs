//! Engine, iterator, and batch configuration.

use std::path::PathBuf;

use keydir::KeydirKind;

use crate::{EngineError, Result};

/// Store configuration. Only `dir_path` has no usable default.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding segments and index files.
    pub dir_path: PathBuf,
    /// Rollover threshold: an append that would reach this size seals the
    /// active segment and opens the next one.
    pub segment_size: u64,
    /// Fsync after every single write.
    pub sync_each_write: bool,
    /// Group-commit threshold: fsync once this many bytes have accumulated
    /// since the last sync. `0` disables it.
    pub bytes_per_sync: u64,
    /// Which keydir backend to use.
    pub keydir: KeydirKind,
    /// Read segments through memory maps during the startup scan.
    pub mmap_at_startup: bool,
    /// Merge runs only once `reclaimable / total` crosses this ratio.
    /// `0.0` removes the gate.
    pub merge_ratio: f32,
}

impl Options {
    /// Default options rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(EngineError::EmptyDirPath);
        }
        if self.segment_size == 0 {
            return Err(EngineError::InvalidSegmentSize);
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(EngineError::InvalidMergeRatio);
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::new(),
            segment_size: 1 << 30, // 1 GiB
            sync_each_write: false,
            bytes_per_sync: 0,
            keydir: KeydirKind::Btree,
            mmap_at_startup: true,
            merge_ratio: 0.5,
        }
    }
}

/// Iterator configuration.
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Only keys starting with this prefix are yielded. Empty matches all.
    pub prefix: Vec<u8>,
    /// Iterate in descending key order.
    pub reverse: bool,
}

/// Batch configuration.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum number of buffered records a single commit may carry.
    pub max_batch_size: u32,
    /// Fsync the active segment once the commit marker is written.
    pub sync_on_commit: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_on_commit: true,
        }
    }
}
