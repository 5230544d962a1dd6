//! # engine — the CinderKV store
//!
//! A Bitcask-style embedded key/value store: every write appends a
//! checksummed record to the active segment, and an in-memory keydir maps
//! each live logical key to the exact position of its newest record.
//!
//! ```text
//! put/delete ──► record codec ──► active segment ──► keydir update
//!                                      │
//!                              (size threshold)
//!                                      ▼
//!                            demote to immutable,
//!                            open next segment id
//!
//! get ──► keydir lookup ──► segment read_record(pos) ──► value
//! ```
//!
//! ## Module responsibilities
//!
//! | Module       | Purpose                                                    |
//! |--------------|------------------------------------------------------------|
//! | `lib.rs`     | `Engine` struct, `open`, `close`, `sync`, `stat`, `backup` |
//! | [`write`]    | `put`, `delete`, the shared append path with rollover      |
//! | [`read`]     | `get`, `list_keys`, `fold`, position → value resolution    |
//! | [`batch`]    | atomic write batches fenced by a commit marker             |
//! | [`recovery`] | startup: segment enumeration, keydir rebuild, seq recovery |
//! | [`merge`]    | compaction into a side directory + crash-safe handover     |
//! | [`iterator`] | prefix/reverse iteration over live keys                    |
//!
//! ## Crash safety
//!
//! A record is only reachable once its full frame (checksum included) is on
//! disk; a torn tail reads as end-of-log. Batches become visible when their
//! commit marker is found during recovery. Merge writes an entire new
//! generation next to the live one and flips it in with a marker file, so a
//! crash at any point either keeps the old generation or completes the new
//! one on the next open.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fio::IoKind;
use fs2::FileExt;
use keydir::{Keydir, KeydirKind};
use parking_lot::RwLock;

mod batch;
mod errors;
mod iterator;
mod merge;
mod options;
mod read;
mod recovery;
mod write;

pub use batch::WriteBatch;
pub use errors::{EngineError, Result};
pub use iterator::Iter;
pub use keydir::KeydirKind as Backend;
pub use options::{BatchOptions, IterOptions, Options};

use datafile::{DataFile, LogRecord, RecordKind, SEQ_NO_FILE_NAME};

/// Directory lock file; held exclusively for the engine's lifetime.
pub const FLOCK_FILE_NAME: &str = "flock";

/// Key under which the sequence counter is persisted in `seq-no`.
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// The store. All operations take `&self`; share it across threads with an
/// `Arc`. Writers serialize on the internal lock, readers run concurrently.
pub struct Engine {
    pub(crate) opts: Options,
    /// Active + immutable segments, guarded by the engine reader/writer
    /// lock. Writers (put, delete, batch commit, the merge cutover) take it
    /// exclusively; readers (get, iterator value resolution) take it shared.
    pub(crate) files: RwLock<FileSet>,
    pub(crate) keydir: Box<dyn Keydir>,
    /// Last used batch sequence number; `fetch_add(1) + 1` mints the next.
    pub(crate) seq_no: AtomicU64,
    /// Estimated dead bytes on disk, used to gate merge.
    pub(crate) reclaimable: AtomicU64,
    closed: AtomicBool,
    /// Keeps the exclusive directory lock alive.
    _lock_file: File,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

/// The segment files, plus the write-path state they share a lock with.
pub(crate) struct FileSet {
    /// Segment currently open for appends; `None` until the first write
    /// lands in an empty store.
    pub(crate) active: Option<DataFile>,
    /// Immutable segments by id.
    pub(crate) older: std::collections::HashMap<u32, DataFile>,
    /// Bytes appended since the last sync (group-commit accounting).
    pub(crate) bytes_since_sync: u64,
    /// At most one merge runs at a time.
    pub(crate) merging: bool,
}

impl Engine {
    /// Opens the store at `opts.dir_path`, creating the directory if needed
    /// and recovering the keydir from hint and data files.
    pub fn open(opts: Options) -> Result<Self> {
        opts.validate()?;
        let dir = opts.dir_path.clone();
        fs::create_dir_all(&dir)?;

        // Single-writer exclusion across processes.
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.join(FLOCK_FILE_NAME))?;
        lock_file.try_lock_exclusive().map_err(|err| {
            if err.kind() == io::ErrorKind::WouldBlock {
                EngineError::DirectoryInUse
            } else {
                EngineError::Io(err)
            }
        })?;

        // Complete (or discard) an interrupted merge before reading segments.
        let handover = merge::load_merge_files(&dir)?;

        let io_kind = if opts.mmap_at_startup {
            IoKind::Mmap
        } else {
            IoKind::Standard
        };
        let (file_set, file_ids) = recovery::load_data_files(&dir, io_kind)?;
        let is_initial = file_ids.is_empty();

        let keydir = keydir::open_keydir(opts.keydir, &dir)?;

        let engine = Engine {
            files: RwLock::new(file_set),
            keydir,
            seq_no: AtomicU64::new(0),
            reclaimable: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            _lock_file: lock_file,
            opts,
        };

        // The disk-resident keydir is already populated; everything else is
        // rebuilt from the hint file and the data files.
        if engine.opts.keydir != KeydirKind::Bptree {
            engine.load_index_from_hint_file()?;
            engine.load_index_from_data_files(&file_ids)?;
        }

        // Startup scans may have run over memory maps; normal operation
        // goes back to standard file I/O.
        if engine.opts.mmap_at_startup {
            engine.reset_io_kind()?;
        }

        if engine.opts.keydir == KeydirKind::Bptree {
            // A freshly promoted generation invalidates the persisted
            // positions of merged keys; the hint file has the new ones.
            if handover {
                engine.remap_hint_positions()?;
            }
            engine.load_seq_no(is_initial)?;
        }

        log::debug!(
            "opened store at {} ({} segments, {} keys, seq {})",
            engine.opts.dir_path.display(),
            file_ids.len(),
            engine.keydir.len()?,
            engine.seq_no.load(Ordering::SeqCst),
        );
        Ok(engine)
    }

    /// Fsyncs the active segment.
    pub fn sync(&self) -> Result<()> {
        let files = self.files.read();
        if let Some(active) = files.active.as_ref() {
            active.sync()?;
        }
        Ok(())
    }

    /// Closes the store: syncs the active segment, closes the keydir, and
    /// (for the disk-resident keydir) persists the sequence counter.
    /// Called automatically on drop; calling it twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let files = self.files.write();
        if let Some(active) = files.active.as_ref() {
            active.sync()?;
        }
        drop(files);

        self.keydir.close()?;

        if self.opts.keydir == KeydirKind::Bptree {
            self.persist_seq_no()?;
        }
        Ok(())
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<usize> {
        Ok(self.keydir.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.keydir.is_empty()?)
    }

    /// Point-in-time statistics.
    pub fn stat(&self) -> Result<Stat> {
        let files = self.files.read();
        let data_file_count = files.older.len() + usize::from(files.active.is_some());
        drop(files);
        Ok(Stat {
            key_count: self.keydir.len()?,
            data_file_count,
            reclaimable_bytes: self.reclaimable.load(Ordering::Relaxed),
            disk_size: dir_size(&self.opts.dir_path)?,
        })
    }

    /// Copies the store directory (minus the lock file) into `dest`.
    /// Writers are held off for the duration.
    pub fn backup(&self, dest: &Path) -> Result<()> {
        let _files = self.files.read();
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(&self.opts.dir_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy() == FLOCK_FILE_NAME {
                continue;
            }
            fs::copy(entry.path(), dest.join(&name))?;
        }
        Ok(())
    }

    /// Writes the sequence counter to the `seq-no` file, replacing any
    /// previous one so a stale counter cannot shadow the current value.
    fn persist_seq_no(&self) -> Result<()> {
        let path = self.opts.dir_path.join(SEQ_NO_FILE_NAME);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let mut file = DataFile::seq_no_file(&self.opts.dir_path)?;
        let record = LogRecord {
            key: SEQ_NO_KEY.to_vec(),
            value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
            kind: RecordKind::Normal,
        };
        file.append(&record.encode())?;
        file.sync()?;
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Errors cannot propagate out of drop; the log survives regardless
        // and recovery rebuilds state on the next open.
        let _ = self.close();
    }
}

/// Point-in-time store statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Live logical keys.
    pub key_count: usize,
    /// Segment files, active included.
    pub data_file_count: usize,
    /// Estimated dead bytes a merge could reclaim.
    pub reclaimable_bytes: u64,
    /// Total bytes on disk under the store directory.
    pub disk_size: u64,
}

/// Sum of the file sizes directly under `dir`.
pub(crate) fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests;
