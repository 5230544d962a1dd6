//! Write path: `put`, `delete`, and the append path they share with batch
//! commit and merge.
//!
//! Every mutation becomes one log record in the active segment. The on-disk
//! key carries a sequence prefix; direct writes use the reserved sentinel 0,
//! which recovery treats as committed without waiting for a marker.

use std::sync::atomic::Ordering;

use datafile::{DataFile, LogRecord, RecordKind, RecordPos};
use fio::IoKind;

use crate::batch::{key_with_seq, NON_TXN_SEQ};
use crate::{Engine, EngineError, FileSet, Result};

impl Engine {
    /// Inserts or replaces `key` with `value`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }

        let record = LogRecord {
            key: key_with_seq(key, NON_TXN_SEQ),
            value: value.to_vec(),
            kind: RecordKind::Normal,
        };

        let mut files = self.files.write();
        let pos = self.append_record(&mut files, &record)?;
        if let Some(old) = self.keydir.put(key.to_vec(), pos)? {
            self.reclaimable
                .fetch_add(u64::from(old.size), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Deletes `key` by appending a tombstone. Deleting an absent key is a
    /// successful no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        if self.keydir.get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: key_with_seq(key, NON_TXN_SEQ),
            value: Vec::new(),
            kind: RecordKind::Deleted,
        };

        let mut files = self.files.write();
        let pos = self.append_record(&mut files, &record)?;
        // The tombstone is dead weight the moment it lands, and so is the
        // record it shadows.
        self.reclaimable
            .fetch_add(u64::from(pos.size), Ordering::Relaxed);
        if let Some(old) = self.keydir.delete(key)? {
            self.reclaimable
                .fetch_add(u64::from(old.size), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Appends one encoded record to the active segment, rolling over to a
    /// fresh segment when the size threshold would be crossed. Callers hold
    /// the engine write lock (they own the `&mut FileSet`).
    pub(crate) fn append_record(
        &self,
        files: &mut FileSet,
        record: &LogRecord,
    ) -> Result<RecordPos> {
        let encoded = record.encode();
        let size = encoded.len() as u64;

        let next = match files.active.take() {
            // This record would reach the threshold: seal the active
            // segment and continue in the next id.
            Some(active) if active.write_offset() + size >= self.opts.segment_size => {
                active.sync()?;
                let next_id = active.file_id() + 1;
                files.older.insert(active.file_id(), active);
                DataFile::open(&self.opts.dir_path, next_id, IoKind::Standard)?
            }
            Some(active) => active,
            // First write into an empty store.
            None => DataFile::open(&self.opts.dir_path, 0, IoKind::Standard)?,
        };
        let active = files.active.insert(next);

        let offset = active.write_offset();
        active.append(&encoded)?;

        files.bytes_since_sync += size;
        let need_sync = self.opts.sync_each_write
            || (self.opts.bytes_per_sync > 0 && files.bytes_since_sync >= self.opts.bytes_per_sync);
        if need_sync {
            active.sync()?;
            files.bytes_since_sync = 0;
        }

        Ok(RecordPos {
            file_id: active.file_id(),
            offset,
            size: size as u32,
        })
    }
}
