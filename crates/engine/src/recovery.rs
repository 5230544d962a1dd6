//! Startup recovery: enumerate segments, rebuild the keydir, replay
//! batches, and restore the sequence counter.
//!
//! The scan applies records with the sequence sentinel 0 immediately.
//! Records carrying a real sequence number are parked until their commit
//! marker turns up; a batch whose marker never made it to disk is simply
//! never applied, which is exactly the atomicity the batch protocol
//! promises.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;

use datafile::{DataFile, RecordKind, RecordPos, DATA_FILE_SUFFIX, SEQ_NO_FILE_NAME};
use fio::IoKind;

use crate::batch::{split_seq, NON_TXN_SEQ};
use crate::{merge, Engine, EngineError, FileSet, Result};

/// Enumerates `*.data` files in `dir` and opens them, newest id as the
/// active segment. Returns the file set and the sorted ids.
pub(crate) fn load_data_files(dir: &Path, io_kind: IoKind) -> Result<(FileSet, Vec<u32>)> {
    let mut file_ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) else {
            continue;
        };
        let id: u32 = stem.parse().map_err(|_| {
            EngineError::DirectoryCorrupted(format!("unparseable segment file name {name}"))
        })?;
        file_ids.push(id);
    }
    file_ids.sort_unstable();

    let mut files = FileSet {
        active: None,
        older: HashMap::new(),
        bytes_since_sync: 0,
        merging: false,
    };
    for (i, &id) in file_ids.iter().enumerate() {
        let file = DataFile::open(dir, id, io_kind)?;
        if i == file_ids.len() - 1 {
            files.active = Some(file);
        } else {
            files.older.insert(id, file);
        }
    }
    Ok((files, file_ids))
}

impl Engine {
    /// Scans the data files in id order, rebuilding the keydir.
    ///
    /// Files older than the merge watermark are skipped when a hint file was
    /// already loaded for them. The engine's sequence counter ends up at the
    /// maximum sequence seen anywhere in the log.
    pub(crate) fn load_index_from_data_files(&self, file_ids: &[u32]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        // A completed merge leaves its watermark in the main directory;
        // everything below it is covered by the hint file.
        let non_merge_fid = merge::read_non_merge_file_id(&self.opts.dir_path)?;

        let mut files = self.files.write();
        let mut pending: HashMap<u64, Vec<(Vec<u8>, RecordKind, RecordPos)>> = HashMap::new();
        let mut max_seq = NON_TXN_SEQ;

        for &fid in file_ids {
            if let Some(watermark) = non_merge_fid {
                if fid < watermark {
                    continue;
                }
            }

            let is_active = files
                .active
                .as_ref()
                .map(|a| a.file_id() == fid)
                .unwrap_or(false);
            let file = if is_active {
                files.active.as_ref()
            } else {
                files.older.get(&fid)
            };
            let Some(file) = file else {
                return Err(EngineError::DataFileNotFound);
            };

            let mut offset = 0u64;
            while let Some((record, consumed)) = file.read_record(offset)? {
                let pos = RecordPos {
                    file_id: fid,
                    offset,
                    size: consumed as u32,
                };
                let (seq, logical_key) = split_seq(&record.key)?;

                if seq == NON_TXN_SEQ {
                    self.apply_recovered(logical_key.to_vec(), record.kind, pos)?;
                } else if record.kind == RecordKind::TxnFinished {
                    // Marker reached: the whole batch becomes visible now.
                    for (key, kind, pos) in pending.remove(&seq).unwrap_or_default() {
                        self.apply_recovered(key, kind, pos)?;
                    }
                } else {
                    pending
                        .entry(seq)
                        .or_default()
                        .push((logical_key.to_vec(), record.kind, pos));
                }

                max_seq = max_seq.max(seq);
                offset += consumed;
            }

            if is_active {
                if let Some(active) = files.active.as_mut() {
                    active.set_write_offset(offset);
                }
            }
        }

        // Marker-less batches left in `pending` are dropped here: dead
        // weight until the next merge.
        self.seq_no.store(max_seq, Ordering::SeqCst);
        Ok(())
    }

    fn apply_recovered(&self, key: Vec<u8>, kind: RecordKind, pos: RecordPos) -> Result<()> {
        let old = match kind {
            RecordKind::Normal => self.keydir.put(key, pos)?,
            RecordKind::Deleted => {
                self.reclaimable
                    .fetch_add(u64::from(pos.size), Ordering::Relaxed);
                self.keydir.delete(&key)?
            }
            RecordKind::TxnFinished => None,
        };
        if let Some(old) = old {
            self.reclaimable
                .fetch_add(u64::from(old.size), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Restores the sequence counter for the disk-resident keydir: from the
    /// `seq-no` file when a clean close left one, otherwise by scanning the
    /// record keys in every segment.
    pub(crate) fn load_seq_no(&self, is_initial: bool) -> Result<()> {
        let path = self.opts.dir_path.join(SEQ_NO_FILE_NAME);
        if path.exists() {
            let file = DataFile::seq_no_file(&self.opts.dir_path)?;
            let (record, _) = file.read_record(0)?.ok_or_else(|| {
                EngineError::DirectoryCorrupted("seq-no file holds no record".to_string())
            })?;
            let text = std::str::from_utf8(&record.value).map_err(|_| {
                EngineError::DirectoryCorrupted("seq-no value is not ascii".to_string())
            })?;
            let seq: u64 = text.parse().map_err(|_| {
                EngineError::DirectoryCorrupted(format!("seq-no value {text:?} is not a number"))
            })?;
            self.seq_no.store(seq, Ordering::SeqCst);
            return Ok(());
        }

        if is_initial {
            return Ok(()); // fresh store, counter starts at 0
        }

        // The previous process died before the counter was persisted.
        // Recover it from the sequence prefixes so batches stay monotonic.
        log::warn!("seq-no file missing; scanning segments to recover the sequence counter");
        let files = self.files.read();
        let mut max_seq = NON_TXN_SEQ;
        let active = files.active.iter();
        for file in files.older.values().chain(active) {
            let mut offset = 0u64;
            while let Some((record, consumed)) = file.read_record(offset)? {
                let (seq, _) = split_seq(&record.key)?;
                max_seq = max_seq.max(seq);
                offset += consumed;
            }
        }
        self.seq_no.store(max_seq, Ordering::SeqCst);
        Ok(())
    }

    /// Reopens every segment with standard file I/O after a memory-mapped
    /// startup scan.
    pub(crate) fn reset_io_kind(&self) -> Result<()> {
        let mut files = self.files.write();
        if let Some(active) = files.active.as_mut() {
            active.set_io_backend(&self.opts.dir_path, IoKind::Standard)?;
        }
        for file in files.older.values_mut() {
            file.set_io_backend(&self.opts.dir_path, IoKind::Standard)?;
        }
        Ok(())
    }
}
