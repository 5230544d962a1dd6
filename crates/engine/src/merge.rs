//! Merge: compacts live records into a fresh generation.
//!
//! The merge writes into a sibling `<base>-merge` directory through a
//! scratch engine, producing new segments plus a hint file, and finally a
//! `merge-finished` marker carrying the first segment id that did *not*
//! take part. Nothing in the live directory changes until the next open
//! finds the marker and performs the handover; a crash before the marker
//! just leaves a stale directory to discard.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use datafile::{
    segment_path, DataFile, LogRecord, RecordKind, DATA_FILE_SUFFIX, HINT_FILE_NAME,
    MERGE_FINISHED_FILE_NAME,
};
use fio::IoKind;
use keydir::KeydirKind;

use crate::batch::{key_with_seq, split_seq, NON_TXN_SEQ};
use crate::{dir_size, Engine, EngineError, Options, Result};

const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the record inside the `merge-finished` marker file.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Sibling directory the merge generation is built in.
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(MERGE_DIR_SUFFIX);
    dir.parent().unwrap_or_else(|| Path::new("")).join(name)
}

impl Engine {
    /// Rewrites all live records from sealed segments into a new generation
    /// and produces a hint file for fast startup. The swap itself happens on
    /// the next open.
    ///
    /// Fails with [`EngineError::MergeInProgress`] if a merge is running,
    /// [`EngineError::MergeRatioNotReached`] while the reclaimable share is
    /// below `merge_ratio`, and [`EngineError::InsufficientDiskSpace`] when
    /// the rewritten data would not fit.
    pub fn merge(&self) -> Result<()> {
        let (non_merge_fid, merge_fids) = {
            let mut files = self.files.write();
            if files.active.is_none() {
                return Ok(()); // nothing written yet
            }
            if files.merging {
                return Err(EngineError::MergeInProgress);
            }

            let total_size = dir_size(&self.opts.dir_path)?;
            let reclaimable = self.reclaimable.load(Ordering::Relaxed);
            if self.opts.merge_ratio > 0.0
                && (reclaimable as f32) < total_size as f32 * self.opts.merge_ratio
            {
                return Err(EngineError::MergeRatioNotReached);
            }
            let live_estimate = total_size.saturating_sub(reclaimable);
            if live_estimate >= fs2::available_space(&self.opts.dir_path)? {
                return Err(EngineError::InsufficientDiskSpace);
            }

            // Seal the active segment so every record to merge sits in an
            // immutable file; writes continue in the next id meanwhile.
            let Some(active) = files.active.take() else {
                return Ok(());
            };
            active.sync()?;
            let non_merge_fid = active.file_id() + 1;
            files.older.insert(active.file_id(), active);
            files.active = Some(DataFile::open(
                &self.opts.dir_path,
                non_merge_fid,
                IoKind::Standard,
            )?);

            let mut fids: Vec<u32> = files.older.keys().copied().collect();
            fids.sort_unstable();

            files.merging = true;
            (non_merge_fid, fids)
        };

        log::info!(
            "merging {} segments below id {}",
            merge_fids.len(),
            non_merge_fid
        );
        let result = self.run_merge(non_merge_fid, &merge_fids);
        self.files.write().merging = false;
        if result.is_ok() {
            self.reclaimable.store(0, Ordering::Relaxed);
        }
        result
    }

    fn run_merge(&self, non_merge_fid: u32, merge_fids: &[u32]) -> Result<()> {
        let merge_dir = merge_path(&self.opts.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        // A scratch engine gives us the ordinary append path (rollover
        // included) inside the merge directory. Its keydir is never read,
        // so it always runs on the in-memory backend; syncing is deferred
        // to the end.
        let scratch_opts = Options {
            dir_path: merge_dir.clone(),
            sync_each_write: false,
            bytes_per_sync: 0,
            keydir: KeydirKind::Btree,
            mmap_at_startup: false,
            ..self.opts.clone()
        };
        let scratch = Engine::open(scratch_opts)?;
        let mut hint = DataFile::hint_file(&merge_dir)?;

        for &fid in merge_fids {
            let file = DataFile::open(&self.opts.dir_path, fid, IoKind::Standard)?;
            let mut offset = 0u64;
            while let Some((record, consumed)) = file.read_record(offset)? {
                let LogRecord { key, value, kind } = record;
                let (_, logical_key) = split_seq(&key)?;

                // A record is live iff the keydir still points exactly here.
                // Everything else (overwritten values, tombstones, batch
                // markers, uncommitted batch records) is dead weight.
                let live = self
                    .keydir
                    .get(logical_key)?
                    .is_some_and(|pos| pos.file_id == fid && pos.offset == offset);
                if live {
                    // Known committed: the rewrite drops the batch prefix.
                    let rewritten = LogRecord {
                        key: key_with_seq(logical_key, NON_TXN_SEQ),
                        value,
                        kind,
                    };
                    let new_pos = {
                        let mut scratch_files = scratch.files.write();
                        scratch.append_record(&mut scratch_files, &rewritten)?
                    };
                    hint.write_hint_record(logical_key, &new_pos)?;
                }
                offset += consumed;
            }
        }

        hint.sync()?;
        scratch.sync()?;
        scratch.close()?;

        // The marker is the commit point of the whole merge.
        let mut marker = DataFile::merge_finished_file(&merge_dir)?;
        let record = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_fid.to_string().into_bytes(),
            kind: RecordKind::Normal,
        };
        marker.append(&record.encode())?;
        marker.sync()?;

        log::info!("merge generation complete in {}", merge_dir.display());
        Ok(())
    }

    /// Loads the keydir from the hint file, if one exists. Hint keys are
    /// logical keys; merge already stripped the sequence prefixes.
    pub(crate) fn load_index_from_hint_file(&self) -> Result<()> {
        if !self.opts.dir_path.join(HINT_FILE_NAME).exists() {
            return Ok(());
        }

        let hint = DataFile::hint_file(&self.opts.dir_path)?;
        let mut offset = 0u64;
        while let Some((record, consumed)) = hint.read_record(offset)? {
            let pos = datafile::decode_record_pos(&record.value)?;
            self.keydir.put(record.key, pos)?;
            offset += consumed;
        }
        Ok(())
    }

    /// After a handover under the disk-resident keydir, entries for merged
    /// keys still point into the deleted generation. The hint file has their
    /// new positions; remap exactly those entries.
    ///
    /// Only an entry below the merge watermark may be touched: anything at
    /// or above it was written after the merge cut and is already correct.
    /// A key missing from the keydir was deleted since the merge, so putting
    /// its hint entry back would undo that delete.
    pub(crate) fn remap_hint_positions(&self) -> Result<()> {
        let Some(watermark) = read_non_merge_file_id(&self.opts.dir_path)? else {
            return Ok(());
        };
        if !self.opts.dir_path.join(HINT_FILE_NAME).exists() {
            return Ok(());
        }

        let hint = DataFile::hint_file(&self.opts.dir_path)?;
        let mut offset = 0u64;
        while let Some((record, consumed)) = hint.read_record(offset)? {
            let pos = datafile::decode_record_pos(&record.value)?;
            if let Some(current) = self.keydir.get(&record.key)? {
                if current.file_id < watermark {
                    self.keydir.put(record.key, pos)?;
                }
            }
            offset += consumed;
        }
        Ok(())
    }
}

/// Reads the merge watermark from `dir`'s `merge-finished` file, if present.
pub(crate) fn read_non_merge_file_id(dir: &Path) -> Result<Option<u32>> {
    if !dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        return Ok(None);
    }
    let file = DataFile::merge_finished_file(dir)?;
    let (record, _) = file.read_record(0)?.ok_or_else(|| {
        EngineError::DirectoryCorrupted("merge-finished file holds no record".to_string())
    })?;
    let text = std::str::from_utf8(&record.value).map_err(|_| {
        EngineError::DirectoryCorrupted("merge-finished value is not ascii".to_string())
    })?;
    let fid = text.parse().map_err(|_| {
        EngineError::DirectoryCorrupted(format!("merge-finished value {text:?} is not an id"))
    })?;
    Ok(Some(fid))
}

/// Handover, run at open before segments are touched: promote a finished
/// merge generation into the main directory, or discard an unfinished one.
/// Returns whether a generation was promoted.
pub(crate) fn load_merge_files(dir: &Path) -> Result<bool> {
    let merge_dir = merge_path(dir);
    if !merge_dir.exists() {
        return Ok(false);
    }

    if !merge_dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        log::warn!(
            "discarding unfinished merge directory {}",
            merge_dir.display()
        );
        fs::remove_dir_all(&merge_dir)?;
        return Ok(false);
    }

    let non_merge_fid = read_non_merge_file_id(&merge_dir)?.ok_or_else(|| {
        EngineError::DirectoryCorrupted("merge marker present but unreadable".to_string())
    })?;

    // Drop the superseded generation first; merge segments restart at id 0,
    // so this is what makes room for the renames below.
    for fid in 0..non_merge_fid {
        let path = segment_path(dir, fid);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }

    // Promote segments, the hint file, and the marker itself. The scratch
    // engine's lock and keydir files stay behind.
    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        let keep = name_str.ends_with(DATA_FILE_SUFFIX)
            || name_str == HINT_FILE_NAME
            || name_str == MERGE_FINISHED_FILE_NAME;
        if !keep {
            continue;
        }
        let dest = dir.join(&name);
        if dest.exists() {
            fs::remove_file(&dest)?;
        }
        fs::rename(entry.path(), dest)?;
    }
    fs::remove_dir_all(&merge_dir)?;

    log::info!("merge handover complete, first retained segment id {non_merge_fid}");
    Ok(true)
}
