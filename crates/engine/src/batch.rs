//! Atomic write batches.
//!
//! A batch buffers put/delete intents keyed by logical key (last write wins
//! within the batch) and commits them under one sequence number. The records
//! are followed by a commit marker; recovery only applies a batch's records
//! once it sees the marker, which makes the whole batch visible or invisible
//! atomically across a crash.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use datafile::{put_uvarint, take_uvarint, LogRecord, RecordKind, RecordPos};
use parking_lot::Mutex;

use crate::{BatchOptions, Engine, EngineError, Result};

/// Sequence sentinel for direct (non-batch) writes: committed by
/// construction, no marker needed.
pub(crate) const NON_TXN_SEQ: u64 = 0;

/// On-disk key of the commit marker record.
pub(crate) const TXN_FIN_KEY: &[u8] = b"txn_fin";

/// Prefixes `key` with the varint-encoded sequence number, producing the
/// on-disk key.
pub(crate) fn key_with_seq(key: &[u8], seq: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 10);
    put_uvarint(&mut out, seq);
    out.extend_from_slice(key);
    out
}

/// Splits an on-disk key into its sequence number and the logical key.
pub(crate) fn split_seq(key: &[u8]) -> Result<(u64, &[u8])> {
    let (seq, n) = take_uvarint(key).ok_or_else(|| {
        EngineError::DirectoryCorrupted("record key missing its sequence prefix".to_string())
    })?;
    Ok((seq, &key[n..]))
}

/// A buffered batch of writes committed atomically.
///
/// Obtained from [`Engine::new_batch`]. The buffer is guarded by its own
/// mutex, so a batch can be filled from multiple threads; `commit` takes the
/// engine write lock, so commits are totally ordered.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    opts: BatchOptions,
    pending: Mutex<BTreeMap<Vec<u8>, PendingWrite>>,
}

struct PendingWrite {
    value: Vec<u8>,
    kind: RecordKind,
}

impl Engine {
    /// Starts an empty batch against this engine.
    pub fn new_batch(&self, opts: BatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            engine: self,
            opts,
            pending: Mutex::new(BTreeMap::new()),
        }
    }
}

impl WriteBatch<'_> {
    /// Buffers an insert/replace of `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        self.pending.lock().insert(
            key.to_vec(),
            PendingWrite {
                value: value.to_vec(),
                kind: RecordKind::Normal,
            },
        );
        Ok(())
    }

    /// Buffers a delete of `key`. Deleting a key unknown to both the store
    /// and the batch is a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let mut pending = self.pending.lock();
        if self.engine.keydir.get(key)?.is_none() {
            // The key only ever existed inside this batch (if at all);
            // forgetting the buffered intent deletes it.
            pending.remove(key);
            return Ok(());
        }
        pending.insert(
            key.to_vec(),
            PendingWrite {
                value: Vec::new(),
                kind: RecordKind::Deleted,
            },
        );
        Ok(())
    }

    /// Number of buffered intents.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Writes all buffered intents under a fresh sequence number, fences
    /// them with a commit marker, then applies them to the keydir. Holds the
    /// engine write lock for the whole commit.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.opts.max_batch_size as usize {
            return Err(EngineError::BatchTooLarge);
        }

        let mut files = self.engine.files.write();
        let seq = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: Vec<(&[u8], RecordKind, RecordPos)> =
            Vec::with_capacity(pending.len());
        for (key, write) in pending.iter() {
            let record = LogRecord {
                key: key_with_seq(key, seq),
                value: write.value.clone(),
                kind: write.kind,
            };
            let pos = self.engine.append_record(&mut files, &record)?;
            positions.push((key.as_slice(), write.kind, pos));
        }

        // The marker is what recovery looks for; without it the records
        // above are dead weight.
        let marker = LogRecord {
            key: key_with_seq(TXN_FIN_KEY, seq),
            value: Vec::new(),
            kind: RecordKind::TxnFinished,
        };
        self.engine.append_record(&mut files, &marker)?;

        if self.opts.sync_on_commit {
            if let Some(active) = files.active.as_ref() {
                active.sync()?;
            }
        }

        let mut reclaimed = 0u64;
        for (key, kind, pos) in positions {
            let old = match kind {
                RecordKind::Normal => self.engine.keydir.put(key.to_vec(), pos)?,
                RecordKind::Deleted => {
                    reclaimed += u64::from(pos.size);
                    self.engine.keydir.delete(key)?
                }
                RecordKind::TxnFinished => None,
            };
            if let Some(old) = old {
                reclaimed += u64::from(old.size);
            }
        }
        drop(files);
        self.engine
            .reclaimable
            .fetch_add(reclaimed, Ordering::Relaxed);

        pending.clear();
        Ok(())
    }
}
