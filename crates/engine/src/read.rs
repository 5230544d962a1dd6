//! Read path: point lookups and whole-store scans.

use datafile::{RecordKind, RecordPos};

use crate::{Engine, EngineError, FileSet, Result};

impl Engine {
    /// Looks up the live value for `key`.
    ///
    /// Returns [`EngineError::KeyNotFound`] when the key is absent or
    /// tombstoned.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }

        let files = self.files.read();
        let pos = self.keydir.get(key)?.ok_or(EngineError::KeyNotFound)?;
        self.value_at(&files, &pos)
    }

    /// All live logical keys in ascending byte order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.keydir.iter(false)?;
        let mut keys = Vec::with_capacity(self.keydir.len()?);
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Visits every live (key, value) pair in ascending key order until `f`
    /// returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], Vec<u8>) -> bool,
    {
        let files = self.files.read();
        let mut iter = self.keydir.iter(false)?;
        while iter.valid() {
            let value = self.value_at(&files, &iter.pos())?;
            if !f(iter.key(), value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Resolves a keydir position to the record's value.
    pub(crate) fn value_at(&self, files: &FileSet, pos: &RecordPos) -> Result<Vec<u8>> {
        let file = match files.active.as_ref() {
            Some(active) if active.file_id() == pos.file_id => Some(active),
            _ => files.older.get(&pos.file_id),
        };
        let file = file.ok_or(EngineError::DataFileNotFound)?;

        // A position that resolves to nothing means the record was compacted
        // away under a stale snapshot; callers see that as a missing key.
        let (record, _) = file
            .read_record(pos.offset)?
            .ok_or(EngineError::KeyNotFound)?;
        if record.kind == RecordKind::Deleted {
            return Err(EngineError::KeyNotFound);
        }
        Ok(record.value)
    }
}
