//! Disk-resident B+ tree keydir backend.
//!
//! Positions live in a single bucket of a [`jammdb`] file, so the keydir
//! itself survives restarts and startup can skip rebuilding it from data
//! files. Every mutation runs in its own committed write transaction.

use std::path::Path;

use datafile::{decode_record_pos, encode_record_pos, RecordPos};
use jammdb::{Data, DB};

use crate::{Keydir, KeydirIter, Result, SnapshotIter};

/// File holding the B+ tree, inside the store directory.
pub const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const BUCKET_NAME: &str = "keydir";

pub struct BptreeKeydir {
    db: DB,
}

impl BptreeKeydir {
    /// Opens (or creates) the index file inside `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let db = DB::open(dir.join(BPTREE_INDEX_FILE_NAME))?;
        let tx = db.tx(true)?;
        tx.get_or_create_bucket(BUCKET_NAME)?;
        tx.commit()?;
        Ok(Self { db })
    }

    fn lookup(bucket: &jammdb::Bucket, key: &[u8]) -> Result<Option<RecordPos>> {
        match bucket.get(key) {
            Some(Data::KeyValue(kv)) => Ok(Some(decode_record_pos(kv.value())?)),
            _ => Ok(None),
        }
    }
}

impl Keydir for BptreeKeydir {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>> {
        let tx = self.db.tx(true)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        let old = Self::lookup(&bucket, &key)?;
        bucket.put(key, encode_record_pos(&pos))?;
        tx.commit()?;
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        let tx = self.db.tx(false)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        Self::lookup(&bucket, key)
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        let tx = self.db.tx(true)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        let old = Self::lookup(&bucket, key)?;
        if old.is_some() {
            bucket.delete(key)?;
            tx.commit()?;
        }
        Ok(old)
    }

    fn len(&self) -> Result<usize> {
        let tx = self.db.tx(false)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        Ok(bucket
            .cursor()
            .filter(|data| matches!(data, Data::KeyValue(_)))
            .count())
    }

    fn iter(&self, reverse: bool) -> Result<Box<dyn KeydirIter>> {
        // A jammdb cursor cannot outlive its transaction, so the iterator
        // materializes the (key, pos) pairs from one read transaction; keys
        // and positions are a consistent snapshot.
        let tx = self.db.tx(false)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        let mut items = Vec::new();
        for data in bucket.cursor() {
            if let Data::KeyValue(kv) = data {
                items.push((kv.key().to_vec(), decode_record_pos(kv.value())?));
            }
        }
        Ok(Box::new(SnapshotIter::new(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        // jammdb transactions are durable on commit; dropping the handle is
        // all that remains.
        Ok(())
    }
}
