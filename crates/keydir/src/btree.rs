//! Ordered-map keydir backend.

use std::collections::BTreeMap;

use datafile::RecordPos;
use parking_lot::RwLock;

use crate::{Keydir, KeydirIter, Result, SnapshotIter};

/// Keydir over a balanced ordered map guarded by a reader/writer lock.
#[derive(Default)]
pub struct BtreeKeydir {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPos>>,
}

impl BtreeKeydir {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keydir for BtreeKeydir {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        Ok(self.tree.write().remove(key))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tree.read().len())
    }

    fn iter(&self, reverse: bool) -> Result<Box<dyn KeydirIter>> {
        let items = self
            .tree
            .read()
            .iter()
            .map(|(k, p)| (k.clone(), *p))
            .collect();
        Ok(Box::new(SnapshotIter::new(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
