//! # keydir — the authoritative key → record-position map
//!
//! Every live logical key maps to the location of its newest record
//! ([`datafile::RecordPos`]). Three interchangeable backends implement the
//! [`Keydir`] contract:
//!
//! * [`BtreeKeydir`] — an in-memory ordered map. The default.
//! * [`ArtKeydir`] — an in-memory adaptive radix tree.
//! * [`BptreeKeydir`] — a B+ tree persisted in its own file; selecting it
//!   makes the keydir itself durable, so startup can skip the data-file scan.
//!
//! Iteration is byte-lexicographic, forward or reverse. The in-memory
//! backends hand out *snapshot* iterators: the key set is fixed the moment
//! `iter` is called, but positions resolve against the live store, so a key
//! deleted after the snapshot surfaces as a missing record to the caller.
//! The B+ tree backend materializes its snapshot from a single read
//! transaction, giving a consistent view of keys and positions both.

use std::path::Path;

use datafile::RecordPos;
use thiserror::Error;

mod art;
mod bptree;
mod btree;

pub use art::ArtKeydir;
pub use bptree::{BptreeKeydir, BPTREE_INDEX_FILE_NAME};
pub use btree::BtreeKeydir;

/// Errors from the keydir layer. The in-memory backends are infallible;
/// everything here comes from the disk-resident one.
#[derive(Debug, Error)]
pub enum KeydirError {
    #[error("keydir storage error: {0}")]
    Storage(String),
}

impl From<jammdb::Error> for KeydirError {
    fn from(err: jammdb::Error) -> Self {
        KeydirError::Storage(err.to_string())
    }
}

impl From<datafile::DataFileError> for KeydirError {
    fn from(err: datafile::DataFileError) -> Self {
        KeydirError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KeydirError>;

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeydirKind {
    /// In-memory ordered map.
    #[default]
    Btree,
    /// In-memory adaptive radix tree.
    Art,
    /// Disk-resident B+ tree.
    Bptree,
}

/// The keydir contract. Implementations serialize their own mutations, so
/// all operations take `&self`.
pub trait Keydir: Send + Sync {
    /// Inserts or replaces the position for `key`, returning the replaced
    /// position if the key was already present.
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>>;

    /// Looks up the position for `key`.
    fn get(&self, key: &[u8]) -> Result<Option<RecordPos>>;

    /// Removes `key`, returning the removed position. Removing an absent key
    /// is a no-op returning `None`.
    fn delete(&self, key: &[u8]) -> Result<Option<RecordPos>>;

    /// Number of live keys.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Opens an iterator over the current key set in byte order.
    fn iter(&self, reverse: bool) -> Result<Box<dyn KeydirIter>>;

    /// Releases backend resources; for the disk-resident backend this makes
    /// the final state durable.
    fn close(&self) -> Result<()>;
}

/// Cursor over a keydir's key set. `key`/`pos` may only be called while
/// `valid` returns true. Resources are released on drop.
pub trait KeydirIter {
    /// Repositions at the first key (last, for reverse iterators).
    fn rewind(&mut self);

    /// Positions at the first key `>= key` (`<= key` for reverse iterators).
    fn seek(&mut self, key: &[u8]);

    /// Advances to the next key in iteration order.
    fn next(&mut self);

    /// Whether the cursor currently rests on a key.
    fn valid(&self) -> bool;

    /// The current key.
    fn key(&self) -> &[u8];

    /// The current position entry.
    fn pos(&self) -> RecordPos;
}

/// Opens the backend selected by `kind`. `dir` is only touched by the
/// disk-resident backend.
pub fn open_keydir(kind: KeydirKind, dir: &Path) -> Result<Box<dyn Keydir>> {
    Ok(match kind {
        KeydirKind::Btree => Box::new(BtreeKeydir::new()),
        KeydirKind::Art => Box::new(ArtKeydir::new()),
        KeydirKind::Bptree => Box::new(BptreeKeydir::open(dir)?),
    })
}

/// Array-snapshot iterator shared by every backend: the (key, pos) pairs are
/// captured in iteration order at creation time.
pub(crate) struct SnapshotIter {
    items: Vec<(Vec<u8>, RecordPos)>,
    index: usize,
    reverse: bool,
}

impl SnapshotIter {
    /// `items` must be in ascending key order; they are flipped here for
    /// reverse iteration.
    pub(crate) fn new(mut items: Vec<(Vec<u8>, RecordPos)>, reverse: bool) -> Self {
        if reverse {
            items.reverse();
        }
        Self {
            items,
            index: 0,
            reverse,
        }
    }
}

impl KeydirIter for SnapshotIter {
    fn rewind(&mut self) {
        self.index = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.index = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.index += 1;
    }

    fn valid(&self) -> bool {
        self.index < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.index].0
    }

    fn pos(&self) -> RecordPos {
        self.items[self.index].1
    }
}
