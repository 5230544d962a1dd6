//! Iteration over live keys, with optional prefix filter and direction.

use keydir::KeydirIter;

use crate::{Engine, IterOptions, Result};

/// Iterator over the store's keys.
///
/// The key set is a snapshot taken when the iterator is created; values are
/// resolved through the live engine at [`Iter::value`] time. A key whose
/// entry has since been removed (or compacted away) resolves to
/// [`crate::EngineError::KeyNotFound`], which callers should treat as "skip".
pub struct Iter<'a> {
    engine: &'a Engine,
    inner: Box<dyn KeydirIter>,
    opts: IterOptions,
}

impl Engine {
    /// Opens an iterator positioned on the first matching key.
    pub fn iter(&self, opts: IterOptions) -> Result<Iter<'_>> {
        let inner = self.keydir.iter(opts.reverse)?;
        let mut iter = Iter {
            engine: self,
            inner,
            opts,
        };
        iter.skip_to_prefix();
        Ok(iter)
    }
}

impl Iter<'_> {
    /// Back to the first matching key (the last, for reverse iterators).
    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_to_prefix();
    }

    /// Positions at the first key `>=` the target (`<=` in reverse), then
    /// skips forward to the prefix if one is set.
    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
        self.skip_to_prefix();
    }

    /// Advances to the next matching key.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        self.inner.next();
        self.skip_to_prefix();
    }

    /// Whether the iterator rests on a key.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// The current logical key. Only meaningful while [`Iter::valid`].
    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Resolves the current key's value through the engine.
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos = self.inner.pos();
        let files = self.engine.files.read();
        self.engine.value_at(&files, &pos)
    }

    /// Releases the underlying snapshot. Dropping the iterator does the
    /// same; this exists for callers who want the release to be explicit.
    pub fn close(self) {}

    fn skip_to_prefix(&mut self) {
        if self.opts.prefix.is_empty() {
            return;
        }
        while self.inner.valid() {
            let key = self.inner.key();
            if key.len() >= self.opts.prefix.len()
                && key[..self.opts.prefix.len()] == self.opts.prefix[..]
            {
                break;
            }
            self.inner.next();
        }
    }
}
