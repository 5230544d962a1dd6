//! Adaptive radix tree keydir backend.
//!
//! A byte-wise radix tree whose nodes adapt their child representation to
//! their fanout: a sorted sparse list while small, a direct 256-slot table
//! once the fanout outgrows it. Lookups walk one node per key byte;
//! traversal visits children in byte order, which makes iteration
//! byte-lexicographic for free (a node's own value sorts before any longer
//! key passing through it).

use datafile::RecordPos;
use parking_lot::RwLock;

use crate::{Keydir, KeydirIter, Result, SnapshotIter};

/// Fanout at which a sparse child list is promoted to a dense table.
const SPARSE_MAX: usize = 48;

#[derive(Default)]
pub struct ArtKeydir {
    inner: RwLock<Art>,
}

impl ArtKeydir {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keydir for ArtKeydir {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>> {
        Ok(self.inner.write().insert(&key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        Ok(self.inner.read().get(key))
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        Ok(self.inner.write().remove(key))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.read().len)
    }

    fn iter(&self, reverse: bool) -> Result<Box<dyn KeydirIter>> {
        let inner = self.inner.read();
        let mut items = Vec::with_capacity(inner.len);
        let mut prefix = Vec::new();
        collect(&inner.root, &mut prefix, &mut items);
        Ok(Box::new(SnapshotIter::new(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Art {
    root: Node,
    len: usize,
}

struct Node {
    value: Option<RecordPos>,
    children: Children,
}

impl Node {
    fn new() -> Self {
        Self {
            value: None,
            children: Children::Sparse(Vec::new()),
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

/// Child table of one node; the representation adapts to the fanout.
enum Children {
    /// (byte, child) pairs kept sorted by byte.
    Sparse(Vec<(u8, Node)>),
    /// Direct table indexed by the key byte.
    Dense(Box<[Option<Node>; 256]>),
}

impl Children {
    fn get(&self, byte: u8) -> Option<&Node> {
        match self {
            Children::Sparse(v) => v
                .binary_search_by_key(&byte, |(b, _)| *b)
                .ok()
                .map(|i| &v[i].1),
            Children::Dense(t) => t[byte as usize].as_ref(),
        }
    }

    fn get_mut(&mut self, byte: u8) -> Option<&mut Node> {
        match self {
            Children::Sparse(v) => v
                .binary_search_by_key(&byte, |(b, _)| *b)
                .ok()
                .map(|i| &mut v[i].1),
            Children::Dense(t) => t[byte as usize].as_mut(),
        }
    }

    /// Returns the child for `byte`, creating it (and promoting the node to
    /// the dense representation when the sparse list is full) as needed.
    fn ensure(&mut self, byte: u8) -> &mut Node {
        let promote = matches!(
            self,
            Children::Sparse(v)
                if v.len() >= SPARSE_MAX
                    && v.binary_search_by_key(&byte, |(b, _)| *b).is_err()
        );
        if promote {
            let old = std::mem::replace(
                self,
                Children::Dense(Box::new(std::array::from_fn(|_| None))),
            );
            if let (Children::Sparse(pairs), Children::Dense(table)) = (old, &mut *self) {
                for (b, child) in pairs {
                    table[b as usize] = Some(child);
                }
            }
        }

        match self {
            Children::Sparse(v) => match v.binary_search_by_key(&byte, |(b, _)| *b) {
                Ok(i) => &mut v[i].1,
                Err(i) => {
                    v.insert(i, (byte, Node::new()));
                    &mut v[i].1
                }
            },
            Children::Dense(t) => t[byte as usize].get_or_insert_with(Node::new),
        }
    }

    fn remove(&mut self, byte: u8) {
        match self {
            Children::Sparse(v) => {
                if let Ok(i) = v.binary_search_by_key(&byte, |(b, _)| *b) {
                    v.remove(i);
                }
            }
            Children::Dense(t) => t[byte as usize] = None,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Children::Sparse(v) => v.is_empty(),
            Children::Dense(t) => t.iter().all(|c| c.is_none()),
        }
    }
}

impl Art {
    fn insert(&mut self, key: &[u8], pos: RecordPos) -> Option<RecordPos> {
        let mut node = &mut self.root;
        for &byte in key {
            node = node.children.ensure(byte);
        }
        let old = node.value.replace(pos);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        let mut node = &self.root;
        for &byte in key {
            node = node.children.get(byte)?;
        }
        node.value
    }

    fn remove(&mut self, key: &[u8]) -> Option<RecordPos> {
        let removed = remove_rec(&mut self.root, key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }
}

fn remove_rec(node: &mut Node, key: &[u8]) -> Option<RecordPos> {
    let (&byte, rest) = match key.split_first() {
        None => return node.value.take(),
        Some(split) => split,
    };

    let (removed, prune) = {
        let child = node.children.get_mut(byte)?;
        let removed = remove_rec(child, rest);
        let prune =
            removed.is_some() && child.value.is_none() && child.children.is_empty();
        (removed, prune)
    };
    if prune {
        node.children.remove(byte);
    }
    removed
}

/// In-order traversal: a node's own value first, then its children by byte.
fn collect(node: &Node, prefix: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, RecordPos)>) {
    if let Some(pos) = node.value {
        out.push((prefix.clone(), pos));
    }
    match &node.children {
        Children::Sparse(v) => {
            for (byte, child) in v {
                prefix.push(*byte);
                collect(child, prefix, out);
                prefix.pop();
            }
        }
        Children::Dense(t) => {
            for (i, slot) in t.iter().enumerate() {
                if let Some(child) = slot {
                    prefix.push(i as u8);
                    collect(child, prefix, out);
                    prefix.pop();
                }
            }
        }
    }
}
