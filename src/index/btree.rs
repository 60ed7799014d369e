//! Ordered balanced tree backing, the default index.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::record::RecordPos;

use super::{IndexError, IndexIterator, Indexer, SnapshotIterator};

/// Index backed by `std::collections::BTreeMap` under a reader-writer
/// lock. Keys compare lexicographically on their raw bytes.
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> bool {
        match self.tree.write() {
            Ok(mut tree) => {
                tree.insert(key, pos);
                true
            }
            Err(_) => false,
        }
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.tree.read().ok()?.get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> bool {
        match self.tree.write() {
            Ok(mut tree) => tree.remove(key).is_some(),
            Err(_) => false,
        }
    }

    fn size(&self) -> usize {
        self.tree.read().map(|tree| tree.len()).unwrap_or(0)
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let entries = self
            .tree
            .read()
            .map(|tree| {
                tree.iter()
                    .map(|(k, pos)| (k.clone(), *pos))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Box::new(SnapshotIterator::from_sorted(entries, reverse))
    }

    fn close(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
