//! Persistent B+-tree backing.
//!
//! Stores the key→position map in an on-disk B+-tree (`sled`) under the
//! engine directory, in one named tree acting as the `bitcask-index`
//! bucket. This is the only backing that is durable on its own: the
//! engine skips the hint replay and the log tail scan entirely when it
//! is selected.

use std::path::Path;

use crate::record::{decode_record_pos, encode_record_pos, RecordPos};

use super::{IndexError, IndexIterator, Indexer, SnapshotIterator};

/// Bucket holding the index entries.
pub const INDEX_BUCKET_NAME: &str = "bitcask-index";

/// Directory under the engine path holding the B+-tree store.
pub const INDEX_DIR_NAME: &str = "bptree-index";

/// Index backed by an on-disk B+-tree.
pub struct BPTreeIndex {
    db: sled::Db,
    tree: sled::Tree,
    sync_writes: bool,
}

impl BPTreeIndex {
    /// Open (or create) the store inside `dir_path`.
    pub fn open(dir_path: &Path, sync_writes: bool) -> Result<Self, IndexError> {
        let db = sled::Config::new()
            .path(dir_path.join(INDEX_DIR_NAME))
            .open()?;
        let tree = db.open_tree(INDEX_BUCKET_NAME)?;
        Ok(Self {
            db,
            tree,
            sync_writes,
        })
    }
}

impl Indexer for BPTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> bool {
        if self.tree.insert(key, encode_record_pos(&pos)).is_err() {
            return false;
        }
        if self.sync_writes && self.tree.flush().is_err() {
            return false;
        }
        true
    }

    fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.tree
            .get(key)
            .ok()
            .flatten()
            .and_then(|raw| decode_record_pos(&raw))
    }

    fn delete(&self, key: &[u8]) -> bool {
        match self.tree.remove(key) {
            Ok(previous) => {
                if self.sync_writes && self.tree.flush().is_err() {
                    return false;
                }
                previous.is_some()
            }
            Err(_) => false,
        }
    }

    fn size(&self) -> usize {
        self.tree.len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let entries = self
            .tree
            .iter()
            .filter_map(|item| {
                let (key, raw) = item.ok()?;
                Some((key.to_vec(), decode_record_pos(&raw)?))
            })
            .collect::<Vec<_>>();
        Box::new(SnapshotIterator::from_sorted(entries, reverse))
    }

    fn close(&self) -> Result<(), IndexError> {
        self.db.flush()?;
        Ok(())
    }
}
