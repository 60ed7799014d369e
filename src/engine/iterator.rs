//! User-facing iterator.
//!
//! Wraps an index snapshot cursor and adds two things the index knows
//! nothing about: an optional key-prefix filter, and value resolution —
//! `value()` follows the cursor's position into the owning data file
//! under the engine's lock.

use crate::record::RecordPos;

use super::{Engine, Result};
use crate::index::IndexIterator;

/// Configuration for [`Engine::iterator`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys carrying this prefix. Empty means no filter.
    pub prefix: Vec<u8>,

    /// Iterate in descending key order.
    pub reverse: bool,
}

/// Ordered cursor over the live keys of an engine.
///
/// The key listing is a stable snapshot taken at construction; values
/// are resolved lazily from the log on each [`EngineIterator::value`]
/// call.
pub struct EngineIterator {
    engine: Engine,
    index_iter: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl Engine {
    /// Open an iterator over the engine's live keys.
    pub fn iterator(&self, options: IteratorOptions) -> EngineIterator {
        let index_iter = self.shared.index.iterator(options.reverse);
        let mut iter = EngineIterator {
            engine: self.clone(),
            index_iter,
            options,
        };
        iter.skip_to_next();
        iter
    }
}

impl EngineIterator {
    /// Reposition at the first matching key of the snapshot.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    /// Position at the first matching key `>=` (forward) or `<=`
    /// (reverse) the target.
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next();
    }

    /// Advance to the next matching key.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    /// Whether the cursor points at an entry.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key under the cursor. Only meaningful while `valid()` holds.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Resolve the value under the cursor from its data file.
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos: RecordPos = self.index_iter.value();
        let state = self.engine.write_state()?;
        self.engine.read_value_at(&state, &pos)
    }

    /// Release the underlying snapshot. The cursor becomes invalid.
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    /// Advance until the current key carries the configured prefix.
    fn skip_to_next(&mut self) {
        let prefix = &self.options.prefix;
        if prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() {
            let key = self.index_iter.key();
            if key.len() >= prefix.len() && &key[..prefix.len()] == prefix.as_slice() {
                break;
            }
            self.index_iter.next();
        }
    }
}
