//! Atomic Write Batches
//!
//! A [`WriteBatch`] buffers pending writes keyed by user key and makes
//! them durable in one shot. On commit, every staged record is appended
//! to the log tagged with a freshly drawn transaction sequence number,
//! followed by a terminator record sharing that number. Only then is
//! the index updated.
//!
//! The terminator is the atomicity mechanism: recovery refuses to apply
//! any record of a sequence number it never saw a terminator for, so a
//! batch torn by a crash is invisible in its entirety after restart.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use tracing::trace;

use crate::engine::{Engine, EngineError, Result};
use crate::index::IndexType;
use crate::record::{key_with_seq, LogRecord, RecordPos, RecordType};

/// Key carried by every transaction terminator record.
pub(crate) const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// Configuration for a [`WriteBatch`].
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Upper bound on the number of staged records per batch.
    pub max_batch_num: usize,

    /// Fsync the active file once the terminator is written.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}

/// A buffered set of writes committed atomically.
pub struct WriteBatch {
    options: WriteBatchOptions,
    engine: Engine,

    /// Staged records by user key; later stages replace earlier ones.
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Engine {
    /// Create a new write batch on this engine.
    ///
    /// A directory indexed by the persistent B+-tree backing cannot
    /// prove batch atomicity before its first clean close; in that
    /// state this returns [`EngineError::BatchNotAllowed`].
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch> {
        if self.shared.options.index_type == IndexType::BPTree
            && !self.shared.seq_no_file_exists
            && !self.shared.is_initial
        {
            return Err(EngineError::BatchNotAllowed);
        }
        Ok(WriteBatch {
            options,
            engine: self.clone(),
            pending: Mutex::new(HashMap::new()),
        })
    }
}

impl WriteBatch {
    /// Stage a write of `value` under `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let mut pending = self.lock_pending()?;
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                rec_type: RecordType::Normal,
            },
        );
        Ok(())
    }

    /// Stage a deletion of `key`.
    ///
    /// Deleting a key that neither exists in the engine nor in the
    /// batch is a no-op; deleting a key only staged in this batch just
    /// unstages it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let mut pending = self.lock_pending()?;
        if self.engine.shared.index.get(key).is_none() {
            pending.remove(key);
            return Ok(());
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                rec_type: RecordType::Deleted,
            },
        );
        Ok(())
    }

    /// Persist every staged write atomically and apply it to the index.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.lock_pending()?;
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(EngineError::BatchTooLarge);
        }

        // Everything below happens under the engine's write lock: the
        // appends, the terminator, and the index application are one
        // critical section for concurrent readers.
        let mut state = self.engine.write_state()?;
        let seq_no = self.engine.shared.seq_no.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(seq_no, records = pending.len(), "committing write batch");

        let mut positions: HashMap<Vec<u8>, RecordPos> = HashMap::with_capacity(pending.len());
        for (user_key, record) in pending.iter() {
            let tagged = LogRecord {
                key: key_with_seq(user_key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = self.engine.append_log_record(&mut state, &tagged)?;
            positions.insert(user_key.clone(), pos);
        }

        // The terminator seals the batch; recovery discards every
        // record of a sequence number without one.
        let terminator = LogRecord {
            key: key_with_seq(TXN_FIN_KEY, seq_no),
            value: Vec::new(),
            rec_type: RecordType::TxnFinished,
        };
        self.engine.append_log_record(&mut state, &terminator)?;

        if self.options.sync_writes {
            if let Some(active) = state.active.as_ref() {
                active.sync()?;
            }
        }

        for (user_key, record) in pending.iter() {
            match record.rec_type {
                RecordType::Normal => {
                    let Some(pos) = positions.get(user_key) else {
                        return Err(EngineError::Internal(
                            "missing position for committed record".into(),
                        ));
                    };
                    if !self.engine.shared.index.put(user_key.clone(), *pos) {
                        return Err(EngineError::IndexUpdateFailed);
                    }
                }
                RecordType::Deleted => {
                    self.engine.shared.index.delete(user_key);
                }
                RecordType::TxnFinished => {}
            }
        }
        drop(state);

        pending.clear();
        Ok(())
    }

    fn lock_pending(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Vec<u8>, LogRecord>>> {
        self.pending
            .lock()
            .map_err(|_| EngineError::Internal("batch mutex poisoned".into()))
    }
}
