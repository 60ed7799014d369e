//! Bitcask Storage Engine
//!
//! This module implements a **synchronous**, **crash-safe** key-value
//! engine of the Bitcask family: an append-only log spread over
//! numbered data files, a fully in-memory index from key to byte
//! offset, and a startup scan (optionally accelerated by a hint file)
//! that rebuilds the index from the log.
//!
//! ## Design Overview
//!
//! 1. **Active data file** — the sole file accepting appends. When an
//!    append would exceed [`Options::data_file_size`] the file is
//!    synced, frozen, and a successor with the next id is opened.
//! 2. **Frozen data files** — former active files, read-only, kept open
//!    in a map keyed by file id.
//! 3. **Index** — one of three pluggable backings (see
//!    [`crate::index`]) mapping user keys to [`RecordPos`] values.
//!
//! Writes append a record, then update the index; reads resolve the
//! index position and fetch the record from the owning file. Deletes
//! append a tombstone. Write batches tag every record of the batch with
//! a shared sequence number and seal it with a terminator record, which
//! is what recovery keys its atomicity guarantee on.
//!
//! ## Concurrency Model
//!
//! A single reader-writer lock guards the file set. Mutations and
//! reads both take the write side today: a read resolves a position to
//! a file handle and must not race a rotation swapping that handle out.
//! The index carries its own internal locking. One advisory file lock
//! per directory (`flock`) keeps other processes out.
//!
//! ## Guarantees
//!
//! - **Durability** — every append can be fsynced (`sync_write`) or
//!   batched by bytes written (`bytes_per_sync`).
//! - **Crash recovery** — on [`Engine::open`] the data files are
//!   replayed in id order; records of transactions whose terminator
//!   never made it to disk are discarded wholesale.
//! - **Compaction** — [`Engine::merge`] rewrites only live records into
//!   a sibling directory and emits a hint file; the swap happens
//!   idempotently at the next open.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Submodules
// ------------------------------------------------------------------------------------------------

pub mod iterator;
pub(crate) mod merge;
pub(crate) mod recovery;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};

use fs2::FileExt;
use thiserror::Error;
use tracing::info;

use crate::datafile::{DataFile, DataFileError, SEQ_NO_FILE_NAME};
use crate::fio::{FioError, IoType};
use crate::index::{new_indexer, IndexError, IndexType, Indexer};
use crate::record::{
    encode_log_record, key_with_seq, LogRecord, RecordPos, RecordType, NON_TXN_SEQ_NO,
};
use crate::util;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Advisory lock file guarding the directory against other processes.
pub(crate) const FILE_LOCK_NAME: &str = "flock";

/// Key of the single record in the sequence-number sidecar.
const SEQ_NO_KEY: &[u8] = b"seq.no";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Keys must be non-empty.
    #[error("the key is empty")]
    EmptyKey,

    /// No live record exists for the key.
    #[error("key not found")]
    KeyNotFound,

    /// The in-memory index rejected an update.
    #[error("failed to update the index")]
    IndexUpdateFailed,

    /// The index references a data file that is not open.
    #[error("data file not found")]
    DataFileNotFound,

    /// The directory contains files the engine cannot make sense of.
    #[error("the data directory may be corrupted")]
    DirectoryCorrupt,

    /// Another process holds the advisory lock on the directory.
    #[error("the database directory is in use by another process")]
    InUse,

    /// A merge is already running on this engine.
    #[error("merge is in progress, try again later")]
    MergeInProgress,

    /// The batch holds more staged writes than its configured maximum.
    #[error("the write batch exceeds its maximum record count")]
    BatchTooLarge,

    /// Batches cannot prove atomicity on a B+-tree-indexed directory
    /// that has never been cleanly closed.
    #[error("write batches are unavailable until this directory is closed once")]
    BatchNotAllowed,

    /// Rejected configuration.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    /// Error from a data file, including record corruption.
    #[error(transparent)]
    DataFile(#[from] DataFileError),

    /// Error from the index backing.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Error from an I/O backend.
    #[error(transparent)]
    Fio(#[from] FioError),

    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance, passed to [`Engine::open`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the data files.
    pub dir_path: PathBuf,

    /// Rotation threshold: an append that would push the active file
    /// past this size opens a new file first.
    pub data_file_size: u64,

    /// Fsync after every single write.
    pub sync_write: bool,

    /// Fsync once this many bytes have been written since the last
    /// sync. Zero disables threshold-based syncing.
    pub bytes_per_sync: u64,

    /// Which structure backs the in-memory index.
    pub index_type: IndexType,

    /// Memory-map data files while rebuilding the index at startup.
    pub mmap_at_startup: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::new(),
            data_file_size: 256 * 1024 * 1024,
            sync_write: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: true,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stat`].
#[derive(Debug)]
pub struct Stat {
    /// Number of live keys.
    pub key_num: usize,

    /// Number of open data files, the active one included.
    pub data_file_num: usize,

    /// Total bytes used by the directory on disk.
    pub disk_size: u64,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The storage engine handle.
///
/// Thread-safe — can be cloned and shared across threads; all clones
/// operate on the same underlying state.
pub struct Engine {
    pub(crate) shared: Arc<EngineShared>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub(crate) struct EngineShared {
    pub(crate) options: Options,

    /// File set and write cursor state.
    pub(crate) state: RwLock<EngineState>,

    /// Key → position map; carries its own locking.
    pub(crate) index: Box<dyn Indexer>,

    /// Transaction sequence counter; batches draw fresh values here.
    pub(crate) seq_no: AtomicU64,

    /// Re-entry guard for [`Engine::merge`].
    merging: AtomicBool,

    /// Held advisory lock; dropping the file releases it.
    file_lock: Mutex<Option<File>>,

    /// Whether the directory was created (or empty) at open.
    pub(crate) is_initial: bool,

    /// Whether a `seq-no` sidecar was found at open.
    pub(crate) seq_no_file_exists: bool,
}

pub(crate) struct EngineState {
    /// The sole data file accepting appends, lazily created on the
    /// first write.
    pub(crate) active: Option<DataFile>,

    /// Frozen data files by id.
    pub(crate) older: HashMap<u32, DataFile>,

    /// All known file ids, ascending; the last one is the active file.
    pub(crate) file_ids: Vec<u32>,

    /// Bytes appended since the last sync, for `bytes_per_sync`.
    bytes_since_sync: u64,
}

impl Engine {
    /// Open (or create) an engine rooted at `options.dir_path`.
    ///
    /// Finalizes any completed merge left by a previous run, opens every
    /// data file, and rebuilds the index — from the hint file first when
    /// one exists, then from the log tail.
    pub fn open(options: Options) -> Result<Engine> {
        check_options(&options)?;

        // 1. Create the directory if missing and detect first use.
        let dir = &options.dir_path;
        let mut is_initial = false;
        if !dir.is_dir() {
            is_initial = true;
            fs::create_dir_all(dir)?;
        } else if fs::read_dir(dir)?.next().is_none() {
            is_initial = true;
        }

        // 2. Advisory lock: one process per directory.
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.join(FILE_LOCK_NAME))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| EngineError::InUse)?;

        // 3. Fold in a completed merge before touching any data file.
        merge::load_merge_files(&options)?;

        // 4. Index backing, then the data files themselves.
        let index = new_indexer(options.index_type, &options.dir_path, options.sync_write)?;
        let mut state = EngineState {
            active: None,
            older: HashMap::new(),
            file_ids: Vec::new(),
            bytes_since_sync: 0,
        };
        recovery::load_data_files(&options, &mut state)?;

        // 5. Rebuild the index, or restore the sequence counter when
        //    the backing is durable by itself.
        let mut seq_no = NON_TXN_SEQ_NO;
        let mut seq_no_file_exists = false;
        if options.index_type != IndexType::BPTree {
            recovery::load_index_from_hint(&options, index.as_ref())?;
            seq_no = recovery::load_index_from_data_files(&options, &mut state, index.as_ref())?;
            if options.mmap_at_startup {
                recovery::reset_io_type(&options, &mut state)?;
            }
        } else {
            if let Some(restored) = recovery::load_seq_no(&options)? {
                seq_no = restored;
                seq_no_file_exists = true;
            }
            if let Some(active) = state.active.as_mut() {
                active.write_off = active.size()?;
            }
        }

        info!(
            path = %options.dir_path.display(),
            data_files = state.file_ids.len(),
            keys = index.size(),
            seq_no,
            "opened engine"
        );

        Ok(Engine {
            shared: Arc::new(EngineShared {
                options,
                state: RwLock::new(state),
                index,
                seq_no: AtomicU64::new(seq_no),
                merging: AtomicBool::new(false),
                file_lock: Mutex::new(Some(lock_file)),
                is_initial,
                seq_no_file_exists,
            }),
        })
    }

    /// Store `value` under `key`. The key must be non-empty.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let record = LogRecord {
            key: key_with_seq(key, NON_TXN_SEQ_NO),
            value: value.to_vec(),
            rec_type: RecordType::Normal,
        };
        let pos = self.append_log_record_with_lock(&record)?;
        if !self.shared.index.put(key.to_vec(), pos) {
            return Err(EngineError::IndexUpdateFailed);
        }
        Ok(())
    }

    /// Remove `key`. Deleting a key that does not exist succeeds
    /// silently.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        if self.shared.index.get(key).is_none() {
            return Ok(());
        }
        let record = LogRecord {
            key: key_with_seq(key, NON_TXN_SEQ_NO),
            value: Vec::new(),
            rec_type: RecordType::Deleted,
        };
        self.append_log_record_with_lock(&record)?;
        if !self.shared.index.delete(key) {
            return Err(EngineError::IndexUpdateFailed);
        }
        Ok(())
    }

    /// Fetch the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let pos = self.shared.index.get(key).ok_or(EngineError::KeyNotFound)?;
        // The write side of the lock: position resolution must not race
        // a rotation swapping file handles underneath it.
        let state = self.write_state()?;
        self.read_value_at(&state, &pos)
    }

    /// All live keys, in ascending order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.shared.index.iterator(false);
        let mut keys = Vec::with_capacity(self.shared.index.size());
        iter.rewind();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    /// Visit every live key-value pair in ascending key order until `f`
    /// returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], Vec<u8>) -> bool,
    {
        let state = self.write_state()?;
        let mut iter = self.shared.index.iterator(false);
        iter.rewind();
        while iter.valid() {
            let value = self.read_value_at(&state, &iter.value())?;
            if !f(iter.key(), value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Fsync the active data file.
    pub fn sync(&self) -> Result<()> {
        let state = self.write_state()?;
        if let Some(active) = state.active.as_ref() {
            active.sync()?;
        }
        Ok(())
    }

    /// Statistics snapshot: live keys, data files, disk usage.
    pub fn stat(&self) -> Result<Stat> {
        let state = self
            .shared
            .state
            .read()
            .map_err(|_| EngineError::Internal("state lock poisoned".into()))?;
        let data_file_num = state.older.len() + usize::from(state.active.is_some());
        Ok(Stat {
            key_num: self.shared.index.size(),
            data_file_num,
            disk_size: util::dir_size(&self.shared.options.dir_path)?,
        })
    }

    /// Gracefully shut the engine down.
    ///
    /// Persists the transaction sequence number, closes the index
    /// backing, syncs the active file, and releases the advisory lock.
    pub fn close(&self) -> Result<()> {
        let mut state = self.write_state()?;

        // 1. Persist the sequence counter for the next open. The
        //    sidecar is append-only, so a leftover from an earlier
        //    close must go first.
        let seq_no_path = self.shared.options.dir_path.join(SEQ_NO_FILE_NAME);
        if seq_no_path.is_file() {
            fs::remove_file(&seq_no_path)?;
        }
        let mut seq_no_file = DataFile::open_seq_no(&self.shared.options.dir_path)?;
        let record = LogRecord {
            key: SEQ_NO_KEY.to_vec(),
            value: self
                .shared
                .seq_no
                .load(Ordering::SeqCst)
                .to_string()
                .into_bytes(),
            rec_type: RecordType::Normal,
        };
        seq_no_file.write(&encode_log_record(&record))?;
        seq_no_file.sync()?;

        // 2. Close the index backing (flushes the persistent one).
        self.shared.index.close()?;

        // 3. Sync the writer tail and drop every file handle.
        if let Some(active) = state.active.as_ref() {
            active.sync()?;
        }
        state.active = None;
        state.older.clear();
        state.file_ids.clear();
        drop(state);

        // 4. Release the advisory lock so the directory can be reopened.
        let mut lock = self
            .shared
            .file_lock
            .lock()
            .map_err(|_| EngineError::Internal("file lock mutex poisoned".into()))?;
        *lock = None;

        info!(path = %self.shared.options.dir_path.display(), "closed engine");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Append path
    // --------------------------------------------------------------------------------------------

    pub(crate) fn append_log_record_with_lock(&self, record: &LogRecord) -> Result<RecordPos> {
        let mut state = self.write_state()?;
        self.append_log_record(&mut state, record)
    }

    /// Append one encoded record to the active file, rotating first when
    /// the record would not fit. Returns the position the record starts
    /// at.
    pub(crate) fn append_log_record(
        &self,
        state: &mut EngineState,
        record: &LogRecord,
    ) -> Result<RecordPos> {
        let options = &self.shared.options;

        // The first write of a fresh directory creates file 0.
        if state.active.is_none() {
            let file = DataFile::open(&options.dir_path, 0, IoType::Standard)?;
            state.file_ids.push(0);
            state.active = Some(file);
        }

        let encoded = encode_log_record(record);
        let record_len = encoded.len() as u64;

        let needs_rotation = match state.active.as_ref() {
            Some(active) => active.write_off + record_len > options.data_file_size,
            None => false,
        };
        if needs_rotation {
            self.rotate_active_file(state)?;
        }

        let active = state
            .active
            .as_mut()
            .ok_or_else(|| EngineError::Internal("no active data file".into()))?;
        let write_off = active.write_off;
        let file_id = active.file_id;
        active.write(&encoded)?;

        state.bytes_since_sync += record_len;
        let need_sync = options.sync_write
            || (options.bytes_per_sync > 0 && state.bytes_since_sync >= options.bytes_per_sync);
        if need_sync {
            if let Some(active) = state.active.as_ref() {
                active.sync()?;
            }
            state.bytes_since_sync = 0;
        }

        Ok(RecordPos {
            file_id,
            offset: write_off,
        })
    }

    /// Sync and freeze the active file, then open its successor.
    pub(crate) fn rotate_active_file(&self, state: &mut EngineState) -> Result<()> {
        let Some(full) = state.active.take() else {
            return Ok(());
        };
        full.sync()?;
        let next_id = full.file_id + 1;
        state.older.insert(full.file_id, full);
        let file = DataFile::open(&self.shared.options.dir_path, next_id, IoType::Standard)?;
        info!(file_id = next_id, "rotated active data file");
        state.file_ids.push(next_id);
        state.active = Some(file);
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Read path
    // --------------------------------------------------------------------------------------------

    /// Resolve a position to its record value. The caller holds the
    /// state lock.
    pub(crate) fn read_value_at(&self, state: &EngineState, pos: &RecordPos) -> Result<Vec<u8>> {
        let file = match state.active.as_ref() {
            Some(active) if active.file_id == pos.file_id => active,
            _ => state
                .older
                .get(&pos.file_id)
                .ok_or(EngineError::DataFileNotFound)?,
        };
        let (record, _) = file
            .read_log_record(pos.offset)?
            .ok_or(DataFileError::CorruptRecord)?;
        if record.rec_type == RecordType::Deleted {
            return Err(EngineError::KeyNotFound);
        }
        Ok(record.value)
    }

    pub(crate) fn write_state(&self) -> Result<RwLockWriteGuard<'_, EngineState>> {
        self.shared
            .state
            .write()
            .map_err(|_| EngineError::Internal("state lock poisoned".into()))
    }

    /// Flip the merge guard on. Fails when a merge is already running.
    pub(crate) fn begin_merge(&self) -> Result<MergeGuard<'_>> {
        if self
            .shared
            .merging
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::MergeInProgress);
        }
        Ok(MergeGuard {
            flag: &self.shared.merging,
        })
    }
}

/// Clears the merge-in-progress flag on every exit path.
pub(crate) struct MergeGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(EngineError::InvalidOptions("dir_path must not be empty"));
    }
    if options.data_file_size == 0 {
        return Err(EngineError::InvalidOptions(
            "data_file_size must be greater than zero",
        ));
    }
    Ok(())
}

pub use iterator::{EngineIterator, IteratorOptions};
