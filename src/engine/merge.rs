//! Compaction.
//!
//! A merge rewrites only the live records of the frozen file set into a
//! sibling directory (`<dir>-merge`), discarding stale versions,
//! tombstones, and transaction metadata. Alongside the compacted log it
//! emits a hint file of `(user key, position)` records and finally a
//! `merge-finished` marker whose value is the first file id the merge
//! did not touch.
//!
//! The merge is crash-safe. Until the marker exists the sibling
//! directory is ignored and deleted wholesale at the next open; once it
//! exists the swap — delete primary files below the marker id, rename
//! the merged files in — is idempotent.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::datafile::{DataFile, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME};
use crate::fio::IoType;
use crate::index::IndexType;
use crate::record::{
    encode_log_record, key_with_seq, parse_record_key, LogRecord, RecordType, NON_TXN_SEQ_NO,
};

use super::{Engine, EngineError, Options, Result, FILE_LOCK_NAME};

/// Suffix of the sibling directory compaction writes into.
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the single record inside the merge-finished marker.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

impl Engine {
    /// Compact the frozen file set.
    ///
    /// The active file is rotated first so the writer's tail is never
    /// touched; new writes proceed concurrently and are preserved
    /// automatically. Fails with [`EngineError::MergeInProgress`] when
    /// another merge is running.
    pub fn merge(&self) -> Result<()> {
        let _merge_guard = self.begin_merge()?;

        // Phase 1, under the engine lock: seal the writer tail and
        // snapshot the frozen set.
        let (snapshot_ids, non_merge_file_id) = {
            let mut state = self.write_state()?;
            if state.active.is_none() {
                // Nothing was ever written.
                return Ok(());
            }
            self.rotate_active_file(&mut state)?;
            let non_merge_file_id = state
                .active
                .as_ref()
                .map(|f| f.file_id)
                .ok_or_else(|| EngineError::Internal("no active file after rotation".into()))?;
            let mut ids: Vec<u32> = state.older.keys().copied().collect();
            ids.sort_unstable();
            (ids, non_merge_file_id)
        };

        // Phase 2, lock-free: rewrite live records into the sibling
        // directory through a scratch engine.
        let merge_dir = merge_path(&self.shared.options.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        let mut merge_options = self.shared.options.clone();
        merge_options.dir_path = merge_dir.clone();
        merge_options.sync_write = false;
        // The scratch engine only ever appends; its index is discarded.
        merge_options.index_type = IndexType::BTree;
        let merge_engine = Engine::open(merge_options)?;
        let mut hint_file = DataFile::open_hint(&merge_dir)?;

        let mut rewritten = 0usize;
        for file_id in &snapshot_ids {
            // Fresh read-only handles; frozen files never change.
            let file = DataFile::open(&self.shared.options.dir_path, *file_id, IoType::Standard)?;
            let mut offset = 0u64;
            while let Some((record, size)) = file.read_log_record(offset)? {
                let (user_key, _) = parse_record_key(&record.key);
                // A record is live iff the index still points at it.
                let live = self
                    .shared
                    .index
                    .get(&user_key)
                    .is_some_and(|pos| pos.file_id == *file_id && pos.offset == offset);
                if live {
                    // Transaction metadata is dropped on rewrite: being
                    // live already proves the record committed.
                    let rewrite = LogRecord {
                        key: key_with_seq(&user_key, NON_TXN_SEQ_NO),
                        value: record.value,
                        rec_type: record.rec_type,
                    };
                    let new_pos = merge_engine.append_log_record_with_lock(&rewrite)?;
                    hint_file.write_hint_record(&user_key, &new_pos)?;
                    rewritten += 1;
                }
                offset += size;
            }
        }

        hint_file.sync()?;
        merge_engine.sync()?;

        // Phase 3: seal the merge. Everything before this marker is
        // disposable; everything after it is idempotent.
        let mut finished_file = DataFile::open_merge_finished(&merge_dir)?;
        let marker = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            rec_type: RecordType::Normal,
        };
        finished_file.write(&encode_log_record(&marker))?;
        finished_file.sync()?;

        info!(
            files = snapshot_ids.len(),
            rewritten, non_merge_file_id, "merge finished"
        );
        Ok(())
    }
}

/// Sibling directory the merge writes into: `<dir>-merge`.
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(MERGE_DIR_SUFFIX);
    match dir.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Fold a completed merge into the primary directory at open.
///
/// An unfinished merge directory (no marker) is deleted unmoved. A
/// finished one replaces every primary data file below the marker id,
/// and its files — data, hint, marker — are renamed in. The merge
/// directory is removed unconditionally afterwards.
pub(crate) fn load_merge_files(options: &Options) -> Result<()> {
    let merge_dir = merge_path(&options.dir_path);
    if !merge_dir.is_dir() {
        return Ok(());
    }

    let result = swap_merge_files(options, &merge_dir);
    fs::remove_dir_all(&merge_dir)?;
    result
}

fn swap_merge_files(options: &Options, merge_dir: &Path) -> Result<()> {
    let mut names = Vec::new();
    let mut finished = false;
    for entry in fs::read_dir(merge_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name == MERGE_FINISHED_FILE_NAME {
                finished = true;
            }
            names.push(name.to_string());
        }
    }
    if !finished {
        warn!(path = %merge_dir.display(), "discarding unfinished merge directory");
        return Ok(());
    }

    let non_merge_file_id = non_merge_file_id(merge_dir)?;

    // Everything the merge covered is superseded by the merged files.
    for file_id in 0..non_merge_file_id {
        let path = DataFile::data_file_path(&options.dir_path, file_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }

    for name in names {
        // The scratch engine's own lock and sequence sidecar stay
        // behind; so does anything that is not a plain file.
        if name == SEQ_NO_FILE_NAME || name == FILE_LOCK_NAME {
            continue;
        }
        let source = merge_dir.join(&name);
        if !source.is_file() {
            continue;
        }
        fs::rename(source, options.dir_path.join(&name))?;
    }

    info!(non_merge_file_id, "folded merged files into data directory");
    Ok(())
}

/// Read the first non-merged file id out of the marker inside `dir`.
pub(crate) fn non_merge_file_id(dir: &Path) -> Result<u32> {
    let finished_file = DataFile::open_merge_finished(dir)?;
    let (record, _) = finished_file
        .read_log_record(0)?
        .ok_or(EngineError::DirectoryCorrupt)?;
    std::str::from_utf8(&record.value)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or(EngineError::DirectoryCorrupt)
}
