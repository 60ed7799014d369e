//! Index rebuild on open.
//!
//! Data files are enumerated and replayed in ascending id order. When a
//! hint file exists (produced by a completed merge), it is replayed
//! first and the log scan starts at the first file id the merge did not
//! cover.
//!
//! Records carrying a transaction sequence number are not applied
//! immediately: they are staged per sequence and only flushed to the
//! index when the matching terminator record is observed. Transactions
//! whose terminator never appears are discarded at end-of-scan — their
//! records stay invisible, which is exactly the batch atomicity
//! guarantee.

use std::collections::HashMap;
use std::fs;

use tracing::{info, warn};

use crate::datafile::{
    DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::fio::IoType;
use crate::index::Indexer;
use crate::record::{decode_record_pos, parse_record_key, RecordPos, RecordType, NON_TXN_SEQ_NO};

use super::{merge, EngineError, EngineState, Options, Result};

/// A staged record of a not-yet-terminated transaction.
struct TxnRecord {
    key: Vec<u8>,
    rec_type: RecordType,
    pos: RecordPos,
}

/// Enumerate `*.data` files, sort their ids, and open each one — the
/// largest id becomes the active file, the rest go to the frozen map.
pub(crate) fn load_data_files(options: &Options, state: &mut EngineState) -> Result<()> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(&options.dir_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) else {
            continue;
        };
        let file_id: u32 = stem.parse().map_err(|_| EngineError::DirectoryCorrupt)?;
        file_ids.push(file_id);
    }
    file_ids.sort_unstable();

    let io_type = if options.mmap_at_startup {
        IoType::MemoryMap
    } else {
        IoType::Standard
    };
    for (i, file_id) in file_ids.iter().enumerate() {
        let file = DataFile::open(&options.dir_path, *file_id, io_type)?;
        if i == file_ids.len() - 1 {
            state.active = Some(file);
        } else {
            state.older.insert(*file_id, file);
        }
    }
    state.file_ids = file_ids;
    Ok(())
}

/// Replay the hint file into the index, if one exists. Hint records map
/// a user key to an encoded position.
pub(crate) fn load_index_from_hint(options: &Options, index: &dyn Indexer) -> Result<()> {
    if !options.dir_path.join(HINT_FILE_NAME).is_file() {
        return Ok(());
    }
    let hint_file = DataFile::open_hint(&options.dir_path)?;
    let mut offset = 0u64;
    let mut loaded = 0usize;
    while let Some((record, size)) = hint_file.read_log_record(offset)? {
        let pos = decode_record_pos(&record.value).ok_or(EngineError::DirectoryCorrupt)?;
        if !index.put(record.key, pos) {
            return Err(EngineError::IndexUpdateFailed);
        }
        loaded += 1;
        offset += size;
    }
    info!(records = loaded, "replayed hint file");
    Ok(())
}

/// Tail-scan the data files into the index, starting at the first file
/// the last merge did not cover. Returns the largest transaction
/// sequence number observed.
pub(crate) fn load_index_from_data_files(
    options: &Options,
    state: &mut EngineState,
    index: &dyn Indexer,
) -> Result<u64> {
    if state.file_ids.is_empty() {
        return Ok(NON_TXN_SEQ_NO);
    }

    // Files below the merge marker were already covered by the hint
    // replay.
    let mut non_merge_file_id = 0u32;
    let has_merge = options.dir_path.join(MERGE_FINISHED_FILE_NAME).is_file();
    if has_merge {
        non_merge_file_id = merge::non_merge_file_id(&options.dir_path)?;
    }

    let mut staged: HashMap<u64, Vec<TxnRecord>> = HashMap::new();
    let mut current_seq_no = NON_TXN_SEQ_NO;
    let file_ids = state.file_ids.clone();

    for (i, file_id) in file_ids.iter().enumerate() {
        if has_merge && *file_id < non_merge_file_id {
            continue;
        }
        let is_last = i == file_ids.len() - 1;
        let file = if is_last {
            state
                .active
                .as_ref()
                .ok_or_else(|| EngineError::Internal("active data file missing".into()))?
        } else {
            state
                .older
                .get(file_id)
                .ok_or(EngineError::DataFileNotFound)?
        };

        let mut offset = 0u64;
        while let Some((record, size)) = file.read_log_record(offset)? {
            let pos = RecordPos {
                file_id: *file_id,
                offset,
            };
            let (user_key, seq_no) = parse_record_key(&record.key);

            if seq_no == NON_TXN_SEQ_NO {
                // Non-transactional writes are complete by definition.
                apply_to_index(index, user_key, record.rec_type, pos)?;
            } else if record.rec_type == RecordType::TxnFinished {
                // The terminator seals the whole transaction: flush its
                // staged records in observed order.
                if let Some(records) = staged.remove(&seq_no) {
                    for txn in records {
                        apply_to_index(index, txn.key, txn.rec_type, txn.pos)?;
                    }
                }
            } else {
                staged.entry(seq_no).or_default().push(TxnRecord {
                    key: user_key,
                    rec_type: record.rec_type,
                    pos,
                });
            }

            if seq_no > current_seq_no {
                current_seq_no = seq_no;
            }
            offset += size;
        }

        if is_last {
            if let Some(active) = state.active.as_mut() {
                active.write_off = offset;
            }
        }
    }

    if !staged.is_empty() {
        // Transactions without a terminator were torn by a crash; their
        // records never reach the index.
        warn!(
            transactions = staged.len(),
            "discarded records of unfinished transactions"
        );
    }
    Ok(current_seq_no)
}

fn apply_to_index(
    index: &dyn Indexer,
    key: Vec<u8>,
    rec_type: RecordType,
    pos: RecordPos,
) -> Result<()> {
    match rec_type {
        RecordType::Deleted => {
            // A tombstone for an already-absent key leaves the index in
            // the desired state.
            index.delete(&key);
        }
        _ => {
            if !index.put(key, pos) {
                return Err(EngineError::IndexUpdateFailed);
            }
        }
    }
    Ok(())
}

/// Restore the sequence counter persisted by the last clean close,
/// removing the sidecar afterwards. `None` when no sidecar exists.
pub(crate) fn load_seq_no(options: &Options) -> Result<Option<u64>> {
    let path = options.dir_path.join(SEQ_NO_FILE_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let seq_no_file = DataFile::open_seq_no(&options.dir_path)?;
    let (record, _) = seq_no_file
        .read_log_record(0)?
        .ok_or(EngineError::DirectoryCorrupt)?;
    let seq_no = std::str::from_utf8(&record.value)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(EngineError::DirectoryCorrupt)?;
    fs::remove_file(path)?;
    Ok(Some(seq_no))
}

/// Swap every data file back to standard I/O once the startup memory
/// maps have served their purpose.
pub(crate) fn reset_io_type(options: &Options, state: &mut EngineState) -> Result<()> {
    if let Some(active) = state.active.as_mut() {
        active.set_io_manager(&options.dir_path, IoType::Standard)?;
    }
    for file in state.older.values_mut() {
        file.set_io_manager(&options.dir_path, IoType::Standard)?;
    }
    Ok(())
}
