//! Data Files
//!
//! A [`DataFile`] owns one numbered append-only log file together with
//! its I/O backend and the offset at which the next record will land.
//! Exactly one data file per directory is *active* (accepting appends);
//! every other file is frozen and read-only.
//!
//! Data files are named with the zero-padded file id, e.g.
//! `000000042.data`. Three sidecar files reuse the same record codec:
//!
//! - `hint-index` — `(user_key, encoded position)` records written by
//!   compaction to accelerate the next index rebuild.
//! - `merge-finished` — single record marking a completed compaction;
//!   its value is the first file id the compaction did not cover.
//! - `seq-no` — single record persisting the last transaction sequence
//!   number, written on close.
//!
//! # Reading
//!
//! [`DataFile::read_log_record`] decodes the record starting at a byte
//! offset and returns it with its total encoded length so callers can
//! advance to the next record. `Ok(None)` signals end-of-file — either
//! the offset is at the file size or the remaining bytes are zero
//! padding. A checksum mismatch fails with
//! [`DataFileError::CorruptRecord`].

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::error;

use crate::fio::{new_io_manager, FioError, IoManager, IoType};
use crate::record::{
    decode_record_header, encode_log_record, encode_record_pos, log_record_crc, LogRecord,
    RecordPos, RecordType, MAX_HEADER_SIZE,
};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Extension of numbered log files.
pub const DATA_FILE_SUFFIX: &str = ".data";

/// Compaction-produced index accelerator.
pub const HINT_FILE_NAME: &str = "hint-index";

/// Marker sealing a completed compaction.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// Sequence-number snapshot written on close.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by data-file operations.
#[derive(Debug, Error)]
pub enum DataFileError {
    /// Error from the underlying I/O backend.
    #[error(transparent)]
    Fio(#[from] FioError),

    /// A persisted record failed checksum validation.
    #[error("record checksum mismatch")]
    CorruptRecord,
}

// ------------------------------------------------------------------------------------------------
// DataFile
// ------------------------------------------------------------------------------------------------

/// One append-only log file and its write cursor.
pub struct DataFile {
    /// Numeric id encoded into the file name.
    pub file_id: u32,

    /// Offset at which the next append lands. Equals the file size at
    /// every quiescent point.
    pub write_off: u64,

    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Open the numbered data file `file_id` inside `dir` with the
    /// requested backend.
    pub fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self, DataFileError> {
        let path = Self::data_file_path(dir, file_id);
        Self::open_at(path, file_id, io_type)
    }

    /// Open the hint sidecar inside `dir`.
    pub fn open_hint(dir: &Path) -> Result<Self, DataFileError> {
        Self::open_at(dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    /// Open the merge-finished sidecar inside `dir`.
    pub fn open_merge_finished(dir: &Path) -> Result<Self, DataFileError> {
        Self::open_at(dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::Standard)
    }

    /// Open the sequence-number sidecar inside `dir`.
    pub fn open_seq_no(dir: &Path) -> Result<Self, DataFileError> {
        Self::open_at(dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    fn open_at(path: PathBuf, file_id: u32, io_type: IoType) -> Result<Self, DataFileError> {
        let io = new_io_manager(&path, io_type)?;
        Ok(Self {
            file_id,
            write_off: 0,
            io,
        })
    }

    /// Full path of the numbered data file `file_id` inside `dir`.
    pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
        dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
    }

    /// Append raw bytes and advance the write cursor.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, DataFileError> {
        let n = self.io.write(buf)?;
        self.write_off += n as u64;
        Ok(n)
    }

    /// Append a hint record: key is the user key, value the encoded
    /// position of that key's live record.
    pub fn write_hint_record(&mut self, key: &[u8], pos: &RecordPos) -> Result<(), DataFileError> {
        let record = LogRecord {
            key: key.to_vec(),
            value: encode_record_pos(pos),
            rec_type: RecordType::Normal,
        };
        self.write(&encode_log_record(&record))?;
        Ok(())
    }

    /// Flush the backend to stable storage.
    pub fn sync(&self) -> Result<(), DataFileError> {
        self.io.sync()?;
        Ok(())
    }

    /// On-disk size as reported by the backend.
    pub fn size(&self) -> Result<u64, DataFileError> {
        Ok(self.io.size()?)
    }

    /// Decode the record starting at `offset`.
    ///
    /// Returns the record and its total encoded length, or `Ok(None)`
    /// at end-of-file.
    pub fn read_log_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>, DataFileError> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // The header window is clamped so the last record of a file can
        // still be decoded even when fewer than MAX_HEADER_SIZE bytes
        // remain.
        let header_window = (MAX_HEADER_SIZE as u64).min(file_size - offset);
        let mut header_buf = vec![0u8; header_window as usize];
        self.io.read(&mut header_buf, offset)?;

        let Some((header, header_size)) = decode_record_header(&header_buf) else {
            return Ok(None);
        };
        if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
            // Zero padding at the file tail.
            return Ok(None);
        }

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let total_size = (header_size + key_size + value_size) as u64;

        let mut payload = vec![0u8; key_size + value_size];
        if !payload.is_empty() {
            self.io.read(&mut payload, offset + header_size as u64)?;
        }
        let value = payload.split_off(key_size);
        let key = payload;

        let crc = log_record_crc(&header_buf[4..header_size], &key, &value);
        if crc != header.crc {
            error!(
                file_id = self.file_id,
                offset, "record checksum mismatch, expected {:08x} got {:08x}", header.crc, crc
            );
            return Err(DataFileError::CorruptRecord);
        }
        let rec_type = RecordType::from_u8(header.rec_type).ok_or(DataFileError::CorruptRecord)?;

        Ok(Some((
            LogRecord {
                key,
                value,
                rec_type,
            },
            total_size,
        )))
    }

    /// Swap the I/O backend, preserving the write cursor. Used to
    /// replace startup memory maps with standard I/O before writes are
    /// enabled.
    pub fn set_io_manager(&mut self, dir: &Path, io_type: IoType) -> Result<(), DataFileError> {
        let path = Self::data_file_path(dir, self.file_id);
        self.io = new_io_manager(&path, io_type)?;
        Ok(())
    }
}
