//! File I/O Backends
//!
//! This module abstracts positional file access behind the [`IoManager`]
//! trait so data files can be served by interchangeable backends:
//!
//! - [`StandardIo`] — buffered OS file I/O. Opened with create + read +
//!   append, permissions `0644`. Supports the full capability set.
//! - [`MmapIo`] — a read-only memory mapping ([`memmap2`]). Only `read`
//!   and `size` are defined; `write` and `sync` fail with
//!   [`FioError::Unsupported`]. Used exclusively to accelerate the index
//!   rebuild at startup, after which every file is reopened with
//!   [`StandardIo`].
//!
//! # Read contract
//!
//! `read` fills the whole destination buffer starting at `offset` or
//! fails. Callers clamp their read windows to the file size beforehand,
//! so a short read always indicates a truncated or corrupted file.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

/// Permission bits for newly created data files.
pub const DATA_FILE_PERM: u32 = 0o644;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by I/O backends.
#[derive(Debug, Error)]
pub enum FioError {
    /// Underlying OS I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend does not implement the requested capability.
    #[error("operation not supported by this I/O backend: {0}")]
    Unsupported(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IoManager trait
// ------------------------------------------------------------------------------------------------

/// Which backend a file should be opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Buffered standard file I/O, read + append.
    Standard,
    /// Read-only memory mapping, startup loads only.
    MemoryMap,
}

/// Uniform positional access over one file.
pub trait IoManager: Send + Sync {
    /// Fill `buf` with bytes starting at `offset`.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, FioError>;

    /// Append `buf` at the end of the file, returning the number of
    /// bytes written.
    fn write(&self, buf: &[u8]) -> Result<usize, FioError>;

    /// Flush OS buffers to stable storage.
    fn sync(&self) -> Result<(), FioError>;

    /// Current file size in bytes.
    fn size(&self) -> Result<u64, FioError>;
}

/// Open `path` with the requested backend.
pub fn new_io_manager(path: &Path, io_type: IoType) -> Result<Box<dyn IoManager>, FioError> {
    match io_type {
        IoType::Standard => Ok(Box::new(StandardIo::new(path)?)),
        IoType::MemoryMap => Ok(Box::new(MmapIo::new(path)?)),
    }
}

// ------------------------------------------------------------------------------------------------
// Standard file I/O
// ------------------------------------------------------------------------------------------------

/// Buffered standard file I/O backend.
pub struct StandardIo {
    file: File,
}

impl StandardIo {
    /// Open (or create) `path` for reading and appending.
    pub fn new(path: &Path) -> Result<Self, FioError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .mode(DATA_FILE_PERM)
            .open(path)?;
        Ok(Self { file })
    }
}

impl IoManager for StandardIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, FioError> {
        self.file.read_exact_at(buf, offset)?;
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize, FioError> {
        // `File` appends through a shared reference; the handle was
        // opened with O_APPEND so concurrent positions cannot interleave.
        let mut handle = &self.file;
        handle.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<(), FioError> {
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64, FioError> {
        Ok(self.file.metadata()?.len())
    }
}

// ------------------------------------------------------------------------------------------------
// Memory-mapped read-only I/O
// ------------------------------------------------------------------------------------------------

/// Read-only memory-mapped backend.
///
/// # Safety
///
/// Uses `unsafe { Mmap::map(...) }` but is memory-safe because the
/// mapped files are frozen for the whole lifetime of the mapping: the
/// engine only maps files during startup index rebuild and swaps every
/// file back to [`StandardIo`] before accepting writes.
pub struct MmapIo {
    /// `None` when the file is empty — zero-length mappings are rejected
    /// by the OS.
    map: Option<Mmap>,
}

impl MmapIo {
    /// Map `path` read-only, creating the file if it does not exist.
    pub fn new(path: &Path) -> Result<Self, FioError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .mode(DATA_FILE_PERM)
            .open(path)?;
        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn len(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, FioError> {
        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                FioError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read past end of mapped file",
                ))
            })?;
        if let Some(map) = self.map.as_ref() {
            buf.copy_from_slice(&map[offset as usize..end as usize]);
        }
        Ok(buf.len())
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, FioError> {
        Err(FioError::Unsupported("write on memory-mapped file"))
    }

    fn sync(&self) -> Result<(), FioError> {
        Err(FioError::Unsupported("sync on memory-mapped file"))
    }

    fn size(&self) -> Result<u64, FioError> {
        Ok(self.len())
    }
}
