//! Log Record Codec
//!
//! Hand-written, byte-stable wire format for everything the engine
//! persists. Because the crate owns this format, the on-disk
//! representation never changes due to a dependency upgrade.
//!
//! # Wire format
//!
//! A log record is laid out as:
//!
//! ```text
//! | crc32 (4, LE) | type (1) | varint key_len | varint val_len | key | value |
//! ```
//!
//! - `crc32` covers every byte after the checksum itself, including the
//!   varint header fields.
//! - `type` is one of [`RecordType`].
//! - lengths are unsigned LEB128 varints, at most 5 bytes each for the
//!   `u32`-sized lengths.
//!
//! A position descriptor is `varint(file_id) | varint(offset)`.
//!
//! Every key written to a data file carries an embedded transaction
//! sequence number prefix: `varint(seq_no) | user_key`. Sequence `0`
//! ([`NON_TXN_SEQ_NO`]) marks a non-transactional write.
//!
//! # End-of-file convention
//!
//! Data files may carry zero padding at their tail. A decoded header
//! whose checksum and both lengths are all zero is treated as
//! end-of-file by the read path, not as a record.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crc32fast::Hasher as Crc32;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Longest LEB128 encoding of a `u32` value.
pub const MAX_VARINT32_LEN: usize = 5;

/// Longest LEB128 encoding of a `u64` value.
pub const MAX_VARINT64_LEN: usize = 10;

/// Upper bound of an encoded record header:
/// crc (4) + type (1) + two varint lengths.
pub const MAX_HEADER_SIZE: usize = 4 + 1 + 2 * MAX_VARINT32_LEN;

/// Sequence number of writes that are not part of a batch.
pub const NON_TXN_SEQ_NO: u64 = 0;

// ------------------------------------------------------------------------------------------------
// Record structures
// ------------------------------------------------------------------------------------------------

/// Discriminates what a log record means to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key/value pair.
    Normal = 0,

    /// A tombstone; the value is empty.
    Deleted = 1,

    /// Transaction terminator; seals every record sharing its sequence
    /// number.
    TxnFinished = 2,
}

impl RecordType {
    pub(crate) fn from_u8(raw: u8) -> Option<RecordType> {
        match raw {
            0 => Some(RecordType::Normal),
            1 => Some(RecordType::Deleted),
            2 => Some(RecordType::TxnFinished),
            _ => None,
        }
    }
}

/// One record of the append-only log.
///
/// The name refers to the file format: data files are written strictly
/// append-only, like a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: RecordType,
}

/// Decoded header of a persisted record. The type byte stays raw here;
/// it is validated after the checksum passed.
#[derive(Debug)]
pub(crate) struct RecordHeader {
    pub crc: u32,
    pub rec_type: u8,
    pub key_size: u32,
    pub value_size: u32,
}

/// Where a record starts on disk. The value type of every index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPos {
    /// Id of the data file holding the record.
    pub file_id: u32,

    /// Byte offset of the record's first header byte.
    pub offset: u64,
}

// ------------------------------------------------------------------------------------------------
// Varint codec
// ------------------------------------------------------------------------------------------------

/// Append the LEB128 encoding of `v` to `buf`.
pub fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decode one LEB128 varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` when
/// `buf` is empty, truncated mid-varint, or the encoding overflows 64
/// bits.
pub fn uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for (i, byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7f)
            .checked_shl(shift)
            .filter(|_| shift < 63 || byte & 0x7f <= 1)?;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

// ------------------------------------------------------------------------------------------------
// Record codec
// ------------------------------------------------------------------------------------------------

/// Encode `record` into its on-disk byte sequence.
pub fn encode_log_record(record: &LogRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + record.key.len() + record.value.len());
    // Checksum slot, patched once the payload is in place.
    buf.extend_from_slice(&[0u8; 4]);
    buf.push(record.rec_type as u8);
    put_uvarint(&mut buf, record.key.len() as u64);
    put_uvarint(&mut buf, record.value.len() as u64);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let mut hasher = Crc32::new();
    hasher.update(&buf[4..]);
    let crc = hasher.finalize();
    buf[..4].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Decode a record header from the front of `buf`.
///
/// Returns the header and its encoded length, or `None` when fewer than
/// five bytes remain — which the read path treats as end-of-file. A
/// length varint that runs off the end of a zero-padded tail decodes as
/// zero so the all-zero EOF convention holds.
pub(crate) fn decode_record_header(buf: &[u8]) -> Option<(RecordHeader, usize)> {
    if buf.len() <= 4 {
        return None;
    }
    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let rec_type = buf[4];
    let mut index = 5;
    let key_size = take_length(buf, &mut index);
    let value_size = take_length(buf, &mut index);
    Some((
        RecordHeader {
            crc,
            rec_type,
            key_size,
            value_size,
        },
        index,
    ))
}

fn take_length(buf: &[u8], index: &mut usize) -> u32 {
    match uvarint(&buf[*index..]) {
        Some((v, n)) => {
            *index += n;
            v as u32
        }
        None => 0,
    }
}

/// Checksum of an encoded record, computed over everything after the
/// CRC field.
pub(crate) fn log_record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

// ------------------------------------------------------------------------------------------------
// Position codec
// ------------------------------------------------------------------------------------------------

/// Encode a [`RecordPos`] as two varints. Used for hint-file values and
/// the persistent index backing.
pub fn encode_record_pos(pos: &RecordPos) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT32_LEN + MAX_VARINT64_LEN);
    put_uvarint(&mut buf, u64::from(pos.file_id));
    put_uvarint(&mut buf, pos.offset);
    buf
}

/// Decode a [`RecordPos`] from the front of `buf`.
pub fn decode_record_pos(buf: &[u8]) -> Option<RecordPos> {
    let (file_id, n) = uvarint(buf)?;
    let (offset, _) = uvarint(&buf[n..])?;
    Some(RecordPos {
        file_id: file_id as u32,
        offset,
    })
}

// ------------------------------------------------------------------------------------------------
// Embedded sequence numbers
// ------------------------------------------------------------------------------------------------

/// Prefix `key` with the varint encoding of `seq_no`, producing the key
/// that actually lands on disk.
pub(crate) fn key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT64_LEN + key.len());
    put_uvarint(&mut buf, seq_no);
    buf.extend_from_slice(key);
    buf
}

/// Split an on-disk key into the user key and its embedded sequence
/// number.
pub(crate) fn parse_record_key(key: &[u8]) -> (Vec<u8>, u64) {
    match uvarint(key) {
        Some((seq_no, n)) => (key[n..].to_vec(), seq_no),
        None => (key.to_vec(), NON_TXN_SEQ_NO),
    }
}
