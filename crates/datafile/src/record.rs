//! Log record wire format.
//!
//! ```text
//! +--------+------+----------+------------+--------+----------+
//! | crc32  | kind | key_size | value_size |  key   |  value   |
//! |  4 B   | 1 B  |  varint  |   varint   | bytes  |  bytes   |
//! +--------+------+----------+------------+--------+----------+
//! ```
//!
//! All fixed-width fields are little-endian. The sizes are zig-zag varints
//! (at most 5 bytes each), so the header never exceeds
//! [`MAX_HEADER_SIZE`] = 15 bytes. The CRC32 (IEEE) covers every byte after
//! the checksum field, in on-disk order.

use byteorder::{ByteOrder, LittleEndian};

use crate::{DataFileError, Result};

/// Upper bound on the encoded header: crc (4) + kind (1) + two varints (5 each).
pub const MAX_HEADER_SIZE: u64 = 15;

/// What a log record means to the keydir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A live key/value pair.
    Normal = 0,
    /// A tombstone; the key is no longer live.
    Deleted = 1,
    /// Commit marker terminating a batch.
    TxnFinished = 2,
}

impl RecordKind {
    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(RecordKind::Normal),
            1 => Ok(RecordKind::Deleted),
            2 => Ok(RecordKind::TxnFinished),
            other => Err(DataFileError::Corrupted(format!(
                "unknown record kind tag {other}"
            ))),
        }
    }
}

/// One record as it travels through the log.
///
/// The key here is the *on-disk* key: the engine prefixes every logical key
/// with a sequence-number varint before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub kind: RecordKind,
}

impl LogRecord {
    /// Serializes the record into its on-disk frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(MAX_HEADER_SIZE as usize + self.key.len() + self.value.len());
        buf.extend_from_slice(&[0u8; 4]); // crc, filled below
        buf.push(self.kind as u8);
        put_varint(&mut buf, self.key.len() as i64);
        put_varint(&mut buf, self.value.len() as i64);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[4..]);
        LittleEndian::write_u32(&mut buf[..4], hasher.finalize());
        buf
    }
}

/// Decoded record header. `len` is the number of header bytes consumed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub crc: u32,
    pub kind_tag: u8,
    pub key_size: i64,
    pub value_size: i64,
    pub len: usize,
}

/// Decodes a header from the (possibly short) bytes at a record boundary.
///
/// Returns `Ok(None)` for the two soft end-of-file shapes: a tail too short
/// to hold a header, and an all-zero header left by zero padding. A header
/// that declares a negative size is corruption, not EOF.
pub(crate) fn decode_header(buf: &[u8]) -> Result<Option<RecordHeader>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let crc = LittleEndian::read_u32(&buf[..4]);
    let kind_tag = buf[4];

    let mut pos = 5usize;
    let (key_size, n) = match take_varint(&buf[pos..]) {
        Some(v) => v,
        None => return Ok(None), // varint ran off the tail
    };
    pos += n;
    let (value_size, n) = match take_varint(&buf[pos..]) {
        Some(v) => v,
        None => return Ok(None),
    };
    pos += n;

    // A zero-padded tail decodes as an empty Normal record with crc 0.
    if crc == 0 && key_size == 0 && value_size == 0 {
        return Ok(None);
    }
    if key_size < 0 || value_size < 0 {
        return Err(DataFileError::Corrupted(format!(
            "record header declares negative sizes ({key_size}, {value_size})"
        )));
    }

    Ok(Some(RecordHeader {
        crc,
        kind_tag,
        key_size,
        value_size,
        len: pos,
    }))
}

/// Verifies the checksum over `header_rest` (header bytes after the crc
/// field) followed by `payload`, then assembles the record.
pub(crate) fn finish_record(
    header: RecordHeader,
    header_rest: &[u8],
    payload: Vec<u8>,
) -> Result<LogRecord> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_rest);
    hasher.update(&payload);
    if hasher.finalize() != header.crc {
        return Err(DataFileError::InvalidCrc);
    }

    let kind = RecordKind::from_tag(header.kind_tag)?;
    let key_size = header.key_size as usize;
    let mut key = payload;
    let value = key.split_off(key_size);
    Ok(LogRecord { key, value, kind })
}

/// Location of one encoded record: the keydir's value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPos {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

/// Encodes a [`RecordPos`] as three zig-zag varints (fid, offset, size).
/// Hint files and the B+ tree keydir store entries in this form; integrity
/// is the host file's concern, so there is no checksum.
pub fn encode_record_pos(pos: &RecordPos) -> Vec<u8> {
    let mut buf = Vec::with_capacity(15);
    put_varint(&mut buf, pos.file_id as i64);
    put_varint(&mut buf, pos.offset as i64);
    put_varint(&mut buf, pos.size as i64);
    buf
}

/// Inverse of [`encode_record_pos`].
pub fn decode_record_pos(buf: &[u8]) -> Result<RecordPos> {
    let corrupt = || DataFileError::Corrupted("truncated keydir entry".to_string());

    let (file_id, n) = take_varint(buf).ok_or_else(corrupt)?;
    let rest = &buf[n..];
    let (offset, n) = take_varint(rest).ok_or_else(corrupt)?;
    let rest = &rest[n..];
    let (size, _) = take_varint(rest).ok_or_else(corrupt)?;

    Ok(RecordPos {
        file_id: file_id as u32,
        offset: offset as u64,
        size: size as u32,
    })
}

// -------------------- varints --------------------

/// Appends `v` as an unsigned LEB128 varint, returning the encoded length.
pub fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) -> usize {
    let mut n = 0;
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
        n += 1;
    }
    buf.push(v as u8);
    n + 1
}

/// Decodes an unsigned varint from the front of `buf`.
/// Returns the value and the number of bytes consumed, or `None` if the
/// varint is truncated or overlong.
pub fn take_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut v = 0u64;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Some((v, i + 1));
        }
        shift += 7;
    }
    None
}

/// Appends `v` as a zig-zag signed varint.
pub fn put_varint(buf: &mut Vec<u8>, v: i64) -> usize {
    put_uvarint(buf, ((v as u64) << 1) ^ ((v >> 63) as u64))
}

/// Decodes a zig-zag signed varint from the front of `buf`.
pub fn take_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (u, n) = take_uvarint(buf)?;
    Some((((u >> 1) as i64) ^ -((u & 1) as i64), n))
}
