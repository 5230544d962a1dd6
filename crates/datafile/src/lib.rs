//! # datafile — append-only segment files
//!
//! A store directory holds numbered segment files (`000000042.data`), each an
//! append-only sequence of checksummed log records, plus a handful of
//! fixed-name files that reuse the same record frame:
//!
//! * `hint-index` — (logical key → encoded [`RecordPos`]) pairs written by
//!   merge so the next startup can rebuild the keydir without scanning data.
//! * `merge-finished` — marker whose record value is the first
//!   not-merged file id, in ASCII.
//! * `seq-no` — the persisted sequence counter, written on clean close when
//!   the keydir itself lives on disk.
//!
//! [`DataFile`] wraps one such file behind an [`fio::IoBackend`] and tracks
//! the write offset for the rollover decision. Reading is positional and
//! tolerant of a torn tail: a record cut off by a crash reads as a soft end
//! of file, never as corruption.

use std::io;
use std::path::{Path, PathBuf};

use fio::{IoBackend, IoKind};
use thiserror::Error;

mod record;

pub use record::{
    decode_record_pos, encode_record_pos, put_uvarint, put_varint, take_uvarint, take_varint,
    LogRecord, RecordKind, RecordPos, MAX_HEADER_SIZE,
};

/// Suffix of segment files.
pub const DATA_FILE_SUFFIX: &str = ".data";
/// Hint file produced by merge, consumed at startup.
pub const HINT_FILE_NAME: &str = "hint-index";
/// Marker written after a merge generation is complete.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
/// Persisted sequence counter (disk-resident keydir only).
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// Errors from the segment-file layer.
#[derive(Debug, Error)]
pub enum DataFileError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed checksum validation.
    #[error("invalid record crc")]
    InvalidCrc,

    /// The file contents are structurally impossible (bad kind tag,
    /// negative sizes, truncated entry encoding).
    #[error("corrupted data file: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, DataFileError>;

/// Name of the segment file with the given id, e.g. `000000017.data`.
pub fn segment_file_name(file_id: u32) -> String {
    format!("{file_id:09}{DATA_FILE_SUFFIX}")
}

/// Full path of the segment file with the given id inside `dir`.
pub fn segment_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(segment_file_name(file_id))
}

/// One append-only record file.
pub struct DataFile {
    file_id: u32,
    write_offset: u64,
    io: Box<dyn IoBackend>,
}

impl DataFile {
    /// Opens the segment `file_id` inside `dir`, creating it if absent.
    pub fn open(dir: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        Self::open_path(&segment_path(dir, file_id), file_id, kind)
    }

    /// Opens the hint file of `dir`.
    pub fn hint_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(HINT_FILE_NAME), 0, IoKind::Standard)
    }

    /// Opens the merge-finished marker file of `dir`.
    pub fn merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(MERGE_FINISHED_FILE_NAME), 0, IoKind::Standard)
    }

    /// Opens the sequence-counter file of `dir`.
    pub fn seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(SEQ_NO_FILE_NAME), 0, IoKind::Standard)
    }

    fn open_path(path: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        let io = fio::open(path, kind)?;
        let write_offset = io.size()?;
        Ok(Self {
            file_id,
            write_offset,
            io,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Offset the next append will be recorded at.
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Recovery rewinds the offset to the end of the last valid record.
    pub fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    /// Appends raw encoded bytes at the end of the file.
    pub fn append(&mut self, buf: &[u8]) -> Result<()> {
        let n = self.io.append(buf)?;
        self.write_offset += n as u64;
        Ok(())
    }

    /// Encodes and appends a hint record: the logical key with the encoded
    /// keydir entry as its value.
    pub fn write_hint_record(&mut self, key: &[u8], pos: &RecordPos) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: encode_record_pos(pos),
            kind: RecordKind::Normal,
        };
        self.append(&record.encode())
    }

    /// Flushes appended data durably to disk.
    pub fn sync(&self) -> Result<()> {
        Ok(self.io.sync()?)
    }

    /// Current physical size of the file.
    pub fn size(&self) -> Result<u64> {
        Ok(self.io.size()?)
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns `Ok(Some((record, consumed)))` on success, where `consumed`
    /// is the full on-disk length, or `Ok(None)` at end of log. End of log
    /// covers the genuine end of file, a zero-padded tail, and a record torn
    /// by a crash; a checksum mismatch on a complete record is
    /// [`DataFileError::InvalidCrc`].
    pub fn read_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // Cap the header read so a short tail cannot over-read.
        let header_len = MAX_HEADER_SIZE.min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        let n = self.io.read_at(&mut header_buf, offset)?;
        header_buf.truncate(n);

        let header = match record::decode_header(&header_buf)? {
            Some(h) => h,
            None => return Ok(None),
        };

        let payload_len = (header.key_size + header.value_size) as u64;
        let total = header.len as u64 + payload_len;
        if offset + total > file_size {
            return Ok(None); // record torn by a crash
        }

        let mut payload = vec![0u8; payload_len as usize];
        if payload_len > 0 {
            let n = self.io.read_at(&mut payload, offset + header.len as u64)?;
            if (n as u64) < payload_len {
                return Ok(None);
            }
        }

        let record = record::finish_record(header, &header_buf[4..header.len], payload)?;
        Ok(Some((record, total)))
    }

    /// Swaps the I/O backend, e.g. from a startup memory map back to
    /// standard file I/O. The write offset is preserved.
    pub fn set_io_backend(&mut self, dir: &Path, kind: IoKind) -> Result<()> {
        self.io = fio::open(&segment_path(dir, self.file_id), kind)?;
        Ok(())
    }
}
