//! # fio — byte-level file I/O capability
//!
//! The narrow seam between the storage engine and the operating system.
//! A segment file is driven through the [`IoBackend`] trait: positional
//! reads, appends at the tail, durable sync, and size queries. Two
//! implementations exist:
//!
//! * [`FileIo`] — standard file I/O. The file is opened in append mode, so
//!   writes always land at the current end regardless of any read position.
//! * [`MmapIo`] — a read-only memory mapping, used to speed up the
//!   sequential scans at startup. Writing through it is an error.
//!
//! Which one backs a file is chosen with [`IoKind`] at open time and can be
//! swapped later (the engine maps segments for recovery, then reopens them
//! with standard I/O for normal operation).

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::Mmap;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// Byte-level access to one named file.
///
/// Implementations must be safe to share across threads: `read_at` takes
/// `&self` so concurrent readers never serialize on a seek position.
pub trait IoBackend: Send + Sync {
    /// Reads into `buf` starting at absolute `offset`, returning the number
    /// of bytes read. A return shorter than `buf.len()` means end of file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Appends `buf` at the current end of the file.
    fn append(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Flushes written data durably to stable storage.
    fn sync(&self) -> io::Result<()>;

    /// Current size of the file in bytes.
    fn size(&self) -> io::Result<u64>;
}

/// Selects the [`IoBackend`] implementation when opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    /// Buffered read/append through the OS file interface.
    Standard,
    /// Read-only memory mapping; appends are rejected.
    Mmap,
}

/// Opens `path` with the backend selected by `kind`, creating the file if it
/// does not exist.
pub fn open(path: &Path, kind: IoKind) -> io::Result<Box<dyn IoBackend>> {
    Ok(match kind {
        IoKind::Standard => Box::new(FileIo::open(path)?),
        IoKind::Mmap => Box::new(MmapIo::open(path)?),
    })
}

/// Standard file I/O backend.
pub struct FileIo {
    file: File,
}

impl FileIo {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl IoBackend for FileIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut read = 0usize;
        while read < buf.len() {
            #[cfg(unix)]
            let n = match self.file.read_at(&mut buf[read..], offset + read as u64) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            #[cfg(windows)]
            let n = self.file.seek_read(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break; // end of file
            }
            read += n;
        }
        Ok(read)
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Read-only memory-mapped backend.
///
/// An empty file yields an empty view instead of an OS mapping error, so a
/// freshly created segment can still be opened through this backend.
pub struct MmapIo {
    map: Option<Mmap>,
}

impl MmapIo {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // Safety: segments read through this backend are immutable for
            // the lifetime of the mapping (recovery scans finished segments
            // and the pre-recovery tail of the active one).
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl IoBackend for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.as_slice();
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let end = (start + buf.len()).min(data.len());
        let n = end - start;
        buf[..n].copy_from_slice(&data[start..end]);
        Ok(n)
    }

    fn append(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "append through a memory-mapped backend",
        ))
    }

    fn sync(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sync through a memory-mapped backend",
        ))
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.as_slice().len() as u64)
    }
}
