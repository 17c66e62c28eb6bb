//! A single bounded, length-prefixed record file backed by `fmap`.
//!
//! Layout: an 8-byte base-offset header, then a sequence of
//! `{ u16 length; bytes[length] }` frames, capped at `file_size` bytes.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fmap;

const HEADER_LEN: u64 = 8;

/// Write side of a record file.
pub struct Writer {
    fmap: fmap::Writer,
    remaining: u64,
    base_offset: u64,
}

impl Writer {
    /// Creates `path`, writes the base-offset header, and returns a handle
    /// with `remaining = file_size - 8`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        base_offset: u64,
        file_size: u64,
        map_size: usize,
    ) -> Result<Self> {
        let mut fm = fmap::Writer::open(path, map_size)?;
        let header = fm.reserve(HEADER_LEN as usize)?;
        header.copy_from_slice(&base_offset.to_le_bytes());
        Ok(Self {
            fmap: fm,
            remaining: file_size.saturating_sub(HEADER_LEN),
            base_offset,
        })
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Logical offset (relative to this file's base) of the next record to
    /// be appended.
    pub fn logical_offset(&self) -> u64 {
        self.base_offset + self.fmap.current_offset() - HEADER_LEN
    }

    /// Writes `{ u16 len; bytes }`, provided `2 + len <= remaining`.
    /// Returns `Full` without any partial write otherwise; the caller
    /// (`rotdir`) treats `Full` as a rotation signal.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        if bytes.len() > u16::MAX as usize {
            return Err(Error::Config("record exceeds u16 frame length".into()));
        }
        let needed = 2 + bytes.len() as u64;
        if needed > self.remaining {
            return Err(Error::Full);
        }
        let logical = self.logical_offset();
        let slice = self.fmap.reserve(needed as usize)?;
        slice[0..2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
        slice[2..].copy_from_slice(bytes);
        self.remaining -= needed;
        Ok(logical)
    }

    pub fn close(self) -> Result<()> {
        self.fmap.close()
    }
}

/// Read side of a record file: maps the whole (closed) file and walks
/// frames from the start.
pub struct Reader {
    mmap: memmap2::Mmap,
    pub base_offset: u64,
    cursor: usize,
}

impl Reader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        if mmap.len() < HEADER_LEN as usize {
            let cursor = mmap.len();
            return Ok(Self { mmap, base_offset: 0, cursor });
        }
        let base_offset = u64::from_le_bytes(mmap[0..8].try_into().unwrap());
        Ok(Self { mmap, base_offset, cursor: HEADER_LEN as usize })
    }

    /// Reads just the 8-byte base-offset header, without mapping the file.
    /// Used by `rotdir` during rotation/recovery, where only the header
    /// (not the frames) is needed.
    pub fn path_base_offset(path: &Path) -> Result<u64> {
        use std::io::Read;
        let mut file = std::fs::File::open(path)?;
        let mut header = [0u8; HEADER_LEN as usize];
        match file.read_exact(&mut header) {
            Ok(()) => Ok(u64::from_le_bytes(header)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Positions the cursor at the frame whose logical offset is `logical`,
    /// i.e. physical offset `logical - base_offset + HEADER_LEN`.
    pub fn seek_logical(&mut self, logical: u64) -> Result<()> {
        let physical = logical
            .checked_sub(self.base_offset)
            .ok_or_else(|| Error::Config("seek offset precedes file base".into()))?
            + HEADER_LEN;
        if physical as usize > self.mmap.len() {
            return Err(Error::Config("seek offset past end of file".into()));
        }
        self.cursor = physical as usize;
        Ok(())
    }

    /// Current logical offset of the cursor.
    pub fn logical_offset(&self) -> u64 {
        self.base_offset + self.cursor as u64 - HEADER_LEN
    }

    /// Reads one frame's payload. Returns `None` on a zero-length frame or
    /// true EOF; returns `None` (not an error) on a truncated trailing
    /// frame, per §7/§8's "reader tolerates a truncated final frame".
    pub fn read_frame(&mut self) -> Option<Vec<u8>> {
        let buf = &self.mmap[self.cursor..];
        if buf.len() < 2 {
            return None;
        }
        let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        if len == 0 {
            return None;
        }
        if buf.len() < 2 + len {
            return None;
        }
        let payload = buf[2..2 + len].to_vec();
        self.cursor += 2 + len;
        Some(payload)
    }
}

pub(crate) fn file_name(prefix: &str, index: u64) -> String {
    format!("{prefix}.{index:06}.rot")
}

pub(crate) fn path_for(dir: &Path, prefix: &str, index: u64) -> PathBuf {
    dir.join(file_name(prefix, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_back_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thread-0.000001.rot");
        let mut w = Writer::create(&path, 0, 4096, 1024).unwrap();
        w.append(b"hello").unwrap();
        w.append(b"world").unwrap();
        w.close().unwrap();

        let mut r = Reader::open(&path).unwrap();
        assert_eq!(r.read_frame().unwrap(), b"hello");
        assert_eq!(r.read_frame().unwrap(), b"world");
        assert!(r.read_frame().is_none());
    }

    #[test]
    fn full_file_returns_full_without_partial_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thread-0.000001.rot");
        // file_size leaves exactly room for one 10-byte record (2 + 8).
        let mut w = Writer::create(&path, 0, 8 + 2 + 8, 4096).unwrap();
        w.append(&[0u8; 8]).unwrap();
        assert!(matches!(w.append(&[0u8; 1]), Err(Error::Full)));
    }

    #[test]
    fn logical_offsets_account_for_base() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thread-0.000002.rot");
        let mut w = Writer::create(&path, 1000, 4096, 1024).unwrap();
        let off = w.append(b"abc").unwrap();
        assert_eq!(off, 1000);
        let off2 = w.append(b"de").unwrap();
        assert_eq!(off2, 1000 + 2 + 3);
    }
}
