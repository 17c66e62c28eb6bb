//! Append-only byte sink over a sliding mmap window.
//!
//! A file is kept extended in `map_size` chunks; a window of `2 * map_size`
//! bytes is mapped at a time so a write can never straddle an unmapped
//! boundary. When the write cursor crosses the midpoint, the trailing half is
//! hand off to a background unmap thread (see `unmapper`) and a fresh leading
//! half is mapped in its place.

use memmap2::MmapMut;
use once_cell::sync::Lazy;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Background unmap worker, shared across the whole process.
///
/// A depth-1 rendezvous channel: the producer blocks until the previous unmap
/// completes rather than dropping work, matching §5's "drops on backpressure
/// are not permitted" rule.
struct Unmapper {
    tx: SyncSender<MmapMut>,
}

impl Unmapper {
    fn new() -> Self {
        let (tx, rx) = sync_channel::<MmapMut>(0);
        std::thread::Builder::new()
            .name("passover-unmap".into())
            .spawn(move || {
                for mapping in rx {
                    drop(mapping);
                }
            })
            .expect("failed to spawn background unmap thread");
        Self { tx }
    }

    fn retire(&self, mapping: MmapMut) {
        // Blocks if the worker is still busy with the previous mapping.
        let _ = self.tx.send(mapping);
    }
}

static UNMAPPER: Lazy<Mutex<Unmapper>> = Lazy::new(|| Mutex::new(Unmapper::new()));

fn retire_mapping(mapping: MmapMut) {
    if cfg!(feature = "background_unmap") {
        UNMAPPER.lock().unwrap().retire(mapping);
    } else {
        drop(mapping);
    }
}

/// Requests transparent huge pages for a freshly mapped window. Best-effort:
/// the kernel may ignore it, and a failure here must never fail the writer.
fn advise_hugepages(map: &MmapMut) {
    let ret = unsafe { libc::madvise(map.as_ptr() as *mut libc::c_void, map.len(), libc::MADV_HUGEPAGE) };
    if ret != 0 {
        log::debug!("MADV_HUGEPAGE failed for trace window: {}", std::io::Error::last_os_error());
    }
}

/// A writable window of `2 * map_size` bytes over a growable file.
pub struct Writer {
    path: PathBuf,
    file: File,
    map_size: u64,
    /// Byte offset, within the file, of the start of the current window.
    window_base: u64,
    map: MmapMut,
    /// Cursor within the 2x window (0..=2*map_size).
    cursor: u64,
    /// Total bytes ever written (monotone, survives window slides).
    total_written: u64,
}

impl Writer {
    /// Creates or opens `path` for append, sizing the file to one window and
    /// mapping `2 * map_size` bytes starting at offset 0.
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let window_size = 2 * map_size as u64;
        file.set_len(window_size)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        advise_hugepages(&map);
        Ok(Self {
            path,
            file,
            map_size: map_size as u64,
            window_base: 0,
            map,
            cursor: 0,
            total_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a writable slice of exactly `n` bytes and advances the cursor.
    ///
    /// Invariant held at entry: `cursor <= map_size`. The window is slid
    /// eagerly here if the previous call left the cursor past the midpoint,
    /// so the write below always lands within the still-mapped trailing
    /// half and never spans a slide.
    pub fn reserve(&mut self, n: usize) -> Result<&mut [u8]> {
        if n as u64 > self.map_size {
            return Err(Error::TooLarge {
                requested: n,
                limit: self.map_size as usize,
            });
        }
        if self.cursor >= self.map_size {
            self.slide_window()?;
        }
        let start = self.cursor as usize;
        let end = start + n;
        self.cursor += n as u64;
        self.total_written += n as u64;
        Ok(&mut self.map[start..end])
    }

    /// Slides the window forward by `map_size`: extends the file by another
    /// `map_size` bytes, maps the new `2 * map_size` window starting at the
    /// old midpoint, and retires the old mapping's now-stale leading half in
    /// the background.
    fn slide_window(&mut self) -> Result<()> {
        let new_base = self.window_base + self.map_size;
        self.file.set_len(new_base + 2 * self.map_size)?;
        let new_map = unsafe {
            memmap2::MmapOptions::new()
                .offset(new_base)
                .len((2 * self.map_size) as usize)
                .map_mut(&self.file)?
        };
        advise_hugepages(&new_map);
        let old_map = std::mem::replace(&mut self.map, new_map);
        self.window_base = new_base;
        self.cursor -= self.map_size;
        retire_mapping(old_map);
        Ok(())
    }

    /// Total bytes written since `open`.
    pub fn current_offset(&self) -> u64 {
        self.total_written
    }

    /// Flushes, unmaps, and truncates the file to the exact written length.
    pub fn close(mut self) -> Result<()> {
        self.map.flush()?;
        let exact_len = self.total_written;
        let map = std::mem::replace(&mut self.map, MmapMut::map_anon(1)?);
        drop(map);
        self.file.set_len(exact_len)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reserve_writes_within_one_window() {
        let dir = tempdir().unwrap();
        let mut w = Writer::open(dir.path().join("f"), 4096).unwrap();
        let buf = w.reserve(16).unwrap();
        buf.copy_from_slice(&[7u8; 16]);
        assert_eq!(w.current_offset(), 16);
    }

    #[test]
    fn reserve_larger_than_map_size_fails() {
        let dir = tempdir().unwrap();
        let mut w = Writer::open(dir.path().join("f"), 64).unwrap();
        assert!(matches!(w.reserve(128), Err(Error::TooLarge { .. })));
    }

    #[test]
    fn window_slides_across_many_writes() {
        let dir = tempdir().unwrap();
        let map_size = 256;
        let mut w = Writer::open(dir.path().join("f"), map_size).unwrap();
        let chunk = 17usize;
        let iterations = 200;
        for i in 0..iterations {
            let buf = w.reserve(chunk).unwrap();
            buf.fill((i % 251) as u8);
        }
        assert_eq!(w.current_offset(), (chunk * iterations) as u64);
        w.close().unwrap();
    }

    #[test]
    fn close_truncates_to_written_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let mut w = Writer::open(&path, 4096).unwrap();
        w.reserve(10).unwrap();
        w.close().unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 10);
    }
}
