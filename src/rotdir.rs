//! Bounded ring directory: per-prefix naming, rotation, and FIFO reclamation
//! of `rotrec` files sharing one filesystem directory.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::rotrec;

struct PrefixState {
    /// Live file indices for this prefix, ascending, oldest first.
    files: VecDeque<u64>,
}

/// A shared ring directory. Directory-level bookkeeping (the file list used
/// for reclamation) is mutex-protected; hot-path appends through an open
/// `Stream` take no lock here at all — they only touch the `rotrec::Writer`
/// the calling thread already owns.
pub struct Rotdir {
    path: PathBuf,
    max_files: usize,
    map_size: usize,
    file_size: u64,
    state: Mutex<HashMap<String, PrefixState>>,
}

/// A single prefix's open output stream. Not `Sync`: each producer thread
/// owns exactly one `Stream` and must not share it.
pub struct Stream {
    prefix: String,
    writer: rotrec::Writer,
    index: u64,
}

impl Rotdir {
    /// Opens (creating if needed) the ring directory at `path`. Existing
    /// files are enumerated so the highest in-use index per prefix is
    /// recovered.
    pub fn open<P: AsRef<Path>>(path: P, max_files: usize, map_size: usize, file_size: u64) -> Result<Self> {
        if max_files == 0 {
            return Err(Error::Config("max_files must be nonzero".into()));
        }
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let mut state: HashMap<String, PrefixState> = HashMap::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some((prefix, index)) = parse_rot_filename(&name) {
                state
                    .entry(prefix)
                    .or_insert_with(|| PrefixState { files: VecDeque::new() })
                    .files
                    .push_back(index);
            }
        }
        for ps in state.values_mut() {
            ps.files.make_contiguous().sort_unstable();
        }
        Ok(Self {
            path,
            max_files,
            map_size,
            file_size,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh stream for `prefix`, recovering continuity (next index,
    /// base offset) from any files already on disk for that prefix.
    pub fn begin_stream(&self, prefix: &str) -> Result<Stream> {
        let mut guard = self.state.lock().unwrap();
        let entry = guard
            .entry(prefix.to_string())
            .or_insert_with(|| PrefixState { files: VecDeque::new() });
        let next_index = entry.files.back().map_or(1, |i| i + 1);
        let base_offset = match entry.files.back() {
            Some(&last_index) => {
                let last_path = rotrec::path_for(&self.path, prefix, last_index);
                let base = rotrec::Reader::path_base_offset(&last_path)?;
                let size = std::fs::metadata(&last_path)?.len();
                base + size.saturating_sub(8)
            }
            None => 0,
        };
        let path = rotrec::path_for(&self.path, prefix, next_index);
        let writer = rotrec::Writer::create(&path, base_offset, self.file_size, self.map_size)?;
        entry.files.push_back(next_index);
        drop(guard);
        Ok(Stream { prefix: prefix.to_string(), writer, index: next_index })
    }

    /// Appends `bytes` through `stream`, rotating to a new file on `Full`
    /// and reclaiming the oldest file of the prefix if the ring is now over
    /// capacity. Returns the logical offset the record landed at.
    pub fn append(&self, stream: &mut Stream, bytes: &[u8]) -> Result<u64> {
        match stream.writer.append(bytes) {
            Ok(offset) => Ok(offset),
            Err(Error::Full) => {
                self.rotate(stream)?;
                stream.writer.append(bytes)
            }
            Err(e) => Err(e),
        }
    }

    fn rotate(&self, stream: &mut Stream) -> Result<()> {
        let next_index = stream.index + 1;
        let next_base = stream.writer.logical_offset();
        let next_path = rotrec::path_for(&self.path, &stream.prefix, next_index);
        let new_writer = rotrec::Writer::create(&next_path, next_base, self.file_size, self.map_size)?;
        let old_writer = std::mem::replace(&mut stream.writer, new_writer);
        old_writer.close()?;
        stream.index = next_index;

        let mut guard = self.state.lock().unwrap();
        let entry = guard.entry(stream.prefix.clone()).or_insert_with(|| PrefixState {
            files: VecDeque::new(),
        });
        entry.files.push_back(next_index);
        while entry.files.len() > self.max_files {
            if let Some(oldest) = entry.files.pop_front() {
                let oldest_path = rotrec::path_for(&self.path, &stream.prefix, oldest);
                match std::fs::remove_file(&oldest_path) {
                    Ok(()) => log::debug!("reclaimed {}", oldest_path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    pub fn end_stream(&self, stream: Stream) -> Result<()> {
        stream.writer.close()
    }

    /// Live file indices for `prefix`, ascending. Used by the reader to
    /// discover rotation without sharing the writer's mutex.
    pub fn file_indices(&self, prefix: &str) -> Vec<u64> {
        let guard = self.state.lock().unwrap();
        guard
            .get(prefix)
            .map(|ps| ps.files.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn parse_rot_filename(name: &str) -> Option<(String, u64)> {
    let rest = name.strip_suffix(".rot")?;
    let (prefix, index_str) = rest.rsplit_once('.')?;
    let index: u64 = index_str.parse().ok()?;
    Some((prefix.to_string(), index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_rotate_and_respect_max_files() {
        let dir = tempdir().unwrap();
        // file_size leaves room for exactly one 10-byte record per file.
        let rd = Rotdir::open(dir.path(), 3, 4096, 8 + 2 + 8).unwrap();
        let mut stream = rd.begin_stream("thread-0").unwrap();
        for i in 0..10u8 {
            rd.append(&mut stream, &[i; 8]).unwrap();
        }
        rd.end_stream(stream).unwrap();
        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 3);
    }

    #[test]
    fn reopening_rotdir_recovers_highest_index() {
        let dir = tempdir().unwrap();
        {
            let rd = Rotdir::open(dir.path(), 100, 4096, 8 + 2 + 8).unwrap();
            let mut stream = rd.begin_stream("thread-0").unwrap();
            rd.append(&mut stream, &[1; 8]).unwrap();
            rd.append(&mut stream, &[2; 8]).unwrap(); // forces rotation to index 2
            rd.end_stream(stream).unwrap();
        }
        let rd2 = Rotdir::open(dir.path(), 100, 4096, 8 + 2 + 8).unwrap();
        let stream = rd2.begin_stream("thread-0").unwrap();
        assert_eq!(stream.index, 3);
    }

    #[test]
    fn gc_tolerates_file_already_removed() {
        let dir = tempdir().unwrap();
        let rd = Rotdir::open(dir.path(), 1, 4096, 8 + 2 + 8).unwrap();
        let mut stream = rd.begin_stream("thread-0").unwrap();
        rd.append(&mut stream, &[1; 8]).unwrap();
        // Simulate a human deleting the about-to-be-reclaimed file early.
        let victim = rotrec::path_for(dir.path(), "thread-0", 1);
        let _ = std::fs::remove_file(&victim);
        rd.append(&mut stream, &[2; 8]).unwrap();
        rd.end_stream(stream).unwrap();
    }
}
