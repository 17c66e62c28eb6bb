//! Post-hoc reader: loads the shared codepoints table and a prefix's own
//! time index, then walks that prefix's `rotrec` files in logical order.
//!
//! Unchanged contract from the spec's §4.6: codepoint resolution is lazy and
//! tolerant of an out-of-range index (surfaces as `None`, not an error), and
//! the directory is re-scanned whenever iteration runs off the end of the
//! currently known files, so a reader started before a writer catches up to
//! files created later.

use std::path::{Path, PathBuf};

use crate::codepoint::Codepoint;
use crate::error::{Error, Result};
use crate::record::TraceRecord;
use crate::rotrec;

/// Reads every codepoint from `path` in index order. Unlike a `rotrec` file,
/// the codepoints file carries no base-offset header: it is a single
/// append-only stream of `{ u16 length; bytes }` frames starting at byte 0.
/// A decode failure past a valid prefix (e.g. a truncated trailing entry from
/// an unclean shutdown) terminates the load cleanly rather than failing it.
pub fn load_codepoints<P: AsRef<Path>>(path: P) -> Result<Vec<Codepoint>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let mut out = Vec::new();
    let mut cursor = 0usize;
    loop {
        let buf = &mmap[cursor..];
        if buf.len() < 2 {
            break;
        }
        let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        if len == 0 || buf.len() < 2 + len {
            break;
        }
        match Codepoint::decode(&buf[2..2 + len]) {
            Ok(cp) => out.push(cp),
            Err(_) => break,
        }
        cursor += 2 + len;
    }
    Ok(out)
}

/// A single 16-byte `{ timestamp_ns, logical_offset }` time-index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeIndexEntry {
    pub timestamp_ns: u64,
    pub logical_offset: u64,
}

/// Reads a prefix's time index fully into a vector, monotone by construction.
pub fn load_time_index<P: AsRef<Path>>(path: P) -> Result<Vec<TimeIndexEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)?;
    let mut out = Vec::with_capacity(bytes.len() / 16);
    let mut i = 0;
    while i + 16 <= bytes.len() {
        let timestamp_ns = u64::from_le_bytes(bytes[i..i + 8].try_into().unwrap());
        let logical_offset = u64::from_le_bytes(bytes[i + 8..i + 16].try_into().unwrap());
        out.push(TimeIndexEntry { timestamp_ns, logical_offset });
        i += 16;
    }
    Ok(out)
}

/// A resolved trace record, with its codepoint looked up against the table
/// loaded at reader-open time.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub logical_offset: u64,
    pub record: TraceRecord,
    pub codepoint: Option<Codepoint>,
}

/// Walks one prefix's trace stream within a `rotdir`, resolving codepoints
/// against the shared codepoints table and supporting timestamp-based seek
/// via the prefix's own time index.
pub struct Reader {
    dir: PathBuf,
    prefix: String,
    codepoints: Vec<Codepoint>,
    time_index: Vec<TimeIndexEntry>,
    known_indices: Vec<u64>,
    cursor: usize,
    current: Option<rotrec::Reader>,
}

impl Reader {
    /// Opens the shared codepoints table and `prefix`'s own time index, then
    /// enumerates `dir` for `prefix`'s trace files.
    pub fn open<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let codepoints = load_codepoints(dir.join("codepoints"))?;
        let time_index = load_time_index(dir.join(format!("{prefix}.timeindex")))?;
        let mut reader = Self {
            dir,
            prefix: prefix.to_string(),
            codepoints,
            time_index,
            known_indices: Vec::new(),
            cursor: 0,
            current: None,
        };
        reader.rescan()?;
        Ok(reader)
    }

    fn rescan(&mut self) -> Result<()> {
        let mut indices = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(index) = parse_index_for_prefix(&name, &self.prefix) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        self.known_indices = indices;
        Ok(())
    }

    fn resolve(&self, cpindex: u16) -> Option<Codepoint> {
        self.codepoints.get(cpindex as usize).cloned()
    }

    /// Positions the reader at the first record whose logical offset is at
    /// or after `offset`, by opening the file whose range contains it.
    pub fn seek_offset(&mut self, offset: u64) -> Result<()> {
        self.rescan()?;
        for &index in &self.known_indices {
            let path = rotrec::path_for(&self.dir, &self.prefix, index);
            let base = rotrec::Reader::path_base_offset(&path)?;
            let size = std::fs::metadata(&path)?.len();
            let end = base + size.saturating_sub(8);
            if offset < end || self.known_indices.last() == Some(&index) {
                let mut r = rotrec::Reader::open(&path)?;
                if offset > base {
                    r.seek_logical(offset)?;
                }
                self.cursor = self.known_indices.iter().position(|i| *i == index).unwrap();
                self.current = Some(r);
                return Ok(());
            }
        }
        Err(Error::Config("no trace files for this prefix".into()))
    }

    /// Positions the reader at the first record at or after `timestamp_ns`,
    /// using the preloaded (monotone) time index to avoid a linear scan.
    pub fn seek_timestamp(&mut self, timestamp_ns: u64) -> Result<()> {
        let offset = match self.time_index.partition_point(|e| e.timestamp_ns < timestamp_ns) {
            0 => self.time_index.first().map_or(0, |e| e.logical_offset),
            i => self.time_index[i - 1].logical_offset,
        };
        self.seek_offset(offset)
    }

    /// Returns the next record, resolving its codepoint, or `None` at the
    /// end of the stream currently on disk.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<ResolvedRecord>> {
        loop {
            if self.current.is_none() {
                self.rescan()?;
                if self.cursor >= self.known_indices.len() {
                    return Ok(None);
                }
                let index = self.known_indices[self.cursor];
                let path = rotrec::path_for(&self.dir, &self.prefix, index);
                self.current = Some(rotrec::Reader::open(&path)?);
            }
            let r = self.current.as_mut().unwrap();
            let logical_offset = r.logical_offset();
            match r.read_frame() {
                Some(payload) => {
                    let record = TraceRecord::decode(&payload)?;
                    let codepoint = self.resolve(record.cpindex);
                    return Ok(Some(ResolvedRecord { logical_offset, record, codepoint }));
                }
                None => {
                    self.current = None;
                    self.cursor += 1;
                    self.rescan()?;
                    if self.cursor >= self.known_indices.len() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

fn parse_index_for_prefix(name: &str, prefix: &str) -> Option<u64> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('.')?;
    let rest = rest.strip_suffix(".rot")?;
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmap;
    use crate::rotdir::Rotdir;
    use tempfile::tempdir;

    fn write_codepoints(dir: &Path, cps: &[Codepoint]) {
        let mut w = fmap::Writer::open(dir.join("codepoints"), 4096).unwrap();
        for cp in cps {
            let mut payload = Vec::new();
            cp.encode(&mut payload).unwrap();
            let slice = w.reserve(2 + payload.len()).unwrap();
            slice[0..2].copy_from_slice(&(payload.len() as u16).to_le_bytes());
            slice[2..].copy_from_slice(&payload);
        }
        w.close().unwrap();
    }

    #[test]
    fn reads_back_records_with_resolved_codepoints() {
        let dir = tempdir().unwrap();
        let cp = Codepoint::PyFunc { filename: "a.py".into(), name: "f".into(), lineno: 1 };
        write_codepoints(dir.path(), std::slice::from_ref(&cp));

        let rd = Rotdir::open(dir.path(), 100, 4096, 1024 * 1024).unwrap();
        let mut stream = rd.begin_stream("thread-0").unwrap();
        let rec = TraceRecord {
            depth: 0,
            timestamp_ns: 1,
            cpindex: 0,
            body: crate::record::RecordBody::CFuncCall,
        };
        let bytes = rec.encode().unwrap();
        rd.append(&mut stream, &bytes).unwrap();
        rd.end_stream(stream).unwrap();

        let mut reader = Reader::open(dir.path(), "thread-0").unwrap();
        let got = reader.next().unwrap().unwrap();
        assert_eq!(got.codepoint, Some(cp));
        assert_eq!(got.record.cpindex, 0);
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn out_of_range_cpindex_resolves_to_none() {
        let dir = tempdir().unwrap();
        write_codepoints(dir.path(), &[]);

        let rd = Rotdir::open(dir.path(), 100, 4096, 1024 * 1024).unwrap();
        let mut stream = rd.begin_stream("thread-0").unwrap();
        let rec = TraceRecord {
            depth: 0,
            timestamp_ns: 1,
            cpindex: 99,
            body: crate::record::RecordBody::CFuncCall,
        };
        let bytes = rec.encode().unwrap();
        rd.append(&mut stream, &bytes).unwrap();
        rd.end_stream(stream).unwrap();

        let mut reader = Reader::open(dir.path(), "thread-0").unwrap();
        let got = reader.next().unwrap().unwrap();
        assert_eq!(got.codepoint, None);
    }

    #[test]
    fn seek_timestamp_uses_time_index() {
        let dir = tempdir().unwrap();
        write_codepoints(dir.path(), &[]);
        // Each CFuncCall frame is 15 bytes (2-byte length prefix + 13-byte
        // header, zero-byte body), so records land at logical offsets
        // 0, 15, 30, 45, 60 for timestamps 0, 100, 200, 300, 400.
        let mut tindex = fmap::Writer::open(dir.path().join("thread-0.timeindex"), 4096).unwrap();
        for (ts, off) in [(100u64, 15u64), (200, 30), (300, 45)] {
            let slice = tindex.reserve(16).unwrap();
            slice[0..8].copy_from_slice(&ts.to_le_bytes());
            slice[8..16].copy_from_slice(&off.to_le_bytes());
        }
        tindex.close().unwrap();

        let rd = Rotdir::open(dir.path(), 100, 4096, 1024 * 1024).unwrap();
        let mut stream = rd.begin_stream("thread-0").unwrap();
        for i in 0..5u16 {
            let rec = TraceRecord {
                depth: 0,
                timestamp_ns: (i as u64) * 100,
                cpindex: 0,
                body: crate::record::RecordBody::CFuncCall,
            };
            let bytes = rec.encode().unwrap();
            rd.append(&mut stream, &bytes).unwrap();
        }
        rd.end_stream(stream).unwrap();

        let mut reader = Reader::open(dir.path(), "thread-0").unwrap();
        reader.seek_timestamp(250).unwrap();
        let got = reader.next().unwrap().unwrap();
        assert_eq!(got.logical_offset, 30);
        assert_eq!(got.record.timestamp_ns, 200);
    }
}
