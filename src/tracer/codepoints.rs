//! Glues `htable::HTable` to the `<prefix>.codepoints` file: a single
//! critical section covers both the interner miss and the accompanying
//! append, per §5's "single mutex around `lookup_or_insert` and the
//! accompanying append" rule.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::codepoint::{Codepoint, CodepointKey};
use crate::fmap;
use crate::htable::HTable;
use crate::metrics::Metrics;

pub struct CodepointStore {
    table: HTable<CodepointKey>,
    file: Mutex<fmap::Writer>,
    next_index: AtomicU32,
}

impl CodepointStore {
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> crate::error::Result<Self> {
        let writer = fmap::Writer::open(path, map_size)?;
        Ok(Self {
            table: HTable::new(),
            file: Mutex::new(writer),
            next_index: AtomicU32::new(0),
        })
    }

    /// Interns the call site identified by `key`, appending a freshly built
    /// codepoint to the codepoints file on first sight. `build_codepoint` is
    /// only invoked on a genuine miss, so the common cache-hit path pays for
    /// one `CodepointKey` and nothing else. A write failure is counted and
    /// suppressed, not propagated — the assigned index is still returned so
    /// the hot path never stalls on a degraded filesystem.
    pub fn intern(&self, key: &CodepointKey, build_codepoint: impl FnOnce() -> Codepoint, metrics: &Metrics) -> u32 {
        let (index, inserted) = self.table.lookup_or_insert(key, || {
            let idx = self.next_index.fetch_add(1, Ordering::SeqCst);
            let mut payload = Vec::new();
            match build_codepoint().encode(&mut payload) {
                Ok(()) => self.append_frame(&payload, metrics),
                Err(_) => metrics.inc_io_error(),
            }
            idx
        });
        if inserted {
            metrics.inc_codepoints_interned();
        }
        index
    }

    fn append_frame(&self, payload: &[u8], metrics: &Metrics) {
        if payload.len() > u16::MAX as usize {
            metrics.inc_io_error();
            return;
        }
        let mut file = self.file.lock().unwrap();
        let needed = 2 + payload.len();
        match file.reserve(needed) {
            Ok(slice) => {
                slice[0..2].copy_from_slice(&(payload.len() as u16).to_le_bytes());
                slice[2..].copy_from_slice(payload);
            }
            Err(_) => metrics.inc_io_error(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn close(self) -> crate::error::Result<()> {
        self.file.into_inner().unwrap().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::load_codepoints;
    use tempfile::tempdir;

    #[test]
    fn interning_same_site_twice_returns_same_index() {
        let dir = tempdir().unwrap();
        let store = CodepointStore::open(dir.path().join("codepoints"), 4096).unwrap();
        let metrics = Metrics::new();
        let cp = Codepoint::PyFunc { filename: "a.py".into(), name: "f".into(), lineno: 1 };
        let key = CodepointKey::from(&cp);
        let i1 = store.intern(&key, || cp.clone(), &metrics);
        let i2 = store.intern(&key, || panic!("should not run"), &metrics);
        assert_eq!(i1, i2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn persisted_codepoints_are_readable_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("codepoints");
        let store = CodepointStore::open(&path, 4096).unwrap();
        let metrics = Metrics::new();
        let cfunc = Codepoint::CFunc { module: "builtins".into(), name: "len".into() };
        store.intern(&CodepointKey::from(&cfunc), || cfunc.clone(), &metrics);
        let logline = Codepoint::Logline { format: "x=%d".into() };
        store.intern(&CodepointKey::from(&logline), || logline.clone(), &metrics);
        store.close().unwrap();

        let loaded = load_codepoints(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], Codepoint::CFunc { module: "builtins".into(), name: "len".into() });
        assert_eq!(loaded[1], Codepoint::Logline { format: "x=%d".into() });
    }
}
