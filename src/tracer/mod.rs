//! The hot-path engine: one `Tracer` per traced thread, sharing a `Session`
//! (rotdir, codepoint interner, clock, metrics) with every other traced
//! thread in the same process.

pub mod clock;
pub mod codepoints;

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::argument::Argument;
use crate::codepoint::{Codepoint, CodepointKey};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fmap;
use crate::metrics::Metrics;
use crate::record::{RecordBody, TraceRecord};
use crate::rotdir::{Rotdir, Stream};

bitflags::bitflags! {
    /// Per-call-site suppression, set by the probe's ignore API.
    ///
    /// `SINGLE` skips one frame (its call, return and any nested events are
    /// still recorded — only the frame's own events are dropped). `CHILDREN`
    /// records the frame itself but suppresses everything nested below it.
    /// `WHOLE` suppresses the frame and everything below it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IgnoreMask: u8 {
        const SINGLE = 0b001;
        const CHILDREN = 0b010;
        const WHOLE = 0b100;
    }
}

/// Shared, process-wide state for one trace directory: the ring directory,
/// the codepoint interner (one per `rotdir`, not per thread), the monotonic
/// clock, and the counters every `Tracer` on every thread reports into.
pub struct Session {
    path: PathBuf,
    config: Config,
    rotdir: Rotdir,
    codepoints: codepoints::CodepointStore,
    clock: clock::Clock,
    metrics: Metrics,
    ignore_masks: Mutex<HashMap<CodepointKey, IgnoreMask>>,
    next_ordinal: AtomicU64,
}

static SESSIONS: Lazy<Mutex<HashMap<PathBuf, Arc<Session>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Opens (or returns the already-open handle to) the session rooted at
/// `path`. A second call for the same path returns the existing session,
/// matching the teacher's process-wide directory-to-handle registry.
pub fn begin_session<P: AsRef<Path>>(path: P, config: Config) -> Result<Arc<Session>> {
    config.validate()?;
    let path = path.as_ref().to_path_buf();
    let mut registry = SESSIONS.lock().unwrap();
    if let Some(existing) = registry.get(&path) {
        return Ok(existing.clone());
    }
    if config.remove_existing_dir && path.exists() && path.read_dir()?.next().is_some() {
        std::fs::remove_dir_all(&path)?;
    }
    std::fs::create_dir_all(&path)?;
    let rotdir = Rotdir::open(&path, config.max_files, config.map_size, config.file_size)?;
    let codepoints = codepoints::CodepointStore::open(path.join("codepoints"), config.map_size)?;
    log::info!("trace session opened at {}", path.display());
    let session = Arc::new(Session {
        path: path.clone(),
        config,
        rotdir,
        codepoints,
        clock: clock::Clock::new(),
        metrics: Metrics::new(),
        ignore_masks: Mutex::new(HashMap::new()),
        next_ordinal: AtomicU64::new(0),
    });
    registry.insert(path, session.clone());
    Ok(session)
}

impl Session {
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets (or clears, with `IgnoreMask::empty()`) the ignore mask for a
    /// call site, effective for every thread sharing this session.
    pub fn set_ignore(&self, site: CodepointKey, mask: IgnoreMask) {
        let mut guard = self.ignore_masks.lock().unwrap();
        if mask.is_empty() {
            guard.remove(&site);
        } else {
            guard.insert(site, mask);
        }
    }

    fn ignore_mask_for(&self, site: &CodepointKey) -> IgnoreMask {
        self.ignore_masks.lock().unwrap().get(site).copied().unwrap_or_default()
    }
}

thread_local! {
    static ACTIVE_TRACER: Cell<bool> = const { Cell::new(false) };
}

/// A frame pushed at every call-type entry point, carrying what's needed to
/// restore ignore-floor state and emit a matching return/raise.
struct Frame {
    ignored: bool,
    saved_floor: Option<u16>,
    cpindex: u16,
}

/// One thread's view onto a shared `Session`: its own `rotdir` stream, its
/// own time index, and its own call-depth/ignore-floor bookkeeping. Not
/// `Send`: `ACTIVE_TRACER` is a thread-local, so moving a `Tracer` to another
/// thread and calling `stop()` there would clear the flag on the wrong
/// thread and leave the starting thread permanently unable to start a new
/// one. `_not_send` enforces this at compile time via a raw-pointer marker.
pub struct Tracer {
    session: Arc<Session>,
    prefix: String,
    stream: Stream,
    time_index: fmap::Writer,
    depth: u16,
    floor: Option<u16>,
    frames: Vec<Frame>,
    last_index_time_ns: u64,
    last_index_offset: u64,
    scratch: Vec<u8>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Tracer {
    /// Starts tracing on the calling thread. Fails with `TracerAlreadyActive`
    /// if this thread already owns a live `Tracer`; does not touch any file
    /// in that case.
    pub fn start(session: Arc<Session>) -> Result<Self> {
        if ACTIVE_TRACER.with(|a| a.get()) {
            return Err(Error::TracerAlreadyActive);
        }
        let ordinal = session.next_ordinal.fetch_add(1, Ordering::Relaxed);
        let prefix = session.config.template.replace("%d", &ordinal.to_string());
        let stream = session.rotdir.begin_stream(&prefix)?;
        let time_index = fmap::Writer::open(session.path.join(format!("{prefix}.timeindex")), session.config.map_size)?;
        ACTIVE_TRACER.with(|a| a.set(true));
        log::debug!("tracer started with prefix {prefix}");
        Ok(Self {
            session,
            prefix,
            stream,
            time_index,
            depth: 0,
            floor: None,
            frames: Vec::new(),
            last_index_time_ns: 0,
            last_index_offset: 0,
            scratch: Vec::with_capacity(256),
            _not_send: std::marker::PhantomData,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Flushes the time index and closes this thread's trace stream. A
    /// no-op thread-local flag flip otherwise; calling `stop` twice on two
    /// separately-started tracers from the same thread is prevented by
    /// `start`'s `TracerAlreadyActive` check, not by this method.
    pub fn stop(self) -> Result<()> {
        self.session.rotdir.end_stream(self.stream)?;
        self.time_index.close()?;
        ACTIVE_TRACER.with(|a| a.set(false));
        log::debug!("tracer stopped with prefix {}", self.prefix);
        Ok(())
    }

    fn intern(&self, key: &CodepointKey, build_codepoint: impl FnOnce() -> Codepoint) -> u16 {
        self.session.codepoints.intern(key, build_codepoint, &self.session.metrics) as u16
    }

    /// Pushes a new call frame, applying and updating the ignore floor.
    /// Returns whether this frame's own events should be suppressed.
    fn push_call(&mut self, site: &CodepointKey) -> bool {
        let mask = self.session.ignore_mask_for(site);
        let ignored_by_floor = matches!(self.floor, Some(f) if self.depth >= f);
        let ignored = ignored_by_floor || mask.intersects(IgnoreMask::SINGLE | IgnoreMask::WHOLE);
        self.frames.push(Frame { ignored, saved_floor: self.floor, cpindex: 0 });
        if !ignored_by_floor {
            if mask.contains(IgnoreMask::WHOLE) {
                self.floor = Some(self.depth);
            } else if mask.contains(IgnoreMask::CHILDREN) {
                self.floor = Some(self.depth + 1);
            }
        }
        ignored
    }

    /// Records the codepoint index assigned to the most recently pushed,
    /// not-suppressed call, so the matching return/raise can reuse it.
    fn set_current_call_cpindex(&mut self, cpindex: u16) {
        if let Some(frame) = self.frames.last_mut() {
            frame.cpindex = cpindex;
        }
    }

    /// Pops the matching call frame, restoring the ignore floor. Returns
    /// whether the matching call was suppressed and its codepoint index.
    fn pop_call(&mut self) -> (bool, u16) {
        match self.frames.pop() {
            Some(frame) => {
                self.floor = frame.saved_floor;
                (frame.ignored, frame.cpindex)
            }
            None => (false, 0),
        }
    }

    fn enter_depth(&mut self) {
        if self.depth == u16::MAX {
            self.session.metrics.inc_depth_overflow();
        } else {
            self.depth += 1;
        }
    }

    fn leave_depth(&mut self) -> u16 {
        self.depth = self.depth.saturating_sub(1);
        self.depth
    }

    fn emit(&mut self, depth: u16, cpindex: u16, body: RecordBody) {
        let timestamp_ns = self.session.clock.now_ns(&self.session.metrics);
        let record = TraceRecord { depth, timestamp_ns, cpindex, body };
        self.scratch.clear();
        match record.encode() {
            Ok(bytes) => {
                self.scratch.extend_from_slice(&bytes);
                match self.session.rotdir.append(&mut self.stream, &self.scratch) {
                    Ok(logical_offset) => {
                        self.session.metrics.inc_events_emitted();
                        self.maybe_index(timestamp_ns, logical_offset);
                    }
                    Err(_) => self.session.metrics.inc_io_error(),
                }
            }
            Err(_) => self.session.metrics.inc_io_error(),
        }
    }

    fn maybe_index(&mut self, timestamp_ns: u64, logical_offset: u64) {
        let due_by_time = timestamp_ns.saturating_sub(self.last_index_time_ns) >= self.session.config.t_index_ns;
        let due_by_size = logical_offset.saturating_sub(self.last_index_offset) >= self.session.config.s_index_bytes;
        if !due_by_time && !due_by_size {
            return;
        }
        match self.time_index.reserve(16) {
            Ok(slice) => {
                slice[0..8].copy_from_slice(&timestamp_ns.to_le_bytes());
                slice[8..16].copy_from_slice(&logical_offset.to_le_bytes());
                self.session.metrics.inc_time_index_entry();
                self.last_index_time_ns = timestamp_ns;
                self.last_index_offset = logical_offset;
            }
            Err(_) => self.session.metrics.inc_io_error(),
        }
    }

    fn render_args(&self, thunk: impl FnOnce() -> Vec<Argument>) -> Vec<Argument> {
        match catch_unwind(AssertUnwindSafe(thunk)) {
            Ok(mut args) => {
                args.truncate(self.session.config.max_args);
                args
            }
            Err(_) => {
                self.session.metrics.inc_render_failure();
                vec![Argument::Undumpable]
            }
        }
    }

    /// Records a Python-level function call. `args_thunk` is only invoked if
    /// the call site is not currently suppressed, and any panic inside it is
    /// caught and downgraded to a single `Argument::Undumpable`.
    pub fn on_pyfunc_call(&mut self, filename: &str, name: &str, lineno: u32, args_thunk: impl FnOnce() -> Vec<Argument>) {
        let site = CodepointKey::PyFunc { filename: filename.to_string(), name: name.to_string(), lineno };
        let ignored = self.push_call(&site);
        let depth = self.depth;
        if ignored {
            self.session.metrics.inc_events_ignored();
        } else {
            let cpindex = self.intern(&site, || Codepoint::PyFunc {
                filename: filename.to_string(),
                name: name.to_string(),
                lineno,
            });
            self.set_current_call_cpindex(cpindex);
            let args = self.render_args(args_thunk);
            self.emit(depth, cpindex, RecordBody::PyFuncCall { args });
        }
        self.enter_depth();
    }

    pub fn on_pyfunc_return(&mut self, retval: Argument) {
        let depth = self.leave_depth();
        let (ignored, cpindex) = self.pop_call();
        if !ignored {
            self.emit(depth, cpindex, RecordBody::PyFuncRet { retval });
        }
    }

    pub fn on_pyfunc_raise(&mut self) {
        let depth = self.leave_depth();
        let (ignored, cpindex) = self.pop_call();
        if !ignored {
            self.emit(depth, cpindex, RecordBody::PyFuncRaise);
        }
    }

    /// Records a call into a C-implemented function (no arguments captured).
    pub fn on_cfunc_call(&mut self, module: &str, name: &str) {
        let site = CodepointKey::CFunc { module: module.to_string(), name: name.to_string() };
        let ignored = self.push_call(&site);
        let depth = self.depth;
        if ignored {
            self.session.metrics.inc_events_ignored();
        } else {
            let cpindex = self.intern(&site, || Codepoint::CFunc { module: module.to_string(), name: name.to_string() });
            self.set_current_call_cpindex(cpindex);
            self.emit(depth, cpindex, RecordBody::CFuncCall);
        }
        self.enter_depth();
    }

    pub fn on_cfunc_return(&mut self) {
        let depth = self.leave_depth();
        let (ignored, cpindex) = self.pop_call();
        if !ignored {
            self.emit(depth, cpindex, RecordBody::CFuncRet);
        }
    }

    pub fn on_cfunc_raise(&mut self) {
        let depth = self.leave_depth();
        let (ignored, cpindex) = self.pop_call();
        if !ignored {
            self.emit(depth, cpindex, RecordBody::CFuncRaise);
        }
    }

    /// Emits an out-of-band log record. Suppressed only by an ancestor's
    /// `CHILDREN`/`WHOLE` ignore floor, since a log line has no call site of
    /// its own to carry a mask.
    pub fn log(&mut self, format: &str, args: &[&str]) {
        if matches!(self.floor, Some(f) if self.depth >= f) {
            self.session.metrics.inc_events_ignored();
            return;
        }
        let site = CodepointKey::Logline(format.to_string());
        let cpindex = self.intern(&site, || Codepoint::Logline { format: format.to_string() });
        let depth = self.depth;
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.emit(depth, cpindex, RecordBody::LogRecord { args });
    }

}
