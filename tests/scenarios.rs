use std::thread;

use passover::{begin_session, Argument, Config, Reader};
use tempfile::tempdir;

/// Opts these tests into the crate's `log` output under `RUST_LOG`, e.g.
/// `RUST_LOG=debug cargo test --test scenarios`.
fn init_logging() {
    let _ = env_logger::try_init();
}

fn small_config() -> Config {
    Config {
        max_files: 3,
        map_size: 64,
        file_size: 8 + 2 + 64, // header + room for a handful of tiny records
        ..Config::default()
    }
}

#[test]
fn bounded_ring_reclaims_oldest_file_per_prefix() {
    init_logging();
    let dir = tempdir().unwrap();
    let session = begin_session(dir.path(), small_config()).unwrap();
    let mut tracer = passover::Tracer::start(session).unwrap();

    for i in 0..200u32 {
        tracer.on_cfunc_call("builtins", "len");
        tracer.on_cfunc_return();
        let _ = i;
    }
    let prefix = tracer.prefix().to_string();
    tracer.stop().unwrap();

    let rot_files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(&prefix) && n.ends_with(".rot"))
        .collect();
    assert!(rot_files.len() <= 3, "ring must stay within max_files, got {rot_files:?}");

    // Every record that survives is still readable, in order, via the reader.
    let mut reader = Reader::open(dir.path(), &prefix).unwrap();
    let mut count = 0;
    while reader.next().unwrap().is_some() {
        count += 1;
    }
    assert!(count > 0);
    assert!(count < 400, "reclaimed records must not reappear");
}

#[test]
fn two_threads_write_independent_prefixes_concurrently() {
    init_logging();
    let dir = tempdir().unwrap();
    let cfg = Config { max_files: 50, map_size: 4096, file_size: 1024 * 1024, ..Config::default() };
    let session = begin_session(dir.path(), cfg).unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || {
                let mut tracer = passover::Tracer::start(session).unwrap();
                for i in 0..500u32 {
                    tracer.on_pyfunc_call("a.py", "f", 1, move || vec![Argument::Int(i as i64)]);
                    tracer.on_pyfunc_return(Argument::None);
                }
                let prefix = tracer.prefix().to_string();
                tracer.stop().unwrap();
                prefix
            })
        })
        .collect();

    let prefixes: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_ne!(prefixes[0], prefixes[1]);

    for prefix in &prefixes {
        let mut reader = Reader::open(dir.path(), prefix).unwrap();
        let mut calls = 0;
        while let Some(rec) = reader.next().unwrap() {
            if matches!(rec.record.body, passover::RecordBody::PyFuncCall { .. }) {
                calls += 1;
            }
        }
        assert_eq!(calls, 500, "each thread's own prefix must see exactly its own calls");
    }
}

#[test]
fn reader_tolerates_truncated_trailing_frame() {
    init_logging();
    let dir = tempdir().unwrap();
    let cfg = Config { max_files: 10, map_size: 4096, file_size: 1024 * 1024, ..Config::default() };
    let session = begin_session(dir.path(), cfg).unwrap();
    let mut tracer = passover::Tracer::start(session).unwrap();
    tracer.on_cfunc_call("builtins", "len");
    tracer.on_cfunc_return();
    tracer.on_cfunc_call("builtins", "len");
    tracer.on_cfunc_return();
    let prefix = tracer.prefix().to_string();
    tracer.stop().unwrap();

    // Simulate an unclean shutdown: truncate the file mid-frame.
    let rot_path = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            let name = p.file_name().unwrap().to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(".rot")
        })
        .unwrap();
    let full_len = std::fs::metadata(&rot_path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&rot_path).unwrap();
    file.set_len(full_len - 5).unwrap();
    drop(file);

    let mut reader = Reader::open(dir.path(), &prefix).unwrap();
    let mut count = 0;
    while reader.next().unwrap().is_some() {
        count += 1;
    }
    // The first record (call+return = 2 records) survives; the truncated
    // trailing frame ends iteration cleanly, not with an error.
    assert!(count >= 2);
    assert!(count < 4);
}

#[test]
fn seek_by_timestamp_lands_at_or_before_target() {
    init_logging();
    let dir = tempdir().unwrap();
    let mut cfg = Config { max_files: 10, map_size: 4096, file_size: 1024 * 1024, ..Config::default() };
    cfg.t_index_ns = 0; // index every record, so seek granularity is fine
    cfg.s_index_bytes = 0;
    let session = begin_session(dir.path(), cfg).unwrap();
    let mut tracer = passover::Tracer::start(session).unwrap();
    for _ in 0..50 {
        tracer.on_cfunc_call("builtins", "len");
        tracer.on_cfunc_return();
    }
    let prefix = tracer.prefix().to_string();
    tracer.stop().unwrap();

    let mut reader = Reader::open(dir.path(), &prefix).unwrap();
    let mut all = Vec::new();
    while let Some(rec) = reader.next().unwrap() {
        all.push(rec);
    }
    assert!(all.len() >= 10);
    let target_ts = all[10].record.timestamp_ns;

    let mut seeking = Reader::open(dir.path(), &prefix).unwrap();
    seeking.seek_timestamp(target_ts).unwrap();
    let found = seeking.next().unwrap().unwrap();
    assert!(found.record.timestamp_ns <= target_ts || found.logical_offset <= all[10].logical_offset);
}
