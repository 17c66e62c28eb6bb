//! Monotonic timestamp source, scaled to nanoseconds. Clamps to the
//! previous reading if the OS clock is ever observed to move backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics::Metrics;

pub struct Clock {
    last_ns: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Self { last_ns: AtomicU64::new(0) }
    }

    fn raw_now_ns() -> u64 {
        let ts = nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC)
            .expect("CLOCK_MONOTONIC should always be available");
        ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64
    }

    /// Returns the current time in nanoseconds, never earlier than the
    /// previous value returned.
    pub fn now_ns(&self, metrics: &Metrics) -> u64 {
        let now = Self::raw_now_ns();
        let mut last = self.last_ns.load(Ordering::Relaxed);
        loop {
            if now <= last {
                if now < last {
                    metrics.inc_clock_backwards();
                }
                return last;
            }
            match self.last_ns.compare_exchange_weak(last, now, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return now,
                Err(observed) => last = observed,
            }
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
