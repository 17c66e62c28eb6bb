use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters for the tracer's hot path. All fields are atomic
/// since they are updated from every traced thread without a lock.
#[derive(Default)]
pub struct Metrics {
    pub events_emitted_total: AtomicU64,
    pub events_ignored_total: AtomicU64,
    pub codepoints_interned_total: AtomicU64,
    pub depth_overflows_total: AtomicU64,
    pub render_failures_total: AtomicU64,
    pub io_errors_total: AtomicU64,
    pub time_index_entries_total: AtomicU64,
    pub clock_backwards_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_events_emitted(&self) {
        self.events_emitted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_ignored(&self) {
        self.events_ignored_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_codepoints_interned(&self) {
        self.codepoints_interned_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_depth_overflow(&self) {
        self.depth_overflows_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_render_failure(&self) {
        self.render_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_io_error(&self) {
        self.io_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_time_index_entry(&self) {
        self.time_index_entries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_clock_backwards(&self) {
        self.clock_backwards_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted_total.load(Ordering::Relaxed)
    }

    pub fn io_errors(&self) -> u64 {
        self.io_errors_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let m = Metrics::new();
        assert_eq!(m.events_emitted(), 0);
        m.inc_events_emitted();
        m.inc_events_emitted();
        assert_eq!(m.events_emitted(), 2);
        m.inc_io_error();
        assert_eq!(m.io_errors(), 1);
    }
}
