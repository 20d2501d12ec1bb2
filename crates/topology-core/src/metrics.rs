//! Process-wide atomic counters.
//!
//! Call sites increment silently; [`Metrics::flush`] emits every value as a
//! single `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    executions_started: AtomicU64,
    executions_failed: AtomicU64,
    notifications_published: AtomicU64,
    traffic_increments: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            executions_started: AtomicU64::new(0),
            executions_failed: AtomicU64::new(0),
            notifications_published: AtomicU64::new(0),
            traffic_increments: AtomicU64::new(0),
        }
    }

    pub fn inc_executions_started(&self) {
        self.executions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_started", "counter incremented");
    }

    pub fn inc_executions_failed(&self) {
        self.executions_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_failed", "counter incremented");
    }

    pub fn inc_notifications_published(&self) {
        self.notifications_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notifications_published", "counter incremented");
    }

    pub fn inc_traffic_increments(&self) {
        self.traffic_increments.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "traffic_increments", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            executions_started = self.executions_started(),
            executions_failed = self.executions_failed(),
            notifications_published = self.notifications_published(),
            traffic_increments = self.traffic_increments(),
        );
    }

    pub fn executions_started(&self) -> u64 {
        self.executions_started.load(Ordering::Relaxed)
    }

    pub fn executions_failed(&self) -> u64 {
        self.executions_failed.load(Ordering::Relaxed)
    }

    pub fn notifications_published(&self) -> u64 {
        self.notifications_published.load(Ordering::Relaxed)
    }

    pub fn traffic_increments(&self) -> u64 {
        self.traffic_increments.load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.executions_started.store(0, Ordering::Relaxed);
        self.executions_failed.store(0, Ordering::Relaxed);
        self.notifications_published.store(0, Ordering::Relaxed);
        self.traffic_increments.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let m = Metrics::new();
        m.inc_executions_started();
        m.inc_executions_started();
        m.inc_executions_failed();
        m.inc_traffic_increments();
        assert_eq!(m.executions_started(), 2);
        assert_eq!(m.executions_failed(), 1);
        assert_eq!(m.notifications_published(), 0);
        assert_eq!(m.traffic_increments(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_executions_started();
        m.inc_notifications_published();
        m.reset();
        assert_eq!(m.executions_started(), 0);
        assert_eq!(m.notifications_published(), 0);
    }
}
