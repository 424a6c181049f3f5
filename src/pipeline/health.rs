//! Per-engine counters.
//!
//! All fields use relaxed atomics; readers get a consistent-enough snapshot
//! for diagnostics. The counters make a backpressure stall (full sample
//! queue) distinguishable from a hung receiver (no packets arriving).

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for one reconstruction engine.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    /// Packets accepted from the receiver.
    packets_received: AtomicU64,

    /// Packets lost, arrived too late, or discarded during reassembly.
    packets_dropped: AtomicU64,

    /// Samples reassembled and handed to the dispatch queue.
    samples_emitted: AtomicU64,

    /// Samples fanned out to the attached stages.
    samples_delivered: AtomicU64,

    /// Total payload bytes delivered.
    bytes_delivered: AtomicU64,

    /// Stage write calls that returned an error.
    write_failures: AtomicU64,

    /// Transient receiver read faults (logged and retried).
    read_errors: AtomicU64,

    /// Times ingest found the sample queue full and had to wait.
    backpressure_stalls: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.packets_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.samples_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, size: usize) {
        self.samples_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    pub fn samples_emitted(&self) -> u64 {
        self.samples_emitted.load(Ordering::Relaxed)
    }

    pub fn samples_delivered(&self) -> u64 {
        self.samples_delivered.load(Ordering::Relaxed)
    }

    pub fn bytes_delivered(&self) -> u64 {
        self.bytes_delivered.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    pub fn backpressure_stalls(&self) -> u64 {
        self.backpressure_stalls.load(Ordering::Relaxed)
    }

    /// One-line summary for periodic stats reports.
    pub fn summary(&self) -> String {
        format!(
            "packets={} dropped={} emitted={} delivered={} bytes={} write_failures={} read_errors={} backpressure={}",
            self.packets_received(),
            self.packets_dropped(),
            self.samples_emitted(),
            self.samples_delivered(),
            self.bytes_delivered(),
            self.write_failures(),
            self.read_errors(),
            self.backpressure_stalls(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let health = PipelineHealth::new();
        health.record_packet();
        health.record_packet();
        health.record_dropped(3);
        health.record_emitted();
        health.record_delivered(128);
        health.record_write_failure();
        health.record_backpressure();

        assert_eq!(health.packets_received(), 2);
        assert_eq!(health.packets_dropped(), 3);
        assert_eq!(health.samples_emitted(), 1);
        assert_eq!(health.samples_delivered(), 1);
        assert_eq!(health.bytes_delivered(), 128);
        assert_eq!(health.write_failures(), 1);
        assert_eq!(health.backpressure_stalls(), 1);
    }

    #[test]
    fn test_summary_mentions_backpressure() {
        let health = PipelineHealth::new();
        health.record_backpressure();
        assert!(health.summary().contains("backpressure=1"));
    }
}
