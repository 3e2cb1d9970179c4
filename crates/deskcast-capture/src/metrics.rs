//! Per-stream counters.

use std::sync::atomic::{AtomicU64, Ordering};

use deskcast_types::StreamMetrics;

/// Lock-free counters updated from pipeline threads and stream operations.
#[derive(Debug, Default)]
pub struct StreamStats {
    samples_produced: AtomicU64,
    bytes_produced: AtomicU64,
    samples_delivered: AtomicU64,
    samples_dropped: AtomicU64,
    pipeline_starts: AtomicU64,
    pipeline_failures: AtomicU64,
}

impl StreamStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample leaving the pipeline.
    pub fn record_sample(&self, bytes: usize) {
        self.samples_produced.fetch_add(1, Ordering::Relaxed);
        self.bytes_produced.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a sample queued for a subscriber.
    pub fn record_delivered(&self) {
        self.samples_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample dropped on a full subscriber queue.
    pub fn record_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful pipeline construction.
    pub fn record_start(&self) {
        self.pipeline_starts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed pipeline construction.
    pub fn record_failure(&self) {
        self.pipeline_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot for the named stream.
    pub fn snapshot(&self, stream: &str, started: bool, subscribers: usize) -> StreamMetrics {
        StreamMetrics {
            stream: stream.to_string(),
            started,
            subscribers,
            samples_produced: self.samples_produced.load(Ordering::Relaxed),
            bytes_produced: self.bytes_produced.load(Ordering::Relaxed),
            samples_delivered: self.samples_delivered.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            pipeline_starts: self.pipeline_starts.load(Ordering::Relaxed),
            pipeline_failures: self.pipeline_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = StreamStats::new();
        stats.record_sample(100);
        stats.record_sample(50);
        stats.record_delivered();
        stats.record_dropped();
        stats.record_start();
        stats.record_failure();

        let snapshot = stats.snapshot("hd", true, 2);
        assert_eq!(snapshot.stream, "hd");
        assert!(snapshot.started);
        assert_eq!(snapshot.subscribers, 2);
        assert_eq!(snapshot.samples_produced, 2);
        assert_eq!(snapshot.bytes_produced, 150);
        assert_eq!(snapshot.samples_delivered, 1);
        assert_eq!(snapshot.samples_dropped, 1);
        assert_eq!(snapshot.pipeline_starts, 1);
        assert_eq!(snapshot.pipeline_failures, 1);
    }
}
