// Per-transport metrics: connect attempts, active count, errors, and a
// rolling latency histogram. Grounded on the counter/rolling-window style of
// the teacher's connection-pool metrics (atomic counters guarded by a single
// lock around the bounded sample buffer).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

const LATENCY_SAMPLE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct TransportMetrics {
    pub connect_attempts: u64,
    pub active_connections: u64,
    pub error_count: u64,
    pub recent_latencies: Vec<Duration>,
}

/// Mutated only from inside the owning transport; observers only ever see a
/// `snapshot()`.
pub struct MetricsRecorder {
    connect_attempts: AtomicU64,
    active_connections: AtomicU64,
    error_count: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self {
            connect_attempts: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLE_CAPACITY)),
        }
    }
}

impl MetricsRecorder {
    pub fn record_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, latency: Duration) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        let mut latencies = self.latencies.lock();
        if latencies.len() == LATENCY_SAMPLE_CAPACITY {
            latencies.pop_front();
        }
        latencies.push_back(latency);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportMetrics {
        TransportMetrics {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            recent_latencies: self.latencies.lock().iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_window_is_bounded() {
        let recorder = MetricsRecorder::default();
        for i in 0..150 {
            recorder.record_success(Duration::from_millis(i));
        }
        assert_eq!(recorder.snapshot().recent_latencies.len(), LATENCY_SAMPLE_CAPACITY);
    }

    #[test]
    fn counters_accumulate() {
        let recorder = MetricsRecorder::default();
        recorder.record_attempt();
        recorder.record_attempt();
        recorder.record_error();
        let snap = recorder.snapshot();
        assert_eq!(snap.connect_attempts, 2);
        assert_eq!(snap.error_count, 1);
    }
}
