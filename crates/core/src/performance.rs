//! Call telemetry: counters, latency samples, and derived statistics.
//!
//! The monitor owns the accumulation buffer exclusively. `snapshot` and
//! `stats` derive from the same counters and sample set, so rates and
//! aggregates cannot drift apart. `record` never suspends and is safe from
//! concurrent callers.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The outcome of one adapted call, as reported by the caller.
#[derive(Debug, Clone, Copy)]
pub struct CallOutcome {
    pub success: bool,
    pub latency_ms: f64,
    pub cache_hit: bool,
}

/// Instantaneous snapshot over the current accumulation window.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Average latency over the window, in milliseconds.
    pub latency_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub concurrent_connections: usize,
    pub queue_length: usize,
}

/// Windowed aggregate recomputed from the accumulated sample set.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub p95_response_time: f64,
    pub p99_response_time: f64,
}

#[derive(Default)]
struct MonitorInner {
    total: u64,
    successful: u64,
    failed: u64,
    cache_hits: u64,
    samples: Vec<f64>,
}

/// Aggregates call outcomes from any number of concurrent callers.
#[derive(Default)]
pub struct PerformanceMonitor {
    inner: Mutex<MonitorInner>,
    inflight: AtomicUsize,
    queue_length: AtomicUsize,
}

impl PerformanceMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call outcome. Never suspends; no counts are lost under
    /// concurrent callers.
    pub fn record(&self, outcome: CallOutcome) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        if outcome.success {
            inner.successful += 1;
        } else {
            inner.failed += 1;
        }
        if outcome.cache_hit {
            inner.cache_hits += 1;
        }
        inner.samples.push(outcome.latency_ms);
    }

    /// Track an in-flight call; the guard decrements on drop.
    #[must_use]
    pub fn begin_call(&self) -> InflightGuard<'_> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        InflightGuard { monitor: self }
    }

    pub fn set_queue_length(&self, length: usize) {
        self.queue_length.store(length, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> PerformanceMetrics {
        let inner = self.inner.lock();

        PerformanceMetrics {
            latency_ms: average(&inner.samples),
            success_rate: ratio(inner.successful, inner.total),
            error_rate: ratio(inner.failed, inner.total),
            cache_hit_rate: ratio(inner.cache_hits, inner.total),
            concurrent_connections: self.inflight.load(Ordering::SeqCst),
            queue_length: self.queue_length.load(Ordering::SeqCst),
        }
    }

    #[must_use]
    pub fn stats(&self) -> PerformanceStats {
        let inner = self.inner.lock();
        let mut sorted = inner.samples.clone();
        sorted.sort_by(f64::total_cmp);

        PerformanceStats {
            total_requests: inner.total,
            successful_requests: inner.successful,
            failed_requests: inner.failed,
            average_response_time: average(&sorted),
            min_response_time: sorted.first().copied().unwrap_or(0.0),
            max_response_time: sorted.last().copied().unwrap_or(0.0),
            p95_response_time: nearest_rank(&sorted, 95.0),
            p99_response_time: nearest_rank(&sorted, 99.0),
        }
    }

    /// Clear the accumulation window. Gauges are unaffected.
    pub fn reset(&self) {
        *self.inner.lock() = MonitorInner::default();
    }
}

/// RAII handle for the concurrent-connections gauge.
pub struct InflightGuard<'a> {
    monitor: &'a PerformanceMonitor,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.monitor.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn average(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let len = samples.len() as f64;
    samples.iter().sum::<f64>() / len
}

/// Nearest-rank percentile over pre-sorted samples: 1-based
/// `rank = ceil(p/100 * n)`. Deterministic for a fixed sample set.
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = sorted.len() as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = ((percentile / 100.0 * n).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::{CallOutcome, PerformanceMonitor, nearest_rank};

    fn outcome(success: bool, latency_ms: f64) -> CallOutcome {
        CallOutcome {
            success,
            latency_ms,
            cache_hit: false,
        }
    }

    #[test]
    fn counters_stay_consistent() {
        let monitor = PerformanceMonitor::new();
        monitor.record(outcome(true, 10.0));
        monitor.record(outcome(true, 20.0));
        monitor.record(outcome(false, 30.0));

        let stats = monitor.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(
            stats.successful_requests + stats.failed_requests,
            stats.total_requests
        );
        assert!((stats.average_response_time - 20.0).abs() < f64::EPSILON);
        assert!((stats.min_response_time - 10.0).abs() < f64::EPSILON);
        assert!((stats.max_response_time - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_rates_derive_from_the_same_window() {
        let monitor = PerformanceMonitor::new();
        for i in 0..10 {
            monitor.record(CallOutcome {
                success: i % 2 == 0,
                latency_ms: 5.0,
                cache_hit: i < 3,
            });
        }

        let metrics = monitor.snapshot();
        assert!((metrics.success_rate + metrics.error_rate - 1.0).abs() < 1e-9);
        assert!((metrics.success_rate - 0.5).abs() < 1e-9);
        assert!((metrics.cache_hit_rate - 0.3).abs() < 1e-9);

        let stats = monitor.stats();
        assert_eq!(stats.total_requests, 10);
    }

    #[test]
    fn empty_window_reports_zeroes() {
        let monitor = PerformanceMonitor::new();
        let metrics = monitor.snapshot();
        assert!((metrics.success_rate).abs() < f64::EPSILON);
        assert!((metrics.error_rate).abs() < f64::EPSILON);

        let stats = monitor.stats();
        assert_eq!(stats.total_requests, 0);
        assert!((stats.p99_response_time).abs() < f64::EPSILON);
    }

    #[test]
    fn nearest_rank_is_exact_on_a_known_set() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!((nearest_rank(&sorted, 95.0) - 95.0).abs() < f64::EPSILON);
        assert!((nearest_rank(&sorted, 99.0) - 99.0).abs() < f64::EPSILON);
        assert!((nearest_rank(&sorted, 100.0) - 100.0).abs() < f64::EPSILON);

        let single = [42.0];
        assert!((nearest_rank(&single, 95.0) - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let monitor = PerformanceMonitor::new();
        for latency in [3.0, 120.0, 45.0, 9.0, 300.0, 7.5, 88.0, 1.0, 250.0, 60.0] {
            monitor.record(outcome(true, latency));
        }

        let stats = monitor.stats();
        assert!(stats.min_response_time <= stats.average_response_time);
        assert!(stats.average_response_time <= stats.max_response_time);
        assert!(stats.min_response_time <= stats.p95_response_time);
        assert!(stats.p95_response_time <= stats.p99_response_time);
        assert!(stats.p99_response_time <= stats.max_response_time);
    }

    #[test]
    fn concurrent_records_lose_no_counts() {
        let monitor = std::sync::Arc::new(PerformanceMonitor::new());
        let threads: u32 = 8;
        let per_thread: u32 = 1_000;

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let monitor = monitor.clone();
                scope.spawn(move || {
                    for i in 0..per_thread {
                        monitor.record(outcome(i % 2 == 0, f64::from(i)));
                    }
                });
            }
        });

        let stats = monitor.stats();
        assert_eq!(stats.total_requests, u64::from(threads) * u64::from(per_thread));
        assert_eq!(
            stats.successful_requests + stats.failed_requests,
            stats.total_requests
        );
    }

    #[test]
    fn inflight_gauge_tracks_guards() {
        let monitor = PerformanceMonitor::new();
        assert_eq!(monitor.snapshot().concurrent_connections, 0);
        {
            let _a = monitor.begin_call();
            let _b = monitor.begin_call();
            assert_eq!(monitor.snapshot().concurrent_connections, 2);
        }
        assert_eq!(monitor.snapshot().concurrent_connections, 0);

        monitor.set_queue_length(4);
        assert_eq!(monitor.snapshot().queue_length, 4);
    }

    #[test]
    fn reset_clears_the_window() {
        let monitor = PerformanceMonitor::new();
        monitor.record(outcome(true, 10.0));
        monitor.reset();
        assert_eq!(monitor.stats().total_requests, 0);
    }
}
