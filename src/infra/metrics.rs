//! Lock-free relay metrics and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Counters are monotonic; only the fetch latency histogram and its
//! sum/max are reset by `report()`.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Fetch latency bucket boundaries (milliseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Poll ticks started (monotonic)
    ticks_total: AtomicU64,
    /// Feed fetches that failed (monotonic)
    fetch_errors_total: AtomicU64,
    /// Fetch latency histogram (reset on report)
    fetch_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    fetch_latency_sum_ms: AtomicU64,
    fetch_latency_max_ms: AtomicU64,
    fetches_since_report: AtomicU64,
    /// Rows received from the feed
    rows_total: AtomicU64,
    /// Rows rejected by the classifier
    rows_skipped_total: AtomicU64,
    /// Rows with an unknown row mode
    rows_unrecognized_total: AtomicU64,
    /// Novel passings handed to the forwarder
    passings_novel_total: AtomicU64,
    /// Passings suppressed by the dedup window
    passings_suppressed_total: AtomicU64,
    /// Passings accepted by the downstream API
    passings_forwarded_total: AtomicU64,
    status_novel_total: AtomicU64,
    status_suppressed_total: AtomicU64,
    status_forwarded_total: AtomicU64,
    /// Novel events dropped because their device is not allow-listed
    not_allowed_total: AtomicU64,
    /// Forward calls that failed or timed out
    forward_errors_total: AtomicU64,
    allow_list_refreshes_total: AtomicU64,
    allow_list_refresh_errors_total: AtomicU64,
    /// Current allow-list size (gauge)
    allow_list_size: AtomicU64,
    /// Current dedup window sizes (gauges)
    passing_window_size: AtomicU64,
    status_window_size: AtomicU64,
    /// Last report time (reporter and /metrics)
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            fetch_errors_total: AtomicU64::new(0),
            fetch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            fetch_latency_sum_ms: AtomicU64::new(0),
            fetch_latency_max_ms: AtomicU64::new(0),
            fetches_since_report: AtomicU64::new(0),
            rows_total: AtomicU64::new(0),
            rows_skipped_total: AtomicU64::new(0),
            rows_unrecognized_total: AtomicU64::new(0),
            passings_novel_total: AtomicU64::new(0),
            passings_suppressed_total: AtomicU64::new(0),
            passings_forwarded_total: AtomicU64::new(0),
            status_novel_total: AtomicU64::new(0),
            status_suppressed_total: AtomicU64::new(0),
            status_forwarded_total: AtomicU64::new(0),
            not_allowed_total: AtomicU64::new(0),
            forward_errors_total: AtomicU64::new(0),
            allow_list_refreshes_total: AtomicU64::new(0),
            allow_list_refresh_errors_total: AtomicU64::new(0),
            allow_list_size: AtomicU64::new(0),
            passing_window_size: AtomicU64::new(0),
            status_window_size: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fetch_error(&self) {
        self.fetch_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful feed fetch with its latency
    #[inline]
    pub fn record_fetch_latency(&self, latency_ms: u64) {
        self.fetches_since_report.fetch_add(1, Ordering::Relaxed);
        self.fetch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.fetch_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.fetch_latency_max_ms, latency_ms);
    }

    /// Record classifier outcome for one payload
    #[inline]
    pub fn record_rows(&self, rows: usize, skipped: usize, unrecognized: usize) {
        self.rows_total.fetch_add(rows as u64, Ordering::Relaxed);
        self.rows_skipped_total.fetch_add(skipped as u64, Ordering::Relaxed);
        self.rows_unrecognized_total.fetch_add(unrecognized as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_passings_dedup(&self, novel: usize, suppressed: usize) {
        self.passings_novel_total.fetch_add(novel as u64, Ordering::Relaxed);
        self.passings_suppressed_total.fetch_add(suppressed as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_status_dedup(&self, novel: usize, suppressed: usize) {
        self.status_novel_total.fetch_add(novel as u64, Ordering::Relaxed);
        self.status_suppressed_total.fetch_add(suppressed as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_passings_forwarded(&self, count: usize) {
        self.passings_forwarded_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_status_forwarded(&self) {
        self.status_forwarded_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_not_allowed(&self, count: usize) {
        self.not_allowed_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_forward_error(&self) {
        self.forward_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful allow-list refresh and the new list size
    #[inline]
    pub fn record_allow_list_refresh(&self, size: usize) {
        self.allow_list_refreshes_total.fetch_add(1, Ordering::Relaxed);
        self.allow_list_size.store(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_allow_list_refresh_error(&self) {
        self.allow_list_refresh_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_window_sizes(&self, passings: usize, statuses: usize) {
        self.passing_window_size.store(passings as u64, Ordering::Relaxed);
        self.status_window_size.store(statuses as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fetch_errors_total(&self) -> u64 {
        self.fetch_errors_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn forward_errors_total(&self) -> u64 {
        self.forward_errors_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn not_allowed_total(&self) -> u64 {
        self.not_allowed_total.load(Ordering::Relaxed)
    }

    /// Snapshot all counters and reset the fetch latency histogram
    pub fn report(&self) -> MetricsSummary {
        let fetch_count = self.fetches_since_report.swap(0, Ordering::Relaxed);
        let fetch_sum = self.fetch_latency_sum_ms.swap(0, Ordering::Relaxed);
        let fetch_max = self.fetch_latency_max_ms.swap(0, Ordering::Relaxed);
        let fetch_lat_buckets = swap_buckets(&self.fetch_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let ticks_total = self.ticks_total.load(Ordering::Relaxed);

        MetricsSummary {
            ticks_total,
            fetches_per_sec: if elapsed.as_secs_f64() > 0.0 {
                fetch_count as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            },
            fetch_errors_total: self.fetch_errors_total.load(Ordering::Relaxed),
            fetch_lat_buckets,
            fetch_lat_avg_ms: if fetch_count > 0 { fetch_sum / fetch_count } else { 0 },
            fetch_lat_max_ms: fetch_max,
            fetch_lat_p99_ms: percentile_from_buckets(&fetch_lat_buckets, 0.99),
            rows_total: self.rows_total.load(Ordering::Relaxed),
            rows_skipped_total: self.rows_skipped_total.load(Ordering::Relaxed),
            rows_unrecognized_total: self.rows_unrecognized_total.load(Ordering::Relaxed),
            passings_novel_total: self.passings_novel_total.load(Ordering::Relaxed),
            passings_suppressed_total: self.passings_suppressed_total.load(Ordering::Relaxed),
            passings_forwarded_total: self.passings_forwarded_total.load(Ordering::Relaxed),
            status_novel_total: self.status_novel_total.load(Ordering::Relaxed),
            status_suppressed_total: self.status_suppressed_total.load(Ordering::Relaxed),
            status_forwarded_total: self.status_forwarded_total.load(Ordering::Relaxed),
            not_allowed_total: self.not_allowed_total.load(Ordering::Relaxed),
            forward_errors_total: self.forward_errors_total.load(Ordering::Relaxed),
            allow_list_refreshes_total: self.allow_list_refreshes_total.load(Ordering::Relaxed),
            allow_list_refresh_errors_total: self
                .allow_list_refresh_errors_total
                .load(Ordering::Relaxed),
            allow_list_size: self.allow_list_size.load(Ordering::Relaxed),
            passing_window_size: self.passing_window_size.load(Ordering::Relaxed),
            status_window_size: self.status_window_size.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the relay metrics
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub fetches_per_sec: f64,
    pub fetch_errors_total: u64,
    pub fetch_lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub fetch_lat_avg_ms: u64,
    pub fetch_lat_max_ms: u64,
    pub fetch_lat_p99_ms: u64,
    pub rows_total: u64,
    pub rows_skipped_total: u64,
    pub rows_unrecognized_total: u64,
    pub passings_novel_total: u64,
    pub passings_suppressed_total: u64,
    pub passings_forwarded_total: u64,
    pub status_novel_total: u64,
    pub status_suppressed_total: u64,
    pub status_forwarded_total: u64,
    pub not_allowed_total: u64,
    pub forward_errors_total: u64,
    pub allow_list_refreshes_total: u64,
    pub allow_list_refresh_errors_total: u64,
    pub allow_list_size: u64,
    pub passing_window_size: u64,
    pub status_window_size: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks = %self.ticks_total,
            fetches_per_sec = format!("{:.2}", self.fetches_per_sec),
            fetch_errors = %self.fetch_errors_total,
            fetch_avg_ms = %self.fetch_lat_avg_ms,
            fetch_p99_ms = %self.fetch_lat_p99_ms,
            rows = %self.rows_total,
            rows_skipped = %self.rows_skipped_total,
            passings_forwarded = %self.passings_forwarded_total,
            status_forwarded = %self.status_forwarded_total,
            not_allowed = %self.not_allowed_total,
            forward_errors = %self.forward_errors_total,
            allow_list_size = %self.allow_list_size,
            passing_window = %self.passing_window_size,
            status_window = %self.status_window_size,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(10), 0);
        assert_eq!(bucket_index(11), 1);
        assert_eq!(bucket_index(5120), 9);
        assert_eq!(bucket_index(99_999), 10);
    }

    #[test]
    fn test_record_fetch_latency_and_report_resets() {
        let metrics = Metrics::new();

        metrics.record_fetch_latency(15);
        metrics.record_fetch_latency(45);

        let summary = metrics.report();
        assert_eq!(summary.fetch_lat_avg_ms, 30);
        assert_eq!(summary.fetch_lat_max_ms, 45);
        assert_eq!(summary.fetch_lat_buckets[1], 1);
        assert_eq!(summary.fetch_lat_buckets[3], 1);

        let second = metrics.report();
        assert_eq!(second.fetch_lat_avg_ms, 0);
        assert_eq!(second.fetch_lat_buckets.iter().sum::<u64>(), 0);
    }

    #[test]
    fn test_counters_are_monotonic() {
        let metrics = Metrics::new();

        metrics.record_tick();
        metrics.record_rows(5, 1, 1);
        metrics.record_passings_dedup(2, 3);
        metrics.record_not_allowed(1);
        metrics.report();

        let summary = metrics.report();
        assert_eq!(summary.ticks_total, 1);
        assert_eq!(summary.rows_total, 5);
        assert_eq!(summary.passings_suppressed_total, 3);
        assert_eq!(summary.not_allowed_total, 1);
    }

    #[test]
    fn test_allow_list_gauge() {
        let metrics = Metrics::new();

        metrics.record_allow_list_refresh(4);
        metrics.record_allow_list_refresh(2);

        let summary = metrics.report();
        assert_eq!(summary.allow_list_refreshes_total, 2);
        assert_eq!(summary.allow_list_size, 2);
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile_from_buckets(&[0; METRICS_NUM_BUCKETS], 0.99), 0);
    }
}
