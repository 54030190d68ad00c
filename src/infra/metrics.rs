//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for detection cycle latency (milliseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic counters to get a consistent snapshot.
pub struct Metrics {
    /// Frames pulled from the source (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Frames that failed JPEG encoding (monotonic)
    encode_errors: AtomicU64,
    /// Detection cycles run (monotonic)
    cycles_total: AtomicU64,
    /// Detection cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Sum of cycle latencies in ms (reset on report)
    cycle_latency_sum_ms: AtomicU64,
    /// Max cycle latency in ms (reset on report)
    cycle_latency_max_ms: AtomicU64,
    /// Cycle latency histogram buckets (reset on report)
    cycle_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Cycle latency histogram buckets (cumulative, for Prometheus)
    cycle_latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Sum of all cycle latencies in ms (cumulative, for Prometheus)
    cycle_latency_sum_total_ms: AtomicU64,
    detector_errors: AtomicU64,
    reader_errors: AtomicU64,
    /// Plate candidates that passed normalization (monotonic)
    plates_seen: AtomicU64,
    events_granted: AtomicU64,
    events_denied: AtomicU64,
    suppressed_cooldown: AtomicU64,
    suppressed_dwell: AtomicU64,
    /// Registry or access log failures (monotonic)
    store_errors: AtomicU64,
    capture_errors: AtomicU64,
    notifications_dispatched: AtomicU64,
    /// Notifications dropped due to queue full (monotonic)
    notifications_dropped: AtomicU64,
    sms_sent: AtomicU64,
    sms_failed: AtomicU64,
    inapp_failed: AtomicU64,
    /// Live feed viewers currently connected
    viewers: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            cycle_latency_sum_ms: AtomicU64::new(0),
            cycle_latency_max_ms: AtomicU64::new(0),
            cycle_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            cycle_latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            cycle_latency_sum_total_ms: AtomicU64::new(0),
            detector_errors: AtomicU64::new(0),
            reader_errors: AtomicU64::new(0),
            plates_seen: AtomicU64::new(0),
            events_granted: AtomicU64::new(0),
            events_denied: AtomicU64::new(0),
            suppressed_cooldown: AtomicU64::new(0),
            suppressed_dwell: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            capture_errors: AtomicU64::new(0),
            notifications_dispatched: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            sms_sent: AtomicU64::new(0),
            sms_failed: AtomicU64::new(0),
            inapp_failed: AtomicU64::new(0),
            viewers: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_frame(&self) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed detection cycle with its latency (lock-free)
    #[inline]
    pub fn record_cycle(&self, latency_ms: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.cycle_latency_sum_total_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let bucket = bucket_index(latency_ms);
        self.cycle_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.cycle_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_detector_error(&self) {
        self.detector_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reader_error(&self) {
        self.reader_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_plate_seen(&self) {
        self.plates_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a logged access event
    #[inline]
    pub fn record_event_logged(&self, granted: bool) {
        if granted {
            self.events_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_suppressed_cooldown(&self) {
        self.suppressed_cooldown.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_suppressed_dwell(&self) {
        self.suppressed_dwell.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_capture_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_dispatched(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notification dropped due to queue full (lock-free)
    #[inline]
    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sms(&self, success: bool) {
        if success {
            self.sms_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sms_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_inapp_failed(&self) {
        self.inapp_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn viewer_connected(&self) {
        self.viewers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn viewer_disconnected(&self) {
        let _ = self.viewers.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    #[inline]
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_logged(&self) -> u64 {
        self.events_granted.load(Ordering::Relaxed) + self.events_denied.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_dropped(&self) -> u64 {
        self.notifications_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sms_sent(&self) -> u64 {
        self.sms_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sms_failed(&self) -> u64 {
        self.sms_failed.load(Ordering::Relaxed)
    }

    /// Load monotonic counters without resetting anything
    pub fn totals(&self) -> MetricsTotals {
        MetricsTotals {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycle_latency_buckets: load_buckets(&self.cycle_latency_buckets_total),
            cycle_latency_sum_ms: self.cycle_latency_sum_total_ms.load(Ordering::Relaxed),
            detector_errors: self.detector_errors.load(Ordering::Relaxed),
            reader_errors: self.reader_errors.load(Ordering::Relaxed),
            plates_seen: self.plates_seen.load(Ordering::Relaxed),
            events_granted: self.events_granted.load(Ordering::Relaxed),
            events_denied: self.events_denied.load(Ordering::Relaxed),
            suppressed_cooldown: self.suppressed_cooldown.load(Ordering::Relaxed),
            suppressed_dwell: self.suppressed_dwell.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            sms_sent: self.sms_sent.load(Ordering::Relaxed),
            sms_failed: self.sms_failed.load(Ordering::Relaxed),
            inapp_failed: self.inapp_failed.load(Ordering::Relaxed),
            viewers: self.viewers.load(Ordering::Relaxed),
        }
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let cycles_count = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.cycle_latency_sum_ms.swap(0, Ordering::Relaxed);
        let max_latency = self.cycle_latency_max_ms.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.cycle_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let fps = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if cycles_count > 0 { latency_sum / cycles_count } else { 0 };

        MetricsSummary {
            totals: self.totals(),
            fps,
            cycles: cycles_count,
            avg_cycle_latency_ms: avg_latency,
            max_cycle_latency_ms: max_latency,
            lat_buckets,
            lat_p50_ms: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_ms: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_ms: percentile_from_buckets(&lat_buckets, 0.99),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

/// Monotonic counter snapshot
#[derive(Debug, Clone)]
pub struct MetricsTotals {
    pub frames_total: u64,
    pub encode_errors: u64,
    pub cycles_total: u64,
    /// Cumulative cycle latency histogram
    /// Bounds: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120 ms
    pub cycle_latency_buckets: [u64; NUM_BUCKETS],
    pub cycle_latency_sum_ms: u64,
    pub detector_errors: u64,
    pub reader_errors: u64,
    pub plates_seen: u64,
    pub events_granted: u64,
    pub events_denied: u64,
    pub suppressed_cooldown: u64,
    pub suppressed_dwell: u64,
    pub store_errors: u64,
    pub capture_errors: u64,
    pub notifications_dispatched: u64,
    pub notifications_dropped: u64,
    pub sms_sent: u64,
    pub sms_failed: u64,
    pub inapp_failed: u64,
    pub viewers: u64,
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub totals: MetricsTotals,
    /// Frames per second since last report
    pub fps: f64,
    /// Detection cycles since last report
    pub cycles: u64,
    pub avg_cycle_latency_ms: u64,
    pub max_cycle_latency_ms: u64,
    /// Cycle latency histogram since last report
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_ms: u64,
    pub lat_p95_ms: u64,
    pub lat_p99_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.totals.frames_total,
            fps = format!("{:.1}", self.fps),
            cycles = %self.cycles,
            avg_cycle_ms = %self.avg_cycle_latency_ms,
            max_cycle_ms = %self.max_cycle_latency_ms,
            p95_cycle_ms = %self.lat_p95_ms,
            plates_seen = %self.totals.plates_seen,
            granted = %self.totals.events_granted,
            denied = %self.totals.events_denied,
            store_errors = %self.totals.store_errors,
            notify_dropped = %self.totals.notifications_dropped,
            sms_failed = %self.totals.sms_failed,
            viewers = %self.totals.viewers,
            "metrics"
        );
    }
}
