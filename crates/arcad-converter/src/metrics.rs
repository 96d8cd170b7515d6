//! Conversion counters and duration percentiles for the health endpoint.
//!
//! Counters are atomics; recent durations live in a bounded ring behind a
//! mutex.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum number of duration samples to keep in memory.
const MAX_DURATION_SAMPLES: usize = 1000;

/// Conversion metrics collector, shared by all in-flight requests.
#[derive(Debug, Default)]
pub struct ConversionMetrics {
    /// Blender processes spawned.
    pub conversions_started: AtomicU64,
    /// Conversions that returned a GLB.
    pub conversions_succeeded: AtomicU64,
    /// Conversions that failed after admission (includes timeouts).
    pub conversions_failed: AtomicU64,
    /// Conversions killed by the wall-clock limit.
    pub conversions_timed_out: AtomicU64,
    /// Conversions cancelled by shutdown.
    pub conversions_cancelled: AtomicU64,
    /// Requests turned away because every slot was busy.
    pub rejected_at_capacity: AtomicU64,
    /// Requests that found no Blender executable.
    pub tool_missing: AtomicU64,
    /// Total bytes of staged input.
    pub total_input_bytes: AtomicU64,
    /// Total bytes of GLB output returned.
    pub total_output_bytes: AtomicU64,
    duration_samples: Mutex<VecDeque<Duration>>,
}

impl ConversionMetrics {
    /// Create a new empty metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spawned conversion and its input size.
    pub fn record_started(&self, input_bytes: u64) {
        self.conversions_started.fetch_add(1, Ordering::Relaxed);
        self.total_input_bytes.fetch_add(input_bytes, Ordering::Relaxed);
    }

    /// Record a successful conversion with its duration and output size.
    pub fn record_success(&self, duration: Duration, output_bytes: u64) {
        self.conversions_succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_output_bytes.fetch_add(output_bytes, Ordering::Relaxed);
        self.add_duration_sample(duration);
    }

    /// Record a failed conversion.
    pub fn record_failure(&self) {
        self.conversions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timed-out conversion.
    pub fn record_timeout(&self) {
        self.conversions_timed_out.fetch_add(1, Ordering::Relaxed);
        self.conversions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancelled conversion.
    pub fn record_cancelled(&self) {
        self.conversions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected for lack of a slot.
    pub fn record_rejected(&self) {
        self.rejected_at_capacity.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that found no Blender executable.
    pub fn record_tool_missing(&self) {
        self.tool_missing.fetch_add(1, Ordering::Relaxed);
    }

    fn add_duration_sample(&self, duration: Duration) {
        if let Ok(mut samples) = self.duration_samples.lock() {
            if samples.len() >= MAX_DURATION_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(duration);
        }
    }

    /// Get the current snapshot of metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut durations: Vec<Duration> = self
            .duration_samples
            .lock()
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        durations.sort();

        MetricsSnapshot {
            conversions_started: self.conversions_started.load(Ordering::Relaxed),
            conversions_succeeded: self.conversions_succeeded.load(Ordering::Relaxed),
            conversions_failed: self.conversions_failed.load(Ordering::Relaxed),
            conversions_timed_out: self.conversions_timed_out.load(Ordering::Relaxed),
            conversions_cancelled: self.conversions_cancelled.load(Ordering::Relaxed),
            rejected_at_capacity: self.rejected_at_capacity.load(Ordering::Relaxed),
            tool_missing: self.tool_missing.load(Ordering::Relaxed),
            total_input_bytes: self.total_input_bytes.load(Ordering::Relaxed),
            total_output_bytes: self.total_output_bytes.load(Ordering::Relaxed),
            duration_p50_ms: percentile_ms(&durations, 50),
            duration_p95_ms: percentile_ms(&durations, 95),
            duration_p99_ms: percentile_ms(&durations, 99),
            sample_count: durations.len() as u64,
        }
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile_ms(sorted: &[Duration], pct: usize) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (sorted.len() - 1) * pct / 100;
    sorted.get(idx).map(|d| d.as_millis() as u64)
}

/// A point-in-time snapshot of conversion metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Blender processes spawned.
    pub conversions_started: u64,
    /// Successful conversions.
    pub conversions_succeeded: u64,
    /// Failed conversions.
    pub conversions_failed: u64,
    /// Timed-out conversions.
    pub conversions_timed_out: u64,
    /// Cancelled conversions.
    pub conversions_cancelled: u64,
    /// Requests rejected at capacity.
    pub rejected_at_capacity: u64,
    /// Requests with no Blender available.
    pub tool_missing: u64,
    /// Total input bytes.
    pub total_input_bytes: u64,
    /// Total output bytes.
    pub total_output_bytes: u64,
    /// P50 conversion duration in milliseconds.
    pub duration_p50_ms: Option<u64>,
    /// P95 conversion duration in milliseconds.
    pub duration_p95_ms: Option<u64>,
    /// P99 conversion duration in milliseconds.
    pub duration_p99_ms: Option<u64>,
    /// Number of duration samples collected.
    pub sample_count: u64,
}
