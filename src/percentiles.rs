//! Latency Recorder: a fixed-size reservoir of per-request latencies plus
//! derived percentile statistics and an ASCII histogram.
//!
//! spec.md §4.9/§9 specify reservoir sampling explicitly, so — unlike the
//! teacher's `percentiles.rs`, which used `hdrhistogram` — this keeps the
//! teacher's `PercentileStats`/table-formatting idiom but backs it with
//! Algorithm R reservoir sampling (`rand`, a teacher dependency) over raw
//! microsecond durations rather than a bucketed histogram library.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

/// Derived statistics over a set of recorded latencies, in microseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PercentileStats {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p75_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
}

impl PercentileStats {
    pub fn format_table_row(&self) -> String {
        format!(
            "{:>8} {:>10} {:>10} {:>10.1} {:>10} {:>10} {:>10} {:>10} {:>10}",
            self.count,
            self.min_us,
            self.max_us,
            self.mean_us,
            self.p50_us,
            self.p75_us,
            self.p95_us,
            self.p99_us,
            self.p999_us,
        )
    }

    /// Render a fixed-width log-scale ASCII histogram: buckets are
    /// power-of-two microsecond boundaries, bar width capped at 20 columns.
    pub fn format_histogram(&self, samples: &[u64]) -> String {
        if samples.is_empty() {
            return String::from("(no samples)");
        }
        const BUCKETS: usize = 20;
        let mut counts = vec![0u64; BUCKETS];
        for &s in samples {
            let bucket = if s == 0 {
                0
            } else {
                (64 - s.leading_zeros() as usize).min(BUCKETS - 1)
            };
            counts[bucket] += 1;
        }
        let max_count = *counts.iter().max().unwrap_or(&1).max(&1);
        let mut out = String::new();
        for (i, &c) in counts.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let bar_len = ((c as f64 / max_count as f64) * 20.0).round() as usize;
            let lower = if i == 0 { 0 } else { 1u64 << (i - 1) };
            out.push_str(&format!(
                "  {:>8}us {:<20} {}\n",
                lower,
                "#".repeat(bar_len.max(1)),
                c
            ));
        }
        out
    }
}

/// Reservoir-sampled latency recorder. Holds at most `capacity` samples,
/// replacing a uniformly-random existing entry once the reservoir is full
/// (Algorithm R), so long-running tests don't grow memory unboundedly while
/// the retained sample stays a representative, unbiased subset.
pub struct LatencyRecorder {
    capacity: usize,
    samples: Mutex<Vec<u64>>,
    seen: Mutex<u64>,
}

impl LatencyRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: Mutex::new(Vec::with_capacity(capacity.max(1))),
            seen: Mutex::new(0),
        }
    }

    pub fn record(&self, latency: Duration) {
        self.record_us(latency.as_micros() as u64);
    }

    pub fn record_us(&self, us: u64) {
        let mut samples = self.samples.lock().expect("reservoir lock poisoned");
        let mut seen = self.seen.lock().expect("reservoir counter lock poisoned");
        *seen += 1;
        if samples.len() < self.capacity {
            samples.push(us);
        } else {
            let idx = rand::thread_rng().gen_range(0..*seen);
            if (idx as usize) < self.capacity {
                samples[idx as usize] = us;
            }
        }
    }

    pub fn samples(&self) -> Vec<u64> {
        self.samples.lock().expect("reservoir lock poisoned").clone()
    }

    pub fn stats(&self) -> PercentileStats {
        let mut samples = self.samples();
        if samples.is_empty() {
            return PercentileStats::default();
        }
        samples.sort_unstable();
        let count = samples.len() as u64;
        let sum: u64 = samples.iter().sum();
        PercentileStats {
            count,
            min_us: samples[0],
            max_us: samples[samples.len() - 1],
            mean_us: sum as f64 / count as f64,
            p50_us: percentile(&samples, 50.0),
            p75_us: percentile(&samples, 75.0),
            p95_us: percentile(&samples, 95.0),
            p99_us: percentile(&samples, 99.0),
            p999_us: percentile(&samples, 99.9),
        }
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}
