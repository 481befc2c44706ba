//! Fixed-bucket cumulative latency histogram (spec §3, §4.7, invariant 7).

use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket edges in milliseconds; the final bucket is implicitly `+Inf`.
pub const BUCKET_EDGES_MS: [f64; 11] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10_000.0,
];

/// A cumulative histogram: `buckets[i]` counts every observation
/// `<= BUCKET_EDGES_MS[i]`, and the trailing `+Inf` bucket counts all of
/// them, so bucket counts are non-decreasing by construction.
pub struct Histogram {
    buckets: [AtomicU64; BUCKET_EDGES_MS.len() + 1],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Histogram {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

/// A point-in-time read of the histogram's state, used by both the stats
/// snapshot and the Prometheus exporter.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Cumulative counts, one per entry in [`BUCKET_EDGES_MS`] plus a
    /// trailing `+Inf` bucket.
    pub cumulative_counts: Vec<u64>,
    pub sum_ms: f64,
    pub count: u64,
}

impl Histogram {
    pub fn observe(&self, duration_ms: f64) {
        for (i, edge) in BUCKET_EDGES_MS.iter().enumerate() {
            if duration_ms <= *edge {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        // +Inf bucket: always incremented.
        self.buckets[BUCKET_EDGES_MS.len()].fetch_add(1, Ordering::Relaxed);
        self.sum_ms
            .fetch_add(duration_ms.round() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            cumulative_counts: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            sum_ms: self.sum_ms.load(Ordering::Relaxed) as f64,
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_cumulative_and_match_total_count() {
        let h = Histogram::default();
        h.observe(3.0);
        h.observe(30.0);
        h.observe(20_000.0);
        let snap = h.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(*snap.cumulative_counts.last().unwrap(), snap.count);
        for window in snap.cumulative_counts.windows(2) {
            assert!(window[0] <= window[1]);
        }
    }

    #[test]
    fn sum_is_non_negative() {
        let h = Histogram::default();
        h.observe(12.5);
        assert!(h.snapshot().sum_ms >= 0.0);
    }
}
