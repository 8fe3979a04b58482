//! Fixed-bucket latency histogram.

use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bucket boundaries in microseconds, sized for calls that cross the network.
const ROUTE_BUCKETS_US: [u64; 11] = [
    500, 1_000, 5_000, 10_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 5_000_000,
    10_000_000,
];

/// Lock-free histogram of latencies in microseconds.
pub struct Histogram {
    buckets: Vec<u64>,
    counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Histogram with the default route-latency buckets.
    pub fn route_latency() -> Self {
        Self::with_buckets(&ROUTE_BUCKETS_US)
    }

    /// Histogram with custom ascending bucket boundaries.
    pub fn with_buckets(boundaries: &[u64]) -> Self {
        Self {
            buckets: boundaries.to_vec(),
            counts: boundaries.iter().map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value_us: u64) {
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max.fetch_max(value_us, Ordering::Relaxed);

        // Values past the last boundary land in the last bucket.
        let index = self
            .buckets
            .iter()
            .position(|&boundary| value_us <= boundary)
            .unwrap_or_else(|| self.buckets.len().saturating_sub(1));
        if let Some(bucket) = self.counts.get(index) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    pub fn avg(&self) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        self.sum.load(Ordering::Relaxed) / count
    }

    /// Approximate percentile as the upper boundary of the bucket holding it.
    pub fn percentile(&self, p: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }

        let target = (total as f64 * p).ceil() as u64;
        let mut cumulative = 0u64;
        for (boundary, count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count.load(Ordering::Relaxed);
            if cumulative >= target {
                return *boundary;
            }
        }
        self.buckets.last().copied().unwrap_or(0)
    }

    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    pub fn reset(&self) {
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::route_latency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let hist = Histogram::route_latency();
        assert_eq!(hist.count(), 0);
        assert_eq!(hist.avg(), 0);
        assert_eq!(hist.p99(), 0);
    }

    #[test]
    fn test_percentiles() {
        let hist = Histogram::route_latency();
        for _ in 0..90 {
            hist.observe(300); // <= 500us
        }
        for _ in 0..10 {
            hist.observe(200_000); // <= 250ms
        }

        assert_eq!(hist.count(), 100);
        assert_eq!(hist.p50(), 500);
        assert_eq!(hist.p99(), 250_000);
        assert_eq!(hist.max(), 200_000);
        assert_eq!(hist.avg(), (90 * 300 + 10 * 200_000) / 100);
    }

    #[test]
    fn test_overflow_lands_in_last_bucket() {
        let hist = Histogram::with_buckets(&[10, 100]);
        hist.observe(5_000);
        assert_eq!(hist.p50(), 100);

        hist.reset();
        assert_eq!(hist.count(), 0);
        assert_eq!(hist.max(), 0);
    }
}
