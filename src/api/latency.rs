//! In-memory histogram of end-to-end run durations.

use std::sync::Mutex;
use std::time::Duration;

/// Orchestrator records, API reads. Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Tracks 1ms to 1h, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().clamp(1, 3_600_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(ms);
        }
    }

    /// Return (p50_ms, p95_ms, p99_ms). None if no samples.
    pub fn percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let Ok(h) = self.inner.lock() else {
            return (None, None, None);
        };
        if h.len() == 0 {
            return (None, None, None);
        }
        (
            Some(h.value_at_quantile(0.5)),
            Some(h.value_at_quantile(0.95)),
            Some(h.value_at_quantile(0.99)),
        )
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let s = LatencyStats::new();
        assert_eq!(s.percentiles(), (None, None, None));
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn durations_are_recorded_in_ms() {
        let s = LatencyStats::new();
        for ms in [100, 200, 300, 400, 5_000] {
            s.record(Duration::from_millis(ms));
        }
        s.record(Duration::from_micros(10));
        let (p50, _, p99) = s.percentiles();
        assert_eq!(s.len(), 6);
        assert!((199..=201).contains(&p50.unwrap()));
        assert!(p99.unwrap() >= 4_990);
    }
}
