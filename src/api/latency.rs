//! Upstream fetch latency histogram.
//! Every network attempt made by the cache-aside fetcher is recorded, cache hits are not.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

impl LatencyStats {
    /// Tracks 1ms to 10 minutes, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        // Sub-millisecond attempts still count as one sample at the lower bound.
        let ms = (d.as_millis().min(u128::from(u64::MAX)) as u64).max(1);
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.saturating_record(ms);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.inner.lock() else {
            return LatencySummary {
                samples: 0,
                p50_ms: None,
                p95_ms: None,
                p99_ms: None,
            };
        };
        let samples = h.len();
        let at = |q: f64| (samples > 0).then(|| h.value_at_quantile(q));
        LatencySummary {
            samples,
            p50_ms: at(0.5),
            p95_ms: at(0.95),
            p99_ms: at(0.99),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
