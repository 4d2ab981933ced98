//! Shared counters for the /health endpoint.
//! Updated by the cache-aside fetcher and the job store.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct HealthState {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Fetches that still failed after the retry.
    upstream_failures: AtomicU64,
    jobs_in_flight: AtomicU64,
    jobs_failed: AtomicU64,
}

/// Point-in-time copy of the counters, as served on /health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub upstream_failures: u64,
    pub jobs_in_flight: u64,
    pub jobs_failed: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_failures(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_started(&self) {
        self.jobs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_finished(&self, ok: bool) {
        self.jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
        if !ok {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            jobs_in_flight: self.jobs_in_flight.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}
