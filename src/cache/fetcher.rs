use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::cache::store::CacheStore;
use crate::error::{AppError, Result};

/// One network attempt plus the single retry.
const MAX_ATTEMPTS: u32 = 2;

/// A bounded-timeout GET returning the raw body of a success response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(url.to_string())
            } else {
                AppError::Http(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Cache-aside reader: serve from cache, otherwise fetch (retrying once)
/// and populate the cache. The cache key is the full request URL.
pub struct CachedFetcher {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    retry_backoff: Duration,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl CachedFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
        retry_backoff: Duration,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            transport,
            cache,
            ttl,
            retry_backoff,
            health,
            latency,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        match self.cache.get(url).await {
            Ok(Some(body)) => {
                self.health.inc_cache_hits();
                debug!(url, "[FETCH] cache hit");
                return Ok(body);
            }
            Ok(None) => debug!(url, "[FETCH] cache miss"),
            Err(e) => warn!(url, "[FETCH] cache read failed, treating as miss: {e}"),
        }
        self.health.inc_cache_misses();

        let body = self.fetch_with_retry(url).await?;

        if let Err(e) = self.cache.set(url, body.clone(), self.ttl).await {
            warn!(url, "[FETCH] failed to cache response: {e}");
        }
        Ok(body)
    }

    /// Fetch and decode JSON. A body that does not decode is evicted so the
    /// next call goes back to the network instead of replaying it.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.fetch(url).await?;
        match serde_json::from_slice(&body) {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Err(evict) = self.cache.delete(url).await {
                    warn!(url, "[FETCH] failed to evict undecodable body: {evict}");
                }
                Err(AppError::Decode(format!("{url}: {e}")))
            }
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.transport.get(url).await;
            self.latency.record(started.elapsed());

            match result {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(url, attempt, "[FETCH] upstream failed, retrying: {e}");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => {
                    self.health.inc_upstream_failures();
                    warn!(url, attempt, "[FETCH] upstream failed, giving up: {e}");
                    return Err(e);
                }
            }
        }
    }
}
