mod aggregate;
mod api;
mod cache;
mod config;
mod error;
mod jobs;
mod types;
mod upstream;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::aggregate::ReportService;
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::cache::{CachedFetcher, MemoryCache, ReqwestTransport};
use crate::config::{Config, TokenRegistry, REWARD_DIVISOR, SWEEP_INTERVAL_SECS};
use crate::error::Result;
use crate::jobs::JobStore;
use crate::upstream::{CoinGeckoClient, HeliumClient, SolanaClient};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let registry = TokenRegistry::default();

    // --- Cache-aside fetch layer shared by every upstream GET ---
    let cache = MemoryCache::new();
    let transport = Arc::new(ReqwestTransport::new(cfg.fetch_timeout)?);
    let fetcher = Arc::new(CachedFetcher::new(
        transport,
        cache.clone(),
        cfg.url_cache_ttl,
        cfg.retry_backoff,
        Arc::clone(&health),
        Arc::clone(&latency),
    ));

    // --- Upstream clients ---
    let helium = Arc::new(HeliumClient::new(Arc::clone(&fetcher), &cfg.helium_api_url));
    let coingecko = Arc::new(CoinGeckoClient::new(
        Arc::clone(&fetcher),
        &cfg.coingecko_api_url,
        &cfg.fiat_currency,
    ));
    let solana = Arc::new(SolanaClient::new(
        &cfg.solana_rpc_url,
        cfg.fetch_timeout,
        cache.clone(),
        cfg.result_cache_ttl,
        registry.clone(),
    )?);

    let reports = Arc::new(ReportService::new(
        helium,
        coingecko,
        registry,
        &cfg.reward_coin_id,
        REWARD_DIVISOR,
    ));
    let jobs = JobStore::new(cfg.result_cache_ttl, Arc::clone(&health));

    info!(
        "Upstreams: helium={} coingecko={} solana={} currency={}",
        cfg.helium_api_url, cfg.coingecko_api_url, cfg.solana_rpc_url, cfg.fiat_currency,
    );
    info!(
        "Cache TTLs: url={}s result={}s, fetch timeout={}s, tax years {}-{}",
        cfg.url_cache_ttl.as_secs(),
        cfg.result_cache_ttl.as_secs(),
        cfg.fetch_timeout.as_secs(),
        cfg.min_tax_year,
        cfg.max_tax_year,
    );

    // --- Spawn tasks ---

    // Expired cache entries (background, every 60s)
    let sweep_every = Duration::from_secs(SWEEP_INTERVAL_SECS);
    tokio::spawn(Arc::clone(&cache).run_sweeper(sweep_every));

    // Expired job results (background, every 60s)
    tokio::spawn(Arc::clone(&jobs).run_sweeper(sweep_every));

    // HTTP API server
    let api_state = ApiState {
        reports,
        jobs,
        solana,
        health,
        latency,
        min_tax_year: cfg.min_tax_year,
        max_tax_year: cfg.max_tax_year,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
