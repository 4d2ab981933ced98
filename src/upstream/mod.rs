//! Clients for the external feeds. Each GET goes through the cache-aside
//! fetcher, so the URL built here is also the cache key.

pub mod coingecko;
pub mod helium;
pub mod solana;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{Coin, Hotspot, PricePoint, RewardEvent, TimeWindow};

pub use coingecko::CoinGeckoClient;
pub use helium::HeliumClient;
pub use solana::SolanaClient;

/// One page of rewards plus the cursor for the next one (`""` when done).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardPage {
    pub events: Vec<RewardEvent>,
    pub next_cursor: String,
}

#[async_trait]
pub trait RewardSource: Send + Sync {
    async fn account_hotspots(&self, account: &str) -> Result<Vec<Hotspot>>;

    async fn rewards_page(
        &self,
        hotspot: &str,
        window: TimeWindow,
        cursor: &str,
    ) -> Result<RewardPage>;
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price_history(
        &self,
        coin_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>>;

    async fn spot_price(&self, coin_id: &str) -> Result<Decimal>;

    async fn list_coins(&self) -> Result<Vec<Coin>>;

    /// Fiat currency code every price is quoted in.
    fn currency(&self) -> &str;
}
