use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::cache::CachedFetcher;
use crate::error::{AppError, Result};
use crate::types::{Coin, PricePoint};

use super::PriceSource;

/// `market_chart/range` payload: three parallel series, only `prices` is used.
#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<PricePoint>,
    #[serde(default)]
    #[allow(dead_code)]
    market_caps: Vec<PricePoint>,
    #[serde(default)]
    #[allow(dead_code)]
    total_volumes: Vec<PricePoint>,
}

/// Price feed client for the CoinGecko v3 API.
pub struct CoinGeckoClient {
    fetcher: Arc<CachedFetcher>,
    base_url: String,
    currency: String,
}

impl CoinGeckoClient {
    pub fn new(
        fetcher: Arc<CachedFetcher>,
        base_url: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            currency: currency.into().to_lowercase(),
        }
    }

    fn history_url(&self, coin_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        format!(
            "{}/coins/{}/market_chart/range?vs_currency={}&from={}&to={}",
            self.base_url,
            coin_id,
            self.currency,
            from.timestamp(),
            to.timestamp()
        )
    }

    fn spot_url(&self, coin_id: &str) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.base_url, coin_id, self.currency
        )
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    async fn price_history(
        &self,
        coin_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        let chart: MarketChart = self
            .fetcher
            .fetch_json(&self.history_url(coin_id, from, to))
            .await?;
        debug!(coin_id, points = chart.prices.len(), "[COINGECKO] price history");
        Ok(chart.prices)
    }

    async fn spot_price(&self, coin_id: &str) -> Result<Decimal> {
        // {"helium": {"gbp": 1.23}}
        let quotes: HashMap<String, HashMap<String, Decimal>> =
            self.fetcher.fetch_json(&self.spot_url(coin_id)).await?;
        quotes
            .get(coin_id)
            .and_then(|by_currency| by_currency.get(&self.currency))
            .copied()
            .ok_or_else(|| {
                AppError::UnknownToken(format!("no {} price for {coin_id}", self.currency))
            })
    }

    async fn list_coins(&self) -> Result<Vec<Coin>> {
        self.fetcher
            .fetch_json(&format!("{}/coins/list", self.base_url))
            .await
    }

    fn currency(&self) -> &str {
        &self.currency
    }
}
