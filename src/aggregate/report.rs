use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::aggregate::bucket::{bucket, latest_by_day};
use crate::aggregate::collector::collect_account;
use crate::aggregate::merge::merge;
use crate::config::{TokenRegistry, COIN_ID_DENYLIST};
use crate::error::{AppError, Result};
use crate::types::{ReportRow, TaxPeriod};
use crate::upstream::{PriceSource, RewardSource};

/// Runs the full pipeline for an account: prices and rewards for the tax
/// year, bucketed by UTC day, merged into report rows.
pub struct ReportService {
    rewards: Arc<dyn RewardSource>,
    prices: Arc<dyn PriceSource>,
    registry: TokenRegistry,
    reward_coin_id: String,
    reward_divisor: u64,
}

impl ReportService {
    pub fn new(
        rewards: Arc<dyn RewardSource>,
        prices: Arc<dyn PriceSource>,
        registry: TokenRegistry,
        reward_coin_id: impl Into<String>,
        reward_divisor: u64,
    ) -> Self {
        Self {
            rewards,
            prices,
            registry,
            reward_coin_id: reward_coin_id.into(),
            reward_divisor,
        }
    }

    pub async fn compute_report(&self, account: &str, period: &TaxPeriod) -> Result<Vec<ReportRow>> {
        let window = period.window();

        let price_points = self
            .prices
            .price_history(&self.reward_coin_id, window.start, window.end)
            .await?;
        let prices = latest_by_day(&price_points, |p| p.timestamp, |p| p.price);

        let events = collect_account(self.rewards.as_ref(), account, window).await?;
        let rewards = bucket(&events, |e| e.timestamp, |e| Decimal::from(e.amount));

        let rows = merge(&rewards, &prices, self.reward_divisor);
        info!(
            account,
            year = period.year,
            events = events.len(),
            price_days = prices.len(),
            rows = rows.len(),
            "[REPORT] computed"
        );
        Ok(rows)
    }

    /// Current price of `ticker` in the price feed's currency.
    pub async fn spot_price(&self, ticker: &str) -> Result<Decimal> {
        let coin_id = self.resolve_coin_id(ticker).await?;
        self.prices.spot_price(&coin_id).await
    }

    pub fn currency(&self) -> &str {
        self.prices.currency()
    }

    /// Registry first; otherwise the feed's coin list by symbol.
    async fn resolve_coin_id(&self, ticker: &str) -> Result<String> {
        if let Some(token) = self.registry.get(ticker) {
            return Ok(token.coin_id.clone());
        }

        let symbol = ticker.to_lowercase();
        self.prices
            .list_coins()
            .await?
            .into_iter()
            .filter(|coin| !COIN_ID_DENYLIST.contains(&coin.id.as_str()))
            .filter(|coin| coin.symbol.eq_ignore_ascii_case(&symbol))
            .last()
            .map(|coin| coin.id)
            .ok_or_else(|| AppError::UnknownToken(ticker.to_string()))
    }
}
