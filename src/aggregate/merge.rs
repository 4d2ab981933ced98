use rust_decimal::Decimal;
use tracing::debug;

use crate::aggregate::bucket::DailyBucket;
use crate::types::ReportRow;

/// Join daily rewards with daily prices into report rows, oldest day first.
///
/// Only days with rewards produce a row. A day with no price gets a zero price
/// and therefore zero fiat earnings instead of failing the whole report.
pub fn merge(rewards: &DailyBucket, prices: &DailyBucket, token_divisor: u64) -> Vec<ReportRow> {
    let divisor = Decimal::from(token_divisor.max(1));
    let mut price_gaps = 0usize;

    let mut rows: Vec<ReportRow> = rewards
        .iter()
        .map(|(day, earned)| {
            let price = prices.get(day).copied().unwrap_or_else(|| {
                price_gaps += 1;
                Decimal::ZERO
            });
            let tokens = *earned / divisor;
            ReportRow {
                date: day.format("%Y-%m-%d").to_string(),
                earnings_fiat: tokens * price,
                tokens_earned: tokens,
                price_that_day: price,
            }
        })
        .collect();

    // Stable, and by the ISO string so the order holds whatever map type fed us.
    rows.sort_by(|a, b| a.date.cmp(&b.date));

    if price_gaps > 0 {
        debug!(price_gaps, days = rows.len(), "[MERGE] reward days without a price");
    }
    rows
}
