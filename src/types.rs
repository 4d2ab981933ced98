use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Reward feed records
// ---------------------------------------------------------------------------

/// One reward payout to a hotspot owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEvent {
    pub account: String,
    /// Smallest on-chain denomination.
    pub amount: u64,
    /// Kept with the offset the feed reported; bucketing normalizes to UTC.
    pub timestamp: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotspot {
    #[serde(default)]
    pub name: String,
    pub address: String,
}

// ---------------------------------------------------------------------------
// Price feed records
// ---------------------------------------------------------------------------

/// A `[unix_millis, value]` tuple from the price feed's chart arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "(i64, Decimal)")]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

impl TryFrom<(i64, Decimal)> for PricePoint {
    type Error = String;

    fn try_from((millis, price): (i64, Decimal)) -> std::result::Result<Self, Self::Error> {
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| format!("timestamp out of range: {millis}"))?;
        Ok(Self { timestamp, price })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Coin {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Report output
// ---------------------------------------------------------------------------

/// One day of the earnings report. Wire names match what the browser client reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    /// `YYYY-MM-DD`; lexicographic order is chronological order.
    pub date: String,
    #[serde(rename = "earnings", with = "rust_decimal::serde::float")]
    pub earnings_fiat: Decimal,
    #[serde(rename = "tokens", with = "rust_decimal::serde::float")]
    pub tokens_earned: Decimal,
    #[serde(rename = "price", with = "rust_decimal::serde::float")]
    pub price_that_day: Decimal,
}

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

/// Half-open `[start, end)` range of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A UK tax year: 6 April 00:00 London time to the next 6 April 00:00.
/// Both boundaries always fall inside British Summer Time (UTC+1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaxPeriod {
    pub year: i32,
    window: TimeWindow,
}

impl TaxPeriod {
    pub fn new(year: i32, min_year: i32, max_year: i32) -> Result<Self> {
        if year < min_year || year > max_year {
            return Err(AppError::Validation(format!(
                "{year} is not a supported tax year ({min_year}-{max_year})"
            )));
        }
        let start = london_april_sixth(year)?;
        let end = london_april_sixth(year + 1)?;
        Ok(Self {
            year,
            window: TimeWindow { start, end },
        })
    }

    /// Parses the `year` path/query segment.
    pub fn parse(raw: &str, min_year: i32, max_year: i32) -> Result<Self> {
        let year = raw
            .trim()
            .parse::<i32>()
            .map_err(|_| AppError::Validation(format!("{raw:?} is not a year")))?;
        Self::new(year, min_year, max_year)
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }
}

fn london_april_sixth(year: i32) -> Result<DateTime<Utc>> {
    let bst = FixedOffset::east_opt(3_600)
        .ok_or_else(|| AppError::Validation("invalid BST offset".to_string()))?;
    bst.with_ymd_and_hms(year, 4, 6, 0, 0, 0)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AppError::Validation(format!("no 6 April in year {year}")))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Identity of one report computation: an account over one tax year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub account: String,
    pub year: i32,
}

impl JobKey {
    pub fn new(account: impl Into<String>, period: &TaxPeriod) -> Self {
        Self {
            account: account.into(),
            year: period.year,
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.account, self.year)
    }
}
