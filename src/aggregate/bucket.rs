use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

/// One accumulated value per UTC calendar day.
pub type DailyBucket = BTreeMap<NaiveDate, Decimal>;

/// The UTC calendar day an instant falls on, whatever offset it was reported in.
pub fn utc_day<Tz: TimeZone>(ts: &DateTime<Tz>) -> NaiveDate {
    ts.with_timezone(&Utc).date_naive()
}

/// Sum a series per UTC day. The result does not depend on input order.
pub fn bucket<T, Tz, F, V>(series: &[T], timestamp_of: F, value_of: V) -> DailyBucket
where
    Tz: TimeZone,
    F: Fn(&T) -> DateTime<Tz>,
    V: Fn(&T) -> Decimal,
{
    let mut days = DailyBucket::new();
    for item in series {
        *days.entry(utc_day(&timestamp_of(item))).or_insert(Decimal::ZERO) += value_of(item);
    }
    days
}

/// One observation per UTC day for level series such as prices: the last
/// observation of each day in input order wins.
pub fn latest_by_day<T, Tz, F, V>(series: &[T], timestamp_of: F, value_of: V) -> DailyBucket
where
    Tz: TimeZone,
    F: Fn(&T) -> DateTime<Tz>,
    V: Fn(&T) -> Decimal,
{
    series
        .iter()
        .map(|item| (utc_day(&timestamp_of(item)), value_of(item)))
        .collect()
}
