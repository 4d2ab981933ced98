use tracing::{debug, info};

use crate::error::Result;
use crate::types::{RewardEvent, TimeWindow};
use crate::upstream::RewardSource;

/// Follow the reward cursor for one hotspot until it comes back empty,
/// concatenating pages in the order they were served.
///
/// Pages are fetched strictly one after another. A feed that never returns an
/// empty cursor never terminates; the upstream contract is trusted here.
pub async fn collect_all(
    source: &dyn RewardSource,
    hotspot: &str,
    window: TimeWindow,
) -> Result<Vec<RewardEvent>> {
    let mut events = Vec::new();
    let mut cursor = String::new();
    let mut pages = 0usize;

    loop {
        let page = source.rewards_page(hotspot, window, &cursor).await?;
        pages += 1;
        events.extend(page.events);
        if page.next_cursor.is_empty() {
            break;
        }
        cursor = page.next_cursor;
    }

    debug!(hotspot, pages, events = events.len(), "[COLLECT] hotspot done");
    Ok(events)
}

/// Every reward earned by every hotspot the account owns, hotspot by hotspot.
pub async fn collect_account(
    source: &dyn RewardSource,
    account: &str,
    window: TimeWindow,
) -> Result<Vec<RewardEvent>> {
    let hotspots = source.account_hotspots(account).await?;
    let mut events = Vec::new();
    for hotspot in &hotspots {
        events.extend(collect_all(source, &hotspot.address, window).await?);
    }
    info!(
        account,
        hotspots = hotspots.len(),
        events = events.len(),
        "[COLLECT] account rewards collected"
    );
    Ok(events)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset};

    use crate::error::AppError;
    use crate::types::{Hotspot, TaxPeriod};
    use crate::upstream::RewardPage;

    pub(crate) fn reward(amount: u64, timestamp: &str) -> RewardEvent {
        RewardEvent {
            account: "acc".to_string(),
            amount,
            timestamp: DateTime::<FixedOffset>::parse_from_rfc3339(timestamp).unwrap(),
        }
    }

    /// Serves pages keyed by (hotspot, cursor).
    #[derive(Default)]
    pub(crate) struct PagedSource {
        pub(crate) hotspots: HashMap<String, Vec<Hotspot>>,
        pub(crate) pages: HashMap<(String, String), RewardPage>,
        pub(crate) requests: AtomicUsize,
    }

    impl PagedSource {
        pub(crate) fn page(mut self, hotspot: &str, cursor: &str, events: Vec<RewardEvent>, next: &str) -> Self {
            self.pages.insert(
                (hotspot.to_string(), cursor.to_string()),
                RewardPage {
                    events,
                    next_cursor: next.to_string(),
                },
            );
            self
        }

        pub(crate) fn owner(mut self, account: &str, addresses: &[&str]) -> Self {
            self.hotspots.insert(
                account.to_string(),
                addresses
                    .iter()
                    .map(|a| Hotspot {
                        name: String::new(),
                        address: a.to_string(),
                    })
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl RewardSource for PagedSource {
        async fn account_hotspots(&self, account: &str) -> Result<Vec<Hotspot>> {
            Ok(self.hotspots.get(account).cloned().unwrap_or_default())
        }

        async fn rewards_page(
            &self,
            hotspot: &str,
            _window: TimeWindow,
            cursor: &str,
        ) -> Result<RewardPage> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(&(hotspot.to_string(), cursor.to_string()))
                .cloned()
                .ok_or_else(|| AppError::Decode(format!("no page {hotspot}/{cursor}")))
        }
    }

    fn window() -> TimeWindow {
        TaxPeriod::new(2020, 2020, 2023).unwrap().window()
    }

    #[tokio::test]
    async fn concatenates_pages_until_cursor_is_empty() {
        let source = PagedSource::default()
            .page("hs1", "", vec![reward(1, "2020-04-10T00:00:00Z")], "c1")
            .page("hs1", "c1", vec![reward(2, "2020-04-11T00:00:00Z")], "c2")
            .page("hs1", "c2", vec![reward(3, "2020-04-12T00:00:00Z")], "");

        let events = collect_all(&source, "hs1", window()).await.unwrap();
        let amounts: Vec<u64> = events.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![1, 2, 3]);
        assert_eq!(source.requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_first_page_is_empty_result() {
        let source = PagedSource::default().page("hs1", "", vec![], "");
        let events = collect_all(&source, "hs1", window()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn page_error_propagates() {
        let source = PagedSource::default().page("hs1", "", vec![reward(1, "2020-04-10T00:00:00Z")], "missing");
        let err = collect_all(&source, "hs1", window()).await.unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[tokio::test]
    async fn account_collects_every_hotspot_in_order() {
        let source = PagedSource::default()
            .owner("acc", &["hs1", "hs2"])
            .page("hs1", "", vec![reward(1, "2020-04-10T00:00:00Z")], "")
            .page("hs2", "", vec![reward(2, "2020-04-10T00:00:00Z")], "n")
            .page("hs2", "n", vec![reward(3, "2020-04-11T00:00:00Z")], "");

        let events = collect_account(&source, "acc", window()).await.unwrap();
        let amounts: Vec<u64> = events.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn second_collection_replays_from_cache() {
        use std::sync::Arc;

        use crate::cache::fetcher::tests::{fetcher_with, ScriptedTransport};
        use crate::cache::MemoryCache;
        use crate::upstream::HeliumClient;

        let transport = Arc::new(ScriptedTransport::default());
        let helium = HeliumClient::new(
            Arc::new(fetcher_with(transport.clone(), MemoryCache::new())),
            "http://helium/v1",
        );
        let w = window();
        let ts = "2020-04-10T12:00:00Z";
        transport.push_ok(
            &helium.rewards_url("hs1", w, "").unwrap(),
            &format!(r#"{{"data":[{{"account":"a","amount":1,"timestamp":"{ts}"}}],"cursor":"next"}}"#),
        );
        transport.push_ok(
            &helium.rewards_url("hs1", w, "next").unwrap(),
            &format!(r#"{{"data":[{{"account":"a","amount":2,"timestamp":"{ts}"}}]}}"#),
        );

        let first = collect_all(&helium, "hs1", w).await.unwrap();
        let second = collect_all(&helium, "hs1", w).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(transport.calls(), 2, "second run must be served from cache");
    }

    #[tokio::test]
    async fn account_without_hotspots_has_no_rewards() {
        let source = PagedSource::default();
        let events = collect_account(&source, "nobody", window()).await.unwrap();
        assert!(events.is_empty());
    }
}
