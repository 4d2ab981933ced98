use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::cache::CachedFetcher;
use crate::error::{AppError, Result};
use crate::types::{Hotspot, RewardEvent, TimeWindow};

use super::{RewardPage, RewardSource};

#[derive(Debug, Deserialize)]
struct HotspotsResponse {
    #[serde(default)]
    data: Vec<Hotspot>,
}

#[derive(Debug, Deserialize)]
struct RewardsResponse {
    #[serde(default)]
    data: Vec<RewardEvent>,
    /// Absent (or null) on the last page.
    #[serde(default)]
    cursor: Option<String>,
}

/// Reward feed client for the Helium v1 REST API.
pub struct HeliumClient {
    fetcher: Arc<CachedFetcher>,
    base_url: String,
}

impl HeliumClient {
    pub fn new(fetcher: Arc<CachedFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn hotspots_url(&self, account: &str) -> String {
        format!("{}/accounts/{}/hotspots", self.base_url, account)
    }

    pub(crate) fn rewards_url(&self, hotspot: &str, window: TimeWindow, cursor: &str) -> Result<String> {
        let base = format!("{}/hotspots/{}/rewards", self.base_url, hotspot);
        let max_time = window.end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let min_time = window.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let url = Url::parse_with_params(
            &base,
            &[
                ("max_time", max_time.as_str()),
                ("min_time", min_time.as_str()),
                ("cursor", cursor),
            ],
        )
        .map_err(|e| AppError::Validation(format!("bad rewards url {base}: {e}")))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl RewardSource for HeliumClient {
    async fn account_hotspots(&self, account: &str) -> Result<Vec<Hotspot>> {
        let resp: HotspotsResponse = self.fetcher.fetch_json(&self.hotspots_url(account)).await?;
        debug!(account, hotspots = resp.data.len(), "[HELIUM] hotspots");
        Ok(resp.data)
    }

    async fn rewards_page(
        &self,
        hotspot: &str,
        window: TimeWindow,
        cursor: &str,
    ) -> Result<RewardPage> {
        let url = self.rewards_url(hotspot, window, cursor)?;
        let resp: RewardsResponse = self.fetcher.fetch_json(&url).await?;
        Ok(RewardPage {
            events: resp.data,
            next_cursor: resp.cursor.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fetcher::tests::{fetcher_with, ScriptedTransport};
    use crate::cache::MemoryCache;
    use crate::types::TaxPeriod;

    fn client(transport: Arc<ScriptedTransport>) -> HeliumClient {
        HeliumClient::new(
            Arc::new(fetcher_with(transport, MemoryCache::new())),
            "http://helium/v1/",
        )
    }

    #[test]
    fn rewards_url_encodes_window_and_cursor() {
        let helium = client(Arc::new(ScriptedTransport::default()));
        let window = TaxPeriod::new(2020, 2020, 2023).unwrap().window();
        let url = helium.rewards_url("hs1", window, "a+b/c=").unwrap();
        assert_eq!(
            url,
            "http://helium/v1/hotspots/hs1/rewards?max_time=2021-04-05T23%3A00%3A00Z\
             &min_time=2020-04-05T23%3A00%3A00Z&cursor=a%2Bb%2Fc%3D"
        );
    }

    #[tokio::test]
    async fn decodes_reward_page_and_missing_cursor() {
        let transport = Arc::new(ScriptedTransport::default());
        let helium = client(transport.clone());
        let window = TaxPeriod::new(2020, 2020, 2023).unwrap().window();
        let url = helium.rewards_url("hs1", window, "").unwrap();
        transport.push_ok(
            &url,
            r#"{"data":[{"account":"acc","amount":500000000,"timestamp":"2020-04-10T12:00:00.000000Z","hash":"h","gateway":"hs1"}]}"#,
        );

        let page = helium.rewards_page("hs1", window, "").await.unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].amount, 500_000_000);
        assert_eq!(page.events[0].account, "acc");
        assert_eq!(page.next_cursor, "");
    }

    #[tokio::test]
    async fn decodes_account_hotspots() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok(
            "http://helium/v1/accounts/acc/hotspots",
            r#"{"data":[{"name":"angry-purple-tiger","address":"hs1","owner":"acc"}]}"#,
        );
        let hotspots = client(transport).account_hotspots("acc").await.unwrap();
        assert_eq!(
            hotspots,
            vec![Hotspot {
                name: "angry-purple-tiger".to_string(),
                address: "hs1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn malformed_page_is_a_decode_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok("http://helium/v1/accounts/acc/hotspots", r#"{"data":"nope"}"#);
        let err = client(transport).account_hotspots("acc").await.unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }
}
