use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const HELIUM_API_URL: &str = "https://api.helium.io/v1";
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const SOLANA_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Rewards are reported by the feed in bones; 10^8 bones make one token.
pub const REWARD_DIVISOR: u64 = 100_000_000;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// How often expired cache entries and finished jobs are swept (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// Coin ids from the price feed's coin list that share a ticker with a
/// registry token and must never win the symbol lookup.
pub const COIN_ID_DENYLIST: &[&str] = &["hymnode", "fitmin"];

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    pub helium_api_url: String,
    pub coingecko_api_url: String,
    pub solana_rpc_url: String,
    /// Fiat currency code used for every price lookup (FIAT_CURRENCY)
    pub fiat_currency: String,
    /// Price feed coin id the rewards are denominated in (REWARD_COIN_ID)
    pub reward_coin_id: String,
    /// TTL for raw upstream responses keyed by URL (URL_CACHE_TTL_SECS)
    pub url_cache_ttl: Duration,
    /// TTL for computed reports and balances (RESULT_CACHE_TTL_SECS)
    pub result_cache_ttl: Duration,
    /// Per-request upstream timeout (FETCH_TIMEOUT_SECS)
    pub fetch_timeout: Duration,
    /// Fixed delay before the single retry (RETRY_BACKOFF_MS)
    pub retry_backoff: Duration,
    /// Inclusive bounds of the tax years the API will compute.
    pub min_tax_year: i32,
    pub max_tax_year: i32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: parse_env("API_PORT", 3000u16)?,
            helium_api_url: std::env::var("HELIUM_API_URL")
                .unwrap_or_else(|_| HELIUM_API_URL.to_string()),
            coingecko_api_url: std::env::var("COINGECKO_API_URL")
                .unwrap_or_else(|_| COINGECKO_API_URL.to_string()),
            solana_rpc_url: std::env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| SOLANA_RPC_URL.to_string()),
            fiat_currency: std::env::var("FIAT_CURRENCY")
                .unwrap_or_else(|_| "gbp".to_string())
                .to_lowercase(),
            reward_coin_id: std::env::var("REWARD_COIN_ID")
                .unwrap_or_else(|_| "helium".to_string()),
            url_cache_ttl: Duration::from_secs(parse_env("URL_CACHE_TTL_SECS", 86_400u64)?),
            result_cache_ttl: Duration::from_secs(parse_env("RESULT_CACHE_TTL_SECS", 3_600u64)?),
            fetch_timeout: Duration::from_secs(parse_env("FETCH_TIMEOUT_SECS", 10u64)?),
            retry_backoff: Duration::from_millis(parse_env("RETRY_BACKOFF_MS", 500u64)?),
            min_tax_year: parse_env("MIN_TAX_YEAR", 2020i32)?,
            max_tax_year: parse_env("MAX_TAX_YEAR", 2023i32)?,
        };

        if cfg.min_tax_year > cfg.max_tax_year {
            return Err(AppError::Config(format!(
                "MIN_TAX_YEAR ({}) must not exceed MAX_TAX_YEAR ({})",
                cfg.min_tax_year, cfg.max_tax_year
            )));
        }
        Ok(cfg)
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// Token registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Canonical id on the price feed.
    pub coin_id: String,
    /// SPL mint address. `None` for the chain's native token.
    pub mint: Option<String>,
    /// Number of decimal places between the smallest unit and one token.
    pub decimals: u32,
}

impl TokenInfo {
    pub fn divisor(&self) -> u64 {
        10u64.pow(self.decimals)
    }
}

/// Immutable ticker → token table, built once at startup and shared by value.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    by_ticker: HashMap<String, TokenInfo>,
}

impl TokenRegistry {
    pub fn new(entries: impl IntoIterator<Item = (String, TokenInfo)>) -> Self {
        Self {
            by_ticker: entries
                .into_iter()
                .map(|(ticker, info)| (ticker.to_lowercase(), info))
                .collect(),
        }
    }

    /// Lookup is case-insensitive on the ticker.
    pub fn get(&self, ticker: &str) -> Option<&TokenInfo> {
        self.by_ticker.get(&ticker.to_lowercase())
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        let token = |coin_id: &str, mint: Option<&str>, decimals: u32| TokenInfo {
            coin_id: coin_id.to_string(),
            mint: mint.map(str::to_string),
            decimals,
        };
        Self::new([
            (
                "hnt".to_string(),
                token("helium", Some("hntyVP6YFm1Hg25TN9WGLqM12b8TQmcknKrdu1oxWux"), 8),
            ),
            (
                "iot".to_string(),
                token("helium-iot", Some("iotEVVZLEywoTn1QdwNPddxPWszn3zFhEot3MfL9fns"), 6),
            ),
            (
                "mobile".to_string(),
                token("helium-mobile", Some("mb1eu7TzEc71KxDpsmsKoucSSuuoGLv1drys1oP2jh6"), 6),
            ),
            ("sol".to_string(), token("solana", None, 9)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup_ignores_case() {
        let registry = TokenRegistry::default();
        let hnt = registry.get("HNT").expect("hnt registered");
        assert_eq!(hnt.coin_id, "helium");
        assert_eq!(hnt.divisor(), REWARD_DIVISOR);
        assert_eq!(registry.get("iot").map(|t| t.divisor()), Some(1_000_000));
        assert_eq!(registry.get("sol").and_then(|t| t.mint.clone()), None);
        assert!(registry.get("doge").is_none());
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        let port: u16 = parse_env("HOTSPOT_EARNINGS_TEST_UNSET_VAR", 4242).unwrap();
        assert_eq!(port, 4242);
    }
}
