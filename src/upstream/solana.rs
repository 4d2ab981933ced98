use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::{TokenInfo, TokenRegistry, LAMPORTS_PER_SOL};
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Wallet balances over Solana JSON-RPC. Results are cached per owner/ticker.
pub struct SolanaClient {
    client: reqwest::Client,
    rpc_url: String,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    registry: TokenRegistry,
}

impl SolanaClient {
    pub fn new(
        rpc_url: impl Into<String>,
        timeout: Duration,
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
        registry: TokenRegistry,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            cache,
            ttl,
            registry,
        })
    }

    /// Whole-token balance of `ticker` held by `owner`.
    pub async fn balance(&self, owner: &str, ticker: &str) -> Result<Decimal> {
        let ticker = ticker.to_lowercase();
        let token = self
            .registry
            .get(&ticker)
            .cloned()
            .ok_or_else(|| AppError::UnknownToken(ticker.clone()))?;

        let key = balance_cache_key(owner, &ticker);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => {
                if let Some(balance) = std::str::from_utf8(&raw)
                    .ok()
                    .and_then(|s| Decimal::from_str(s).ok())
                {
                    debug!(key, "[SOLANA] cache hit");
                    return Ok(balance);
                }
                warn!(key, "[SOLANA] unreadable cached balance, refetching");
            }
            Ok(None) => debug!(key, "[SOLANA] cache miss"),
            Err(e) => warn!(key, "[SOLANA] cache read failed: {e}"),
        }

        let balance = self.fetch_balance(owner, &token).await?;
        info!(owner, ticker, %balance, "[SOLANA] balance fetched");

        if let Err(e) = self
            .cache
            .set(&key, balance.to_string().into_bytes(), self.ttl)
            .await
        {
            warn!(key, "[SOLANA] failed to cache balance: {e}");
        }
        Ok(balance)
    }

    async fn fetch_balance(&self, owner: &str, token: &TokenInfo) -> Result<Decimal> {
        match &token.mint {
            None => {
                let result = self.call("getBalance", json!([owner])).await?;
                lamports_to_sol(&result)
            }
            Some(mint) => {
                let result = self
                    .call(
                        "getTokenAccountsByOwner",
                        json!([owner, { "mint": mint }, { "encoding": "jsonParsed" }]),
                    )
                    .await?;
                spl_balance(&result, token.divisor())
            }
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.rpc_url.clone())
                } else {
                    AppError::Http(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                status: status.as_u16(),
                url: self.rpc_url.clone(),
            });
        }

        let parsed: RpcResponse = resp.json().await?;
        if let Some(err) = parsed.error {
            return Err(AppError::Rpc(format!("{method}: {} ({})", err.message, err.code)));
        }
        parsed
            .result
            .ok_or_else(|| AppError::Rpc(format!("{method}: empty result")))
    }
}

fn balance_cache_key(owner: &str, ticker: &str) -> String {
    format!("balance-v2-{owner}-{ticker}")
}

/// `getBalance` result: `{"context": {...}, "value": <lamports>}`.
fn lamports_to_sol(result: &Value) -> Result<Decimal> {
    let lamports = result
        .get("value")
        .and_then(Value::as_u64)
        .ok_or_else(|| AppError::Decode("getBalance: missing value".to_string()))?;
    Ok(Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL))
}

/// Sums the raw amounts of every token account in a `jsonParsed`
/// `getTokenAccountsByOwner` result. No accounts means a zero balance.
fn spl_balance(result: &Value, divisor: u64) -> Result<Decimal> {
    let accounts = result
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Decode("getTokenAccountsByOwner: missing value".to_string()))?;

    let mut raw_total = Decimal::ZERO;
    for account in accounts {
        let amount = account
            .pointer("/account/data/parsed/info/tokenAmount/amount")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AppError::Decode("getTokenAccountsByOwner: missing tokenAmount".to_string())
            })?;
        let amount = Decimal::from_str(amount)
            .map_err(|e| AppError::Decode(format!("token amount {amount:?}: {e}")))?;
        raw_total += amount;
    }
    Ok(raw_total / Decimal::from(divisor))
}
