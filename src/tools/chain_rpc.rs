use dashmap::DashMap;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{instrument, warn};

/// Native SOL mint address (used as the "input" side of every buy).
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
/// SPL default decimal exponent, used when the RPC cannot be reached.
pub const SPL_DEFAULT_DECIMALS: u8 = 9;

const MAX_RETRIES: u32 = 4;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 30;

/// Process-wide, write-once cache of token decimal exponents, backed by a
/// chain RPC `getAccountInfo` call. Decimals are immutable post-mint, so
/// entries are never invalidated; concurrent readers for the same mint
/// either see the seeded/fetched value or block briefly on the first
/// fetch, never a torn write.
pub struct DecimalsCache {
    http: Client,
    rpc_url: String,
    cache: DashMap<String, u8>,
}

impl DecimalsCache {
    pub fn new(rpc_url: String, quote_mint: &str) -> Self {
        let cache = DashMap::new();
        cache.insert(NATIVE_MINT.to_string(), SPL_DEFAULT_DECIMALS);
        cache.insert(quote_mint.to_string(), 6);

        Self {
            http: Client::new(),
            rpc_url,
            cache,
        }
    }

    #[instrument(skip(self), fields(mint = %mint))]
    pub async fn get_decimals(&self, mint: &str) -> u8 {
        if let Some(cached) = self.cache.get(mint) {
            return *cached;
        }

        let decimals = self.fetch_decimals(mint).await.unwrap_or_else(|err| {
            warn!(%mint, error = %err, "decimals RPC exhausted, falling back to SPL default");
            SPL_DEFAULT_DECIMALS
        });

        // Two concurrent misses may both fetch; insert is idempotent and
        // the value is identical either way, so this never produces a
        // torn or inconsistent read for later callers.
        self.cache.entry(mint.to_string()).or_insert(decimals);
        decimals
    }

    async fn fetch_decimals(&self, mint: &str) -> Result<u8, String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getAccountInfo",
            "params": [mint, { "encoding": "jsonParsed" }],
        });

        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(&self.rpc_url)
                .json(&body)
                .send()
                .await
                .map_err(|e| e.to_string())?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt >= MAX_RETRIES {
                    return Err("rate limited after max retries".to_string());
                }
                let wait = retry_after_or_backoff(response.headers(), attempt);
                warn!(attempt, wait_secs = wait.as_secs(), "rate limited, backing off");
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            let value: Value = response.json().await.map_err(|e| e.to_string())?;
            return extract_decimals(&value);
        }
    }
}

fn retry_after_or_backoff(headers: &reqwest::header::HeaderMap, attempt: u32) -> Duration {
    if let Some(value) = headers.get(reqwest::header::RETRY_AFTER) {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.trim().parse::<u64>() {
                return Duration::from_secs(secs.min(BACKOFF_CAP_SECS));
            }
        }
    }
    let backoff = BACKOFF_BASE_SECS.saturating_mul(1u64 << attempt.min(5));
    Duration::from_secs(backoff.min(BACKOFF_CAP_SECS))
}

fn extract_decimals(value: &Value) -> Result<u8, String> {
    value
        .get("result")
        .and_then(|r| r.get("value"))
        .and_then(|v| v.get("data"))
        .and_then(|d| d.get("parsed"))
        .and_then(|p| p.get("info"))
        .and_then(|i| i.get("decimals"))
        .and_then(Value::as_u64)
        .map(|d| d as u8)
        .ok_or_else(|| "missing decimals in jsonParsed account info".to_string())
}
