use crate::error::{EngineError, EngineResult};
use crate::price_cache::PriceCache;
use crate::tools::ToolProvider;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Wraps the market-data tool provider (`get_token_pools`, `search_pairs`,
/// `get_top_boosted_tokens`, `get_latest_boosted_tokens`) and caches
/// reference-price lookups via the shared [`PriceCache`].
pub struct QuoteSource {
    provider: Arc<dyn ToolProvider>,
    cache: Arc<PriceCache>,
}

impl QuoteSource {
    pub fn new(provider: Arc<dyn ToolProvider>, cache: Arc<PriceCache>) -> Self {
        Self { provider, cache }
    }

    /// Fetch reference price + liquidity for a token, using the cache
    /// when the entry is still fresh.
    #[instrument(skip(self), fields(chain = %chain, token = %token_address))]
    pub async fn fetch_reference(
        &self,
        chain: &str,
        token_address: &str,
    ) -> EngineResult<(f64, Option<f64>)> {
        if let Some(cached) = self.cache.get(chain, token_address).await {
            debug!("price cache hit");
            return parse_pools_response(&cached);
        }

        let result = self
            .provider
            .call(
                "get_token_pools",
                json!({ "chainId": chain, "tokenAddress": token_address }),
            )
            .await?;

        self.cache.set(chain, token_address, result.clone()).await;
        parse_pools_response(&result)
    }

    pub async fn search_pairs(&self, query: &str) -> EngineResult<Value> {
        self.provider.call("search_pairs", json!({ "query": query })).await
    }

    pub async fn top_boosted_tokens(&self) -> EngineResult<Value> {
        self.provider.call("get_top_boosted_tokens", json!({})).await
    }

    pub async fn latest_boosted_tokens(&self) -> EngineResult<Value> {
        self.provider.call("get_latest_boosted_tokens", json!({})).await
    }

    pub async fn get_token_pools(&self, chain: &str, token_address: &str) -> EngineResult<Value> {
        self.provider
            .call(
                "get_token_pools",
                json!({ "chainId": chain, "tokenAddress": token_address }),
            )
            .await
    }
}

/// Extract the first pair's `priceUsd` and `liquidity.usd` from a
/// `get_token_pools`-shaped response.
pub fn parse_pools_response(result: &Value) -> EngineResult<(f64, Option<f64>)> {
    let pairs: Vec<&Value> = match result {
        Value::Array(items) => items.iter().filter(|p| p.is_object()).collect(),
        Value::Object(_) => result
            .get("pairs")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter(|p| p.is_object()).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let first = pairs
        .first()
        .ok_or_else(|| EngineError::DataShape("market-data tool returned no pairs".to_string()))?;

    let price_value = first
        .get("priceUsd")
        .ok_or_else(|| EngineError::DataShape("pair is missing priceUsd".to_string()))?;

    let price = crate::tools::coerce_f64(price_value)
        .ok_or_else(|| EngineError::DataShape("priceUsd is not numeric".to_string()))?;

    let liquidity_usd = first
        .get("liquidity")
        .and_then(Value::as_object)
        .and_then(|liq| liq.get("usd"))
        .and_then(crate::tools::coerce_f64);

    Ok((price, liquidity_usd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_shaped_response() {
        let resp = json!([
            { "priceUsd": "1.2345", "liquidity": { "usd": 50000.0 } }
        ]);
        let (price, liq) = parse_pools_response(&resp).unwrap();
        assert!((price - 1.2345).abs() < 1e-9);
        assert_eq!(liq, Some(50000.0));
    }

    #[test]
    fn parses_object_with_pairs_key() {
        let resp = json!({ "pairs": [{ "priceUsd": 2.5 }] });
        let (price, liq) = parse_pools_response(&resp).unwrap();
        assert_eq!(price, 2.5);
        assert_eq!(liq, None);
    }

    #[test]
    fn errors_on_empty_pairs() {
        let resp = json!([]);
        assert!(parse_pools_response(&resp).is_err());
    }

    #[test]
    fn errors_on_missing_price() {
        let resp = json!([{ "liquidity": { "usd": 1.0 } }]);
        assert!(parse_pools_response(&resp).is_err());
    }
}
