//! Discovery pipeline: scans trending/boosted token feeds, applies a
//! deterministic filter, checks safety, and hands survivors to the
//! decision loop.

pub mod decision;

use crate::config::AppConfig;
use crate::llm::ChatSession;
use crate::models::{DiscoveryCandidate, SafetyStatus};
use crate::tools::market_data::QuoteSource;
use crate::tools::safety::SafetyChecker;
use crate::tools::ToolProvider;
use decision::{run_decision_loop, Decision, DECISION_SYSTEM_PROMPT};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct DiscoveryPipeline {
    market: Arc<QuoteSource>,
    safety: Arc<SafetyChecker>,
    chain: String,
    min_volume_usd: f64,
    min_liquidity_usd: f64,
    min_market_cap_usd: f64,
    min_token_age_hours: f64,
    min_momentum_score: f64,
}

/// Counts of why raw tokens were rejected before reaching the decision
/// loop, surfaced in the discovery cycle summary.
#[derive(Debug, Default, Clone)]
pub struct RejectionCounts {
    pub low_volume: usize,
    pub low_liquidity: usize,
    pub low_market_cap: usize,
    pub already_held: usize,
    pub dangerous: usize,
    pub unparsable: usize,
    pub wrong_chain: usize,
    pub too_young: usize,
}

impl DiscoveryPipeline {
    pub fn new(market: Arc<QuoteSource>, safety: Arc<SafetyChecker>, config: &AppConfig) -> Self {
        Self {
            market,
            safety,
            chain: config.chain_normalized(),
            min_volume_usd: config.min_volume_usd,
            min_liquidity_usd: config.min_liquidity_usd,
            min_market_cap_usd: config.min_market_cap_usd,
            min_token_age_hours: config.min_token_age_hours,
            min_momentum_score: config.min_momentum_score,
        }
    }

    /// Fetch trending/boosted token feeds plus two generic text searches
    /// concurrently, dedup by lowercased address, and run each through
    /// the deterministic filter and safety check.
    #[instrument(skip(self, held))]
    pub async fn scan(&self, held: &HashSet<String>) -> (Vec<DiscoveryCandidate>, RejectionCounts) {
        let trending_query = format!("trending {}", self.chain);
        let (top, latest, trending, chain_search) = tokio::join!(
            self.market.top_boosted_tokens(),
            self.market.latest_boosted_tokens(),
            self.market.search_pairs(&trending_query),
            self.market.search_pairs(&self.chain),
        );

        let mut addresses: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for result in [top, latest, trending, chain_search] {
            if let Ok(value) = result {
                for addr in extract_addresses(&value) {
                    let lower = addr.to_lowercase();
                    if seen.insert(lower) {
                        addresses.push(addr);
                    }
                }
            }
        }

        let mut counts = RejectionCounts::default();
        let mut candidates = Vec::new();

        for address in addresses {
            if held.contains(&address.to_lowercase()) {
                counts.already_held += 1;
                continue;
            }

            let pools = match self.market.get_token_pools(&self.chain, &address).await {
                Ok(v) => v,
                Err(_) => {
                    counts.unparsable += 1;
                    continue;
                }
            };

            let Some(metrics) = extract_metrics(&pools) else {
                counts.unparsable += 1;
                continue;
            };

            if let Some(chain_id) = &metrics.chain_id {
                if chain_id.to_lowercase() != self.chain {
                    counts.wrong_chain += 1;
                    continue;
                }
            }

            if self.min_token_age_hours > 0.0 {
                if let Some(age_hours) = metrics.pair_age_hours {
                    if age_hours < self.min_token_age_hours {
                        counts.too_young += 1;
                        continue;
                    }
                }
            }

            if metrics.volume_24h_usd < self.min_volume_usd {
                counts.low_volume += 1;
                continue;
            }
            if metrics.liquidity_usd < self.min_liquidity_usd {
                counts.low_liquidity += 1;
                continue;
            }
            if metrics.market_cap_usd < self.min_market_cap_usd {
                counts.low_market_cap += 1;
                continue;
            }

            let (safety_status, safety_score) = self.safety.check(&address).await;
            if safety_status == SafetyStatus::Dangerous {
                counts.dangerous += 1;
                continue;
            }

            candidates.push(DiscoveryCandidate {
                token_address: address,
                symbol: metrics.symbol,
                chain: self.chain.clone(),
                price_usd: metrics.price_usd,
                volume_24h_usd: metrics.volume_24h_usd,
                liquidity_usd: metrics.liquidity_usd,
                market_cap_usd: metrics.market_cap_usd,
                price_change_24h_pct: metrics.price_change_24h_pct,
                safety_status,
                safety_score,
                momentum_score: 0.0,
                reasoning: String::new(),
            });
        }

        debug!(found = candidates.len(), ?counts, "discovery scan complete");
        (candidates, counts)
    }

    /// Runs the decision loop for one candidate, mutating its
    /// `momentum_score`/`reasoning` fields with the outcome.
    pub async fn decide(
        &self,
        candidate: &mut DiscoveryCandidate,
        chat: &mut dyn ChatSession,
        tool_provider: &dyn ToolProvider,
    ) -> Decision {
        let decision = run_decision_loop(chat, tool_provider, candidate, self.min_momentum_score).await;
        candidate.momentum_score = decision.momentum_score;
        candidate.reasoning = decision.reasoning.clone();
        decision
    }

    pub fn passes_momentum_floor(&self, decision: &Decision) -> bool {
        decision.should_buy && decision.momentum_score >= self.min_momentum_score
    }
}

struct RawMetrics {
    symbol: String,
    price_usd: f64,
    volume_24h_usd: f64,
    liquidity_usd: f64,
    market_cap_usd: f64,
    price_change_24h_pct: f64,
    chain_id: Option<String>,
    pair_age_hours: Option<f64>,
}

/// Addresses from a boosted-tokens list (`tokenAddress`/`address`, flat
/// array or `{tokens: [...]}`), or from a `search_pairs` response
/// (`{pairs: [{baseToken: {address}}]}`).
fn extract_addresses(value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => value
            .get("tokens")
            .or_else(|| value.get("pairs"))
            .and_then(Value::as_array)
            .map(|a| a.iter().collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            item.get("tokenAddress")
                .or_else(|| item.get("address"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    item.get("baseToken")
                        .and_then(|b| b.get("address"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
        })
        .collect()
}

fn extract_metrics(pools: &Value) -> Option<RawMetrics> {
    let first = match pools {
        Value::Array(items) => items.iter().find(|p| p.is_object())?,
        Value::Object(_) => pools.get("pairs").and_then(Value::as_array)?.iter().find(|p| p.is_object())?,
        _ => return None,
    };

    let price_usd = first.get("priceUsd").and_then(crate::tools::coerce_f64)?;
    let symbol = first
        .get("baseToken")
        .and_then(|b| b.get("symbol"))
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();
    let volume_24h_usd = first.get("volume").and_then(|v| v.get("h24")).and_then(crate::tools::coerce_f64).unwrap_or(0.0);
    let liquidity_usd = first.get("liquidity").and_then(|v| v.get("usd")).and_then(crate::tools::coerce_f64).unwrap_or(0.0);
    let market_cap_usd = first
        .get("marketCap")
        .or_else(|| first.get("fdv"))
        .and_then(crate::tools::coerce_f64)
        .unwrap_or(0.0);
    let price_change_24h_pct = first
        .get("priceChange")
        .and_then(|v| v.get("h24"))
        .and_then(crate::tools::coerce_f64)
        .unwrap_or(0.0);
    let chain_id = first.get("chainId").and_then(Value::as_str).map(str::to_string);
    let pair_age_hours = first.get("pairCreatedAt").and_then(crate::tools::coerce_f64).map(|created_at_ms| {
        let now_ms = chrono::Utc::now().timestamp_millis() as f64;
        ((now_ms - created_at_ms) / 1000.0 / 3600.0).max(0.0)
    });

    Some(RawMetrics {
        symbol,
        price_usd,
        volume_24h_usd,
        liquidity_usd,
        market_cap_usd,
        price_change_24h_pct,
        chain_id,
        pair_age_hours,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_addresses_from_array_shape() {
        let value = json!([{ "tokenAddress": "Mint1" }, { "address": "Mint2" }]);
        assert_eq!(extract_addresses(&value), vec!["Mint1".to_string(), "Mint2".to_string()]);
    }

    #[test]
    fn extracts_metrics_from_pool_pair() {
        let pools = json!([{
            "priceUsd": "0.05",
            "baseToken": { "symbol": "PEPE" },
            "volume": { "h24": 500000 },
            "liquidity": { "usd": 150000 },
            "marketCap": 3000000,
            "priceChange": { "h24": 12.5 }
        }]);
        let metrics = extract_metrics(&pools).unwrap();
        assert_eq!(metrics.symbol, "PEPE");
        assert_eq!(metrics.volume_24h_usd, 500000.0);
        assert_eq!(metrics.liquidity_usd, 150000.0);
        assert_eq!(metrics.chain_id, None);
        assert_eq!(metrics.pair_age_hours, None);
    }

    #[test]
    fn extracts_addresses_from_search_pairs_shape() {
        let value = json!({ "pairs": [{ "baseToken": { "address": "Mint3" } }] });
        assert_eq!(extract_addresses(&value), vec!["Mint3".to_string()]);
    }

    #[test]
    fn extracts_chain_id_and_age_from_pool_pair() {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let pools = json!([{
            "priceUsd": "0.05",
            "chainId": "Solana",
            "pairCreatedAt": now_ms - 10 * 3_600_000,
        }]);
        let metrics = extract_metrics(&pools).unwrap();
        assert_eq!(metrics.chain_id, Some("Solana".to_string()));
        let age = metrics.pair_age_hours.unwrap();
        assert!((age - 10.0).abs() < 0.01, "got {age}");
    }
}
