//! Tool-calling decision loop: hands a discovery candidate to the model,
//! lets it call market-data/safety tools for a bounded number of rounds,
//! then extracts a buy/no-buy decision from its final message. Falls
//! back to a deterministic heuristic score on timeout or parse failure.

use crate::error::EngineResult;
use crate::llm::{ChatSession, ChatTurn};
use crate::models::DiscoveryCandidate;
use crate::tools::ToolProvider;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{instrument, warn};

const MAX_ROUNDS: u32 = 4;
const TIMEOUT_SECS: u64 = 45;

pub const DECISION_SYSTEM_PROMPT: &str = "\
You are a momentum-discovery trading analyst. You will be given a single \
candidate token with its market metrics and safety classification. Use the \
available tools if you need more information, then respond with a single \
JSON object: {\"should_buy\": bool, \"momentum_score\": number 0-100, \
\"reasoning\": string}. Do not buy tokens classified as dangerous.";

#[derive(Debug, Clone, Deserialize)]
pub struct Decision {
    pub should_buy: bool,
    pub momentum_score: f64,
    pub reasoning: String,
}

#[instrument(skip(chat, tool_provider, candidate), fields(token = %candidate.token_address))]
pub async fn run_decision_loop(
    chat: &mut dyn ChatSession,
    tool_provider: &dyn ToolProvider,
    candidate: &DiscoveryCandidate,
    min_momentum_score: f64,
) -> Decision {
    let future = decide(chat, tool_provider, candidate, min_momentum_score);
    match tokio::time::timeout(Duration::from_secs(TIMEOUT_SECS), future).await {
        Ok(decision) => decision,
        Err(_) => {
            warn!(token = %candidate.token_address, "decision loop timed out, using heuristic");
            heuristic_decision(candidate, min_momentum_score)
        }
    }
}

async fn decide(
    chat: &mut dyn ChatSession,
    tool_provider: &dyn ToolProvider,
    candidate: &DiscoveryCandidate,
    min_momentum_score: f64,
) -> Decision {
    let prompt = candidate_prompt(candidate);
    let mut turn = match chat.send(&prompt).await {
        Ok(t) => t,
        Err(err) => {
            warn!(%err, "decision loop's initial send failed, using heuristic");
            return heuristic_decision(candidate, min_momentum_score);
        }
    };

    for _ in 0..MAX_ROUNDS {
        match turn {
            ChatTurn::Text(text) => {
                return parse_decision(&text).unwrap_or_else(|| heuristic_decision(candidate, min_momentum_score));
            }
            ChatTurn::ToolCalls(calls) => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    let result = tool_provider
                        .call(&call.name, call.arguments)
                        .await
                        .unwrap_or_else(|err| serde_json::json!({ "error": err.to_string() }));
                    results.push((call.name, result));
                }
                turn = match chat.send_tool_results(results).await {
                    Ok(t) => t,
                    Err(err) => {
                        warn!(%err, "decision loop's tool-result send failed, using heuristic");
                        return heuristic_decision(candidate, min_momentum_score);
                    }
                };
            }
        }
    }

    warn!(token = %candidate.token_address, "decision loop exhausted its round budget, using heuristic");
    heuristic_decision(candidate, min_momentum_score)
}

fn candidate_prompt(candidate: &DiscoveryCandidate) -> String {
    serde_json::json!({
        "token_address": candidate.token_address,
        "symbol": candidate.symbol,
        "chain": candidate.chain,
        "price_usd": candidate.price_usd,
        "volume_24h_usd": candidate.volume_24h_usd,
        "liquidity_usd": candidate.liquidity_usd,
        "market_cap_usd": candidate.market_cap_usd,
        "price_change_24h_pct": candidate.price_change_24h_pct,
        "safety_status": format!("{:?}", candidate.safety_status),
        "safety_score": candidate.safety_score,
    })
    .to_string()
}

/// Extract the last well-formed `{...}` JSON object in `text` and decode
/// it as a [`Decision`]. Models often wrap JSON in prose or fences; the
/// last block is taken as the final answer.
fn parse_decision(text: &str) -> Option<Decision> {
    let bytes = text.as_bytes();
    let mut end = None;
    let mut depth = 0i32;
    let mut start = None;

    for (i, &b) in bytes.iter().enumerate().rev() {
        if b == b'}' {
            if end.is_none() {
                end = Some(i);
                depth = 1;
            } else {
                depth += 1;
            }
        } else if b == b'{' && end.is_some() {
            depth -= 1;
            if depth == 0 {
                start = Some(i);
                break;
            }
        }
    }

    let (start, end) = (start?, end?);
    let candidate = &text[start..=end];
    let value: Value = serde_json::from_str(candidate).ok()?;
    serde_json::from_value(value).ok()
}

/// Deterministic fallback: `min(30, 10*volume/liquidity) +
/// min(30, max(0, 24h_change_pct)) + liquidity tier (20/10/0) + safety
/// tier (20/10/0)`, clamped to `[0, 100]`. Approved iff the score clears
/// `min_momentum_score`.
fn heuristic_decision(candidate: &DiscoveryCandidate, min_momentum_score: f64) -> Decision {
    let volume_to_liquidity = if candidate.liquidity_usd > 0.0 {
        (10.0 * candidate.volume_24h_usd / candidate.liquidity_usd).min(30.0)
    } else {
        0.0
    };
    let momentum_component = candidate.price_change_24h_pct.max(0.0).min(30.0);
    let liquidity_component = if candidate.liquidity_usd >= 50_000.0 {
        20.0
    } else if candidate.liquidity_usd >= 10_000.0 {
        10.0
    } else {
        0.0
    };
    let safety_component = match candidate.safety_status {
        crate::models::SafetyStatus::Safe => 20.0,
        crate::models::SafetyStatus::Risky | crate::models::SafetyStatus::Unverified => 10.0,
        crate::models::SafetyStatus::Dangerous => 0.0,
    };

    let score = (volume_to_liquidity + momentum_component + liquidity_component + safety_component).clamp(0.0, 100.0);
    let should_buy = score >= min_momentum_score
        && !matches!(candidate.safety_status, crate::models::SafetyStatus::Dangerous);

    Decision {
        should_buy,
        momentum_score: score,
        reasoning: "heuristic fallback: model unavailable or unparsable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SafetyStatus;

    fn candidate() -> DiscoveryCandidate {
        DiscoveryCandidate {
            token_address: "mint".to_string(),
            symbol: "PEPE".to_string(),
            chain: "solana".to_string(),
            price_usd: 0.001,
            volume_24h_usd: 300_000.0,
            liquidity_usd: 120_000.0,
            market_cap_usd: 2_000_000.0,
            price_change_24h_pct: 40.0,
            safety_status: SafetyStatus::Safe,
            safety_score: Some(100.0),
            momentum_score: 0.0,
            reasoning: String::new(),
        }
    }

    #[test]
    fn parses_last_json_block_ignoring_prose() {
        let text = "Let me think.\n{\"should_buy\": false, \"momentum_score\": 10, \"reasoning\": \"early\"}\nActually, final answer:\n{\"should_buy\": true, \"momentum_score\": 77.5, \"reasoning\": \"strong volume\"}";
        let decision = parse_decision(text).unwrap();
        assert!(decision.should_buy);
        assert_eq!(decision.momentum_score, 77.5);
    }

    #[test]
    fn heuristic_approves_strong_safe_candidate() {
        let decision = heuristic_decision(&candidate(), 50.0);
        assert!(decision.should_buy);
    }

    #[test]
    fn heuristic_never_approves_dangerous_candidate() {
        let mut c = candidate();
        c.safety_status = SafetyStatus::Dangerous;
        c.safety_score = Some(9000.0);
        let decision = heuristic_decision(&c, 0.0);
        assert!(!decision.should_buy);
    }

    #[test]
    fn heuristic_score_matches_formula() {
        let c = candidate();
        let decision = heuristic_decision(&c, 50.0);
        // volume/liquidity = 300_000/120_000 = 2.5 -> 10*2.5=25, capped at 30 -> 25
        // momentum = min(30, 40) = 30
        // liquidity tier (>=50k) = 20
        // safety tier (Safe) = 20
        assert!((decision.momentum_score - 95.0).abs() < 1e-9);
    }
}
