use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Reason a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    MaxHoldTime,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::MaxHoldTime => write!(f, "max_hold_time"),
        }
    }
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Categorical outcome of the external safety check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyStatus {
    Safe,
    Risky,
    Dangerous,
    Unverified,
}

/// An open or closed trade. See data model invariants: `stop_price <=
/// entry_price <= take_price` at creation, `highest_price >= entry_price`,
/// immutable once closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub token_address: String,
    pub symbol: String,
    pub chain: String,
    pub entry_price: f64,
    pub quantity_token: f64,
    pub notional_usd: f64,
    pub stop_price: f64,
    pub take_price: f64,
    pub highest_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub realized_pnl_usd: Option<f64>,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub dry_run: bool,
    pub momentum_score: Option<f64>,
    pub discovery_reasoning: Option<String>,
}

/// Fields required to open a new position.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub token_address: String,
    pub symbol: String,
    pub chain: String,
    pub entry_price: f64,
    pub quantity_token: f64,
    pub notional_usd: f64,
    pub stop_price: f64,
    pub take_price: f64,
    pub dry_run: bool,
    pub momentum_score: Option<f64>,
    pub discovery_reasoning: Option<String>,
}

/// Append-only record of one trader attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub position_id: Option<i64>,
    pub token_address: String,
    pub symbol: String,
    pub chain: String,
    pub action: Side,
    pub requested_notional_usd: Option<f64>,
    pub executed_price: Option<f64>,
    pub quantity_token: Option<f64>,
    pub tx_hash: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Fields required to record a new execution attempt.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub position_id: Option<i64>,
    pub token_address: String,
    pub symbol: String,
    pub chain: String,
    pub action: Side,
    pub requested_notional_usd: Option<f64>,
    pub executed_price: Option<f64>,
    pub quantity_token: Option<f64>,
    pub tx_hash: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Transient discovery result: a token that passed deterministic filters
/// and is awaiting (or has completed) safety + decision evaluation.
#[derive(Debug, Clone)]
pub struct DiscoveryCandidate {
    pub token_address: String,
    pub symbol: String,
    pub chain: String,
    pub price_usd: f64,
    pub volume_24h_usd: f64,
    pub liquidity_usd: f64,
    pub market_cap_usd: f64,
    pub price_change_24h_pct: f64,
    pub safety_status: SafetyStatus,
    pub safety_score: Option<f64>,
    pub momentum_score: f64,
    pub reasoning: String,
}

/// Result of one discovery cycle.
#[derive(Debug, Clone)]
pub struct DiscoveryCycleResult {
    pub timestamp: DateTime<Utc>,
    pub candidates_found: usize,
    pub positions_opened: Vec<Position>,
    pub errors: Vec<String>,
    pub summary: String,
}

impl DiscoveryCycleResult {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            candidates_found: 0,
            positions_opened: Vec::new(),
            errors: Vec::new(),
            summary: String::new(),
        }
    }
}

/// Result of one exit-check cycle.
#[derive(Debug, Clone)]
pub struct ExitCycleResult {
    pub timestamp: DateTime<Utc>,
    pub positions_checked: usize,
    pub trailing_stops_updated: usize,
    pub positions_closed: Vec<Position>,
    pub errors: Vec<String>,
    pub summary: String,
}

impl ExitCycleResult {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            positions_checked: 0,
            trailing_stops_updated: 0,
            positions_closed: Vec::new(),
            errors: Vec::new(),
            summary: String::new(),
        }
    }
}

/// Strip a leading run of non-word characters from a symbol and upper-case
/// the remainder, mirroring the store's normalization invariant.
pub fn normalize_symbol(symbol: &str) -> String {
    let trimmed = symbol.trim_start_matches(|c: char| !c.is_alphanumeric() && c != '_');
    trimmed.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_symbol_strips_emoji_prefix() {
        assert_eq!(normalize_symbol("🚀pepe"), "PEPE");
        assert_eq!(normalize_symbol("wif"), "WIF");
        assert_eq!(normalize_symbol("  $bonk"), "BONK");
    }
}
