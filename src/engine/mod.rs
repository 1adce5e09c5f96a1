//! Strategy engine: runs discovery cycles (scan, decide, open positions)
//! and exit checks (trailing stop, stop-loss/take-profit/max-hold-time)
//! against the persistence store and trader execution service.

use crate::config::AppConfig;
use crate::discovery::DiscoveryPipeline;
use crate::error::EngineResult;
use crate::execution::TraderExecutionService;
use crate::llm::ChatSession;
use crate::models::{CloseReason, DiscoveryCandidate, DiscoveryCycleResult, ExitCycleResult, NewExecution, NewPosition, Position, Side};
use crate::persistence::Store;
use crate::tools::chain_rpc::NATIVE_MINT;
use crate::tools::market_data::QuoteSource;
use crate::tools::ToolProvider;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

const NATIVE_PRICE_STALE_SECONDS: i64 = 120;
const ERROR_SKIP_WINDOW_SECONDS: i64 = 300;

pub type ChatFactory = Arc<dyn Fn() -> Box<dyn ChatSession> + Send + Sync>;

pub struct StrategyEngine {
    config: AppConfig,
    store: Arc<Store>,
    discovery: Arc<DiscoveryPipeline>,
    trader: Arc<TraderExecutionService>,
    market: Arc<QuoteSource>,
    decision_tools: Arc<dyn ToolProvider>,
    chat_factory: ChatFactory,
    native_price: Mutex<Option<(f64, DateTime<Utc>)>>,
    /// In-memory-only error cooldowns for candidates whose last open
    /// attempt raised an exception; cleared on restart by design, since
    /// the store has no durable representation for this window.
    error_skip_until: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl StrategyEngine {
    pub fn new(
        config: AppConfig,
        store: Arc<Store>,
        discovery: Arc<DiscoveryPipeline>,
        trader: Arc<TraderExecutionService>,
        market: Arc<QuoteSource>,
        decision_tools: Arc<dyn ToolProvider>,
        chat_factory: ChatFactory,
    ) -> Self {
        Self {
            config,
            store,
            discovery,
            trader,
            market,
            decision_tools,
            chat_factory,
            native_price: Mutex::new(None),
            error_skip_until: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip(self))]
    pub async fn run_discovery_cycle(&self) -> DiscoveryCycleResult {
        let now = Utc::now();
        let mut result = DiscoveryCycleResult::new(now);
        let chain = self.config.chain_normalized();

        if !self.config.enabled {
            result.summary = "discovery disabled".to_string();
            return result;
        }

        // Finally-block decrement: reached on every path below, never on
        // the disabled early return above.
        if let Err(e) = self.store.decrement_all_skip_phases().await {
            result.errors.push(e.to_string());
        }

        if let Err(e) = self.refresh_native_price().await {
            result.errors.push(format!("native price refresh failed: {e}"));
            result.summary = "native price unavailable".to_string();
            return result;
        }

        let open_count = match self.store.count_open_positions(&chain).await {
            Ok(c) => c,
            Err(e) => {
                result.errors.push(e.to_string());
                return result;
            }
        };
        if open_count >= self.config.max_positions as i64 {
            result.summary = "max open positions reached".to_string();
            return result;
        }

        let daily_pnl = self.store.get_daily_pnl(&chain).await.unwrap_or(0.0);
        if daily_pnl <= -self.config.daily_loss_limit_usd {
            result.summary = "daily loss limit reached".to_string();
            return result;
        }

        let held: HashSet<String> = match self.store.list_open_positions(&chain).await {
            Ok(positions) => positions.iter().map(|p| p.token_address.to_lowercase()).collect(),
            Err(_) => HashSet::new(),
        };

        let (candidates, _counts) = self.discovery.scan(&held).await;
        result.candidates_found = candidates.len();

        let mut open_count = open_count;
        for mut candidate in candidates {
            if open_count >= self.config.max_positions as i64 {
                break;
            }
            if !self.eligible(&candidate, &chain).await {
                continue;
            }

            let mut chat = (self.chat_factory)();
            let decision = self.discovery.decide(&mut candidate, chat.as_mut(), self.decision_tools.as_ref()).await;
            if !self.discovery.passes_momentum_floor(&decision) {
                continue;
            }

            match self.open_position(&candidate).await {
                Ok(position) => {
                    open_count += 1;
                    result.positions_opened.push(position);
                }
                Err(err) => {
                    warn!(token = %candidate.token_address, %err, "failed to open position");
                    result.errors.push(format!("{}: {err}", candidate.token_address));
                    let mut skips = self.error_skip_until.lock().await;
                    skips.insert(candidate.token_address.to_lowercase(), Utc::now() + Duration::seconds(ERROR_SKIP_WINDOW_SECONDS));
                }
            }
        }

        result.summary = format!(
            "{} candidates, {} opened, {} errors",
            result.candidates_found,
            result.positions_opened.len(),
            result.errors.len()
        );
        result
    }

    async fn eligible(&self, candidate: &DiscoveryCandidate, chain: &str) -> bool {
        let key = candidate.token_address.to_lowercase();

        if let Some(until) = self.error_skip_until.lock().await.get(&key) {
            if Utc::now() < *until {
                return false;
            }
        }

        if self.store.get_skip_phases(&candidate.token_address, chain).await.unwrap_or(0) > 0 {
            return false;
        }

        if let Ok(Some(last)) = self.store.get_last_entry_time(&candidate.token_address, chain).await {
            if Utc::now() - last < Duration::seconds(self.config.cooldown_seconds as i64) {
                return false;
            }
        }

        true
    }

    async fn open_position(&self, candidate: &DiscoveryCandidate) -> EngineResult<Position> {
        let native_price = self.native_price.lock().await.map(|(p, _)| p);
        let notional_usd = self.config.position_size_usd;

        let quote = self
            .trader
            .get_quote(&candidate.token_address, notional_usd, Side::Buy, native_price)
            .await?;

        let outcome = self
            .trader
            .execute_trade(&candidate.token_address, notional_usd, Side::Buy, None, self.config.dry_run, Some(&quote), native_price)
            .await?;

        self.store
            .record_execution(NewExecution {
                position_id: None,
                token_address: candidate.token_address.clone(),
                symbol: candidate.symbol.clone(),
                chain: candidate.chain.clone(),
                action: Side::Buy,
                requested_notional_usd: Some(notional_usd),
                executed_price: outcome.executed_price,
                quantity_token: outcome.quantity_token,
                tx_hash: outcome.tx_hash.clone(),
                success: outcome.success,
                error: outcome.error.clone(),
                metadata: None,
            })
            .await?;

        if !outcome.success {
            return Err(crate::error::EngineError::DomainRefusal(
                outcome.error.unwrap_or_else(|| "trade execution failed".to_string()),
            ));
        }

        let entry_price = outcome.executed_price.unwrap_or(quote.price);
        let quantity_token = outcome.quantity_token.unwrap_or(notional_usd / entry_price);
        let stop_price = entry_price * (1.0 - self.config.stop_loss_pct / 100.0);
        let take_price = entry_price * (1.0 + self.config.take_profit_pct / 100.0);

        let position = self
            .store
            .add_position(NewPosition {
                token_address: candidate.token_address.clone(),
                symbol: candidate.symbol.clone(),
                chain: candidate.chain.clone(),
                entry_price,
                quantity_token,
                notional_usd,
                stop_price,
                take_price,
                dry_run: self.config.dry_run,
                momentum_score: Some(candidate.momentum_score),
                discovery_reasoning: Some(candidate.reasoning.clone()),
            })
            .await?;

        info!(token = %candidate.token_address, price = entry_price, qty = quantity_token, "opened position");
        Ok(position)
    }

    #[instrument(skip(self))]
    pub async fn run_exit_checks(&self) -> ExitCycleResult {
        let mut result = ExitCycleResult::new(Utc::now());
        let chain = self.config.chain_normalized();

        if let Err(e) = self.refresh_native_price().await {
            result.errors.push(format!("native price refresh failed: {e}"));
        }

        let positions = match self.store.list_open_positions(&chain).await {
            Ok(p) => p,
            Err(e) => {
                result.errors.push(e.to_string());
                return result;
            }
        };
        result.positions_checked = positions.len();

        for position in positions {
            match self.evaluate_position(&position).await {
                Ok(Some(())) => result.trailing_stops_updated += 1,
                Ok(None) => {}
                Err(e) => result.errors.push(format!("{}: {e}", position.token_address)),
            }

            match self.maybe_close(&position).await {
                Ok(Some(closed)) => result.positions_closed.push(closed),
                Ok(None) => {}
                Err(e) => result.errors.push(format!("{}: {e}", position.token_address)),
            }
        }

        result.summary = format!(
            "{} checked, {} trailing stops updated, {} closed",
            result.positions_checked,
            result.trailing_stops_updated,
            result.positions_closed.len()
        );
        result
    }

    /// Updates the trailing stop if the current price sets a new high.
    /// Returns `Ok(Some(()))` when an update was written.
    async fn evaluate_position(&self, position: &Position) -> EngineResult<Option<()>> {
        let current_price = self.fetch_current_price(&position.token_address).await?;
        let new_highest = position.highest_price.max(current_price);
        let trailing_stop = new_highest * (1.0 - self.config.trailing_stop_pct / 100.0);
        let new_stop = position.stop_price.max(trailing_stop);

        if new_highest > position.highest_price || new_stop > position.stop_price {
            self.store.update_trailing_stop(position.id, new_highest, new_stop).await?;
            return Ok(Some(()));
        }
        Ok(None)
    }

    async fn maybe_close(&self, position: &Position) -> EngineResult<Option<Position>> {
        let current_price = self.fetch_current_price(&position.token_address).await?;
        let Some(reason) = exit_reason(position, current_price, self.config.max_hold_hours as f64) else {
            return Ok(None);
        };
        self.close_position(position, current_price, reason).await.map(Some)
    }

    async fn close_position(&self, position: &Position, current_price: f64, reason: CloseReason) -> EngineResult<Position> {
        let native_price = self.native_price.lock().await.map(|(p, _)| p);

        let wallet_balance = self.trader.get_wallet_token_balance(&position.token_address).await;
        let sell_qty = match wallet_balance {
            Some(balance) if !position.dry_run => balance.min(position.quantity_token),
            _ => position.quantity_token,
        };

        let notional_usd = sell_qty * current_price;
        let outcome = self
            .trader
            .execute_trade(&position.token_address, notional_usd, Side::Sell, Some(sell_qty), position.dry_run, None, native_price)
            .await?;

        self.store
            .record_execution(NewExecution {
                position_id: Some(position.id),
                token_address: position.token_address.clone(),
                symbol: position.symbol.clone(),
                chain: position.chain.clone(),
                action: Side::Sell,
                requested_notional_usd: Some(notional_usd),
                executed_price: outcome.executed_price,
                quantity_token: outcome.quantity_token,
                tx_hash: outcome.tx_hash.clone(),
                success: outcome.success,
                error: outcome.error.clone(),
                metadata: None,
            })
            .await?;

        let exit_price = outcome.executed_price.unwrap_or(current_price);
        let realized_pnl = (exit_price - position.entry_price) * sell_qty;

        self.store.close_position(position.id, exit_price, realized_pnl, reason).await?;

        if reason == CloseReason::StopLoss && realized_pnl < 0.0 {
            self.store.increment_negative_sl_count(&position.token_address, &position.chain).await?;
        }

        info!(token = %position.token_address, ?reason, pnl = realized_pnl, "closed position");

        let mut closed = position.clone();
        closed.status = crate::models::PositionStatus::Closed;
        closed.exit_price = Some(exit_price);
        closed.realized_pnl_usd = Some(realized_pnl);
        closed.close_reason = Some(reason);
        Ok(closed)
    }

    async fn fetch_current_price(&self, token_address: &str) -> EngineResult<f64> {
        let chain = self.config.chain_normalized();
        let (price, _liquidity) = self.market.fetch_reference(&chain, token_address).await?;
        Ok(price)
    }

    async fn refresh_native_price(&self) -> EngineResult<()> {
        let stale = {
            let guard = self.native_price.lock().await;
            match *guard {
                None => true,
                Some((_, at)) => (Utc::now() - at).num_seconds() > NATIVE_PRICE_STALE_SECONDS,
            }
        };
        if !stale {
            return Ok(());
        }

        let chain = self.config.chain_normalized();
        let (price, _liquidity) = self.market.fetch_reference(&chain, NATIVE_MINT).await?;
        *self.native_price.lock().await = Some((price, Utc::now()));
        Ok(())
    }
}

/// stop_loss < take_profit < max_hold_time, the first matching reason
/// wins.
fn exit_reason(position: &Position, current_price: f64, max_hold_hours: f64) -> Option<CloseReason> {
    if current_price <= position.stop_price {
        return Some(CloseReason::StopLoss);
    }
    if current_price >= position.take_price {
        return Some(CloseReason::TakeProfit);
    }
    let held_hours = (Utc::now() - position.opened_at).num_seconds() as f64 / 3600.0;
    if held_hours >= max_hold_hours {
        return Some(CloseReason::MaxHoldTime);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionStatus;

    fn position(entry: f64, stop: f64, take: f64, highest: f64) -> Position {
        Position {
            id: 1,
            token_address: "mint".to_string(),
            symbol: "PEPE".to_string(),
            chain: "solana".to_string(),
            entry_price: entry,
            quantity_token: 100.0,
            notional_usd: 100.0,
            stop_price: stop,
            take_price: take,
            highest_price: highest,
            opened_at: Utc::now(),
            closed_at: None,
            exit_price: None,
            realized_pnl_usd: None,
            status: PositionStatus::Open,
            close_reason: None,
            dry_run: true,
            momentum_score: None,
            discovery_reasoning: None,
        }
    }

    #[test]
    fn stop_loss_wins_when_price_at_or_below_stop() {
        let p = position(1.0, 0.9, 1.2, 1.0);
        assert_eq!(exit_reason(&p, 0.9, 24.0), Some(CloseReason::StopLoss));
    }

    #[test]
    fn take_profit_triggers_when_price_reaches_target() {
        let p = position(1.0, 0.9, 1.2, 1.0);
        assert_eq!(exit_reason(&p, 1.2, 24.0), Some(CloseReason::TakeProfit));
    }

    #[test]
    fn no_exit_when_within_band_and_fresh() {
        let p = position(1.0, 0.9, 1.2, 1.0);
        assert_eq!(exit_reason(&p, 1.05, 24.0), None);
    }
}
