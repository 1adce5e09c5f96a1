//! End-to-end scenario tests driving the public `StrategyEngine`/`Store`
//! surface with stub tool providers, instead of hitting live collaborators.

use async_trait::async_trait;
use dex_strategy_engine::config::AppConfig;
use dex_strategy_engine::discovery::DiscoveryPipeline;
use dex_strategy_engine::engine::{ChatFactory, StrategyEngine};
use dex_strategy_engine::error::EngineResult;
use dex_strategy_engine::execution::TraderExecutionService;
use dex_strategy_engine::llm::{ChatSession, ChatTurn};
use dex_strategy_engine::models::CloseReason;
use dex_strategy_engine::persistence::Store;
use dex_strategy_engine::price_cache::PriceCache;
use dex_strategy_engine::tools::chain_rpc::DecimalsCache;
use dex_strategy_engine::tools::market_data::QuoteSource;
use dex_strategy_engine::tools::safety::SafetyChecker;
use dex_strategy_engine::tools::{ToolDescriptor, ToolProvider};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A market-data stub whose `get_token_pools` price for a given token can be
/// pushed around between scan/exit cycles, modelling "the price observed
/// this cycle" without needing real time to pass.
struct StubMarket {
    prices: Mutex<HashMap<String, f64>>,
}

impl StubMarket {
    fn new() -> Self {
        Self { prices: Mutex::new(HashMap::new()) }
    }

    fn set_price(&self, token: &str, price: f64) {
        self.prices.lock().unwrap().insert(token.to_lowercase(), price);
    }
}

#[async_trait]
impl ToolProvider for StubMarket {
    fn name(&self) -> &str {
        "market-data"
    }
    fn list_tools(&self) -> &[ToolDescriptor] {
        &[]
    }
    async fn call(&self, method: &str, args: Value) -> EngineResult<Value> {
        match method {
            "get_token_pools" => {
                let token = args.get("tokenAddress").and_then(Value::as_str).unwrap_or_default();
                let price = *self.prices.lock().unwrap().get(&token.to_lowercase()).unwrap_or(&1.0);
                Ok(json!([{
                    "priceUsd": price,
                    "baseToken": { "symbol": "PEPE" },
                    "volume": { "h24": 500_000.0 },
                    "liquidity": { "usd": 150_000.0 },
                    "marketCap": 3_000_000.0,
                    "priceChange": { "h24": 40.0 },
                }]))
            }
            "get_top_boosted_tokens" => Ok(json!([{ "tokenAddress": TOKEN }])),
            "get_latest_boosted_tokens" => Ok(json!([])),
            "search_pairs" => Ok(json!([])),
            other => panic!("unexpected market-data call: {other}"),
        }
    }
}

/// Always reports a safe score so discovery candidates are never rejected
/// on the safety gate in these scenarios.
struct StubSafety;

#[async_trait]
impl ToolProvider for StubSafety {
    fn name(&self) -> &str {
        "safety"
    }
    fn list_tools(&self) -> &[ToolDescriptor] {
        &[]
    }
    async fn call(&self, _method: &str, _args: Value) -> EngineResult<Value> {
        Ok(json!({ "score": 100, "risks": [] }))
    }
}

/// A trader stub whose quote/execute responses are fixed at construction
/// time; good enough for scenarios that only exercise the sell leg.
struct StubTrader {
    quote_response: Value,
    execute_response: Value,
}

#[async_trait]
impl ToolProvider for StubTrader {
    fn name(&self) -> &str {
        "trader"
    }
    fn list_tools(&self) -> &[ToolDescriptor] {
        &[]
    }
    async fn call(&self, method: &str, _args: Value) -> EngineResult<Value> {
        match method {
            "get_quote" => Ok(self.quote_response.clone()),
            "swap" => Ok(self.execute_response.clone()),
            other => panic!("unexpected trader call: {other}"),
        }
    }
}

fn trader_tools() -> Vec<ToolDescriptor> {
    let schema = json!({
        "properties": {
            "chainId": {"type": "string"},
            "tokenAddress": {"type": "string"},
            "side": {"type": "string"},
            "notionalUsd": {"type": "number"},
            "slippageBps": {"type": "integer"}
        },
        "required": ["chainId", "tokenAddress", "notionalUsd"]
    });
    vec![
        ToolDescriptor { name: "get_quote".to_string(), description: String::new(), input_schema: schema.clone() },
        ToolDescriptor { name: "swap".to_string(), description: String::new(), input_schema: schema },
    ]
}

/// Never actually invoked by exit-check-only scenarios, but required to
/// build a `StrategyEngine`.
struct NeverCalledChat;

#[async_trait]
impl ChatSession for NeverCalledChat {
    async fn send(&mut self, _message: &str) -> EngineResult<ChatTurn> {
        panic!("chat session should not be used in exit-check-only scenarios")
    }
    async fn send_tool_results(&mut self, _results: Vec<(String, Value)>) -> EngineResult<ChatTurn> {
        panic!("chat session should not be used in exit-check-only scenarios")
    }
}

/// Immediately returns a fixed approve/reject decision as plain text,
/// skipping the tool-calling rounds entirely.
struct ScriptedChat {
    decision_json: String,
}

#[async_trait]
impl ChatSession for ScriptedChat {
    async fn send(&mut self, _message: &str) -> EngineResult<ChatTurn> {
        Ok(ChatTurn::Text(self.decision_json.clone()))
    }
    async fn send_tool_results(&mut self, _results: Vec<(String, Value)>) -> EngineResult<ChatTurn> {
        Ok(ChatTurn::Text(self.decision_json.clone()))
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.dry_run = true;
    config.max_positions = 5;
    config.position_size_usd = 100.0;
    config.take_profit_pct = 15.0;
    config.stop_loss_pct = 8.0;
    config.trailing_stop_pct = 5.0;
    config.max_hold_hours = 24;
    config.min_volume_usd = 1.0;
    config.min_liquidity_usd = 1.0;
    config.min_market_cap_usd = 1.0;
    config.min_momentum_score = 1.0;
    config.cooldown_seconds = 0;
    config
}

struct Harness {
    engine: Arc<StrategyEngine>,
    store: Arc<Store>,
    market: Arc<StubMarket>,
}

fn build_harness(config: AppConfig, trader_quote: Value, trader_execute: Value, decision_json: &str) -> Harness {
    let market_stub = Arc::new(StubMarket::new());
    let market_provider: Arc<dyn ToolProvider> = market_stub.clone();
    let price_cache = Arc::new(PriceCache::new(-1));
    let market = Arc::new(QuoteSource::new(market_provider, price_cache));

    let safety_provider: Arc<dyn ToolProvider> = Arc::new(StubSafety);
    let safety = Arc::new(SafetyChecker::new(safety_provider));

    let decimals = Arc::new(DecimalsCache::new("http://localhost".to_string(), &config.quote_mint));
    let trader_provider: Arc<dyn ToolProvider> =
        Arc::new(StubTrader { quote_response: trader_quote, execute_response: trader_execute });
    let trader = Arc::new(
        TraderExecutionService::new(trader_provider, config.chain_normalized(), config.max_slippage_bps, config.quote_mint.clone(), decimals, None, None)
            .unwrap(),
    );

    let store = Arc::new(Store::open_in_memory().unwrap());
    let discovery = Arc::new(DiscoveryPipeline::new(Arc::clone(&market), safety, &config));

    let decision_tools: Arc<dyn ToolProvider> = Arc::new(StubSafety);
    let decision_owned = decision_json.to_string();
    let chat_factory: ChatFactory = Arc::new(move || Box::new(ScriptedChat { decision_json: decision_owned.clone() }) as Box<dyn ChatSession>);

    let engine = Arc::new(StrategyEngine::new(config, store.clone(), discovery, trader, Arc::clone(&market), decision_tools, chat_factory));

    Harness { engine, store, market: market_stub }
}

const TOKEN: &str = "Mint1111111111111111111111111111111111111";

async fn open_dry_run_position(h: &Harness, entry_price: f64) -> i64 {
    h.market.set_price(TOKEN, entry_price);
    use dex_strategy_engine::models::NewPosition;
    let stop_price = entry_price * (1.0 - 8.0 / 100.0);
    let take_price = entry_price * (1.0 + 15.0 / 100.0);
    let position = h
        .store
        .add_position(NewPosition {
            token_address: TOKEN.to_string(),
            symbol: "PEPE".to_string(),
            chain: "solana".to_string(),
            entry_price,
            quantity_token: 100.0,
            notional_usd: entry_price * 100.0,
            stop_price,
            take_price,
            dry_run: true,
            momentum_score: Some(80.0),
            discovery_reasoning: Some("test setup".to_string()),
        })
        .await
        .unwrap();
    position.id
}

/// S1 — take-profit exit across three price-checking cycles.
#[tokio::test]
async fn s1_take_profit_exit_after_trailing_updates() {
    let h = build_harness(test_config(), json!({}), json!({}), "{}");
    open_dry_run_position(&h, 1.0).await;

    h.market.set_price(TOKEN, 1.05);
    let r1 = h.engine.run_exit_checks().await;
    assert_eq!(r1.trailing_stops_updated, 1);
    assert!(r1.positions_closed.is_empty());
    let open = h.store.get_open_position(TOKEN, "solana").await.unwrap().unwrap();
    assert!((open.stop_price - 0.9975).abs() < 1e-9);
    assert!((open.highest_price - 1.05).abs() < 1e-9);

    h.market.set_price(TOKEN, 1.10);
    let r2 = h.engine.run_exit_checks().await;
    assert_eq!(r2.trailing_stops_updated, 1);
    let open = h.store.get_open_position(TOKEN, "solana").await.unwrap().unwrap();
    assert!((open.stop_price - 1.045).abs() < 1e-9);

    h.market.set_price(TOKEN, 1.20);
    let r3 = h.engine.run_exit_checks().await;
    assert_eq!(r3.positions_closed.len(), 1);
    let closed = &r3.positions_closed[0];
    assert_eq!(closed.close_reason, Some(CloseReason::TakeProfit));
    assert!((closed.realized_pnl_usd.unwrap() - 20.0).abs() < 1e-6);

    assert_eq!(h.store.get_skip_phases(TOKEN, "solana").await.unwrap(), 0);
}

/// S2 — trailing stop ratchets up, a pullback leaves it untouched, then a
/// stop-out at a still-profitable price does not penalize the token.
#[tokio::test]
async fn s2_trailing_stop_ratchet_then_stop_out_is_not_penalized() {
    let h = build_harness(test_config(), json!({}), json!({}), "{}");
    open_dry_run_position(&h, 1.0).await;

    h.market.set_price(TOKEN, 1.20);
    h.engine.run_exit_checks().await;
    let open = h.store.get_open_position(TOKEN, "solana").await.unwrap().unwrap();
    assert!((open.stop_price - 1.14).abs() < 1e-9);
    assert!((open.highest_price - 1.20).abs() < 1e-9);

    h.market.set_price(TOKEN, 1.10);
    let r2 = h.engine.run_exit_checks().await;
    assert!(r2.positions_closed.is_empty());
    let open = h.store.get_open_position(TOKEN, "solana").await.unwrap().unwrap();
    assert!((open.stop_price - 1.14).abs() < 1e-9, "stop must not move down on a pullback");
    assert!((open.highest_price - 1.20).abs() < 1e-9, "highest must not move down on a pullback");

    h.market.set_price(TOKEN, 1.13);
    let r3 = h.engine.run_exit_checks().await;
    assert_eq!(r3.positions_closed.len(), 1);
    let closed = &r3.positions_closed[0];
    assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
    assert!(closed.realized_pnl_usd.unwrap() > 0.0, "exit price is still above entry");

    assert_eq!(
        h.store.get_skip_phases(TOKEN, "solana").await.unwrap(),
        0,
        "a profitable stop-loss exit must not trigger the negative-SL escalation"
    );
}

/// S3 — two consecutive negative-PnL stop-loss closes escalate a token into
/// a skip phase; the phase decrements and clears on the following cycle.
#[tokio::test]
async fn s3_two_negative_stop_losses_trigger_then_clear_skip_phase() {
    let store = Store::open_in_memory().unwrap();

    let count1 = store.increment_negative_sl_count(TOKEN, "solana").await.unwrap();
    assert_eq!(count1, 1);
    assert_eq!(store.get_skip_phases(TOKEN, "solana").await.unwrap(), 0);

    let count2 = store.increment_negative_sl_count(TOKEN, "solana").await.unwrap();
    assert_eq!(count2, 2);
    assert_eq!(
        store.get_skip_phases(TOKEN, "solana").await.unwrap(),
        1,
        "the second negative stop-loss must set skip_phases without a separate call"
    );

    store.decrement_all_skip_phases().await.unwrap();
    assert_eq!(store.get_skip_phases(TOKEN, "solana").await.unwrap(), 0);
    assert_eq!(
        store.get_negative_sl_count(TOKEN, "solana").await.unwrap(),
        0,
        "the finally-block decrement must also reset the counter once skip_phases hits zero"
    );
}

/// S4 — a live trade whose trader response has no transaction hash is
/// forced to failure, regardless of the claimed status.
#[tokio::test]
async fn s4_live_trade_without_tx_hash_forces_failure_and_opens_nothing() {
    let mut config = test_config();
    config.dry_run = false;

    let quote = json!({ "priceUsd": 1.0 });
    let execute = json!({ "status": "success" });
    let h = build_harness(config, quote, execute, r#"{"should_buy": true, "momentum_score": 90, "reasoning": "ok"}"#);

    h.market.set_price(TOKEN, 1.0);
    let result = h.engine.run_discovery_cycle().await;

    assert!(result.positions_opened.is_empty());
    assert!(!result.errors.is_empty());
    assert!(h.store.get_open_position(TOKEN, "solana").await.unwrap().is_none());
    assert_eq!(h.store.get_skip_phases(TOKEN, "solana").await.unwrap(), 0);
}

/// S5 — when the native price refresh fails, the discovery cycle still
/// completes and still runs its unconditional skip-phase decrement.
#[tokio::test]
async fn s5_native_price_unavailable_still_decrements_skip_phases() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.set_skip_phases("othertoken", "solana", 2).await.unwrap();

    let failing_market: Arc<dyn ToolProvider> = Arc::new(FailingMarket);
    let price_cache = Arc::new(PriceCache::new(60));
    let market = Arc::new(QuoteSource::new(failing_market, price_cache));

    let config = test_config();
    let safety_provider: Arc<dyn ToolProvider> = Arc::new(StubSafety);
    let safety = Arc::new(SafetyChecker::new(safety_provider));
    let discovery = Arc::new(DiscoveryPipeline::new(Arc::clone(&market), safety, &config));

    let decimals = Arc::new(DecimalsCache::new("http://localhost".to_string(), &config.quote_mint));
    let trader_provider: Arc<dyn ToolProvider> = Arc::new(StubTrader { quote_response: json!({}), execute_response: json!({}) });
    let trader = Arc::new(
        TraderExecutionService::new(trader_provider, config.chain_normalized(), config.max_slippage_bps, config.quote_mint.clone(), decimals, None, None)
            .unwrap(),
    );
    let decision_tools: Arc<dyn ToolProvider> = Arc::new(StubSafety);
    let chat_factory: ChatFactory = Arc::new(|| Box::new(NeverCalledChat) as Box<dyn ChatSession>);
    let engine = StrategyEngine::new(config, Arc::clone(&store), discovery, trader, market, decision_tools, chat_factory);

    let result = engine.run_discovery_cycle().await;
    assert!(result.errors.iter().any(|e| e.contains("native price refresh failed")));
    assert_eq!(store.get_skip_phases("othertoken", "solana").await.unwrap(), 0);
}

struct FailingMarket;

#[async_trait]
impl ToolProvider for FailingMarket {
    fn name(&self) -> &str {
        "market-data"
    }
    fn list_tools(&self) -> &[ToolDescriptor] {
        &[]
    }
    async fn call(&self, _method: &str, _args: Value) -> EngineResult<Value> {
        Err(dex_strategy_engine::error::EngineError::Transient("feed unreachable".to_string()))
    }
}

/// S6 — a 6-decimal token buy: the trader reports `solSpent`/`tokenReceived`
/// (native leg already SOL-denominated, token leg raw on-chain units), and
/// the quote must recover a $2.50 per-token price
/// ((0.0025 SOL spent · $200/SOL) / 0.2 tokens received).
#[tokio::test]
async fn s6_six_decimal_token_quote_recovers_price_from_named_amounts() {
    let raw = json!({ "solSpent": 0.0025, "tokenReceived": "200000" });
    use dex_strategy_engine::execution::extract_price;
    use dex_strategy_engine::models::Side;

    let price = extract_price(&raw, Side::Buy, Some(200.0), 6).unwrap();
    assert!((price - 2.5).abs() < 1e-6, "got {price}");
}
