//! Trader Execution Service: adapts an opaque external trader tool into a
//! uniform `get_quote` / `execute_trade` / `get_wallet_token_balance`
//! surface, inferring argument shapes from the trader's own JSON schema.

mod args;
mod normalize;

use crate::error::{EngineError, EngineResult};
use crate::models::Side;
use crate::tools::chain_rpc::DecimalsCache;
use crate::tools::{ToolDescriptor, ToolProvider};
use args::{build_args, ArgContext};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub use args::ArgKind;
pub use normalize::{extract_price, extract_quantity, extract_success, extract_tx_hash};

const QUOTE_EXACT: &[&str] = &["get_quote", "quote", "getQuote", "quote_swap", "swap_quote", "jupiter_quote"];
const EXECUTE_EXACT: &[&str] = &["swap", "execute_swap", "trade", "execute_trade", "place_order"];
const EXECUTE_SUBSTR: &[&str] = &["swap", "trade", "order"];
const BUY_EXACT: &[&str] = &["buy_token", "buy", "buyToken"];
const SELL_EXACT: &[&str] = &["sell_token", "sell", "sellToken"];
const BALANCE_EXACT: &[&str] = &["get_balance"];

/// The trader tool's quote and execute methods, resolved once from its
/// declared tool list and memoized for the lifetime of the service.
#[derive(Debug, Clone)]
pub struct TraderMethodSet {
    pub quote: ToolDescriptor,
    pub execute: Option<ToolDescriptor>,
    pub buy: Option<ToolDescriptor>,
    pub sell: Option<ToolDescriptor>,
    pub balance: Option<ToolDescriptor>,
}

/// A pre-trade price estimate, optionally carrying a route hint that gets
/// passed straight back into `execute_trade`.
#[derive(Debug, Clone)]
pub struct Quote {
    pub price: f64,
    pub quantity: Option<f64>,
    pub raw: Value,
}

/// Outcome of one `execute_trade` call, dry-run or live.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub success: bool,
    pub executed_price: Option<f64>,
    pub quantity_token: Option<f64>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

pub struct TraderExecutionService {
    provider: Arc<dyn ToolProvider>,
    chain: String,
    max_slippage_bps: u32,
    quote_mint: String,
    decimals: Arc<DecimalsCache>,
    methods: TraderMethodSet,
}

impl TraderExecutionService {
    pub fn new(
        provider: Arc<dyn ToolProvider>,
        chain: String,
        max_slippage_bps: u32,
        quote_mint: String,
        decimals: Arc<DecimalsCache>,
        quote_method_override: Option<&str>,
        execute_method_override: Option<&str>,
    ) -> EngineResult<Self> {
        let methods = resolve_methods(provider.list_tools(), quote_method_override, execute_method_override)?;
        Ok(Self {
            provider,
            chain,
            max_slippage_bps,
            quote_mint,
            decimals,
            methods,
        })
    }

    #[instrument(skip(self), fields(token = %token_address, side = %side))]
    pub async fn get_quote(
        &self,
        token_address: &str,
        notional_usd: f64,
        side: Side,
        native_price_usd: Option<f64>,
    ) -> EngineResult<Quote> {
        let token_decimals = self.decimals.get_decimals(token_address).await;
        let ctx = ArgContext {
            chain: &self.chain,
            side,
            native_mint: crate::tools::chain_rpc::NATIVE_MINT,
            token_address,
            quote_mint: &self.quote_mint,
            max_slippage_bps: self.max_slippage_bps,
            notional_usd,
            native_price_usd,
            token_decimals,
            quantity_token: None,
            quote_payload: None,
        };
        let arguments = build_args(&self.methods.quote, &ctx)?;
        let raw = self.provider.call(&self.methods.quote.name, arguments).await?;

        let price = extract_price(&raw, side, native_price_usd, token_decimals)
            .ok_or_else(|| EngineError::DataShape("quote response carries no usable price".to_string()))?;
        if price <= 0.0 {
            return Err(EngineError::DomainRefusal("quote price is not positive".to_string()));
        }
        let quantity = extract_quantity(&raw, side, token_decimals);

        Ok(Quote { price, quantity, raw })
    }

    #[instrument(skip(self, quote), fields(token = %token_address, side = %side, dry_run))]
    pub async fn execute_trade(
        &self,
        token_address: &str,
        notional_usd: f64,
        side: Side,
        quantity_token: Option<f64>,
        dry_run: bool,
        quote: Option<&Quote>,
        native_price_usd: Option<f64>,
    ) -> EngineResult<TradeOutcome> {
        let token_decimals = self.decimals.get_decimals(token_address).await;

        if dry_run {
            let executed_price = quote.map(|q| q.price);
            let quantity = quantity_token.or_else(|| {
                quote
                    .and_then(|q| q.quantity)
                    .or_else(|| executed_price.filter(|p| *p > 0.0).map(|p| notional_usd / p))
            });
            return Ok(TradeOutcome {
                success: true,
                executed_price,
                quantity_token: quantity,
                tx_hash: None,
                error: None,
            });
        }

        let tool = match side {
            Side::Buy => self.methods.buy.as_ref().unwrap_or_else(|| self.generic_execute()),
            Side::Sell => self.methods.sell.as_ref().unwrap_or_else(|| self.generic_execute()),
        };

        let ctx = ArgContext {
            chain: &self.chain,
            side,
            native_mint: crate::tools::chain_rpc::NATIVE_MINT,
            token_address,
            quote_mint: &self.quote_mint,
            max_slippage_bps: self.max_slippage_bps,
            notional_usd,
            native_price_usd,
            token_decimals,
            quantity_token,
            quote_payload: quote.map(|q| q.raw.clone()),
        };
        let arguments = build_args(tool, &ctx)?;
        let raw = self.provider.call(&tool.name, arguments).await?;

        let mut success = extract_success(&raw);
        let mut error = None;
        let tx_hash = extract_tx_hash(&raw);

        // Absence of a transaction hash on a live trade forces failure even
        // if the response otherwise claims success, to avoid silent no-ops.
        if success && tx_hash.is_none() {
            success = false;
            error = Some("No transaction hash in trader response".to_string());
        } else if !success {
            error = raw
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(Some("trader reported failure".to_string()));
        }

        let executed_price = extract_price(&raw, side, native_price_usd, token_decimals);
        let mut quantity = extract_quantity(&raw, side, token_decimals);
        if quantity.is_none() {
            if let Some(price) = executed_price.filter(|p| *p > 0.0) {
                quantity = Some(notional_usd / price);
            }
        }

        if success {
            info!(price = ?executed_price, qty = ?quantity, "trade executed");
        } else {
            warn!(?error, "trade execution refused");
        }

        Ok(TradeOutcome {
            success,
            executed_price,
            quantity_token: quantity,
            tx_hash,
            error,
        })
    }

    #[instrument(skip(self), fields(token = %token_address))]
    pub async fn get_wallet_token_balance(&self, token_address: &str) -> Option<f64> {
        let balance_tool = self.methods.balance.as_ref()?;
        let result = self
            .provider
            .call(&balance_tool.name, serde_json::json!({ "token_address": token_address }))
            .await
            .ok()?;

        result
            .get("tokenBalance")
            .and_then(|tb| tb.get("uiAmount"))
            .and_then(crate::tools::coerce_f64)
    }

    fn generic_execute(&self) -> &ToolDescriptor {
        self.methods
            .execute
            .as_ref()
            .expect("resolve_methods guarantees an execute method when no buy/sell pair exists")
    }
}

fn resolve_methods(
    tools: &[ToolDescriptor],
    quote_override: Option<&str>,
    execute_override: Option<&str>,
) -> EngineResult<TraderMethodSet> {
    let quote = quote_override
        .and_then(|name| find_exact(tools, name))
        .or_else(|| find_by_exact_list(tools, QUOTE_EXACT))
        .or_else(|| find_by_substring(tools, &["quote"]))
        .ok_or_else(|| EngineError::Configuration("trader tool exposes no resolvable quote method".to_string()))?
        .clone();

    let execute = execute_override
        .and_then(|name| find_exact(tools, name))
        .or_else(|| find_by_exact_list(tools, EXECUTE_EXACT))
        .or_else(|| find_by_substring(tools, EXECUTE_SUBSTR))
        .cloned();

    let buy = find_by_exact_list(tools, BUY_EXACT).cloned();
    let sell = find_by_exact_list(tools, SELL_EXACT).cloned();
    let balance = find_by_exact_list(tools, BALANCE_EXACT)
        .or_else(|| find_by_substring(tools, &["balance"]))
        .cloned();

    if execute.is_none() && !(buy.is_some() && sell.is_some()) {
        return Err(EngineError::Configuration(
            "trader tool exposes neither a generic execute method nor a complete buy/sell pair".to_string(),
        ));
    }

    Ok(TraderMethodSet { quote, execute, buy, sell, balance })
}

fn find_exact<'a>(tools: &'a [ToolDescriptor], name: &str) -> Option<&'a ToolDescriptor> {
    tools.iter().find(|t| t.name == name)
}

fn find_by_exact_list<'a>(tools: &'a [ToolDescriptor], names: &[&str]) -> Option<&'a ToolDescriptor> {
    names.iter().find_map(|name| find_exact(tools, name))
}

fn find_by_substring<'a>(tools: &'a [ToolDescriptor], substrings: &[&str]) -> Option<&'a ToolDescriptor> {
    tools
        .iter()
        .find(|t| substrings.iter().any(|s| t.name.to_lowercase().contains(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDescriptor;
    use async_trait::async_trait;
    use serde_json::json;

    fn descriptor(name: &str, schema: Value) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            input_schema: schema,
        }
    }

    struct StubProvider {
        tools: Vec<ToolDescriptor>,
        response: Value,
    }

    #[async_trait]
    impl ToolProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        fn list_tools(&self) -> &[ToolDescriptor] {
            &self.tools
        }
        async fn call(&self, _method: &str, _args: Value) -> EngineResult<Value> {
            Ok(self.response.clone())
        }
    }

    fn quote_schema() -> Value {
        json!({
            "properties": {
                "chainId": {"type": "string"},
                "tokenAddress": {"type": "string"},
                "notionalUsd": {"type": "number"}
            },
            "required": ["chainId", "tokenAddress", "notionalUsd"]
        })
    }

    #[test]
    fn resolves_exact_name_quote_method() {
        let tools = vec![descriptor("get_quote", quote_schema())];
        let methods = resolve_methods(&tools, None, None);
        assert!(methods.is_err()); // no execute/buy+sell -> configuration error
    }

    #[test]
    fn resolves_quote_and_generic_execute() {
        let tools = vec![descriptor("get_quote", quote_schema()), descriptor("swap", quote_schema())];
        let methods = resolve_methods(&tools, None, None).unwrap();
        assert_eq!(methods.quote.name, "get_quote");
        assert_eq!(methods.execute.unwrap().name, "swap");
    }

    #[test]
    fn resolves_buy_sell_pair_without_generic_execute() {
        let tools = vec![
            descriptor("get_quote", quote_schema()),
            descriptor("buy_token", quote_schema()),
            descriptor("sell_token", quote_schema()),
        ];
        let methods = resolve_methods(&tools, None, None).unwrap();
        assert!(methods.execute.is_none());
        assert!(methods.buy.is_some());
        assert!(methods.sell.is_some());
    }

    #[tokio::test]
    async fn dry_run_never_calls_provider_and_uses_quote_price() {
        let tools = vec![descriptor("get_quote", quote_schema()), descriptor("swap", quote_schema())];
        let provider: Arc<dyn ToolProvider> = Arc::new(StubProvider {
            tools,
            response: json!({"success": true, "txHash": "abc"}),
        });
        let decimals = Arc::new(DecimalsCache::new("http://localhost".into(), "usdcmint"));
        let service = TraderExecutionService::new(
            provider,
            "solana".into(),
            300,
            "usdcmint".into(),
            decimals,
            None,
            None,
        )
        .unwrap();

        let quote = Quote { price: 2.0, quantity: None, raw: json!({}) };
        let outcome = service
            .execute_trade("tokenmint", 10.0, Side::Buy, None, true, Some(&quote), Some(150.0))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.tx_hash, None);
        assert_eq!(outcome.executed_price, Some(2.0));
        assert_eq!(outcome.quantity_token, Some(5.0));
    }

    #[tokio::test]
    async fn live_trade_without_tx_hash_is_forced_failure() {
        let tools = vec![descriptor("get_quote", quote_schema()), descriptor("swap", quote_schema())];
        let provider: Arc<dyn ToolProvider> = Arc::new(StubProvider {
            tools,
            response: json!({"status": "success"}),
        });
        let decimals = Arc::new(DecimalsCache::new("http://localhost".into(), "usdcmint"));
        let service = TraderExecutionService::new(
            provider,
            "solana".into(),
            300,
            "usdcmint".into(),
            decimals,
            None,
            None,
        )
        .unwrap();

        let outcome = service
            .execute_trade("tokenmint", 10.0, Side::Buy, None, false, None, Some(150.0))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("No transaction hash in trader response"));
    }
}
