//! Infers a trader tool's call arguments from its declared JSON schema.
//!
//! The trader is an opaque collaborator: its method names and argument
//! shapes vary per integration. Rather than hard-coding one trader's
//! contract, each declared property name is classified by substring match
//! into one of a fixed set of argument kinds, and its value is computed
//! from the current call context. Properties that don't classify are
//! omitted unless required, in which case resolution fails.

use crate::error::{EngineError, EngineResult};
use crate::models::Side;
use serde_json::{Map, Value};

/// One inferred argument kind, matching the sum type covering the
/// substring-keyed dispatch table: chain, side, the two token legs
/// (flavored by whether the property reads as an input or output leg, or
/// carries no flavor at all), slippage in bps or percent, notional USD,
/// lamports, an amount/quantity leg, decimals (input-leg or generic),
/// symbol, a literal dry-run-false flag, and the opaque quote payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Chain,
    Side,
    DryRunFalse,
    QuotePayload,
    TokenInput,
    TokenOutput,
    TokenUnflavored,
    SlippageBps,
    SlippagePct,
    Notional,
    Lamports,
    AmountOrQuantity,
    DecimalsInput,
    DecimalsGeneric,
    Symbol,
}

/// Everything needed to compute a concrete JSON value for any [`ArgKind`]
/// in a single quote or execute call.
pub struct ArgContext<'a> {
    pub chain: &'a str,
    pub side: Side,
    pub native_mint: &'a str,
    pub token_address: &'a str,
    pub quote_mint: &'a str,
    pub max_slippage_bps: u32,
    pub notional_usd: f64,
    pub native_price_usd: Option<f64>,
    pub token_decimals: u8,
    pub quantity_token: Option<f64>,
    pub quote_payload: Option<Value>,
}

/// Split a property name into lowercase words on `_`/`-` and camelCase
/// boundaries, so short, ambiguous keywords (`to`, `in`) only match whole
/// words rather than as substrings of unrelated names (`tokenAddress`).
fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current).to_lowercase());
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current).to_lowercase());
        }
        current.push(c);
        prev_lower = c.is_lowercase();
    }
    if !current.is_empty() {
        words.push(current.to_lowercase());
    }
    words
}

fn has_word(words: &[String], target: &str) -> bool {
    words.iter().any(|w| w == target)
}

/// Classify a declared property name into an [`ArgKind`], or `None` if it
/// matches nothing in the table.
pub fn classify_property(name: &str) -> Option<ArgKind> {
    let lower = name.to_lowercase();
    let words = split_words(name);

    if lower.contains("chain") || lower.contains("network") {
        return Some(ArgKind::Chain);
    }
    if lower.contains("side") || lower.contains("action") || lower.contains("direction") {
        return Some(ArgKind::Side);
    }
    if lower.contains("dry") && lower.contains("run") {
        return Some(ArgKind::DryRunFalse);
    }
    if lower.contains("quote") || lower.contains("route") || lower.contains("swapquote") {
        return Some(ArgKind::QuotePayload);
    }

    let token_ish = lower.contains("token") || lower.contains("mint") || lower.contains("address");
    if token_ish {
        let input_flavor = has_word(&words, "input")
            || has_word(&words, "from")
            || has_word(&words, "source")
            || has_word(&words, "sell")
            || lower.contains("inmint")
            || lower.contains("tokenin");
        let output_flavor = has_word(&words, "output")
            || has_word(&words, "to")
            || has_word(&words, "destination")
            || has_word(&words, "buy")
            || lower.contains("outmint")
            || lower.contains("tokenout");

        if input_flavor {
            return Some(ArgKind::TokenInput);
        }
        if output_flavor {
            return Some(ArgKind::TokenOutput);
        }
        return Some(ArgKind::TokenUnflavored);
    }

    if lower.contains("slippage") && lower.contains("bps") {
        return Some(ArgKind::SlippageBps);
    }
    if lower.contains("slippage") {
        return Some(ArgKind::SlippagePct);
    }
    if lower.contains("notional") || lower.contains("usd") {
        return Some(ArgKind::Notional);
    }
    if lower.contains("lamport") {
        return Some(ArgKind::Lamports);
    }
    if lower.contains("amount") || lower.contains("size") || lower.contains("qty") || lower.contains("quantity") {
        return Some(ArgKind::AmountOrQuantity);
    }
    if lower.contains("decimal") {
        return if has_word(&words, "input") || lower.contains("indecimal") {
            Some(ArgKind::DecimalsInput)
        } else {
            Some(ArgKind::DecimalsGeneric)
        };
    }
    if lower.contains("symbol") {
        return Some(ArgKind::Symbol);
    }

    None
}

/// Compute the JSON value for one resolved [`ArgKind`] in the current
/// call context. Returns `None` only when the value is genuinely
/// unavailable (e.g. no route payload on a quote call).
fn resolve_value(kind: ArgKind, ctx: &ArgContext) -> Option<Value> {
    match kind {
        ArgKind::Chain => Some(Value::String(ctx.chain.to_string())),
        ArgKind::Side => Some(Value::String(ctx.side.to_string())),
        ArgKind::DryRunFalse => Some(Value::Bool(false)),
        ArgKind::QuotePayload => ctx.quote_payload.clone(),
        ArgKind::TokenInput => {
            let mint = match ctx.side {
                Side::Buy => ctx.native_mint,
                Side::Sell => ctx.token_address,
            };
            Some(Value::String(mint.to_string()))
        }
        ArgKind::TokenOutput => {
            let mint = match ctx.side {
                Side::Buy => ctx.token_address,
                Side::Sell => ctx.native_mint,
            };
            Some(Value::String(mint.to_string()))
        }
        ArgKind::TokenUnflavored => Some(Value::String(ctx.token_address.to_string())),
        ArgKind::SlippageBps => Some(Value::from(ctx.max_slippage_bps)),
        ArgKind::SlippagePct => Some(json_f64(ctx.max_slippage_bps as f64 / 100.0)),
        ArgKind::Notional => Some(json_f64(ctx.notional_usd)),
        ArgKind::Lamports => {
            let native_amount = native_amount_units(ctx)?;
            Some(Value::from((native_amount * 1_000_000_000.0).round() as i64))
        }
        ArgKind::AmountOrQuantity => match ctx.side {
            Side::Sell => ctx.quantity_token.map(json_f64).or_else(|| native_amount_units(ctx).map(json_f64)),
            Side::Buy => native_amount_units(ctx).map(json_f64),
        },
        ArgKind::DecimalsInput => {
            let decimals = match ctx.side {
                Side::Buy => 9,
                Side::Sell => ctx.token_decimals,
            };
            Some(Value::from(decimals))
        }
        ArgKind::DecimalsGeneric => Some(Value::from(ctx.token_decimals)),
        ArgKind::Symbol => None,
    }
}

/// Native-token units implied by the notional and the current native
/// price; `None` when no native price is known.
fn native_amount_units(ctx: &ArgContext) -> Option<f64> {
    ctx.native_price_usd
        .filter(|p| *p > 0.0)
        .map(|price| ctx.notional_usd / price)
}

fn json_f64(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Build the JSON argument object for `tool`, classifying each declared
/// property and computing its value from `ctx`. A required property that
/// fails to classify, or whose value cannot be computed, is a
/// configuration error; an optional one is simply omitted.
pub fn build_args(tool: &crate::tools::ToolDescriptor, ctx: &ArgContext) -> EngineResult<Value> {
    let required = tool.required();
    let mut out = Map::new();

    for (name, _schema) in tool.properties() {
        let kind = classify_property(&name);
        let value = kind.and_then(|k| resolve_value(k, ctx));

        match value {
            Some(v) => {
                out.insert(name, v);
            }
            None if required.contains(&name) => {
                return Err(EngineError::Configuration(format!(
                    "cannot infer required argument `{name}` for tool `{}`",
                    tool.name
                )));
            }
            None => {}
        }
    }

    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_camel_case_flavored_token_properties() {
        assert_eq!(classify_property("inputMint"), Some(ArgKind::TokenInput));
        assert_eq!(classify_property("outputMint"), Some(ArgKind::TokenOutput));
        assert_eq!(classify_property("tokenAddress"), Some(ArgKind::TokenUnflavored));
        assert_eq!(classify_property("fromToken"), Some(ArgKind::TokenInput));
        assert_eq!(classify_property("toToken"), Some(ArgKind::TokenOutput));
    }

    #[test]
    fn classifies_slippage_and_notional() {
        assert_eq!(classify_property("slippageBps"), Some(ArgKind::SlippageBps));
        assert_eq!(classify_property("slippagePercent"), Some(ArgKind::SlippagePct));
        assert_eq!(classify_property("notionalUsd"), Some(ArgKind::Notional));
    }

    #[test]
    fn unclassifiable_property_is_none() {
        assert_eq!(classify_property("memo"), None);
    }

    #[test]
    fn build_args_fills_known_schema() {
        let tool = crate::tools::ToolDescriptor {
            name: "get_quote".to_string(),
            description: String::new(),
            input_schema: serde_json::json!({
                "properties": {
                    "chainId": {"type": "string"},
                    "inputMint": {"type": "string"},
                    "outputMint": {"type": "string"},
                    "notionalUsd": {"type": "number"},
                    "memo": {"type": "string"}
                },
                "required": ["chainId", "inputMint", "outputMint", "notionalUsd"]
            }),
        };
        let ctx = ArgContext {
            chain: "solana",
            side: Side::Buy,
            native_mint: "nativemint",
            token_address: "tokenmint",
            quote_mint: "usdcmint",
            max_slippage_bps: 300,
            notional_usd: 50.0,
            native_price_usd: Some(150.0),
            token_decimals: 6,
            quantity_token: None,
            quote_payload: None,
        };

        let args = build_args(&tool, &ctx).unwrap();
        assert_eq!(args["chainId"], "solana");
        assert_eq!(args["inputMint"], "nativemint");
        assert_eq!(args["outputMint"], "tokenmint");
        assert_eq!(args["notionalUsd"], 50.0);
        assert!(args.get("memo").is_none());
    }

    #[test]
    fn build_args_errors_on_unresolvable_required_property() {
        let tool = crate::tools::ToolDescriptor {
            name: "weird_tool".to_string(),
            description: String::new(),
            input_schema: serde_json::json!({
                "properties": { "frobnicate": {"type": "string"} },
                "required": ["frobnicate"]
            }),
        };
        let ctx = ArgContext {
            chain: "solana",
            side: Side::Buy,
            native_mint: "nativemint",
            token_address: "tokenmint",
            quote_mint: "usdcmint",
            max_slippage_bps: 300,
            notional_usd: 50.0,
            native_price_usd: Some(150.0),
            token_decimals: 6,
            quantity_token: None,
            quote_payload: None,
        };
        assert!(build_args(&tool, &ctx).is_err());
    }
}
