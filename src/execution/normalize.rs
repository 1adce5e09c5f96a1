//! Normalizes a trader response's heterogeneous shape into a price,
//! quantity, success flag and transaction hash.

use crate::models::Side;
use crate::tools::{walk_find, walk_find_first_float};
use serde_json::Value;

const DIRECT_PRICE_KEYS: &[&str] = &["executedPrice", "price", "priceUsd", "executed_price"];
const SUCCESS_STATUSES: &[&str] = &["success", "succeeded", "confirmed", "completed"];
const FAILURE_STATUSES: &[&str] = &["failed", "error", "rejected", "cancelled"];
const TX_HASH_KEYS: &[&str] = &["txHash", "tx_hash", "signature", "transactionHash", "txid"];

/// Price-per-token cascade: a directly reported price field, then a
/// native/token amount pair, then raw `inAmount`/`outAmount` adjusted by
/// decimals, then a last-resort raw ratio of the two.
pub fn extract_price(raw: &Value, side: Side, native_price_usd: Option<f64>, token_decimals: u8) -> Option<f64> {
    if let Some(price) = walk_find_first_float(raw, DIRECT_PRICE_KEYS) {
        if price > 0.0 {
            return Some(price);
        }
    }

    if let Some(price) = price_from_named_amounts(raw, native_price_usd, token_decimals) {
        return Some(price);
    }

    if let Some(price) = price_from_raw_in_out(raw, side, native_price_usd, token_decimals) {
        return Some(price);
    }

    price_from_raw_ratio(raw, side)
}

/// `solSpent`/`solReceived` are already native-denominated; the token leg
/// is raw on-chain units and needs the decimals division.
fn price_from_named_amounts(raw: &Value, native_price_usd: Option<f64>, token_decimals: u8) -> Option<f64> {
    let native_price = native_price_usd?;
    let native_amount = walk_find_first_float(raw, &["solSpent", "solReceived", "nativeSpent", "nativeReceived"])?;
    let token_raw = walk_find_first_float(raw, &["tokenReceived", "tokenSold", "tokenSent", "tokensReceived"])?;
    let token_amount = token_raw / 10f64.powi(token_decimals as i32);
    if token_amount <= 0.0 {
        return None;
    }
    Some((native_amount * native_price) / token_amount)
}

fn price_from_raw_in_out(raw: &Value, side: Side, native_price_usd: Option<f64>, token_decimals: u8) -> Option<f64> {
    let native_price = native_price_usd?;
    let in_amount = walk_find_first_float(raw, &["inAmount"])?;
    let out_amount = walk_find_first_float(raw, &["outAmount"])?;

    let (native_raw, token_raw) = match side {
        Side::Buy => (in_amount, out_amount),
        Side::Sell => (out_amount, in_amount),
    };
    let native_units = native_raw / 1_000_000_000.0;
    let token_units = token_raw / 10f64.powi(token_decimals as i32);
    if token_units <= 0.0 {
        return None;
    }
    Some((native_units * native_price) / token_units)
}

fn price_from_raw_ratio(raw: &Value, side: Side) -> Option<f64> {
    let in_amount = walk_find_first_float(raw, &["inAmount"])?;
    let out_amount = walk_find_first_float(raw, &["outAmount"])?;
    if in_amount <= 0.0 || out_amount <= 0.0 {
        return None;
    }
    Some(match side {
        Side::Buy => in_amount / out_amount,
        Side::Sell => out_amount / in_amount,
    })
}

/// Executed token quantity, preferring a directly reported amount over a
/// raw on-chain unit that needs decimal adjustment.
pub fn extract_quantity(raw: &Value, side: Side, token_decimals: u8) -> Option<f64> {
    let direct_keys: &[&str] = match side {
        Side::Buy => &["tokenReceived", "tokensReceived", "outputAmount", "tokenAmount"],
        Side::Sell => &["tokenSold", "tokenSpent", "inputAmount", "tokenAmount"],
    };
    if let Some(qty) = walk_find_first_float(raw, direct_keys) {
        if qty > 0.0 {
            return Some(qty);
        }
    }

    let raw_key = match side {
        Side::Buy => "outAmount",
        Side::Sell => "inAmount",
    };
    let raw_units = walk_find_first_float(raw, &[raw_key])?;
    let qty = raw_units / 10f64.powi(token_decimals as i32);
    (qty > 0.0).then_some(qty)
}

/// `success`/`ok` if present (explicit truthiness wins), else a known
/// status string, else a weak signal from transaction-hash presence. An
/// `error` field always forces failure regardless of other fields.
pub fn extract_success(raw: &Value) -> bool {
    if let Some(err) = raw.get("error") {
        if !err.is_null() {
            return false;
        }
    }

    if let Some(v) = raw.get("success").or_else(|| raw.get("ok")) {
        return v.as_bool().unwrap_or(false);
    }

    if let Some(status) = raw.get("status").and_then(Value::as_str) {
        let lowered = status.to_lowercase();
        if SUCCESS_STATUSES.contains(&lowered.as_str()) {
            return true;
        }
        if FAILURE_STATUSES.contains(&lowered.as_str()) {
            return false;
        }
    }

    extract_tx_hash(raw).is_some()
}

pub fn extract_tx_hash(raw: &Value) -> Option<String> {
    TX_HASH_KEYS
        .iter()
        .find_map(|key| walk_find(raw, key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_price_field_wins() {
        let raw = json!({ "executedPrice": 3.2, "inAmount": 1, "outAmount": 1 });
        assert_eq!(extract_price(&raw, Side::Buy, None, 6), Some(3.2));
    }

    #[test]
    fn falls_back_to_named_amounts() {
        let raw = json!({ "solSpent": 1.0, "tokenReceived": 100_000_000.0 });
        assert_eq!(extract_price(&raw, Side::Buy, Some(150.0), 6), Some(1.5));
    }

    #[test]
    fn falls_back_to_raw_amounts_with_decimals() {
        let raw = json!({ "inAmount": 1_000_000_000u64, "outAmount": 100_000_000u64 });
        let price = extract_price(&raw, Side::Buy, Some(150.0), 6).unwrap();
        assert!((price - 1.5).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_raw_ratio_without_native_price() {
        let raw = json!({ "inAmount": 2.0, "outAmount": 4.0 });
        assert_eq!(extract_price(&raw, Side::Buy, None, 6), Some(0.5));
    }

    #[test]
    fn error_field_forces_failure_even_with_success_true() {
        let raw = json!({ "success": true, "error": "slippage exceeded" });
        assert!(!extract_success(&raw));
    }

    #[test]
    fn status_string_drives_success() {
        assert!(extract_success(&json!({ "status": "confirmed" })));
        assert!(!extract_success(&json!({ "status": "rejected" })));
    }

    #[test]
    fn tx_hash_extracted_from_nested_object() {
        let raw = json!({ "result": { "txHash": "abc123" } });
        assert_eq!(extract_tx_hash(&raw), Some("abc123".to_string()));
    }
}
