use crate::models::SafetyStatus;
use crate::tools::ToolProvider;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wraps the safety tool provider's `get_token_summary` method and
/// classifies the response into a [`SafetyStatus`].
pub struct SafetyChecker {
    provider: Arc<dyn ToolProvider>,
}

impl SafetyChecker {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self { provider }
    }

    pub async fn check(&self, token_address: &str) -> (SafetyStatus, Option<f64>) {
        let result = self
            .provider
            .call("get_token_summary", json!({ "token_address": token_address }))
            .await;

        let Ok(value) = result else {
            warn!(%token_address, "safety check call failed, marking unverified");
            return (SafetyStatus::Unverified, None);
        };

        classify_safety_response(&value)
    }
}

/// `score <= 500` with no risks -> Safe; `score <= 2000` or `risks.len() <=
/// 2` -> Risky; otherwise Dangerous; unparseable -> Unverified.
fn classify_safety_response(value: &serde_json::Value) -> (SafetyStatus, Option<f64>) {
    let Some(obj) = value.as_object() else {
        return (SafetyStatus::Unverified, None);
    };

    let score = obj
        .get("score_normalised")
        .or_else(|| obj.get("score"))
        .and_then(crate::tools::coerce_f64);

    let risk_count = obj
        .get("risks")
        .and_then(|v| v.as_array())
        .map(|arr| arr.len())
        .unwrap_or(0);

    let Some(score) = score else {
        return (SafetyStatus::Unverified, None);
    };

    debug!(score, risk_count, "classifying safety response");

    let status = if score <= 500.0 && risk_count == 0 {
        SafetyStatus::Safe
    } else if score <= 2000.0 || risk_count <= 2 {
        SafetyStatus::Risky
    } else {
        SafetyStatus::Dangerous
    };

    (status, Some(score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn safe_when_low_score_and_no_risks() {
        let resp = json!({ "score": 100, "risks": [] });
        let (status, score) = classify_safety_response(&resp);
        assert_eq!(status, SafetyStatus::Safe);
        assert_eq!(score, Some(100.0));
    }

    #[test]
    fn risky_when_score_moderate() {
        let resp = json!({ "score": 1500, "risks": [] });
        assert_eq!(classify_safety_response(&resp).0, SafetyStatus::Risky);
    }

    #[test]
    fn risky_when_few_risks_despite_high_score() {
        let resp = json!({ "score": 9000, "risks": ["a", "b"] });
        assert_eq!(classify_safety_response(&resp).0, SafetyStatus::Risky);
    }

    #[test]
    fn dangerous_when_high_score_and_many_risks() {
        let resp = json!({ "score": 9000, "risks": ["a", "b", "c"] });
        assert_eq!(classify_safety_response(&resp).0, SafetyStatus::Dangerous);
    }

    #[test]
    fn unverified_when_score_missing() {
        let resp = json!({ "risks": [] });
        assert_eq!(classify_safety_response(&resp).0, SafetyStatus::Unverified);
    }
}
