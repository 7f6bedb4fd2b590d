//! Recommendation-model stub.
//!
//! Produces a deterministic decision payload from the evidence packet and
//! runs it through the same schema validation a real model response would
//! face. A production model plugs in behind `decide_from_evidence` without
//! touching the gates.

use serde_json::json;

use crate::models::{DecisionValidationError, EvidencePacket, ModelDecision};

/// Model version stamped onto trades and audit events.
pub const MODEL_VERSION: &str = "stub-model-v2";

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Derive a validated decision from the evidence packet.
pub fn decide_from_evidence(
    evidence: &EvidencePacket,
) -> Result<ModelDecision, DecisionValidationError> {
    let momentum = evidence.price_momentum_20d;
    let vol = evidence.vol_20d;
    let news_sentiment = evidence.news_sentiment;

    let signal_score = (0.55 + momentum * 2.0 + news_sentiment * 0.2 - vol).clamp(0.0, 1.0);
    let prob_outperform = (0.50 + momentum + news_sentiment * 0.25).clamp(0.0, 1.0);

    let rec = if signal_score >= 0.80 && prob_outperform >= 0.60 {
        "STRONG_BUY"
    } else if signal_score >= 0.70 && prob_outperform >= 0.55 {
        "BUY"
    } else if signal_score < 0.40 {
        "SELL"
    } else {
        "HOLD"
    };

    let payload = json!({
        "rec": rec,
        "signal_score": round4(signal_score),
        "prob_outperform_90d": round4(prob_outperform),
        "horizon_days": 90,
        "key_drivers": [
            "Price trend over last 20 sessions",
            "Recent headline flow balance",
        ],
        "key_risks": [
            "Macro shock could reverse momentum",
            "Guidance uncertainty remains",
        ],
        "disconfirming_evidence": [
            "Momentum can mean-revert quickly",
        ],
        "what_changed_since_last": [],
        "exit_triggers": [
            "Signal score drops below 0.70",
            "ATR trailing stop is hit",
        ],
    });
    ModelDecision::from_value(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::router::ProviderRouter;
    use crate::providers::evidence::build_evidence_packet;
    use std::time::Duration;

    #[test]
    fn test_stub_decision_validates_and_is_deterministic() {
        let mut router = ProviderRouter::with_default_feeds(10, Duration::from_secs(300));
        let packet = build_evidence_packet("AAPL", &mut router).unwrap();

        let a = decide_from_evidence(&packet).unwrap();
        let b = decide_from_evidence(&packet).unwrap();
        assert_eq!(a.rec, b.rec);
        assert_eq!(a.signal_score, b.signal_score);
        assert!((0.0..=1.0).contains(&a.signal_score));
        assert!((0.0..=1.0).contains(&a.prob_outperform_90d));
        assert_eq!(a.horizon_days, 90);
        assert!(!a.exit_triggers.is_empty());
    }
}
