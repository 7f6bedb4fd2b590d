//! Decision payloads: the recommendation-model contract and the gate outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Recommendation emitted by the decision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

/// Rejection of a malformed decision payload.
#[derive(Debug, Error)]
pub enum DecisionValidationError {
    #[error("invalid decision payload: {0}")]
    Schema(String),
    #[error("decision field {field} out of range: {value} (expected 0..=1)")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Validated decision payload from the recommendation model.
///
/// Extra fields are tolerated; missing required fields, unknown `rec`
/// values, and out-of-range scores are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDecision {
    pub rec: Recommendation,
    pub signal_score: f64,
    pub prob_outperform_90d: f64,
    pub horizon_days: i64,
    pub key_drivers: Vec<String>,
    pub key_risks: Vec<String>,
    pub disconfirming_evidence: Vec<String>,
    #[serde(default)]
    pub what_changed_since_last: Vec<String>,
    pub exit_triggers: Vec<String>,
}

impl ModelDecision {
    /// Deserialize and range-check a raw payload.
    pub fn from_value(payload: Value) -> Result<Self, DecisionValidationError> {
        let decision: ModelDecision = serde_json::from_value(payload)
            .map_err(|e| DecisionValidationError::Schema(e.to_string()))?;
        decision.validate()?;
        Ok(decision)
    }

    fn validate(&self) -> Result<(), DecisionValidationError> {
        for (field, value) in [
            ("signal_score", self.signal_score),
            ("prob_outperform_90d", self.prob_outperform_90d),
        ] {
            if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                return Err(DecisionValidationError::OutOfRange { field, value });
            }
        }
        Ok(())
    }
}

/// Outcome of the entry gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryAction {
    Buy,
    NoTrade,
}

/// Why the entry gate decided what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    LiquidityGuardFailed,
    SectorCapFailed,
    CorrPenaltyFailed,
    HardVeto,
    SignalThresholdFailed,
    ShockOverride,
    HysteresisPass,
    HysteresisWait,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryReason::LiquidityGuardFailed => "liquidity_guard_failed",
            EntryReason::SectorCapFailed => "sector_cap_failed",
            EntryReason::CorrPenaltyFailed => "corr_penalty_failed",
            EntryReason::HardVeto => "hard_veto",
            EntryReason::SignalThresholdFailed => "signal_threshold_failed",
            EntryReason::ShockOverride => "shock_override",
            EntryReason::HysteresisPass => "hysteresis_pass",
            EntryReason::HysteresisWait => "hysteresis_wait",
        }
    }
}

/// Entry-gate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryDecision {
    pub action: EntryAction,
    pub reason: EntryReason,
}

impl EntryDecision {
    pub fn buy(reason: EntryReason) -> Self {
        Self {
            action: EntryAction::Buy,
            reason,
        }
    }

    pub fn no_trade(reason: EntryReason) -> Self {
        Self {
            action: EntryAction::NoTrade,
            reason,
        }
    }
}

/// Outcome of the exit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitAction {
    Hold,
    SellPartial,
    SellAll,
}

/// Why the exit policy decided what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    AtrTrailingStopHit,
    TakeProfitPlus1pctDay,
    DowngradeStreakTrigger,
    HoldConditions,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::AtrTrailingStopHit => "atr_trailing_stop_hit",
            ExitReason::TakeProfitPlus1pctDay => "take_profit_plus_1pct_day",
            ExitReason::DowngradeStreakTrigger => "downgrade_streak_trigger",
            ExitReason::HoldConditions => "hold_conditions",
        }
    }
}

/// Exit-policy result. `frac` is the fraction of the position to close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExitDecision {
    pub action: ExitAction,
    pub frac: f64,
    pub reason: ExitReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> Value {
        json!({
            "rec": "BUY",
            "signal_score": 0.75,
            "prob_outperform_90d": 0.60,
            "horizon_days": 90,
            "key_drivers": ["Momentum"],
            "key_risks": ["Guidance uncertainty"],
            "disconfirming_evidence": ["Mean reversion"],
            "exit_triggers": ["Trailing stop"]
        })
    }

    #[test]
    fn test_valid_payload_parses() {
        let decision = ModelDecision::from_value(valid_payload()).unwrap();
        assert_eq!(decision.rec, Recommendation::Buy);
        assert!(decision.what_changed_since_last.is_empty());
    }

    #[test]
    fn test_unknown_rec_rejected() {
        let mut payload = valid_payload();
        payload["rec"] = json!("YOLO");
        assert!(matches!(
            ModelDecision::from_value(payload),
            Err(DecisionValidationError::Schema(_))
        ));
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let mut payload = valid_payload();
        payload["signal_score"] = json!(1.2);
        assert!(matches!(
            ModelDecision::from_value(payload),
            Err(DecisionValidationError::OutOfRange {
                field: "signal_score",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("exit_triggers");
        assert!(ModelDecision::from_value(payload).is_err());
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(EntryReason::HardVeto.as_str(), "hard_veto");
        assert_eq!(
            ExitReason::TakeProfitPlus1pctDay.as_str(),
            "take_profit_plus_1pct_day"
        );
    }
}
