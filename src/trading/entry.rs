//! Entry gate: liquidity, overrides, hard veto, signal thresholds, and the
//! two-pass hysteresis requirement.

use anyhow::Result;
use tracing::debug;

use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{EntryDecision, EntryReason, ModelDecision, Recommendation};

/// External risk checks the gate consults but does not compute.
///
/// Sector caps, correlation penalties, and walk-forward validation live in
/// collaborators; absent those, everything passes.
#[derive(Debug, Clone, Copy)]
pub struct GateOverrides {
    pub sector_cap_ok: bool,
    pub corr_penalty_ok: bool,
    pub walk_forward_ok: bool,
}

impl Default for GateOverrides {
    fn default() -> Self {
        Self {
            sector_cap_ok: true,
            corr_penalty_ok: true,
            walk_forward_ok: true,
        }
    }
}

/// Tradeability floor: enough dollar volume and a known, large-enough cap.
pub fn liquidity_guard(
    config: &AppConfig,
    avg_vol_20d: f64,
    avg_close_20d: f64,
    market_cap: Option<f64>,
) -> bool {
    let avg_dollar_vol_20d = avg_vol_20d * avg_close_20d;
    let market_cap_ok = market_cap.is_some_and(|cap| cap >= config.min_market_cap);
    avg_dollar_vol_20d >= config.min_avg_dollar_vol_20d && market_cap_ok
}

fn has_hard_veto(config: &AppConfig, key_risks: &[String]) -> bool {
    let joined = key_risks.join(" ").to_lowercase();
    config
        .hard_veto_keywords
        .iter()
        .any(|keyword| joined.contains(&keyword.to_lowercase()))
}

/// Decide BUY vs NO_TRADE for one ticker.
///
/// Checks run in strict order and every path persists the ticker's
/// hysteresis state: any failure zeroes the pass streak, a threshold pass
/// increments it. A NO_TRADE on the `hysteresis_wait` path still persists
/// the incremented streak so the next identical call can convert to BUY;
/// a shock score above 0.7 bypasses the streak requirement entirely.
#[allow(clippy::too_many_arguments)]
pub async fn entry_gate(
    db: &Database,
    config: &AppConfig,
    ticker: &str,
    decision: &ModelDecision,
    avg_vol_20d: f64,
    avg_close_20d: f64,
    market_cap: Option<f64>,
    shock_score: f64,
    overrides: GateOverrides,
) -> Result<EntryDecision> {
    if !liquidity_guard(config, avg_vol_20d, avg_close_20d, market_cap) {
        db.upsert_hysteresis(ticker, Some(0), None, None).await?;
        debug!(ticker = %ticker, "entry denied: liquidity guard");
        return Ok(EntryDecision::no_trade(EntryReason::LiquidityGuardFailed));
    }
    if !overrides.sector_cap_ok {
        db.upsert_hysteresis(ticker, Some(0), None, None).await?;
        return Ok(EntryDecision::no_trade(EntryReason::SectorCapFailed));
    }
    if !overrides.corr_penalty_ok {
        db.upsert_hysteresis(ticker, Some(0), None, None).await?;
        return Ok(EntryDecision::no_trade(EntryReason::CorrPenaltyFailed));
    }

    if has_hard_veto(config, &decision.key_risks) {
        db.upsert_hysteresis(ticker, Some(0), None, None).await?;
        debug!(ticker = %ticker, "entry denied: hard veto keyword in risks");
        return Ok(EntryDecision::no_trade(EntryReason::HardVeto));
    }

    let score = decision.signal_score;
    let prob = decision.prob_outperform_90d;

    let strong_buy_ok = decision.rec == Recommendation::StrongBuy
        && score >= 0.80
        && prob >= 0.60
        && overrides.walk_forward_ok;
    let buy_ok = score >= 0.70 && prob >= 0.55;
    let pass_gate = strong_buy_ok || buy_ok;

    let state = db.get_hysteresis(ticker).await?;
    let consecutive_ok = if pass_gate { state.consecutive_ok + 1 } else { 0 };
    db.upsert_hysteresis(ticker, Some(consecutive_ok), None, None)
        .await?;

    if !pass_gate {
        return Ok(EntryDecision::no_trade(EntryReason::SignalThresholdFailed));
    }

    if shock_score > 0.7 {
        debug!(ticker = %ticker, shock = shock_score, "entry allowed: shock override");
        return Ok(EntryDecision::buy(EntryReason::ShockOverride));
    }

    if consecutive_ok >= 2 {
        return Ok(EntryDecision::buy(EntryReason::HysteresisPass));
    }
    Ok(EntryDecision::no_trade(EntryReason::HysteresisWait))
}
