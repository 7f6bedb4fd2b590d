//! Buy/sell orchestration over the ledger, gates, and collaborators.
//!
//! Every analysis is recorded as a DECISION audit event whose content
//! hashes travel onto the trades it justifies. Sells that run without a
//! fresh analysis bind to the most recent recorded decision instead.

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::Database;
use crate::hashing::canonical_json_hash;
use crate::models::{EntryAction, EntryReason, EventType, ExitAction, TradeSide};
use crate::providers::{MarketAnalyzer, MODEL_VERSION};

use super::{
    compute_alloc_pct, derive_qty, entry_gate, exit_policy, to_f64, GateOverrides,
    TradeValidationError,
};

/// Strategy identifier stamped onto every trade this engine records.
pub const STRATEGY_ID: &str = "v2";

/// A buy request from the CLI or a job.
#[derive(Debug, Clone, Default)]
pub struct BuyRequest {
    pub ticker: String,
    pub qty: Option<f64>,
    pub notional_usd: Option<f64>,
    pub risk_mode: Option<String>,
    pub fees: f64,
}

/// A sell request; quantity defaults to the full position.
#[derive(Debug, Clone, Default)]
pub struct SellRequest {
    pub ticker: String,
    pub qty: Option<f64>,
    pub fees: f64,
}

/// Result of a buy request.
#[derive(Debug, Clone)]
pub enum BuyOutcome {
    /// The entry gate said no; nothing was recorded beyond the decision.
    NoTrade { ticker: String, reason: EntryReason },
    /// A trade landed in the ledger.
    Executed {
        ticker: String,
        qty: f64,
        price: f64,
        alloc_pct: Decimal,
    },
}

/// Result of an executed sell.
#[derive(Debug, Clone)]
pub struct SellOutcome {
    pub ticker: String,
    pub qty: f64,
    pub price: f64,
}

/// One row of the active-positions report.
#[derive(Debug, Clone)]
pub struct PositionReport {
    pub ticker: String,
    pub net_qty: f64,
    pub avg_cost: f64,
    pub current_price: f64,
    pub unrealized_pnl_pct: f64,
    pub last_decision: Option<Value>,
    pub sell_trigger: bool,
    pub sell_reason: String,
}

async fn record_decision(
    db: &Database,
    ticker: &str,
    evidence_value: &Value,
    decision_value: &Value,
) -> Result<(String, String)> {
    let evidence_hash = canonical_json_hash(evidence_value);
    let decision_hash = canonical_json_hash(decision_value);
    db.insert_audit(
        EventType::Decision,
        Some(ticker),
        Some(&evidence_hash),
        Some(&decision_hash),
        &json!({"evidence": evidence_value, "decision": decision_value}),
    )
    .await?;
    Ok((evidence_hash, decision_hash))
}

/// Analyze a ticker, gate the entry, size the position, and record the
/// trade. The DECISION audit event is written whether or not the gate
/// passes.
pub async fn execute_buy(
    db: &Database,
    config: &AppConfig,
    analyzer: &dyn MarketAnalyzer,
    req: &BuyRequest,
) -> Result<BuyOutcome> {
    let ticker = req.ticker.to_uppercase();
    let (evidence, decision) = analyzer.analyze(&ticker)?;

    let evidence_value = serde_json::to_value(&evidence)?;
    let decision_value = serde_json::to_value(&decision)?;
    let (evidence_hash, decision_hash) =
        record_decision(db, &ticker, &evidence_value, &decision_value).await?;

    let entry = entry_gate(
        db,
        config,
        &ticker,
        &decision,
        evidence.avg_vol_20d,
        evidence.avg_close_20d,
        evidence.market_cap,
        evidence.shock_score,
        GateOverrides::default(),
    )
    .await?;

    if entry.action != EntryAction::Buy {
        info!(ticker = %ticker, reason = entry.reason.as_str(), "entry gate declined");
        return Ok(BuyOutcome::NoTrade {
            ticker,
            reason: entry.reason,
        });
    }

    let alloc_pct = compute_alloc_pct(
        decision.prob_outperform_90d,
        evidence.vol_20d,
        evidence.velocity,
        evidence.corr_penalty,
        req.risk_mode.as_deref(),
        config,
    );
    let qty = derive_qty(
        evidence.current_price,
        alloc_pct,
        req.qty,
        req.notional_usd,
        config,
    )?;
    let qty = to_f64(qty);
    if qty <= 0.0 {
        return Err(TradeValidationError::NonPositiveQuantity.into());
    }

    db.insert_trade(
        &ticker,
        TradeSide::Buy,
        qty,
        evidence.current_price,
        req.fees,
        &evidence_hash,
        &decision_hash,
        Some(STRATEGY_ID),
        Some(MODEL_VERSION),
        Some(entry.reason.as_str()),
    )
    .await?;
    db.insert_audit(
        EventType::Buy,
        Some(&ticker),
        Some(&evidence_hash),
        Some(&decision_hash),
        &json!({
            "qty": qty,
            "price": evidence.current_price,
            "fees": req.fees,
            "reason": entry.reason.as_str(),
        }),
    )
    .await?;

    info!(
        ticker = %ticker,
        qty = qty,
        price = evidence.current_price,
        reason = entry.reason.as_str(),
        "buy recorded"
    );
    Ok(BuyOutcome::Executed {
        ticker,
        qty,
        price: evidence.current_price,
        alloc_pct,
    })
}

/// Record a sell against an active position.
///
/// The sell binds to the latest recorded DECISION for the ticker; if none
/// exists the hash of the empty payload is used and an ERROR event notes
/// the gap. A full close resets the ticker's pass and downgrade streaks.
pub async fn execute_sell(
    db: &Database,
    _config: &AppConfig,
    analyzer: &dyn MarketAnalyzer,
    req: &SellRequest,
) -> Result<SellOutcome> {
    let ticker = req.ticker.to_uppercase();

    let (evidence_hash, decision_hash) = match db.most_recent_decision_hashes(&ticker).await? {
        Some(hashes) => hashes,
        None => {
            let fallback = canonical_json_hash(&json!({}));
            warn!(ticker = %ticker, "selling without a recorded decision");
            db.insert_audit(
                EventType::Error,
                Some(&ticker),
                Some(&fallback),
                Some(&fallback),
                &json!({"error": "missing prior DECISION hashes for SELL"}),
            )
            .await?;
            (fallback.clone(), fallback)
        }
    };

    let positions = db.derive_active_positions().await?;
    let position = positions
        .iter()
        .find(|p| p.ticker == ticker)
        .ok_or_else(|| TradeValidationError::NoActivePosition(ticker.clone()))?;

    let qty = req.qty.unwrap_or(position.net_qty);
    if qty <= 0.0 || qty > position.net_qty {
        return Err(TradeValidationError::InvalidSellQuantity {
            requested: qty,
            held: position.net_qty,
        }
        .into());
    }

    let price = analyzer.current_price(&ticker);
    db.insert_trade(
        &ticker,
        TradeSide::Sell,
        qty,
        price,
        req.fees,
        &evidence_hash,
        &decision_hash,
        Some(STRATEGY_ID),
        Some(MODEL_VERSION),
        Some("manual_sell"),
    )
    .await?;

    if qty >= position.net_qty {
        // full close: streaks start over, the peak survives for audit
        db.upsert_hysteresis(&ticker, Some(0), None, Some(0)).await?;
    }

    db.insert_audit(
        EventType::Sell,
        Some(&ticker),
        Some(&evidence_hash),
        Some(&decision_hash),
        &json!({"qty": qty, "price": price, "fees": req.fees}),
    )
    .await?;

    info!(ticker = %ticker, qty = qty, price = price, "sell recorded");
    Ok(SellOutcome { ticker, qty, price })
}

fn degraded_report(
    position_ticker: &str,
    net_qty: f64,
    avg_cost: f64,
    current_price: f64,
    unrealized: f64,
    last_decision: Option<Value>,
) -> PositionReport {
    PositionReport {
        ticker: position_ticker.to_string(),
        net_qty,
        avg_cost,
        current_price,
        unrealized_pnl_pct: unrealized,
        last_decision,
        sell_trigger: false,
        sell_reason: "no_recent_decision".to_string(),
    }
}

/// Report every active position with its freshest decision and exit signal.
///
/// Positions whose analysis fails are reported with a null decision and no
/// sell trigger; one bad ticker never sinks the report.
pub async fn active_report(
    db: &Database,
    config: &AppConfig,
    analyzer: &dyn MarketAnalyzer,
) -> Result<Vec<PositionReport>> {
    let positions = db.derive_active_positions().await?;
    let since = (Utc::now() - Duration::hours(config.recent_decision_hours)).to_rfc3339();
    let mut reports = Vec::with_capacity(positions.len());

    for position in positions {
        let ticker = position.ticker.clone();
        let current_price = analyzer.current_price(&ticker);
        let unrealized = if position.avg_cost > 0.0 {
            current_price / position.avg_cost - 1.0
        } else {
            0.0
        };

        let recorded = db.most_recent_decision_payload(&ticker, &since).await?;
        let payload = match recorded {
            Some(payload) => payload,
            None => match analyzer.analyze(&ticker) {
                Ok((evidence, decision)) => {
                    let evidence_value = serde_json::to_value(&evidence)?;
                    let decision_value = serde_json::to_value(&decision)?;
                    record_decision(db, &ticker, &evidence_value, &decision_value).await?;
                    json!({"evidence": evidence_value, "decision": decision_value})
                }
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "analysis failed for active position");
                    db.insert_audit(
                        EventType::Error,
                        Some(&ticker),
                        None,
                        None,
                        &json!({
                            "error": e.to_string(),
                            "context": "active_report_no_recent_decision",
                        }),
                    )
                    .await?;
                    reports.push(degraded_report(
                        &ticker,
                        position.net_qty,
                        position.avg_cost,
                        current_price,
                        unrealized,
                        None,
                    ));
                    continue;
                }
            },
        };

        let decision_value = payload.get("decision").cloned();
        let signal_score = decision_value
            .as_ref()
            .and_then(|d| d.get("signal_score"))
            .and_then(Value::as_f64);
        let Some(signal_score) = signal_score else {
            reports.push(degraded_report(
                &ticker,
                position.net_qty,
                position.avg_cost,
                current_price,
                unrealized,
                decision_value,
            ));
            continue;
        };

        let evidence = match analyzer.evidence(&ticker) {
            Ok(evidence) => evidence,
            Err(e) => {
                db.insert_audit(
                    EventType::Error,
                    Some(&ticker),
                    None,
                    None,
                    &json!({"error": e.to_string(), "context": "active_report_evidence"}),
                )
                .await?;
                reports.push(degraded_report(
                    &ticker,
                    position.net_qty,
                    position.avg_cost,
                    current_price,
                    unrealized,
                    decision_value,
                ));
                continue;
            }
        };

        let exit = exit_policy(
            db,
            &ticker,
            current_price,
            evidence.prev_close,
            evidence.atr_14d,
            signal_score,
        )
        .await?;

        reports.push(PositionReport {
            ticker,
            net_qty: position.net_qty,
            avg_cost: position.avg_cost,
            current_price,
            unrealized_pnl_pct: unrealized,
            last_decision: decision_value,
            sell_trigger: exit.action != ExitAction::Hold,
            sell_reason: exit.reason.as_str().to_string(),
        });
    }

    Ok(reports)
}

#[cfg(test)]
pub(crate) mod test_support {
    use anyhow::{anyhow, Result};
    use chrono::Utc;

    use crate::models::{EvidencePacket, ModelDecision};
    use crate::providers::MarketAnalyzer;

    pub fn canned_evidence(ticker: &str, current_price: f64) -> EvidencePacket {
        EvidencePacket {
            ticker: ticker.to_string(),
            asof_utc: Utc::now(),
            current_price,
            prev_close: current_price,
            avg_vol_20d: 5_000_000.0,
            avg_close_20d: 10.0,
            vol_20d: 0.0,
            price_momentum_20d: 0.1,
            atr_14d: 1.0,
            market_cap: Some(3_000_000_000.0),
            sector: "Tech".to_string(),
            industry: "Software".to_string(),
            news_top5: vec![],
            filings_top3: vec![],
            news_sentiment: 0.2,
            today_hits: 5,
            baseline_7d: 3.0,
            macro_relevance: 0.4,
            shock_score: 0.9,
            corr_penalty: 0.0,
            velocity: 0.0,
        }
    }

    pub fn canned_decision(score: f64, prob: f64) -> ModelDecision {
        ModelDecision::from_value(serde_json::json!({
            "rec": "BUY",
            "signal_score": score,
            "prob_outperform_90d": prob,
            "horizon_days": 90,
            "key_drivers": [],
            "key_risks": [],
            "disconfirming_evidence": [],
            "exit_triggers": []
        }))
        .unwrap()
    }

    /// Analyzer returning fixed evidence and decisions.
    pub struct CannedAnalyzer {
        pub evidence: EvidencePacket,
        pub decision: ModelDecision,
    }

    impl MarketAnalyzer for CannedAnalyzer {
        fn evidence(&self, _ticker: &str) -> Result<EvidencePacket> {
            Ok(self.evidence.clone())
        }

        fn decide(&self, _evidence: &EvidencePacket) -> Result<ModelDecision> {
            Ok(self.decision.clone())
        }
    }

    /// Analyzer whose collaborators are always down.
    pub struct FailingAnalyzer;

    impl MarketAnalyzer for FailingAnalyzer {
        fn evidence(&self, ticker: &str) -> Result<EvidencePacket> {
            Err(anyhow!("evidence provider unavailable for {ticker}"))
        }

        fn decide(&self, _evidence: &EvidencePacket) -> Result<ModelDecision> {
            Err(anyhow!("decision provider unavailable"))
        }
    }
}
