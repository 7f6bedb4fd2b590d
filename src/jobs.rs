//! Scheduled scans: the hourly reserve job over current holdings and the
//! broad job over holdings plus the watchlist.
//!
//! A ticker failing analysis is recorded and skipped; the batch always
//! finishes. Failures outside the per-ticker loop abort the job, land an
//! ERROR audit event, and propagate to the scheduler.

use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::interval;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{EntryAction, EventType};
use crate::providers::{MarketAnalyzer, ProviderRouter};
use crate::trading::{compute_shock_score, entry_gate, GateOverrides};

const RESERVE_JOB_NAME: &str = "reserve_hourly";
const BROAD_JOB_NAME: &str = "broad_6h";

/// Shock threshold above which the reserve job flags a holding.
const RESERVE_SHOCK_TRIGGER: f64 = 0.6;

fn ticker_error(ticker: &str, error: &anyhow::Error) -> Value {
    json!({"ticker": ticker, "error": error.to_string()})
}

async fn finish_job(db: &Database, job_name: &str, payload: Value) -> Result<Value> {
    db.insert_audit(EventType::Job, None, None, None, &payload).await?;
    let has_errors = payload
        .get("errors")
        .and_then(Value::as_array)
        .is_some_and(|errors| !errors.is_empty());
    if has_errors {
        db.insert_audit(
            EventType::Error,
            None,
            None,
            None,
            &json!({"job_name": job_name, "errors": payload["errors"].clone()}),
        )
        .await?;
    }
    Ok(payload)
}

async fn record_fatal(db: &Database, job_name: &str, ran_at: &str, error: &anyhow::Error) {
    error!(job = job_name, error = %error, "job aborted");
    // best effort: the job is already failing
    let _ = db
        .insert_audit(
            EventType::Error,
            None,
            None,
            None,
            &json!({"job_name": job_name, "ran_at_utc": ran_at, "error": error.to_string()}),
        )
        .await;
}

/// Scan current holdings for news shocks.
pub async fn run_reserve_job(
    db: &Database,
    config: &AppConfig,
    analyzer: &dyn MarketAnalyzer,
) -> Result<Value> {
    let ran_at = Utc::now().to_rfc3339();
    let run_id = Uuid::new_v4().to_string();

    match reserve_inner(db, config, analyzer).await {
        Ok((checked, shock_triggers, errors)) => {
            let payload = json!({
                "job_name": RESERVE_JOB_NAME,
                "run_id": run_id,
                "ran_at_utc": ran_at,
                "max_queries": config.reserve_max_queries,
                "tickers_checked": checked,
                "shock_triggers": shock_triggers,
                "errors": errors,
            });
            info!(job = RESERVE_JOB_NAME, run_id = %run_id, "job finished");
            finish_job(db, RESERVE_JOB_NAME, payload).await
        }
        Err(e) => {
            record_fatal(db, RESERVE_JOB_NAME, &ran_at, &e).await;
            Err(e)
        }
    }
}

async fn reserve_inner(
    db: &Database,
    config: &AppConfig,
    analyzer: &dyn MarketAnalyzer,
) -> Result<(Vec<String>, Vec<String>, Vec<Value>)> {
    let holdings = db.derive_active_positions().await?;
    let tickers: Vec<String> = holdings
        .into_iter()
        .map(|p| p.ticker)
        .take(config.reserve_max_queries)
        .collect();

    let mut checked = Vec::new();
    let mut shock_triggers = Vec::new();
    let mut errors = Vec::new();

    for ticker in &tickers {
        match analyzer.evidence(ticker) {
            Ok(evidence) => {
                checked.push(ticker.clone());
                let shock = compute_shock_score(
                    evidence.today_hits,
                    evidence.baseline_7d,
                    evidence.macro_relevance,
                );
                if shock > RESERVE_SHOCK_TRIGGER {
                    shock_triggers.push(ticker.clone());
                }
            }
            Err(e) => errors.push(ticker_error(ticker, &e)),
        }
    }

    Ok((checked, shock_triggers, errors))
}

/// Scan holdings and the watchlist for entry candidates.
pub async fn run_broad_job(
    db: &Database,
    config: &AppConfig,
    analyzer: &dyn MarketAnalyzer,
    macro_router: &mut ProviderRouter,
) -> Result<Value> {
    let ran_at = Utc::now().to_rfc3339();
    let run_id = Uuid::new_v4().to_string();

    match broad_inner(db, config, analyzer, macro_router).await {
        Ok((macro_hits, checked, entry_candidates, errors)) => {
            let payload = json!({
                "job_name": BROAD_JOB_NAME,
                "run_id": run_id,
                "ran_at_utc": ran_at,
                "max_queries": config.broad_max_queries,
                "macro_hits": macro_hits,
                "tickers_checked": checked,
                "entry_candidates": entry_candidates,
                "errors": errors,
            });
            info!(job = BROAD_JOB_NAME, run_id = %run_id, "job finished");
            finish_job(db, BROAD_JOB_NAME, payload).await
        }
        Err(e) => {
            record_fatal(db, BROAD_JOB_NAME, &ran_at, &e).await;
            Err(e)
        }
    }
}

async fn broad_inner(
    db: &Database,
    config: &AppConfig,
    analyzer: &dyn MarketAnalyzer,
    macro_router: &mut ProviderRouter,
) -> Result<(usize, Vec<String>, Vec<String>, Vec<Value>)> {
    // macro snapshot rides a long-TTL cache shared across runs
    let macro_news = macro_router.call("macro:global", "MACRO", 1)?;
    let macro_hits = macro_news.len();

    let holdings = db.derive_active_positions().await?;
    let mut universe: Vec<String> = holdings.into_iter().map(|p| p.ticker).collect();
    for ticker in &config.watchlist {
        if !universe.contains(ticker) {
            universe.push(ticker.clone());
        }
    }
    universe.truncate(config.broad_max_queries);

    let mut checked = Vec::new();
    let mut entry_candidates = Vec::new();
    let mut errors = Vec::new();

    for ticker in &universe {
        match analyzer.analyze(ticker) {
            Ok((evidence, decision)) => {
                checked.push(ticker.clone());
                let gate = entry_gate(
                    db,
                    config,
                    ticker,
                    &decision,
                    evidence.avg_vol_20d,
                    evidence.avg_close_20d,
                    evidence.market_cap,
                    evidence.shock_score,
                    GateOverrides::default(),
                )
                .await?;
                if gate.action == EntryAction::Buy {
                    entry_candidates.push(ticker.clone());
                }
            }
            Err(e) => errors.push(ticker_error(ticker, &e)),
        }
    }

    Ok((macro_hits, checked, entry_candidates, errors))
}

/// Drive both jobs on their configured cadences until Ctrl-C.
pub async fn run_scheduler(
    db: &Database,
    config: &AppConfig,
    analyzer: &dyn MarketAnalyzer,
) -> Result<()> {
    let mut reserve_tick = interval(StdDuration::from_secs(config.reserve_job_minutes * 60));
    let mut broad_tick = interval(StdDuration::from_secs(config.broad_job_hours * 3600));
    let mut macro_router = ProviderRouter::with_default_feeds(5, StdDuration::from_secs(4 * 3600));

    info!(
        reserve_minutes = config.reserve_job_minutes,
        broad_hours = config.broad_job_hours,
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = reserve_tick.tick() => {
                if let Err(e) = run_reserve_job(db, config, analyzer).await {
                    error!(error = %e, "reserve job failed");
                }
            }
            _ = broad_tick.tick() => {
                if let Err(e) = run_broad_job(db, config, analyzer, &mut macro_router).await {
                    error!(error = %e, "broad job failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("scheduler stopping");
                return Ok(());
            }
        }
    }
}
