//! Portfolio metrics by ledger replay.
//!
//! The equity curve is rebuilt from scratch for every day in the lookback
//! window: all trades dated on or before the day are replayed against the
//! starting cash, and open holdings are marked at that day's forward-filled
//! close. Nothing is read from cached balances; the trade log is the only
//! input. Sharpe, max drawdown, and the FIFO-matched win rate are derived
//! from the same replay.

use std::collections::{BTreeSet, HashMap, VecDeque};

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use statrs::statistics::Statistics;
use tracing::warn;

use crate::config::AppConfig;
use crate::db::{Database, TradeRecord};
use crate::models::{EventType, TradeSide};
use crate::trading::to_f64;

/// Historical-close collaborator: calendar date to closing price over an
/// inclusive range. May be partial or fail per ticker.
pub trait PriceProvider {
    fn closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<NaiveDate, f64>>;
}

/// One point of the replayed equity curve.
#[derive(Debug, Clone, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Replay results over the lookback window.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub equity_curve: Vec<EquityPoint>,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Replay every trade dated at or before `through` against the starting
/// cash, producing cash and per-ticker holdings as of that day.
fn replay_through(
    trades: &[TradeRecord],
    through: NaiveDate,
    initial_cash: f64,
) -> (f64, HashMap<String, f64>) {
    let mut cash = initial_cash;
    let mut position_qty: HashMap<String, f64> = HashMap::new();

    for trade in trades {
        let Some(date) = trade.trade_date() else {
            continue;
        };
        if date > through {
            continue;
        }
        let entry = position_qty.entry(trade.ticker.clone()).or_insert(0.0);
        match trade.side() {
            Some(TradeSide::Buy) => {
                cash -= trade.qty * trade.price + trade.fees;
                *entry += trade.qty;
            }
            _ => {
                cash += trade.qty * trade.price - trade.fees;
                *entry -= trade.qty;
            }
        }
    }
    (cash, position_qty)
}

/// Fill gaps with the last known close; days before the first known close
/// are 0 and contribute nothing to equity.
fn forward_fill(dates: &[NaiveDate], raw: &HashMap<NaiveDate, f64>) -> HashMap<NaiveDate, f64> {
    let mut filled = HashMap::with_capacity(dates.len());
    let mut last = 0.0;
    for date in dates {
        last = raw.get(date).copied().unwrap_or(last);
        filled.insert(*date, last);
    }
    filled
}

/// Price every date at the ticker's last trade at or before `end`.
/// Used when the price-history collaborator is out.
fn fallback_closes(
    trades: &[TradeRecord],
    ticker: &str,
    dates: &[NaiveDate],
    end: NaiveDate,
) -> HashMap<NaiveDate, f64> {
    let mut price = 0.0;
    for trade in trades.iter().rev() {
        if trade.ticker == ticker && trade.trade_date().is_some_and(|d| d <= end) {
            price = trade.price;
            break;
        }
    }
    dates.iter().map(|d| (*d, price)).collect()
}

/// FIFO win rate: sells consume the oldest buy lots, prorating their fees
/// by the quantity consumed. A sell that matches no buy closes nothing.
fn fifo_win_rate(trades: &[TradeRecord]) -> f64 {
    let mut buys: HashMap<String, VecDeque<(f64, f64, f64)>> = HashMap::new();
    let mut wins = 0u32;
    let mut total_closed = 0u32;

    for trade in trades {
        match trade.side() {
            Some(TradeSide::Buy) => {
                buys.entry(trade.ticker.clone())
                    .or_default()
                    .push_back((trade.qty, trade.price, trade.fees));
            }
            _ => {
                let mut remaining = trade.qty;
                let mut buy_cost = 0.0;
                let mut buy_fees = 0.0;

                if let Some(queue) = buys.get_mut(&trade.ticker) {
                    while remaining > 0.0 {
                        let Some(front) = queue.front_mut() else {
                            break;
                        };
                        let (bq, bp, bf) = *front;
                        let take = remaining.min(bq);
                        buy_cost += take * bp;
                        buy_fees += if bq > 0.0 { bf * (take / bq) } else { 0.0 };
                        remaining -= take;
                        if bq <= take {
                            queue.pop_front();
                        } else {
                            *front = (bq - take, bp, bf * (1.0 - take / bq));
                        }
                    }
                }

                if remaining < trade.qty {
                    let realized_qty = trade.qty - remaining;
                    let pnl = realized_qty * trade.price - buy_cost - trade.fees - buy_fees;
                    total_closed += 1;
                    if pnl > 0.0 {
                        wins += 1;
                    }
                }
            }
        }
    }

    if total_closed == 0 {
        0.0
    } else {
        f64::from(wins) / f64::from(total_closed)
    }
}

/// Annualized Sharpe from the equity values; 0 for degenerate curves.
fn sharpe_ratio(equity_values: &[f64]) -> f64 {
    if equity_values.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = equity_values
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.clone().mean();
    let std_dev = returns.std_dev();
    if std_dev == 0.0 || !std_dev.is_finite() {
        return 0.0;
    }
    (mean / std_dev) * 252.0_f64.sqrt()
}

/// Largest peak-to-trough loss along the equity curve.
fn max_drawdown(equity_values: &[f64]) -> f64 {
    let mut peak = equity_values.first().copied().unwrap_or(0.0);
    let mut max_dd = 0.0;
    for value in equity_values {
        if *value > peak {
            peak = *value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Replay the ledger into an equity curve plus summary metrics.
///
/// With no provider, or when a provider fails for a ticker, that ticker is
/// priced at its last trade for the whole window; provider failures are
/// also recorded as ERROR audit events.
pub async fn compute_metrics(
    db: &Database,
    config: &AppConfig,
    provider: Option<&dyn PriceProvider>,
) -> Result<MetricsReport> {
    let trades = db.list_trades().await?;
    let end = Utc::now().date_naive();
    let start = end - Duration::days(config.metrics_lookback_days);

    if trades.is_empty() {
        return Ok(MetricsReport {
            equity_curve: vec![EquityPoint {
                date: end,
                value: round2(to_f64(config.portfolio_usd)),
            }],
            sharpe: 0.0,
            max_drawdown: 0.0,
            win_rate: 0.0,
        });
    }

    let mut dates = Vec::new();
    let mut day = start;
    while day <= end {
        dates.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    let tickers: BTreeSet<String> = trades.iter().map(|t| t.ticker.clone()).collect();
    let mut closes_by_ticker: HashMap<String, HashMap<NaiveDate, f64>> = HashMap::new();
    for ticker in &tickers {
        let raw = match provider {
            Some(provider) => match provider.closes(ticker, start, end) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "price history unavailable");
                    db.insert_audit(
                        EventType::Error,
                        Some(ticker),
                        None,
                        None,
                        &json!({
                            "error": e.to_string(),
                            "context": "metrics_price_history",
                            "start": start.to_string(),
                            "end": end.to_string(),
                        }),
                    )
                    .await?;
                    None
                }
            },
            None => None,
        };
        let filled = match raw {
            Some(raw) => forward_fill(&dates, &raw),
            None => fallback_closes(&trades, ticker, &dates, end),
        };
        closes_by_ticker.insert(ticker.clone(), filled);
    }

    let initial_cash = to_f64(config.portfolio_usd);
    let mut equity_curve = Vec::with_capacity(dates.len());
    for day in &dates {
        let (cash, position_qty) = replay_through(&trades, *day, initial_cash);
        let mut total = cash;
        for (ticker, qty) in &position_qty {
            if *qty <= 0.0 {
                continue;
            }
            let close = closes_by_ticker
                .get(ticker)
                .and_then(|closes| closes.get(day))
                .copied()
                .unwrap_or(0.0);
            total += qty * close;
        }
        equity_curve.push(EquityPoint {
            date: *day,
            value: round2(total),
        });
    }

    let equity_values: Vec<f64> = equity_curve.iter().map(|p| p.value).collect();
    Ok(MetricsReport {
        equity_curve,
        sharpe: round4(sharpe_ratio(&equity_values)),
        max_drawdown: round4(max_drawdown(&equity_values)),
        win_rate: round4(fifo_win_rate(&trades)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct ConstantProvider(f64);

    impl PriceProvider for ConstantProvider {
        fn closes(
            &self,
            _ticker: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<HashMap<NaiveDate, f64>> {
            let mut out = HashMap::new();
            let mut day = start;
            while day <= end {
                out.insert(day, self.0);
                day = day.succ_opt().unwrap();
            }
            Ok(out)
        }
    }

    /// Prices only the final day; earlier dates forward-fill from nothing.
    struct FinalDayProvider(f64);

    impl PriceProvider for FinalDayProvider {
        fn closes(
            &self,
            _ticker: &str,
            _start: NaiveDate,
            end: NaiveDate,
        ) -> Result<HashMap<NaiveDate, f64>> {
            Ok(HashMap::from([(end, self.0)]))
        }
    }

    struct DownProvider;

    impl PriceProvider for DownProvider {
        fn closes(&self, _t: &str, _s: NaiveDate, _e: NaiveDate) -> Result<HashMap<NaiveDate, f64>> {
            Err(anyhow!("feed offline"))
        }
    }

    fn record(ticker: &str, side: &str, qty: f64, price: f64, fees: f64, ts: &str) -> TradeRecord {
        TradeRecord {
            id: 0,
            ts_utc: ts.to_string(),
            ticker: ticker.to_string(),
            side: side.to_string(),
            qty,
            price,
            fees,
            strategy_id: None,
            model_version: None,
            note: None,
            evidence_hash: "eh".to_string(),
            decision_hash: "dh".to_string(),
        }
    }

    async fn buy(db: &Database, ticker: &str, qty: f64, price: f64, fees: f64) {
        db.insert_trade(ticker, TradeSide::Buy, qty, price, fees, "eh", "dh", None, None, None)
            .await
            .unwrap();
    }

    async fn sell(db: &Database, ticker: &str, qty: f64, price: f64, fees: f64) {
        db.insert_trade(ticker, TradeSide::Sell, qty, price, fees, "eh", "dh", None, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_trades_yields_single_point_and_zero_metrics() {
        let db = Database::in_memory().await.unwrap();
        let report = compute_metrics(&db, &AppConfig::default(), Some(&ConstantProvider(100.0)))
            .await
            .unwrap();

        assert_eq!(report.equity_curve.len(), 1);
        assert_eq!(report.equity_curve[0].value, 100_000.0);
        assert_eq!(report.sharpe, 0.0);
        assert_eq!(report.max_drawdown, 0.0);
        assert_eq!(report.win_rate, 0.0);
    }

    #[tokio::test]
    async fn test_equity_curve_spans_lookback_and_stays_flat() {
        let db = Database::in_memory().await.unwrap();
        buy(&db, "AAPL", 10.0, 100.0, 0.0).await;

        let config = AppConfig::default();
        let report = compute_metrics(&db, &config, Some(&ConstantProvider(100.0)))
            .await
            .unwrap();

        // inclusive window: lookback_days + 1 points, dates ascending
        assert_eq!(
            report.equity_curve.len(),
            (config.metrics_lookback_days + 1) as usize
        );
        assert!(report.equity_curve[0].date < report.equity_curve.last().unwrap().date);

        // spending $1000 cash for $1000 of stock leaves equity unchanged
        for point in &report.equity_curve {
            assert_eq!(point.value, 100_000.0);
        }
        assert_eq!(report.sharpe, 0.0);
        assert_eq!(report.max_drawdown, 0.0);
    }

    #[tokio::test]
    async fn test_marked_gain_produces_positive_sharpe() {
        let db = Database::in_memory().await.unwrap();
        buy(&db, "AAPL", 10.0, 100.0, 0.0).await;

        // the position (bought today) marks at 110 on the final day
        let report = compute_metrics(&db, &AppConfig::default(), Some(&FinalDayProvider(110.0)))
            .await
            .unwrap();

        let last = report.equity_curve.last().unwrap();
        assert_eq!(last.value, 100_100.0);
        assert!(report.sharpe > 0.0);
        assert_eq!(report.max_drawdown, 0.0);
    }

    #[tokio::test]
    async fn test_marked_loss_produces_drawdown() {
        let db = Database::in_memory().await.unwrap();
        buy(&db, "AAPL", 10.0, 100.0, 0.0).await;

        let report = compute_metrics(&db, &AppConfig::default(), Some(&FinalDayProvider(50.0)))
            .await
            .unwrap();

        // equity drops from 100k to 99.5k on the final day
        assert_eq!(report.equity_curve.last().unwrap().value, 99_500.0);
        assert_eq!(report.max_drawdown, 0.005);
        assert!(report.sharpe < 0.0);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_last_trade_price() {
        let db = Database::in_memory().await.unwrap();
        buy(&db, "AAPL", 10.0, 100.0, 0.0).await;

        let report = compute_metrics(&db, &AppConfig::default(), Some(&DownProvider))
            .await
            .unwrap();

        // priced at the last trade, equity never moves
        for point in &report.equity_curve {
            assert_eq!(point.value, 100_000.0);
        }

        let events = db.list_audit_events(10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "ERROR"));
    }

    #[tokio::test]
    async fn test_win_rate_round_trips() {
        let db = Database::in_memory().await.unwrap();
        let config = AppConfig::default();

        buy(&db, "A", 10.0, 100.0, 0.0).await;
        sell(&db, "A", 10.0, 110.0, 0.0).await;
        let report = compute_metrics(&db, &config, Some(&ConstantProvider(100.0)))
            .await
            .unwrap();
        assert_eq!(report.win_rate, 1.0);

        buy(&db, "B", 10.0, 100.0, 0.0).await;
        sell(&db, "B", 10.0, 90.0, 0.0).await;
        let report = compute_metrics(&db, &config, Some(&ConstantProvider(100.0)))
            .await
            .unwrap();
        assert_eq!(report.win_rate, 0.5);
    }

    #[test]
    fn test_fifo_prorates_buy_fees() {
        // gross gain of $10 is erased by the $10 buy fee
        let trades = vec![
            record("A", "BUY", 10.0, 100.0, 10.0, "2025-01-01T00:00:00+00:00"),
            record("A", "SELL", 10.0, 101.0, 0.0, "2025-01-02T00:00:00+00:00"),
        ];
        assert_eq!(fifo_win_rate(&trades), 0.0);

        // selling half prorates half the buy fee: 5*101 - 5*100 - 5 = 0
        let trades = vec![
            record("A", "BUY", 10.0, 100.0, 10.0, "2025-01-01T00:00:00+00:00"),
            record("A", "SELL", 5.0, 101.0, 0.0, "2025-01-02T00:00:00+00:00"),
        ];
        assert_eq!(fifo_win_rate(&trades), 0.0);

        let trades = vec![
            record("A", "BUY", 10.0, 100.0, 10.0, "2025-01-01T00:00:00+00:00"),
            record("A", "SELL", 5.0, 102.0, 0.0, "2025-01-02T00:00:00+00:00"),
        ];
        assert_eq!(fifo_win_rate(&trades), 1.0);
    }

    #[test]
    fn test_fifo_sell_without_buys_closes_nothing() {
        let trades = vec![record("A", "SELL", 10.0, 110.0, 0.0, "2025-01-01T00:00:00+00:00")];
        assert_eq!(fifo_win_rate(&trades), 0.0);
    }

    #[test]
    fn test_fifo_spans_multiple_lots() {
        // sell 15 consumes the 100-lot fully and a third of the 130-lot:
        // 15*120 - (10*100 + 5*130) = 1800 - 1650 > 0
        let trades = vec![
            record("A", "BUY", 10.0, 100.0, 0.0, "2025-01-01T00:00:00+00:00"),
            record("A", "BUY", 15.0, 130.0, 0.0, "2025-01-02T00:00:00+00:00"),
            record("A", "SELL", 15.0, 120.0, 0.0, "2025-01-03T00:00:00+00:00"),
        ];
        assert_eq!(fifo_win_rate(&trades), 1.0);
    }

    #[test]
    fn test_replay_respects_trade_dates() {
        let trades = vec![
            record("AAPL", "BUY", 10.0, 100.0, 0.0, "2025-01-01T12:00:00+00:00"),
            record("AAPL", "SELL", 5.0, 110.0, 0.0, "2025-01-02T12:00:00+00:00"),
        ];

        let day1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let (cash, pos) = replay_through(&trades, day1, 100_000.0);
        assert_eq!(cash, 99_000.0);
        assert_eq!(pos.get("AAPL"), Some(&10.0));

        let day2 = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let (cash, pos) = replay_through(&trades, day2, 100_000.0);
        assert_eq!(cash, 99_000.0 + 550.0);
        assert_eq!(pos.get("AAPL"), Some(&5.0));
    }

    #[test]
    fn test_forward_fill_starts_at_zero() {
        let d1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();

        let raw = HashMap::from([(d2, 42.0)]);
        let filled = forward_fill(&[d1, d2, d3], &raw);
        assert_eq!(filled[&d1], 0.0);
        assert_eq!(filled[&d2], 42.0);
        assert_eq!(filled[&d3], 42.0);
    }

    #[test]
    fn test_sharpe_degenerate_cases() {
        assert_eq!(sharpe_ratio(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[100.0]), 0.0);
        assert_eq!(sharpe_ratio(&[100.0, 101.0]), 0.0);
        assert_eq!(sharpe_ratio(&[100.0, 100.0, 100.0]), 0.0);
        assert!(sharpe_ratio(&[100.0, 101.0, 103.0]) > 0.0);
    }
}
