//! Exit policy: ATR trailing stop, intraday take-profit, and the
//! downgrade-streak state machine.

use anyhow::Result;
use tracing::debug;

use crate::db::Database;
use crate::models::{ExitAction, ExitDecision, ExitReason};

/// Decide HOLD / SELL_PARTIAL / SELL_ALL for an open position.
///
/// The stored peak only ever rises; the trailing stop hangs 3 ATRs below
/// it. The downgrade streak counts consecutive evaluations with the signal
/// score under 0.70 and is persisted together with the peak before the
/// decision is taken. Checks are ordered: the trailing stop wins over the
/// take-profit even when both hold.
pub async fn exit_policy(
    db: &Database,
    ticker: &str,
    current_price: f64,
    prev_close: f64,
    atr_14d: f64,
    signal_score: f64,
) -> Result<ExitDecision> {
    let state = db.get_hysteresis(ticker).await?;
    let peak_price = state.peak_price.unwrap_or(current_price).max(current_price);

    let trail_stop = peak_price - 3.0 * atr_14d;
    let trail_stop_hit = current_price < trail_stop;
    let pnl_today = if prev_close > 0.0 {
        current_price / prev_close - 1.0
    } else {
        0.0
    };

    let downgrade_streak = if signal_score < 0.70 {
        state.downgrade_streak + 1
    } else {
        0
    };
    db.upsert_hysteresis(ticker, None, Some(peak_price), Some(downgrade_streak))
        .await?;

    if trail_stop_hit {
        debug!(ticker = %ticker, peak = peak_price, stop = trail_stop, "trailing stop hit");
        return Ok(ExitDecision {
            action: ExitAction::SellAll,
            frac: 1.0,
            reason: ExitReason::AtrTrailingStopHit,
        });
    }
    if pnl_today >= 0.01 {
        return Ok(ExitDecision {
            action: ExitAction::SellPartial,
            frac: 0.4,
            reason: ExitReason::TakeProfitPlus1pctDay,
        });
    }
    if downgrade_streak >= 2 && signal_score < 0.70 {
        debug!(ticker = %ticker, streak = downgrade_streak, "downgrade streak trigger");
        return Ok(ExitDecision {
            action: ExitAction::SellAll,
            frac: 1.0,
            reason: ExitReason::DowngradeStreakTrigger,
        });
    }
    Ok(ExitDecision {
        action: ExitAction::Hold,
        frac: 0.0,
        reason: ExitReason::HoldConditions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_take_profit_then_downgrade_streak() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_hysteresis("META", Some(2), Some(100.0), Some(0))
            .await
            .unwrap();

        // +1.5% day with a weak signal: partial profit-take, streak starts
        let first = exit_policy(&db, "META", 101.5, 100.0, 1.0, 0.65).await.unwrap();
        assert_eq!(first.action, ExitAction::SellPartial);
        assert!((first.frac - 0.4).abs() < 1e-12);
        assert_eq!(first.reason, ExitReason::TakeProfitPlus1pctDay);

        // flat day, still weak: streak reaches 2 and forces a full exit
        let second = exit_policy(&db, "META", 100.0, 100.0, 1.0, 0.65).await.unwrap();
        assert_eq!(second.action, ExitAction::SellAll);
        assert_eq!(second.reason, ExitReason::DowngradeStreakTrigger);
    }

    #[tokio::test]
    async fn test_trailing_stop_takes_priority_over_take_profit() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_hysteresis("NVDA", None, Some(200.0), None)
            .await
            .unwrap();

        // up 2% on the day but 4 ATRs under the peak: the stop wins
        let decision = exit_policy(&db, "NVDA", 160.0, 157.0, 10.0, 0.90).await.unwrap();
        assert_eq!(decision.action, ExitAction::SellAll);
        assert_eq!(decision.reason, ExitReason::AtrTrailingStopHit);
    }

    #[tokio::test]
    async fn test_peak_only_rises_and_is_persisted() {
        let db = Database::in_memory().await.unwrap();

        // first evaluation seeds the peak from the current price
        exit_policy(&db, "AAPL", 150.0, 150.0, 2.0, 0.80).await.unwrap();
        assert_eq!(
            db.get_hysteresis("AAPL").await.unwrap().peak_price,
            Some(150.0)
        );

        // a lower print does not lower the peak
        exit_policy(&db, "AAPL", 149.0, 150.0, 2.0, 0.80).await.unwrap();
        assert_eq!(
            db.get_hysteresis("AAPL").await.unwrap().peak_price,
            Some(150.0)
        );

        // a higher print raises it
        exit_policy(&db, "AAPL", 155.0, 149.0, 2.0, 0.80).await.unwrap();
        assert_eq!(
            db.get_hysteresis("AAPL").await.unwrap().peak_price,
            Some(155.0)
        );
    }

    #[tokio::test]
    async fn test_healthy_signal_resets_downgrade_streak() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_hysteresis("MSFT", None, Some(100.0), Some(1))
            .await
            .unwrap();

        let decision = exit_policy(&db, "MSFT", 100.0, 100.0, 5.0, 0.75).await.unwrap();
        assert_eq!(decision.action, ExitAction::Hold);
        assert_eq!(decision.reason, ExitReason::HoldConditions);
        assert_eq!(db.get_hysteresis("MSFT").await.unwrap().downgrade_streak, 0);
    }

    #[tokio::test]
    async fn test_non_positive_prev_close_counts_as_flat_day() {
        let db = Database::in_memory().await.unwrap();
        let decision = exit_policy(&db, "AMZN", 100.0, 0.0, 5.0, 0.80).await.unwrap();
        assert_eq!(decision.action, ExitAction::Hold);
    }
}
