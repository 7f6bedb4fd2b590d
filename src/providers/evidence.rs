//! Evidence packet assembly from the (stubbed) market-data collaborator.

use anyhow::Result;
use chrono::Utc;
use statrs::statistics::Statistics;

use crate::models::{EvidencePacket, Filing};
use crate::trading::compute_shock_score;

use super::router::ProviderRouter;

/// Synthetic 30-session close/volume history.
///
/// A gentle uptrend with a per-ticker price offset so different tickers do
/// not trade at identical levels. Stands in for the market-data provider.
fn history_stub(ticker: &str) -> Vec<(f64, f64)> {
    let offset = (ticker.bytes().map(u64::from).sum::<u64>() % 50) as f64;
    (0..30)
        .map(|i| {
            let close = 100.0 + offset + i as f64 * 0.2;
            let volume = 1_000_000.0 + i as f64 * 1_000.0;
            (close, volume)
        })
        .collect()
}

fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Build the full evidence packet for one ticker.
///
/// News flows through the shared router so interactive calls and jobs
/// compete for the same quotas and cache.
pub fn build_evidence_packet(
    ticker: &str,
    router: &mut ProviderRouter,
) -> Result<EvidencePacket> {
    let ticker = ticker.to_uppercase();
    let rows = history_stub(&ticker);
    let closes: Vec<f64> = rows.iter().map(|(c, _)| *c).filter(|c| *c > 0.0).collect();
    let vols: Vec<f64> = rows.iter().map(|(_, v)| *v).filter(|v| *v >= 0.0).collect();

    let current_price = closes.last().copied().unwrap_or(0.0);
    let prev_close = if closes.len() > 1 {
        closes[closes.len() - 2]
    } else {
        current_price
    };

    let tail = if closes.len() >= 21 {
        &closes[closes.len() - 21..]
    } else {
        &closes[..]
    };
    let returns = daily_returns(tail);
    let vol_20d = if returns.len() >= 2 {
        returns.clone().std_dev()
    } else {
        0.0
    };

    let vol_tail = &vols[vols.len().saturating_sub(20)..];
    let avg_vol_20d = if vol_tail.is_empty() {
        0.0
    } else {
        vol_tail.iter().sum::<f64>() / vol_tail.len() as f64
    };
    let close_tail = &closes[closes.len().saturating_sub(20)..];
    let avg_close_20d = if close_tail.is_empty() {
        0.0
    } else {
        close_tail.iter().sum::<f64>() / close_tail.len() as f64
    };

    let momentum_20d = if closes.len() >= 20 && closes[closes.len() - 20] > 0.0 {
        current_price / closes[closes.len() - 20] - 1.0
    } else {
        0.0
    };
    let atr_14d = (current_price * 0.02).max(0.01);

    let news_top5 = router.call(&format!("news:{ticker}"), &ticker, 5)?;
    let filings_top3 = vec![
        Filing {
            filing_type: "10-Q".to_string(),
            summary: format!("{ticker} quarterly filing summary."),
        },
        Filing {
            filing_type: "8-K".to_string(),
            summary: format!("{ticker} material event filing summary."),
        },
        Filing {
            filing_type: "10-K".to_string(),
            summary: format!("{ticker} annual filing summary."),
        },
    ];

    let today_hits = news_top5.len() as u32;
    let baseline_7d = 3.0;
    let macro_relevance = 0.4;
    let shock_score = compute_shock_score(today_hits, baseline_7d, macro_relevance);

    Ok(EvidencePacket {
        ticker,
        asof_utc: Utc::now(),
        current_price,
        prev_close,
        avg_vol_20d,
        avg_close_20d,
        vol_20d,
        price_momentum_20d: momentum_20d,
        atr_14d,
        market_cap: Some(5_000_000_000.0),
        sector: "Unknown".to_string(),
        industry: "Unknown".to_string(),
        news_top5,
        filings_top3,
        news_sentiment: 0.2,
        today_hits,
        baseline_7d,
        macro_relevance,
        shock_score,
        corr_penalty: 0.0,
        velocity: momentum_20d.abs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_packet_has_consistent_price_fields() {
        let mut router = ProviderRouter::with_default_feeds(10, Duration::from_secs(300));
        let packet = build_evidence_packet("aapl", &mut router).unwrap();

        assert_eq!(packet.ticker, "AAPL");
        assert!(packet.current_price > 0.0);
        assert!(packet.prev_close > 0.0);
        assert!(packet.prev_close < packet.current_price);
        assert!(packet.atr_14d > 0.0);
        assert_eq!(packet.news_top5.len(), 5);
        assert_eq!(packet.today_hits, 5);
        assert!(packet.velocity >= 0.0);
    }

    #[test]
    fn test_different_tickers_get_different_prices() {
        let mut router = ProviderRouter::with_default_feeds(10, Duration::from_secs(300));
        let a = build_evidence_packet("AAPL", &mut router).unwrap();
        let b = build_evidence_packet("MSFT", &mut router).unwrap();
        assert_ne!(a.current_price, b.current_price);
    }
}
