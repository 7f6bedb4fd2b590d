//! Application configuration.
//!
//! One `AppConfig` is built at startup and passed by reference into every
//! component that needs it. There is no process-global settings object.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Configuration for gating thresholds, sizing ceilings, and job cadence.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    /// SQLite database URL
    pub database_url: String,

    /// Freshness window for reusing a recorded decision (hours)
    pub recent_decision_hours: i64,

    /// Paper portfolio starting cash in USD
    pub portfolio_usd: Decimal,

    /// Allocation ceiling in the default risk mode (fraction of portfolio)
    pub default_max_alloc_pct: Decimal,

    /// Allocation ceiling in "moderate" risk mode
    pub moderate_max_alloc_pct: Decimal,

    /// Minimum market capitalization for the liquidity guard (USD)
    pub min_market_cap: f64,

    /// Minimum 20-day average dollar volume for the liquidity guard (USD)
    pub min_avg_dollar_vol_20d: f64,

    /// Risk phrases that veto an entry regardless of signal quality
    pub hard_veto_keywords: Vec<String>,

    /// Tickers scanned by the broad job in addition to holdings
    pub watchlist: Vec<String>,

    /// Equity-curve window for the metrics engine (days)
    pub metrics_lookback_days: i64,

    /// Reserve job cadence (minutes) and per-run ticker budget
    pub reserve_job_minutes: u64,
    pub reserve_max_queries: usize,

    /// Broad job cadence (hours) and per-run ticker budget
    pub broad_job_hours: u64,
    pub broad_max_queries: usize,

    /// News cache TTL for interactive requests (seconds)
    pub news_ttl_seconds: u64,

    /// Per-provider news quota for interactive requests
    pub news_quota: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./stockpilot.db?mode=rwc".to_string(),
            recent_decision_hours: 48,
            portfolio_usd: dec!(100000),
            default_max_alloc_pct: dec!(0.05),
            moderate_max_alloc_pct: dec!(0.07),
            min_market_cap: 2_000_000_000.0,
            min_avg_dollar_vol_20d: 20_000_000.0,
            hard_veto_keywords: [
                "fraud",
                "bankruptcy",
                "accounting irregularity",
                "delisting",
                "material weakness",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            watchlist: ["AAPL", "MSFT", "NVDA", "TSLA", "AMZN"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            metrics_lookback_days: 90,
            reserve_job_minutes: 60,
            reserve_max_queries: 10,
            broad_job_hours: 6,
            broad_max_queries: 50,
            news_ttl_seconds: 300,
            news_quota: 100,
        }
    }
}

impl AppConfig {
    /// Build the config from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("STOCKPILOT_DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = url;
            }
        }
        if let Some(v) = env_parse("STOCKPILOT_PORTFOLIO_USD") {
            config.portfolio_usd = v;
        }
        if let Some(v) = env_parse("STOCKPILOT_LOOKBACK_DAYS") {
            config.metrics_lookback_days = v;
        }
        if let Ok(list) = std::env::var("STOCKPILOT_WATCHLIST") {
            let tickers: Vec<String> = list
                .split(',')
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect();
            if !tickers.is_empty() {
                config.watchlist = tickers;
            }
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
