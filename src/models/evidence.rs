//! Evidence packet assembled for every analysis call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single news headline from one of the feed providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub source: String,
    pub headline: String,
    pub summary: String,
    pub published_utc: DateTime<Utc>,
}

/// Regulatory filing summary included with the evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    #[serde(rename = "type")]
    pub filing_type: String,
    pub summary: String,
}

/// Everything the decision model and the gates see for one ticker.
///
/// Prices and volumes come from the market-data collaborator; news counts
/// feed the shock scorer. Hashed canonically when a decision is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePacket {
    pub ticker: String,
    pub asof_utc: DateTime<Utc>,
    pub current_price: f64,
    pub prev_close: f64,
    pub avg_vol_20d: f64,
    pub avg_close_20d: f64,
    /// Stddev of daily returns over the trailing 20 sessions
    pub vol_20d: f64,
    pub price_momentum_20d: f64,
    pub atr_14d: f64,
    pub market_cap: Option<f64>,
    pub sector: String,
    pub industry: String,
    pub news_top5: Vec<NewsItem>,
    pub filings_top3: Vec<Filing>,
    pub news_sentiment: f64,
    pub today_hits: u32,
    pub baseline_7d: f64,
    pub macro_relevance: f64,
    pub shock_score: f64,
    pub corr_penalty: f64,
    pub velocity: f64,
}
