//! Mock news feeds standing in for the external headline providers.
//!
//! Each feed produces deterministic placeholder items; real integrations
//! live outside this system and plug in through the same signature.

use chrono::{Duration, Utc};

use crate::models::NewsItem;

/// Signature shared by every news feed.
pub type NewsFeed = fn(&str, usize) -> Vec<NewsItem>;

fn mock_news(source: &str, ticker: &str, limit: usize) -> Vec<NewsItem> {
    let base = Utc::now();
    (0..limit)
        .map(|i| NewsItem {
            source: source.to_string(),
            headline: format!("{} update {} from {}", ticker.to_uppercase(), i + 1, source),
            summary: format!(
                "Short summary {} for {} from {}.",
                i + 1,
                ticker.to_uppercase(),
                source
            ),
            published_utc: base - Duration::hours(i as i64 * 5),
        })
        .collect()
}

pub fn gdelt_news(ticker: &str, limit: usize) -> Vec<NewsItem> {
    mock_news("gdelt", ticker, limit)
}

pub fn newsdata_news(ticker: &str, limit: usize) -> Vec<NewsItem> {
    mock_news("newsdata", ticker, limit)
}

pub fn gnews_news(ticker: &str, limit: usize) -> Vec<NewsItem> {
    mock_news("gnews", ticker, limit)
}

pub fn guardian_news(ticker: &str, limit: usize) -> Vec<NewsItem> {
    mock_news("guardian", ticker, limit)
}
