//! News provider routing with per-provider quotas and a shared TTL cache.
//!
//! Providers are tried in a fixed priority order; each call consumes one
//! unit of the serving provider's quota. Responses are cached by logical
//! request identity, and a fresh cache hit costs no quota. Exhausting every
//! provider's quota is its own failure, distinct from a plain cache miss.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::models::NewsItem;

use super::news::NewsFeed;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no news provider available with remaining quota")]
    QuotasExhausted,
}

/// Priority-ordered news router with quota accounting and caching.
pub struct ProviderRouter {
    ordering: Vec<&'static str>,
    providers: HashMap<&'static str, NewsFeed>,
    quotas: HashMap<&'static str, u32>,
    ttl: Duration,
    cache: HashMap<String, (Instant, Vec<NewsItem>)>,
}

impl ProviderRouter {
    pub fn new(feeds: Vec<(&'static str, NewsFeed)>, quota: u32, ttl: Duration) -> Self {
        let ordering: Vec<&'static str> = feeds.iter().map(|(name, _)| *name).collect();
        let quotas = ordering.iter().map(|name| (*name, quota)).collect();
        Self {
            ordering,
            providers: feeds.into_iter().collect(),
            quotas,
            ttl,
            cache: HashMap::new(),
        }
    }

    /// Standard feed set in priority order.
    pub fn with_default_feeds(quota: u32, ttl: Duration) -> Self {
        Self::new(
            vec![
                ("gdelt", super::news::gdelt_news as NewsFeed),
                ("newsdata", super::news::newsdata_news as NewsFeed),
                ("gnews", super::news::gnews_news as NewsFeed),
                ("guardian", super::news::guardian_news as NewsFeed),
            ],
            quota,
            ttl,
        )
    }

    /// Fetch news for a logical request, serving from cache when fresh.
    pub fn call(
        &mut self,
        cache_key: &str,
        ticker: &str,
        limit: usize,
    ) -> Result<Vec<NewsItem>, RouterError> {
        let now = Instant::now();
        if let Some((stored_at, value)) = self.cache.get(cache_key) {
            if now.duration_since(*stored_at) <= self.ttl {
                return Ok(value.clone());
            }
        }

        for name in &self.ordering {
            let Some(remaining) = self.quotas.get_mut(name) else {
                continue;
            };
            if *remaining == 0 {
                continue;
            }
            let Some(provider) = self.providers.get(name) else {
                continue;
            };
            let result = provider(ticker, limit);
            *remaining -= 1;
            self.cache
                .insert(cache_key.to_string(), (now, result.clone()));
            return Ok(result);
        }
        Err(RouterError::QuotasExhausted)
    }

    /// Remaining quota for a provider, if it is registered.
    pub fn remaining_quota(&self, name: &str) -> Option<u32> {
        self.quotas.get(name).copied()
    }
}
