//! External collaborators: news feeds, the quota/TTL news router, the
//! evidence builder, and the recommendation-model stub.
//!
//! The core consumes these through the `MarketAnalyzer` trait so tests and
//! jobs can substitute failing or canned collaborators.

pub mod evidence;
pub mod model;
pub mod news;
pub mod router;

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

use crate::config::AppConfig;
use crate::models::{EvidencePacket, ModelDecision};

pub use model::MODEL_VERSION;
pub use router::{ProviderRouter, RouterError};

/// Collaborator seam for evidence gathering and decision generation.
///
/// Any method may fail per ticker; batch callers record the failure and
/// move on rather than aborting the run.
pub trait MarketAnalyzer: Send + Sync {
    /// Assemble the evidence packet for a ticker.
    fn evidence(&self, ticker: &str) -> Result<EvidencePacket>;

    /// Produce a validated decision from an evidence packet.
    fn decide(&self, evidence: &EvidencePacket) -> Result<ModelDecision>;

    /// Best-effort current price; 100.0 when the data source is out.
    fn current_price(&self, ticker: &str) -> f64 {
        self.evidence(ticker)
            .map(|e| e.current_price)
            .unwrap_or(100.0)
    }

    /// Evidence plus decision in one call.
    fn analyze(&self, ticker: &str) -> Result<(EvidencePacket, ModelDecision)> {
        let evidence = self.evidence(ticker)?;
        let decision = self.decide(&evidence)?;
        Ok((evidence, decision))
    }
}

/// Production analyzer: stub market data, shared news router, stub model.
pub struct StockAnalyzer {
    router: Mutex<ProviderRouter>,
}

impl StockAnalyzer {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_router(ProviderRouter::with_default_feeds(
            config.news_quota,
            Duration::from_secs(config.news_ttl_seconds),
        ))
    }

    pub fn with_router(router: ProviderRouter) -> Self {
        Self {
            router: Mutex::new(router),
        }
    }
}

impl MarketAnalyzer for StockAnalyzer {
    fn evidence(&self, ticker: &str) -> Result<EvidencePacket> {
        let mut router = self.router.lock().unwrap_or_else(|e| e.into_inner());
        evidence::build_evidence_packet(ticker, &mut router)
    }

    fn decide(&self, evidence: &EvidencePacket) -> Result<ModelDecision> {
        Ok(model::decide_from_evidence(evidence)?)
    }
}
