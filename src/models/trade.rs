//! Trade sides and audit event types shared across the ledger and policies.

use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    /// Parse the ledger's stored side column.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// Kind of audit-log entry.
///
/// DECISION, BUY, and SELL carry a ticker; JOB and ERROR entries may be
/// portfolio-wide (ticker null).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Decision,
    Job,
    Error,
    Buy,
    Sell,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Decision => "DECISION",
            EventType::Job => "JOB",
            EventType::Error => "ERROR",
            EventType::Buy => "BUY",
            EventType::Sell => "SELL",
        }
    }
}
