//! Data models for trades, audit events, decisions, and evidence.

mod decision;
mod evidence;
mod trade;

pub use decision::{
    DecisionValidationError, EntryAction, EntryDecision, EntryReason, ExitAction, ExitDecision,
    ExitReason, ModelDecision, Recommendation,
};
pub use evidence::{EvidencePacket, Filing, NewsItem};
pub use trade::{EventType, TradeSide};
