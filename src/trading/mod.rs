//! Trading core: entry gate, exit policy, sizing, shock scoring, and the
//! buy/sell orchestration engine.

mod engine;
mod entry;
mod exit;
mod shock;
mod sizing;

use thiserror::Error;

pub use engine::{
    active_report, execute_buy, execute_sell, BuyOutcome, BuyRequest, PositionReport, SellOutcome,
    SellRequest, STRATEGY_ID,
};
pub use entry::{entry_gate, liquidity_guard, GateOverrides};
#[cfg(test)]
pub(crate) use engine::test_support;
pub use exit::exit_policy;
pub use shock::compute_shock_score;
pub use sizing::{compute_alloc_pct, derive_qty, to_f64};

/// Rejected trade requests. Surfaced to the caller, never coerced.
#[derive(Debug, Error)]
pub enum TradeValidationError {
    #[error("current price must be positive, got {price}")]
    NonPositivePrice { price: f64 },
    #[error("derived quantity must be positive")]
    NonPositiveQuantity,
    #[error("no active position in {0}")]
    NoActivePosition(String),
    #[error("invalid sell quantity {requested} (position holds {held})")]
    InvalidSellQuantity { requested: f64, held: f64 },
}
