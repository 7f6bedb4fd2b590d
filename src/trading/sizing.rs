//! Position sizing: probability-driven allocation with risk penalties,
//! and derivation of an order quantity from the chosen allocation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::TradeValidationError;
use crate::config::AppConfig;

/// Fraction of the portfolio to allocate for one entry.
///
/// The outperform probability is clamped to [0.5, 1.0] and mapped linearly
/// onto [1%, 5%]; volatility, velocity, and correlation penalties shave the
/// base; the floor is 1% and the ceiling comes from the risk mode (5%
/// default, 7% in "moderate" mode).
pub fn compute_alloc_pct(
    prob_outperform_90d: f64,
    vol_20d: f64,
    velocity: f64,
    corr_penalty: f64,
    risk_mode: Option<&str>,
    config: &AppConfig,
) -> Decimal {
    let prob = to_decimal(prob_outperform_90d).clamp(dec!(0.5), dec!(1.0));
    let base = dec!(0.01) + (prob - dec!(0.5)) * (dec!(0.05) - dec!(0.01)) / dec!(0.5);

    let penalty = to_decimal(vol_20d.max(0.0)) * dec!(0.20)
        + to_decimal(velocity.max(0.0)) * dec!(0.10)
        + to_decimal(corr_penalty.max(0.0)) * dec!(0.10);
    let alloc = (base - penalty).max(dec!(0.01));

    let max_alloc = match risk_mode {
        Some(mode) if mode.eq_ignore_ascii_case("moderate") => config.moderate_max_alloc_pct,
        _ => config.default_max_alloc_pct,
    };
    alloc.min(max_alloc)
}

/// Turn an allocation into an order quantity.
///
/// An explicit quantity wins, then an explicit notional, then the
/// portfolio-percentage default. The notional and default paths divide by
/// the current price, so a non-positive price is rejected rather than left
/// to produce an unbounded quantity.
pub fn derive_qty(
    current_price: f64,
    alloc_pct: Decimal,
    qty_optional: Option<f64>,
    notional_usd_optional: Option<f64>,
    config: &AppConfig,
) -> Result<Decimal, TradeValidationError> {
    if let Some(qty) = qty_optional {
        return Ok(to_decimal(qty.max(0.0)));
    }

    let price = to_decimal(current_price);
    if price <= Decimal::ZERO {
        return Err(TradeValidationError::NonPositivePrice {
            price: current_price,
        });
    }

    if let Some(notional) = notional_usd_optional {
        return Ok((to_decimal(notional.max(0.0)) / price).max(Decimal::ZERO));
    }
    Ok((config.portfolio_usd * alloc_pct / price).max(Decimal::ZERO))
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

/// Lossy view for ledger rows, which store REAL columns.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::default()
    }

    #[test]
    fn test_alloc_bounds_default_mode() {
        let low = compute_alloc_pct(0.5, 0.0, 0.0, 0.0, None, &config());
        let high = compute_alloc_pct(1.0, 0.0, 0.0, 0.0, None, &config());
        assert_eq!(low, dec!(0.01));
        assert_eq!(high, dec!(0.05));
    }

    #[test]
    fn test_alloc_probability_below_half_clamps_to_floor() {
        let alloc = compute_alloc_pct(0.2, 0.0, 0.0, 0.0, None, &config());
        assert_eq!(alloc, dec!(0.01));
    }

    #[test]
    fn test_alloc_moderate_ceiling_and_case_insensitivity() {
        let moderate = compute_alloc_pct(1.0, 0.0, 0.0, 0.0, Some("MoDeRaTe"), &config());
        // base caps at 5% even before the moderate ceiling applies
        assert_eq!(moderate, dec!(0.05));
        assert!(moderate <= dec!(0.07));

        let aggressive = compute_alloc_pct(1.0, 0.0, 0.0, 0.0, Some("yolo"), &config());
        assert_eq!(aggressive, dec!(0.05));
    }

    #[test]
    fn test_alloc_penalties_reduce_but_never_below_floor() {
        let clean = compute_alloc_pct(1.0, 0.0, 0.0, 0.0, Some("moderate"), &config());
        let penalized = compute_alloc_pct(1.0, 0.2, 0.3, 0.4, Some("moderate"), &config());
        assert!(penalized < clean);
        assert!(penalized >= dec!(0.01));

        let buried = compute_alloc_pct(1.0, 5.0, 5.0, 5.0, None, &config());
        assert_eq!(buried, dec!(0.01));
    }

    #[test]
    fn test_negative_penalty_inputs_ignored() {
        let alloc = compute_alloc_pct(1.0, -1.0, -1.0, -1.0, None, &config());
        assert_eq!(alloc, dec!(0.05));
    }

    #[test]
    fn test_derive_qty_explicit_wins() {
        let qty = derive_qty(100.0, dec!(0.05), Some(7.5), Some(1000.0), &config()).unwrap();
        assert_eq!(qty, dec!(7.5));

        let clamped = derive_qty(100.0, dec!(0.05), Some(-3.0), None, &config()).unwrap();
        assert_eq!(clamped, Decimal::ZERO);
    }

    #[test]
    fn test_derive_qty_notional_path() {
        let qty = derive_qty(50.0, dec!(0.05), None, Some(1000.0), &config()).unwrap();
        assert_eq!(qty, dec!(20));
    }

    #[test]
    fn test_derive_qty_default_path_uses_portfolio() {
        // $100k * 5% / $200 = 25 shares
        let qty = derive_qty(200.0, dec!(0.05), None, None, &config()).unwrap();
        assert_eq!(qty, dec!(25));
    }

    #[test]
    fn test_derive_qty_rejects_non_positive_price() {
        let err = derive_qty(0.0, dec!(0.05), None, None, &config()).unwrap_err();
        assert!(matches!(err, TradeValidationError::NonPositivePrice { .. }));

        let err = derive_qty(-1.0, dec!(0.05), None, Some(500.0), &config()).unwrap_err();
        assert!(matches!(err, TradeValidationError::NonPositivePrice { .. }));

        // explicit quantity does not touch the price
        assert!(derive_qty(0.0, dec!(0.05), Some(3.0), None, &config()).is_ok());
    }
}
