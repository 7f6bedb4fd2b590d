//! News-volume shock scoring.

/// Score a news-volume anomaly against macro relevance, in [0, 1].
///
/// A ticker trading on 5x its 7-day headline baseline with full macro
/// relevance saturates the score; a quiet tape with no macro angle is 0.
pub fn compute_shock_score(today_hits: u32, baseline_7d: f64, macro_relevance: f64) -> f64 {
    let volume_mult = (today_hits as f64 / baseline_7d.max(1.0)).min(5.0);
    let score = (volume_mult - 1.0) * 0.5 + macro_relevance * 0.5;
    score.clamp(0.0, 1.0)
}
