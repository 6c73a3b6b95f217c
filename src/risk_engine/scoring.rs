//! Pure scoring rules: rounding, ratios, risk-factor gate, label decision

use super::types::{CountData, Factors, RiskLabel};

/// Violation ratio above which a factor counts toward the risk gate
const RATIO_GATE: f64 = 0.5;
/// Minimum people in frame before a distance ratio can escalate the label
const MIN_SDV_ENTITIES: f64 = 3.0;
/// Minimum unmasked faces before the mask ratio can escalate the label
const MIN_FMV_VIOLATORS: f64 = 1.0;

const DANGER_SCORE: f64 = 0.5;
const MODERATE_SCORE: f64 = 0.3;
const LOW_SCORE: f64 = 0.1;

/// Round half-up to two decimals. Non-finite input yields 0.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let rounded = ((value + f64::EPSILON) * 100.0).round() / 100.0;
    if !rounded.is_finite() || rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// round2(numerator / denominator), 0 when the denominator is 0
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    round2(numerator / denominator)
}

/// Ratio with a minimum-sample gate. `_p2p` is intentionally ungated on sample size
/// beyond the sdv entity count it shares.
pub fn risk_factor(factors: &Factors) -> bool {
    let sdv_sampled = factors.sdv[1] > MIN_SDV_ENTITIES;
    (factors.p2p[2] > RATIO_GATE && sdv_sampled)
        || (factors.sdv[2] > RATIO_GATE && sdv_sampled)
        || (factors.fmv[2] > RATIO_GATE && factors.fmv[0] > MIN_FMV_VIOLATORS)
}

/// Arithmetic mean of the three ratios, rounded to two decimals.
///
/// A mean distance above the threshold makes the `p2p` shortfall ratio negative,
/// which can pull the mean below 0; the result is clamped to [0,1] so stored and
/// folded scores always stay in range.
pub fn score(factors: &Factors) -> f64 {
    let mean = (factors.p2p[2] + factors.sdv[2] + factors.fmv[2]) / 3.0;
    round2(mean).clamp(0.0, 1.0)
}

/// Fixed-priority label decision
pub fn classify(score: f64, risk_factor: bool) -> RiskLabel {
    if score > DANGER_SCORE && risk_factor {
        RiskLabel::Danger
    } else if risk_factor {
        RiskLabel::High
    } else if score > MODERATE_SCORE {
        RiskLabel::Moderate
    } else if score > LOW_SCORE {
        RiskLabel::Low
    } else {
        RiskLabel::Safe
    }
}

/// Recompute score and label from the current factors
pub fn rescore(data: &mut CountData) {
    data.score = score(&data.factors);
    data.label = classify(data.score, risk_factor(&data.factors));
}

/// Human readable notification text for a label change
pub fn notification_message(name: &str, label: RiskLabel) -> String {
    match label {
        RiskLabel::Safe => format!("{} location is at {}", name, label),
        _ => format!("{} location is at {} RISK", name, label),
    }
}

/// Recency-weighted pairwise average
pub fn fold(stored: f64, current: f64) -> f64 {
    let folded = (stored + current) / 2.0;
    if folded.is_finite() {
        folded
    } else {
        0.0
    }
}
