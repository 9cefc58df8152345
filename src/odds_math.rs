//! Pure, stateless odds/probability conversions and vig removal.
//!
//! Every function here is side-effect free; intermediate probabilities
//! round to 4 decimal places and equality comparisons use a 1e-4
//! tolerance.

use crate::error::{CoreError, CoreResult};

pub const PROB_EQ_TOLERANCE: f64 = 1e-4;

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Converts American odds to decimal odds.
pub fn american_to_decimal(a: i32) -> CoreResult<f64> {
    if a == 0 {
        return Err(CoreError::InvalidOdds("american odds cannot be zero".into()));
    }
    let decimal = if a > 0 {
        1.0 + (a as f64) / 100.0
    } else {
        1.0 + 100.0 / (a.unsigned_abs() as f64)
    };
    Ok(decimal)
}

/// Converts decimal odds back to American odds.
pub fn decimal_to_american(d: f64) -> CoreResult<i32> {
    if d <= 1.0 {
        return Err(CoreError::InvalidOdds(format!(
            "decimal odds must exceed 1.0, got {d}"
        )));
    }
    let american = if d >= 2.0 {
        ((d - 1.0) * 100.0).round()
    } else {
        (-100.0 / (d - 1.0)).round()
    };
    Ok(american as i32)
}

/// With-vig implied probability from American odds.
pub fn implied_prob(a: i32) -> CoreResult<f64> {
    Ok(round4(1.0 / american_to_decimal(a)?))
}

/// Two-way vig removal. Returns `(None, message)` semantics via the second
/// element: when the inputs already sum to <= 1, the pair is returned
/// unchanged along with an advisory that no vig was detected.
pub fn remove_vig_two_way(p_a: f64, p_b: f64) -> (f64, f64, Option<&'static str>) {
    let total = p_a + p_b;
    if total > 1.0 {
        (round4(p_a / total), round4(p_b / total), None)
    } else {
        (p_a, p_b, Some("no vig detected"))
    }
}

/// N-way generalization of `remove_vig_two_way`.
pub fn remove_vig_n_way(probs: &[f64]) -> (Vec<f64>, Option<&'static str>) {
    let total: f64 = probs.iter().sum();
    if total > 1.0 {
        (probs.iter().map(|p| round4(p / total)).collect(), None)
    } else {
        (probs.to_vec(), Some("no vig detected"))
    }
}

/// Model probability minus market (no-vig) probability.
pub fn calculate_edge(p_model: f64, p_market: f64) -> CoreResult<f64> {
    if !(0.0..=1.0).contains(&p_model) {
        return Err(CoreError::InvalidProbability(format!(
            "model probability {p_model} outside [0,1]"
        )));
    }
    if !(0.0..=1.0).contains(&p_market) {
        return Err(CoreError::InvalidProbability(format!(
            "market probability {p_market} outside [0,1]"
        )));
    }
    Ok(round4(p_model - p_market))
}

/// True iff `a` is strictly better for the bettor than `b`, for the same side
/// of the same market. Positive beats negative; among positives, higher is
/// better; among negatives, closer to zero is better.
pub fn is_better_odds(a: i32, b: i32) -> bool {
    match (a > 0, b > 0) {
        (true, true) => a > b,
        (false, false) => a > b,
        (true, false) => true,
        (false, true) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbitrageResult {
    pub has_arbitrage: bool,
    pub profit_pct: f64,
}

/// Arbitrage check on a pair of best American odds for the two sides of a
/// market. Arbitrage exists iff the with-vig implied probabilities sum to
/// less than 1.
pub fn detect_arbitrage(best_over: i32, best_under: i32) -> CoreResult<ArbitrageResult> {
    let p_o = implied_prob(best_over)?;
    let p_u = implied_prob(best_under)?;
    let total = p_o + p_u;
    if total < 1.0 {
        Ok(ArbitrageResult {
            has_arbitrage: true,
            profit_pct: (1.0 / total - 1.0) * 100.0,
        })
    } else {
        Ok(ArbitrageResult {
            has_arbitrage: false,
            profit_pct: 0.0,
        })
    }
}

/// Conventional display string for American odds (`+150`, `-110`).
pub fn format_odds_display(a: i32) -> String {
    if a > 0 {
        format!("+{a}")
    } else {
        format!("{a}")
    }
}
