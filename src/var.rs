use crate::error::{PortfolioError, Result};
use crate::returns::ReturnMatrix;
use serde::{Deserialize, Serialize};

/// Historical-simulation risk at one confidence level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskEstimate {
    pub confidence_level: f64,
    /// Loss magnitude not exceeded with this confidence; 0 when even the
    /// tail period is a gain.
    pub value_at_risk: f64,
    /// Mean loss over the periods at or beyond the VaR threshold, floored at 0.
    pub expected_shortfall: f64,
}

/// Per-period portfolio returns `sum_a r_t[a] * w[a]`.
pub fn portfolio_returns(weights: &[f64], returns: &ReturnMatrix) -> Result<Vec<f64>> {
    if returns.num_periods() == 0 {
        return Err(PortfolioError::risk_estimation("return matrix is empty"));
    }
    if weights.len() != returns.num_assets() {
        return Err(PortfolioError::risk_estimation(format!(
            "weight vector has {} entries for {} assets",
            weights.len(),
            returns.num_assets()
        )));
    }
    if weights.iter().any(|w| !w.is_finite()) {
        return Err(PortfolioError::risk_estimation("weight vector contains a non-finite value"));
    }

    Ok(returns
        .rows()
        .iter()
        .map(|row| row.iter().zip(weights).map(|(r, w)| r * w).sum())
        .collect())
}

/// Percentile (0-100) of `values` with linear interpolation between closest
/// ranks, `rank = q * (n - 1)`.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&pct) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(percentile_of_sorted(&sorted, pct))
}

pub(crate) fn percentile_of_sorted(sorted: &[f64], pct: f64) -> f64 {
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn check_confidence(confidence_level: f64) -> Result<()> {
    if !(confidence_level.is_finite() && confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(PortfolioError::risk_estimation(format!(
            "confidence level must lie in (0, 1), got {}",
            confidence_level
        )));
    }
    Ok(())
}

/// Historical VaR: the negated `(1 - confidence) * 100`-th percentile of the
/// portfolio return series, as a non-negative loss magnitude.
pub fn calculate_var(weights: &[f64], returns: &ReturnMatrix, confidence_level: f64) -> Result<f64> {
    check_confidence(confidence_level)?;
    let series = portfolio_returns(weights, returns)?;
    let mut sorted = series;
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok(loss_magnitude(percentile_of_sorted(&sorted, (1.0 - confidence_level) * 100.0)))
}

fn loss_magnitude(portfolio_return: f64) -> f64 {
    (-portfolio_return).max(0.0)
}

/// VaR and expected shortfall at several confidence levels over one return series.
pub fn estimate_risk(
    weights: &[f64],
    returns: &ReturnMatrix,
    confidence_levels: &[f64],
) -> Result<Vec<RiskEstimate>> {
    for &c in confidence_levels {
        check_confidence(c)?;
    }
    let mut sorted = portfolio_returns(weights, returns)?;
    sorted.sort_by(|a, b| a.total_cmp(b));

    Ok(confidence_levels
        .iter()
        .map(|&confidence_level| {
            let threshold = percentile_of_sorted(&sorted, (1.0 - confidence_level) * 100.0);
            let tail: Vec<f64> = sorted.iter().copied().take_while(|r| *r <= threshold).collect();
            // The smallest observation is always <= an interpolated lower percentile.
            let expected_shortfall =
                loss_magnitude(tail.iter().sum::<f64>() / tail.len().max(1) as f64);
            RiskEstimate {
                confidence_level,
                value_at_risk: loss_magnitude(threshold),
                expected_shortfall,
            }
        })
        .collect())
}

/// VaR at each confidence level, in the order given.
pub fn value_at_risk_levels(
    weights: &[f64],
    returns: &ReturnMatrix,
    confidence_levels: &[f64],
) -> Result<Vec<f64>> {
    Ok(estimate_risk(weights, returns, confidence_levels)?
        .into_iter()
        .map(|e| e.value_at_risk)
        .collect())
}

/// Expected shortfall (CVaR) at one confidence level.
pub fn conditional_value_at_risk(
    weights: &[f64],
    returns: &ReturnMatrix,
    confidence_level: f64,
) -> Result<f64> {
    estimate_risk(weights, returns, &[confidence_level])?
        .first()
        .map(|e| e.expected_shortfall)
        .ok_or_else(|| PortfolioError::risk_estimation("no risk estimate produced"))
}
