use crate::config::{PSD_TOLERANCE, TRADING_DAYS};
use crate::error::{PortfolioError, Result};
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};

/// Annualized expected return and volatility of a weight vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub expected_return: f64,
    pub risk: f64,
}

impl PortfolioMetrics {
    /// `(expected_return - risk_free_rate) / risk`, or `None` at zero risk.
    pub fn sharpe_ratio(&self, risk_free_rate: f64) -> Option<f64> {
        if self.risk > 0.0 {
            let sharpe = (self.expected_return - risk_free_rate) / self.risk;
            sharpe.is_finite().then_some(sharpe)
        } else {
            None
        }
    }
}

/// Why a weight vector has no usable metrics.
#[derive(Clone, Debug, PartialEq)]
pub enum Infeasibility {
    LengthMismatch { expected: usize, actual: usize },
    MalformedCovariance { assets: usize },
    NonFiniteWeight { index: usize },
    NegativeVariance(f64),
    NonFiniteOutput,
}

impl std::fmt::Display for Infeasibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { expected, actual } => {
                write!(f, "weight vector has {} entries, expected {}", actual, expected)
            }
            Self::MalformedCovariance { assets } => {
                write!(f, "covariance matrix is not {}x{}", assets, assets)
            }
            Self::NonFiniteWeight { index } => write!(f, "weight {} is not finite", index),
            Self::NegativeVariance(v) => write!(f, "portfolio variance {:e} is negative", v),
            Self::NonFiniteOutput => write!(f, "expected return or risk is not finite"),
        }
    }
}

/// Outcome of evaluating a candidate weight vector.
#[derive(Clone, Debug, PartialEq)]
pub enum Assessment {
    Feasible(PortfolioMetrics),
    Infeasible(Infeasibility),
}

impl Assessment {
    pub fn feasible(self) -> Option<PortfolioMetrics> {
        match self {
            Self::Feasible(m) => Some(m),
            Self::Infeasible(_) => None,
        }
    }

    pub fn into_result(self) -> Result<PortfolioMetrics> {
        match self {
            Self::Feasible(m) => Ok(m),
            Self::Infeasible(reason) => Err(PortfolioError::metrics(reason.to_string())),
        }
    }
}

pub fn portfolio_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

pub fn portfolio_variance(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let n = weights.len();
    let mut var = 0.0;
    for i in 0..n {
        for j in 0..n {
            var += weights[i] * weights[j] * cov[i][j];
        }
    }
    var
}

/// Evaluates a weight vector without turning infeasibility into an error.
pub fn assess(weights: &[f64], stats: &Statistics) -> Assessment {
    let n = stats.num_assets();
    if weights.len() != n {
        return Assessment::Infeasible(Infeasibility::LengthMismatch {
            expected: n,
            actual: weights.len(),
        });
    }
    if !stats.is_well_formed() {
        return Assessment::Infeasible(Infeasibility::MalformedCovariance { assets: n });
    }
    if let Some(index) = weights.iter().position(|w| !w.is_finite()) {
        return Assessment::Infeasible(Infeasibility::NonFiniteWeight { index });
    }

    let mut variance = portfolio_variance(weights, &stats.covariance);
    if variance < 0.0 {
        // Rounding can push an exactly-singular quadratic form just below zero.
        let scale: f64 = (0..n)
            .map(|i| weights[i] * weights[i] * stats.covariance[i][i].abs())
            .sum();
        if variance >= -PSD_TOLERANCE * scale.max(f64::MIN_POSITIVE) {
            variance = 0.0;
        } else {
            return Assessment::Infeasible(Infeasibility::NegativeVariance(variance));
        }
    }

    let expected_return = TRADING_DAYS * portfolio_return(weights, &stats.mean_returns);
    let risk = (TRADING_DAYS * variance).sqrt();

    if !expected_return.is_finite() || !risk.is_finite() {
        return Assessment::Infeasible(Infeasibility::NonFiniteOutput);
    }

    Assessment::Feasible(PortfolioMetrics {
        expected_return,
        risk,
    })
}

/// Annualized `(expected_return, risk)` for a weight vector.
pub fn calculate_portfolio_metrics(weights: &[f64], stats: &Statistics) -> Result<PortfolioMetrics> {
    assess(weights, stats).into_result()
}
