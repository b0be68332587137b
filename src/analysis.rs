//! Orchestration boundary: runs the core stages in order for one request and
//! stops at the first failure, so no stage runs on the output of a failed one.

use crate::config::{AnalysisConfig, TRADING_DAYS};
use crate::error::{PortfolioError, Result};
use crate::frontier::{self, FrontierPoint};
use crate::metrics::{self, PortfolioMetrics};
use crate::optimizer::{self, SimplexConstraints, SqpOptions};
use crate::returns::{PriceMatrix, ReturnMatrix};
use crate::simulation::{self, MonteCarloConfig, SimulationResult, SimulationSummary};
use crate::stats::Statistics;
use crate::var::{self, RiskEstimate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Everything the reporting side needs from one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub weights: Vec<(String, f64)>,
    pub metrics: PortfolioMetrics,
    pub sharpe_ratio: Option<f64>,
    pub risk_free_rate: f64,
    pub risk: Vec<RiskEstimate>,
    pub initial_investment: f64,
    pub num_periods: usize,
    /// Annualized volatility per usable asset.
    pub asset_volatilities: Vec<(String, f64)>,
    /// Correlation matrix in `weights` order.
    pub correlation: Vec<Vec<f64>>,
    pub dropped_symbols: Vec<String>,
    pub optimizer_iterations: Option<usize>,
    pub simulation_summary: SimulationSummary,
    pub frontier: Vec<FrontierPoint>,
    #[serde(skip)]
    pub simulation: SimulationResult,
}

/// Full pipeline on a price matrix: returns -> statistics -> optimal weights
/// -> VaR -> Monte Carlo -> frontier sample.
pub fn run_analysis(prices: &PriceMatrix, config: &AnalysisConfig) -> Result<AnalysisReport> {
    config.validate()?;
    check_symbols_match(prices, config)?;

    let returns = ReturnMatrix::from_prices(prices)?;
    if !returns.dropped_assets().is_empty() {
        warn!(
            "No usable price history for {:?}; continuing with {:?}",
            returns.dropped_assets(),
            returns.assets()
        );
    }
    info!(
        "Return matrix: {} assets x {} periods",
        returns.num_assets(),
        returns.num_periods()
    );

    let stats = Statistics::from_returns(&returns)?;

    info!(
        "Optimizing Sharpe ratio over {} assets (risk-free rate {:.4})...",
        returns.num_assets(),
        config.risk_free_rate
    );
    let optimal = optimizer::optimize_portfolio(&stats, config.risk_free_rate, &SqpOptions::default())?;
    info!(
        "Optimizer converged in {} iterations ({} evaluations): Sharpe={:.3}",
        optimal.iterations, optimal.function_evaluations, optimal.sharpe_ratio
    );

    let mut report = evaluate(&returns, &stats, &optimal.weights, config)?;
    report.optimizer_iterations = Some(optimal.iterations);
    Ok(report)
}

/// Risk and simulation stages for a caller-chosen allocation, skipping the
/// optimizer. The weights must be in return-matrix column order.
pub fn run_with_weights(
    prices: &PriceMatrix,
    weights: &[f64],
    config: &AnalysisConfig,
) -> Result<AnalysisReport> {
    config.validate()?;
    check_symbols_match(prices, config)?;
    let returns = ReturnMatrix::from_prices(prices)?;

    if weights.len() != returns.num_assets() {
        return Err(PortfolioError::invalid_input(format!(
            "{} weights for usable assets {:?}",
            weights.len(),
            returns.assets()
        )));
    }
    if !SimplexConstraints::long_only(weights.len()).is_satisfied(weights, WEIGHT_TOLERANCE) {
        return Err(PortfolioError::invalid_input(
            "weights must each lie in [0, 1] and sum to 1",
        ));
    }

    let stats = Statistics::from_returns(&returns)?;
    evaluate(&returns, &stats, weights, config)
}

/// The price matrix must cover exactly the requested symbols (ignoring case).
fn check_symbols_match(prices: &PriceMatrix, config: &AnalysisConfig) -> Result<()> {
    let normalize = |symbols: &[String]| -> BTreeSet<String> {
        symbols.iter().map(|s| s.trim().to_uppercase()).collect()
    };
    let requested = normalize(config.symbols.as_slice());
    let priced = normalize(prices.symbols());
    if requested != priced {
        return Err(PortfolioError::invalid_input(format!(
            "price matrix covers {:?} but the request names {:?}",
            priced, requested
        )));
    }
    Ok(())
}

fn evaluate(
    returns: &ReturnMatrix,
    stats: &Statistics,
    weights: &[f64],
    config: &AnalysisConfig,
) -> Result<AnalysisReport> {
    let portfolio_metrics = metrics::calculate_portfolio_metrics(weights, stats)?;
    let sharpe_ratio = portfolio_metrics.sharpe_ratio(config.risk_free_rate);

    let risk = var::estimate_risk(weights, returns, &config.confidence_levels)?;
    for estimate in &risk {
        info!(
            "VaR({:.0}%) = {:.4}, ES = {:.4}",
            estimate.confidence_level * 100.0,
            estimate.value_at_risk,
            estimate.expected_shortfall
        );
    }

    info!(
        "Running {} Monte Carlo paths over {} steps (seed {})...",
        config.num_simulations, config.time_horizon, config.seed
    );
    let simulation = simulation::simulate_portfolio(
        stats,
        weights,
        config.initial_investment,
        &MonteCarloConfig {
            num_simulations: config.num_simulations,
            time_horizon: config.time_horizon,
            seed: config.seed,
        },
    )?;
    let simulation_summary = simulation.summary();

    let frontier = frontier::sample_frontier(
        stats,
        config.frontier_samples,
        config.risk_free_rate,
        config.seed,
    );

    Ok(AnalysisReport {
        weights: returns
            .assets()
            .iter()
            .cloned()
            .zip(weights.iter().copied())
            .collect(),
        metrics: portfolio_metrics,
        sharpe_ratio,
        risk_free_rate: config.risk_free_rate,
        risk,
        initial_investment: config.initial_investment,
        num_periods: returns.num_periods(),
        asset_volatilities: returns
            .assets()
            .iter()
            .cloned()
            .zip(stats.volatilities().into_iter().map(|v| v * TRADING_DAYS.sqrt()))
            .collect(),
        correlation: stats.correlation(),
        dropped_symbols: returns.dropped_assets().to_vec(),
        optimizer_iterations: None,
        simulation_summary,
        frontier,
        simulation,
    })
}
