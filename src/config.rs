use crate::error::{PortfolioError, Result};
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

/// Trading periods per year used to annualize per-period statistics.
pub const TRADING_DAYS: f64 = 252.0;

/// Annualized risk-free rate subtracted from expected return in the Sharpe ratio.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

pub const DEFAULT_CONFIDENCE_LEVELS: &[f64] = &[0.95, 0.99];

pub const DEFAULT_NUM_SIMULATIONS: usize = 1000;

/// One trading year of simulated steps.
pub const DEFAULT_TIME_HORIZON: usize = 252;

pub const DEFAULT_HISTORY_YEARS: u32 = 3;
pub const MIN_HISTORY_YEARS: u32 = 1;
pub const MAX_HISTORY_YEARS: u32 = 10;

pub const DEFAULT_INITIAL_INVESTMENT: f64 = 10_000.0;

/// Random candidate portfolios scattered for the frontier plot.
pub const DEFAULT_FRONTIER_SAMPLES: usize = 2000;

/// Relative tolerance below zero at which a variance or Cholesky pivot still
/// counts as rounding noise and is clamped to zero. Shared by the metrics and
/// the simulator so both accept the same covariance matrices.
pub const PSD_TOLERANCE: f64 = 1e-12;

// ── Optimizer ───────────────────────────────────────────────────────────────
pub const OPTIMIZER_MAX_ITERATIONS: usize = 100;
pub const OPTIMIZER_FTOL: f64 = 1e-9;
pub const OPTIMIZER_STEP_TOLERANCE: f64 = 1e-10;

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// Risk-free rate from `ALLOCSIM_RISK_FREE_RATE`, falling back to the default.
pub fn configured_risk_free_rate() -> f64 {
    match std::env::var("ALLOCSIM_RISK_FREE_RATE") {
        Ok(raw) => match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                warn!(
                    "Invalid ALLOCSIM_RISK_FREE_RATE={} ; using default {}",
                    raw, DEFAULT_RISK_FREE_RATE
                );
                DEFAULT_RISK_FREE_RATE
            }
        },
        Err(_) => DEFAULT_RISK_FREE_RATE,
    }
}

pub fn cache_dir() -> std::path::PathBuf {
    std::env::var("ALLOCSIM_CACHE_DIR")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from(".cache"))
}

pub fn batch_fetch_delay_ms() -> u64 {
    std::env::var("ALLOCSIM_FETCH_DELAY_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|v| v.clamp(0, 5_000))
        .unwrap_or(350)
}

/// Everything one analysis run needs besides the price history itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub symbols: Vec<String>,
    pub history_years: u32,
    pub initial_investment: f64,
    pub confidence_levels: Vec<f64>,
    pub risk_free_rate: f64,
    pub num_simulations: usize,
    pub time_horizon: usize,
    pub seed: u64,
    pub frontier_samples: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            history_years: DEFAULT_HISTORY_YEARS,
            initial_investment: DEFAULT_INITIAL_INVESTMENT,
            confidence_levels: DEFAULT_CONFIDENCE_LEVELS.to_vec(),
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            num_simulations: DEFAULT_NUM_SIMULATIONS,
            time_horizon: DEFAULT_TIME_HORIZON,
            seed: 0,
            frontier_samples: DEFAULT_FRONTIER_SAMPLES,
        }
    }
}

impl AnalysisConfig {
    pub fn with_symbols(symbols: &[&str]) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Yahoo-style range string covering the requested history window.
    pub fn history_range(&self) -> String {
        format!("{}y", self.history_years)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            if symbol.trim().is_empty() {
                return Err(PortfolioError::invalid_input("empty asset symbol"));
            }
            if !seen.insert(symbol.trim().to_uppercase()) {
                return Err(PortfolioError::invalid_input(format!(
                    "duplicate asset symbol {}",
                    symbol
                )));
            }
        }
        if seen.len() < 2 {
            return Err(PortfolioError::insufficient_data(format!(
                "portfolio needs at least 2 asset symbols, got {}",
                seen.len()
            )));
        }
        if !(MIN_HISTORY_YEARS..=MAX_HISTORY_YEARS).contains(&self.history_years) {
            return Err(PortfolioError::invalid_input(format!(
                "history window must be {}-{} years, got {}",
                MIN_HISTORY_YEARS, MAX_HISTORY_YEARS, self.history_years
            )));
        }
        if !(self.initial_investment.is_finite() && self.initial_investment > 0.0) {
            return Err(PortfolioError::invalid_input(format!(
                "initial investment must be positive, got {}",
                self.initial_investment
            )));
        }
        if let Some(c) = self
            .confidence_levels
            .iter()
            .find(|c| !(c.is_finite() && **c > 0.0 && **c < 1.0))
        {
            return Err(PortfolioError::invalid_input(format!(
                "confidence level must lie in (0, 1), got {}",
                c
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(PortfolioError::invalid_input("risk-free rate must be finite"));
        }
        if self.num_simulations == 0 || self.time_horizon == 0 {
            return Err(PortfolioError::invalid_input(
                "simulation count and horizon must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.risk_free_rate, 0.02);
        assert_eq!(cfg.num_simulations, 1000);
        assert_eq!(cfg.time_horizon, 252);
        assert_eq!(cfg.confidence_levels, vec![0.95, 0.99]);
        assert_eq!(cfg.history_range(), "3y");
    }

    #[test]
    fn test_validate_accepts_reasonable_request() {
        let cfg = AnalysisConfig::with_symbols(&["AAPL", "MSFT"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_single_symbol() {
        let cfg = AnalysisConfig::with_symbols(&["AAPL"]);
        assert!(matches!(
            cfg.validate(),
            Err(PortfolioError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates_case_insensitively() {
        let cfg = AnalysisConfig::with_symbols(&["AAPL", "aapl"]);
        assert!(matches!(cfg.validate(), Err(PortfolioError::InvalidInput { .. })));
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let base = AnalysisConfig::with_symbols(&["AAPL", "MSFT"]);

        let mut cfg = base.clone();
        cfg.history_years = 11;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.initial_investment = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.confidence_levels = vec![0.95, 1.0];
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.num_simulations = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base;
        cfg.risk_free_rate = f64::NAN;
        assert!(cfg.validate().is_err());
    }
}
