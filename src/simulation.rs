//! Monte Carlo projection of portfolio value.
//!
//! Per-period asset returns are drawn from the multivariate normal fitted to
//! history (mean vector plus Cholesky factor of the covariance) and
//! compounded through the portfolio weights. Paths run in parallel via Rayon;
//! each path owns an RNG derived from `(seed, path index)`, so a given seed
//! reproduces the same array whatever the thread count.

use crate::config::PSD_TOLERANCE;
use crate::error::{PortfolioError, Result};
use crate::stats::Statistics;
use crate::var::percentile_of_sorted;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub num_simulations: usize,
    /// Columns per path, including the initial value at step 0.
    pub time_horizon: usize,
    pub seed: u64,
}

impl MonteCarloConfig {
    /// Default path count and horizon with a caller-chosen seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            num_simulations: crate::config::DEFAULT_NUM_SIMULATIONS,
            time_horizon: crate::config::DEFAULT_TIME_HORIZON,
            seed,
        }
    }
}

/// Simulated portfolio values indexed by `[simulation][step]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub paths: Vec<Vec<f64>>,
    pub initial_investment: f64,
    pub seed: u64,
}

/// Distribution of terminal values across paths.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub mean_final: f64,
    pub median_final: f64,
    pub p5_final: f64,
    pub p95_final: f64,
    pub min_final: f64,
    pub max_final: f64,
    /// Share of paths ending below the initial investment.
    pub probability_of_loss: f64,
}

impl SimulationResult {
    pub fn num_simulations(&self) -> usize {
        self.paths.len()
    }

    pub fn time_horizon(&self) -> usize {
        self.paths.first().map_or(0, Vec::len)
    }

    pub fn final_values(&self) -> Vec<f64> {
        self.paths.iter().filter_map(|p| p.last().copied()).collect()
    }

    /// The `pct`-th percentile (0-100) of portfolio value at every step.
    pub fn percentile_band(&self, pct: f64) -> Vec<f64> {
        (0..self.time_horizon())
            .map(|t| {
                let mut slice: Vec<f64> = self.paths.iter().map(|p| p[t]).collect();
                slice.sort_by(|a, b| a.total_cmp(b));
                percentile_of_sorted(&slice, pct.clamp(0.0, 100.0))
            })
            .collect()
    }

    pub fn summary(&self) -> SimulationSummary {
        let mut finals = self.final_values();
        finals.sort_by(|a, b| a.total_cmp(b));
        let n = finals.len().max(1) as f64;
        let losses = finals.iter().filter(|v| **v < self.initial_investment).count();

        let pick = |pct: f64| {
            if finals.is_empty() {
                f64::NAN
            } else {
                percentile_of_sorted(&finals, pct)
            }
        };

        SimulationSummary {
            mean_final: finals.iter().sum::<f64>() / n,
            median_final: pick(50.0),
            p5_final: pick(5.0),
            p95_final: pick(95.0),
            min_final: finals.first().copied().unwrap_or(f64::NAN),
            max_final: finals.last().copied().unwrap_or(f64::NAN),
            probability_of_loss: losses as f64 / n,
        }
    }
}

/// Lower-triangular `L` with `L * L^T = cov` for a positive-semidefinite
/// `cov`. Pivots within rounding of zero become zero columns.
pub fn cholesky_psd(cov: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let n = cov.len();
    if cov.iter().any(|row| row.len() != n) {
        return Err(PortfolioError::simulation("covariance matrix is not square"));
    }
    if cov.iter().flatten().any(|v| !v.is_finite()) {
        return Err(PortfolioError::simulation("covariance matrix is not finite"));
    }

    let scale = (0..n).map(|i| cov[i][i].abs()).fold(0.0, f64::max);
    let tol = PSD_TOLERANCE * scale.max(f64::MIN_POSITIVE);
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let diag = cov[i][i] - sum;
                if diag > tol {
                    l[i][i] = diag.sqrt();
                } else if diag >= -tol {
                    l[i][i] = 0.0;
                } else {
                    return Err(PortfolioError::simulation(format!(
                        "covariance matrix is not positive semidefinite (pivot {} = {:e})",
                        i, diag
                    )));
                }
            } else if l[j][j] > 0.0 {
                l[i][j] = (cov[i][j] - sum) / l[j][j];
            }
        }
    }

    Ok(l)
}

fn path_seed(seed: u64, path: usize) -> u64 {
    // SplitMix64 finalizer over the combined input.
    let mut z = seed ^ (path as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Projects `config.num_simulations` value paths of `config.time_horizon`
/// steps for the given weights.
///
/// `value[0]` is the initial investment; each later step compounds the
/// sampled portfolio return, `value[t] = value[t-1] * (1 + r_t)`. Values are
/// not floored, so a draw at or below -100% can take a path to zero or below.
pub fn simulate_portfolio(
    stats: &Statistics,
    weights: &[f64],
    initial_investment: f64,
    config: &MonteCarloConfig,
) -> Result<SimulationResult> {
    let n = stats.num_assets();
    if n == 0 {
        return Err(PortfolioError::simulation(
            "no return statistics to fit a distribution to",
        ));
    }
    if stats.covariance.len() != n {
        return Err(PortfolioError::simulation(format!(
            "covariance is {}x{} for {} assets",
            stats.covariance.len(),
            stats.covariance.len(),
            n
        )));
    }
    if weights.len() != n {
        return Err(PortfolioError::simulation(format!(
            "weight vector has {} entries for {} assets",
            weights.len(),
            n
        )));
    }
    if weights.iter().chain(&stats.mean_returns).any(|v| !v.is_finite()) {
        return Err(PortfolioError::simulation("weights or mean returns are not finite"));
    }
    if config.num_simulations == 0 || config.time_horizon == 0 {
        return Err(PortfolioError::simulation(format!(
            "simulation count and horizon must be positive, got {} x {}",
            config.num_simulations, config.time_horizon
        )));
    }
    if !(initial_investment.is_finite() && initial_investment > 0.0) {
        return Err(PortfolioError::simulation(format!(
            "initial investment must be positive, got {}",
            initial_investment
        )));
    }

    let chol = cholesky_psd(&stats.covariance)?;
    let means = &stats.mean_returns;

    let paths: Vec<Vec<f64>> = (0..config.num_simulations)
        .into_par_iter()
        .map(|path| {
            let mut rng = StdRng::seed_from_u64(path_seed(config.seed, path));
            let mut z = vec![0.0; n];
            let mut values = Vec::with_capacity(config.time_horizon);
            values.push(initial_investment);

            for t in 1..config.time_horizon {
                for zi in z.iter_mut() {
                    *zi = rng.sample(StandardNormal);
                }
                let portfolio_return: f64 = (0..n)
                    .map(|a| {
                        let shock: f64 = chol[a][..=a].iter().zip(&z).map(|(l, zi)| l * zi).sum();
                        (means[a] + shock) * weights[a]
                    })
                    .sum();
                values.push(values[t - 1] * (1.0 + portfolio_return));
            }
            values
        })
        .collect();

    Ok(SimulationResult {
        paths,
        initial_investment,
        seed: config.seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> Statistics {
        Statistics {
            mean_returns: vec![0.0006, 0.0003],
            covariance: vec![vec![0.0004, 0.0001], vec![0.0001, 0.0002]],
        }
    }

    fn config(num_simulations: usize, time_horizon: usize, seed: u64) -> MonteCarloConfig {
        MonteCarloConfig {
            num_simulations,
            time_horizon,
            seed,
        }
    }

    #[test]
    fn test_shape_and_initial_column() {
        let result = simulate_portfolio(&stats(), &[0.5, 0.5], 1000.0, &config(10, 5, 7)).unwrap();
        assert_eq!(result.num_simulations(), 10);
        assert_eq!(result.time_horizon(), 5);
        for path in &result.paths {
            assert_eq!(path.len(), 5);
            assert_eq!(path[0], 1000.0);
            assert!(path.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let a = simulate_portfolio(&stats(), &[0.3, 0.7], 500.0, &config(64, 30, 42)).unwrap();
        let b = simulate_portfolio(&stats(), &[0.3, 0.7], 500.0, &config(64, 30, 42)).unwrap();
        assert_eq!(a, b);

        let c = simulate_portfolio(&stats(), &[0.3, 0.7], 500.0, &config(64, 30, 43)).unwrap();
        assert_ne!(a.paths, c.paths);
    }

    #[test]
    fn test_zero_covariance_compounds_mean_exactly() {
        let s = Statistics {
            mean_returns: vec![0.01, 0.0],
            covariance: vec![vec![0.0, 0.0], vec![0.0, 0.0]],
        };
        let result = simulate_portfolio(&s, &[1.0, 0.0], 100.0, &config(3, 4, 1)).unwrap();
        for path in &result.paths {
            assert!((path[3] - 100.0 * 1.01_f64.powi(3)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_values_are_not_floored() {
        let s = Statistics {
            mean_returns: vec![-1.5, 0.0],
            covariance: vec![vec![0.0, 0.0], vec![0.0, 0.0]],
        };
        let result = simulate_portfolio(&s, &[1.0, 0.0], 100.0, &config(1, 3, 1)).unwrap();
        assert_eq!(result.paths[0], vec![100.0, -50.0, 25.0]);
    }

    #[test]
    fn test_sample_moments_match_fitted_distribution() {
        // One step per path: the single simulated return is value[1] / value[0] - 1.
        let s = stats();
        let w = [0.5, 0.5];
        let result = simulate_portfolio(&s, &w, 1.0, &config(20_000, 2, 3)).unwrap();
        let rets: Vec<f64> = result.paths.iter().map(|p| p[1] - 1.0).collect();
        let n = rets.len() as f64;
        let mean = rets.iter().sum::<f64>() / n;
        let var = rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

        let expected_mean = 0.5 * 0.0006 + 0.5 * 0.0003;
        let expected_var = 0.25 * 0.0004 + 0.25 * 0.0002 + 2.0 * 0.25 * 0.0001;
        assert!((mean - expected_mean).abs() < 5e-4, "mean {}", mean);
        assert!((var - expected_var).abs() / expected_var < 0.05, "var {}", var);
    }

    #[test]
    fn test_cholesky_reconstructs_and_tolerates_singular() {
        let cov = vec![
            vec![4.0, 2.0, 2.0],
            vec![2.0, 2.0, 1.0],
            vec![2.0, 1.0, 1.0],
        ];
        let l = cholesky_psd(&cov).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let v: f64 = (0..3).map(|k| l[i][k] * l[j][k]).sum();
                assert!((v - cov[i][j]).abs() < 1e-12, "({}, {}) {} vs {}", i, j, v, cov[i][j]);
            }
        }

        let singular = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        assert!(cholesky_psd(&singular).is_ok());

        let indefinite = vec![vec![1.0, 2.0], vec![2.0, 1.0]];
        assert!(matches!(
            cholesky_psd(&indefinite),
            Err(PortfolioError::Simulation { .. })
        ));
    }

    #[test]
    fn test_cholesky_and_metrics_share_negative_tolerance() {
        // Second pivot is -1e-10: beyond rounding for both the factorization
        // and the portfolio variance of the hedged weights.
        let s = Statistics {
            mean_returns: vec![0.001, 0.001],
            covariance: vec![vec![1.0, 1.0], vec![1.0, 1.0 - 1e-10]],
        };
        assert!(matches!(
            cholesky_psd(&s.covariance),
            Err(PortfolioError::Simulation { .. })
        ));
        assert!(crate::metrics::calculate_portfolio_metrics(&[1.0, -1.0], &s).is_err());

        let within = vec![vec![1.0, 1.0], vec![1.0, 1.0 - 1e-14]];
        assert!(cholesky_psd(&within).is_ok());
    }

    #[test]
    fn test_invalid_parameters_fail() {
        let s = stats();
        let w = [0.5, 0.5];
        assert!(simulate_portfolio(&s, &w, 1000.0, &config(0, 5, 1)).is_err());
        assert!(simulate_portfolio(&s, &w, 1000.0, &config(5, 0, 1)).is_err());
        assert!(simulate_portfolio(&s, &w, 0.0, &config(5, 5, 1)).is_err());
        assert!(simulate_portfolio(&s, &[1.0], 1000.0, &config(5, 5, 1)).is_err());

        let empty = Statistics {
            mean_returns: vec![],
            covariance: vec![],
        };
        assert!(matches!(
            simulate_portfolio(&empty, &[], 1000.0, &config(5, 5, 1)),
            Err(PortfolioError::Simulation { .. })
        ));
    }

    #[test]
    fn test_percentile_bands_are_ordered() {
        let result = simulate_portfolio(&stats(), &[0.5, 0.5], 1000.0, &config(200, 20, 9)).unwrap();
        let p10 = result.percentile_band(10.0);
        let p50 = result.percentile_band(50.0);
        let p90 = result.percentile_band(90.0);
        assert_eq!(p50.len(), 20);
        for t in 0..20 {
            assert!(p10[t] <= p50[t] && p50[t] <= p90[t]);
        }

        let summary = result.summary();
        assert!(summary.p5_final <= summary.median_final);
        assert!(summary.median_final <= summary.p95_final);
        assert!((0.0..=1.0).contains(&summary.probability_of_loss));
    }
}
