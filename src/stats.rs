use crate::error::{PortfolioError, Result};
use crate::returns::ReturnMatrix;
use serde::{Deserialize, Serialize};

/// Mean-return vector and sample covariance matrix of a return matrix.
///
/// Computed once per analysis run and shared read-only by the optimizer,
/// the risk estimator and the simulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub mean_returns: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
}

impl Statistics {
    pub fn from_returns(returns: &ReturnMatrix) -> Result<Self> {
        Self::from_rows(returns.rows(), returns.num_assets())
    }

    /// Computes column means and the `n - 1` sample covariance over raw rows.
    pub fn from_rows(rows: &[Vec<f64>], num_assets: usize) -> Result<Self> {
        if num_assets == 0 {
            return Err(PortfolioError::statistics("no asset columns"));
        }
        if rows.len() < 2 {
            return Err(PortfolioError::statistics(format!(
                "sample covariance needs at least 2 observations, got {}",
                rows.len()
            )));
        }
        for (t, row) in rows.iter().enumerate() {
            if row.len() != num_assets {
                return Err(PortfolioError::statistics(format!(
                    "row {} has {} values, expected {}",
                    t,
                    row.len(),
                    num_assets
                )));
            }
            if let Some(a) = row.iter().position(|v| !v.is_finite()) {
                return Err(PortfolioError::statistics(format!(
                    "non-finite return at row {}, asset {}",
                    t, a
                )));
            }
        }

        let n = rows.len() as f64;
        let means: Vec<f64> = (0..num_assets)
            .map(|a| rows.iter().map(|row| row[a]).sum::<f64>() / n)
            .collect();

        let mut cov = vec![vec![0.0; num_assets]; num_assets];
        for i in 0..num_assets {
            for j in i..num_assets {
                let sum: f64 = rows
                    .iter()
                    .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                    .sum();
                let covariance = sum / (n - 1.0);
                cov[i][j] = covariance;
                cov[j][i] = covariance;
            }
        }

        if means.iter().any(|m| !m.is_finite())
            || cov.iter().flatten().any(|c| !c.is_finite())
        {
            return Err(PortfolioError::statistics(
                "mean or covariance overflowed to a non-finite value",
            ));
        }

        Ok(Self {
            mean_returns: means,
            covariance: cov,
        })
    }

    pub fn num_assets(&self) -> usize {
        self.mean_returns.len()
    }

    /// Covariance is `n x n` for `n` mean returns.
    pub fn is_well_formed(&self) -> bool {
        let n = self.num_assets();
        self.covariance.len() == n && self.covariance.iter().all(|row| row.len() == n)
    }

    /// Per-period standard deviation of each asset. Empty for a malformed
    /// covariance.
    pub fn volatilities(&self) -> Vec<f64> {
        if !self.is_well_formed() {
            return Vec::new();
        }
        (0..self.num_assets())
            .map(|i| self.covariance[i][i].max(0.0).sqrt())
            .collect()
    }

    /// Pearson correlation matrix; assets with zero variance correlate 0 with
    /// everything but themselves.
    pub fn correlation(&self) -> Vec<Vec<f64>> {
        let vols = self.volatilities();
        let n = vols.len();
        let mut corr = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                corr[i][j] = if i == j {
                    1.0
                } else if vols[i] > 0.0 && vols[j] > 0.0 {
                    self.covariance[i][j] / (vols[i] * vols[j])
                } else {
                    0.0
                };
            }
        }
        corr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_returns() -> ReturnMatrix {
        ReturnMatrix::from_returns(
            vec!["AAA".to_string(), "BBB".to_string()],
            vec![vec![0.01, 0.02], vec![-0.01, 0.01], vec![0.02, -0.005]],
        )
        .unwrap()
    }

    #[test]
    fn test_means_and_covariance_match_hand_computation() {
        let stats = Statistics::from_returns(&sample_returns()).unwrap();

        assert!((stats.mean_returns[0] - 0.02 / 3.0).abs() < 1e-15);
        assert!((stats.mean_returns[1] - 0.025 / 3.0).abs() < 1e-15);

        // var(A) = 4.6667e-4 / 2, var(B) = 3.1667e-4 / 2, cov = -1.6667e-4 / 2
        assert!((stats.covariance[0][0] - 2.333_333_333e-4).abs() < 1e-12);
        assert!((stats.covariance[1][1] - 1.583_333_333e-4).abs() < 1e-12);
        assert!((stats.covariance[0][1] + 8.333_333_333e-5).abs() < 1e-12);
    }

    #[test]
    fn test_covariance_matrix_symmetry() {
        let rows = vec![
            vec![0.01, 0.03, -0.02],
            vec![0.02, -0.01, 0.00],
            vec![-0.03, 0.02, 0.01],
            vec![0.00, 0.01, 0.02],
        ];
        let stats = Statistics::from_rows(&rows, 3).unwrap();

        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (stats.covariance[i][j] - stats.covariance[j][i]).abs() < 1e-15,
                    "Covariance matrix should be symmetric"
                );
            }
            assert!(stats.covariance[i][i] > 0.0, "Variance should be positive");
        }
    }

    #[test]
    fn test_recomputation_is_identical() {
        let returns = sample_returns();
        let first = Statistics::from_returns(&returns).unwrap();
        let second = Statistics::from_returns(&returns).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_finite_input_fails() {
        let rows = vec![vec![0.01, f64::NAN], vec![0.02, 0.01]];
        let err = Statistics::from_rows(&rows, 2).unwrap_err();
        assert!(matches!(err, PortfolioError::Statistics { .. }));

        let rows = vec![vec![0.01, f64::INFINITY], vec![0.02, 0.01]];
        assert!(Statistics::from_rows(&rows, 2).is_err());
    }

    #[test]
    fn test_overflow_fails() {
        let rows = vec![vec![1e308, 0.0], vec![-1e308, 0.0]];
        let err = Statistics::from_rows(&rows, 2).unwrap_err();
        assert!(matches!(err, PortfolioError::Statistics { .. }));
    }

    #[test]
    fn test_single_observation_fails() {
        let err = Statistics::from_rows(&[vec![0.01, 0.02]], 2).unwrap_err();
        assert!(matches!(err, PortfolioError::Statistics { .. }));
    }

    #[test]
    fn test_correlation_has_unit_diagonal() {
        let stats = Statistics::from_returns(&sample_returns()).unwrap();
        let corr = stats.correlation();
        assert_eq!(corr[0][0], 1.0);
        assert_eq!(corr[1][1], 1.0);
        assert!(corr[0][1] < 0.0 && corr[0][1] >= -1.0);
    }

    #[test]
    fn test_malformed_covariance_has_no_derived_measures() {
        let stats = Statistics {
            mean_returns: vec![0.001, 0.002],
            covariance: vec![vec![1e-4, 0.0]],
        };
        assert!(!stats.is_well_formed());
        assert!(stats.volatilities().is_empty());
        assert!(stats.correlation().is_empty());
    }
}
