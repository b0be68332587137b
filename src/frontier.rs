use crate::metrics;
use crate::stats::Statistics;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One random candidate portfolio for the risk/return scatter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub risk: f64,
    pub sharpe_ratio: f64,
}

/// Generates a random weight vector that sums to 1.0, using Dirichlet-like sampling.
pub fn generate_random_weights(n: usize, rng: &mut impl rand::Rng) -> Vec<f64> {
    use rand_distr::{Distribution, Exp1};
    let raw: Vec<f64> = (0..n).map(|_| Exp1.sample(rng)).collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|v| v / sum).collect()
}

/// Scatters `count` uniformly random long-only portfolios, dropping any whose
/// metrics or Sharpe ratio are undefined. Chunks are seeded from `seed` so
/// the sample does not depend on the thread count.
pub fn sample_frontier(
    stats: &Statistics,
    count: usize,
    risk_free_rate: f64,
    seed: u64,
) -> Vec<FrontierPoint> {
    const CHUNK: usize = 256;
    let n = stats.num_assets();
    if n == 0 || count == 0 {
        return Vec::new();
    }

    (0..count.div_ceil(CHUNK))
        .into_par_iter()
        .flat_map_iter(|chunk| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(chunk as u64));
            let take = CHUNK.min(count - chunk * CHUNK);
            (0..take)
                .filter_map(|_| {
                    let weights = generate_random_weights(n, &mut rng);
                    let m = metrics::assess(&weights, stats).feasible()?;
                    let sharpe_ratio = m.sharpe_ratio(risk_free_rate)?;
                    Some(FrontierPoint {
                        weights,
                        expected_return: m.expected_return,
                        risk: m.risk,
                        sharpe_ratio,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Best Sharpe ratio among sampled points.
pub fn best_sampled(points: &[FrontierPoint]) -> Option<&FrontierPoint> {
    points
        .iter()
        .max_by(|a, b| a.sharpe_ratio.total_cmp(&b.sharpe_ratio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{optimize_portfolio, SqpOptions};

    fn stats() -> Statistics {
        Statistics {
            mean_returns: vec![0.0008, 0.0005, 0.0003],
            covariance: vec![
                vec![0.00040, 0.00006, 0.00002],
                vec![0.00006, 0.00020, 0.00001],
                vec![0.00002, 0.00001, 0.00010],
            ],
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let w = generate_random_weights(5, &mut rng);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-10, "Weights should sum to 1.0, got {}", sum);
            assert!(w.iter().all(|&v| v >= 0.0), "Weights should be non-negative");
        }
    }

    #[test]
    fn test_sample_is_reproducible_and_sized() {
        let a = sample_frontier(&stats(), 600, 0.02, 11);
        let b = sample_frontier(&stats(), 600, 0.02, 11);
        assert_eq!(a.len(), 600);
        assert_eq!(a, b);
        assert!(sample_frontier(&stats(), 0, 0.02, 11).is_empty());
    }

    #[test]
    fn test_random_portfolios_do_not_beat_optimizer() {
        let s = stats();
        let opt = optimize_portfolio(&s, 0.02, &SqpOptions::default()).unwrap();
        let points = sample_frontier(&s, 2000, 0.02, 5);
        let best = best_sampled(&points).unwrap();
        assert!(best.sharpe_ratio <= opt.sharpe_ratio + 1e-6);
    }
}
