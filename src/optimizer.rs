//! Sharpe-ratio maximization on the bounded simplex.
//!
//! The search is a sequential quadratic programming loop: every iteration
//! builds a quadratic model of the objective from its gradient and a
//! quasi-Newton (damped BFGS) Hessian, minimizes that model over
//! `lower <= w <= upper, sum(w) = total`, then backtracks along the step
//! until the true objective decreases enough. Iterates never leave the
//! feasible set, so the objective doubles as the merit function.

use crate::config::{OPTIMIZER_FTOL, OPTIMIZER_MAX_ITERATIONS, OPTIMIZER_STEP_TOLERANCE, TRADING_DAYS};
use crate::error::{PortfolioError, Result};
use crate::metrics::{self, Assessment, PortfolioMetrics};
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;
const STATIONARITY_TOLERANCE: f64 = 1e-6;
const QP_MAX_ITERATIONS: usize = 5_000;
const QP_TOLERANCE: f64 = 1e-15;

/// A scalar function to minimize. `value` returns `+inf` for candidates that
/// must be rejected; it never returns NaN.
pub trait Objective {
    fn value(&self, x: &[f64]) -> f64;

    /// Gradient at `x`, or `None` where the objective is not differentiable.
    fn gradient(&self, x: &[f64]) -> Option<Vec<f64>> {
        central_difference_gradient(|p| self.value(p), x)
    }
}

pub fn central_difference_gradient(f: impl Fn(&[f64]) -> f64, x: &[f64]) -> Option<Vec<f64>> {
    let mut shifted = x.to_vec();
    let mut grad = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let h = 1e-6 * x[i].abs().max(1.0);
        shifted[i] = x[i] + h;
        let up = f(&shifted);
        shifted[i] = x[i] - h;
        let down = f(&shifted);
        shifted[i] = x[i];
        let d = (up - down) / (2.0 * h);
        if !d.is_finite() {
            return None;
        }
        grad.push(d);
    }
    Some(grad)
}

/// Negative annualized Sharpe ratio of a weight vector.
pub struct NegativeSharpe<'a> {
    stats: &'a Statistics,
    risk_free_rate: f64,
}

impl<'a> NegativeSharpe<'a> {
    pub fn new(stats: &'a Statistics, risk_free_rate: f64) -> Self {
        Self {
            stats,
            risk_free_rate,
        }
    }
}

impl Objective for NegativeSharpe<'_> {
    fn value(&self, x: &[f64]) -> f64 {
        match metrics::assess(x, self.stats) {
            Assessment::Feasible(m) => m
                .sharpe_ratio(self.risk_free_rate)
                .map(|s| -s)
                .unwrap_or(f64::INFINITY),
            Assessment::Infeasible(_) => f64::INFINITY,
        }
    }

    fn gradient(&self, x: &[f64]) -> Option<Vec<f64>> {
        let m = metrics::assess(x, self.stats).feasible()?;
        if m.risk <= 0.0 {
            return None;
        }
        let sigma = m.risk;
        let excess = m.expected_return - self.risk_free_rate;
        let cov = &self.stats.covariance;

        // d(sigma)/dw = 252 * cov * w / sigma
        let grad: Vec<f64> = (0..x.len())
            .map(|i| {
                let cov_w: f64 = cov[i].iter().zip(x).map(|(c, w)| c * w).sum();
                let d_return = TRADING_DAYS * self.stats.mean_returns[i];
                let d_sigma = TRADING_DAYS * cov_w / sigma;
                -d_return / sigma + excess * d_sigma / (sigma * sigma)
            })
            .collect();

        grad.iter().all(|g| g.is_finite()).then_some(grad)
    }
}

/// Box bounds plus one equality on the sum of the variables.
#[derive(Clone, Debug, PartialEq)]
pub struct SimplexConstraints {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub total: f64,
}

impl SimplexConstraints {
    /// Long-only, fully invested: every weight in [0, 1], weights sum to 1.
    pub fn long_only(n: usize) -> Self {
        Self {
            lower: vec![0.0; n],
            upper: vec![1.0; n],
            total: 1.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn check(&self) -> Result<()> {
        if self.lower.len() != self.upper.len() {
            return Err(PortfolioError::optimization("bound vectors differ in length"));
        }
        if self.lower.is_empty() {
            return Err(PortfolioError::optimization("nothing to optimize"));
        }
        if self
            .lower
            .iter()
            .zip(&self.upper)
            .any(|(l, u)| !l.is_finite() || !u.is_finite() || l > u)
        {
            return Err(PortfolioError::optimization("bounds are empty or not finite"));
        }
        let lo: f64 = self.lower.iter().sum();
        let hi: f64 = self.upper.iter().sum();
        if !self.total.is_finite() || self.total < lo - 1e-12 || self.total > hi + 1e-12 {
            return Err(PortfolioError::optimization(format!(
                "constraints are infeasible: bounds allow sums in [{}, {}], required {}",
                lo, hi, self.total
            )));
        }
        Ok(())
    }

    pub fn is_satisfied(&self, x: &[f64], tol: f64) -> bool {
        x.len() == self.dim()
            && x
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(v, (l, u))| *v >= l - tol && *v <= u + tol)
            && (x.iter().sum::<f64>() - self.total).abs() <= tol
    }

    /// Euclidean projection onto the feasible set.
    ///
    /// The projection has the form `clamp(v_i - theta, lower_i, upper_i)`;
    /// `theta` is found by bisection since the clamped sum is monotone in it.
    pub fn project(&self, v: &[f64]) -> Vec<f64> {
        let clamped_sum = |theta: f64| -> f64 {
            v.iter()
                .zip(self.lower.iter().zip(&self.upper))
                .map(|(x, (l, u))| (x - theta).clamp(*l, *u))
                .sum()
        };

        let mut lo = v
            .iter()
            .zip(&self.upper)
            .map(|(x, u)| x - u)
            .fold(f64::INFINITY, f64::min);
        let mut hi = v
            .iter()
            .zip(&self.lower)
            .map(|(x, l)| x - l)
            .fold(f64::NEG_INFINITY, f64::max);

        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            if clamped_sum(mid) > self.total {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let theta = 0.5 * (lo + hi);
        let mut x: Vec<f64> = v
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(x, (l, u))| (x - theta).clamp(*l, *u))
            .collect();

        // Push the last rounding residual onto a coordinate with room for it.
        let residual = self.total - x.iter().sum::<f64>();
        if residual != 0.0 {
            if let Some(i) = (0..x.len()).find(|&i| {
                let shifted = x[i] + residual;
                shifted >= self.lower[i] && shifted <= self.upper[i]
            }) {
                x[i] += residual;
            }
        }
        x
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqpOptions {
    pub max_iterations: usize,
    /// Objective change below which the search counts as converged.
    pub ftol: f64,
    /// Step length (infinity norm) below which the search counts as converged.
    pub step_tolerance: f64,
}

impl Default for SqpOptions {
    fn default() -> Self {
        Self {
            max_iterations: OPTIMIZER_MAX_ITERATIONS,
            ftol: OPTIMIZER_FTOL,
            step_tolerance: OPTIMIZER_STEP_TOLERANCE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqpOutcome {
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub function_evaluations: usize,
}

/// Minimizes `objective` from `x0` subject to `constraints`.
pub fn minimize<O: Objective>(
    objective: &O,
    x0: &[f64],
    constraints: &SimplexConstraints,
    options: &SqpOptions,
) -> Result<SqpOutcome> {
    constraints.check()?;
    if x0.len() != constraints.dim() {
        return Err(PortfolioError::optimization(format!(
            "starting point has {} entries, expected {}",
            x0.len(),
            constraints.dim()
        )));
    }

    let n = x0.len();
    let mut x = constraints.project(x0);
    let mut fx = objective.value(&x);
    let mut evaluations = 1;
    if !fx.is_finite() {
        return Err(PortfolioError::optimization(
            "objective is not finite at the starting point",
        ));
    }
    let mut g = objective
        .gradient(&x)
        .ok_or_else(|| PortfolioError::optimization("gradient undefined at the starting point"))?;

    let mut hessian = identity(n);
    let mut fresh_hessian = true;

    for iteration in 1..=options.max_iterations {
        let target = solve_qp_subproblem(&hessian, &g, &x, constraints);
        let step: Vec<f64> = target.iter().zip(&x).map(|(t, xi)| t - xi).collect();

        if norm_inf(&step) < options.step_tolerance {
            return Ok(SqpOutcome {
                x,
                objective: fx,
                iterations: iteration,
                function_evaluations: evaluations,
            });
        }

        let slope = dot(&g, &step);
        let accepted = if slope < 0.0 {
            line_search(objective, &x, fx, &step, slope, &mut evaluations)
        } else {
            None
        };

        let Some((x_new, f_new)) = accepted else {
            if stationarity_residual(&x, &g, constraints) < STATIONARITY_TOLERANCE {
                return Ok(SqpOutcome {
                    x,
                    objective: fx,
                    iterations: iteration,
                    function_evaluations: evaluations,
                });
            }
            if fresh_hessian {
                return Err(PortfolioError::optimization(format!(
                    "line search failed to decrease the objective at iteration {}",
                    iteration
                )));
            }
            // The curvature model went stale; retry from a steepest-descent model.
            hessian = identity(n);
            fresh_hessian = true;
            continue;
        };

        let g_new = objective.gradient(&x_new).ok_or_else(|| {
            PortfolioError::optimization(format!("gradient undefined at iteration {}", iteration))
        })?;

        let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
        damped_bfgs_update(&mut hessian, &s, &y);
        fresh_hessian = false;

        let decrease = fx - f_new;
        x = x_new;
        fx = f_new;
        g = g_new;

        if decrease < options.ftol
            && stationarity_residual(&x, &g, constraints) < STATIONARITY_TOLERANCE
        {
            return Ok(SqpOutcome {
                x,
                objective: fx,
                iterations: iteration,
                function_evaluations: evaluations,
            });
        }
    }

    Err(PortfolioError::optimization(format!(
        "did not converge within {} iterations",
        options.max_iterations
    )))
}

fn line_search<O: Objective>(
    objective: &O,
    x: &[f64],
    fx: f64,
    step: &[f64],
    slope: f64,
    evaluations: &mut usize,
) -> Option<(Vec<f64>, f64)> {
    let mut alpha = 1.0;
    for _ in 0..MAX_BACKTRACKS {
        let candidate: Vec<f64> = x.iter().zip(step).map(|(xi, d)| xi + alpha * d).collect();
        let f = objective.value(&candidate);
        *evaluations += 1;
        if f.is_finite() && f <= fx + ARMIJO_C1 * alpha * slope {
            return Some((candidate, f));
        }
        alpha *= 0.5;
    }
    None
}

/// Minimizes `g'(z - x) + 0.5 (z - x)' B (z - x)` over the feasible set with
/// accelerated projected gradient (FISTA).
fn solve_qp_subproblem(b: &[Vec<f64>], g: &[f64], x: &[f64], constraints: &SimplexConstraints) -> Vec<f64> {
    // Gershgorin bound on the largest eigenvalue of B.
    let lipschitz = b
        .iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
        .max(1e-12);
    let step = 1.0 / lipschitz;

    let model_grad = |z: &[f64]| -> Vec<f64> {
        let d: Vec<f64> = z.iter().zip(x).map(|(zi, xi)| zi - xi).collect();
        g.iter()
            .zip(b)
            .map(|(gi, row)| gi + dot(row, &d))
            .collect()
    };

    let mut z = x.to_vec();
    let mut y = z.clone();
    let mut t = 1.0_f64;

    for _ in 0..QP_MAX_ITERATIONS {
        let grad = model_grad(&y);
        let trial: Vec<f64> = y.iter().zip(&grad).map(|(yi, gi)| yi - step * gi).collect();
        let z_next = constraints.project(&trial);

        let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
        let momentum = (t - 1.0) / t_next;
        y = z_next
            .iter()
            .zip(&z)
            .map(|(a, b)| a + momentum * (a - b))
            .collect();

        let moved = z_next
            .iter()
            .zip(&z)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        z = z_next;
        t = t_next;

        if moved < QP_TOLERANCE {
            break;
        }
    }
    z
}

/// Distance between `x` and its projected-gradient image; zero exactly at a
/// first-order stationary point of the constrained problem.
fn stationarity_residual(x: &[f64], g: &[f64], constraints: &SimplexConstraints) -> f64 {
    let trial: Vec<f64> = x.iter().zip(g).map(|(xi, gi)| xi - gi).collect();
    let projected = constraints.project(&trial);
    projected
        .iter()
        .zip(x)
        .map(|(p, xi)| (p - xi).abs())
        .fold(0.0, f64::max)
}

/// Powell-damped BFGS update; keeps `b` symmetric positive definite.
fn damped_bfgs_update(b: &mut [Vec<f64>], s: &[f64], y: &[f64]) {
    let bs: Vec<f64> = b.iter().map(|row| dot(row, s)).collect();
    let s_bs = dot(s, &bs);
    if s_bs <= 1e-18 {
        return;
    }
    let s_y = dot(s, y);
    let theta = if s_y >= 0.2 * s_bs {
        1.0
    } else {
        0.8 * s_bs / (s_bs - s_y)
    };
    let r: Vec<f64> = y
        .iter()
        .zip(&bs)
        .map(|(yi, bsi)| theta * yi + (1.0 - theta) * bsi)
        .collect();
    let s_r = dot(s, &r);
    if s_r <= 1e-18 {
        return;
    }

    let n = s.len();
    for i in 0..n {
        for j in 0..n {
            b[i][j] += r[i] * r[j] / s_r - bs[i] * bs[j] / s_bs;
        }
    }
}

fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm_inf(v: &[f64]) -> f64 {
    v.iter().map(|x| x.abs()).fold(0.0, f64::max)
}

/// Sharpe-maximizing allocation with its metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimalPortfolio {
    pub weights: Vec<f64>,
    pub metrics: PortfolioMetrics,
    pub sharpe_ratio: f64,
    pub iterations: usize,
    pub function_evaluations: usize,
}

/// Finds the long-only, fully invested allocation maximizing
/// `(expected_return - risk_free_rate) / risk`, starting from equal weights.
pub fn optimize_portfolio(
    stats: &Statistics,
    risk_free_rate: f64,
    options: &SqpOptions,
) -> Result<OptimalPortfolio> {
    let n = stats.num_assets();
    if n == 0 {
        return Err(PortfolioError::optimization("no assets to optimize"));
    }
    if !risk_free_rate.is_finite() {
        return Err(PortfolioError::optimization("risk-free rate is not finite"));
    }

    let objective = NegativeSharpe::new(stats, risk_free_rate);
    let constraints = SimplexConstraints::long_only(n);
    let start = vec![1.0 / n as f64; n];

    let outcome = minimize(&objective, &start, &constraints, options)?;

    let weights = constraints.project(&outcome.x);
    let metrics = metrics::calculate_portfolio_metrics(&weights, stats)
        .map_err(|e| PortfolioError::optimization(format!("optimum has no valid metrics: {}", e)))?;
    let sharpe_ratio = metrics
        .sharpe_ratio(risk_free_rate)
        .ok_or_else(|| PortfolioError::optimization("optimum has zero risk"))?;

    Ok(OptimalPortfolio {
        weights,
        metrics,
        sharpe_ratio,
        iterations: outcome.iterations,
        function_evaluations: outcome.function_evaluations,
    })
}
