//! Bayesian optimization over a Gaussian-process surrogate
//!
//! A random seed batch is evaluated in parallel; after that each proposal is
//! the best of `candidate_samples` random points under the acquisition
//! function, evaluated one at a time. Inputs are normalized to the unit cube
//! and observed fitness is standardized before fitting.

use super::{
    OptimizationResult, Optimizer, OptimizerCore, OptimizerError, ParameterRanges,
    StrategyFactory, WORST_FITNESS,
};
use crate::backtest::ParameterSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Acquisition function scoring candidate points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcquisitionFunction {
    ExpectedImprovement { xi: f64 },
    UpperConfidenceBound { kappa: f64 },
    ProbabilityOfImprovement { xi: f64 },
}

impl Default for AcquisitionFunction {
    fn default() -> Self {
        AcquisitionFunction::ExpectedImprovement { xi: 0.01 }
    }
}

impl AcquisitionFunction {
    /// Score a prediction against the best standardized observation
    pub fn score(&self, mean: f64, std: f64, best: f64) -> f64 {
        match *self {
            AcquisitionFunction::UpperConfidenceBound { kappa } => mean + kappa * std,
            AcquisitionFunction::ExpectedImprovement { xi } => {
                let improvement = mean - best - xi;
                if std <= 1e-12 {
                    return improvement.max(0.0);
                }
                let z = improvement / std;
                improvement * normal_cdf(z) + std * normal_pdf(z)
            }
            AcquisitionFunction::ProbabilityOfImprovement { xi } => {
                if std <= 1e-12 {
                    return if mean > best + xi { 1.0 } else { 0.0 };
                }
                normal_cdf((mean - best - xi) / std)
            }
        }
    }
}

/// Bayesian search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesianConfig {
    /// Random points evaluated before the surrogate is used
    pub initial_samples: usize,
    pub acquisition: AcquisitionFunction,
    /// Random points scored per proposal
    pub candidate_samples: usize,
    /// RBF length scale in normalized units
    pub length_scale: f64,
    /// Observation noise added to the kernel diagonal
    pub noise: f64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            initial_samples: 5,
            acquisition: AcquisitionFunction::default(),
            candidate_samples: 1000,
            length_scale: 0.2,
            noise: 1e-6,
        }
    }
}

/// Standard normal CDF approximation (Abramowitz and Stegun)
pub(crate) fn normal_cdf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs() / std::f64::consts::SQRT_2;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    0.5 * (1.0 + sign * y)
}

pub(crate) fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Lower-triangular Cholesky factor; `None` if not positive definite
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let diag = matrix[i][i] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[i][j] = diag.sqrt();
            } else {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}

/// Solve `L x = b`
fn forward_substitute(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let mut x = vec![0.0; b.len()];
    for i in 0..b.len() {
        let sum: f64 = (0..i).map(|k| l[i][k] * x[k]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

/// Solve `L^T x = b`
fn backward_substitute(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

/// Zero-mean GP with unit-variance RBF kernel
struct GaussianProcess {
    points: Vec<Vec<f64>>,
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    length_scale: f64,
}

impl GaussianProcess {
    fn kernel(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
        let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
        (-0.5 * sq / (length_scale * length_scale)).exp()
    }

    /// Fit, raising the diagonal jitter until the factorization succeeds
    fn fit(points: Vec<Vec<f64>>, targets: &[f64], length_scale: f64, noise: f64) -> Option<Self> {
        let n = points.len();
        let mut jitter = noise.max(1e-10);
        for _ in 0..6 {
            let matrix: Vec<Vec<f64>> = (0..n)
                .map(|i| {
                    (0..n)
                        .map(|j| {
                            let k = Self::kernel(&points[i], &points[j], length_scale);
                            if i == j {
                                k + jitter
                            } else {
                                k
                            }
                        })
                        .collect()
                })
                .collect();
            if let Some(chol) = cholesky(&matrix) {
                let alpha = backward_substitute(&chol, &forward_substitute(&chol, targets));
                return Some(Self {
                    points,
                    chol,
                    alpha,
                    length_scale,
                });
            }
            jitter *= 10.0;
        }
        None
    }

    /// Posterior mean and standard deviation
    fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k_star: Vec<f64> = self
            .points
            .iter()
            .map(|p| Self::kernel(p, x, self.length_scale))
            .collect();
        let mean = k_star.iter().zip(&self.alpha).map(|(k, a)| k * a).sum();
        let v = forward_substitute(&self.chol, &k_star);
        let variance = (1.0 - v.iter().map(|x| x * x).sum::<f64>()).max(1e-12);
        (mean, variance.sqrt())
    }
}

/// Proposes points by maximizing an acquisition function
pub struct BayesianOptimizer {
    core: OptimizerCore,
    config: BayesianConfig,
    seed: Option<u64>,
}

impl BayesianOptimizer {
    pub fn new(config: BayesianConfig, seed: Option<u64>) -> Self {
        Self {
            core: OptimizerCore::default(),
            config,
            seed,
        }
    }

    pub fn config(&self) -> &BayesianConfig {
        &self.config
    }

    fn to_unit(ranges: &ParameterRanges, parameters: &ParameterSet) -> Vec<f64> {
        ranges
            .iter()
            .map(|(name, range)| range.normalize(parameters.get(name).copied().unwrap_or(range.min)))
            .collect()
    }

    fn from_unit(ranges: &ParameterRanges, unit: &[f64]) -> ParameterSet {
        ranges
            .iter()
            .zip(unit)
            .map(|((name, range), u)| (name.clone(), range.denormalize(*u)))
            .collect()
    }

    /// Next candidate, or a random point when the surrogate cannot be fitted
    fn propose<R: Rng>(&self, observed: &[OptimizationResult], ranges: &ParameterRanges, rng: &mut R) -> ParameterSet {
        let dims = ranges.len();
        let random_unit = |rng: &mut R| (0..dims).map(|_| rng.gen::<f64>()).collect::<Vec<f64>>();

        // Failed runs are pulled up to the worst successful fitness
        let floor = observed
            .iter()
            .map(|r| r.fitness)
            .filter(|f| *f > WORST_FITNESS)
            .fold(f64::INFINITY, f64::min);
        let floor = if floor.is_finite() { floor } else { 0.0 };
        let raw: Vec<f64> = observed
            .iter()
            .map(|r| if r.fitness > WORST_FITNESS { r.fitness } else { floor })
            .collect();
        let n = raw.len() as f64;
        let mean = raw.iter().sum::<f64>() / n;
        let std = (raw.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / n).sqrt();
        let scale = if std > 1e-12 { std } else { 1.0 };
        let targets: Vec<f64> = raw.iter().map(|y| (y - mean) / scale).collect();
        let best = targets.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let points: Vec<Vec<f64>> = observed
            .iter()
            .map(|r| Self::to_unit(ranges, &r.parameters))
            .collect();
        let Some(gp) = GaussianProcess::fit(points, &targets, self.config.length_scale, self.config.noise) else {
            warn!("Surrogate fit failed, proposing a random point");
            return Self::from_unit(ranges, &random_unit(rng));
        };

        let mut best_candidate = random_unit(rng);
        let mut best_score = f64::NEG_INFINITY;
        for _ in 0..self.config.candidate_samples.max(1) {
            let candidate = random_unit(rng);
            let (mu, sigma) = gp.predict(&candidate);
            let score = self.config.acquisition.score(mu, sigma, best);
            if score > best_score {
                best_score = score;
                best_candidate = candidate;
            }
        }
        debug!(acquisition = best_score, "Surrogate proposal");
        Self::from_unit(ranges, &best_candidate)
    }
}

impl Default for BayesianOptimizer {
    fn default() -> Self {
        Self::new(BayesianConfig::default(), None)
    }
}

impl Optimizer for BayesianOptimizer {
    fn name(&self) -> &'static str {
        "bayesian"
    }

    fn core(&self) -> &OptimizerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OptimizerCore {
        &mut self.core
    }

    fn optimize(&mut self, factory: &StrategyFactory) -> Result<&[OptimizationResult], OptimizerError> {
        if !(self.config.length_scale > 0.0) {
            return Err(OptimizerError::InvalidSetting("length_scale must be positive".to_string()));
        }
        let name = self.name();
        let evaluator = self.core.prepare(name, factory)?;
        let ranges = self.core.ranges.clone();
        let budget = self.core.max_iterations;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let initial = self.config.initial_samples.clamp(1, budget);
        info!(
            initial_samples = initial,
            budget,
            acquisition = ?self.config.acquisition,
            "Starting Bayesian search"
        );
        let seeds: Vec<ParameterSet> = (0..initial)
            .map(|_| super::sample_parameters(&ranges, &mut rng))
            .collect();
        let mut results = evaluator.evaluate_batch(seeds);

        while results.len() < budget && !results.is_empty() {
            let candidate = self.propose(&results, &ranges, &mut rng);
            match evaluator.evaluate(candidate) {
                Some(result) => results.push(result),
                None => break,
            }
        }

        Ok(self.core.finish(&evaluator, results))
    }
}
