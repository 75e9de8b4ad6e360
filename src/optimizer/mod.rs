//! Parameter optimization
//!
//! Four search algorithms that re-run the backtest engine over candidate
//! parameter vectors and rank the outcomes by a fitness target. Evaluations
//! are independent: each builds its own engine and strategy, so batches run
//! in parallel on a rayon pool.

mod bayesian;
mod evaluator;
mod genetic;
mod grid;
mod random;

pub use bayesian::{AcquisitionFunction, BayesianConfig, BayesianOptimizer};
pub use evaluator::{Evaluator, OptimizerCore};
pub use genetic::{GeneticAlgorithmOptimizer, GeneticConfig};
pub use grid::{GridIter, GridSearchOptimizer, DEFAULT_GRID_STEPS};
pub use random::RandomSearchOptimizer;

use crate::backtest::{BacktestConfig, BacktestResult, ConfigError, ParameterSet};
use crate::data::{DataSource, DataSourceError};
use crate::strategy::StrategyConstructor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Fitness assigned to failed or incomplete evaluations
pub const WORST_FITNESS: f64 = f64::MIN;

/// Evaluations per search unless configured otherwise
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Builds a strategy for a candidate parameter vector
pub type StrategyFactory = StrategyConstructor;

/// Progress callback, invoked from worker threads
pub type OptimizerProgressCallback = Arc<dyn Fn(&OptimizerProgress) + Send + Sync>;

/// Optimizer errors
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("optimizer not initialized with a backtest config")]
    NotInitialized,
    #[error("no parameter ranges set")]
    NoParameterRanges,
    #[error("invalid range for {name}: [{min}, {max}]")]
    InvalidRange { name: String, min: f64, max: f64 },
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    #[error("no data source set")]
    MissingDataSource,
    #[error("unknown optimization algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("unknown optimization target: {0}")]
    UnknownTarget(String),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataSourceError),
}

/// Inclusive search interval for one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
}

impl ParameterRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Uniform draw from the interval
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.span() <= 0.0 {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }

    /// Map into [0, 1]
    pub fn normalize(&self, value: f64) -> f64 {
        if self.span() <= 0.0 {
            0.0
        } else {
            (value - self.min) / self.span()
        }
    }

    pub fn denormalize(&self, unit: f64) -> f64 {
        self.clamp(self.min + unit * self.span())
    }
}

impl FromStr for ParameterRange {
    type Err = OptimizerError;

    /// `min:max` or `min..max`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OptimizerError::InvalidSetting(format!("range must look like min:max, got {}", s));
        let (min, max) = s
            .split_once(':')
            .or_else(|| s.split_once(".."))
            .ok_or_else(invalid)?;
        let min: f64 = min.trim().parse().map_err(|_| invalid())?;
        let max: f64 = max.trim().parse().map_err(|_| invalid())?;
        Ok(Self::new(min, max))
    }
}

/// Named search space
pub type ParameterRanges = BTreeMap<String, ParameterRange>;

/// Draw one uniform candidate from every range
pub fn sample_parameters<R: Rng + ?Sized>(ranges: &ParameterRanges, rng: &mut R) -> ParameterSet {
    ranges
        .iter()
        .map(|(name, range)| (name.clone(), range.sample(rng)))
        .collect()
}

/// Metric the search maximizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationTarget {
    #[default]
    Sharpe,
    Return,
    WinRate,
}

impl OptimizationTarget {
    /// Fitness of a completed run; non-finite metrics count as worst
    pub fn fitness(&self, result: &BacktestResult) -> f64 {
        let value = match self {
            OptimizationTarget::Sharpe => result.sharpe_ratio,
            OptimizationTarget::Return => result.total_return,
            OptimizationTarget::WinRate => result.win_rate,
        };
        if value.is_finite() {
            value
        } else {
            WORST_FITNESS
        }
    }
}

impl fmt::Display for OptimizationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimizationTarget::Sharpe => "sharpe",
            OptimizationTarget::Return => "return",
            OptimizationTarget::WinRate => "win_rate",
        };
        f.write_str(s)
    }
}

impl FromStr for OptimizationTarget {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(OptimizationTarget::Sharpe),
            "return" | "total_return" => Ok(OptimizationTarget::Return),
            "win_rate" | "winrate" => Ok(OptimizationTarget::WinRate),
            other => Err(OptimizerError::UnknownTarget(other.to_string())),
        }
    }
}

/// One evaluated candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub parameters: ParameterSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BacktestResult>,
    pub fitness: f64,
    /// 1 = best; assigned after all evaluations
    pub rank: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OptimizationResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.fitness > WORST_FITNESS
    }
}

/// Sort by fitness descending and assign ranks
///
/// The sort is stable, so equal fitness keeps evaluation order.
pub fn rank_results(results: &mut [OptimizationResult]) {
    results.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
}

/// Search progress snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerProgress {
    pub algorithm: String,
    pub evaluations_completed: usize,
    pub total_evaluations: usize,
    /// Completed fraction in [0, 1]
    pub progress: f64,
    pub best_fitness: f64,
    /// Current generation, for the genetic search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<usize>,
}

/// Common interface of the search algorithms
///
/// Shared settings live in an [`OptimizerCore`]; implementors only supply
/// the candidate generation in [`Optimizer::optimize`].
pub trait Optimizer: Send {
    /// Algorithm name
    fn name(&self) -> &'static str;

    fn core(&self) -> &OptimizerCore;
    fn core_mut(&mut self) -> &mut OptimizerCore;

    /// Run the search; previous results are discarded
    fn optimize(&mut self, factory: &StrategyFactory) -> Result<&[OptimizationResult], OptimizerError>;

    /// Base configuration every candidate is merged into
    fn initialize(&mut self, config: BacktestConfig) -> Result<(), OptimizerError> {
        self.core_mut().initialize(config)
    }

    fn set_parameter_ranges(&mut self, ranges: ParameterRanges) -> Result<(), OptimizerError> {
        self.core_mut().set_parameter_ranges(ranges)
    }

    fn set_optimization_target(&mut self, target: OptimizationTarget) {
        self.core_mut().target = target;
    }

    fn set_max_iterations(&mut self, max_iterations: usize) {
        self.core_mut().max_iterations = max_iterations;
    }

    fn set_data_source(&mut self, source: Arc<dyn DataSource>) {
        self.core_mut().data_source = Some(source);
    }

    /// Worker threads for parallel batches; `None` uses the rayon default
    fn set_threads(&mut self, threads: Option<usize>) {
        self.core_mut().threads = threads;
    }

    fn set_progress_sender(&mut self, sender: UnboundedSender<OptimizerProgress>) {
        self.core_mut().progress_tx = Some(sender);
    }

    fn set_progress_callback(&mut self, callback: OptimizerProgressCallback) {
        self.core_mut().progress_callback = Some(callback);
    }

    /// Shared flag; storing `true` skips all remaining evaluations
    fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.core().cancel.clone()
    }

    /// Ranked results of the last search
    fn results(&self) -> &[OptimizationResult] {
        &self.core().results
    }

    /// Parameters of the rank-1 result
    fn best_parameters(&self) -> Option<ParameterSet> {
        self.core().results.first().map(|r| r.parameters.clone())
    }

    fn top_results(&self, k: usize) -> Vec<OptimizationResult> {
        self.core().results.iter().take(k).cloned().collect()
    }
}

/// Search algorithm selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Grid,
    Genetic,
    Random,
    Bayesian,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimizerKind::Grid => "grid",
            OptimizerKind::Genetic => "genetic",
            OptimizerKind::Random => "random",
            OptimizerKind::Bayesian => "bayesian",
        };
        f.write_str(s)
    }
}

impl FromStr for OptimizerKind {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(OptimizerKind::Grid),
            "genetic" | "ga" => Ok(OptimizerKind::Genetic),
            "random" => Ok(OptimizerKind::Random),
            "bayesian" | "bayes" => Ok(OptimizerKind::Bayesian),
            other => Err(OptimizerError::UnknownAlgorithm(other.to_string())),
        }
    }
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}
fn default_grid_steps() -> usize {
    DEFAULT_GRID_STEPS
}

/// Settings for building any optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    #[serde(default)]
    pub algorithm: OptimizerKind,
    #[serde(default)]
    pub target: OptimizationTarget,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Seed for the stochastic searches; unset draws from entropy
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_grid_steps")]
    pub grid_steps: usize,
    #[serde(default)]
    pub genetic: GeneticConfig,
    #[serde(default)]
    pub bayesian: BayesianConfig,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            algorithm: OptimizerKind::default(),
            target: OptimizationTarget::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: None,
            threads: None,
            grid_steps: DEFAULT_GRID_STEPS,
            genetic: GeneticConfig::default(),
            bayesian: BayesianConfig::default(),
        }
    }
}

/// Construct the configured optimizer with target, budget and threads applied
pub fn build_optimizer(settings: &OptimizerSettings) -> Box<dyn Optimizer> {
    let mut optimizer: Box<dyn Optimizer> = match settings.algorithm {
        OptimizerKind::Grid => Box::new(GridSearchOptimizer::new(settings.grid_steps)),
        OptimizerKind::Genetic => {
            Box::new(GeneticAlgorithmOptimizer::new(settings.genetic.clone(), settings.seed))
        }
        OptimizerKind::Random => Box::new(RandomSearchOptimizer::new(settings.seed)),
        OptimizerKind::Bayesian => {
            Box::new(BayesianOptimizer::new(settings.bayesian.clone(), settings.seed))
        }
    };
    optimizer.set_optimization_target(settings.target);
    optimizer.set_max_iterations(settings.max_iterations);
    optimizer.set_threads(settings.threads);
    optimizer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(fitness: f64) -> OptimizationResult {
        OptimizationResult {
            parameters: ParameterSet::from([("x".to_string(), fitness)]),
            result: None,
            fitness,
            rank: 0,
            error: None,
        }
    }

    #[test]
    fn test_rank_results_descending_and_stable() {
        let mut results = vec![result(1.0), result(WORST_FITNESS), result(3.0), result(1.0)];
        results[3].parameters.insert("tag".to_string(), 2.0);
        rank_results(&mut results);
        let fitness: Vec<f64> = results.iter().map(|r| r.fitness).collect();
        assert_eq!(fitness, vec![3.0, 1.0, 1.0, WORST_FITNESS]);
        assert!(!results[1].parameters.contains_key("tag"));
        assert!(results[2].parameters.contains_key("tag"));
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_parameter_range_parse_and_normalize() {
        let range: ParameterRange = "5:50".parse().unwrap();
        assert_eq!(range, ParameterRange::new(5.0, 50.0));
        assert_eq!("1..2".parse::<ParameterRange>().unwrap().max, 2.0);
        assert!("abc".parse::<ParameterRange>().is_err());
        assert_eq!(range.normalize(27.5), 0.5);
        assert_eq!(range.denormalize(2.0), 50.0);
        assert!(!ParameterRange::new(3.0, 1.0).is_valid());
    }

    #[test]
    fn test_target_fitness() {
        let r = BacktestResult {
            sharpe_ratio: 1.5,
            total_return: 0.2,
            win_rate: f64::NAN,
            ..Default::default()
        };
        assert_eq!(OptimizationTarget::Sharpe.fitness(&r), 1.5);
        assert_eq!(OptimizationTarget::Return.fitness(&r), 0.2);
        assert_eq!(OptimizationTarget::WinRate.fitness(&r), WORST_FITNESS);
        assert_eq!("win_rate".parse::<OptimizationTarget>().unwrap(), OptimizationTarget::WinRate);
    }

    #[test]
    fn test_build_optimizer_by_kind() {
        for (kind, name) in [
            (OptimizerKind::Grid, "grid"),
            (OptimizerKind::Genetic, "genetic"),
            (OptimizerKind::Random, "random"),
            (OptimizerKind::Bayesian, "bayesian"),
        ] {
            let settings = OptimizerSettings {
                algorithm: kind,
                max_iterations: 7,
                ..Default::default()
            };
            let optimizer = build_optimizer(&settings);
            assert_eq!(optimizer.name(), name);
            assert_eq!(optimizer.core().max_iterations, 7);
        }
        assert!("simplex".parse::<OptimizerKind>().is_err());
    }
}
