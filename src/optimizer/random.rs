//! Uniform random search

use super::{
    sample_parameters, OptimizationResult, Optimizer, OptimizerCore, OptimizerError,
    StrategyFactory,
};
use crate::backtest::ParameterSet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

/// Evaluates `max_iterations` uniform samples of the search space
///
/// Candidates are drawn up front from the seeded generator, so a fixed seed
/// reproduces the same candidate list regardless of thread count.
pub struct RandomSearchOptimizer {
    core: OptimizerCore,
    seed: Option<u64>,
}

impl RandomSearchOptimizer {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            core: OptimizerCore::default(),
            seed,
        }
    }
}

impl Default for RandomSearchOptimizer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Optimizer for RandomSearchOptimizer {
    fn name(&self) -> &'static str {
        "random"
    }

    fn core(&self) -> &OptimizerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OptimizerCore {
        &mut self.core
    }

    fn optimize(&mut self, factory: &StrategyFactory) -> Result<&[OptimizationResult], OptimizerError> {
        let name = self.name();
        let evaluator = self.core.prepare(name, factory)?;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let candidates: Vec<ParameterSet> = (0..self.core.max_iterations)
            .map(|_| sample_parameters(&self.core.ranges, &mut rng))
            .collect();
        evaluator.set_total(candidates.len());
        info!(samples = candidates.len(), seed = ?self.seed, "Starting random search");
        let results = evaluator.evaluate_batch(candidates);
        Ok(self.core.finish(&evaluator, results))
    }
}
