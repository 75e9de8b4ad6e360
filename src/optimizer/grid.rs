//! Exhaustive grid search

use super::{
    OptimizationResult, Optimizer, OptimizerCore, OptimizerError, ParameterRange, ParameterRanges,
    StrategyFactory,
};
use crate::backtest::ParameterSet;
use tracing::info;

/// Points per range unless configured otherwise
pub const DEFAULT_GRID_STEPS: usize = 10;

/// Evenly spaced values with both endpoints included
fn axis(range: &ParameterRange, steps: usize) -> Vec<f64> {
    if steps <= 1 || range.span() <= 0.0 {
        return vec![range.min];
    }
    let step = range.span() / (steps - 1) as f64;
    (0..steps)
        .map(|i| if i + 1 == steps { range.max } else { range.min + step * i as f64 })
        .collect()
}

/// Lazy Cartesian product over the range axes
///
/// The last parameter (in name order) varies fastest.
pub struct GridIter {
    names: Vec<String>,
    axes: Vec<Vec<f64>>,
    index: usize,
    total: usize,
}

impl GridIter {
    pub fn new(ranges: &ParameterRanges, steps: usize) -> Self {
        let names: Vec<String> = ranges.keys().cloned().collect();
        let axes: Vec<Vec<f64>> = ranges.values().map(|r| axis(r, steps)).collect();
        let total = if axes.is_empty() {
            0
        } else {
            axes.iter()
                .try_fold(1usize, |acc, a| acc.checked_mul(a.len()))
                .unwrap_or(usize::MAX)
        };
        Self {
            names,
            axes,
            index: 0,
            total,
        }
    }

    /// Size of the full product
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for GridIter {
    type Item = ParameterSet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.total {
            return None;
        }
        let mut rest = self.index;
        let mut values = vec![0.0; self.axes.len()];
        for (slot, axis) in values.iter_mut().zip(&self.axes).rev() {
            *slot = axis[rest % axis.len()];
            rest /= axis.len();
        }
        self.index += 1;
        Some(self.names.iter().cloned().zip(values).collect())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.index;
        (remaining, Some(remaining))
    }
}

/// Evaluates the Cartesian product of evenly spaced values
pub struct GridSearchOptimizer {
    core: OptimizerCore,
    steps: usize,
}

impl GridSearchOptimizer {
    pub fn new(steps: usize) -> Self {
        Self {
            core: OptimizerCore::default(),
            steps: steps.max(1),
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl Default for GridSearchOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_STEPS)
    }
}

impl Optimizer for GridSearchOptimizer {
    fn name(&self) -> &'static str {
        "grid"
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
        let grid = GridIter::new(&self.core.ranges, self.steps);
        let full = grid.total();
        let candidates: Vec<ParameterSet> = grid.take(self.core.max_iterations).collect();
        evaluator.set_total(candidates.len());
        info!(
            combinations = full,
            evaluating = candidates.len(),
            steps = self.steps,
            "Starting grid search"
        );
        let results = evaluator.evaluate_batch(candidates);
        Ok(self.core.finish(&evaluator, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> ParameterRanges {
        ParameterRanges::from([
            ("a".to_string(), ParameterRange::new(0.0, 9.0)),
            ("b".to_string(), ParameterRange::new(10.0, 100.0)),
        ])
    }

    #[test]
    fn test_axis_includes_endpoints() {
        let values = axis(&ParameterRange::new(5.0, 50.0), 10);
        assert_eq!(values.len(), 10);
        assert_eq!(values[0], 5.0);
        assert_eq!(values[9], 50.0);
        assert_eq!(axis(&ParameterRange::new(3.0, 3.0), 10), vec![3.0]);
    }

    #[test]
    fn test_grid_size_and_order() {
        let grid = GridIter::new(&ranges(), 10);
        assert_eq!(grid.total(), 100);
        let all: Vec<ParameterSet> = grid.collect();
        assert_eq!(all.len(), 100);
        assert_eq!(all[0]["a"], 0.0);
        assert_eq!(all[1]["a"], 0.0);
        assert_eq!(all[1]["b"], 20.0);
        assert_eq!(all[10]["a"], 1.0);
        assert_eq!(all[99]["b"], 100.0);
    }

    #[test]
    fn test_grid_truncation_is_lazy() {
        let many: ParameterRanges = (0..8)
            .map(|i| (format!("p{}", i), ParameterRange::new(0.0, 1.0)))
            .collect();
        let grid = GridIter::new(&many, 10);
        assert_eq!(grid.total(), 100_000_000);
        assert_eq!(grid.take(50).count(), 50);
    }

    #[test]
    fn test_empty_ranges() {
        assert_eq!(GridIter::new(&ParameterRanges::new(), 10).count(), 0);
    }
}
