//! Shared optimizer state and the parallel evaluator

use super::{
    rank_results, OptimizationResult, OptimizationTarget, OptimizerError, OptimizerProgress,
    OptimizerProgressCallback, ParameterRanges, StrategyFactory, DEFAULT_MAX_ITERATIONS,
    WORST_FITNESS,
};
use crate::backtest::{BacktestConfig, BacktestEngine, ParameterSet};
use crate::data::{DataRequest, DataSource, InMemoryDataSource};
use crate::telemetry::{
    increment_counter, record_duration, set_gauge, CounterMetric, DurationMetric, GaugeMetric,
};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Settings and results every algorithm shares
pub struct OptimizerCore {
    pub config: Option<BacktestConfig>,
    pub ranges: ParameterRanges,
    pub target: OptimizationTarget,
    pub max_iterations: usize,
    pub data_source: Option<Arc<dyn DataSource>>,
    pub threads: Option<usize>,
    pub cancel: Arc<AtomicBool>,
    pub progress_tx: Option<UnboundedSender<OptimizerProgress>>,
    pub progress_callback: Option<OptimizerProgressCallback>,
    pub results: Vec<OptimizationResult>,
}

impl Default for OptimizerCore {
    fn default() -> Self {
        Self {
            config: None,
            ranges: ParameterRanges::new(),
            target: OptimizationTarget::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            data_source: None,
            threads: None,
            cancel: Arc::new(AtomicBool::new(false)),
            progress_tx: None,
            progress_callback: None,
            results: Vec::new(),
        }
    }
}

impl OptimizerCore {
    pub fn initialize(&mut self, config: BacktestConfig) -> Result<(), OptimizerError> {
        config.validate()?;
        self.config = Some(config);
        Ok(())
    }

    pub fn set_parameter_ranges(&mut self, ranges: ParameterRanges) -> Result<(), OptimizerError> {
        validate_ranges(&ranges)?;
        self.ranges = ranges;
        Ok(())
    }

    /// Validate settings, load history once and build an evaluator
    ///
    /// Clears previous results.
    pub fn prepare(&mut self, algorithm: &'static str, factory: &StrategyFactory) -> Result<Evaluator, OptimizerError> {
        self.results.clear();
        let config = self.config.clone().ok_or(OptimizerError::NotInitialized)?;
        if self.ranges.is_empty() {
            return Err(OptimizerError::NoParameterRanges);
        }
        validate_ranges(&self.ranges)?;
        if self.max_iterations == 0 {
            return Err(OptimizerError::InvalidSetting("max_iterations must be at least 1".to_string()));
        }
        let source = self.data_source.clone().ok_or(OptimizerError::MissingDataSource)?;

        let started = Instant::now();
        if !source.is_connected() {
            source.connect()?;
        }
        let events = source.get_data(&DataRequest::from_config(&config))?;
        info!(
            algorithm,
            events = events.len(),
            load_ms = started.elapsed().as_millis() as u64,
            "Optimization data loaded"
        );
        let shared: Arc<dyn DataSource> = Arc::new(InMemoryDataSource::new(source.name(), events));

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = self.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| OptimizerError::ThreadPool(e.to_string()))?;

        Ok(Evaluator {
            algorithm,
            base_config: config,
            factory: factory.clone(),
            source: shared,
            target: self.target,
            cancel: self.cancel.clone(),
            pool,
            progress_tx: self.progress_tx.clone(),
            progress_callback: self.progress_callback.clone(),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(self.max_iterations),
            best: Mutex::new(WORST_FITNESS),
            generation: AtomicUsize::new(0),
            started: Instant::now(),
        })
    }

    /// Rank, store and summarize a finished search
    pub fn finish(&mut self, evaluator: &Evaluator, mut results: Vec<OptimizationResult>) -> &[OptimizationResult] {
        rank_results(&mut results);
        self.results = results;
        let failed = self.results.iter().filter(|r| !r.succeeded()).count();
        match self.results.first() {
            Some(best) => {
                set_gauge(GaugeMetric::BestFitness, best.fitness);
                info!(
                    algorithm = evaluator.algorithm,
                    target = %self.target,
                    evaluations = self.results.len(),
                    failed,
                    best_fitness = best.fitness,
                    best_parameters = ?best.parameters,
                    elapsed_ms = evaluator.started.elapsed().as_millis() as u64,
                    cancelled = evaluator.is_cancelled(),
                    "Optimization complete"
                );
            }
            None => warn!(algorithm = evaluator.algorithm, "Optimization produced no results"),
        }
        &self.results
    }
}

fn validate_ranges(ranges: &ParameterRanges) -> Result<(), OptimizerError> {
    for (name, range) in ranges {
        if !range.is_valid() {
            return Err(OptimizerError::InvalidRange {
                name: name.clone(),
                min: range.min,
                max: range.max,
            });
        }
    }
    Ok(())
}

/// Runs candidate parameter vectors through fresh engines
///
/// Shared by reference across rayon workers.
pub struct Evaluator {
    algorithm: &'static str,
    base_config: BacktestConfig,
    factory: StrategyFactory,
    source: Arc<dyn DataSource>,
    target: OptimizationTarget,
    cancel: Arc<AtomicBool>,
    pool: rayon::ThreadPool,
    progress_tx: Option<UnboundedSender<OptimizerProgress>>,
    progress_callback: Option<OptimizerProgressCallback>,
    completed: AtomicUsize,
    total: AtomicUsize,
    best: Mutex<f64>,
    generation: AtomicUsize,
    started: Instant,
}

impl Evaluator {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Expected number of evaluations, for progress reporting
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn set_generation(&self, generation: usize) {
        self.generation.store(generation, Ordering::Relaxed);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Evaluate one candidate; `None` when cancelled before starting
    pub fn evaluate(&self, parameters: ParameterSet) -> Option<OptimizationResult> {
        if self.is_cancelled() {
            return None;
        }
        let started = Instant::now();
        let mut config = self.base_config.clone();
        config
            .parameters
            .extend(parameters.iter().map(|(k, v)| (k.clone(), *v)));
        let strategy = (self.factory)(&config.parameters);

        let outcome = match BacktestEngine::run_to_completion(config, strategy, self.source.clone()) {
            Ok(result) => OptimizationResult {
                fitness: self.target.fitness(&result),
                parameters,
                result: Some(result),
                rank: 0,
                error: None,
            },
            Err(e) => {
                warn!(algorithm = self.algorithm, parameters = ?parameters, error = %e, "Evaluation failed");
                increment_counter(CounterMetric::FailedEvaluations, 1);
                OptimizationResult {
                    parameters,
                    result: None,
                    fitness: WORST_FITNESS,
                    rank: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        increment_counter(CounterMetric::Evaluations, 1);
        record_duration(DurationMetric::Evaluation, started.elapsed());
        debug!(
            algorithm = self.algorithm,
            fitness = outcome.fitness,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Candidate evaluated"
        );
        self.report(outcome.fitness);
        Some(outcome)
    }

    /// Evaluate a batch in parallel, preserving candidate order
    pub fn evaluate_batch(&self, candidates: Vec<ParameterSet>) -> Vec<OptimizationResult> {
        self.pool.install(|| {
            candidates
                .into_par_iter()
                .filter_map(|parameters| self.evaluate(parameters))
                .collect()
        })
    }

    fn report(&self, fitness: f64) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let best_fitness = {
            let mut best = match self.best.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if fitness > *best {
                *best = fitness;
            }
            *best
        };
        if self.progress_tx.is_none() && self.progress_callback.is_none() {
            return;
        }
        let total = self.total.load(Ordering::Relaxed).max(completed);
        let generation = self.generation.load(Ordering::Relaxed);
        let progress = OptimizerProgress {
            algorithm: self.algorithm.to_string(),
            evaluations_completed: completed,
            total_evaluations: total,
            progress: completed as f64 / total as f64,
            best_fitness,
            generation: (generation > 0).then_some(generation),
        };
        if let Some(callback) = &self.progress_callback {
            callback(&progress);
        }
        if let Some(tx) = &self.progress_tx {
            // Receiver may be gone; progress is best effort
            let _ = tx.send(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ParameterRange;

    #[test]
    fn test_prepare_requires_settings() {
        let mut core = OptimizerCore::default();
        let factory: StrategyFactory = crate::strategy::StrategyRegistry::with_builtins()
            .constructor("sma_cross")
            .unwrap();
        assert!(matches!(core.prepare("grid", &factory), Err(OptimizerError::NotInitialized)));

        core.initialize(BacktestConfig::new("sma_cross", "BTCUSDT", 0, 1_000, rust_decimal::Decimal::ONE_THOUSAND))
            .unwrap();
        assert!(matches!(core.prepare("grid", &factory), Err(OptimizerError::NoParameterRanges)));

        core.set_parameter_ranges(ParameterRanges::from([(
            "fast_period".to_string(),
            ParameterRange::new(2.0, 5.0),
        )]))
        .unwrap();
        assert!(matches!(core.prepare("grid", &factory), Err(OptimizerError::MissingDataSource)));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let mut core = OptimizerCore::default();
        let err = core
            .set_parameter_ranges(ParameterRanges::from([(
                "x".to_string(),
                ParameterRange::new(f64::NAN, 1.0),
            )]))
            .unwrap_err();
        assert!(matches!(err, OptimizerError::InvalidRange { .. }));
    }
}
