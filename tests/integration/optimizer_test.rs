//! Optimizer combinatorics, budgets and cancellation

use crate::common::{config, kline, memory_source, BAR_MS};
use quant_replay::optimizer::{
    build_optimizer, BayesianConfig, BayesianOptimizer, GeneticAlgorithmOptimizer, GeneticConfig,
    GridSearchOptimizer, OptimizationTarget, Optimizer, OptimizerError, OptimizerKind,
    OptimizerSettings, ParameterRange, ParameterRanges, RandomSearchOptimizer, StrategyFactory,
    WORST_FITNESS,
};
use quant_replay::data::InMemoryDataSource;
use quant_replay::strategy::StrategyRegistry;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::Ordering;

const BARS: usize = 600;

fn factory() -> StrategyFactory {
    StrategyRegistry::with_builtins().constructor("sma_cross").unwrap()
}

fn ranges() -> ParameterRanges {
    ParameterRanges::from([
        ("fast_period".to_string(), ParameterRange::new(2.0, 11.0)),
        ("slow_period".to_string(), ParameterRange::new(20.0, 40.0)),
    ])
}

fn prepared(mut optimizer: Box<dyn Optimizer>, max_iterations: usize) -> Box<dyn Optimizer> {
    optimizer.initialize(config("sma_cross", BARS)).unwrap();
    optimizer.set_parameter_ranges(ranges()).unwrap();
    optimizer.set_data_source(memory_source(BARS));
    optimizer.set_max_iterations(max_iterations);
    optimizer.set_threads(Some(2));
    optimizer
}

fn assert_ranked(optimizer: &dyn Optimizer) {
    let results = optimizer.results();
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.rank, i + 1);
    }
    assert!(results.windows(2).all(|w| w[0].fitness >= w[1].fitness));
    for result in results {
        assert!((2.0..=11.0).contains(&result.parameters["fast_period"]));
        assert!((20.0..=40.0).contains(&result.parameters["slow_period"]));
    }
}

#[test]
fn test_grid_two_ranges_ten_steps() {
    let mut optimizer = prepared(Box::new(GridSearchOptimizer::new(10)), 1_000);
    let count = optimizer.optimize(&factory()).unwrap().len();
    assert_eq!(count, 100);
    assert_ranked(optimizer.as_ref());
    assert!(optimizer.results().iter().all(|r| r.succeeded()));
    assert_eq!(
        optimizer.best_parameters(),
        Some(optimizer.results()[0].parameters.clone())
    );
}

#[test]
fn test_grid_respects_max_iterations() {
    let mut optimizer = prepared(Box::new(GridSearchOptimizer::new(10)), 50);
    assert_eq!(optimizer.optimize(&factory()).unwrap().len(), 50);
    assert_eq!(optimizer.top_results(5).len(), 5);
}

/// Genetic search over constant prices: no candidate trades, so every
/// fitness is equal
fn flat_genetic(convergence_generations: usize, max_generations: usize) -> GeneticAlgorithmOptimizer {
    let config = GeneticConfig {
        population_size: 6,
        elitism_count: 2,
        max_generations,
        convergence_generations,
        ..Default::default()
    };
    let events = (1..=BARS as i64).map(|i| kline(BAR_MS * i, dec!(100))).collect();
    let mut optimizer = GeneticAlgorithmOptimizer::new(config, Some(3));
    optimizer.initialize(crate::common::config("sma_cross", BARS)).unwrap();
    optimizer.set_parameter_ranges(ranges()).unwrap();
    optimizer.set_data_source(Arc::new(InMemoryDataSource::new("flat", events)));
    optimizer.set_max_iterations(1_000);
    optimizer.set_threads(Some(2));
    optimizer
}

#[test]
fn test_genetic_converges_on_flat_fitness() {
    let mut optimizer = flat_genetic(2, 20);
    let count = optimizer.optimize(&factory()).unwrap().len();

    assert!(optimizer.converged());
    // Best fitness is unchanged two generations after the first
    assert_eq!(optimizer.generations_run(), 3);
    // Full first generation, then only the non-elite children
    assert_eq!(count, 6 + 4 + 4);
    let fitness = optimizer.results()[0].fitness;
    assert!(optimizer.results().iter().all(|r| r.fitness == fitness));
}

#[test]
fn test_genetic_without_convergence_window_runs_all_generations() {
    let mut optimizer = flat_genetic(0, 5);
    let count = optimizer.optimize(&factory()).unwrap().len();
    assert!(!optimizer.converged());
    assert_eq!(optimizer.generations_run(), 5);
    assert_eq!(count, 6 + 4 * 4);
}

#[test]
fn test_genetic_stays_within_budget() {
    let config = GeneticConfig {
        population_size: 10,
        max_generations: 20,
        ..Default::default()
    };
    let mut optimizer = prepared(Box::new(GeneticAlgorithmOptimizer::new(config, Some(7))), 50);
    let count = optimizer.optimize(&factory()).unwrap().len();
    assert!(count > 0 && count <= 50, "{} evaluations", count);
    assert_ranked(optimizer.as_ref());
}

#[test]
fn test_random_search_is_reproducible() {
    let run = || {
        let mut optimizer = prepared(Box::new(RandomSearchOptimizer::new(Some(99))), 20);
        optimizer.set_optimization_target(OptimizationTarget::Return);
        optimizer.optimize(&factory()).unwrap();
        optimizer
            .results()
            .iter()
            .map(|r| (r.parameters.clone(), r.fitness.to_bits()))
            .collect::<Vec<_>>()
    };
    let first = run();
    assert_eq!(first.len(), 20);
    assert_eq!(first, run());
}

#[test]
fn test_bayesian_within_budget() {
    let config = BayesianConfig {
        initial_samples: 4,
        candidate_samples: 200,
        ..Default::default()
    };
    let mut optimizer = prepared(Box::new(BayesianOptimizer::new(config, Some(3))), 12);
    let count = optimizer.optimize(&factory()).unwrap().len();
    assert_eq!(count, 12);
    assert_ranked(optimizer.as_ref());
}

#[test]
fn test_failed_candidates_rank_last() {
    // fast_period >= slow_period is rejected by the strategy
    let mut optimizer = build_optimizer(&OptimizerSettings {
        algorithm: OptimizerKind::Grid,
        grid_steps: 3,
        max_iterations: 100,
        ..Default::default()
    });
    optimizer.initialize(config("sma_cross", BARS)).unwrap();
    optimizer
        .set_parameter_ranges(ParameterRanges::from([
            ("fast_period".to_string(), ParameterRange::new(5.0, 30.0)),
            ("slow_period".to_string(), ParameterRange::new(10.0, 20.0)),
        ]))
        .unwrap();
    optimizer.set_data_source(memory_source(BARS));
    let results = optimizer.optimize(&factory()).unwrap();
    assert_eq!(results.len(), 9);
    let failed: Vec<_> = results.iter().filter(|r| !r.succeeded()).collect();
    assert!(!failed.is_empty());
    assert!(failed.iter().all(|r| r.fitness == WORST_FITNESS && r.error.is_some()));
    let last = &results[results.len() - 1];
    assert!(!last.succeeded());
}

#[test]
fn test_cancelled_search_evaluates_nothing() {
    let mut optimizer = prepared(Box::new(GridSearchOptimizer::new(10)), 100);
    optimizer.cancel_flag().store(true, Ordering::SeqCst);
    assert!(optimizer.optimize(&factory()).unwrap().is_empty());
}

#[test]
fn test_missing_data_source() {
    let mut optimizer = GridSearchOptimizer::default();
    optimizer.initialize(config("sma_cross", BARS)).unwrap();
    optimizer.set_parameter_ranges(ranges()).unwrap();
    assert!(matches!(
        optimizer.optimize(&factory()),
        Err(OptimizerError::MissingDataSource)
    ));
}

#[tokio::test]
async fn test_progress_reported_per_evaluation() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut optimizer = prepared(Box::new(RandomSearchOptimizer::new(Some(1))), 15);
    optimizer.set_progress_sender(tx);

    let count = tokio::task::spawn_blocking(move || optimizer.optimize(&factory()).map(|r| r.len()))
        .await
        .unwrap()
        .unwrap();

    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }
    assert_eq!(updates.len(), count);
    assert!(updates.iter().any(|u| u.evaluations_completed == count));
    assert!(updates.iter().all(|u| u.progress <= 1.0));
}
