//! Genetic algorithm search
//!
//! Tournament selection, uniform crossover, Gaussian mutation with
//! sigma = 10% of the range, and elitism. Elites carry their fitness into
//! the next generation, so they are never re-evaluated.

use super::{
    sample_parameters, OptimizationResult, Optimizer, OptimizerCore, OptimizerError,
    ParameterRanges, StrategyFactory, WORST_FITNESS,
};
use crate::backtest::ParameterSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Mutation sigma as a fraction of the range span
const MUTATION_SIGMA_FRACTION: f64 = 0.1;

/// Genetic search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub population_size: usize,
    /// Per-gene mutation probability
    pub mutation_rate: f64,
    /// Probability a child mixes two parents instead of copying one
    pub crossover_rate: f64,
    pub elitism_count: usize,
    pub tournament_size: usize,
    pub max_generations: usize,
    /// Minimum best-fitness gain over the window to keep going
    pub convergence_threshold: f64,
    /// Window length, in generations
    pub convergence_generations: usize,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            elitism_count: 2,
            tournament_size: 3,
            max_generations: 50,
            convergence_threshold: 1e-6,
            convergence_generations: 10,
        }
    }
}

impl GeneticConfig {
    fn validate(&self) -> Result<(), OptimizerError> {
        let invalid = |msg: &str| Err(OptimizerError::InvalidSetting(msg.to_string()));
        if self.population_size < 2 {
            return invalid("population_size must be at least 2");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid("mutation_rate must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.crossover_rate) {
            return invalid("crossover_rate must be in [0, 1]");
        }
        if self.elitism_count >= self.population_size {
            return invalid("elitism_count must be below population_size");
        }
        if self.tournament_size == 0 {
            return invalid("tournament_size must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Individual {
    genes: ParameterSet,
    fitness: Option<f64>,
}

impl Individual {
    fn score(&self) -> f64 {
        self.fitness.unwrap_or(WORST_FITNESS)
    }
}

/// Evolves a population of parameter vectors
pub struct GeneticAlgorithmOptimizer {
    core: OptimizerCore,
    config: GeneticConfig,
    seed: Option<u64>,
    generations_run: usize,
    converged: bool,
}

impl GeneticAlgorithmOptimizer {
    pub fn new(config: GeneticConfig, seed: Option<u64>) -> Self {
        Self {
            core: OptimizerCore::default(),
            config,
            seed,
            generations_run: 0,
            converged: false,
        }
    }

    pub fn config(&self) -> &GeneticConfig {
        &self.config
    }

    /// Generations evaluated by the last search
    pub fn generations_run(&self) -> usize {
        self.generations_run
    }

    /// Whether the last search stopped on the convergence rule
    pub fn converged(&self) -> bool {
        self.converged
    }

    fn tournament<'a, R: Rng>(&self, population: &'a [Individual], rng: &mut R) -> &'a Individual {
        let mut best = &population[rng.gen_range(0..population.len())];
        for _ in 1..self.config.tournament_size {
            let challenger = &population[rng.gen_range(0..population.len())];
            if challenger.score() > best.score() {
                best = challenger;
            }
        }
        best
    }

    fn crossover<R: Rng>(&self, a: &Individual, b: &Individual, rng: &mut R) -> ParameterSet {
        if rng.gen::<f64>() >= self.config.crossover_rate {
            return a.genes.clone();
        }
        a.genes
            .iter()
            .map(|(name, value)| {
                let other = b.genes.get(name).copied().unwrap_or(*value);
                (name.clone(), if rng.gen::<bool>() { *value } else { other })
            })
            .collect()
    }

    fn mutate<R: Rng>(&self, genes: &mut ParameterSet, ranges: &ParameterRanges, rng: &mut R) {
        for (name, value) in genes.iter_mut() {
            let Some(range) = ranges.get(name) else {
                continue;
            };
            if rng.gen::<f64>() >= self.config.mutation_rate {
                continue;
            }
            let sigma = range.span() * MUTATION_SIGMA_FRACTION;
            if let Ok(normal) = Normal::new(0.0, sigma) {
                *value = range.clamp(*value + normal.sample(rng));
            }
        }
    }

    fn breed<R: Rng>(&self, mut population: Vec<Individual>, ranges: &ParameterRanges, rng: &mut R) -> Vec<Individual> {
        population.sort_by(|a, b| b.score().total_cmp(&a.score()));
        let mut next: Vec<Individual> = population
            .iter()
            .take(self.config.elitism_count)
            .cloned()
            .collect();
        while next.len() < self.config.population_size {
            let a = self.tournament(&population, rng);
            let b = self.tournament(&population, rng);
            let mut genes = self.crossover(a, b, rng);
            self.mutate(&mut genes, ranges, rng);
            next.push(Individual {
                genes,
                fitness: None,
            });
        }
        next
    }
}

impl Default for GeneticAlgorithmOptimizer {
    fn default() -> Self {
        Self::new(GeneticConfig::default(), None)
    }
}

impl Optimizer for GeneticAlgorithmOptimizer {
    fn name(&self) -> &'static str {
        "genetic"
    }

    fn core(&self) -> &OptimizerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OptimizerCore {
        &mut self.core
    }

    fn optimize(&mut self, factory: &StrategyFactory) -> Result<&[OptimizationResult], OptimizerError> {
        self.config.validate()?;
        let name = self.name();
        let evaluator = self.core.prepare(name, factory)?;
        let ranges = self.core.ranges.clone();
        let budget = self.core.max_iterations;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.generations_run = 0;
        self.converged = false;

        info!(
            population = self.config.population_size,
            max_generations = self.config.max_generations,
            budget,
            "Starting genetic search"
        );

        let mut population: Vec<Individual> = (0..self.config.population_size)
            .map(|_| Individual {
                genes: sample_parameters(&ranges, &mut rng),
                fitness: None,
            })
            .collect();
        let mut results: Vec<OptimizationResult> = Vec::new();
        let mut best_history: Vec<f64> = Vec::new();

        for generation in 1..=self.config.max_generations {
            let remaining = budget.saturating_sub(results.len());
            if remaining == 0 || evaluator.is_cancelled() {
                break;
            }
            evaluator.set_generation(generation);

            // Children beyond the remaining budget are dropped
            let mut pending = 0;
            population.retain(|ind| {
                if ind.fitness.is_some() {
                    return true;
                }
                pending += 1;
                pending <= remaining
            });
            let (evaluated, unevaluated): (Vec<Individual>, Vec<Individual>) =
                population.into_iter().partition(|ind| ind.fitness.is_some());
            let candidates: Vec<ParameterSet> = unevaluated.into_iter().map(|ind| ind.genes).collect();
            let outcomes = evaluator.evaluate_batch(candidates);

            population = evaluated;
            population.extend(outcomes.iter().map(|r| Individual {
                genes: r.parameters.clone(),
                fitness: Some(r.fitness),
            }));
            results.extend(outcomes);
            self.generations_run = generation;

            let best = population.iter().map(Individual::score).fold(WORST_FITNESS, f64::max);
            best_history.push(best);
            debug!(generation, best_fitness = best, evaluations = results.len(), "Generation evaluated");

            let window = self.config.convergence_generations;
            if window > 0 && best_history.len() > window {
                let earlier = best_history[best_history.len() - 1 - window];
                if best - earlier < self.config.convergence_threshold {
                    info!(generation, best_fitness = best, "Genetic search converged");
                    self.converged = true;
                    break;
                }
            }

            if population.len() < 2 {
                break;
            }
            population = self.breed(population, &ranges, &mut rng);
        }

        Ok(self.core.finish(&evaluator, results))
    }
}
