//! Optimize command implementation

use super::{parse_parameter, parse_time};
use crate::backtest::{BacktestConfig, DataType};
use crate::config::Config;
use crate::optimizer::{
    build_optimizer, OptimizationResult, OptimizationTarget, OptimizerKind, OptimizerProgress,
    OptimizerSettings, ParameterRange, ParameterRanges,
};
use crate::strategy::StrategyRegistry;
use clap::Args;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

/// Parse `name=min:max`
pub fn parse_range(value: &str) -> Result<(String, ParameterRange), String> {
    let (name, raw) = super::parse_key_value(value)?;
    let range: ParameterRange = raw.parse().map_err(|e| format!("{}", e))?;
    if !range.is_valid() {
        return Err(format!("range for {} must have min <= max", name));
    }
    Ok((name, range))
}

#[derive(Args, Debug)]
pub struct OptimizeArgs {
    /// Registered strategy name
    #[arg(long, default_value = "sma_cross")]
    pub strategy: String,

    /// Instrument symbol
    #[arg(long)]
    pub symbol: String,

    #[arg(long, value_parser = parse_time)]
    pub start: i64,

    #[arg(long, value_parser = parse_time)]
    pub end: i64,

    /// Initial capital
    #[arg(long, default_value = "10000")]
    pub capital: Decimal,

    /// Search range `name=min:max`, repeatable
    #[arg(long = "range", value_parser = parse_range, required = true)]
    pub ranges: Vec<(String, ParameterRange)>,

    /// Fixed strategy parameter `name=value`, repeatable
    #[arg(long = "param", value_parser = parse_parameter)]
    pub params: Vec<(String, f64)>,

    /// grid, genetic, random or bayesian
    #[arg(long)]
    pub algorithm: Option<OptimizerKind>,

    /// sharpe, return or win_rate
    #[arg(long)]
    pub target: Option<OptimizationTarget>,

    #[arg(long)]
    pub max_iterations: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub threads: Option<usize>,

    /// Data source id; defaults to `data.default_source`
    #[arg(long)]
    pub source: Option<String>,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long)]
    pub time_frame: Option<String>,

    /// Results printed
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Write all ranked results as JSON
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl OptimizeArgs {
    /// Optimizer settings with command-line overrides applied
    pub fn settings(&self, config: &Config) -> OptimizerSettings {
        let mut settings = config.optimizer.clone();
        if let Some(algorithm) = self.algorithm {
            settings.algorithm = algorithm;
        }
        if let Some(target) = self.target {
            settings.target = target;
        }
        if let Some(max) = self.max_iterations {
            settings.max_iterations = max;
        }
        if self.seed.is_some() {
            settings.seed = self.seed;
        }
        if self.threads.is_some() {
            settings.threads = self.threads;
        }
        settings
    }

    pub fn base_config(&self, config: &Config) -> BacktestConfig {
        let mut run = BacktestConfig::new(&self.strategy, &self.symbol, self.start, self.end, self.capital);
        config.engine.apply(&mut run);
        run.data_source = self
            .source
            .clone()
            .unwrap_or_else(|| config.data.default_source.clone());
        run.data_type = DataType::Kline;
        if let Some(tf) = &self.time_frame {
            run.time_frame = tf.clone();
        }
        for (name, value) in &self.params {
            run.parameters.insert(name.clone(), *value);
        }
        run
    }

    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut config = config.clone();
        if let Some(dir) = &self.data_dir {
            config.data.file.data_dir = dir.clone();
        }
        let settings = self.settings(&config);
        let base = self.base_config(&config);
        let ranges: ParameterRanges = self.ranges.iter().cloned().collect();

        let factory = StrategyRegistry::with_builtins().constructor(&base.strategy_name)?;
        let source = config.data_registry().create(&base.data_source)?;

        let mut optimizer = build_optimizer(&settings);
        optimizer.initialize(base)?;
        optimizer.set_parameter_ranges(ranges)?;
        optimizer.set_data_source(source);

        let (tx, mut rx) = mpsc::unbounded_channel::<OptimizerProgress>();
        optimizer.set_progress_sender(tx);
        let reporter = tokio::spawn(async move {
            let mut last_decile = 0;
            while let Some(progress) = rx.recv().await {
                let decile = (progress.progress * 10.0) as usize;
                if decile > last_decile {
                    last_decile = decile;
                    tracing::info!(
                        algorithm = %progress.algorithm,
                        completed = progress.evaluations_completed,
                        total = progress.total_evaluations,
                        best_fitness = progress.best_fitness,
                        generation = ?progress.generation,
                        "Optimization progress"
                    );
                }
            }
        });

        let cancel = optimizer.cancel_flag();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling remaining evaluations");
                cancel.store(true, Ordering::SeqCst);
            }
        });

        tracing::info!(
            algorithm = %settings.algorithm,
            target = %settings.target,
            max_iterations = settings.max_iterations,
            "Starting optimization"
        );
        let results = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<OptimizationResult>> {
            let results = optimizer.optimize(&factory)?.to_vec();
            Ok(results)
        })
        .await??;
        interrupt.abort();
        // Sender dropped with the optimizer, so the reporter drains and exits
        let _ = reporter.await;

        print_ranked(&results, self.top, settings.target);
        if let Some(path) = &self.output {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&results)?)?;
            println!("Results written to {}", path.display());
        }
        Ok(())
    }
}

fn print_ranked(results: &[OptimizationResult], top: usize, target: OptimizationTarget) {
    println!("Optimization results ({} evaluated, target {})", results.len(), target);
    for result in results.iter().take(top) {
        let params: Vec<String> = result
            .parameters
            .iter()
            .map(|(name, value)| format!("{}={:.4}", name, value))
            .collect();
        match &result.error {
            Some(error) => println!("  #{:<3} failed  {}  ({})", result.rank, params.join(" "), error),
            None => println!("  #{:<3} {:>10.4}  {}", result.rank, result.fitness, params.join(" ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let (name, range) = parse_range("fast_period=2:10").unwrap();
        assert_eq!(name, "fast_period");
        assert_eq!((range.min, range.max), (2.0, 10.0));
        assert!(parse_range("fast_period=10:2").is_err());
        assert!(parse_range("fast_period").is_err());
        assert!(parse_range("fast_period=a:b").is_err());
    }

    #[test]
    fn test_settings_overrides() {
        let mut config = Config::default();
        config.optimizer.seed = Some(1);
        config.optimizer.max_iterations = 500;
        let args = OptimizeArgs {
            strategy: "sma_cross".to_string(),
            symbol: "BTCUSDT".to_string(),
            start: 0,
            end: 1_000,
            capital: Decimal::ONE_THOUSAND,
            ranges: vec![("fast_period".to_string(), ParameterRange::new(2.0, 10.0))],
            params: Vec::new(),
            algorithm: Some(OptimizerKind::Random),
            target: None,
            max_iterations: Some(50),
            seed: None,
            threads: Some(2),
            source: None,
            data_dir: None,
            time_frame: None,
            top: 10,
            output: None,
        };
        let settings = args.settings(&config);
        assert_eq!(settings.algorithm, OptimizerKind::Random);
        assert_eq!(settings.max_iterations, 50);
        assert_eq!(settings.seed, Some(1));
        assert_eq!(settings.threads, Some(2));
    }
}
