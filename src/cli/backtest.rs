//! Backtest command implementation

use super::{parse_parameter, parse_time};
use crate::analytics::{ReportFormat, Reporter};
use crate::backtest::{BacktestConfig, BacktestEngine, BacktestResult, DataType};
use crate::config::Config;
use crate::strategy::StrategyRegistry;
use anyhow::Context;
use clap::Args;
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct BacktestArgs {
    /// Registered strategy name
    #[arg(long, default_value = "sma_cross")]
    pub strategy: String,

    /// Instrument symbol
    #[arg(long)]
    pub symbol: String,

    /// Window start (RFC 3339, YYYY-MM-DD or ms)
    #[arg(long, value_parser = parse_time)]
    pub start: i64,

    /// Window end (RFC 3339, YYYY-MM-DD or ms)
    #[arg(long, value_parser = parse_time)]
    pub end: i64,

    /// Initial capital
    #[arg(long, default_value = "10000")]
    pub capital: Decimal,

    /// Data source id; defaults to `data.default_source`
    #[arg(long)]
    pub source: Option<String>,

    /// Data directory override for the file source
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Bar interval override
    #[arg(long)]
    pub time_frame: Option<String>,

    /// Data type: kline, trade or book
    #[arg(long, default_value = "kline")]
    pub data_type: DataType,

    /// Strategy parameter, repeatable
    #[arg(long = "param", value_parser = parse_parameter)]
    pub params: Vec<(String, f64)>,

    /// Write a report to this path instead of printing a table
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Report format: html, json, csv or markdown
    #[arg(long, default_value = "json")]
    pub format: ReportFormat,
}

impl BacktestArgs {
    /// Run config from the arguments and the engine defaults
    pub fn backtest_config(&self, config: &Config) -> BacktestConfig {
        let mut run = BacktestConfig::new(&self.strategy, &self.symbol, self.start, self.end, self.capital);
        config.engine.apply(&mut run);
        run.data_source = self
            .source
            .clone()
            .unwrap_or_else(|| config.data.default_source.clone());
        run.data_type = self.data_type;
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
        let run = self.backtest_config(&config);
        run.validate()?;
        tracing::info!(
            strategy = %run.strategy_name,
            symbol = %run.symbol,
            source = %run.data_source,
            "Running backtest"
        );

        let progress_interval = config.engine.progress_interval;
        let registry = config.data_registry();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<BacktestResult> {
            let source = registry.create(&run.data_source)?;
            let strategy = StrategyRegistry::with_builtins().create(&run.strategy_name, &run.parameters)?;
            let mut engine = BacktestEngine::new().with_progress_interval(progress_interval);
            engine.set_progress_callback(|update| {
                tracing::info!(
                    progress = %format!("{:.1}%", update.progress * 100.0),
                    events = update.events_processed,
                    events_per_sec = update.events_per_second as u64,
                    "Backtest progress"
                );
            });
            engine.initialize(run)?;
            engine.set_strategy(strategy)?;
            engine.set_data_source(source)?;
            engine.run()?;
            engine.take_result().context("backtest produced no result")
        })
        .await??;

        match &self.output {
            Some(path) => {
                let reporter = Reporter::new(config.report.report.clone());
                reporter.write(&result, self.format, path)?;
                println!("Report written to {}", path.display());
            }
            None => print_summary(&result),
        }
        Ok(())
    }
}

/// Plain-text summary table
pub(crate) fn print_summary(result: &BacktestResult) {
    println!("Backtest: {} on {}", result.strategy_name, result.symbol);
    println!("  Events processed: {}", result.events_processed);
    println!("  Initial balance:  {}", result.initial_balance);
    println!("  Final balance:    {}", result.final_balance.round_dp(2));
    println!("  Total return:     {:.2}%", result.total_return * 100.0);
    println!("  Max drawdown:     {:.2}%", result.max_drawdown * 100.0);
    println!("  Sharpe ratio:     {:.3}", result.sharpe_ratio);
    println!("  Win rate:         {:.1}%", result.win_rate * 100.0);
    println!("  Profit factor:    {:.2}", result.profit_factor);
    println!(
        "  Trades:           {} ({} won, {} lost)",
        result.trade_count, result.win_count, result.lose_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_backtest_config_merges_defaults() {
        let args = BacktestArgs {
            strategy: "mean_reversion".to_string(),
            symbol: "ETHUSDT".to_string(),
            start: 0,
            end: 60_000,
            capital: dec!(5000),
            source: None,
            data_dir: None,
            time_frame: Some("5m".to_string()),
            data_type: DataType::Kline,
            params: vec![("lookback".to_string(), 30.0)],
            output: None,
            format: ReportFormat::Json,
        };
        let mut config = Config::default();
        config.engine.fee_rate = dec!(0.0004);
        let run = args.backtest_config(&config);
        assert_eq!(run.data_source, "file");
        assert_eq!(run.fee_rate, dec!(0.0004));
        assert_eq!(run.time_frame, "5m");
        assert_eq!(run.parameter("lookback", 0.0), 30.0);
        assert!(run.validate().is_ok());
    }
}
