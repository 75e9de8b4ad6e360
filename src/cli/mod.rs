//! CLI interface for quant-replay
//!
//! Provides subcommands for:
//! - `backtest`: Run one strategy over a historical window
//! - `optimize`: Search strategy parameters
//! - `download`: Fetch exchange klines to CSV
//! - `validate`: Check an OHLCV CSV file
//! - `config`: Show effective configuration

mod backtest;
mod download;
mod optimize;
mod validate;

pub use backtest::BacktestArgs;
pub use download::DownloadArgs;
pub use optimize::OptimizeArgs;
pub use validate::{validate_file, ValidateArgs};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "quant-replay")]
#[command(about = "Deterministic historical-replay backtesting with parameter optimization")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single backtest
    Backtest(BacktestArgs),
    /// Optimize strategy parameters
    Optimize(OptimizeArgs),
    /// Download historical klines to CSV
    Download(DownloadArgs),
    /// Validate an OHLCV CSV file
    Validate(ValidateArgs),
    /// Show effective configuration
    Config,
}

/// Parse a time argument into ms since epoch
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` (midnight UTC) or a
/// raw millisecond timestamp.
pub fn parse_time(value: &str) -> Result<i64, String> {
    let value = value.trim();
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    Err(format!("unrecognized time: {}", value))
}

/// Parse `name=value`
pub fn parse_key_value(value: &str) -> Result<(String, String), String> {
    let (key, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {}", value))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty name in {}", value));
    }
    Ok((key.to_string(), rest.trim().to_string()))
}

/// Parse `name=number` for strategy parameters
pub fn parse_parameter(value: &str) -> Result<(String, f64), String> {
    let (key, raw) = parse_key_value(value)?;
    let number = raw
        .parse::<f64>()
        .map_err(|_| format!("parameter {} is not a number: {}", key, raw))?;
    Ok((key, number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(parse_time("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(parse_time("2024-01-01").unwrap(), 1_704_067_200_000);
        assert_eq!(parse_time("2024-01-01 00:01:00").unwrap(), 1_704_067_260_000);
        assert_eq!(parse_time("2024-01-01T01:00:00+01:00").unwrap(), 1_704_067_200_000);
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_parse_parameter() {
        assert_eq!(parse_parameter("fast_period=5").unwrap(), ("fast_period".to_string(), 5.0));
        assert!(parse_parameter("fast_period").is_err());
        assert!(parse_parameter("=5").is_err());
        assert!(parse_parameter("fast=abc").is_err());
    }

    #[test]
    fn test_cli_parses_optimize() {
        let cli = Cli::try_parse_from([
            "quant-replay",
            "optimize",
            "--strategy",
            "sma_cross",
            "--symbol",
            "BTCUSDT",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-02",
            "--range",
            "fast_period=2:10",
            "--range",
            "slow_period=20..40",
            "--algorithm",
            "genetic",
        ])
        .unwrap();
        match cli.command {
            Commands::Optimize(args) => {
                assert_eq!(args.ranges.len(), 2);
                assert_eq!(args.ranges[1].0, "slow_period");
                assert_eq!(args.ranges[1].1.max, 40.0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
