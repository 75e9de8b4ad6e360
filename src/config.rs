//! Configuration types for quant-replay
//!
//! Every section is optional in the TOML file and falls back to defaults.

use crate::analytics::ReportConfig;
use crate::backtest::{BacktestConfig, DEFAULT_PROGRESS_INTERVAL};
use crate::data::{DataSourceRegistry, FileSourceConfig, RemoteSourceConfig};
use crate::optimizer::OptimizerSettings;
use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub remote: RemoteSourceConfig,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus listener port; no listener when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

/// Engine defaults applied to every run built from the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Events between progress notifications; 0 disables them
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    #[serde(default)]
    pub slippage_bps: Decimal,
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
    #[serde(default = "default_time_frame")]
    pub time_frame: String,
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}
fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3) // 0.001
}
fn default_risk_per_trade() -> f64 {
    0.1
}
fn default_time_frame() -> String {
    "1m".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_interval: default_progress_interval(),
            fee_rate: default_fee_rate(),
            slippage_bps: Decimal::ZERO,
            risk_per_trade: default_risk_per_trade(),
            time_frame: default_time_frame(),
        }
    }
}

impl EngineConfig {
    /// Copy the engine defaults onto a run config
    pub fn apply(&self, config: &mut BacktestConfig) {
        config.fee_rate = self.fee_rate;
        config.slippage_bps = self.slippage_bps;
        config.risk_per_trade = self.risk_per_trade;
        config.time_frame = self.time_frame.clone();
    }
}

/// Historical data configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Registry id used when a command does not name a source
    #[serde(default = "default_source")]
    pub default_source: String,
    #[serde(flatten)]
    pub file: FileSourceConfig,
}

fn default_source() -> String {
    "file".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            default_source: default_source(),
            file: FileSourceConfig::default(),
        }
    }
}

/// Report output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(flatten)]
    pub report: ReportConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            report: ReportConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Effective configuration rendered back to TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Data source registry with the built-in sources configured from this file
    pub fn data_registry(&self) -> DataSourceRegistry {
        DataSourceRegistry::with_defaults(self.data.file.clone(), self.remote.clone())
    }
}
