//! Historical data module
//!
//! Sources that turn stored or downloaded market history into engine events:
//! CSV files, the Binance REST kline API, and pre-loaded memory.

mod file;
mod memory;
mod registry;
mod remote;
mod validator;
mod writer;

pub use file::{FileDataSource, FileFormat, FileSourceConfig, InvalidRowPolicy, ParseStats};
pub use memory::InMemoryDataSource;
pub use registry::{DataSourceConstructor, DataSourceRegistry};
pub use remote::{
    BinanceHistoricalSource, BinanceRestProvider, DownloadCallback, DownloadProgress,
    DownloadStatus, KlinePage, KlineProvider, KlineRecord, RemoteSourceConfig, BINANCE_API_URL,
    MAX_KLINES_PER_REQUEST,
};
pub use validator::{validate_klines, KlineIssue, ValidationReport};
pub use writer::{write_events_csv, CsvEventWriter};

use crate::backtest::{BacktestConfig, ConfigError, DataType, Event};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of row errors kept in [`ParseStats`]
pub const MAX_RECORDED_ERRORS: usize = 20;

/// Data source errors
#[derive(Debug, Error)]
pub enum DataSourceError {
    /// Request failed validation before any I/O
    #[error(transparent)]
    InvalidRequest(#[from] ConfigError),
    /// Source is not connected
    #[error("data source {0} is not connected")]
    NotConnected(String),
    /// No file could be resolved for a request
    #[error("no data file found for {symbol} in {dir}")]
    NotFound { symbol: String, dir: PathBuf },
    /// Data type not supported by this source
    #[error("data type {0} is not supported by this source")]
    UnsupportedDataType(DataType),
    /// Format could not be detected
    #[error("unrecognized file format: {0}")]
    UnknownFormat(String),
    /// A row failed validation under the `Fail` policy
    #[error("invalid row {line}: {reason}")]
    InvalidRow { line: u64, reason: String },
    /// Unknown time frame string
    #[error("invalid time frame: {0}")]
    InvalidTimeFrame(String),
    /// Remote API failure
    #[error("remote request failed: {0}")]
    Remote(String),
    /// No source registered under an id
    #[error("unknown data source: {0}")]
    UnknownSource(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A time-bounded slice of history for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub symbol: String,
    /// Inclusive start (ms)
    pub start_time: i64,
    /// Inclusive end (ms)
    pub end_time: i64,
    pub data_type: DataType,
    /// Bar interval, e.g. "1m"
    pub time_frame: String,
}

impl DataRequest {
    pub fn new(symbol: impl Into<String>, start_time: i64, end_time: i64) -> Self {
        Self {
            symbol: symbol.into(),
            start_time,
            end_time,
            data_type: DataType::Kline,
            time_frame: "1m".to_string(),
        }
    }

    /// Request covering a run's window
    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            start_time: config.start_time,
            end_time: config.end_time,
            data_type: config.data_type,
            time_frame: config.time_frame.clone(),
        }
    }

    /// Reject empty symbols and empty or inverted ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.end_time <= self.start_time {
            return Err(ConfigError::InvalidTimeRange {
                start: self.start_time,
                end: self.end_time,
            });
        }
        Ok(())
    }

    /// Whether a millisecond timestamp falls inside the inclusive range
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_time && timestamp_ms <= self.end_time
    }
}

/// Trait for historical data providers
///
/// Methods are blocking. Sources backed by async I/O bridge to their own
/// runtime; async callers should use `spawn_blocking`.
pub trait DataSource: Send + Sync {
    /// Source identifier
    fn name(&self) -> &str;

    fn connect(&self) -> Result<(), DataSourceError>;

    /// Idempotent
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Events for the request, ascending by time, inclusive range
    fn get_data(&self, request: &DataRequest) -> Result<Vec<Event>, DataSourceError>;

    /// Persist the range as CSV readable by [`FileDataSource`]; returns rows written
    fn download_data(&self, request: &DataRequest, sink: &Path) -> Result<usize, DataSourceError>;
}

/// Milliseconds in a time frame such as `1m`, `4h`, `1d`, `1w`
pub fn parse_time_frame(time_frame: &str) -> Result<i64, DataSourceError> {
    let tf = time_frame.trim();
    let invalid = || DataSourceError::InvalidTimeFrame(time_frame.to_string());
    if tf.len() < 2 {
        return Err(invalid());
    }
    let (count, unit) = tf.split_at(tf.len() - 1);
    let count: i64 = count.parse().map_err(|_| invalid())?;
    if count <= 0 {
        return Err(invalid());
    }
    let unit_ms = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return Err(invalid()),
    };
    Ok(count * unit_ms)
}
