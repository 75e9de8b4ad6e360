//! CSV file data source
//!
//! Supported layouts (timestamps in ms):
//! - Trade: `timestamp,symbol,side,price,quantity[,fee]`
//! - OHLCV: `timestamp,open,high,low,close,volume[,close_time]`
//! - Book: `timestamp,bid_price,bid_qty,ask_price,ask_qty`
//!
//! The layout is detected from the header row, or from the column shape of
//! the first row when the file has no header.

use super::{DataRequest, DataSource, DataSourceError, MAX_RECORDED_ERRORS};
use crate::backtest::{
    BookTicker, DataType, Event, Kline, MarketData, MarketDataKind, Side, TradeTick,
};
use crate::telemetry::{increment_counter, record_duration, CounterMetric, DurationMetric};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Row layout of a CSV file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Trade,
    Ohlcv,
    Book,
}

impl FileFormat {
    pub fn data_type(&self) -> DataType {
        match self {
            FileFormat::Trade => DataType::Trade,
            FileFormat::Ohlcv => DataType::Kline,
            FileFormat::Book => DataType::Book,
        }
    }

    /// Detect from header names
    pub fn from_header(header: &csv::StringRecord) -> Option<Self> {
        let has = |name: &str| header.iter().any(|h| h.trim().eq_ignore_ascii_case(name));
        if has("open") && has("high") && has("low") && has("close") {
            Some(FileFormat::Ohlcv)
        } else if has("bid_price") && has("ask_price") {
            Some(FileFormat::Book)
        } else if has("side") && has("price") {
            Some(FileFormat::Trade)
        } else {
            None
        }
    }

    /// Detect from the shape of a data row
    pub fn from_shape(row: &csv::StringRecord) -> Option<Self> {
        if row.get(0).map(|t| t.trim().parse::<i64>().is_err()).unwrap_or(true) {
            return None;
        }
        if matches!(row.len(), 5 | 6) && row.get(2).map(|s| s.parse::<Side>().is_ok()).unwrap_or(false) {
            return Some(FileFormat::Trade);
        }
        match row.len() {
            5 => Some(FileFormat::Book),
            6 | 7 => Some(FileFormat::Ohlcv),
            _ => None,
        }
    }
}

fn check_layout(format: FileFormat, expected: Option<DataType>) -> Result<(), DataSourceError> {
    match expected {
        Some(data_type) if format.data_type() != data_type => {
            Err(DataSourceError::UnsupportedDataType(data_type))
        }
        _ => Ok(()),
    }
}

/// What to do with a row that fails validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRowPolicy {
    /// Count it and continue
    #[default]
    Skip,
    /// Abort the load
    Fail,
}

/// Outcome of a file load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseStats {
    pub total_rows: u64,
    pub valid_rows: u64,
    pub invalid_rows: u64,
    pub parse_time: Duration,
    /// First few row errors, as `line N: reason`
    pub errors: Vec<String>,
}

impl ParseStats {
    fn record_error(&mut self, line: u64, reason: &str) {
        self.invalid_rows += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(format!("line {}: {}", line, reason));
        }
    }

    /// Fold another file's stats into this one
    pub fn merge(&mut self, other: ParseStats) {
        self.total_rows += other.total_rows;
        self.valid_rows += other.valid_rows;
        self.invalid_rows += other.invalid_rows;
        self.parse_time += other.parse_time;
        let room = MAX_RECORDED_ERRORS.saturating_sub(self.errors.len());
        self.errors.extend(other.errors.into_iter().take(room));
    }
}

fn default_name() -> String {
    "file".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_delimiter() -> char {
    ','
}
fn default_true() -> bool {
    true
}
fn default_venue() -> String {
    "csv".to_string()
}

/// Configuration for [`FileDataSource`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSourceConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Directory searched for `{SYMBOL}_{tf}.csv` / `{SYMBOL}.csv`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Explicit files; when set, no lookup in `data_dir` happens
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_true")]
    pub has_header: bool,
    /// Stop reading a file after this many data rows
    #[serde(default)]
    pub max_rows: Option<u64>,
    #[serde(default)]
    pub invalid_rows: InvalidRowPolicy,
    /// Venue tag applied to every event
    #[serde(default = "default_venue")]
    pub venue: String,
    /// Symbol for layouts without a symbol column
    #[serde(default)]
    pub market: Option<String>,
    /// Force a layout instead of detecting it
    #[serde(default)]
    pub format: Option<FileFormat>,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            paths: Vec::new(),
            delimiter: default_delimiter(),
            has_header: true,
            max_rows: None,
            invalid_rows: InvalidRowPolicy::Skip,
            venue: default_venue(),
            market: None,
            format: None,
        }
    }
}

impl FileSourceConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}

/// Column positions for one layout
#[derive(Debug, Clone, Copy)]
struct Columns {
    format: FileFormat,
    idx: [Option<usize>; 7],
}

impl Columns {
    const TRADE: [&'static [&'static str]; 6] = [
        &["timestamp", "time", "ts"],
        &["symbol", "market"],
        &["side"],
        &["price"],
        &["quantity", "qty", "amount", "size"],
        &["fee"],
    ];
    const OHLCV: [&'static [&'static str]; 7] = [
        &["timestamp", "open_time", "time", "ts"],
        &["open"],
        &["high"],
        &["low"],
        &["close"],
        &["volume", "vol"],
        &["close_time"],
    ];
    const BOOK: [&'static [&'static str]; 5] = [
        &["timestamp", "time", "ts"],
        &["bid_price"],
        &["bid_qty", "bid_quantity", "bid_size"],
        &["ask_price"],
        &["ask_qty", "ask_quantity", "ask_size"],
    ];

    fn names(format: FileFormat) -> &'static [&'static [&'static str]] {
        match format {
            FileFormat::Trade => &Self::TRADE,
            FileFormat::Ohlcv => &Self::OHLCV,
            FileFormat::Book => &Self::BOOK,
        }
    }

    fn positional(format: FileFormat) -> Self {
        let mut idx = [None; 7];
        for (i, slot) in idx.iter_mut().enumerate().take(Self::names(format).len()) {
            *slot = Some(i);
        }
        Self { format, idx }
    }

    fn from_header(format: FileFormat, header: &csv::StringRecord) -> Self {
        let mut idx = [None; 7];
        for (slot, aliases) in idx.iter_mut().zip(Self::names(format)) {
            *slot = header
                .iter()
                .position(|h| aliases.iter().any(|a| h.trim().eq_ignore_ascii_case(a)));
        }
        Self { format, idx }
    }
}

fn field<'r>(row: &'r csv::StringRecord, cols: &Columns, i: usize, name: &str) -> Result<&'r str, String> {
    cols.idx[i]
        .and_then(|pos| row.get(pos))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing {}", name))
}

fn optional<'r>(row: &'r csv::StringRecord, cols: &Columns, i: usize) -> Option<&'r str> {
    cols.idx[i]
        .and_then(|pos| row.get(pos))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn decimal(row: &csv::StringRecord, cols: &Columns, i: usize, name: &str) -> Result<Decimal, String> {
    let raw = field(row, cols, i, name)?;
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| format!("invalid {}: {}", name, raw))
}

fn timestamp(row: &csv::StringRecord, cols: &Columns) -> Result<i64, String> {
    let raw = field(row, cols, 0, "timestamp")?;
    let ts: i64 = raw.parse().map_err(|_| format!("invalid timestamp: {}", raw))?;
    if ts < 0 {
        return Err(format!("negative timestamp: {}", ts));
    }
    Ok(ts)
}

/// Parse and validate one row into `(timestamp_ms, symbol, kind)`
fn parse_row(
    row: &csv::StringRecord,
    cols: &Columns,
    symbol_hint: &str,
) -> Result<(i64, String, MarketDataKind), String> {
    let ts = timestamp(row, cols)?;
    match cols.format {
        FileFormat::Trade => {
            let symbol = optional(row, cols, 1).unwrap_or(symbol_hint).to_string();
            let side: Side = field(row, cols, 2, "side")?.parse()?;
            let price = decimal(row, cols, 3, "price")?;
            let quantity = decimal(row, cols, 4, "quantity")?;
            let fee = match optional(row, cols, 5) {
                Some(_) => Some(decimal(row, cols, 5, "fee")?),
                None => None,
            };
            if price <= Decimal::ZERO {
                return Err(format!("price must be positive, got {}", price));
            }
            if quantity <= Decimal::ZERO {
                return Err(format!("quantity must be positive, got {}", quantity));
            }
            Ok((ts, symbol, MarketDataKind::Trade(TradeTick { side, price, quantity, fee })))
        }
        FileFormat::Ohlcv => {
            let open = decimal(row, cols, 1, "open")?;
            let high = decimal(row, cols, 2, "high")?;
            let low = decimal(row, cols, 3, "low")?;
            let close = decimal(row, cols, 4, "close")?;
            let volume = decimal(row, cols, 5, "volume")?;
            let close_time = match optional(row, cols, 6) {
                Some(raw) => Some(raw.parse::<i64>().map_err(|_| format!("invalid close_time: {}", raw))?),
                None => None,
            };
            if high < low {
                return Err(format!("high {} below low {}", high, low));
            }
            if [open, high, low, close].iter().any(|p| *p <= Decimal::ZERO) {
                return Err("prices must be positive".to_string());
            }
            if volume < Decimal::ZERO {
                return Err(format!("negative volume: {}", volume));
            }
            Ok((
                ts,
                symbol_hint.to_string(),
                MarketDataKind::Kline(Kline { open, high, low, close, volume, close_time }),
            ))
        }
        FileFormat::Book => {
            let bid_price = decimal(row, cols, 1, "bid_price")?;
            let bid_qty = decimal(row, cols, 2, "bid_qty")?;
            let ask_price = decimal(row, cols, 3, "ask_price")?;
            let ask_qty = decimal(row, cols, 4, "ask_qty")?;
            if bid_price <= Decimal::ZERO || ask_price <= Decimal::ZERO {
                return Err("prices must be positive".to_string());
            }
            if bid_price > ask_price {
                return Err(format!("crossed book: bid {} above ask {}", bid_price, ask_price));
            }
            if bid_qty < Decimal::ZERO || ask_qty < Decimal::ZERO {
                return Err("negative quantity".to_string());
            }
            Ok((
                ts,
                symbol_hint.to_string(),
                MarketDataKind::Book(BookTicker { bid_price, bid_qty, ask_price, ask_qty }),
            ))
        }
    }
}

/// Symbol implied by a file name such as `BTCUSDT_1m.csv`
fn symbol_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('_').next())
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Reads market history from CSV files
#[derive(Debug)]
pub struct FileDataSource {
    config: FileSourceConfig,
    connected: AtomicBool,
    last_stats: Mutex<ParseStats>,
}

impl FileDataSource {
    pub fn new(config: FileSourceConfig) -> Self {
        Self {
            config,
            connected: AtomicBool::new(false),
            last_stats: Mutex::new(ParseStats::default()),
        }
    }

    pub fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    /// Stats of the most recent `get_data` or `stream_file` call
    pub fn last_stats(&self) -> ParseStats {
        match self.last_stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Load one file, ascending by time
    pub fn load_file(&self, path: &Path) -> Result<(Vec<Event>, ParseStats), DataSourceError> {
        let hint = self.symbol_hint(path);
        let mut events = Vec::new();
        let stats = self.read(path, &hint, None, |event| {
            events.push(event);
            true
        })?;
        events.sort_by_key(|e| e.timestamp_ns);
        Ok((events, stats))
    }

    /// Load several files merged into one stable time order
    pub fn load_files(&self, paths: &[PathBuf]) -> Result<(Vec<Event>, ParseStats), DataSourceError> {
        let mut events = Vec::new();
        let mut stats = ParseStats::default();
        for path in paths {
            let (mut loaded, file_stats) = self.load_file(path)?;
            events.append(&mut loaded);
            stats.merge(file_stats);
        }
        events.sort_by_key(|e| e.timestamp_ns);
        Ok((events, stats))
    }

    /// Feed rows to `on_event` in file order until it returns false
    ///
    /// Returns the number of events delivered.
    pub fn stream_file<F>(&self, path: &Path, mut on_event: F) -> Result<usize, DataSourceError>
    where
        F: FnMut(Event) -> bool,
    {
        let hint = self.symbol_hint(path);
        let mut delivered = 0usize;
        let stats = self.read(path, &hint, None, |event| {
            delivered += 1;
            on_event(event)
        })?;
        self.store_stats(stats);
        Ok(delivered)
    }

    fn store_stats(&self, stats: ParseStats) {
        match self.last_stats.lock() {
            Ok(mut last) => *last = stats,
            Err(poisoned) => *poisoned.into_inner() = stats,
        }
    }

    /// Files a request reads from
    pub fn resolve_paths(&self, request: &DataRequest) -> Result<Vec<PathBuf>, DataSourceError> {
        if !self.config.paths.is_empty() {
            return Ok(self.config.paths.clone());
        }
        let symbol = request.symbol.to_ascii_uppercase();
        let candidates = [
            self.config
                .data_dir
                .join(format!("{}_{}.csv", symbol, request.time_frame)),
            self.config.data_dir.join(format!("{}.csv", symbol)),
        ];
        candidates
            .into_iter()
            .find(|p| p.is_file())
            .map(|p| vec![p])
            .ok_or_else(|| DataSourceError::NotFound {
                symbol,
                dir: self.config.data_dir.clone(),
            })
    }

    fn symbol_hint(&self, path: &Path) -> String {
        self.config
            .market
            .clone()
            .unwrap_or_else(|| symbol_from_path(path))
    }

    fn reader(&self, path: &Path) -> Result<csv::Reader<std::fs::File>, DataSourceError> {
        let delimiter = u8::try_from(self.config.delimiter)
            .map_err(|_| DataSourceError::UnknownFormat(format!("delimiter {:?}", self.config.delimiter)))?;
        Ok(csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(self.config.has_header)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?)
    }

    /// Shared row loop: detect layout, validate rows, apply the policy
    ///
    /// With `expected` set, a file whose layout carries another data type
    /// fails before any row reaches `on_event`.
    fn read<F>(
        &self,
        path: &Path,
        symbol_hint: &str,
        expected: Option<DataType>,
        mut on_event: F,
    ) -> Result<ParseStats, DataSourceError>
    where
        F: FnMut(Event) -> bool,
    {
        let started = Instant::now();
        let mut reader = self.reader(path)?;
        let mut stats = ParseStats::default();
        let mut columns = if self.config.has_header {
            let header = reader.headers()?.clone();
            let format = self
                .config
                .format
                .or_else(|| FileFormat::from_header(&header))
                .ok_or_else(|| DataSourceError::UnknownFormat(path.display().to_string()))?;
            check_layout(format, expected)?;
            Some(Columns::from_header(format, &header))
        } else {
            if let Some(format) = self.config.format {
                check_layout(format, expected)?;
            }
            self.config.format.map(Columns::positional)
        };

        let mut record = csv::StringRecord::new();
        loop {
            if self.config.max_rows.is_some_and(|cap| stats.total_rows >= cap) {
                break;
            }
            if !reader.read_record(&mut record)? {
                break;
            }
            stats.total_rows += 1;
            let line = record.position().map(|p| p.line()).unwrap_or(stats.total_rows);

            let cols = match columns {
                Some(cols) => cols,
                None => {
                    let format = FileFormat::from_shape(&record)
                        .ok_or_else(|| DataSourceError::UnknownFormat(path.display().to_string()))?;
                    check_layout(format, expected)?;
                    let cols = Columns::positional(format);
                    columns = Some(cols);
                    cols
                }
            };

            match parse_row(&record, &cols, symbol_hint) {
                Ok((ts, symbol, kind)) => {
                    stats.valid_rows += 1;
                    let event = Event::market_data(
                        ts,
                        MarketData {
                            symbol,
                            venue: self.config.venue.clone(),
                            kind,
                        },
                    );
                    if !on_event(event) {
                        break;
                    }
                }
                Err(reason) => match self.config.invalid_rows {
                    InvalidRowPolicy::Fail => {
                        return Err(DataSourceError::InvalidRow { line, reason });
                    }
                    InvalidRowPolicy::Skip => {
                        tracing::debug!(line, reason = %reason, "Skipping invalid row");
                        stats.record_error(line, &reason);
                    }
                },
            }
        }

        stats.parse_time = started.elapsed();
        if stats.invalid_rows > 0 {
            increment_counter(CounterMetric::RowsSkipped, stats.invalid_rows);
            tracing::warn!(
                path = %path.display(),
                invalid_rows = stats.invalid_rows,
                first_error = stats.errors.first().map(String::as_str).unwrap_or(""),
                "Skipped invalid rows"
            );
        }
        tracing::debug!(
            path = %path.display(),
            format = ?columns.map(|c| c.format),
            total_rows = stats.total_rows,
            valid_rows = stats.valid_rows,
            "File parsed"
        );
        Ok(stats)
    }
}

impl DataSource for FileDataSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn connect(&self) -> Result<(), DataSourceError> {
        if self.config.paths.is_empty() && !self.config.data_dir.is_dir() {
            return Err(DataSourceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("data directory {} does not exist", self.config.data_dir.display()),
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(source = %self.config.name, "File source connected");
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_data(&self, request: &DataRequest) -> Result<Vec<Event>, DataSourceError> {
        request.validate()?;
        if !self.is_connected() {
            return Err(DataSourceError::NotConnected(self.config.name.clone()));
        }
        let started = Instant::now();
        let paths = self.resolve_paths(request)?;
        let hint = self
            .config
            .market
            .clone()
            .unwrap_or_else(|| request.symbol.to_ascii_uppercase());

        let mut events = Vec::new();
        let mut stats = ParseStats::default();
        for path in &paths {
            let file_stats = self.read(path, &hint, Some(request.data_type), |event| {
                let keep = request.contains(event.timestamp_ms())
                    && event
                        .as_market_data()
                        .map(|d| d.symbol.eq_ignore_ascii_case(&request.symbol))
                        .unwrap_or(true);
                if keep {
                    events.push(event);
                }
                true
            })?;
            stats.merge(file_stats);
        }
        events.sort_by_key(|e| e.timestamp_ns);

        record_duration(DurationMetric::DataLoad, started.elapsed());
        tracing::info!(
            source = %self.config.name,
            symbol = %request.symbol,
            files = paths.len(),
            events = events.len(),
            invalid_rows = stats.invalid_rows,
            "Historical data loaded"
        );
        self.store_stats(stats);
        Ok(events)
    }

    fn download_data(&self, request: &DataRequest, sink: &Path) -> Result<usize, DataSourceError> {
        let events = self.get_data(request)?;
        super::write_events_csv(&events, sink)
    }
}
