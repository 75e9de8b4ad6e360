//! Binance REST kline history
//!
//! Splits a range into request-sized chunks, downloads them concurrently with
//! per-chunk retries, then de-duplicates and sorts the records. The async work
//! runs on a captured tokio handle (or an owned runtime) behind the blocking
//! [`DataSource`] face.

use super::{parse_time_frame, CsvEventWriter, DataRequest, DataSource, DataSourceError};
use crate::backtest::{DataType, Event, Kline, MarketData, MarketDataKind};
use crate::telemetry::{increment_counter, record_duration, CounterMetric, DurationMetric};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Binance spot REST base URL
pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// Largest page the klines endpoint serves
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

fn default_name() -> String {
    "binance".to_string()
}
fn default_base_url() -> String {
    BINANCE_API_URL.to_string()
}
fn default_chunk_size() -> usize {
    MAX_KLINES_PER_REQUEST
}
fn default_max_concurrency() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}

/// Configuration for the remote source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSourceConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Klines per request, capped at [`MAX_KLINES_PER_REQUEST`]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Requests in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts per chunk after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff, doubled on each retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RemoteSourceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            base_url: default_base_url(),
            chunk_size: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// One OHLCV candle as served by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineRecord {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

impl KlineRecord {
    pub fn to_event(&self, symbol: &str, venue: &str) -> Event {
        Event::market_data(
            self.open_time,
            MarketData {
                symbol: symbol.to_string(),
                venue: venue.to_string(),
                kind: MarketDataKind::Kline(Kline {
                    open: self.open,
                    high: self.high,
                    low: self.low,
                    close: self.close,
                    volume: self.volume,
                    close_time: Some(self.close_time),
                }),
            },
        )
    }

    /// Candle carried by a kline market data event
    pub fn from_event(event: &Event) -> Option<Self> {
        match &event.as_market_data()?.kind {
            MarketDataKind::Kline(k) => Some(Self {
                open_time: event.timestamp_ms(),
                open: k.open,
                high: k.high,
                low: k.low,
                close: k.close,
                volume: k.volume,
                close_time: k.close_time.unwrap_or_else(|| event.timestamp_ms()),
            }),
            _ => None,
        }
    }

    /// Parse one row of the klines array response
    fn from_row(row: &[Value]) -> Result<Self, DataSourceError> {
        let malformed = |what: &str| DataSourceError::Remote(format!("malformed kline row: {}", what));
        let int = |i: usize, name: &str| row.get(i).and_then(Value::as_i64).ok_or_else(|| malformed(name));
        let dec = |i: usize, name: &str| {
            row.get(i)
                .and_then(Value::as_str)
                .and_then(|s| Decimal::from_str(s).ok())
                .ok_or_else(|| malformed(name))
        };
        Ok(Self {
            open_time: int(0, "open_time")?,
            open: dec(1, "open")?,
            high: dec(2, "high")?,
            low: dec(3, "low")?,
            close: dec(4, "close")?,
            volume: dec(5, "volume")?,
            close_time: int(6, "close_time")?,
        })
    }
}

/// One fetched page
#[derive(Debug, Clone, Default)]
pub struct KlinePage {
    pub records: Vec<KlineRecord>,
    /// Response body size
    pub bytes: u64,
}

/// Async access to a kline API
#[async_trait]
pub trait KlineProvider: Send + Sync {
    /// Klines with open time in `[start_ms, end_ms]`, at most `limit`
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<KlinePage, DataSourceError>;

    /// Reachability check used by `connect`
    async fn ping(&self) -> Result<(), DataSourceError> {
        Ok(())
    }
}

/// Binance `/api/v3/klines` over reqwest
pub struct BinanceRestProvider {
    base_url: String,
    client: Client,
}

impl BinanceRestProvider {
    pub fn new(config: &RemoteSourceConfig) -> Result<Self, DataSourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DataSourceError::Remote(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl KlineProvider for BinanceRestProvider {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<KlinePage, DataSourceError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_ascii_uppercase()),
                ("interval", interval.to_string()),
                ("startTime", start_ms.to_string()),
                ("endTime", end_ms.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| DataSourceError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataSourceError::Remote(format!("Binance API error: {} - {}", status, body)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DataSourceError::Remote(e.to_string()))?;
        let rows: Vec<Vec<Value>> =
            serde_json::from_slice(&body).map_err(|e| DataSourceError::Remote(e.to_string()))?;
        let records = rows
            .iter()
            .map(|row| KlineRecord::from_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(KlinePage {
            records,
            bytes: body.len() as u64,
        })
    }

    async fn ping(&self) -> Result<(), DataSourceError> {
        let url = format!("{}/api/v3/ping", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DataSourceError::Remote(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DataSourceError::Remote(format!("ping failed: {}", response.status())))
        }
    }
}

/// Download lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a running download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub symbol: String,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub total_records: usize,
    pub downloaded_bytes: u64,
    /// Completed fraction in [0, 1]
    pub progress: f64,
    pub status: DownloadStatus,
}

impl DownloadProgress {
    fn new(symbol: &str, total_chunks: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            total_chunks,
            completed_chunks: 0,
            total_records: 0,
            downloaded_bytes: 0,
            progress: 0.0,
            status: DownloadStatus::Pending,
        }
    }
}

/// Download progress callback
pub type DownloadCallback = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

enum RuntimeBridge {
    Handle(tokio::runtime::Handle),
    Owned(tokio::runtime::Runtime),
}

impl RuntimeBridge {
    fn capture() -> Result<Self, DataSourceError> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Ok(RuntimeBridge::Handle(handle)),
            Err(_) => tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map(RuntimeBridge::Owned)
                .map_err(DataSourceError::Io),
        }
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        match self {
            RuntimeBridge::Handle(handle) => handle.block_on(future),
            RuntimeBridge::Owned(runtime) => runtime.block_on(future),
        }
    }
}

/// Historical klines from the Binance REST API
///
/// Construct inside a tokio runtime to reuse it; call the blocking methods
/// from `spawn_blocking` when already in async code.
pub struct BinanceHistoricalSource {
    config: RemoteSourceConfig,
    provider: Arc<dyn KlineProvider>,
    runtime: RuntimeBridge,
    connected: AtomicBool,
    progress_callback: Option<DownloadCallback>,
}

impl BinanceHistoricalSource {
    pub fn new(config: RemoteSourceConfig) -> Result<Self, DataSourceError> {
        let provider = Arc::new(BinanceRestProvider::new(&config)?);
        Self::with_provider(config, provider)
    }

    pub fn with_provider(
        config: RemoteSourceConfig,
        provider: Arc<dyn KlineProvider>,
    ) -> Result<Self, DataSourceError> {
        Ok(Self {
            config,
            provider,
            runtime: RuntimeBridge::capture()?,
            connected: AtomicBool::new(false),
            progress_callback: None,
        })
    }

    pub fn set_progress_callback(&mut self, callback: DownloadCallback) {
        self.progress_callback = Some(callback);
    }

    pub fn config(&self) -> &RemoteSourceConfig {
        &self.config
    }

    /// Sorted, de-duplicated klines for the request
    pub fn fetch_klines(&self, request: &DataRequest) -> Result<Vec<KlineRecord>, DataSourceError> {
        request.validate()?;
        if request.data_type != DataType::Kline {
            return Err(DataSourceError::UnsupportedDataType(request.data_type));
        }
        let interval_ms = parse_time_frame(&request.time_frame)?;
        self.runtime.block_on(self.fetch_range(request, interval_ms))
    }

    /// Download several symbols to `{dir}/{SYMBOL}_{tf}.csv`
    ///
    /// Symbols are fetched one after another; a failure is reported for that
    /// symbol and the batch continues.
    pub fn download_batch(
        &self,
        symbols: &[String],
        template: &DataRequest,
        dir: &Path,
    ) -> Vec<(String, Result<usize, DataSourceError>)> {
        symbols
            .iter()
            .map(|symbol| {
                let request = DataRequest {
                    symbol: symbol.to_ascii_uppercase(),
                    ..template.clone()
                };
                let path = dir.join(format!("{}_{}.csv", request.symbol, request.time_frame));
                let outcome = self.download_data(&request, &path);
                if let Err(e) = &outcome {
                    tracing::warn!(symbol = %request.symbol, error = %e, "Batch download failed");
                }
                (request.symbol, outcome)
            })
            .collect()
    }

    fn chunks(&self, request: &DataRequest, interval_ms: i64) -> Vec<(i64, i64)> {
        let per_request = self.config.chunk_size.clamp(1, MAX_KLINES_PER_REQUEST) as i64;
        let span = per_request.saturating_mul(interval_ms);
        let mut chunks = Vec::new();
        let mut start = request.start_time;
        while start <= request.end_time {
            let end = start.saturating_add(span - 1).min(request.end_time);
            chunks.push((start, end));
            start = end.saturating_add(1);
        }
        chunks
    }

    async fn fetch_range(&self, request: &DataRequest, interval_ms: i64) -> Result<Vec<KlineRecord>, DataSourceError> {
        let started = Instant::now();
        let chunks = self.chunks(request, interval_ms);
        let limit = self.config.chunk_size.clamp(1, MAX_KLINES_PER_REQUEST);
        let mut progress = DownloadProgress::new(&request.symbol, chunks.len());
        progress.status = DownloadStatus::Downloading;
        self.notify(&progress);

        tracing::info!(
            symbol = %request.symbol,
            interval = %request.time_frame,
            chunks = chunks.len(),
            concurrency = self.config.max_concurrency,
            "Starting kline download"
        );

        let mut pages = stream::iter(chunks)
            .map(|(start, end)| self.fetch_chunk(request, start, end, limit))
            .buffer_unordered(self.config.max_concurrency.max(1));

        let mut records = Vec::new();
        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    progress.status = DownloadStatus::Failed;
                    self.notify(&progress);
                    return Err(e);
                }
            };
            progress.completed_chunks += 1;
            progress.total_records += page.records.len();
            progress.downloaded_bytes += page.bytes;
            progress.progress = progress.completed_chunks as f64 / progress.total_chunks.max(1) as f64;
            tracing::debug!(
                symbol = %request.symbol,
                completed = progress.completed_chunks,
                total = progress.total_chunks,
                records = page.records.len(),
                "Chunk downloaded"
            );
            self.notify(&progress);
            records.extend(page.records);
        }

        records.retain(|r| request.contains(r.open_time));
        records.sort_by_key(|r| r.open_time);
        records.dedup_by_key(|r| r.open_time);

        progress.status = DownloadStatus::Completed;
        progress.progress = 1.0;
        progress.total_records = records.len();
        self.notify(&progress);

        increment_counter(CounterMetric::RecordsDownloaded, records.len() as u64);
        record_duration(DurationMetric::DataLoad, started.elapsed());
        tracing::info!(
            symbol = %request.symbol,
            records = records.len(),
            bytes = progress.downloaded_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Kline download complete"
        );
        Ok(records)
    }

    async fn fetch_chunk(&self, request: &DataRequest, start: i64, end: i64, limit: usize) -> Result<KlinePage, DataSourceError> {
        let mut attempt = 0u32;
        loop {
            match self
                .provider
                .fetch_klines(&request.symbol, &request.time_frame, start, end, limit)
                .await
            {
                Ok(page) => return Ok(page),
                Err(e) if attempt < self.config.max_retries => {
                    let delay = self.config.retry_delay_ms.saturating_mul(1u64 << attempt.min(10));
                    tracing::warn!(
                        symbol = %request.symbol,
                        start,
                        attempt = attempt + 1,
                        delay_ms = delay,
                        error = %e,
                        "Chunk download failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn notify(&self, progress: &DownloadProgress) {
        if let Some(callback) = &self.progress_callback {
            callback(progress);
        }
    }
}

impl DataSource for BinanceHistoricalSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn connect(&self) -> Result<(), DataSourceError> {
        self.runtime.block_on(self.provider.ping())?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(source = %self.config.name, "Remote source connected");
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_data(&self, request: &DataRequest) -> Result<Vec<Event>, DataSourceError> {
        if !self.is_connected() {
            return Err(DataSourceError::NotConnected(self.config.name.clone()));
        }
        let records = self.fetch_klines(request)?;
        Ok(records
            .iter()
            .map(|r| r.to_event(&request.symbol, &self.config.name))
            .collect())
    }

    fn download_data(&self, request: &DataRequest, sink: &Path) -> Result<usize, DataSourceError> {
        let records = self.fetch_klines(request)?;
        let mut writer = CsvEventWriter::create(sink, DataType::Kline)?;
        for record in &records {
            writer.write(&record.to_event(&request.symbol, &self.config.name))?;
        }
        let rows = writer.finish()?;
        tracing::info!(symbol = %request.symbol, rows, path = %sink.display(), "Klines saved");
        Ok(rows)
    }
}
