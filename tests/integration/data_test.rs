//! Data loading through the file, memory and remote sources

use crate::common::{config, wave_events, BAR_MS, SYMBOL};
use async_trait::async_trait;
use quant_replay::backtest::{BacktestEngine, DataType};
use quant_replay::cli::validate_file;
use quant_replay::data::{
    write_events_csv, BinanceHistoricalSource, DataRequest, DataSource, DataSourceError,
    DataSourceRegistry, FileSourceConfig, InMemoryDataSource, KlinePage, KlineProvider,
    KlineRecord, RemoteSourceConfig,
};
use quant_replay::strategy::StrategyRegistry;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// One flat candle per minute
struct StaticProvider;

#[async_trait]
impl KlineProvider for StaticProvider {
    async fn fetch_klines(
        &self,
        _symbol: &str,
        _interval: &str,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<KlinePage, DataSourceError> {
        let first = (start_ms + BAR_MS - 1) / BAR_MS * BAR_MS;
        let records: Vec<KlineRecord> = (0..)
            .map(|i| first + i * BAR_MS)
            .take_while(|t| *t <= end_ms)
            .take(limit)
            .map(|t| KlineRecord {
                open_time: t,
                open: dec!(20),
                high: dec!(21),
                low: dec!(19),
                close: dec!(20.5),
                volume: dec!(7),
                close_time: t + BAR_MS - 1,
            })
            .collect();
        Ok(KlinePage {
            bytes: records.len() as u64 * 64,
            records,
        })
    }
}

fn registry(dir: &std::path::Path) -> DataSourceRegistry {
    DataSourceRegistry::with_defaults(
        FileSourceConfig::with_data_dir(dir),
        RemoteSourceConfig::default(),
    )
}

#[test]
fn test_file_source_loads_written_history() {
    let dir = tempfile::tempdir().unwrap();
    let events = wave_events(300);
    let written = write_events_csv(&events, &dir.path().join(format!("{}_1m.csv", SYMBOL))).unwrap();
    assert_eq!(written, 300);

    let source = registry(dir.path()).create("file").unwrap();
    source.connect().unwrap();
    let request = DataRequest::new(SYMBOL, BAR_MS * 101, BAR_MS * 200);
    let loaded = source.get_data(&request).unwrap();

    assert_eq!(loaded.len(), 100);
    assert!(loaded.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
    assert_eq!(loaded[0].timestamp_ms(), BAR_MS * 101);
    assert_eq!(
        loaded[0].as_market_data().map(|d| d.price()),
        events[100].as_market_data().map(|d| d.price())
    );
}

#[test]
fn test_file_and_memory_runs_match() {
    let dir = tempfile::tempdir().unwrap();
    let n = 800;
    write_events_csv(&wave_events(n), &dir.path().join(format!("{}_1m.csv", SYMBOL))).unwrap();

    let run = |source: Arc<dyn DataSource>| {
        let cfg = config("sma_cross", n)
            .with_parameter("fast_period", 4.0)
            .with_parameter("slow_period", 16.0);
        let strategy = StrategyRegistry::with_builtins()
            .create(&cfg.strategy_name, &cfg.parameters)
            .unwrap();
        BacktestEngine::run_to_completion(cfg, strategy, source).unwrap()
    };
    let from_file = registry(dir.path()).create("file").unwrap();
    from_file.connect().unwrap();
    let a = run(from_file);
    let b = run(Arc::new(InMemoryDataSource::new("memory", wave_events(n))));

    assert_eq!(a.trade_count, b.trade_count);
    assert_eq!(a.final_balance, b.final_balance);
}

#[test]
fn test_file_source_requires_connect() {
    let dir = tempfile::tempdir().unwrap();
    let source = registry(dir.path()).create("file").unwrap();
    let err = source
        .get_data(&DataRequest::new(SYMBOL, 0, BAR_MS))
        .unwrap_err();
    assert!(matches!(err, DataSourceError::NotConnected(_)));
}

#[test]
fn test_unknown_source_id() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        registry(dir.path()).create("parquet"),
        Err(DataSourceError::UnknownSource(_))
    ));
}

#[test]
fn test_remote_download_round_trips_through_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let remote = BinanceHistoricalSource::with_provider(
        RemoteSourceConfig {
            chunk_size: 50,
            ..Default::default()
        },
        Arc::new(StaticProvider),
    )
    .unwrap();

    let mut template = DataRequest::new("", 0, BAR_MS * 239);
    template.data_type = DataType::Kline;
    let outcomes = remote.download_batch(&["ethusdt".to_string()], &template, dir.path());
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, "ETHUSDT");
    assert_eq!(*outcomes[0].1.as_ref().unwrap(), 240);

    let path = dir.path().join("ETHUSDT_1m.csv");
    let (report, stats) = validate_file(&FileSourceConfig::default(), &path).unwrap();
    assert!(report.is_valid());
    assert_eq!(report.total_records, 240);
    assert_eq!(stats.invalid_rows, 0);

    let file = registry(dir.path()).create("file").unwrap();
    file.connect().unwrap();
    let events = file
        .get_data(&DataRequest::new("ETHUSDT", 0, BAR_MS * 239))
        .unwrap();
    assert_eq!(events.len(), 240);
}
