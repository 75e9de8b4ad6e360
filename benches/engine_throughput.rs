//! Benchmarks for engine replay and queue throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use quant_replay::backtest::{
    BacktestConfig, BacktestEngine, Event, EventQueue, Kline, MarketData, MarketDataKind,
};
use quant_replay::data::{DataSource, InMemoryDataSource};
use quant_replay::strategy::StrategyRegistry;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

const BAR_MS: i64 = 60_000;

fn events(n: usize) -> Vec<Event> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            let close = Decimal::try_from(100.0 + 10.0 * (x / 15.0).sin())
                .unwrap_or(Decimal::ONE_HUNDRED)
                .round_dp(2);
            Event::market_data(
                BAR_MS * (i as i64 + 1),
                MarketData {
                    symbol: "BTCUSDT".to_string(),
                    venue: "bench".to_string(),
                    kind: MarketDataKind::Kline(Kline {
                        open: close,
                        high: close + dec!(0.5),
                        low: close - dec!(0.5),
                        close,
                        volume: dec!(1),
                        close_time: None,
                    }),
                },
            )
        })
        .collect()
}

fn benchmark_sma_replay(c: &mut Criterion) {
    let n = 100_000;
    let source: Arc<dyn DataSource> = Arc::new(InMemoryDataSource::new("bench", events(n)));
    let registry = StrategyRegistry::with_builtins();
    let config = BacktestConfig::new("sma_cross", "BTCUSDT", 0, BAR_MS * (n as i64 + 1), dec!(10000))
        .with_parameter("fast_period", 10.0)
        .with_parameter("slow_period", 50.0);

    let mut group = c.benchmark_group("engine");
    group.sample_size(10);
    group.throughput(Throughput::Elements(n as u64));
    group.bench_function("sma_cross_100k_klines", |b| {
        b.iter(|| {
            let strategy = registry
                .create(&config.strategy_name, &config.parameters)
                .unwrap();
            BacktestEngine::run_to_completion(black_box(config.clone()), strategy, source.clone()).unwrap()
        })
    });
    group.finish();
}

fn benchmark_queue(c: &mut Criterion) {
    let batch = events(10_000);

    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("push_pop_10k", |b| {
        b.iter(|| {
            let mut queue = EventQueue::new();
            for event in batch.iter().rev() {
                queue.push(event.clone());
            }
            let mut drained = 0;
            while queue.pop().is_some() {
                drained += 1;
            }
            black_box(drained)
        })
    });
    group.finish();
}

criterion_group!(benches, benchmark_sma_replay, benchmark_queue);
criterion_main!(benches);
