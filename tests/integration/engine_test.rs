//! Engine lifecycle, accounting and throughput

use crate::common::{config, memory_source, wave_events, BAR_MS, SYMBOL};
use quant_replay::backtest::{BacktestEngine, EngineState, Side};
use quant_replay::data::InMemoryDataSource;
use quant_replay::strategy::StrategyRegistry;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sma_run(n: usize) -> quant_replay::backtest::BacktestResult {
    let cfg = config("sma_cross", n)
        .with_parameter("fast_period", 5.0)
        .with_parameter("slow_period", 20.0);
    let strategy = StrategyRegistry::with_builtins()
        .create(&cfg.strategy_name, &cfg.parameters)
        .unwrap();
    BacktestEngine::run_to_completion(cfg, strategy, memory_source(n)).unwrap()
}

#[test]
fn test_sma_cross_trades_and_counts() {
    let result = sma_run(2_000);

    assert_eq!(result.symbol, SYMBOL);
    assert!(result.events_processed >= 2_000);
    assert!(result.trade_count > 0);
    assert_eq!(result.trade_count, result.trades.len());
    assert_eq!(result.trade_count, result.win_count + result.lose_count);
    assert!((0.0..=1.0).contains(&result.win_rate));
    assert!(result.max_drawdown >= 0.0);

    // Long-only: every sell closes quantity bought earlier
    let mut position = Decimal::ZERO;
    for trade in &result.trades {
        match trade.side {
            Side::Buy => position += trade.quantity,
            Side::Sell => position -= trade.quantity,
        }
        assert!(position >= Decimal::ZERO);
    }
}

#[test]
fn test_runs_are_deterministic() {
    let a = sma_run(1_500);
    let b = sma_run(1_500);
    // Strategy instance ids differ between runs
    let fills = |r: &quant_replay::backtest::BacktestResult| {
        r.trades
            .iter()
            .map(|t| (t.timestamp, t.side, t.price, t.quantity, t.pnl))
            .collect::<Vec<_>>()
    };
    assert_eq!(fills(&a), fills(&b));
    assert_eq!(a.final_balance, b.final_balance);
    assert_eq!(a.sharpe_ratio.to_bits(), b.sharpe_ratio.to_bits());
}

#[test]
fn test_window_excludes_out_of_range_events() {
    let n = 500;
    let mut cfg = config("sma_cross", n);
    // Only the second half of the bars
    cfg.start_time = BAR_MS * 251;
    let strategy = StrategyRegistry::with_builtins()
        .create(&cfg.strategy_name, &cfg.parameters)
        .unwrap();
    let source = Arc::new(InMemoryDataSource::new("memory", wave_events(n)));

    let mut engine = BacktestEngine::new().with_progress_interval(0);
    engine.initialize(cfg).unwrap();
    engine.set_strategy(strategy).unwrap();
    engine.set_data_source(source).unwrap();
    engine.run().unwrap();

    assert_eq!(engine.state(), EngineState::Completed);
    assert!(engine
        .trades()
        .iter()
        .all(|t| t.timestamp >= BAR_MS * 251));
    assert!(engine.stats().events_processed >= 250);
}

#[test]
fn test_throughput_100k_events() {
    let n = 100_000;
    let events = wave_events(n);
    let cfg = config("sma_cross", n)
        .with_parameter("fast_period", 10.0)
        .with_parameter("slow_period", 50.0);
    let strategy = StrategyRegistry::with_builtins()
        .create(&cfg.strategy_name, &cfg.parameters)
        .unwrap();
    let source = Arc::new(InMemoryDataSource::new("memory", events));

    let started = Instant::now();
    let result = BacktestEngine::run_to_completion(cfg, strategy, source).unwrap();
    let elapsed = started.elapsed();

    assert!(result.events_processed >= n as u64);
    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
}
