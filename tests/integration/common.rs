//! Shared fixtures

use quant_replay::backtest::{BacktestConfig, Event, Kline, MarketData, MarketDataKind};
use quant_replay::data::{DataSource, InMemoryDataSource};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const SYMBOL: &str = "BTCUSDT";
pub const BAR_MS: i64 = 60_000;

pub fn kline(timestamp_ms: i64, close: Decimal) -> Event {
    Event::market_data(
        timestamp_ms,
        MarketData {
            symbol: SYMBOL.to_string(),
            venue: "test".to_string(),
            kind: MarketDataKind::Kline(Kline {
                open: close,
                high: close + dec!(0.5),
                low: close - dec!(0.5),
                close,
                volume: dec!(10),
                close_time: Some(timestamp_ms + BAR_MS - 1),
            }),
        },
    )
}

/// Oscillating closes around 100 so moving-average strategies trade
pub fn wave_prices(n: usize) -> Vec<Decimal> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            let price = 100.0 + 10.0 * (x / 15.0).sin() + 3.0 * (x / 4.0).sin();
            Decimal::try_from(price).unwrap().round_dp(2)
        })
        .collect()
}

pub fn wave_events(n: usize) -> Vec<Event> {
    wave_prices(n)
        .into_iter()
        .enumerate()
        .map(|(i, price)| kline(BAR_MS * (i as i64 + 1), price))
        .collect()
}

pub fn memory_source(n: usize) -> Arc<dyn DataSource> {
    Arc::new(InMemoryDataSource::new("memory", wave_events(n)))
}

/// Window that covers `n` bars of [`wave_events`]
pub fn config(strategy: &str, n: usize) -> BacktestConfig {
    BacktestConfig::new(strategy, SYMBOL, 0, BAR_MS * (n as i64 + 1), dec!(10000))
}
