//! Pre-loaded event source

use super::{DataRequest, DataSource, DataSourceError};
use crate::backtest::Event;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Serves a fixed event vector
///
/// Market data is filtered by symbol and the inclusive time range; other
/// payloads are filtered by time only. The events are shared, so clones are
/// cheap and several engines can read the same history.
#[derive(Debug, Clone)]
pub struct InMemoryDataSource {
    name: String,
    events: Arc<Vec<Event>>,
    connected: Arc<AtomicBool>,
}

impl InMemoryDataSource {
    pub fn new(name: impl Into<String>, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.timestamp_ns);
        Self {
            name: name.into(),
            events: Arc::new(events),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    fn matches(request: &DataRequest, event: &Event) -> bool {
        if !request.contains(event.timestamp_ms()) {
            return false;
        }
        match event.as_market_data() {
            Some(data) => data.symbol.eq_ignore_ascii_case(&request.symbol),
            None => true,
        }
    }
}

impl DataSource for InMemoryDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<(), DataSourceError> {
        self.connected.store(true, Ordering::SeqCst);
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
        Ok(self
            .events
            .iter()
            .filter(|e| Self::matches(request, e))
            .cloned()
            .collect())
    }

    fn download_data(&self, request: &DataRequest, sink: &Path) -> Result<usize, DataSourceError> {
        let events = self.get_data(request)?;
        super::write_events_csv(&events, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{Kline, MarketData, MarketDataKind};
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, ts: i64) -> Event {
        Event::market_data(
            ts,
            MarketData {
                symbol: symbol.to_string(),
                venue: "test".to_string(),
                kind: MarketDataKind::Kline(Kline {
                    open: dec!(1),
                    high: dec!(1),
                    low: dec!(1),
                    close: dec!(1),
                    volume: dec!(1),
                    close_time: None,
                }),
            },
        )
    }

    #[test]
    fn test_filters_by_symbol_and_inclusive_range() {
        let source = InMemoryDataSource::new(
            "memory",
            vec![bar("BTCUSDT", 300), bar("ETHUSDT", 150), bar("BTCUSDT", 100), bar("BTCUSDT", 200)],
        );
        let events = source.get_data(&DataRequest::new("BTCUSDT", 100, 200)).unwrap();
        let times: Vec<i64> = events.iter().map(|e| e.timestamp_ms()).collect();
        assert_eq!(times, vec![100, 200]);
    }

    #[test]
    fn test_rejects_invalid_request() {
        let source = InMemoryDataSource::new("memory", vec![]);
        assert!(matches!(
            source.get_data(&DataRequest::new("BTCUSDT", 10, 5)),
            Err(DataSourceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_connect_disconnect_idempotent() {
        let source = InMemoryDataSource::new("memory", vec![]);
        assert!(!source.is_connected());
        source.connect().unwrap();
        assert!(source.is_connected());
        source.disconnect();
        source.disconnect();
        assert!(!source.is_connected());
    }
}
