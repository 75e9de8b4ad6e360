//! CSV persistence of market data events
//!
//! Output uses the same column layouts the file source detects, so written
//! files load back without configuration.

use super::DataSourceError;
use crate::backtest::{DataType, Event, MarketDataKind};
use std::fs::File;
use std::path::Path;

const KLINE_HEADER: [&str; 7] = ["timestamp", "open", "high", "low", "close", "volume", "close_time"];
const TRADE_HEADER: [&str; 6] = ["timestamp", "symbol", "side", "price", "quantity", "fee"];
const BOOK_HEADER: [&str; 5] = ["timestamp", "bid_price", "bid_qty", "ask_price", "ask_qty"];

/// Streams market data events of one type into a CSV file
pub struct CsvEventWriter {
    writer: csv::Writer<File>,
    data_type: DataType,
    rows: usize,
}

impl CsvEventWriter {
    /// Create the file (and parent directories) and write the header
    pub fn create(path: &Path, data_type: DataType) -> Result<Self, DataSourceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        match data_type {
            DataType::Kline => writer.write_record(KLINE_HEADER)?,
            DataType::Trade => writer.write_record(TRADE_HEADER)?,
            DataType::Book => writer.write_record(BOOK_HEADER)?,
        }
        Ok(Self {
            writer,
            data_type,
            rows: 0,
        })
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Rows written so far
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Write one event; returns false when it is not market data of this
    /// writer's type
    pub fn write(&mut self, event: &Event) -> Result<bool, DataSourceError> {
        let Some(data) = event.as_market_data() else {
            return Ok(false);
        };
        let ts = event.timestamp_ms().to_string();
        match (&data.kind, self.data_type) {
            (MarketDataKind::Kline(k), DataType::Kline) => {
                let close_time = k.close_time.map(|t| t.to_string()).unwrap_or_default();
                self.writer.write_record([
                    ts,
                    k.open.to_string(),
                    k.high.to_string(),
                    k.low.to_string(),
                    k.close.to_string(),
                    k.volume.to_string(),
                    close_time,
                ])?;
            }
            (MarketDataKind::Trade(t), DataType::Trade) => {
                let fee = t.fee.map(|f| f.to_string()).unwrap_or_default();
                self.writer.write_record([
                    ts,
                    data.symbol.clone(),
                    t.side.to_string(),
                    t.price.to_string(),
                    t.quantity.to_string(),
                    fee,
                ])?;
            }
            (MarketDataKind::Book(b), DataType::Book) => {
                self.writer.write_record([
                    ts,
                    b.bid_price.to_string(),
                    b.bid_qty.to_string(),
                    b.ask_price.to_string(),
                    b.ask_qty.to_string(),
                ])?;
            }
            _ => return Ok(false),
        }
        self.rows += 1;
        Ok(true)
    }

    /// Flush and return the number of rows written
    pub fn finish(mut self) -> Result<usize, DataSourceError> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// Write every market data event matching the first one's type
pub fn write_events_csv(events: &[Event], path: &Path) -> Result<usize, DataSourceError> {
    let data_type = events
        .iter()
        .find_map(|e| e.as_market_data())
        .map(|d| match d.kind {
            MarketDataKind::Kline(_) => DataType::Kline,
            MarketDataKind::Trade(_) => DataType::Trade,
            MarketDataKind::Book(_) => DataType::Book,
        })
        .unwrap_or_default();

    let mut writer = CsvEventWriter::create(path, data_type)?;
    let mut skipped = 0usize;
    for event in events {
        if !writer.write(event)? && event.as_market_data().is_some() {
            skipped += 1;
        }
    }
    if skipped > 0 {
        tracing::warn!(skipped, data_type = %data_type, "Skipped market data of a different type");
    }
    let rows = writer.finish()?;
    tracing::debug!(rows, path = %path.display(), "Events written");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{BookTicker, Kline, MarketData, Side, TradeTick};
    use rust_decimal_macros::dec;

    fn md(ts: i64, kind: MarketDataKind) -> Event {
        Event::market_data(
            ts,
            MarketData {
                symbol: "BTCUSDT".to_string(),
                venue: "test".to_string(),
                kind,
            },
        )
    }

    #[test]
    fn test_writes_kline_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/BTCUSDT_1m.csv");
        let events = vec![
            md(
                60_000,
                MarketDataKind::Kline(Kline {
                    open: dec!(1),
                    high: dec!(2),
                    low: dec!(0.5),
                    close: dec!(1.5),
                    volume: dec!(10),
                    close_time: Some(119_999),
                }),
            ),
            Event::custom(60_001, "note", serde_json::json!({})),
            md(
                60_002,
                MarketDataKind::Book(BookTicker {
                    bid_price: dec!(1),
                    bid_qty: dec!(1),
                    ask_price: dec!(2),
                    ask_qty: dec!(1),
                }),
            ),
        ];
        assert_eq!(write_events_csv(&events, &path).unwrap(), 1);
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "timestamp,open,high,low,close,volume,close_time");
        assert_eq!(lines[1], "60000,1,2,0.5,1.5,10,119999");
    }

    #[test]
    fn test_writes_trade_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        let mut writer = CsvEventWriter::create(&path, DataType::Trade).unwrap();
        let written = writer
            .write(&md(
                5,
                MarketDataKind::Trade(TradeTick {
                    side: Side::Sell,
                    price: dec!(100),
                    quantity: dec!(0.1),
                    fee: None,
                }),
            ))
            .unwrap();
        assert!(written);
        assert_eq!(writer.finish().unwrap(), 1);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("5,BTCUSDT,sell,100,0.1,\n"));
    }
}
