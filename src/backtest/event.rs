//! Events flowing through the simulator

use super::types::{FillReport, NANOS_PER_MILLI};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Discriminant of an event payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    MarketData,
    OrderFill,
    Timer,
    RiskCheck,
    Custom,
}

/// Dequeue priority; higher variants are drained first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum EventPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Candle close time (ms), when provided
    pub close_time: Option<i64>,
}

/// A single public trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub side: super::types::Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Option<Decimal>,
}

/// Top-of-book quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookTicker {
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
}

impl BookTicker {
    /// Mid price
    pub fn mid(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::TWO
    }
}

/// Market data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketDataKind {
    Kline(Kline),
    Trade(TradeTick),
    Book(BookTicker),
}

/// Market data update for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    /// Venue/market tag of the source
    pub venue: String,
    pub kind: MarketDataKind,
}

impl MarketData {
    /// Reference price used for marking and fills
    ///
    /// Close for candles, trade price for trades, mid for quotes.
    pub fn price(&self) -> Decimal {
        match &self.kind {
            MarketDataKind::Kline(k) => k.close,
            MarketDataKind::Trade(t) => t.price,
            MarketDataKind::Book(b) => b.mid(),
        }
    }
}

/// Periodic timer tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEvent {
    pub timer_id: u64,
    pub interval_ms: i64,
}

/// Request for the engine to evaluate risk state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckEvent {
    pub reason: String,
}

/// Opaque user payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    pub kind: String,
    pub data: serde_json::Value,
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    MarketData(MarketData),
    OrderFill(FillReport),
    Timer(TimerEvent),
    RiskCheck(RiskCheckEvent),
    Custom(CustomEvent),
}

/// The unit of work drained by the engine
///
/// Ordering is the dequeue order: an event that compares *greater* is drained
/// first. Priority dominates, then the earlier timestamp, then the lower
/// insertion sequence, which makes the order strict and total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub priority: EventPriority,
    pub timestamp_ns: i64,
    /// Assigned by the queue at insertion
    pub sequence: u64,
    pub payload: EventPayload,
}

impl Event {
    /// Create an event; the sequence is assigned on enqueue
    pub fn new(timestamp_ns: i64, priority: EventPriority, payload: EventPayload) -> Self {
        Self {
            priority,
            timestamp_ns,
            sequence: 0,
            payload,
        }
    }

    /// Market data event at a millisecond timestamp
    pub fn market_data(timestamp_ms: i64, data: MarketData) -> Self {
        Self::new(
            timestamp_ms.saturating_mul(NANOS_PER_MILLI),
            EventPriority::Normal,
            EventPayload::MarketData(data),
        )
    }

    /// Custom event at a millisecond timestamp
    pub fn custom(timestamp_ms: i64, kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(
            timestamp_ms.saturating_mul(NANOS_PER_MILLI),
            EventPriority::Normal,
            EventPayload::Custom(CustomEvent {
                kind: kind.into(),
                data,
            }),
        )
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn event_type(&self) -> EventType {
        match self.payload {
            EventPayload::MarketData(_) => EventType::MarketData,
            EventPayload::OrderFill(_) => EventType::OrderFill,
            EventPayload::Timer(_) => EventType::Timer,
            EventPayload::RiskCheck(_) => EventType::RiskCheck,
            EventPayload::Custom(_) => EventType::Custom,
        }
    }

    /// Timestamp in milliseconds
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ns / NANOS_PER_MILLI
    }

    /// Market data payload, if any
    pub fn as_market_data(&self) -> Option<&MarketData> {
        match &self.payload {
            EventPayload::MarketData(data) => Some(data),
            _ => None,
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.timestamp_ns.cmp(&self.timestamp_ns))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
