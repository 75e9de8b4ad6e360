//! Backtest value types: run configuration, orders, fills, trades and results

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Named numeric strategy parameters
pub type ParameterSet = BTreeMap<String, f64>;

/// Nanoseconds per millisecond
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Configuration validation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// Strategy name is empty
    #[error("strategy name must not be empty")]
    EmptyStrategy,
    /// Symbol is empty
    #[error("symbol must not be empty")]
    EmptySymbol,
    /// End time is not after start time
    #[error("invalid time range: start {start} must be before end {end}")]
    InvalidTimeRange { start: i64, end: i64 },
    /// Initial balance is zero or negative
    #[error("initial balance must be positive, got {0}")]
    NonPositiveBalance(Decimal),
    /// Risk fraction outside (0, 1]
    #[error("risk per trade must be in (0, 1], got {0}")]
    InvalidRiskPerTrade(f64),
    /// Max position size is zero or negative
    #[error("max position size must be positive, got {0}")]
    InvalidMaxPosition(Decimal),
    /// Negative fee rate
    #[error("fee rate must not be negative, got {0}")]
    NegativeFeeRate(Decimal),
    /// Unknown data type name
    #[error("unknown data type: {0}")]
    UnknownDataType(String),
}

/// Kind of market data a run replays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// OHLCV candles
    #[default]
    Kline,
    /// Individual trades
    Trade,
    /// Top-of-book quotes
    Book,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Kline => "kline",
            DataType::Trade => "trade",
            DataType::Book => "book",
        };
        f.write_str(s)
    }
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kline" | "ohlcv" | "candle" => Ok(DataType::Kline),
            "trade" | "trades" => Ok(DataType::Trade),
            "book" | "quote" => Ok(DataType::Book),
            other => Err(ConfigError::UnknownDataType(other.to_string())),
        }
    }
}

fn default_risk_per_trade() -> f64 {
    0.1
}
fn default_max_position_size() -> Decimal {
    Decimal::new(1_000_000, 0)
}
fn default_data_source() -> String {
    "file".to_string()
}
fn default_time_frame() -> String {
    "1m".to_string()
}
fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3) // 0.001 = 10 bps
}

/// Immutable specification of a single backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Strategy name (registry key)
    pub strategy_name: String,
    /// Instrument symbol
    pub symbol: String,
    /// Start of the replay window (ms since epoch)
    pub start_time: i64,
    /// End of the replay window (ms since epoch)
    pub end_time: i64,
    /// Starting cash
    pub initial_balance: Decimal,
    /// Fraction of equity a strategy may commit per trade
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
    /// Largest position (in quantity units) the engine accepts
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    /// Data source identifier
    #[serde(default = "default_data_source")]
    pub data_source: String,
    /// Data type to replay
    #[serde(default)]
    pub data_type: DataType,
    /// Bar interval, e.g. "1m", "1h"
    #[serde(default = "default_time_frame")]
    pub time_frame: String,
    /// Strategy parameters
    #[serde(default)]
    pub parameters: ParameterSet,
    /// Fee charged on fill notional
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Adverse price adjustment applied to market orders, in basis points
    #[serde(default)]
    pub slippage_bps: Decimal,
    /// Emit timer events at this interval when set
    #[serde(default)]
    pub timer_interval_ms: Option<i64>,
}

impl BacktestConfig {
    /// Create a config with defaults for everything but the required fields
    pub fn new(
        strategy_name: impl Into<String>,
        symbol: impl Into<String>,
        start_time: i64,
        end_time: i64,
        initial_balance: Decimal,
    ) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            symbol: symbol.into(),
            start_time,
            end_time,
            initial_balance,
            risk_per_trade: default_risk_per_trade(),
            max_position_size: default_max_position_size(),
            data_source: default_data_source(),
            data_type: DataType::default(),
            time_frame: default_time_frame(),
            parameters: ParameterSet::new(),
            fee_rate: default_fee_rate(),
            slippage_bps: Decimal::ZERO,
            timer_interval_ms: None,
        }
    }

    /// Builder-style parameter insertion
    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Check every field constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategy_name.trim().is_empty() {
            return Err(ConfigError::EmptyStrategy);
        }
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.end_time <= self.start_time {
            return Err(ConfigError::InvalidTimeRange {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if self.initial_balance <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveBalance(self.initial_balance));
        }
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade <= 1.0) {
            return Err(ConfigError::InvalidRiskPerTrade(self.risk_per_trade));
        }
        if self.max_position_size <= Decimal::ZERO {
            return Err(ConfigError::InvalidMaxPosition(self.max_position_size));
        }
        if self.fee_rate < Decimal::ZERO {
            return Err(ConfigError::NegativeFeeRate(self.fee_rate));
        }
        Ok(())
    }

    /// Start of the window in nanoseconds
    pub fn start_ns(&self) -> i64 {
        self.start_time.saturating_mul(NANOS_PER_MILLI)
    }

    /// End of the window in nanoseconds
    pub fn end_ns(&self) -> i64 {
        self.end_time.saturating_mul(NANOS_PER_MILLI)
    }

    /// Parameter lookup with a fallback
    pub fn parameter(&self, name: &str, default: f64) -> f64 {
        self.parameters.get(name).copied().unwrap_or(default)
    }

    /// Quantity a strategy should trade at `price` given current `equity`
    ///
    /// `equity * risk_per_trade / price`, capped at `max_position_size`.
    pub fn position_size(&self, price: Decimal, equity: Decimal) -> Decimal {
        if price <= Decimal::ZERO || equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let risk = Decimal::try_from(self.risk_per_trade).unwrap_or(Decimal::ZERO);
        let size = (equity * risk / price).round_dp(8);
        size.min(self.max_position_size)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" | "bid" => Ok(Side::Buy),
            "sell" | "s" | "ask" => Ok(Side::Sell),
            other => Err(format!("invalid side: {}", other)),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Fill at the last observed price
    Market,
    /// Fill only at the limit price or better
    Limit,
}

/// An order intent emitted by a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Instrument symbol
    pub symbol: String,
    /// Trade side
    pub side: Side,
    /// Order type
    pub order_type: OrderType,
    /// Quantity to trade
    pub quantity: Decimal,
    /// Limit price (limit orders only)
    pub limit_price: Option<Decimal>,
    /// Free-form tag for strategy bookkeeping
    pub tag: Option<String>,
}

impl OrderRequest {
    /// Market order
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            tag: None,
        }
    }

    /// Limit order
    pub fn limit(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(price),
            tag: None,
        }
    }
}

/// A simulated execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    /// Engine-assigned order id
    pub order_id: u64,
    /// Instrument symbol
    pub symbol: String,
    /// Trade side
    pub side: Side,
    /// Fill price
    pub price: Decimal,
    /// Fill quantity
    pub quantity: Decimal,
    /// Fee paid
    pub fee: Decimal,
    /// Fill timestamp (ms)
    pub timestamp: i64,
}

/// Current holding in one symbol
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol
    pub symbol: String,
    /// Held quantity
    pub quantity: Decimal,
    /// Volume-weighted entry price
    pub avg_price: Decimal,
    /// Realized P&L net of fees
    pub realized_pnl: Decimal,
    /// Mark-to-market P&L of the open quantity
    pub unrealized_pnl: Decimal,
    /// Last observed price
    pub last_price: Decimal,
}

impl Position {
    /// Flat position for a symbol
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// True when nothing is held
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Market value of the open quantity
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.last_price
    }
}

/// One executed fill as recorded in a run's trade list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Execution timestamp (ms)
    pub timestamp: i64,
    /// Instrument symbol
    pub symbol: String,
    /// Trade side
    pub side: Side,
    /// Fill price
    pub price: Decimal,
    /// Fill quantity
    pub quantity: Decimal,
    /// Fee paid
    pub fee: Decimal,
    /// Realized P&L of this fill, net of its fee
    pub pnl: Decimal,
    /// Owning strategy instance
    pub strategy_id: String,
}

impl TradeRecord {
    /// Realized P&L as f64
    pub fn pnl_f64(&self) -> f64 {
        self.pnl.to_f64().unwrap_or(0.0)
    }

    /// Whether this fill counts as a winner
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// A `(timestamp, value)` sample of a curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Timestamp (ms)
    pub timestamp: i64,
    /// Curve value
    pub value: f64,
}

impl CurvePoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Terminal summary of one run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub symbol: String,
    /// Window start (ms)
    pub start_time: i64,
    /// Window end (ms)
    pub end_time: i64,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    /// Fractional return, 0.1 = 10%
    pub total_return: f64,
    /// Fractional peak-to-trough decline
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    /// Fraction of winning fills in [0, 1]
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: usize,
    pub win_count: usize,
    pub lose_count: usize,
    /// Mean P&L of winning fills
    pub avg_win: f64,
    /// Mean absolute P&L of losing fills
    pub avg_lose: f64,
    /// Events drained during the run
    #[serde(default)]
    pub events_processed: u64,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equity_curve: Option<Vec<CurvePoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawdown_curve: Option<Vec<CurvePoint>>,
}

impl BacktestResult {
    /// Net P&L in quote currency
    pub fn net_pnl(&self) -> Decimal {
        self.final_balance - self.initial_balance
    }

    /// Format as table for CLI output
    pub fn format_table(&self) -> String {
        format!(
            r#"
══════════════════════════════════════════════════════
               BACKTEST RESULTS
══════════════════════════════════════════════════════
Strategy:         {}
Symbol:           {}

PERFORMANCE
───────────────────────────────────────────────────────
Initial Balance:  {:.2}
Final Balance:    {:.2}
Net P&L:          {:+.2} ({:+.2}%)
Sharpe Ratio:     {:.2}
Max Drawdown:     {:.2}%
Win Rate:         {:.1}%
Profit Factor:    {:.2}

ACTIVITY
───────────────────────────────────────────────────────
Total Trades:     {} ({} won / {} lost)
Avg Win:          {:.2}
Avg Loss:         {:.2}
Events:           {}
══════════════════════════════════════════════════════
"#,
            self.strategy_name,
            self.symbol,
            self.initial_balance,
            self.final_balance,
            self.net_pnl(),
            self.total_return * 100.0,
            self.sharpe_ratio,
            self.max_drawdown * 100.0,
            self.win_rate * 100.0,
            self.profit_factor,
            self.trade_count,
            self.win_count,
            self.lose_count,
            self.avg_win,
            self.avg_lose,
            self.events_processed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> BacktestConfig {
        BacktestConfig::new("sma_cross", "BTCUSDT", 1_000, 5_000, dec!(10000))
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_invalid_time_range() {
        let mut cfg = config();
        cfg.end_time = cfg.start_time;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidTimeRange {
                start: 1_000,
                end: 1_000
            })
        );
    }

    #[test]
    fn test_non_positive_balance() {
        let mut cfg = config();
        cfg.initial_balance = dec!(0);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositiveBalance(_))
        ));
    }

    #[test]
    fn test_empty_strategy_and_symbol() {
        let mut cfg = config();
        cfg.strategy_name = " ".to_string();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyStrategy));

        let mut cfg = config();
        cfg.symbol.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptySymbol));
    }

    #[test]
    fn test_nanosecond_bounds() {
        let cfg = config();
        assert_eq!(cfg.start_ns(), 1_000_000_000);
        assert_eq!(cfg.end_ns(), 5_000_000_000);
    }

    #[test]
    fn test_position_size_capped() {
        let mut cfg = config();
        cfg.risk_per_trade = 0.5;
        assert_eq!(cfg.position_size(dec!(100), dec!(10000)), dec!(50));

        cfg.max_position_size = dec!(10);
        assert_eq!(cfg.position_size(dec!(100), dec!(10000)), dec!(10));
        assert_eq!(cfg.position_size(dec!(0), dec!(10000)), dec!(0));
    }

    #[test]
    fn test_data_type_parse() {
        assert_eq!("kline".parse::<DataType>().unwrap(), DataType::Kline);
        assert_eq!("TRADE".parse::<DataType>().unwrap(), DataType::Trade);
        assert_eq!("book".parse::<DataType>().unwrap(), DataType::Book);
        assert!("tick".parse::<DataType>().is_err());
    }

    #[test]
    fn test_side_parse_and_display() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
        assert_eq!(Side::Buy.to_string(), "buy");
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let json = r#"{
            "strategy_name": "sma_cross",
            "symbol": "ETHUSDT",
            "start_time": 0,
            "end_time": 60000,
            "initial_balance": "1000"
        }"#;
        let cfg: BacktestConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.data_type, DataType::Kline);
        assert_eq!(cfg.time_frame, "1m");
        assert_eq!(cfg.fee_rate, dec!(0.001));
        assert!(cfg.parameters.is_empty());
    }

    #[test]
    fn test_format_table() {
        let result = BacktestResult {
            strategy_name: "sma_cross".to_string(),
            symbol: "BTCUSDT".to_string(),
            initial_balance: dec!(1000),
            final_balance: dec!(1100),
            total_return: 0.1,
            trade_count: 4,
            win_count: 3,
            lose_count: 1,
            ..Default::default()
        };
        assert_eq!(result.net_pnl(), dec!(100));
        let table = result.format_table();
        assert!(table.contains("BACKTEST RESULTS"));
        assert!(table.contains("+100.00 (+10.00%)"));
        assert!(table.contains("4 (3 won / 1 lost)"));
    }

    #[test]
    fn test_trade_record_win() {
        let trade = TradeRecord {
            timestamp: 1,
            symbol: "BTCUSDT".to_string(),
            side: Side::Sell,
            price: dec!(101),
            quantity: dec!(1),
            fee: dec!(0.1),
            pnl: dec!(0.9),
            strategy_id: "s".to_string(),
        };
        assert!(trade.is_win());
        assert!((trade.pnl_f64() - 0.9).abs() < 1e-12);
    }
}
