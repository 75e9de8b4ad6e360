//! Performance analytics and reporting
//!
//! Metric calculations over a run's trade list, extended risk statistics and
//! report rendering.

mod analyzer;
mod extended;
mod report;

pub use analyzer::{Analyzer, MAX_PROFIT_FACTOR, TRADING_DAYS_PER_YEAR};
pub use extended::{
    analyze_trades, monthly_returns, risk_metrics, ExtendedMetrics, MonthlyReturn, RiskMetrics,
    TradeAnalysis, MAX_RATIO,
};
pub use report::{format_timestamp, ReportConfig, ReportError, ReportFormat, Reporter};
