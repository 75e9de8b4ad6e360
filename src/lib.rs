//! quant-replay: deterministic historical-replay backtesting
//!
//! This library provides the core components for:
//! - Event-driven backtest engine with a virtual clock
//! - Simulated execution and spot portfolio accounting
//! - Historical data from CSV files and the Binance REST API
//! - Strategy trait, registry and built-in strategies
//! - Grid, genetic, random and Bayesian parameter optimization
//! - Performance analytics and report generation
//! - Structured logging and Prometheus metrics

pub mod analytics;
pub mod backtest;
pub mod cli;
pub mod config;
pub mod data;
pub mod optimizer;
pub mod strategy;
pub mod telemetry;
