//! Backtesting module
//!
//! Replays historical events through a strategy under a virtual clock, with
//! simulated fills and spot portfolio accounting.

mod clock;
mod event;
mod execution_model;
mod portfolio;
mod queue;
mod simulator;
mod types;

pub use clock::VirtualClock;
pub use event::{
    BookTicker, CustomEvent, Event, EventPayload, EventPriority, EventType, Kline, MarketData,
    MarketDataKind, RiskCheckEvent, TimerEvent, TradeTick,
};
pub use execution_model::{ExecutionModel, RestingOrder, SubmitOutcome};
pub use portfolio::Portfolio;
pub use queue::EventQueue;
pub use simulator::{
    BacktestEngine, EngineError, EngineHandle, EngineState, EngineStats, ProgressCallback,
    ProgressUpdate, StateChangeCallback, DEFAULT_PROGRESS_INTERVAL,
};
pub use types::{
    BacktestConfig, BacktestResult, ConfigError, CurvePoint, DataType, FillReport, OrderRequest,
    OrderType, ParameterSet, Position, Side, TradeRecord, NANOS_PER_MILLI,
};
