//! Backtest engine
//!
//! Owns the clock, the event queue, the execution model and the portfolio for
//! one run, and drives a strategy through them. A run is single-threaded;
//! pause and stop requests arrive through an [`EngineHandle`] and are honoured
//! at event boundaries.

use super::clock::VirtualClock;
use super::event::{Event, EventPayload, EventPriority, RiskCheckEvent, TimerEvent};
use super::execution_model::{ExecutionModel, SubmitOutcome};
use super::portfolio::Portfolio;
use super::queue::EventQueue;
use super::types::{
    BacktestConfig, BacktestResult, ConfigError, FillReport, OrderRequest, ParameterSet,
    TradeRecord, NANOS_PER_MILLI,
};
use crate::analytics::Analyzer;
use crate::data::{DataRequest, DataSource, DataSourceError};
use crate::strategy::{Strategy, StrategyError};
use crate::telemetry::{
    increment_counter, record_duration, set_gauge, CounterMetric, DurationMetric, GaugeMetric,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Events between progress notifications unless configured otherwise
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Idle,
    Initialized,
    Running,
    Paused,
    Completed,
    Stopped,
    Error,
}

impl EngineState {
    /// Completed, Stopped or Error
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Stopped | EngineState::Error
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Idle => "idle",
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::Completed => "completed",
            EngineState::Stopped => "stopped",
            EngineState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation not valid in the current state; nothing changed
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },
    #[error("no strategy set")]
    MissingStrategy,
    #[error("no data source set")]
    MissingDataSource,
    /// Strategy does not accept parameter updates
    #[error("strategy does not support hot reload")]
    HotReloadUnsupported,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Data(#[from] DataSourceError),
}

/// Progress notification
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// Fraction of the simulated window covered, in [0, 1]
    pub progress: f64,
    pub events_processed: u64,
    pub events_per_second: f64,
    pub status: EngineState,
}

/// Called every `progress_interval` events and once when a run ends
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Called on every state transition with `(old, new)`
pub type StateChangeCallback = Arc<dyn Fn(EngineState, EngineState) + Send + Sync>;

/// Run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Events drained, including engine-generated ones
    pub events_processed: u64,
    /// Events dequeued with a timestamp behind the clock
    pub late_events: u64,
    pub orders_submitted: u64,
    pub orders_rejected: u64,
    pub fills: u64,
}

#[derive(Debug, Default)]
struct ControlBlock {
    state: Mutex<EngineState>,
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
}

impl ControlBlock {
    fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_state(&self, next: EngineState) -> EngineState {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    fn clear_requests(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
    }
}

/// Cloneable remote control for a running engine
///
/// Requests take effect at the next event boundary.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    control: Arc<ControlBlock>,
}

impl EngineHandle {
    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    /// Ask a running engine to pause
    pub fn request_pause(&self) -> Result<(), EngineError> {
        let state = self.state();
        if state != EngineState::Running {
            return Err(EngineError::InvalidState {
                operation: "pause",
                state,
            });
        }
        self.control.pause_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Ask a running or paused engine to stop
    ///
    /// A paused engine stops when it is next resumed or stopped directly.
    pub fn request_stop(&self) -> Result<(), EngineError> {
        let state = self.state();
        if !matches!(state, EngineState::Running | EngineState::Paused) {
            return Err(EngineError::InvalidState {
                operation: "stop",
                state,
            });
        }
        self.control.stop_requested.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Deterministic event-driven backtest engine
pub struct BacktestEngine {
    config: Option<BacktestConfig>,
    strategy: Option<Box<dyn Strategy>>,
    data_source: Option<Arc<dyn DataSource>>,
    clock: VirtualClock,
    queue: EventQueue,
    execution: ExecutionModel,
    portfolio: Portfolio,
    trades: Vec<TradeRecord>,
    result: Option<BacktestResult>,
    control: Arc<ControlBlock>,
    progress_callback: Option<ProgressCallback>,
    state_callback: Option<StateChangeCallback>,
    progress_interval: u64,
    stats: EngineStats,
    trading_halted: bool,
    busy: Duration,
    drain_started: Option<Instant>,
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BacktestEngine {
    pub fn new() -> Self {
        Self {
            config: None,
            strategy: None,
            data_source: None,
            clock: VirtualClock::new(),
            queue: EventQueue::new(),
            execution: ExecutionModel::new(Decimal::ZERO, Decimal::ZERO),
            portfolio: Portfolio::new(Decimal::ZERO, Decimal::ZERO),
            trades: Vec::new(),
            result: None,
            control: Arc::new(ControlBlock::default()),
            progress_callback: None,
            state_callback: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            stats: EngineStats::default(),
            trading_halted: false,
            busy: Duration::ZERO,
            drain_started: None,
        }
    }

    /// Events between progress notifications; 0 disables periodic updates
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn set_progress_interval(&mut self, interval: u64) {
        self.progress_interval = interval;
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
    }

    pub fn set_state_change_callback<F>(&mut self, callback: F)
    where
        F: Fn(EngineState, EngineState) + Send + Sync + 'static,
    {
        self.state_callback = Some(Arc::new(callback));
    }

    /// Remote control sharing this engine's control block
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    pub fn config(&self) -> Option<&BacktestConfig> {
        self.config.as_ref()
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Events still queued
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Result of the last completed or stopped run
    pub fn result(&self) -> Option<&BacktestResult> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<BacktestResult> {
        self.result.take()
    }

    /// Snapshot of the attached strategy's state
    pub fn strategy_state(&self) -> Option<serde_json::Value> {
        self.strategy.as_ref().map(|s| s.state())
    }

    /// Validate the configuration and bind the clock, fills and portfolio to it
    pub fn initialize(&mut self, config: BacktestConfig) -> Result<(), EngineError> {
        self.expect_state("initialize", &[EngineState::Idle])?;
        config.validate()?;

        self.clock = VirtualClock::with_bounds(config.start_ns(), config.end_ns());
        self.execution = ExecutionModel::new(config.fee_rate, config.slippage_bps);
        self.portfolio = Portfolio::new(config.initial_balance, config.max_position_size);
        self.trades.clear();
        self.result = None;
        self.stats = EngineStats::default();
        self.trading_halted = false;

        info!(
            strategy = %config.strategy_name,
            symbol = %config.symbol,
            start = config.start_time,
            end = config.end_time,
            "Backtest initialized"
        );
        self.config = Some(config);
        self.transition(EngineState::Initialized);
        Ok(())
    }

    pub fn set_strategy(&mut self, strategy: Box<dyn Strategy>) -> Result<(), EngineError> {
        self.expect_state("set strategy", &[EngineState::Idle, EngineState::Initialized])?;
        self.strategy = Some(strategy);
        Ok(())
    }

    pub fn set_data_source(&mut self, source: Arc<dyn DataSource>) -> Result<(), EngineError> {
        self.expect_state(
            "set data source",
            &[EngineState::Idle, EngineState::Initialized],
        )?;
        self.data_source = Some(source);
        Ok(())
    }

    /// Queue an event; returns its sequence number
    pub fn add_event(&mut self, event: Event) -> Result<u64, EngineError> {
        self.expect_state(
            "add event",
            &[
                EngineState::Idle,
                EngineState::Initialized,
                EngineState::Running,
                EngineState::Paused,
            ],
        )?;
        Ok(self.queue.push(event))
    }

    /// Load data and drain the queue
    ///
    /// Returns once the queue is empty, or early when a pause or stop is
    /// requested through the handle. Check [`BacktestEngine::state`] to tell
    /// which. Missing collaborators are reported without a state change; data
    /// or strategy failures move the engine to `Error`.
    pub fn run(&mut self) -> Result<(), EngineError> {
        self.expect_state("run", &[EngineState::Initialized])?;
        if self.strategy.is_none() {
            return Err(EngineError::MissingStrategy);
        }
        let Some(source) = self.data_source.clone() else {
            return Err(EngineError::MissingDataSource);
        };
        let Some(config) = self.config.clone() else {
            return Err(EngineError::InvalidState {
                operation: "run",
                state: self.state(),
            });
        };
        let Some(mut strategy) = self.strategy.take() else {
            return Err(EngineError::MissingStrategy);
        };

        self.control.clear_requests();
        self.busy = Duration::ZERO;
        self.transition(EngineState::Running);

        let outcome = self.start(strategy.as_mut(), source.as_ref(), &config);
        let outcome = match outcome {
            Ok(()) => {
                self.drain(strategy.as_mut());
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Backtest failed");
                self.transition(EngineState::Error);
                Err(e)
            }
        };
        self.strategy = Some(strategy);
        outcome
    }

    /// Continue a paused run
    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.expect_state("resume", &[EngineState::Paused])?;
        let Some(mut strategy) = self.strategy.take() else {
            return Err(EngineError::MissingStrategy);
        };
        self.control.pause_requested.store(false, Ordering::SeqCst);
        strategy.on_resume();
        self.transition(EngineState::Running);
        self.drain(strategy.as_mut());
        self.strategy = Some(strategy);
        Ok(())
    }

    /// Request a pause at the next event boundary
    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.handle().request_pause()
    }

    /// Stop the run, producing a partial result
    pub fn stop(&mut self) -> Result<(), EngineError> {
        match self.state() {
            EngineState::Running => self.handle().request_stop(),
            EngineState::Paused => {
                if let Some(mut strategy) = self.strategy.take() {
                    self.finish(strategy.as_mut(), EngineState::Stopped);
                    self.strategy = Some(strategy);
                } else {
                    self.transition(EngineState::Stopped);
                }
                Ok(())
            }
            state => Err(EngineError::InvalidState {
                operation: "stop",
                state,
            }),
        }
    }

    /// Drop all run state and return to `Idle`
    ///
    /// The strategy and data source stay attached; the strategy is reset.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.trades.clear();
        self.result = None;
        self.config = None;
        self.clock = VirtualClock::new();
        self.execution = ExecutionModel::new(Decimal::ZERO, Decimal::ZERO);
        self.portfolio = Portfolio::new(Decimal::ZERO, Decimal::ZERO);
        self.stats = EngineStats::default();
        self.trading_halted = false;
        self.busy = Duration::ZERO;
        self.drain_started = None;
        self.control.clear_requests();
        if let Some(strategy) = self.strategy.as_mut() {
            strategy.reset();
        }
        self.transition(EngineState::Idle);
    }

    /// Push new parameters into a strategy that supports hot reload
    pub fn update_strategy_parameters(&mut self, parameters: &ParameterSet) -> Result<(), EngineError> {
        let strategy = self.strategy.as_mut().ok_or(EngineError::MissingStrategy)?;
        if !strategy.supports_hot_reload() {
            return Err(EngineError::HotReloadUnsupported);
        }
        strategy.update_parameters(parameters)?;
        info!(strategy = strategy.id(), "Strategy parameters updated");
        Ok(())
    }

    /// Build, run and collect one backtest
    pub fn run_to_completion(
        config: BacktestConfig,
        strategy: Box<dyn Strategy>,
        source: Arc<dyn DataSource>,
    ) -> Result<BacktestResult, EngineError> {
        let mut engine = Self::new().with_progress_interval(0);
        engine.initialize(config)?;
        engine.set_strategy(strategy)?;
        engine.set_data_source(source)?;
        engine.run()?;
        let state = engine.state();
        engine.take_result().ok_or(EngineError::InvalidState {
            operation: "collect result",
            state,
        })
    }

    fn expect_state(&self, operation: &'static str, allowed: &[EngineState]) -> Result<(), EngineError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(EngineError::InvalidState { operation, state })
        }
    }

    fn transition(&mut self, next: EngineState) {
        let previous = self.control.replace_state(next);
        if previous == next {
            return;
        }
        debug!(from = %previous, to = %next, "Engine state change");
        if let Some(callback) = &self.state_callback {
            callback(previous, next);
        }
    }

    fn start(
        &mut self,
        strategy: &mut dyn Strategy,
        source: &dyn DataSource,
        config: &BacktestConfig,
    ) -> Result<(), EngineError> {
        strategy.initialize(config)?;

        let load_started = Instant::now();
        if !source.is_connected() {
            source.connect()?;
        }
        let events = source.get_data(&DataRequest::from_config(config))?;
        record_duration(DurationMetric::DataLoad, load_started.elapsed());
        info!(
            source = source.name(),
            events = events.len(),
            elapsed_ms = load_started.elapsed().as_millis() as u64,
            "Loaded events"
        );
        self.queue.extend(events);

        if let Some(interval_ms) = config.timer_interval_ms.filter(|ms| *ms > 0) {
            self.schedule_timer(0, interval_ms, config.start_ns());
        }

        strategy.on_start();
        Ok(())
    }

    fn drain(&mut self, strategy: &mut dyn Strategy) {
        self.drain_started = Some(Instant::now());
        loop {
            if self.control.stop_requested.swap(false, Ordering::SeqCst) {
                self.finish(strategy, EngineState::Stopped);
                break;
            }
            if self.control.pause_requested.swap(false, Ordering::SeqCst) {
                strategy.on_pause();
                self.bank_busy_time();
                self.transition(EngineState::Paused);
                info!(events = self.stats.events_processed, "Backtest paused");
                break;
            }
            let Some(event) = self.queue.pop() else {
                self.finish(strategy, EngineState::Completed);
                break;
            };

            self.dispatch(strategy, event);
            self.stats.events_processed += 1;

            if self.progress_interval > 0 && self.stats.events_processed % self.progress_interval == 0 {
                self.emit_progress(EngineState::Running);
            }
        }
    }

    fn dispatch(&mut self, strategy: &mut dyn Strategy, event: Event) {
        let timestamp_ns = event.timestamp_ns;
        if timestamp_ns < self.clock.now_ns() {
            self.stats.late_events += 1;
            trace!(
                event_ns = timestamp_ns,
                clock_ns = self.clock.now_ns(),
                kind = ?event.event_type(),
                "Late event"
            );
        } else if !self.clock.advance_to(timestamp_ns) {
            if let Some(end) = self.clock.end_ns() {
                self.clock.advance_to(end);
            }
        }
        let now_ms = self.clock.now_ms();

        match &event.payload {
            EventPayload::MarketData(data) => {
                let price = data.price();
                self.execution.update_price(&data.symbol, price);
                self.portfolio.mark(&data.symbol, price);
                for fill in self.execution.match_resting(&data.symbol, price, now_ms) {
                    self.accept_resting_fill(strategy, fill);
                }
                strategy.on_event(&event);
                self.collect_signals(strategy, now_ms);
            }
            EventPayload::Custom(_) => {
                strategy.on_event(&event);
                self.collect_signals(strategy, now_ms);
            }
            EventPayload::Timer(timer) => {
                strategy.on_timer(self.clock.now_ns());
                self.collect_signals(strategy, now_ms);
                self.schedule_timer(timer.timer_id + 1, timer.interval_ms, timestamp_ns);
            }
            EventPayload::OrderFill(fill) => {
                self.apply_fill(strategy, fill);
                self.collect_signals(strategy, now_ms);
            }
            EventPayload::RiskCheck(check) => self.evaluate_risk(&check.reason),
        }
    }

    fn collect_signals(&mut self, strategy: &mut dyn Strategy, now_ms: i64) {
        for request in strategy.take_signals() {
            self.stats.orders_submitted += 1;
            if self.trading_halted {
                self.reject(strategy, &request, "trading halted: equity exhausted");
                continue;
            }
            if let Some(price) = self.execution.expected_price(&request) {
                let fee = self.execution.fee_for(price * request.quantity);
                if let Err(reason) = self.portfolio.check_order(&request, price, fee) {
                    self.reject(strategy, &request, &reason);
                    continue;
                }
            }
            match self.execution.submit(request.clone(), now_ms) {
                SubmitOutcome::Filled(fill) => self.enqueue_fill(fill),
                SubmitOutcome::Resting(order_id) => {
                    debug!(order_id, symbol = %request.symbol, "Limit order resting");
                }
                SubmitOutcome::Rejected(reason) => self.reject(strategy, &request, &reason),
            }
        }
    }

    fn accept_resting_fill(&mut self, strategy: &mut dyn Strategy, fill: FillReport) {
        let request = OrderRequest::limit(fill.symbol.clone(), fill.side, fill.quantity, fill.price);
        if self.trading_halted {
            self.reject(strategy, &request, "trading halted: equity exhausted");
            return;
        }
        match self.portfolio.check_order(&request, fill.price, fill.fee) {
            Ok(()) => self.enqueue_fill(fill),
            Err(reason) => self.reject(strategy, &request, &reason),
        }
    }

    fn enqueue_fill(&mut self, fill: FillReport) {
        self.portfolio.reserve(&fill);
        let event = Event::new(
            self.clock.now_ns(),
            EventPriority::High,
            EventPayload::OrderFill(fill),
        );
        self.queue.push(event);
    }

    fn reject(&mut self, strategy: &mut dyn Strategy, request: &OrderRequest, reason: &str) {
        self.stats.orders_rejected += 1;
        debug!(
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            reason,
            "Order rejected"
        );
        strategy.on_order_rejected(request, reason);
    }

    fn apply_fill(&mut self, strategy: &mut dyn Strategy, fill: &FillReport) {
        let trade = self.portfolio.apply_fill(fill, strategy.id());
        self.stats.fills += 1;
        self.trades.push(trade);
        if let Some(position) = self.portfolio.position(&fill.symbol) {
            strategy.on_position_update(position);
        }
        self.queue.push(Event::new(
            self.clock.now_ns(),
            EventPriority::Critical,
            EventPayload::RiskCheck(RiskCheckEvent {
                reason: format!("fill {}", fill.order_id),
            }),
        ));
    }

    fn evaluate_risk(&mut self, reason: &str) {
        if self.trading_halted {
            return;
        }
        let equity = self.portfolio.equity();
        if equity <= Decimal::ZERO {
            self.trading_halted = true;
            let cancelled = self.execution.cancel_all();
            warn!(
                %equity,
                reason,
                cancelled = cancelled.len(),
                "Equity exhausted, halting new orders"
            );
        }
    }

    fn schedule_timer(&mut self, timer_id: u64, interval_ms: i64, from_ns: i64) {
        let next = from_ns.saturating_add(interval_ms.saturating_mul(NANOS_PER_MILLI));
        let within = self.clock.end_ns().map(|end| next <= end).unwrap_or(true);
        if within {
            self.queue.push(Event::new(
                next,
                EventPriority::Normal,
                EventPayload::Timer(TimerEvent {
                    timer_id,
                    interval_ms,
                }),
            ));
        }
    }

    fn finish(&mut self, strategy: &mut dyn Strategy, final_state: EngineState) {
        strategy.on_stop();
        self.bank_busy_time();
        self.result = self.build_result();
        self.transition(final_state);
        self.emit_progress(final_state);

        let elapsed = self.busy;
        let eps = self.events_per_second();
        increment_counter(CounterMetric::EventsProcessed, self.stats.events_processed);
        increment_counter(CounterMetric::Trades, self.stats.fills);
        increment_counter(CounterMetric::OrdersRejected, self.stats.orders_rejected);
        increment_counter(CounterMetric::LateEvents, self.stats.late_events);
        set_gauge(GaugeMetric::EventsPerSecond, eps);
        record_duration(DurationMetric::Run, elapsed);

        if let Some(result) = &self.result {
            set_gauge(
                GaugeMetric::FinalEquity,
                result.final_balance.to_f64().unwrap_or(0.0),
            );
            info!(
                status = %final_state,
                events = self.stats.events_processed,
                trades = result.trade_count,
                total_return = result.total_return,
                events_per_second = eps as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                "Backtest finished"
            );
        }
        if self.stats.orders_rejected > 0 {
            warn!(rejected = self.stats.orders_rejected, "Orders rejected during run");
        }
    }

    fn build_result(&self) -> Option<BacktestResult> {
        let config = self.config.as_ref()?;
        let mut result = Analyzer::new(config.initial_balance).analyze(&self.trades);

        let final_balance = self.portfolio.equity();
        result.strategy_name = config.strategy_name.clone();
        result.symbol = config.symbol.clone();
        result.start_time = config.start_time;
        result.end_time = config.end_time;
        result.initial_balance = config.initial_balance;
        result.final_balance = final_balance;
        result.total_return = ((final_balance - config.initial_balance) / config.initial_balance)
            .to_f64()
            .unwrap_or(0.0);
        result.events_processed = self.stats.events_processed;
        Some(result)
    }

    fn bank_busy_time(&mut self) {
        if let Some(started) = self.drain_started.take() {
            self.busy += started.elapsed();
        }
    }

    fn events_per_second(&self) -> f64 {
        let running = self.drain_started.map(|s| s.elapsed()).unwrap_or_default();
        let secs = (self.busy + running).as_secs_f64();
        if secs > 0.0 {
            self.stats.events_processed as f64 / secs
        } else {
            0.0
        }
    }

    fn emit_progress(&self, status: EngineState) {
        let Some(callback) = &self.progress_callback else {
            return;
        };
        let progress = if status == EngineState::Completed {
            1.0
        } else {
            self.clock.progress()
        };
        callback(&ProgressUpdate {
            progress,
            events_processed: self.stats.events_processed,
            events_per_second: self.events_per_second(),
            status,
        });
    }
}
