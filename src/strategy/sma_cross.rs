//! Moving average crossover (trend following)

use super::{instance_id, period_param, Strategy, StrategyError, StrategyType};
use crate::backtest::{BacktestConfig, Event, OrderRequest, ParameterSet, Position, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Goes long when the fast SMA crosses above the slow SMA, exits on the
/// opposite cross.
///
/// Parameters: `fast_period` (default 10), `slow_period` (default 30).
pub struct MovingAverageCross {
    id: String,
    parameters: ParameterSet,
    fast_period: usize,
    slow_period: usize,
    config: Option<Arc<BacktestConfig>>,
    prices: VecDeque<f64>,
    fast_sum: f64,
    slow_sum: f64,
    fast_above: Option<bool>,
    position: Decimal,
    realized_pnl: Decimal,
    order_pending: bool,
    signals: Vec<OrderRequest>,
    events_seen: u64,
    crossovers: u64,
    rejections: u64,
}

impl MovingAverageCross {
    /// Registry name
    pub const NAME: &'static str = "sma_cross";

    /// Binds `parameters` immediately; invalid values leave the defaults in
    /// place and surface again from `initialize`.
    pub fn new(parameters: ParameterSet) -> Self {
        let mut strategy = Self {
            id: instance_id(Self::NAME),
            parameters: parameters.clone(),
            fast_period: 10,
            slow_period: 30,
            config: None,
            prices: VecDeque::new(),
            fast_sum: 0.0,
            slow_sum: 0.0,
            fast_above: None,
            position: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            order_pending: false,
            signals: Vec::new(),
            events_seen: 0,
            crossovers: 0,
            rejections: 0,
        };
        if let Err(e) = strategy.apply_parameters(&parameters) {
            tracing::debug!(strategy = %strategy.id, error = %e, "Keeping default periods");
        }
        strategy
    }

    fn apply_parameters(&mut self, parameters: &ParameterSet) -> Result<(), StrategyError> {
        let fast = period_param(parameters, "fast_period", 10)?;
        let slow = period_param(parameters, "slow_period", 30)?;
        if fast >= slow {
            return Err(StrategyError::InvalidParameter {
                name: "fast_period".to_string(),
                reason: format!("fast period {} must be below slow period {}", fast, slow),
            });
        }
        self.fast_period = fast;
        self.slow_period = slow;
        Ok(())
    }

    fn push_price(&mut self, price: f64) {
        self.prices.push_back(price);
        self.fast_sum += price;
        self.slow_sum += price;
        let len = self.prices.len();
        if len > self.fast_period {
            self.fast_sum -= self.prices[len - 1 - self.fast_period];
        }
        if len > self.slow_period {
            if let Some(dropped) = self.prices.pop_front() {
                self.slow_sum -= dropped;
            }
        }
    }

    fn averages(&self) -> Option<(f64, f64)> {
        if self.prices.len() < self.slow_period {
            return None;
        }
        Some((
            self.fast_sum / self.fast_period as f64,
            self.slow_sum / self.slow_period as f64,
        ))
    }

    fn clear_state(&mut self) {
        self.prices.clear();
        self.fast_sum = 0.0;
        self.slow_sum = 0.0;
        self.fast_above = None;
        self.position = Decimal::ZERO;
        self.realized_pnl = Decimal::ZERO;
        self.order_pending = false;
        self.signals.clear();
        self.events_seen = 0;
        self.crossovers = 0;
        self.rejections = 0;
    }
}

impl Strategy for MovingAverageCross {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::TrendFollowing
    }

    fn initialize(&mut self, config: &BacktestConfig) -> Result<(), StrategyError> {
        let mut parameters = config.parameters.clone();
        parameters.extend(self.parameters.clone());
        self.apply_parameters(&parameters)?;
        self.parameters = parameters;
        self.config = Some(Arc::new(config.clone()));
        self.clear_state();
        Ok(())
    }

    fn on_event(&mut self, event: &Event) {
        self.events_seen += 1;
        let Some(config) = self.config.clone() else {
            return;
        };
        let Some(data) = event.as_market_data() else {
            return;
        };
        if data.symbol != config.symbol {
            return;
        }
        let price = data.price();
        let Some(price_f64) = price.to_f64() else {
            return;
        };

        self.push_price(price_f64);
        let Some((fast, slow)) = self.averages() else {
            return;
        };

        let above = fast > slow;
        let crossed = self.fast_above.map(|prev| prev != above).unwrap_or(false);
        self.fast_above = Some(above);
        if !crossed || self.order_pending {
            return;
        }
        self.crossovers += 1;

        if above && self.position.is_zero() {
            let equity = config.initial_balance + self.realized_pnl;
            let quantity = config.position_size(price, equity);
            if quantity > Decimal::ZERO {
                self.signals
                    .push(OrderRequest::market(config.symbol.clone(), Side::Buy, quantity));
                self.order_pending = true;
            }
        } else if !above && self.position > Decimal::ZERO {
            self.signals.push(OrderRequest::market(
                config.symbol.clone(),
                Side::Sell,
                self.position,
            ));
            self.order_pending = true;
        }
    }

    fn on_position_update(&mut self, position: &Position) {
        self.position = position.quantity;
        self.realized_pnl = position.realized_pnl;
        self.order_pending = false;
    }

    fn on_order_rejected(&mut self, request: &OrderRequest, reason: &str) {
        tracing::debug!(strategy = %self.id, side = %request.side, reason, "Order rejected");
        self.rejections += 1;
        self.order_pending = false;
    }

    fn state(&self) -> serde_json::Value {
        let averages = self.averages();
        json!({
            "fast_period": self.fast_period,
            "slow_period": self.slow_period,
            "fast_sma": averages.map(|(f, _)| f),
            "slow_sma": averages.map(|(_, s)| s),
            "position": self.position.to_string(),
            "order_pending": self.order_pending,
        })
    }

    fn metrics(&self) -> Option<BTreeMap<String, f64>> {
        let mut metrics = BTreeMap::new();
        metrics.insert("events_seen".to_string(), self.events_seen as f64);
        metrics.insert("crossovers".to_string(), self.crossovers as f64);
        metrics.insert("rejections".to_string(), self.rejections as f64);
        Some(metrics)
    }

    fn take_signals(&mut self) -> Vec<OrderRequest> {
        std::mem::take(&mut self.signals)
    }

    fn supports_hot_reload(&self) -> bool {
        true
    }

    fn update_parameters(&mut self, parameters: &ParameterSet) -> Result<(), StrategyError> {
        let mut merged = self.parameters.clone();
        merged.extend(parameters.clone());
        self.apply_parameters(&merged)?;
        self.parameters = merged;
        // Windows depend on the periods
        self.prices.clear();
        self.fast_sum = 0.0;
        self.slow_sum = 0.0;
        self.fast_above = None;
        Ok(())
    }

    fn reset(&mut self) {
        self.clear_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{Kline, MarketData, MarketDataKind};
    use rust_decimal_macros::dec;

    fn config() -> BacktestConfig {
        let mut cfg = BacktestConfig::new("sma_cross", "BTCUSDT", 0, 1_000_000, dec!(10000));
        cfg.risk_per_trade = 0.5;
        cfg
    }

    fn bar(ts: i64, close: Decimal) -> Event {
        Event::market_data(
            ts,
            MarketData {
                symbol: "BTCUSDT".to_string(),
                venue: "test".to_string(),
                kind: MarketDataKind::Kline(Kline {
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: dec!(1),
                    close_time: None,
                }),
            },
        )
    }

    fn params(fast: f64, slow: f64) -> ParameterSet {
        let mut p = ParameterSet::new();
        p.insert("fast_period".to_string(), fast);
        p.insert("slow_period".to_string(), slow);
        p
    }

    #[test]
    fn test_new_binds_parameters() {
        let s = MovingAverageCross::new(params(3.0, 12.0));
        assert_eq!((s.fast_period, s.slow_period), (3, 12));

        let s = MovingAverageCross::new(params(20.0, 5.0));
        assert_eq!((s.fast_period, s.slow_period), (10, 30));
    }

    #[test]
    fn test_rejects_fast_not_below_slow() {
        let mut s = MovingAverageCross::new(params(5.0, 5.0));
        assert!(s.initialize(&config()).is_err());
    }

    #[test]
    fn test_buy_on_upward_cross_then_sell() {
        let mut s = MovingAverageCross::new(params(2.0, 3.0));
        s.initialize(&config()).unwrap();

        // Falling then rising prices produce an upward cross
        for (i, p) in [dec!(10), dec!(9), dec!(8), dec!(7), dec!(12)].iter().enumerate() {
            s.on_event(&bar(i as i64, *p));
        }
        let signals = s.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Buy);
        assert_eq!(signals[0].quantity, dec!(416.66666667));

        s.on_position_update(&Position {
            symbol: "BTCUSDT".to_string(),
            quantity: dec!(5),
            avg_price: dec!(12),
            ..Default::default()
        });

        for (i, p) in [dec!(13), dec!(5), dec!(4)].iter().enumerate() {
            s.on_event(&bar(10 + i as i64, *p));
        }
        let signals = s.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Sell);
        assert_eq!(signals[0].quantity, dec!(5));
    }

    #[test]
    fn test_ignores_other_symbols() {
        let mut s = MovingAverageCross::new(params(2.0, 3.0));
        s.initialize(&config()).unwrap();
        let mut e = bar(0, dec!(10));
        if let crate::backtest::EventPayload::MarketData(ref mut d) = e.payload {
            d.symbol = "ETHUSDT".to_string();
        }
        s.on_event(&e);
        assert!(s.averages().is_none());
        assert!(s.prices.is_empty());
    }

    #[test]
    fn test_hot_reload_updates_periods() {
        let mut s = MovingAverageCross::new(params(2.0, 3.0));
        s.initialize(&config()).unwrap();
        assert!(s.supports_hot_reload());
        s.update_parameters(&params(4.0, 8.0)).unwrap();
        assert_eq!(s.state()["fast_period"], 4);
        assert_eq!(s.state()["slow_period"], 8);
        assert!(s.update_parameters(&params(9.0, 8.0)).is_err());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut s = MovingAverageCross::new(params(2.0, 3.0));
        s.initialize(&config()).unwrap();
        s.on_event(&bar(0, dec!(10)));
        s.reset();
        assert!(s.prices.is_empty());
        assert_eq!(s.metrics().unwrap()["events_seen"], 0.0);
    }
}
