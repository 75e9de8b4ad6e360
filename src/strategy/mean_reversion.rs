//! Z-score mean reversion

use super::{instance_id, period_param, Strategy, StrategyError, StrategyType};
use crate::backtest::{BacktestConfig, Event, OrderRequest, ParameterSet, Position, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::VecDeque;

/// Buys when price drops `entry_z` standard deviations below its rolling
/// mean and sells once the deviation recovers to within `exit_z`.
pub struct MeanReversion {
    id: String,
    parameters: ParameterSet,
    lookback: usize,
    entry_z: f64,
    exit_z: f64,
    config: Option<BacktestConfig>,
    window: VecDeque<f64>,
    last_z: Option<f64>,
    position: Decimal,
    realized_pnl: Decimal,
    order_pending: bool,
    signals: Vec<OrderRequest>,
}

impl MeanReversion {
    pub const NAME: &'static str = "mean_reversion";

    pub fn new(parameters: ParameterSet) -> Self {
        let mut strategy = Self {
            id: instance_id(Self::NAME),
            parameters: parameters.clone(),
            lookback: 20,
            entry_z: 2.0,
            exit_z: 0.5,
            config: None,
            window: VecDeque::new(),
            last_z: None,
            position: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            order_pending: false,
            signals: Vec::new(),
        };
        if let Err(e) = strategy.apply_parameters(&parameters) {
            tracing::debug!(strategy = %strategy.id, error = %e, "Keeping default thresholds");
        }
        strategy
    }

    fn apply_parameters(&mut self, parameters: &ParameterSet) -> Result<(), StrategyError> {
        let lookback = period_param(parameters, "lookback", 20)?;
        if lookback < 2 {
            return Err(StrategyError::InvalidParameter {
                name: "lookback".to_string(),
                reason: "lookback must be at least 2".to_string(),
            });
        }
        let entry_z = parameters.get("entry_z").copied().unwrap_or(2.0);
        let exit_z = parameters.get("exit_z").copied().unwrap_or(0.5);
        if !(entry_z > 0.0) || !entry_z.is_finite() {
            return Err(StrategyError::InvalidParameter {
                name: "entry_z".to_string(),
                reason: format!("must be positive, got {}", entry_z),
            });
        }
        if !(exit_z >= 0.0 && exit_z < entry_z) {
            return Err(StrategyError::InvalidParameter {
                name: "exit_z".to_string(),
                reason: format!("must be in [0, entry_z), got {}", exit_z),
            });
        }

        self.lookback = lookback;
        self.entry_z = entry_z;
        self.exit_z = exit_z;
        Ok(())
    }

    fn z_score(&self, price: f64) -> Option<f64> {
        if self.window.len() < self.lookback || self.lookback < 2 {
            return None;
        }
        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let var = self.window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = var.sqrt();
        if std < 1e-12 {
            return None;
        }
        Some((price - mean) / std)
    }
}

impl Strategy for MeanReversion {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::MeanReversion
    }

    fn initialize(&mut self, config: &BacktestConfig) -> Result<(), StrategyError> {
        let mut parameters = config.parameters.clone();
        parameters.extend(self.parameters.clone());
        self.apply_parameters(&parameters)?;
        self.parameters = parameters;
        self.config = Some(config.clone());
        self.reset();
        Ok(())
    }

    fn on_event(&mut self, event: &Event) {
        let Some(config) = self.config.as_ref() else {
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

        // Score against the window before this price joins it
        let z = self.z_score(price_f64);
        self.window.push_back(price_f64);
        if self.window.len() > self.lookback {
            self.window.pop_front();
        }
        self.last_z = z;

        let Some(z) = z else {
            return;
        };
        if self.order_pending {
            return;
        }

        if self.position.is_zero() && z <= -self.entry_z {
            let equity = config.initial_balance + self.realized_pnl;
            let quantity = config.position_size(price, equity);
            if quantity > Decimal::ZERO {
                self.signals
                    .push(OrderRequest::market(config.symbol.clone(), Side::Buy, quantity));
                self.order_pending = true;
            }
        } else if self.position > Decimal::ZERO && z >= -self.exit_z {
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

    fn on_order_rejected(&mut self, _request: &OrderRequest, _reason: &str) {
        self.order_pending = false;
    }

    fn state(&self) -> serde_json::Value {
        json!({
            "lookback": self.lookback,
            "entry_z": self.entry_z,
            "exit_z": self.exit_z,
            "z_score": self.last_z,
            "position": self.position.to_string(),
        })
    }

    fn take_signals(&mut self) -> Vec<OrderRequest> {
        std::mem::take(&mut self.signals)
    }

    fn reset(&mut self) {
        self.window.clear();
        self.last_z = None;
        self.position = Decimal::ZERO;
        self.realized_pnl = Decimal::ZERO;
        self.order_pending = false;
        self.signals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{MarketData, MarketDataKind, TradeTick};
    use rust_decimal_macros::dec;

    fn tick(ts: i64, price: Decimal) -> Event {
        Event::market_data(
            ts,
            MarketData {
                symbol: "ETHUSDT".to_string(),
                venue: "test".to_string(),
                kind: MarketDataKind::Trade(TradeTick {
                    side: Side::Buy,
                    price,
                    quantity: dec!(1),
                    fee: None,
                }),
            },
        )
    }

    fn strategy() -> MeanReversion {
        let mut params = ParameterSet::new();
        params.insert("lookback".to_string(), 4.0);
        params.insert("entry_z".to_string(), 1.5);
        params.insert("exit_z".to_string(), 0.0);
        let mut s = MeanReversion::new(params);
        let cfg = BacktestConfig::new("mean_reversion", "ETHUSDT", 0, 1_000, dec!(1000));
        s.initialize(&cfg).unwrap();
        s
    }

    #[test]
    fn test_new_binds_parameters() {
        let mut params = ParameterSet::new();
        params.insert("lookback".to_string(), 50.0);
        params.insert("entry_z".to_string(), 2.5);
        let s = MeanReversion::new(params);
        assert_eq!(s.state()["lookback"], 50);
        assert_eq!(s.state()["entry_z"], 2.5);
        assert_eq!(s.state()["exit_z"], 0.5);
    }

    #[test]
    fn test_invalid_thresholds() {
        let mut params = ParameterSet::new();
        params.insert("entry_z".to_string(), 1.0);
        params.insert("exit_z".to_string(), 2.0);
        let mut s = MeanReversion::new(params);
        let cfg = BacktestConfig::new("mean_reversion", "ETHUSDT", 0, 1_000, dec!(1000));
        assert!(matches!(
            s.initialize(&cfg),
            Err(StrategyError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_entry_on_drop_and_exit_on_recovery() {
        let mut s = strategy();
        for (i, p) in [dec!(100), dec!(101), dec!(99), dec!(100)].iter().enumerate() {
            s.on_event(&tick(i as i64, *p));
        }
        assert!(s.take_signals().is_empty());

        s.on_event(&tick(4, dec!(95)));
        let signals = s.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Buy);

        s.on_position_update(&Position {
            symbol: "ETHUSDT".to_string(),
            quantity: signals[0].quantity,
            avg_price: dec!(95),
            ..Default::default()
        });

        s.on_event(&tick(5, dec!(102)));
        let signals = s.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Sell);
    }

    #[test]
    fn test_hot_reload_unsupported() {
        let mut s = strategy();
        assert!(!s.supports_hot_reload());
        assert_eq!(
            s.update_parameters(&ParameterSet::new()),
            Err(StrategyError::HotReloadUnsupported("mean_reversion".to_string()))
        );
    }

    #[test]
    fn test_flat_window_never_signals() {
        let mut s = strategy();
        for i in 0..10 {
            s.on_event(&tick(i, dec!(100)));
        }
        assert!(s.take_signals().is_empty());
        assert!(s.state()["z_score"].is_null());
    }
}
