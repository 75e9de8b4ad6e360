//! Strategy module
//!
//! The capability set the engine drives, plus built-in strategies and the
//! name-keyed registry used to construct them.

mod mean_reversion;
mod registry;
mod sma_cross;

pub use mean_reversion::MeanReversion;
pub use registry::{StrategyConstructor, StrategyRegistry};
pub use sma_cross::MovingAverageCross;

use crate::backtest::{BacktestConfig, Event, OrderRequest, ParameterSet, Position};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Strategy errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    /// A parameter is missing or out of range
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
    /// Hot reload requested on a strategy that does not support it
    #[error("strategy {0} does not support hot reload")]
    HotReloadUnsupported(String),
    /// Strategy name not registered
    #[error("unknown strategy: {0}")]
    Unknown(String),
}

/// Strategy family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    TrendFollowing,
    MeanReversion,
    Momentum,
    MarketMaking,
    Grid,
    Custom,
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyType::TrendFollowing => "trend_following",
            StrategyType::MeanReversion => "mean_reversion",
            StrategyType::Momentum => "momentum",
            StrategyType::MarketMaking => "market_making",
            StrategyType::Grid => "grid",
            StrategyType::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Trait implemented by every strategy the engine can drive
///
/// The engine only talks to strategies through this trait. Orders are pulled
/// with [`Strategy::take_signals`] after every callback.
pub trait Strategy: Send {
    /// Instance identifier, recorded on every trade
    fn id(&self) -> &str;
    /// Human-readable name
    fn name(&self) -> &str;
    /// Strategy family
    fn strategy_type(&self) -> StrategyType;

    /// Bind to a run configuration
    fn initialize(&mut self, config: &BacktestConfig) -> Result<(), StrategyError>;
    fn on_start(&mut self) {}
    fn on_stop(&mut self) {}
    fn on_pause(&mut self) {}
    fn on_resume(&mut self) {}

    /// Market data or custom event
    fn on_event(&mut self, event: &Event);
    /// Position changed after a fill
    fn on_position_update(&mut self, _position: &Position) {}
    /// Timer tick at simulated time (ns)
    fn on_timer(&mut self, _timestamp_ns: i64) {}
    /// An emitted order was refused by the engine
    fn on_order_rejected(&mut self, _request: &OrderRequest, _reason: &str) {}

    /// Snapshot of internal state
    fn state(&self) -> serde_json::Value;
    /// Optional named metrics
    fn metrics(&self) -> Option<BTreeMap<String, f64>> {
        None
    }

    /// Drain pending order intents
    fn take_signals(&mut self) -> Vec<OrderRequest>;

    fn supports_hot_reload(&self) -> bool {
        false
    }

    /// Apply new parameter values while running
    fn update_parameters(&mut self, _parameters: &ParameterSet) -> Result<(), StrategyError> {
        Err(StrategyError::HotReloadUnsupported(self.name().to_string()))
    }

    /// Drop all accumulated state
    fn reset(&mut self);
}

/// Read a positive integer period parameter
pub(crate) fn period_param(
    parameters: &ParameterSet,
    name: &str,
    default: usize,
) -> Result<usize, StrategyError> {
    let value = parameters.get(name).copied().unwrap_or(default as f64);
    if !value.is_finite() || value < 1.0 {
        return Err(StrategyError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a period >= 1, got {}", value),
        });
    }
    Ok(value.round() as usize)
}

/// Instance id of the form `name-xxxxxxxx`
pub(crate) fn instance_id(name: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", name, &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_param() {
        let mut params = ParameterSet::new();
        assert_eq!(period_param(&params, "fast_period", 10).unwrap(), 10);

        params.insert("fast_period".to_string(), 4.6);
        assert_eq!(period_param(&params, "fast_period", 10).unwrap(), 5);

        params.insert("fast_period".to_string(), 0.0);
        assert!(period_param(&params, "fast_period", 10).is_err());

        params.insert("fast_period".to_string(), f64::NAN);
        assert!(period_param(&params, "fast_period", 10).is_err());
    }

    #[test]
    fn test_instance_id_prefix() {
        let id = instance_id("sma_cross");
        assert!(id.starts_with("sma_cross-"));
        assert_eq!(id.len(), "sma_cross-".len() + 8);
    }

    #[test]
    fn test_strategy_type_display() {
        assert_eq!(StrategyType::TrendFollowing.to_string(), "trend_following");
        assert_eq!(StrategyType::MarketMaking.to_string(), "market_making");
    }
}
