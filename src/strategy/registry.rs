//! Name-keyed strategy constructors

use super::{MeanReversion, MovingAverageCross, Strategy, StrategyError};
use crate::backtest::ParameterSet;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a fresh strategy bound to a parameter vector
pub type StrategyConstructor = Arc<dyn Fn(&ParameterSet) -> Box<dyn Strategy> + Send + Sync>;

/// Explicit registry owned by the application layer
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    constructors: BTreeMap<String, StrategyConstructor>,
}

impl StrategyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in strategies
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(MovingAverageCross::NAME, |params| {
            Box::new(MovingAverageCross::new(params.clone()))
        });
        registry.register(MeanReversion::NAME, |params| {
            Box::new(MeanReversion::new(params.clone()))
        });
        registry
    }

    /// Register (or replace) a constructor
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&ParameterSet) -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    /// Construct a strategy by name
    pub fn create(&self, name: &str, parameters: &ParameterSet) -> Result<Box<dyn Strategy>, StrategyError> {
        self.constructors
            .get(name)
            .map(|ctor| ctor(parameters))
            .ok_or_else(|| StrategyError::Unknown(name.to_string()))
    }

    /// Shared constructor for a name, suitable for optimizers
    pub fn constructor(&self, name: &str) -> Result<StrategyConstructor, StrategyError> {
        self.constructors
            .get(name)
            .cloned()
            .ok_or_else(|| StrategyError::Unknown(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = StrategyRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["mean_reversion", "sma_cross"]);
        assert!(registry.contains("sma_cross"));
    }

    #[test]
    fn test_create_binds_parameters() {
        let registry = StrategyRegistry::with_builtins();
        let mut params = ParameterSet::new();
        params.insert("fast_period".to_string(), 3.0);
        let strategy = registry.create("sma_cross", &params).unwrap();
        assert_eq!(strategy.name(), "sma_cross");
        assert_eq!(strategy.state()["fast_period"], 3);
    }

    #[test]
    fn test_unknown_strategy() {
        let registry = StrategyRegistry::new();
        assert_eq!(
            registry.create("nope", &ParameterSet::new()).err(),
            Some(StrategyError::Unknown("nope".to_string()))
        );
        assert!(registry.constructor("nope").is_err());
    }
}
